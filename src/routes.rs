use std::{path::PathBuf, sync::Arc};

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use crate::{
    composer::is_bare_image_name,
    models::{GenerateOutfitRequest, GenerateOutfitResponse, Outcome},
    pipeline::{Pipeline, RequestError},
};

const SERVICE_NAME: &str = "Try-On Stylist API";

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub output_dir: Arc<PathBuf>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/api/generate-outfit", post(generate_outfit))
        .route("/api/images", get(list_images))
        .route("/api/image/:filename", get(get_image).delete(delete_image))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state)
}

pub async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "status": "online",
        "endpoints": {
            "POST /api/generate-outfit": "Generate outfit visualizations from natural language",
            "GET /api/image/:filename": "Retrieve a generated outfit image",
            "GET /api/images": "List all generated images",
            "DELETE /api/image/:filename": "Delete a generated image",
            "GET /health": "Health check endpoint"
        }
    }))
}

pub async fn health_check() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy", "service": SERVICE_NAME, "version": env!("CARGO_PKG_VERSION") }))
}

fn bad_request(e: RequestError) -> Response {
    warn!("🚫 Rejected request: {}", e);
    (StatusCode::BAD_REQUEST, Json(json!({ "success": false, "message": e.to_string() }))).into_response()
}

pub async fn generate_outfit(
    State(state): State<AppState>,
    payload: Result<Json<GenerateOutfitRequest>, JsonRejection>,
) -> Response {
    let body = match payload {
        Ok(Json(body)) => body,
        Err(rejection) => return bad_request(RequestError::MalformedBody(rejection.body_text())),
    };
    let response = match state.pipeline.handle(body).await {
        Ok(response) => response,
        Err(e) => return bad_request(e),
    };

    let status = match response.outcome {
        Outcome::Success => StatusCode::OK,
        Outcome::NoProducts => StatusCode::NOT_FOUND,
        Outcome::NoSuccessfulOutfits => StatusCode::BAD_GATEWAY,
    };
    (status, Json(GenerateOutfitResponse::from(&response))).into_response()
}

fn extension(name: &str) -> Option<String> {
    std::path::Path::new(name).extension().map(|e| e.to_string_lossy().to_ascii_lowercase())
}

/// Resolves a bare artifact file name inside the output directory; anything
/// that could escape it, or isn't an image, is refused.
fn artifact_path(dir: &std::path::Path, filename: &str) -> Option<PathBuf> {
    is_bare_image_name(filename).then(|| dir.join(filename))
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "detail": "Image not found" }))).into_response()
}

fn invalid_name() -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "detail": "Invalid image name" }))).into_response()
}

pub async fn list_images(State(state): State<AppState>) -> Response {
    let mut entries = match tokio::fs::read_dir(state.output_dir.as_path()).await {
        Ok(entries) => entries,
        Err(_) => return Json(json!({ "total": 0, "images": [] })).into_response(),
    };
    let mut images = Vec::new();
    loop {
        match entries.next_entry().await {
            Ok(Some(entry)) => {
                let name = entry.file_name().to_string_lossy().into_owned();
                if artifact_path(&state.output_dir, &name).is_some() {
                    images.push(name);
                }
            }
            Ok(None) => break,
            Err(e) => {
                error!("❌ Failed to list {}: {}", state.output_dir.display(), e);
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        }
    }
    // names embed the timestamp, so reverse lexical order is newest first
    images.sort_unstable_by(|a, b| b.cmp(a));
    Json(json!({ "total": images.len(), "images": images })).into_response()
}

pub async fn get_image(Path(filename): Path<String>, State(state): State<AppState>) -> Response {
    let Some(path) = artifact_path(&state.output_dir, &filename) else {
        return invalid_name();
    };
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(_) => return not_found(),
    };
    let content_type = match extension(&filename).as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        _ => "image/png",
    };
    let disposition = format!("inline; filename=\"{}\"", filename);
    ([(header::CONTENT_TYPE, content_type.to_string()), (header::CONTENT_DISPOSITION, disposition)], bytes)
        .into_response()
}

pub async fn delete_image(Path(filename): Path<String>, State(state): State<AppState>) -> Response {
    let Some(path) = artifact_path(&state.output_dir, &filename) else {
        return invalid_name();
    };
    match tokio::fs::remove_file(&path).await {
        Ok(()) => {
            info!("🗑️ Deleted {}", filename);
            Json(json!({ "success": true, "message": format!("Deleted {}", filename) })).into_response()
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => not_found(),
        Err(e) => {
            error!("❌ Failed to delete {}: {}", filename, e);
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "detail": format!("Failed to delete image: {e}") })))
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        composer::ImageLoader,
        config::AppConfig,
        fallback::FallbackCatalog,
        pipeline::Services,
        services::ServiceError,
        testing::{image_response, listing, png_bytes, write_png, FakeCompletion, FakeSearch, FakeSynthesis},
    };
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    struct Fixture {
        _dir: tempfile::TempDir,
        out: PathBuf,
        completion: Arc<FakeCompletion>,
        search: Arc<FakeSearch>,
        synthesis: Arc<FakeSynthesis>,
        app: Router,
    }

    fn fixture(search: FakeSearch, synthesis: FakeSynthesis) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let reference = write_png(dir.path(), "reference.png");
        let out = dir.path().join("out");
        std::fs::create_dir_all(&out).unwrap();
        let config = AppConfig {
            reference_image: reference.into(),
            output_dir: out.clone(),
            request_timeout: Duration::from_millis(500),
            synthesis_timeout: Duration::from_millis(500),
            ..AppConfig::default()
        };
        let completion = Arc::new(FakeCompletion::replying("tees"));
        let search = Arc::new(search);
        let synthesis = Arc::new(synthesis);
        let pipeline = Pipeline::new(
            Services {
                completion: completion.clone(),
                search: search.clone(),
                synthesis: synthesis.clone(),
                loader: ImageLoader::new(reqwest::Client::new(), Duration::from_millis(500)),
            },
            FallbackCatalog::new(Vec::new()),
            &config,
        );
        let app = router(AppState { pipeline: Arc::new(pipeline), output_dir: Arc::new(out.clone()) });
        Fixture { _dir: dir, out, completion, search, synthesis, app }
    }

    fn idle() -> Fixture {
        fixture(FakeSearch::returning(Vec::new()), FakeSynthesis::scripted(Vec::new()))
    }

    async fn json_body(resp: Response) -> serde_json::Value {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_reports_healthy() {
        let resp = idle().app.oneshot(Request::get("/health").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["status"], "healthy");
    }

    #[tokio::test]
    async fn missing_prompt_is_rejected_before_any_call() {
        let f = idle();
        let resp = f.app.clone().oneshot(post_json("/api/generate-outfit", json!({"max_results": 3}))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = json_body(resp).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "prompt is required");
        assert_eq!(f.completion.calls(), 0);
        assert_eq!(f.search.calls(), 0);
        assert_eq!(f.synthesis.calls(), 0);
    }

    #[tokio::test]
    async fn undecodable_bodies_get_the_structured_400() {
        let f = idle();
        for body in [json!({"prompt": "tee", "max_results": -1}), json!({"prompt": 5})] {
            let resp = f.app.clone().oneshot(post_json("/api/generate-outfit", body)).await.unwrap();
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
            let body = json_body(resp).await;
            assert_eq!(body["success"], false);
            assert!(body["message"].as_str().unwrap().starts_with("invalid request body"));
        }
        assert_eq!(f.completion.calls(), 0);
    }

    #[tokio::test]
    async fn no_products_is_reported_as_failure() {
        let f = fixture(
            FakeSearch::failing(ServiceError::Timeout(Duration::from_secs(10))),
            FakeSynthesis::scripted(Vec::new()),
        );
        let resp = f.app.oneshot(post_json("/api/generate-outfit", json!({"prompt": "moon boots"}))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body = json_body(resp).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["generated_images"], json!([]));
        assert_eq!(body["parsed_query"], "tees");
    }

    #[tokio::test]
    async fn successful_generation_returns_filenames() {
        let dir = tempfile::tempdir().unwrap();
        let garment = write_png(dir.path(), "garment.png");
        let listings = (1..=3)
            .map(|i| {
                let mut l = listing("Gap", i);
                l.thumbnail = Some(garment.clone());
                l
            })
            .collect();
        let f = fixture(
            FakeSearch::returning(listings),
            FakeSynthesis::scripted(vec![Ok(image_response(&png_bytes(4, 4))), Err(ServiceError::Empty)]),
        );
        let resp = f
            .app
            .oneshot(post_json("/api/generate-outfit", json!({"prompt": "white tee", "max_results": 2})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["products"].as_array().unwrap().len(), 2);
        assert_eq!(body["products"][0]["origin"], "live");
        let images = body["generated_images"].as_array().unwrap();
        assert_eq!(images.len(), 1);
        assert!(f.out.join(images[0].as_str().unwrap()).is_file());
        assert_eq!(body["attempts"][1]["status"], "failed");
    }

    #[tokio::test]
    async fn image_crud_round_trip() {
        let f = idle();
        std::fs::write(f.out.join("outfit_a_1_x.png"), png_bytes(2, 2)).unwrap();
        std::fs::write(f.out.join("outfit_b_1_x.jpg"), b"jpg").unwrap();
        std::fs::write(f.out.join("notes.txt"), b"ignored").unwrap();

        let resp = f.app.clone().oneshot(Request::get("/api/images").body(Body::empty()).unwrap()).await.unwrap();
        let body = json_body(resp).await;
        assert_eq!(body["total"], 2);
        assert_eq!(body["images"], json!(["outfit_b_1_x.jpg", "outfit_a_1_x.png"]));

        let resp = f
            .app
            .clone()
            .oneshot(Request::get("/api/image/outfit_b_1_x.jpg").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "image/jpeg");

        let resp = f
            .app
            .clone()
            .oneshot(Request::delete("/api/image/outfit_a_1_x.png").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(!f.out.join("outfit_a_1_x.png").exists());

        let resp = f
            .app
            .clone()
            .oneshot(Request::delete("/api/image/outfit_a_1_x.png").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn artifact_paths_cannot_escape_the_output_dir() {
        let dir = std::path::Path::new("/srv/out");
        assert_eq!(artifact_path(dir, "outfit_1.png"), Some(dir.join("outfit_1.png")));
        assert_eq!(artifact_path(dir, "..%2Fsecret.png"), None);
        assert_eq!(artifact_path(dir, "../secret.png"), None);
        assert_eq!(artifact_path(dir, ".hidden.png"), None);
        assert_eq!(artifact_path(dir, "notes.txt"), None);
        assert_eq!(artifact_path(dir, "a\\b.png"), None);
    }
}
