//! Request orchestration: refine, search, top up from the fallback catalog,
//! compose try-ons, then assemble the response. Stages run strictly in that
//! order and every degraded stage is recorded as data, never as an error.

use std::{path::PathBuf, sync::Arc};

use chrono::Utc;
use thiserror::Error;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::{
    assembler::{self, StyleAdvisor},
    composer::{is_bare_image_name, is_remote, ArtifactNamer, ImageLoader, OutfitComposer},
    config::AppConfig,
    fallback::FallbackCatalog,
    models::{GenerateOutfitRequest, OutfitRequest, OutfitResponse, StageStatus},
    refiner::QueryRefiner,
    search::ProductSearch,
    services::{ImageSynthesis, ShoppingSearch, TextCompletion},
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("prompt is required")]
    MissingPrompt,
    #[error("max_results must be a positive integer")]
    InvalidMaxResults,
    #[error("reference_image must be an http(s) URL or an image file name in the reference directory")]
    InvalidReferenceImage,
    #[error("invalid request body: {0}")]
    MalformedBody(String),
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub default_reference: String,
    pub reference_dir: PathBuf,
    pub default_max_results: usize,
    pub generation_cap: usize,
    pub fallback_min_live: usize,
}

impl From<&AppConfig> for PipelineSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            default_reference: config.reference_image.to_string_lossy().into_owned(),
            reference_dir: config.reference_dir.clone(),
            default_max_results: config.default_max_results,
            generation_cap: config.generation_cap,
            fallback_min_live: config.fallback_min_live,
        }
    }
}

/// Collaborators are created once at startup and injected here.
pub struct Services {
    pub completion: Arc<dyn TextCompletion>,
    pub search: Arc<dyn ShoppingSearch>,
    pub synthesis: Arc<dyn ImageSynthesis>,
    pub loader: ImageLoader,
}

pub struct Pipeline {
    refiner: QueryRefiner,
    search: ProductSearch,
    fallback: FallbackCatalog,
    composer: OutfitComposer,
    advisor: StyleAdvisor,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(services: Services, fallback: FallbackCatalog, config: &AppConfig) -> Self {
        Self {
            refiner: QueryRefiner::new(services.completion.clone(), config.request_timeout),
            search: ProductSearch::new(
                services.search,
                config.search_country.clone(),
                config.search_language.clone(),
                config.request_timeout,
            ),
            fallback,
            composer: OutfitComposer::new(
                services.synthesis,
                services.loader,
                config.output_dir.clone(),
                config.synthesis_timeout,
            ),
            advisor: StyleAdvisor::new(services.completion, config.request_timeout),
            settings: PipelineSettings::from(config),
        }
    }

    pub fn validate(&self, body: GenerateOutfitRequest) -> Result<OutfitRequest, RequestError> {
        let prompt = body
            .prompt
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .ok_or(RequestError::MissingPrompt)?;
        let max_results = match body.max_results {
            Some(0) => return Err(RequestError::InvalidMaxResults),
            Some(n) => n,
            None => self.settings.default_max_results,
        };
        let reference_image = match body.reference_image.map(|r| r.trim().to_string()).filter(|r| !r.is_empty()) {
            None => None,
            Some(url) if is_remote(&url) => Some(url),
            Some(name) => Some(self.resolve_reference(&name).ok_or(RequestError::InvalidReferenceImage)?),
        };
        Ok(OutfitRequest { prompt, reference_image, max_results })
    }

    /// Local reference images are bare file names inside the reference directory.
    fn resolve_reference(&self, name: &str) -> Option<String> {
        is_bare_image_name(name).then(|| self.settings.reference_dir.join(name).to_string_lossy().into_owned())
    }

    pub async fn handle(&self, body: GenerateOutfitRequest) -> Result<OutfitResponse, RequestError> {
        let request = self.validate(body)?;
        Ok(self.run(&request).await)
    }

    pub async fn run(&self, request: &OutfitRequest) -> OutfitResponse {
        let request_id = Uuid::new_v4();
        let span = info_span!("outfit_request", %request_id);
        self.run_stages(request).instrument(span).await
    }

    async fn run_stages(&self, request: &OutfitRequest) -> OutfitResponse {
        let created_at = Utc::now();
        let cap = request.max_results;
        info!("🎨 Processing request: {}", request.prompt);

        let refined = self.refiner.refine(&request.prompt).await;

        let live = self.search.search(&refined, cap).await;
        if let StageStatus::Degraded(reason) = &live.status {
            warn!("   Live search degraded: {}", reason);
        }
        let mut products = live.products;
        if products.len() < self.settings.fallback_min_live {
            let extra = self.fallback.supplement(&request.prompt, &products, cap);
            info!(
                "   📚 Only {} live result(s), adding {} fallback item(s)",
                products.len(),
                extra.len()
            );
            products.extend(extra);
        }
        info!("   Found {} products", products.len());

        let generation_cap = self.settings.generation_cap.min(cap).min(products.len());
        let reference = request.reference_image.as_deref().unwrap_or(&self.settings.default_reference);
        let namer = ArtifactNamer::new(created_at);
        let outfits = self
            .composer
            .compose(reference, &products[..generation_cap], &refined, &namer)
            .await;

        let (advice, advice_status) = self.advisor.advise(&request.prompt).await;
        if advice_status.is_degraded() || refined.status.is_degraded() {
            info!("   Narrative built from degraded stages: refine={:?} advice={:?}", refined.status, advice_status);
        }
        assembler::assemble(&request.prompt, &advice, refined, products, outfits, created_at)
    }
}
