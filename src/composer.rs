use std::{
    io::Cursor,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use base64::Engine;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use image::{imageops::FilterType, ImageFormat};
use rand::Rng;
use reqwest::Client;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{error, info, warn};

use crate::{
    models::{GeneratedOutfit, OutfitStatus, Product, RefinedQuery},
    services::{bounded, GenerateContentResponse, ImageSynthesis, InlineData, InlineImage, ServiceError},
};

const MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024;
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp"];
const MAX_EDGE_PX: u32 = 2048;

const COLORS: &[&str] = &[
    "black", "white", "red", "blue", "navy", "green", "olive", "yellow", "orange", "pink", "purple",
    "brown", "tan", "beige", "cream", "grey", "gray", "burgundy", "maroon", "khaki", "denim",
];

#[derive(Debug, Error)]
pub enum ImageLoadError {
    #[error("empty image locator")]
    EmptyLocator,
    #[error("failed to download {url}: {reason}")]
    Download { url: String, reason: String },
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode image from {locator}: {source}")]
    Decode {
        locator: String,
        #[source]
        source: image::ImageError,
    },
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("inline image is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("inline image could not be decoded: {0}")]
    Decode(#[from] image::ImageError),
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Why a single try-on attempt did not produce an image.
#[derive(Debug, Error)]
pub enum ItemFailure {
    #[error("reference image unavailable: {0}")]
    Reference(String),
    #[error("garment image unavailable: {0}")]
    Garment(#[from] ImageLoadError),
    #[error("synthesis call failed: {0}")]
    Service(#[from] ServiceError),
    #[error("no image returned ({0})")]
    NoImage(String),
    #[error("could not save try-on image: {0}")]
    Persist(#[from] PersistError),
}

/// Resolves image locators (remote URLs or local paths) into normalized PNG bytes.
#[derive(Clone)]
pub struct ImageLoader {
    client: Client,
    timeout: Duration,
}

impl ImageLoader {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub async fn load(&self, locator: &str) -> Result<InlineImage, ImageLoadError> {
        let locator = locator.trim();
        if locator.is_empty() {
            return Err(ImageLoadError::EmptyLocator);
        }
        let raw = if is_remote(locator) {
            info!("   Downloading image {}...", locator);
            bounded(self.timeout, self.download(locator))
                .await
                .map_err(|e| ImageLoadError::Download { url: locator.to_string(), reason: e.to_string() })?
        } else {
            tokio::fs::read(locator)
                .await
                .map(Bytes::from)
                .map_err(|source| ImageLoadError::Read { path: locator.to_string(), source })?
        };
        normalize_to_png(locator, &raw)
    }

    async fn download(&self, url: &str) -> Result<Bytes, ServiceError> {
        let mut response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::Status { status: status.as_u16(), body: String::new() });
        }
        let mut buf = BytesMut::new();
        while let Some(chunk) = response.chunk().await? {
            if buf.len() + chunk.len() > MAX_IMAGE_BYTES {
                return Err(ServiceError::Malformed(format!("image larger than {MAX_IMAGE_BYTES} bytes")));
            }
            buf.extend_from_slice(&chunk);
        }
        if buf.is_empty() {
            return Err(ServiceError::Empty);
        }
        Ok(buf.freeze())
    }
}

pub fn is_remote(locator: &str) -> bool {
    let lower = locator.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// A plain image file name: no separators, no parent hops, not hidden.
pub fn is_bare_image_name(name: &str) -> bool {
    let bare = !name.is_empty() && !name.starts_with('.') && !name.contains(['/', '\\']) && !name.contains("..");
    let is_image = Path::new(name)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.as_str()));
    bare && is_image
}

fn normalize_to_png(locator: &str, raw: &[u8]) -> Result<InlineImage, ImageLoadError> {
    let decode_err = |source| ImageLoadError::Decode { locator: locator.to_string(), source };
    let mut img = image::load_from_memory(raw).map_err(decode_err)?;
    if img.width() > MAX_EDGE_PX || img.height() > MAX_EDGE_PX {
        img = img.resize(MAX_EDGE_PX, MAX_EDGE_PX, FilterType::Triangle);
    }
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).map_err(decode_err)?;
    Ok(InlineImage { mime_type: "image/png".to_string(), bytes: Bytes::from(out.into_inner()) })
}

/// Names artifacts `outfit_<stamp>_<seq>_<brandSlug>.<ext>`. The stamp carries
/// millisecond time plus a per-request nonce so concurrent requests never share names.
#[derive(Debug, Clone)]
pub struct ArtifactNamer {
    stamp: String,
}

impl ArtifactNamer {
    pub fn new(now: DateTime<Utc>) -> Self {
        let nonce: u32 = rand::thread_rng().gen();
        Self { stamp: format!("{}-{:08x}", now.format("%Y%m%dT%H%M%S%3f"), nonce) }
    }

    pub fn file_name(&self, sequence: usize, brand: &str, ext: &str) -> String {
        format!("outfit_{}_{}_{}.{}", self.stamp, sequence, slugify(brand), ext)
    }
}

pub fn slugify(text: &str) -> String {
    let mut slug = String::new();
    for c in text.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug: String = slug.trim_end_matches('-').chars().take(40).collect();
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() { "item".to_string() } else { slug.to_string() }
}

pub fn build_try_on_prompt(product: &Product, refined: &RefinedQuery) -> String {
    let haystack = format!("{} {}", product.name, refined.query).to_lowercase();
    let colors: Vec<&str> = COLORS
        .iter()
        .copied()
        .filter(|c| haystack.split(|ch: char| !ch.is_alphanumeric()).any(|w| w == *c))
        .collect();

    let mut details = vec![format!("Product: {} by {}", product.name, product.brand)];
    if let Some(kind) = &refined.clothing_type {
        details.push(format!("Garment type: {kind}"));
    }
    if !colors.is_empty() {
        details.push(format!("Color: {}", colors.join(", ")));
    }
    if let Some(style) = &refined.style {
        details.push(format!("Style: {style}"));
    }

    format!(
        "Create a realistic image of the person in the first image wearing the clothing item shown in the second image.\n\n\
{}\n\n\
Instructions:\n\
- Keep the person's face, body proportions, and skin tone exactly as shown\n\
- Naturally fit the clothing item onto the person with realistic drape and folds\n\
- Keep lighting, shadows, and background consistent with the first image\n\
- Do not add text, logos, or watermarks\n\n\
Generate a high-quality, photorealistic result.",
        details.join("\n")
    )
}

fn missing_image_diagnostic(resp: &GenerateContentResponse) -> String {
    let mut notes = vec![if resp.candidates.is_empty() {
        "no candidates in response".to_string()
    } else {
        "no inline image data".to_string()
    }];
    if let Some(reason) = resp.refusal_reason() {
        notes.push(reason);
    }
    let text = resp.text();
    if !text.trim().is_empty() {
        notes.push(format!("model said: {}", text.trim()));
    }
    notes.join("; ")
}

/// Runs one synthesis per product, in order, isolating every item's failure.
pub struct OutfitComposer {
    synthesis: Arc<dyn ImageSynthesis>,
    loader: ImageLoader,
    output_dir: PathBuf,
    timeout: Duration,
}

impl OutfitComposer {
    pub fn new(synthesis: Arc<dyn ImageSynthesis>, loader: ImageLoader, output_dir: PathBuf, timeout: Duration) -> Self {
        Self { synthesis, loader, output_dir, timeout }
    }

    pub async fn compose(
        &self,
        reference: &str,
        products: &[Product],
        refined: &RefinedQuery,
        namer: &ArtifactNamer,
    ) -> Vec<GeneratedOutfit> {
        if products.is_empty() {
            return Vec::new();
        }
        let subject = self.loader.load(reference).await.map_err(|e| {
            error!("❌ Reference image {} unusable: {}", reference, e);
            e.to_string()
        });

        let total = products.len();
        let mut outfits = Vec::with_capacity(total);
        for (idx, product) in products.iter().enumerate() {
            let sequence = idx + 1;
            info!("[{}/{}] Generating outfit with {}...", sequence, total, product.brand);
            let attempt = match &subject {
                Ok(subject) => self.attempt(subject, product, refined, sequence, namer).await,
                Err(reason) => Err(ItemFailure::Reference(reason.clone())),
            };
            let outfit = match attempt {
                Ok(path) => {
                    info!("   ✅ Image saved as '{}'", path.display());
                    GeneratedOutfit {
                        product: product.clone(),
                        sequence,
                        image_path: Some(path),
                        status: OutfitStatus::Succeeded,
                        diagnostic: "generated".to_string(),
                    }
                }
                Err(failure) => {
                    warn!("   ❌ Failed: {}", failure);
                    GeneratedOutfit {
                        product: product.clone(),
                        sequence,
                        image_path: None,
                        status: OutfitStatus::Failed,
                        diagnostic: failure.to_string(),
                    }
                }
            };
            outfits.push(outfit);
        }
        outfits
    }

    async fn attempt(
        &self,
        subject: &InlineImage,
        product: &Product,
        refined: &RefinedQuery,
        sequence: usize,
        namer: &ArtifactNamer,
    ) -> Result<PathBuf, ItemFailure> {
        let garment = self.loader.load(&product.image_url).await?;
        let prompt = build_try_on_prompt(product, refined);
        info!("   Processing with Gemini...");
        let response = bounded(self.timeout, self.synthesis.synthesize(&prompt, subject, &garment)).await?;

        let Some(inline) = response.first_inline_image() else {
            return Err(ItemFailure::NoImage(missing_image_diagnostic(&response)));
        };
        info!("🎯 Found image data with mime type: {}", inline.mime_type.as_deref().unwrap_or("unknown"));
        Ok(persist(inline, &self.output_dir, |ext| namer.file_name(sequence, &product.brand, ext)).await?)
    }
}

async fn persist<F>(inline: &InlineData, dir: &Path, name_for: F) -> Result<PathBuf, PersistError>
where
    F: FnOnce(&str) -> String,
{
    let bytes = base64::engine::general_purpose::STANDARD.decode(inline.data.trim())?;
    let format = image::guess_format(&bytes)?;
    image::load_from_memory_with_format(&bytes, format)?;
    let ext = match format {
        ImageFormat::Jpeg => "jpg",
        ImageFormat::WebP => "webp",
        _ => "png",
    };

    let path = dir.join(name_for(ext));
    let file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .await
        .map_err(|source| PersistError::Write { path: path.clone(), source })?;
    match write_or_discard(&path, file, &bytes).await {
        Ok(()) => Ok(path),
        Err(source) => Err(PersistError::Write { path, source }),
    }
}

/// Writes `bytes` through `writer`; on failure the partial file at `path` is removed.
async fn write_or_discard<W>(path: &Path, mut writer: W, bytes: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let written: std::io::Result<()> = async {
        writer.write_all(bytes).await?;
        writer.flush().await
    }
    .await;
    if written.is_err() {
        if let Err(e) = tokio::fs::remove_file(path).await {
            warn!("   Could not remove partial artifact {}: {}", path.display(), e);
        }
    }
    written
}
