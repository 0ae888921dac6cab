use std::{fmt, path::PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a product listing came from.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Live,
    Fallback,
}

/// Providers report prices either as a number or as a preformatted string.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum Price {
    Amount(f64),
    Text(String),
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Price::Amount(v) => write!(f, "${:.2}", v),
            Price::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Product {
    pub brand: String,
    pub name: String,
    #[serde(default)]
    pub price: Option<Price>,
    pub image_url: String,
    pub product_link: String,
    pub origin: Origin,
}

impl Product {
    /// Only products with both an image and a link may be shown or sent to synthesis.
    pub fn is_eligible(&self) -> bool {
        !self.image_url.trim().is_empty() && !self.product_link.trim().is_empty()
    }
}

/// A validated incoming request. Built once per call and never mutated.
#[derive(Debug, Clone)]
pub struct OutfitRequest {
    pub prompt: String,
    pub reference_image: Option<String>,
    pub max_results: usize,
}

/// Whether a stage produced its normal output or fell back to a degraded one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageStatus {
    Ok,
    Degraded(String),
}

impl StageStatus {
    pub fn is_degraded(&self) -> bool {
        matches!(self, StageStatus::Degraded(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefinedQuery {
    pub query: String,
    pub clothing_type: Option<String>,
    pub style: Option<String>,
    pub gender: Option<String>,
    pub status: StageStatus,
}

impl RefinedQuery {
    pub fn raw(prompt: &str, reason: impl Into<String>) -> Self {
        Self {
            query: prompt.trim().to_string(),
            clothing_type: None,
            style: None,
            gender: None,
            status: StageStatus::Degraded(reason.into()),
        }
    }
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutfitStatus {
    Succeeded,
    Failed,
}

/// Result of one try-on attempt for one product.
#[derive(Debug, Clone)]
pub struct GeneratedOutfit {
    pub product: Product,
    pub sequence: usize,
    pub image_path: Option<PathBuf>,
    pub status: OutfitStatus,
    pub diagnostic: String,
}

impl GeneratedOutfit {
    pub fn filename(&self) -> Option<String> {
        self.image_path
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    NoProducts,
    NoSuccessfulOutfits,
}

#[derive(Debug, Clone)]
pub struct OutfitResponse {
    pub outcome: Outcome,
    pub message: String,
    pub user_query: String,
    pub narrative: String,
    pub refined: RefinedQuery,
    pub products: Vec<Product>,
    pub outfits: Vec<GeneratedOutfit>,
    pub created_at: DateTime<Utc>,
}

impl OutfitResponse {
    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }

    pub fn generated_images(&self) -> Vec<String> {
        self.outfits
            .iter()
            .filter(|o| o.status == OutfitStatus::Succeeded)
            .filter_map(GeneratedOutfit::filename)
            .collect()
    }
}

// --- Wire types ---

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GenerateOutfitRequest {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub reference_image: Option<String>,
    #[serde(default)]
    pub max_results: Option<usize>,
}

#[derive(Debug, Serialize, Clone)]
pub struct ProductInfo {
    pub brand: String,
    pub name: String,
    pub image_url: String,
    pub product_link: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<Price>,
    pub origin: Origin,
}

impl From<&Product> for ProductInfo {
    fn from(p: &Product) -> Self {
        Self {
            brand: p.brand.clone(),
            name: p.name.clone(),
            image_url: p.image_url.clone(),
            product_link: p.product_link.clone(),
            price: p.price.clone(),
            origin: p.origin,
        }
    }
}

#[derive(Debug, Serialize, Clone)]
pub struct OutfitAttempt {
    pub sequence: usize,
    pub brand: String,
    pub status: OutfitStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    pub diagnostic: String,
}

#[derive(Debug, Serialize, Clone)]
pub struct GenerateOutfitResponse {
    pub success: bool,
    pub message: String,
    pub user_query: String,
    pub parsed_query: String,
    pub clothing_type: Option<String>,
    pub style: Option<String>,
    pub gender: Option<String>,
    pub narrative: String,
    pub products: Vec<ProductInfo>,
    pub generated_images: Vec<String>,
    pub attempts: Vec<OutfitAttempt>,
    pub timestamp: String,
}

impl From<&OutfitResponse> for GenerateOutfitResponse {
    fn from(r: &OutfitResponse) -> Self {
        Self {
            success: r.is_success(),
            message: r.message.clone(),
            user_query: r.user_query.clone(),
            parsed_query: r.refined.query.clone(),
            clothing_type: r.refined.clothing_type.clone(),
            style: r.refined.style.clone(),
            gender: r.refined.gender.clone(),
            narrative: r.narrative.clone(),
            products: r.products.iter().map(ProductInfo::from).collect(),
            generated_images: if r.is_success() { r.generated_images() } else { Vec::new() },
            attempts: r
                .outfits
                .iter()
                .map(|o| OutfitAttempt {
                    sequence: o.sequence,
                    brand: o.product.brand.clone(),
                    status: o.status,
                    filename: o.filename(),
                    diagnostic: o.diagnostic.clone(),
                })
                .collect(),
            timestamp: r.created_at.format("%Y%m%d_%H%M%S").to_string(),
        }
    }
}
