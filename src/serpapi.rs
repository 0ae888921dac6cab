use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{error, info};

use crate::{
    config::AppConfig,
    services::{RawListing, SearchParams, ServiceError, ShoppingSearch},
};

/// Google Shopping through SerpAPI.
pub struct SerpApiClient {
    client: Client,
    api_key: String,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct ShoppingResults {
    #[serde(default)]
    shopping_results: Vec<RawListing>,
    #[serde(default)]
    error: Option<String>,
}

impl SerpApiClient {
    pub fn new(client: Client, config: &AppConfig) -> Self {
        Self { client, api_key: config.serpapi_key.clone(), endpoint: config.serpapi_base_url.clone() }
    }
}

#[async_trait]
impl ShoppingSearch for SerpApiClient {
    async fn search(&self, params: &SearchParams) -> Result<Vec<RawListing>, ServiceError> {
        if self.api_key.is_empty() {
            return Err(ServiceError::NotConfigured("SERPAPI_KEY"));
        }
        info!("🔍 Searching Google Shopping for '{}' via SerpAPI...", params.query);

        let num = params.count.to_string();
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("engine", "google_shopping"),
                ("q", params.query.as_str()),
                ("gl", params.country.as_str()),
                ("hl", params.language.as_str()),
                ("num", num.as_str()),
                ("api_key", self.api_key.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            error!("❌ SerpAPI error {}: {}", status, body);
            return Err(ServiceError::Status { status: status.as_u16(), body });
        }
        parse_results(&body)
    }
}

fn parse_results(body: &str) -> Result<Vec<RawListing>, ServiceError> {
    let parsed: ShoppingResults =
        serde_json::from_str(body).map_err(|e| ServiceError::Malformed(format!("SerpAPI payload: {e}")))?;
    if let Some(message) = parsed.error {
        // SerpAPI reports "no results" as an error string with a 200 status.
        if parsed.shopping_results.is_empty() && !message.contains("hasn't returned any results") {
            return Err(ServiceError::Malformed(message));
        }
    }
    info!("   Found {} products!", parsed.shopping_results.len());
    Ok(parsed.shopping_results)
}
