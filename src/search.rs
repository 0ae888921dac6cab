use std::{sync::Arc, time::Duration};

use tracing::{info, warn};

use crate::{
    models::{Origin, Price, Product, RefinedQuery, StageStatus},
    services::{bounded, RawListing, SearchParams, ShoppingSearch},
};

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub products: Vec<Product>,
    pub status: StageStatus,
}

/// Live product search: one provider call, eligibility filter, provider order kept, cap applied.
pub struct ProductSearch {
    search: Arc<dyn ShoppingSearch>,
    country: String,
    language: String,
    timeout: Duration,
}

impl ProductSearch {
    pub fn new(search: Arc<dyn ShoppingSearch>, country: String, language: String, timeout: Duration) -> Self {
        Self { search, country, language, timeout }
    }

    pub async fn search(&self, query: &RefinedQuery, cap: usize) -> SearchOutcome {
        let params = SearchParams {
            query: query.query.clone(),
            country: self.country.clone(),
            language: self.language.clone(),
            // ask for headroom since ineligible listings are dropped
            count: cap.saturating_mul(2),
        };

        match bounded(self.timeout, self.search.search(&params)).await {
            Ok(listings) => {
                let total = listings.len();
                let products = eligible_products(listings, cap);
                info!("   ✓ {} of {} listings eligible (cap {})", products.len(), total, cap);
                SearchOutcome { products, status: StageStatus::Ok }
            }
            Err(e) => {
                warn!("❌ Shopping search failed: {}", e);
                SearchOutcome { products: Vec::new(), status: StageStatus::Degraded(format!("search failed: {e}")) }
            }
        }
    }
}

fn eligible_products(listings: Vec<RawListing>, cap: usize) -> Vec<Product> {
    listings.into_iter().filter_map(to_product).filter(Product::is_eligible).take(cap).collect()
}

fn to_product(listing: RawListing) -> Option<Product> {
    let non_empty = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
    let image_url = non_empty(listing.thumbnail)?;
    let product_link = non_empty(listing.product_link).or_else(|| non_empty(listing.link))?;
    let price = listing.extracted_price.or_else(|| non_empty(listing.price).map(Price::Text));
    Some(Product {
        brand: non_empty(listing.source).unwrap_or_else(|| "Unknown".to_string()),
        name: non_empty(listing.title).unwrap_or_else(|| "Untitled item".to_string()),
        price,
        image_url,
        product_link,
        origin: Origin::Live,
    })
}
