use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::{
    models::{GeneratedOutfit, Origin, Outcome, OutfitResponse, OutfitStatus, Product, RefinedQuery, StageStatus},
    services::{bounded, TextCompletion},
};

const ADVISOR_INSTRUCTION: &str = "You are a personal shopper AI assistant who helps users find clothes \
based on their descriptions. Always respond in English. Suggest fitting outfits, describe matching items, \
and mention known brands or shopping categories as sources. If the request is unclear, say what extra \
detail would help instead of guessing. Format the answer in Markdown: use # and ## headings, bullet points \
for lists, **bold** for key points, and an occasional emoji (👗🛍️) where it fits. Keep it under 250 words.";

const ADVICE_UNAVAILABLE: &str =
    "# Your outfit ideas 👗\n\nStyling advice is unavailable right now, but here is what we found for you.";

/// The shopping-assistant completion that opens the narrative.
pub struct StyleAdvisor {
    completion: Arc<dyn TextCompletion>,
    timeout: Duration,
}

impl StyleAdvisor {
    pub fn new(completion: Arc<dyn TextCompletion>, timeout: Duration) -> Self {
        Self { completion, timeout }
    }

    pub async fn advise(&self, prompt: &str) -> (String, StageStatus) {
        match bounded(self.timeout, self.completion.complete(ADVISOR_INSTRUCTION, prompt)).await {
            Ok(text) if !text.trim().is_empty() => (text.trim().to_string(), StageStatus::Ok),
            Ok(_) => {
                warn!("⚠️ Style advice came back empty");
                (ADVICE_UNAVAILABLE.to_string(), StageStatus::Degraded("advice was empty".into()))
            }
            Err(e) => {
                warn!("⚠️ Style advice failed: {}", e);
                (ADVICE_UNAVAILABLE.to_string(), StageStatus::Degraded(format!("advice failed: {e}")))
            }
        }
    }
}

/// Success needs at least one generated image. Everything else is a total failure.
pub fn outcome_for(products: &[Product], outfits: &[GeneratedOutfit]) -> Outcome {
    if products.is_empty() {
        Outcome::NoProducts
    } else if outfits.iter().any(|o| o.status == OutfitStatus::Succeeded) {
        Outcome::Success
    } else {
        Outcome::NoSuccessfulOutfits
    }
}

fn message_for(outcome: Outcome, outfits: &[GeneratedOutfit]) -> String {
    let succeeded = outfits.iter().filter(|o| o.status == OutfitStatus::Succeeded).count();
    let failed = outfits.len() - succeeded;
    match outcome {
        Outcome::Success if failed == 0 => format!("Successfully generated {succeeded} outfit visualization(s)"),
        Outcome::Success => {
            format!("Successfully generated {succeeded} outfit visualization(s); {failed} attempt(s) failed")
        }
        Outcome::NoProducts => "No products found for the given query".to_string(),
        Outcome::NoSuccessfulOutfits => {
            format!("Failed to generate any outfit visualizations ({} attempted)", outfits.len())
        }
    }
}

fn product_card(index: usize, p: &Product) -> String {
    let price = p.price.as_ref().map(|v| format!(" - **{v}**")).unwrap_or_default();
    format!(
        "**{index}.** {} from {}{price}\n![Product]({})\n[Buy Now]({})\n",
        p.name, p.brand, p.image_url, p.product_link
    )
}

pub fn render_narrative(advice: &str, products: &[Product], outfits: &[GeneratedOutfit]) -> String {
    let mut out = advice.trim_end().to_string();
    if products.is_empty() {
        out.push_str("\n\nNo matches found. Try clarifying your outfit description! 🔍");
        return out;
    }

    let mut index = 0;
    let mut section = |out: &mut String, heading: &str, origin: Origin| {
        let cards: Vec<String> = products
            .iter()
            .filter(|p| p.origin == origin)
            .map(|p| {
                index += 1;
                product_card(index, p)
            })
            .collect();
        if !cards.is_empty() {
            out.push_str(&format!("\n\n## {heading}\n{}", cards.join("\n")));
        }
    };
    section(&mut out, "Top Matches from Live Search 👗🛍️", Origin::Live);
    section(&mut out, "Curated Picks (not from live search) 📚", Origin::Fallback);

    if !outfits.is_empty() {
        out.push_str("\n\n## Try-On Results 🎨\n");
        for o in outfits {
            let line = match (o.status, o.filename()) {
                (OutfitStatus::Succeeded, Some(name)) => format!("- ✅ {}: `{}`\n", o.product.brand, name),
                _ => format!("- ❌ {}: {}\n", o.product.brand, o.diagnostic),
            };
            out.push_str(&line);
        }
    }
    out
}

pub fn assemble(
    user_query: &str,
    advice: &str,
    refined: RefinedQuery,
    products: Vec<Product>,
    outfits: Vec<GeneratedOutfit>,
    created_at: DateTime<Utc>,
) -> OutfitResponse {
    let outcome = outcome_for(&products, &outfits);
    let message = message_for(outcome, &outfits);
    info!("✨ {} ({} products, {} attempts)", message, products.len(), outfits.len());
    OutfitResponse {
        outcome,
        message,
        user_query: user_query.to_string(),
        narrative: render_narrative(advice, &products, &outfits),
        refined,
        products,
        outfits,
        created_at,
    }
}
