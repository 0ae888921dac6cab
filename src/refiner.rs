use std::{sync::Arc, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

use crate::{
    models::{RefinedQuery, StageStatus},
    services::{bounded, TextCompletion},
};

const REFINE_INSTRUCTION: &str = "You turn outfit requests into Google Shopping searches. \
Extract the shopping-relevant terms: garment type, color, material, season, and the gender or style \
if implied. Reply with only a JSON object of the form \
{\"search_query\": \"...\", \"clothing_type\": \"...\", \"style\": \"...\", \"gender\": \"...\"}. \
Use null for attributes that cannot be inferred. Keep search_query under 12 words.";

#[derive(Debug, Deserialize)]
struct RefinementReply {
    #[serde(default)]
    search_query: Option<String>,
    #[serde(default)]
    clothing_type: Option<String>,
    #[serde(default)]
    style: Option<String>,
    #[serde(default)]
    gender: Option<String>,
}

/// Rewrites the user's request into a search query. Never fails: any problem
/// with the completion call degrades to the raw prompt.
pub struct QueryRefiner {
    completion: Arc<dyn TextCompletion>,
    timeout: Duration,
}

impl QueryRefiner {
    pub fn new(completion: Arc<dyn TextCompletion>, timeout: Duration) -> Self {
        Self { completion, timeout }
    }

    pub async fn refine(&self, prompt: &str) -> RefinedQuery {
        let reply = match bounded(self.timeout, self.completion.complete(REFINE_INSTRUCTION, prompt)).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("⚠️ Query refinement failed, using raw prompt: {}", e);
                return RefinedQuery::raw(prompt, format!("refinement failed: {e}"));
            }
        };

        match parse_reply(&reply) {
            Some(refined) => {
                info!("   Parsed query: {}", refined.query);
                refined
            }
            None => {
                warn!("⚠️ Query refinement returned nothing usable, using raw prompt");
                RefinedQuery::raw(prompt, "refinement reply was empty or malformed")
            }
        }
    }
}

fn parse_reply(reply: &str) -> Option<RefinedQuery> {
    let reply = reply.trim();
    if let Some(object) = json_object(reply) {
        let parsed = serde_json::from_str::<RefinementReply>(object).ok()?;
        let query = parsed.search_query.as_deref().map(clean_line).unwrap_or_default();
        if query.is_empty() {
            return None;
        }
        return Some(RefinedQuery {
            query,
            clothing_type: attribute(parsed.clothing_type),
            style: attribute(parsed.style),
            gender: attribute(parsed.gender),
            status: StageStatus::Ok,
        });
    }

    // Without a JSON object only a single bare line is trusted as a query.
    if reply.lines().count() != 1 || reply.contains(['{', '}']) || reply.contains("```") {
        return None;
    }
    let query = clean_line(reply);
    if query.is_empty() {
        return None;
    }
    Some(RefinedQuery { query, clothing_type: None, style: None, gender: None, status: StageStatus::Ok })
}

/// The outermost `{ ... }` span of the reply, wherever it sits (fenced, after a preamble, or bare).
fn json_object(reply: &str) -> Option<&str> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    (end > start).then(|| &reply[start..=end])
}

fn clean_line(line: &str) -> String {
    line.trim().trim_matches(|c| c == '"' || c == '\'' || c == '`').trim().to_string()
}

fn attribute(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("null") && !v.eq_ignore_ascii_case("unknown"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{services::ServiceError, testing::FakeCompletion};
    use pretty_assertions::assert_eq;

    fn refiner(fake: FakeCompletion) -> QueryRefiner {
        QueryRefiner::new(Arc::new(fake), Duration::from_millis(200))
    }

    #[tokio::test]
    async fn json_reply_fills_attributes() {
        let fake = FakeCompletion::replying(
            "```json\n{\"search_query\": \"men's red flannel shirt fall\", \"clothing_type\": \"shirt\", \"style\": \"casual\", \"gender\": null}\n```",
        );
        let refined = refiner(fake).refine("red flannel fall look").await;
        assert_eq!(
            refined,
            RefinedQuery {
                query: "men's red flannel shirt fall".into(),
                clothing_type: Some("shirt".into()),
                style: Some("casual".into()),
                gender: None,
                status: StageStatus::Ok,
            }
        );
    }

    #[tokio::test]
    async fn fenced_json_after_a_preamble_is_found() {
        let fake = FakeCompletion::replying(
            "Sure! Here is the JSON:\n```json\n{\"search_query\": \"red flannel shirt\", \"style\": \"unknown\"}\n```\nEnjoy!",
        );
        let refined = refiner(fake).refine("red flannel fall look").await;
        assert_eq!(refined.query, "red flannel shirt");
        assert_eq!(refined.style, None);
        assert_eq!(refined.status, StageStatus::Ok);
    }

    #[tokio::test]
    async fn prose_and_broken_json_fall_back_to_raw_prompt() {
        let prose = refiner(FakeCompletion::replying("Sure! Let me think.\nred flannel shirt")).refine("flannel").await;
        assert_eq!(prose.query, "flannel");
        assert!(prose.status.is_degraded());

        let broken = refiner(FakeCompletion::replying("Here: {\"search_query\": \"red\"")).refine("flannel").await;
        assert_eq!(broken.query, "flannel");
        assert!(broken.status.is_degraded());

        let unclosed = refiner(FakeCompletion::replying("{search_query: red flannel}")).refine("flannel").await;
        assert!(unclosed.status.is_degraded());
    }

    #[tokio::test]
    async fn plain_text_reply_is_used_as_query() {
        let refined = refiner(FakeCompletion::replying("\n\"red flannel shirt women\"\n")).refine("flannel").await;
        assert_eq!(refined.query, "red flannel shirt women");
        assert_eq!(refined.status, StageStatus::Ok);
    }

    #[tokio::test]
    async fn failures_fall_back_to_raw_prompt() {
        let failing = FakeCompletion::failing(ServiceError::Status { status: 429, body: "quota".into() });
        let refined = refiner(failing).refine("  black jeans  ").await;
        assert_eq!(refined.query, "black jeans");
        assert!(refined.status.is_degraded());

        let empty = refiner(FakeCompletion::replying("   ")).refine("black jeans").await;
        assert_eq!(empty.query, "black jeans");
        assert!(empty.status.is_degraded());

        let blank_json = refiner(FakeCompletion::replying("{\"search_query\": \"\"}")).refine("black jeans").await;
        assert_eq!(blank_json.query, "black jeans");
    }

    #[tokio::test]
    async fn slow_completion_times_out_to_raw_prompt() {
        let slow = FakeCompletion::replying("never used").with_delay(Duration::from_secs(5));
        let refined = refiner(slow).refine("winter coat").await;
        assert_eq!(refined.query, "winter coat");
        assert!(matches!(refined.status, StageStatus::Degraded(ref r) if r.contains("timed out")));
    }
}
