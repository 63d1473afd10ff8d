//! Query synthesis: natural language to a campaign [`FilterExpression`].
//!
//! The model translates the utterance first. Only when that produces no
//! usable object does a fixed keyword scan take over. An empty object from
//! the model is a real answer ("match everything") and is kept as-is.

use serde_json::Value;
use tracing::{info, warn};

use crate::campaign::{FilterExpression, unknown_fields};
use crate::llm::{LlmClient, Message, extract_json_object, strip_markdown_fences};

const SYNTHESIZE_SYSTEM_PROMPT: &str = r#"You are an expert MongoDB query generator for a marketing campaigns database.
Convert the user's question into a MongoDB filter object for the 'campaigns' collection.

Each campaign document looks like:
{
  "campaign_id": "001",
  "name": "Campaign_1",
  "channel": "Google",
  "region": "South Asia",
  "objective": "Video Views",
  "status": "Active",
  "date": "2025-06-25",
  "spend": 919.97,
  "impressions": 36795,
  "clicks": 1806,
  "ctr": 4.91,
  "conversions": 301
}

Instructions:
- Output ONLY a JSON object for the filter, nothing else.
- If the request is vague or general (e.g. "show all campaigns", "how are campaigns going?"), output {}.
- If the user asks for a filter, map it to the correct field(s) in the schema.
- For date ranges, use {"date": {"$gte": "YYYY-MM-DD", "$lte": "YYYY-MM-DD"}}.
- For numeric thresholds, use operators like {"clicks": {"$gt": 1000}}.
- If the user asks for a field that does not exist, output {}.
- Do not include sort, limit, or projection.
- Do not explain or add any text.

Examples:
User question: Show all active Google campaigns in South Asia
Output: {"status": "Active", "channel": "Google", "region": "South Asia"}

User question: Campaigns with more than 1000 clicks
Output: {"clicks": {"$gt": 1000}}

User question: Campaigns between 2025-06-01 and 2025-06-30
Output: {"date": {"$gte": "2025-06-01", "$lte": "2025-06-30"}}

User question: How are campaigns going right now?
Output: {}

User question: Show campaigns with objective "Video Views" and status "Active"
Output: {"objective": "Video Views", "status": "Active"}"#;

/// Parse model output into a filter object.
pub fn parse_filter(text: &str) -> Result<FilterExpression, String> {
    let candidate = extract_json_object(text).unwrap_or_else(|| strip_markdown_fences(text));
    match serde_json::from_str::<Value>(&candidate) {
        Ok(Value::Object(filter)) => Ok(filter),
        Ok(other) => Err(format!("expected a JSON object, got {other}")),
        Err(e) => Err(format!("{e}; response was: {}", text.trim())),
    }
}

/// Ask the model for a filter.
///
/// Returns `None` when the call fails or the answer is not a JSON object.
pub async fn generate_filter(llm: &dyn LlmClient, utterance: &str) -> Option<FilterExpression> {
    let messages = [Message::user(format!("User question: {utterance}"))];

    match llm.complete(SYNTHESIZE_SYSTEM_PROMPT, &messages).await {
        Ok(completion) => match parse_filter(&completion.text) {
            Ok(filter) => Some(filter),
            Err(e) => {
                warn!("Failed to parse generated filter: {e}");
                None
            }
        },
        Err(e) => {
            warn!("Filter generation LLM call failed: {e}");
            None
        }
    }
}

/// Deterministic fallback. Checks run in order and the first hit wins;
/// keywords are never combined.
pub fn keyword_filter(utterance: &str) -> FilterExpression {
    let lowered = utterance.to_lowercase();
    let mut filter = FilterExpression::new();

    if lowered.contains("active") {
        filter.insert("status".into(), Value::from("Active"));
    } else if lowered.contains("google") {
        filter.insert("channel".into(), Value::from("Google"));
    } else if lowered.contains("south asia") {
        filter.insert("region".into(), Value::from("South Asia"));
    }

    filter
}

/// Produce the filter for `utterance`: the model's answer when it has one,
/// the keyword scan otherwise.
pub async fn synthesize(llm: &dyn LlmClient, utterance: &str) -> FilterExpression {
    let filter = match generate_filter(llm, utterance).await {
        Some(filter) => filter,
        None => {
            let filter = keyword_filter(utterance);
            info!("using keyword fallback filter");
            filter
        }
    };

    let unknown = unknown_fields(&filter);
    if !unknown.is_empty() {
        warn!(?unknown, "filter references fields outside the campaign schema");
    }

    let rendered = Value::Object(filter.clone());
    info!(filter = %rendered, "synthesized campaign filter");
    filter
}
