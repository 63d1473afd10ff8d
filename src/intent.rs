//! Intent classification: does this utterance need a campaign query?

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::PipelineError;
use crate::llm::{LlmClient, Message, extract_json_object, strip_markdown_fences};
use crate::session::Turn;

/// Model calls made before an unparseable decision becomes a turn error.
const CLASSIFY_ATTEMPTS: usize = 2;

/// Whether a data query is required for the current utterance, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentDecision {
    /// True if a database query is needed.
    pub query_needed: bool,
    /// Explanation of why a query is or isn't needed.
    pub reason: String,
}

const CLASSIFY_SYSTEM_PROMPT: &str = r#"You are an assistant that decides if a user prompt needs a database query against a marketing campaigns database.

Each campaign has: campaign_id, name, channel, region, objective, status, date, spend, impressions, clicks, ctr, conversions.

Rules:
- Greetings and small talk (e.g. "hi", "thanks") do NOT need a query.
- Questions about this conversation itself (e.g. "what did I ask before?", "summarize our chat") do NOT need a query.
- General requests that can be answered without campaign data do NOT need a query.
- Questions about campaigns, marketing performance, spend, clicks, conversions, channels, regions or other business data DO need a query.
- Decide based on the CURRENT user message. Earlier messages are context only; do not repeat an earlier decision just because the topic was discussed before."#;

const FORMAT_INSTRUCTIONS: &str = r#"Respond with ONLY a JSON object (no markdown, no explanation) matching this structure:
{"query_needed": true or false, "reason": "one sentence explaining why a query is or isn't needed"}"#;

/// Build the classifier's message list: prior turns verbatim, then the
/// current utterance with the output format appended.
pub fn build_messages(utterance: &str, prior_turns: &[Turn]) -> Vec<Message> {
    let mut messages = prior_turns.to_vec();
    messages.push(Message::user(format!(
        "{utterance}\n\n{FORMAT_INSTRUCTIONS}"
    )));
    messages
}

/// Parse model output into an [`IntentDecision`], tolerating code fences and
/// surrounding prose.
pub fn parse_decision(text: &str) -> Result<IntentDecision, String> {
    let candidate = extract_json_object(text).unwrap_or_else(|| strip_markdown_fences(text));
    serde_json::from_str(&candidate).map_err(|e| format!("{e}; response was: {}", text.trim()))
}

/// Classify `utterance` given the session's earlier turns.
///
/// An unparseable answer is retried once; a second failure is returned as
/// [`PipelineError::ClassificationParse`].
pub async fn classify(
    llm: &dyn LlmClient,
    utterance: &str,
    prior_turns: &[Turn],
) -> Result<IntentDecision, PipelineError> {
    let messages = build_messages(utterance, prior_turns);
    let mut last_error = String::new();

    for attempt in 1..=CLASSIFY_ATTEMPTS {
        let completion = llm.complete(CLASSIFY_SYSTEM_PROMPT, &messages).await?;
        match parse_decision(&completion.text) {
            Ok(decision) => {
                info!(
                    query_needed = decision.query_needed,
                    reason = %decision.reason,
                    "classified utterance"
                );
                return Ok(decision);
            }
            Err(e) => {
                warn!(attempt, error = %e, "unparseable intent decision");
                last_error = e;
            }
        }
    }

    Err(PipelineError::ClassificationParse(last_error))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmError, MockLlmClient, Role};

    #[test]
    fn test_parse_clean_decision() {
        let d = parse_decision(r#"{"query_needed": false, "reason": "greeting"}"#).unwrap();
        assert!(!d.query_needed);
        assert_eq!(d.reason, "greeting");
    }

    #[test]
    fn test_parse_fenced_decision_with_prose() {
        let text = "Sure!\n```json\n{\"query_needed\": true, \"reason\": \"asks about spend\"}\n```";
        let d = parse_decision(text).unwrap();
        assert!(d.query_needed);
    }

    #[test]
    fn test_parse_rejects_missing_field() {
        assert!(parse_decision(r#"{"query_needed": true}"#).is_err());
        assert!(parse_decision("yes, query it").is_err());
    }

    #[test]
    fn test_messages_carry_history_then_utterance() {
        let prior = vec![Turn::user("hi"), Turn::assistant("Hello!")];
        let messages = build_messages("show google campaigns", &prior);

        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0], Turn::user("hi"));
        assert_eq!(messages[1], Turn::assistant("Hello!"));
        assert_eq!(messages[2].role, Role::User);
        assert!(messages[2].content.starts_with("show google campaigns"));
        assert!(messages[2].content.contains("query_needed"));
    }

    #[test]
    fn test_user_braces_pass_through_unchanged() {
        let messages = build_messages("what does {\"a\": 1} mean?", &[]);
        assert!(messages[0].content.starts_with("what does {\"a\": 1} mean?"));
    }

    #[tokio::test]
    async fn test_classify_greeting() {
        let mock = MockLlmClient::new(vec![
            r#"{"query_needed": false, "reason": "The user is greeting."}"#.into(),
        ]);
        let d = classify(&mock, "hi", &[]).await.unwrap();
        assert!(!d.query_needed);
        assert_eq!(mock.call_count(), 1);
        assert!(mock.system_of(0).contains("Greetings"));
    }

    #[tokio::test]
    async fn test_classify_retries_once_on_garbage() {
        let mock = MockLlmClient::new(vec![
            "I think you need a query".into(),
            r#"{"query_needed": true, "reason": "campaign question"}"#.into(),
        ]);
        let d = classify(&mock, "how is google doing?", &[]).await.unwrap();
        assert!(d.query_needed);
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn test_classify_fails_after_second_garbage() {
        let mock = MockLlmClient::new(vec!["nope".into(), "still nope".into()]);
        let err = classify(&mock, "how is google doing?", &[]).await.unwrap_err();
        assert!(matches!(err, PipelineError::ClassificationParse(_)));
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn test_classify_model_failure_is_not_retried_here() {
        let mock = MockLlmClient::with_results(vec![Err(LlmError::EmptyResponse)]);
        let err = classify(&mock, "hi", &[]).await.unwrap_err();
        assert!(matches!(err, PipelineError::Llm(LlmError::EmptyResponse)));
        assert_eq!(mock.call_count(), 1);
    }
}
