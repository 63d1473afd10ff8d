//! Turn orchestration.
//!
//! ```text
//! classify ─┬─ no query ──> respond
//!           └─ query ─────> synthesize ─> retrieve ─┬─ empty ─> "No matching campaigns found."
//!                                                    └─ rows ──> summarize
//! ```
//!
//! Every step awaits the previous one. History is read from a snapshot and
//! only written once the whole turn has succeeded.

use std::fmt::Write as _;
use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use crate::backend::CampaignBackend;
use crate::campaign::{CampaignRecord, FilterExpression};
use crate::error::PipelineError;
use crate::intent::IntentDecision;
use crate::llm::LlmClient;
use crate::session::{Session, Turn};
use crate::{direct, insight, intent, query};

/// Reply used when a query matches nothing.
pub const NO_RESULTS_MESSAGE: &str = "No matching campaigns found.";

/// What a successful turn produced.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// Answered without touching the store.
    Direct {
        decision: IntentDecision,
        reply: String,
    },
    /// Queried the store and found nothing; the summarizer was not called.
    NoResults {
        decision: IntentDecision,
        filter: FilterExpression,
    },
    /// Queried the store and summarized the records.
    Insight {
        decision: IntentDecision,
        filter: FilterExpression,
        records: Vec<CampaignRecord>,
        insights: String,
    },
}

impl TurnOutcome {
    pub fn decision(&self) -> &IntentDecision {
        match self {
            Self::Direct { decision, .. }
            | Self::NoResults { decision, .. }
            | Self::Insight { decision, .. } => decision,
        }
    }

    /// The filter used, if the store was queried.
    pub fn filter(&self) -> Option<&FilterExpression> {
        match self {
            Self::Direct { .. } => None,
            Self::NoResults { filter, .. } | Self::Insight { filter, .. } => Some(filter),
        }
    }

    pub fn records(&self) -> &[CampaignRecord] {
        match self {
            Self::Insight { records, .. } => records,
            _ => &[],
        }
    }

    /// The assistant turn text stored in history and shown to the user.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Decision: {}", self.decision().reason);

        match self {
            Self::Direct { reply, .. } => {
                let _ = write!(out, "Response: {reply}");
            }
            Self::NoResults { filter, .. } => {
                let _ = writeln!(out, "Query: {}", Value::Object(filter.clone()));
                out.push_str(NO_RESULTS_MESSAGE);
            }
            Self::Insight {
                filter,
                records,
                insights,
                ..
            } => {
                let _ = writeln!(out, "Query: {}", Value::Object(filter.clone()));
                let rows = serde_json::to_string(records).unwrap_or_default();
                let _ = writeln!(out, "Results ({}):\n{rows}", records.len());
                let _ = write!(out, "Insights: {insights}");
            }
        }
        out
    }
}

/// The classify → (respond | synthesize → retrieve → summarize) pipeline.
#[derive(Clone)]
pub struct Assistant {
    llm: Arc<dyn LlmClient>,
    backend: CampaignBackend,
}

impl Assistant {
    pub fn new(llm: Arc<dyn LlmClient>, backend: CampaignBackend) -> Self {
        Self { llm, backend }
    }

    pub fn backend(&self) -> &CampaignBackend {
        &self.backend
    }

    /// Run one turn against a read-only view of the earlier turns.
    pub async fn handle_turn(
        &self,
        prior_turns: &[Turn],
        utterance: &str,
        limit: usize,
    ) -> Result<TurnOutcome, PipelineError> {
        let utterance = utterance.trim();
        if utterance.is_empty() {
            return Err(PipelineError::InvalidInput("utterance is empty".into()));
        }

        let llm = self.llm.as_ref();
        let decision = intent::classify(llm, utterance, prior_turns).await?;

        if !decision.query_needed {
            let reply = direct::respond(llm, utterance, prior_turns).await?;
            return Ok(TurnOutcome::Direct { decision, reply });
        }

        let filter = query::synthesize(llm, utterance).await;
        let records = self.backend.retrieve(&filter, limit).await?;

        if records.is_empty() {
            info!("query matched no campaigns");
            return Ok(TurnOutcome::NoResults { decision, filter });
        }

        let insights = insight::summarize(llm, &records, utterance).await?;
        Ok(TurnOutcome::Insight {
            decision,
            filter,
            records,
            insights,
        })
    }

    /// Run a turn and, only if it succeeds, append the user utterance and the
    /// rendered reply to `session`.
    pub async fn chat(
        &self,
        session: &mut Session,
        utterance: &str,
        limit: usize,
    ) -> Result<TurnOutcome, PipelineError> {
        let prior = session.snapshot();
        let outcome = self.handle_turn(&prior, utterance, limit).await?;
        session.record_exchange(utterance.trim(), outcome.render());
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmError, MockLlmClient, Role};
    use serde_json::json;

    const NOT_NEEDED: &str = r#"{"query_needed": false, "reason": "The user is greeting."}"#;
    const NEEDED: &str = r#"{"query_needed": true, "reason": "The user asks about campaigns."}"#;

    fn campaign(id: u32, channel: &str, region: &str, status: &str, clicks: i64) -> Value {
        json!({
            "_id": format!("oid-{id}"),
            "campaign_id": format!("{id:03}"),
            "name": format!("Campaign_{id}"),
            "channel": channel,
            "region": region,
            "objective": "Video Views",
            "status": status,
            "date": "2025-06-25",
            "spend": 500.0,
            "impressions": 20000,
            "clicks": clicks,
            "ctr": 3.2,
            "conversions": 120
        })
    }

    fn backend() -> CampaignBackend {
        CampaignBackend::from_documents(vec![
            campaign(1, "Google", "South Asia", "Active", 1806),
            campaign(2, "Meta", "South Asia", "Active", 640),
            campaign(3, "Google", "Europe", "Active", 2210),
            campaign(4, "Google", "South Asia", "Paused", 90),
            campaign(5, "Google", "South Asia", "Active", 1200),
        ])
        .unwrap()
    }

    fn assistant(mock: Arc<MockLlmClient>) -> Assistant {
        Assistant::new(mock, backend())
    }

    fn script(responses: &[&str]) -> Arc<MockLlmClient> {
        Arc::new(MockLlmClient::new(
            responses.iter().map(|r| r.to_string()).collect(),
        ))
    }

    #[tokio::test]
    async fn test_greeting_takes_direct_path() {
        let mock = script(&[NOT_NEEDED, "Hi! I'm AigentZ, your ecommerce analyst."]);
        let outcome = assistant(mock.clone())
            .handle_turn(&[], "hi", 5)
            .await
            .unwrap();

        match &outcome {
            TurnOutcome::Direct { decision, reply } => {
                assert!(!decision.query_needed);
                assert!(reply.contains("AigentZ"));
            }
            other => panic!("expected direct outcome, got {other:?}"),
        }
        // classify + respond, no synthesis or summarization.
        assert_eq!(mock.call_count(), 2);
        assert!(outcome.filter().is_none());
    }

    #[tokio::test]
    async fn test_three_field_query_returns_matching_records() {
        let mock = script(&[
            NEEDED,
            r#"{"status": "Active", "channel": "Google", "region": "South Asia"}"#,
            "Two active Google campaigns in South Asia.",
        ]);
        let outcome = assistant(mock.clone())
            .handle_turn(&[], "Show all active Google campaigns in South Asia", 10)
            .await
            .unwrap();

        let records = outcome.records();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| {
            r.status == "Active" && r.channel == "Google" && r.region == "South Asia"
        }));
        assert!(matches!(outcome, TurnOutcome::Insight { ref insights, .. } if insights.starts_with("Two active")));
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn test_click_threshold_query() {
        let mock = script(&[NEEDED, r#"{"clicks": {"$gt": 1000}}"#, "Three campaigns."]);
        let outcome = assistant(mock)
            .handle_turn(&[], "campaigns with more than 1000 clicks", 100)
            .await
            .unwrap();

        assert_eq!(outcome.filter(), Some(&json!({"clicks": {"$gt": 1000}}).as_object().unwrap().clone()));
        assert_eq!(outcome.records().len(), 3);
        assert!(outcome.records().iter().all(|r| r.clicks > 1000));
    }

    #[tokio::test]
    async fn test_fallback_filter_on_unparseable_synthesis() {
        let mock = script(&[NEEDED, "channel = Google", "Google is doing well."]);
        let outcome = assistant(mock)
            .handle_turn(&[], "show google campaigns", 100)
            .await
            .unwrap();

        assert_eq!(
            outcome.filter(),
            Some(&json!({"channel": "Google"}).as_object().unwrap().clone())
        );
        assert!(outcome.records().iter().all(|r| r.channel == "Google"));
    }

    #[tokio::test]
    async fn test_limit_caps_records_sent_to_summarizer() {
        let mock = script(&[NEEDED, "{}", "One campaign shown."]);
        let outcome = assistant(mock.clone())
            .handle_turn(&[], "how are campaigns going?", 1)
            .await
            .unwrap();

        assert_eq!(outcome.records().len(), 1);
        let sent = &mock.messages_of(2)[0].content;
        assert!(sent.contains("Campaign_1"));
        assert!(!sent.contains("Campaign_2"));
    }

    #[tokio::test]
    async fn test_zero_records_skips_summarizer() {
        let mock = script(&[NEEDED, r#"{"channel": "Pinterest"}"#]);
        let outcome = assistant(mock.clone())
            .handle_turn(&[], "pinterest campaigns", 5)
            .await
            .unwrap();

        assert!(matches!(outcome, TurnOutcome::NoResults { .. }));
        assert_eq!(mock.call_count(), 2);
        assert!(outcome.render().ends_with(NO_RESULTS_MESSAGE));
    }

    #[tokio::test]
    async fn test_blank_utterance_rejected_before_model_call() {
        let mock = script(&[]);
        let err = assistant(mock.clone())
            .handle_turn(&[], "   ", 5)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn test_retrieval_error_is_fatal() {
        let mock = script(&[NEEDED, r#"{"name": {"$regex": "Camp"}}"#]);
        let err = assistant(mock.clone())
            .handle_turn(&[], "campaigns named like Camp", 5)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Retrieval(_)));
        assert_eq!(mock.call_count(), 2);
    }

    // --- chat / session bookkeeping ---

    #[tokio::test]
    async fn test_chat_appends_exchange_on_success() {
        let mock = script(&[NOT_NEEDED, "Hello there!"]);
        let assistant = assistant(mock);
        let mut session = Session::new();

        assistant.chat(&mut session, "  hi  ", 5).await.unwrap();

        let history = session.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0], Turn::user("hi"));
        assert_eq!(history[1].role, Role::Assistant);
        assert!(history[1].content.contains("Hello there!"));
        assert!(history[1].content.starts_with("Decision: The user is greeting."));
    }

    #[tokio::test]
    async fn test_chat_passes_prior_turns_to_classifier() {
        let mock = script(&[NOT_NEEDED, "Hello!", NOT_NEEDED, "You said hi."]);
        let assistant = assistant(mock.clone());
        let mut session = Session::new();

        assistant.chat(&mut session, "hi", 5).await.unwrap();
        assistant.chat(&mut session, "what did I say?", 5).await.unwrap();

        let classify_messages = mock.messages_of(2);
        assert_eq!(classify_messages.len(), 3);
        assert_eq!(classify_messages[0], Turn::user("hi"));
        assert!(classify_messages[2].content.starts_with("what did I say?"));
        assert_eq!(session.len(), 4);
    }

    #[tokio::test]
    async fn test_failed_turn_leaves_history_untouched() {
        let mock = Arc::new(MockLlmClient::with_results(vec![
            Ok(NOT_NEEDED.into()),
            Ok("Hello!".into()),
            Ok(NOT_NEEDED.into()),
            Err(LlmError::Http("connection reset".into())),
            Ok(NOT_NEEDED.into()),
            Ok("Still here.".into()),
        ]));
        let assistant = assistant(mock);
        let mut session = Session::new();

        assistant.chat(&mut session, "hi", 5).await.unwrap();
        let before = session.snapshot();

        let err = assistant.chat(&mut session, "hello again", 5).await.unwrap_err();
        assert!(matches!(err, PipelineError::Response(_)));
        assert_eq!(session.history(), before.as_slice());

        // Session stays usable.
        assistant.chat(&mut session, "are you there?", 5).await.unwrap();
        assert_eq!(session.len(), 4);
    }

    #[tokio::test]
    async fn test_classification_parse_failure_surfaces() {
        let mock = script(&["maybe?", "definitely maybe"]);
        let assistant = assistant(mock.clone());
        let mut session = Session::new();

        let err = assistant.chat(&mut session, "hm", 5).await.unwrap_err();
        assert!(matches!(err, PipelineError::ClassificationParse(_)));
        assert!(session.is_empty());
        assert_eq!(mock.call_count(), 2);
    }

    // --- render ---

    #[test]
    fn test_render_insight() {
        let outcome = TurnOutcome::Insight {
            decision: IntentDecision {
                query_needed: true,
                reason: "Asks about clicks.".into(),
            },
            filter: json!({"clicks": {"$gt": 1000}}).as_object().unwrap().clone(),
            records: vec![],
            insights: "Strong engagement.".into(),
        };
        let text = outcome.render();
        assert!(text.starts_with("Decision: Asks about clicks.\n"));
        assert!(text.contains(r#"Query: {"clicks":{"$gt":1000}}"#));
        assert!(text.contains("Results (0):"));
        assert!(text.ends_with("Insights: Strong engagement."));
    }

    #[tokio::test]
    async fn test_render_keeps_records_compact() {
        let filter = json!({"channel": "Google"}).as_object().unwrap().clone();
        let records = backend().retrieve(&filter, 100).await.unwrap();
        let outcome = TurnOutcome::Insight {
            decision: IntentDecision {
                query_needed: true,
                reason: "Asks about Google.".into(),
            },
            filter,
            records,
            insights: "Google leads on clicks.".into(),
        };

        let text = outcome.render();
        // Decision, query, results header, one row of records, insights.
        assert_eq!(text.lines().count(), 5);
        assert!(text.contains(r#"Results (4):
[{"campaign_id":"001","#));
    }

    #[test]
    fn test_render_direct() {
        let outcome = TurnOutcome::Direct {
            decision: IntentDecision {
                query_needed: false,
                reason: "Greeting.".into(),
            },
            reply: "Hi!".into(),
        };
        assert_eq!(outcome.render(), "Decision: Greeting.\nResponse: Hi!");
    }
}
