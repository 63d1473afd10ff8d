//! Insight generation over retrieved campaign records.

use crate::campaign::CampaignRecord;
use crate::error::PipelineError;
use crate::llm::{LlmClient, Message};

const INSIGHT_SYSTEM_PROMPT: &str = r#"You are a helpful AI assistant that can analyze data and answer various types of questions.

IMPORTANT: Focus on answering the user's actual question, not just providing campaign insights.

- Ground every statement about campaigns in the campaign data provided with the question. Do not invent campaigns or numbers.
- If the user asks about the conversation history or previous prompts, answer that directly.
- If the user asks about the data you received, analyze and explain it.
- If the user asks for insights about campaigns, provide marketing analysis.
- If the user asks general questions, answer them appropriately.
- Always respond to what the user is actually asking, not what you think they should be asking."#;

/// Answer `utterance` from the retrieved `records`.
pub async fn summarize(
    llm: &dyn LlmClient,
    records: &[CampaignRecord],
    utterance: &str,
) -> Result<String, PipelineError> {
    let data = serde_json::to_string(records)
        .map_err(|e| PipelineError::Summarization(format!("cannot serialize records: {e}")))?;
    let messages = [Message::user(format!(
        "User question: {utterance}\n\nCampaign data: {data}"
    ))];

    let completion = llm
        .complete(INSIGHT_SYSTEM_PROMPT, &messages)
        .await
        .map_err(|e| PipelineError::Summarization(e.to_string()))?;
    Ok(completion.text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmError, MockLlmClient};

    fn record() -> CampaignRecord {
        CampaignRecord {
            campaign_id: "001".into(),
            name: "Campaign_1".into(),
            channel: "Google".into(),
            region: "South Asia".into(),
            objective: "Video Views".into(),
            status: "Active".into(),
            date: "2025-06-25".into(),
            spend: 919.97,
            impressions: 36795,
            clicks: 1806,
            ctr: 4.91,
            conversions: 301,
        }
    }

    #[tokio::test]
    async fn test_summarize_sends_question_and_data() {
        let mock = MockLlmClient::new(vec!["Campaign_1 leads with 1806 clicks.".into()]);
        let answer = summarize(&mock, &[record()], "Which campaign has the most clicks?")
            .await
            .unwrap();

        assert_eq!(answer, "Campaign_1 leads with 1806 clicks.");
        let sent = &mock.messages_of(0)[0].content;
        assert!(sent.starts_with("User question: Which campaign has the most clicks?"));
        assert!(sent.contains("\"clicks\":1806"));
        assert!(mock.system_of(0).contains("actual question"));
    }

    #[tokio::test]
    async fn test_summarize_model_failure() {
        let mock = MockLlmClient::with_results(vec![Err(LlmError::Status {
            status: 500,
            body: "overloaded".into(),
        })]);
        let err = summarize(&mock, &[record()], "why?").await.unwrap_err();
        assert!(matches!(err, PipelineError::Summarization(ref msg) if msg.contains("500")));
    }
}
