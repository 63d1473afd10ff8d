//! Direct conversational answers when no campaign data is needed.

use crate::error::PipelineError;
use crate::llm::{LlmClient, Message};
use crate::session::Turn;

const PERSONA_PROMPT: &str = "You are a helpful ecommerce assistant and analyst named AigentZ.";

/// Answer `utterance` with the earlier turns as context.
pub async fn respond(
    llm: &dyn LlmClient,
    utterance: &str,
    prior_turns: &[Turn],
) -> Result<String, PipelineError> {
    let mut messages = prior_turns.to_vec();
    messages.push(Message::user(utterance));

    let completion = llm
        .complete(PERSONA_PROMPT, &messages)
        .await
        .map_err(|e| PipelineError::Response(e.to_string()))?;
    Ok(completion.text)
}
