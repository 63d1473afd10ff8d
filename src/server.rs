use std::sync::Arc;

use rmcp::handler::server::{router::tool::ToolRouter, wrapper::Parameters};
use rmcp::model::{CallToolResult, Content, ServerCapabilities, ServerInfo};
use rmcp::{ErrorData, ServerHandler, tool, tool_handler, tool_router};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::warn;

use crate::campaign::FilterExpression;
use crate::clamp_limit;
use crate::error::PipelineError;
use crate::pipeline::Assistant;
use crate::session::Session;

// ---------------------------------------------------------------------------
// Parameter structs
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, rmcp::schemars::JsonSchema)]
pub struct ChatParams {
    #[schemars(description = "The user's message, e.g. 'Show all active Google campaigns in South Asia'")]
    pub prompt: String,
    #[schemars(description = "Maximum number of campaign records to retrieve (1-100)")]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, rmcp::schemars::JsonSchema)]
pub struct RecordsParams {
    #[schemars(
        description = "MongoDB-style JSON filter, e.g. {\"clicks\": {\"$gt\": 1000}}. Omit to match all campaigns."
    )]
    pub filter: Option<String>,
    #[schemars(description = "Maximum number of records (1-100)")]
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize, rmcp::schemars::JsonSchema)]
pub struct EmptyParams {}

// ---------------------------------------------------------------------------
// MCP Server
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AssistantServer {
    assistant: Assistant,
    session: Arc<Mutex<Session>>,
    default_limit: usize,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl AssistantServer {
    pub fn new(assistant: Assistant, default_limit: usize) -> Self {
        Self {
            assistant,
            session: Arc::new(Mutex::new(Session::new())),
            default_limit: clamp_limit(default_limit),
            tool_router: Self::tool_router(),
        }
    }

    #[tool(
        description = "Send a message to the campaign assistant. It decides whether campaign data is needed, queries the campaigns collection if so, and replies. The exchange is added to the conversation history."
    )]
    async fn chat(&self, Parameters(p): Parameters<ChatParams>) -> Result<CallToolResult, ErrorData> {
        let limit = clamp_limit(p.limit.unwrap_or(self.default_limit));

        // The lock is not held across model and store calls.
        let prior = self.session.lock().await.snapshot();
        let outcome = self
            .assistant
            .handle_turn(&prior, &p.prompt, limit)
            .await
            .map_err(tool_error)?;

        let reply = outcome.render();
        self.session
            .lock()
            .await
            .record_exchange(p.prompt.trim(), reply.clone());

        Ok(CallToolResult::success(vec![Content::text(reply)]))
    }

    #[tool(description = "Show the conversation history as a JSON array of {role, content} turns.")]
    async fn history(
        &self,
        Parameters(_): Parameters<EmptyParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let turns = self.session.lock().await.snapshot();
        let json = serde_json::to_string_pretty(&turns)
            .map_err(|e| ErrorData::internal_error(format!("Serialize error: {e}"), None))?;
        Ok(CallToolResult::success(vec![Content::text(json)]))
    }

    #[tool(description = "Clear the conversation history.")]
    async fn reset(
        &self,
        Parameters(_): Parameters<EmptyParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let dropped = self.session.lock().await.reset();
        Ok(CallToolResult::success(vec![Content::text(format!(
            "Cleared {dropped} turns."
        ))]))
    }

    #[tool(
        description = "Retrieve raw campaign records with an explicit filter, bypassing the language model."
    )]
    async fn records(
        &self,
        Parameters(p): Parameters<RecordsParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let filter: FilterExpression = match p.filter.as_deref().map(str::trim) {
            None | Some("") => FilterExpression::new(),
            Some(raw) => serde_json::from_str(raw).map_err(|e| {
                ErrorData::invalid_params(format!("'filter' must be a JSON object: {e}"), None)
            })?,
        };
        let limit = clamp_limit(p.limit.unwrap_or(self.default_limit));

        let records = self
            .assistant
            .backend()
            .retrieve(&filter, limit)
            .await
            .map_err(tool_error)?;

        let json = serde_json::to_string_pretty(&records)
            .map_err(|e| ErrorData::internal_error(format!("Serialize error: {e}"), None))?;
        Ok(CallToolResult::success(vec![Content::text(json)]))
    }
}

fn tool_error(err: PipelineError) -> ErrorData {
    match err {
        PipelineError::InvalidInput(msg) => ErrorData::invalid_params(msg, None),
        other => {
            warn!(error = %other, "turn failed");
            ErrorData::internal_error(other.to_string(), None)
        }
    }
}

#[tool_handler]
impl ServerHandler for AssistantServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "AigentZ marketing campaign assistant. Use 'chat' to ask questions in natural \
                 language (campaign questions are answered from the campaigns database), \
                 'history' to view the conversation, 'reset' to clear it, and 'records' to \
                 fetch raw campaign records with an explicit filter."
                    .to_string(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}
