use rmcp::ServiceExt;
use rmcp::transport::stdio;

use aigentz::config::Settings;
use aigentz::pipeline::Assistant;
use aigentz::server::AssistantServer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let settings = Settings::from_env()?;

    // LLM client is required; fail early if missing.
    let llm = settings.build_llm().map_err(|e| {
        format!("{e}. Set the API key for AIGENTZ_PROVIDER (default: OPENAI_API_KEY).")
    })?;

    let backend = settings.connect_backend().await?;
    let assistant = Assistant::new(llm, backend);

    let server = AssistantServer::new(assistant, settings.result_limit);
    let service = server.serve(stdio()).await?;
    service.waiting().await?;

    Ok(())
}
