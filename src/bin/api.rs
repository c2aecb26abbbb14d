use assistant_orchestrator::api::start_server;
use assistant_orchestrator::config::Config;
use assistant_orchestrator::session::Session;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    dotenv::dotenv().ok();

    let config = Config::from_env()?;
    if config.gemini_api_key.is_empty() {
        eprintln!("⚠️  GEMINI_API_KEY not set in .env");
    }

    info!("Assistant Orchestrator - API Server");
    info!("Port: {}", config.api_port);

    let session = Arc::new(Session::new(&config)?);

    info!("Session initialized, starting API server");

    start_server(session, config.api_port).await?;

    Ok(())
}
