use deployq_server::config::Settings;
use deployq_server::shutdown::install_shutdown_handler;
use deployq_server::Server;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str =
    "info,deployq=debug,deployq_async=debug,deployq_server=debug,tower_http=debug";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::from_env()?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let server = Server::new(settings).await?;
    server.run(install_shutdown_handler()).await?;

    Ok(())
}
