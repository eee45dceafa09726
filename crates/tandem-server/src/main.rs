use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;

use tandem_db::Database;
use tandem_server::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tandem=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;
    info!("Starting with {:?}", config);

    let db = Database::open(&config.db_path)?;
    let gateway = tandem_server::build_gateway(&config, Arc::new(db));
    let app = tandem_server::router(gateway);

    let addr: SocketAddr = config.bind_address().parse()?;
    info!("Tandem gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
