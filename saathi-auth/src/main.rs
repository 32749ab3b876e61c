use std::sync::Arc;

use anyhow::Context;
use saathi_auth::{serve, ApiConfig, AppState};
use saathi_store::Store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = ApiConfig::from_env()?;
    let store = Store::open(&config.db_path)
        .with_context(|| format!("opening {}", config.db_path.display()))?;

    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("binding {}", config.listen))?;
    log::info!("saathi-auth listening on {}", config.listen);

    let state = AppState::new(Arc::new(store), config);
    serve(listener, state, async {
        let _ = tokio::signal::ctrl_c().await;
        log::info!("shutting down");
    })
    .await
}
