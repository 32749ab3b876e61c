use std::sync::Arc;

use anyhow::Context;
use saathi_relay::{routes, RelayConfig, State};
use saathi_store::Store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = RelayConfig::from_env()?;
    let store = Store::open(&config.db_path)
        .with_context(|| format!("opening {}", config.db_path.display()))?;

    let state = State::with_store(Arc::new(store), &config);
    let sweep = state.engine.spawn_sweep(config.sweep_interval);

    let (addr, server) = warp::serve(routes(state))
        .try_bind_with_graceful_shutdown(config.listen, async {
            let _ = tokio::signal::ctrl_c().await;
            log::info!("shutting down");
        })
        .with_context(|| format!("binding {}", config.listen))?;
    log::info!(
        "saathi-relay listening on {addr} (sweep every {:?})",
        config.sweep_interval
    );

    server.await;
    sweep.shutdown();
    Ok(())
}
