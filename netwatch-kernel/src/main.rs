/*!
 * NETWATCH KERNEL - Point d'entrée
 *
 * RÔLE :
 * Démarre le moniteur réseau et son API HTTP.
 *
 * FONCTIONNEMENT :
 * - Ordre : .env, logs, config, store (+ hôtes initiaux), jobs, serveur HTTP
 * - Ctrl-C arrête d'abord le serveur, puis les timers du scheduler
 */

use anyhow::Context;
use netwatch_kernel::config::load_config;
use netwatch_kernel::http::{build_router, AppState};
use netwatch_kernel::monitor::Monitor;
use netwatch_kernel::store::{HostRegistry, JsonStore, StoreError};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env optionnel
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("netwatch_kernel=info")),
        )
        .init();

    let cfg = load_config().await.context("loading configuration")?;

    let store = Arc::new(
        JsonStore::open(&cfg.storage.path, cfg.storage.max_results_per_host)
            .with_context(|| format!("opening store at {}", cfg.storage.path.display()))?,
    );
    for host in &cfg.hosts {
        match store.add_host(host) {
            Ok(()) | Err(StoreError::Conflict(_)) => {}
            Err(e) => warn!(host = %host, error = %e, "seed host ignored"),
        }
    }

    let monitor = Monitor::from_config(store, &cfg).context("building probe/sample commands")?;
    monitor.start(cfg.schedule).context("starting scheduler")?;

    let app_state = AppState::new(monitor.clone()).with_api_key(std::env::var("NETWATCH_API_KEY").ok());
    if app_state.api_key.is_none() {
        warn!("NETWATCH_API_KEY not set, API is open");
    }
    let app = build_router(app_state);

    let listener = TcpListener::bind(&cfg.http.bind)
        .await
        .with_context(|| format!("binding {}", cfg.http.bind))?;
    info!(addr = %cfg.http.bind, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown requested");
            }
        })
        .await
        .context("http server")?;

    monitor.shutdown();
    Ok(())
}
