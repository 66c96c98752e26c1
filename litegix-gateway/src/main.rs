//! Entry point for the `litegix-gateway` HTTP server.

use std::path::PathBuf;
use std::sync::Arc;

use litegix_core::DriverConfig;
use litegix_driver::LitegixDriver;
use litegix_gateway::routes::create_router;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "/etc/litegix/driver.json";
const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:4646";

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = std::env::var_os("LITEGIX_CONFIG")
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
    let addr = std::env::var("LITEGIX_LISTEN_ADDR")
        .unwrap_or_else(|_| DEFAULT_LISTEN_ADDR.to_owned());

    let config = match DriverConfig::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(path = %config_path.display(), error = %e, "failed to load driver config");
            std::process::exit(1);
        }
    };
    let driver = match LitegixDriver::new(config) {
        Ok(d) => Arc::new(d),
        Err(e) => {
            tracing::error!(error = %e, "invalid driver config");
            std::process::exit(1);
        }
    };

    let app = create_router(Arc::clone(&driver));

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "failed to bind");
            std::process::exit(1);
        }
    };

    info!(addr = %addr, config = %config_path.display(), "litegix-gateway listening");

    let shutdown_driver = Arc::clone(&driver);
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            shutdown_driver.shutdown();
        })
        .await;

    if let Err(e) = served {
        tracing::error!(error = %e, "server error");
        std::process::exit(1);
    }
}
