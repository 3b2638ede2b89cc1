use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use verdant_api::app::{router_with_services, services::build_services};
use verdant_infra::config::{AppConfig, DEV_JWT_SECRET};

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("invalid configuration")?;
    verdant_observability::init(config.log_format);

    if config.jwt_secret == DEV_JWT_SECRET {
        warn!("JWT_SECRET not set; using insecure dev default");
    }

    let services = Arc::new(
        build_services(&config)
            .await
            .context("failed to wire services")?,
    );
    let app = router_with_services(services.clone(), config.jwt_secret.as_bytes());

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    info!(addr = %listener.local_addr()?, "listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    services.shutdown();
    served.context("server error")?;

    info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
