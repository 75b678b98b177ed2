use std::sync::Arc;

use anyhow::Context;

use ecf_api::app::{self, services};
use ecf_infra::config::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::from_env().context("reading configuration")?;
    ecf_observability::init(settings.log_format);

    let services = Arc::new(services::build_services(&settings).await?);
    let background = services::Background::start(&services, &settings)
        .context("starting background jobs")?;

    let router = app::router(services);
    let listener = tokio::net::TcpListener::bind(settings.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", settings.bind_addr))?;

    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("stopping background jobs");
    tokio::task::spawn_blocking(move || background.shutdown())
        .await
        .context("background shutdown panicked")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "ctrl-c handler failed; shutting down");
    }
}
