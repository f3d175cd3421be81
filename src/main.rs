use std::sync::Arc;
use tracing::info;

use dukabot_api::config;
use dukabot_api::events;
use dukabot_api::outbound::{LoggingTransport, MessageTransport};
use dukabot_api::{app_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = config::load_config()?;
    config::init_tracing(config.log_level(), config.log_json);

    info!(
        environment = %config.environment,
        business = %config.business_name,
        "starting dukabot-api"
    );

    let (event_sender, event_rx) = events::channel();
    tokio::spawn(events::process_events(event_rx));

    // TODO: swap in the Graph API transport once the WhatsApp system user
    // token provisioning is settled.
    let transport: Arc<dyn MessageTransport> = Arc::new(LoggingTransport);

    let addr = format!("{}:{}", config.host, config.port);
    let state = Arc::new(AppState::new(
        config,
        Some(Arc::new(event_sender)),
        transport,
    ));
    let app = app_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
