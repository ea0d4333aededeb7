//! HTTP server lifecycle: spawn the session, serve the gateway, shut down.

use anyhow::{Context, Result};
use handyconf::HandyConfig;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::dispatcher::{Dispatcher, DispatcherSettings};
use crate::gateway::{self, GatewayState};
use crate::link::{IntifaceLink, SimulatedLink};

/// Runtime switches that are not part of the config file.
#[derive(Debug, Clone, Default)]
pub struct ServeOptions {
    /// Drive an in-process simulated hub instead of Intiface.
    pub simulate: bool,
    /// Connect and scan right after startup.
    pub connect_on_start: bool,
}

/// Run the daemon until SIGINT/SIGTERM.
pub async fn run(config: HandyConfig, options: ServeOptions) -> Result<()> {
    info!("🤚 handyd starting");

    let settings = DispatcherSettings::from_config(&config);
    let (dispatcher, actor) = if options.simulate {
        info!("   Hub: simulated");
        let (link, hub, events) = SimulatedLink::new();
        let _hub = hub.with_device(0, "The Handy (simulated)");
        Dispatcher::spawn(link, events, settings)
    } else {
        info!("   Hub candidates: {}", config.infra.hub.endpoints.join(", "));
        let (link, events) = IntifaceLink::new(&config.infra.hub);
        Dispatcher::spawn(link, events, settings)
    };

    if options.connect_on_start || config.bootstrap.scan.auto_connect {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            match dispatcher.connect().await {
                Ok(status) => info!(
                    device = %status.device_name,
                    bound = status.device_bound,
                    "startup connect finished"
                ),
                Err(e) => warn!("startup connect failed: {}", e),
            }
        });
    }

    let addr = config.infra.bind.addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let app = gateway::router(GatewayState::new(dispatcher.clone()))
        .layer(TraceLayer::new_for_http());

    info!("🤚 handyd ready on http://{}", addr);
    info!("   Status: GET http://{}/status", addr);

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            cancel.cancel();
        }
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .context("Server error")?;

    let timeout = Duration::from_millis(config.infra.hub.shutdown_timeout_ms);
    if tokio::time::timeout(timeout, dispatcher.shutdown())
        .await
        .is_err()
    {
        warn!(
            timeout_ms = config.infra.hub.shutdown_timeout_ms,
            "session did not stop in time; abandoning hub"
        );
        actor.abort();
    }

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT, shutting down...");
        }
        _ = async {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};
                match signal(SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                    }
                    Err(e) => {
                        warn!("SIGTERM handler unavailable: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}
