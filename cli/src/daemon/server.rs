// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Daemon HTTP server implementation

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use marshal_core::application::ApplicationRegistry;
use marshal_core::domain::events::{ApplicationEvent, GoalEvent};
use marshal_core::domain::node_config::NodeConfigManifest;
use marshal_core::infrastructure::event_bus::EventBusError;
use marshal_core::infrastructure::{DockerDriver, DomainEvent, EventBus};
use marshal_core::presentation;

pub async fn start_daemon(config: NodeConfigManifest) -> Result<()> {
    config.validate().context("Configuration validation failed")?;
    info!(node = %config.metadata.name, pid = std::process::id(), "Marshal daemon starting");

    let driver = DockerDriver::new(&config.spec.docker).context("Failed to connect to Docker")?;
    driver
        .healthcheck()
        .await
        .context("Docker daemon is not answering")?;
    info!("Connected to Docker");

    let metrics = &config.spec.observability.metrics;
    if metrics.enabled {
        let addr: SocketAddr = format!("{}:{}", config.spec.network.bind_address, metrics.port)
            .parse()
            .context("Invalid metrics listen address")?;
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("Failed to start Prometheus exporter")?;
        info!("Prometheus metrics on {}", addr);
    }

    let events = EventBus::with_default_capacity();
    let event_log = spawn_event_log(&events);
    let registry = Arc::new(ApplicationRegistry::new(
        Arc::new(driver),
        config.spec.orchestration.clone(),
        events,
    ));

    let app = presentation::app(Arc::clone(&registry));

    let addr = format!("{}:{}", config.spec.network.bind_address, config.spec.network.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("Daemon listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("Daemon shutting down, deleting applications");
    registry.shutdown().await;
    event_log.abort();
    info!("Daemon stopped");

    Ok(())
}

/// Mirrors lifecycle events into the log.
fn spawn_event_log(events: &EventBus) -> JoinHandle<()> {
    let mut receiver = events.subscribe();
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(DomainEvent::Application(ApplicationEvent::ApplicationCreated {
                    application, goals, ..
                })) => info!(application = %application, goals = goals.len(), "Event: application created"),
                Ok(DomainEvent::Application(ApplicationEvent::ApplicationDeleted { application, .. })) => {
                    info!(application = %application, "Event: application deleted")
                }
                Ok(DomainEvent::Goal(GoalEvent::GoalRestarting {
                    application,
                    goal,
                    restarts,
                    ..
                })) => info!(application = %application, goal = %goal, restarts, "Event: goal restarting"),
                Ok(DomainEvent::Goal(event)) => debug!(application = %event.application(), ?event, "Event"),
                Err(EventBusError::Lagged(_)) | Err(EventBusError::Empty) => continue,
                Err(EventBusError::Closed) => break,
            }
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
