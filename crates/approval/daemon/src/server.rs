//! Server setup and lifecycle management

use crate::api::{create_router, AppState};
use crate::config::{DaemonConfig, StorageConfig};
use crate::error::{DaemonError, DaemonResult};
use crate::record_store::LoggingRecordStore;
use approval_engine::{ApprovalEngine, InMemoryDirectory, LoggingDispatcher};
use approval_store::memory::InMemoryApprovalStore;
use approval_store::postgres::PostgresApprovalStore;
use approval_store::ApprovalStore;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;

/// Approval daemon server
pub struct Server {
    config: DaemonConfig,
    engine: Arc<ApprovalEngine>,
}

impl Server {
    /// Create a new server with the given configuration
    pub async fn new(config: DaemonConfig) -> DaemonResult<Self> {
        let store: Arc<dyn ApprovalStore> = match &config.storage {
            StorageConfig::Memory => {
                tracing::info!("Using in-memory approval storage");
                Arc::new(InMemoryApprovalStore::new())
            }
            StorageConfig::Postgres {
                url,
                max_connections,
                connect_timeout_secs,
            } => {
                tracing::info!(max_connections, "Using PostgreSQL approval storage");
                Arc::new(
                    PostgresApprovalStore::connect_with_options(
                        url,
                        *max_connections,
                        *connect_timeout_secs,
                    )
                    .await?,
                )
            }
        };

        let directory = Arc::new(InMemoryDirectory::from_users(
            config.directory.users.iter().cloned(),
        ));
        tracing::info!(
            users = config.directory.users.len(),
            "Identity directory seeded"
        );

        let engine = Arc::new(ApprovalEngine::new(
            store,
            directory,
            Arc::new(LoggingRecordStore),
            Arc::new(LoggingDispatcher),
            config.engine.clone(),
        ));

        Ok(Self { config, engine })
    }

    pub fn engine(&self) -> &Arc<ApprovalEngine> {
        &self.engine
    }

    /// Run the server until a shutdown signal arrives
    pub async fn run(self) -> DaemonResult<()> {
        let addr = self.config.server.listen_addr;

        let redelivered = self.engine.redeliver_outcomes().await?;
        if redelivered > 0 {
            tracing::info!(redelivered, "Delivered outcomes left over from a previous run");
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = self.engine.outbox().spawn_worker(shutdown_rx);

        let app = create_router(AppState::new(self.engine.clone()), &self.config.server);
        let listener = TcpListener::bind(addr).await?;

        tracing::info!("Approval daemon listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| DaemonError::Server(e.to_string()))?;

        tracing::info!("Approval daemon shutting down");

        // Let the notification worker drain once more before exiting.
        let _ = shutdown_tx.send(true);
        if let Err(err) = worker.await {
            tracing::warn!(error = %err, "Notification worker did not stop cleanly");
        }

        Ok(())
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
