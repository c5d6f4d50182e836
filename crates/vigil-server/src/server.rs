use std::sync::Arc;

use tokio::net::TcpListener;
use vigil_ledger::{AuditLedger, CancellationToken};
use vigil_store::{FileEmergencyChannel, FileLedgerStore, FileReplica};

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::AppState;
use crate::router::build_router;

/// Open the file-backed ledger described by `config`, creating directories
/// as needed.
pub fn open_ledger(config: &ServerConfig) -> ServerResult<AuditLedger> {
    std::fs::create_dir_all(&config.data_dir)?;
    let primary = Arc::new(FileLedgerStore::open(&config.data_dir, config.sync_mode)?);

    let emergency_dir = config.emergency_path();
    std::fs::create_dir_all(&emergency_dir)?;
    if config.emergency_shares_primary_device()? {
        if config.require_separate_emergency_device {
            return Err(ServerError::Config(format!(
                "emergency directory {} is on the same device as {}",
                emergency_dir.display(),
                config.data_dir.display()
            )));
        }
        tracing::warn!(
            emergency_dir = %emergency_dir.display(),
            data_dir = %config.data_dir.display(),
            "emergency log shares a device with the primary store"
        );
    }
    let emergency = Arc::new(FileEmergencyChannel::open(&emergency_dir)?);

    let ledger = match &config.replica_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let replica = Arc::new(FileReplica::open(dir, config.sync_mode)?);
            AuditLedger::with_replica(primary, replica, emergency, config.ledger.clone())
        }
        None => AuditLedger::new(primary, emergency, config.ledger.clone()),
    };
    Ok(ledger)
}

/// Vigil HTTP server.
pub struct VigilServer {
    config: ServerConfig,
    state: AppState,
}

impl VigilServer {
    /// Open the ledger from `config` and wrap it.
    pub fn open(config: ServerConfig) -> ServerResult<Self> {
        let ledger = open_ledger(&config)?;
        Ok(Self::with_ledger(config, Arc::new(ledger)))
    }

    pub fn with_ledger(config: ServerConfig, ledger: Arc<AuditLedger>) -> Self {
        Self {
            config,
            state: AppState::new(ledger),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<AuditLedger> {
        &self.state.ledger
    }

    /// Cancelling this token stops the server and any running verification.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.state.shutdown.clone()
    }

    /// Build the router (useful for testing).
    pub fn router(&self) -> axum::Router {
        build_router(self.state.clone())
    }

    /// Serve until the shutdown token is cancelled.
    pub async fn serve(self) -> ServerResult<()> {
        let shutdown = self.shutdown_token();
        let app = self.router();
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        tracing::info!(
            addr = %self.config.bind_addr,
            data_dir = %self.config.data_dir.display(),
            "vigil server listening"
        );
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| ServerError::Internal(e.to_string()))
    }
}
