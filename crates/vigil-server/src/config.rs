use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use vigil_ledger::LedgerConfig;
use vigil_store::SyncMode;

use crate::error::{ServerError, ServerResult};

pub const DEFAULT_PORT: u16 = 8470;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Directory holding the primary ledger log.
    pub data_dir: PathBuf,
    /// Optional directory for the best-effort replica.
    pub replica_dir: Option<PathBuf>,
    /// Defaults to `<data_dir>/emergency`, which sits on the primary's
    /// device: a full or failed disk then takes out both. Point this at a
    /// different device in production.
    pub emergency_dir: Option<PathBuf>,
    /// Refuse to open when the emergency log shares the primary's device.
    pub require_separate_emergency_device: bool,
    pub sync_mode: SyncMode,
    pub ledger: LedgerConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            data_dir: PathBuf::from("vigil-data"),
            replica_dir: None,
            emergency_dir: None,
            require_separate_emergency_device: false,
            sync_mode: SyncMode::default(),
            ledger: LedgerConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Read a TOML file. Missing keys take their defaults.
    pub fn load(path: &Path) -> ServerResult<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| ServerError::Config(format!("{}: {e}", path.display())))
    }

    pub fn emergency_path(&self) -> PathBuf {
        self.emergency_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("emergency"))
    }

    /// Whether the emergency directory lives on the same device as the data
    /// directory. Both must exist.
    #[cfg(unix)]
    pub fn emergency_shares_primary_device(&self) -> std::io::Result<bool> {
        use std::os::unix::fs::MetadataExt;
        let primary = std::fs::metadata(&self.data_dir)?.dev();
        let emergency = std::fs::metadata(self.emergency_path())?.dev();
        Ok(primary == emergency)
    }

    #[cfg(not(unix))]
    pub fn emergency_shares_primary_device(&self) -> std::io::Result<bool> {
        let primary = std::fs::canonicalize(&self.data_dir)?;
        let emergency = std::fs::canonicalize(self.emergency_path())?;
        Ok(emergency.starts_with(&primary))
    }
}
