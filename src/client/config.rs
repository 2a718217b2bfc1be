use crate::error::Result;
use crate::piece::SchedulerConfig;
use crate::tracker::generate_peer_id;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Configuration for the download client.
///
/// Every field has a default, so a TOML file only needs the keys it changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub download_dir: PathBuf,
    /// Port reported to trackers; nothing listens on it
    pub listen_port: u16,
    /// Generated per run, never read from a file
    #[serde(skip)]
    pub peer_id: [u8; 20],
    pub max_peers: usize,
    pub connect_timeout_secs: u64,
    /// Connects allowed in flight at once
    pub connect_workers: usize,
    pub keep_alive_interval_secs: u64,
    /// Drop a peer that sends nothing for this long
    pub peer_timeout_secs: u64,
    /// Pause of the poll loop when no session moved any bytes
    pub idle_sleep_ms: u64,
    /// Lower bound between announces when the swarm runs dry
    pub announce_interval_floor_secs: u64,
    pub scheduler: SchedulerConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("./downloads"),
            listen_port: 6881,
            peer_id: generate_peer_id(),
            max_peers: 50,
            connect_timeout_secs: 5,
            connect_workers: 8,
            keep_alive_interval_secs: 100,
            peer_timeout_secs: 120,
            idle_sleep_ms: 10,
            announce_interval_floor_secs: 30,
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Read overrides from a TOML file on top of the defaults
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path).await?;
        let config = Self::from_toml(&text)?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_secs(self.keep_alive_interval_secs)
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_secs(self.peer_timeout_secs)
    }

    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_sleep_ms)
    }

    pub fn announce_interval_floor(&self) -> Duration {
        Duration::from_secs(self.announce_interval_floor_secs)
    }
}
