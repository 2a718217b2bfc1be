mod config;
mod connector;
mod engine;

pub use config::ClientConfig;
pub use connector::Connector;
pub use engine::Engine;

use crate::error::Result;
use crate::piece::Scheduler;
use crate::storage::StorageManager;
use crate::torrent::{PieceHash, TorrentInfo};
use std::path::Path;
use tracing::info;

/// Main download client
pub struct TorrentClient {
    config: ClientConfig,
}

impl TorrentClient {
    pub fn new(config: ClientConfig) -> Self {
        info!(
            "Client initialized with peer_id: {}",
            hex::encode(config.peer_id)
        );
        Self { config }
    }

    /// Download a torrent into the configured directory
    pub async fn download(&self, torrent_path: &Path) -> Result<()> {
        info!("Starting download for: {}", torrent_path.display());

        // Anything wrong with the metainfo or the disk fails here,
        // before any network activity
        let metainfo = crate::torrent::load_torrent_file(torrent_path).await?;

        info!("Torrent: {}", metainfo.info.name);
        info!("Total size: {} bytes", metainfo.info.total_length);
        info!("Pieces: {}", metainfo.info.pieces.len());
        info!("Info hash: {}", metainfo.info_hash_hex());

        let storage = StorageManager::new(&self.config.download_dir, &metainfo.info);
        let reused = storage.preallocate().await?;
        let mut scheduler = Scheduler::new(self.config.scheduler.clone(), &metainfo.info)?;

        if !reused.is_empty() {
            resume(&storage, &metainfo.info, &mut scheduler).await?;
        }
        if scheduler.is_complete() {
            info!("All pieces already present, nothing to download");
            return Ok(());
        }

        Engine::new(&self.config, &metainfo, &storage, scheduler)
            .run()
            .await?;

        Ok(())
    }
}

/// Verify data left by an earlier run and mark matching pieces complete.
/// Returns the number of pieces restored.
pub async fn resume(
    storage: &StorageManager,
    info: &TorrentInfo,
    scheduler: &mut Scheduler,
) -> Result<usize> {
    let mut restored = 0;

    for (index, hash) in info.pieces.iter().enumerate() {
        let offset = index as u64 * info.piece_length;
        let data = storage.read_at(offset, info.piece_len(index) as usize).await?;
        if PieceHash::of(&data) == *hash {
            scheduler.restore(index);
            restored += 1;
        }
    }

    info!(
        "Resumed {}/{} pieces from disk ({:.1}%)",
        restored,
        info.piece_count(),
        scheduler.progress()
    );
    Ok(restored)
}
