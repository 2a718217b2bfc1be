use crate::error::{BittorrentError, Result};
use crate::torrent::TorrentInfo;
use std::future::Future;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info};

/// Destination for verified piece data
pub trait Assembler {
    /// Durably place `data` at the absolute byte `offset` of the download
    fn write_at(&self, offset: u64, data: &[u8]) -> impl Future<Output = Result<()>>;
}

/// Maps the torrent's linear byte range onto its files
pub struct StorageManager {
    /// Files in the torrent
    files: Vec<FileEntry>,
    /// Total length of all files
    total_length: u64,
}

#[derive(Debug)]
struct FileEntry {
    path: PathBuf,
    length: u64,
    offset: u64, // Global offset in the torrent
}

impl StorageManager {
    /// Lay out the torrent's files under `download_dir`.
    /// A single-file torrent becomes `download_dir/name`, a multi-file one
    /// the tree `download_dir/name/...`.
    pub fn new<P: AsRef<Path>>(download_dir: P, torrent_info: &TorrentInfo) -> Self {
        let mut root = download_dir.as_ref().to_path_buf();
        if torrent_info.multi_file {
            root.push(&torrent_info.name);
        }

        let mut files = Vec::with_capacity(torrent_info.files.len());
        let mut offset = 0u64;

        for file_info in &torrent_info.files {
            let mut path = root.clone();
            for component in &file_info.path {
                path.push(component);
            }

            files.push(FileEntry {
                path,
                length: file_info.length,
                offset,
            });
            offset += file_info.length;
        }

        Self {
            files,
            total_length: torrent_info.total_length,
        }
    }

    /// Create every file at its final size before any write.
    ///
    /// A file that already has exactly the right size is left untouched so
    /// earlier progress survives. Returns the paths that were reused.
    pub async fn preallocate(&self) -> Result<Vec<PathBuf>> {
        let mut reused = Vec::new();

        for entry in &self.files {
            if let Some(parent) = entry.path.parent() {
                fs::create_dir_all(parent).await?;
            }

            match fs::metadata(&entry.path).await {
                Ok(meta) if meta.is_file() && meta.len() == entry.length => {
                    debug!("Reusing {:?} ({} bytes)", entry.path, entry.length);
                    reused.push(entry.path.clone());
                    continue;
                }
                Ok(meta) if !meta.is_file() => {
                    return Err(BittorrentError::StorageError(format!(
                        "{:?} exists and is not a file",
                        entry.path
                    )));
                }
                _ => {}
            }

            let file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&entry.path)
                .await?;
            file.set_len(entry.length).await?;
            debug!("Allocated {:?} ({} bytes)", entry.path, entry.length);
        }

        info!(
            "Storage ready: {} files, {} bytes total, {} reused",
            self.files.len(),
            self.total_length,
            reused.len()
        );

        Ok(reused)
    }

    /// Write data at a global offset (spans multiple files if needed)
    pub async fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        self.check_range(offset, data.len())?;

        let mut offset = offset;
        let mut data = data;

        for file_entry in &self.files {
            if data.is_empty() {
                break;
            }
            if offset >= file_entry.offset + file_entry.length {
                continue; // This file is before our offset
            }

            let file_offset = offset - file_entry.offset;
            let bytes_to_write =
                std::cmp::min(data.len() as u64, file_entry.length - file_offset) as usize;

            let mut file = OpenOptions::new().write(true).open(&file_entry.path).await?;
            file.seek(SeekFrom::Start(file_offset)).await?;
            file.write_all(&data[..bytes_to_write]).await?;
            file.sync_data().await?;

            debug!(
                "Wrote {} bytes to {:?} at offset {}",
                bytes_to_write, file_entry.path, file_offset
            );

            // Move to next file
            offset += bytes_to_write as u64;
            data = &data[bytes_to_write..];
        }

        Ok(())
    }

    /// Read data from a global offset (spans multiple files if needed)
    pub async fn read_at(&self, offset: u64, length: usize) -> Result<Vec<u8>> {
        self.check_range(offset, length)?;

        let mut offset = offset;
        let mut remaining = length;
        let mut result = Vec::with_capacity(length);

        for file_entry in &self.files {
            if remaining == 0 {
                break;
            }
            if offset >= file_entry.offset + file_entry.length {
                continue;
            }

            let file_offset = offset - file_entry.offset;
            let bytes_to_read =
                std::cmp::min(remaining as u64, file_entry.length - file_offset) as usize;

            let mut file = File::open(&file_entry.path).await?;
            file.seek(SeekFrom::Start(file_offset)).await?;

            let mut buffer = vec![0u8; bytes_to_read];
            file.read_exact(&mut buffer).await?;
            result.extend_from_slice(&buffer);

            offset += bytes_to_read as u64;
            remaining -= bytes_to_read;
        }

        Ok(result)
    }

    fn check_range(&self, offset: u64, len: usize) -> Result<()> {
        let end = offset.checked_add(len as u64);
        if end.map_or(true, |end| end > self.total_length) {
            return Err(BittorrentError::StorageError(format!(
                "Range {}+{} is outside the {} byte download",
                offset, len, self.total_length
            )));
        }
        Ok(())
    }
}

impl Assembler for StorageManager {
    async fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        StorageManager::write_at(self, offset, data).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::torrent::{FileInfo, PieceHash, Pieces};
    use tempfile::TempDir;

    fn multi_file_info() -> TorrentInfo {
        TorrentInfo {
            name: "album".to_string(),
            piece_length: 8,
            pieces: vec![PieceHash::new([0; 20]); 2].into_iter().collect::<Pieces>(),
            files: vec![
                FileInfo {
                    path: vec!["a.txt".to_string()],
                    length: 5,
                },
                FileInfo {
                    path: vec!["sub".to_string(), "b.txt".to_string()],
                    length: 7,
                },
            ],
            total_length: 12,
            multi_file: true,
        }
    }

    #[tokio::test]
    async fn test_preallocate_creates_sized_files() {
        let dir = TempDir::new().unwrap();
        let storage = StorageManager::new(dir.path(), &multi_file_info());

        let reused = storage.preallocate().await.unwrap();
        assert!(reused.is_empty());

        let a = tokio::fs::metadata(dir.path().join("album/a.txt")).await.unwrap();
        let b = tokio::fs::metadata(dir.path().join("album/sub/b.txt")).await.unwrap();
        assert_eq!(a.len(), 5);
        assert_eq!(b.len(), 7);
    }

    #[tokio::test]
    async fn test_write_spans_file_boundary() {
        let dir = TempDir::new().unwrap();
        let storage = StorageManager::new(dir.path(), &multi_file_info());
        storage.preallocate().await.unwrap();

        Assembler::write_at(&storage, 3, b"HELLO").await.unwrap();

        let a = tokio::fs::read(dir.path().join("album/a.txt")).await.unwrap();
        let b = tokio::fs::read(dir.path().join("album/sub/b.txt")).await.unwrap();
        assert_eq!(a, b"\0\0\0HE");
        assert_eq!(b, b"LLO\0\0\0\0");

        assert_eq!(storage.read_at(3, 5).await.unwrap(), b"HELLO");
    }

    #[tokio::test]
    async fn test_correctly_sized_file_is_not_truncated() {
        let dir = TempDir::new().unwrap();
        let storage = StorageManager::new(dir.path(), &multi_file_info());
        storage.preallocate().await.unwrap();
        storage.write_at(0, b"abcde").await.unwrap();

        let again = StorageManager::new(dir.path(), &multi_file_info());
        let reused = again.preallocate().await.unwrap();
        assert_eq!(reused.len(), 2);
        assert_eq!(again.read_at(0, 5).await.unwrap(), b"abcde");
    }

    #[tokio::test]
    async fn test_wrong_size_file_is_resized() {
        let dir = TempDir::new().unwrap();
        tokio::fs::create_dir_all(dir.path().join("album")).await.unwrap();
        tokio::fs::write(dir.path().join("album/a.txt"), b"too long content")
            .await
            .unwrap();

        let storage = StorageManager::new(dir.path(), &multi_file_info());
        let reused = storage.preallocate().await.unwrap();
        assert!(reused.is_empty());

        let a = tokio::fs::metadata(dir.path().join("album/a.txt")).await.unwrap();
        assert_eq!(a.len(), 5);
    }

    #[tokio::test]
    async fn test_out_of_range_write_fails() {
        let dir = TempDir::new().unwrap();
        let storage = StorageManager::new(dir.path(), &multi_file_info());
        storage.preallocate().await.unwrap();

        assert!(storage.write_at(10, b"xyz").await.is_err());
    }
}
