use super::Pieces;
use crate::bencode::{encode, BencodeValue, Dict};
use crate::error::{BittorrentError, Result};
use sha1::{Digest, Sha1};

/// Represents a file in the torrent, with its path relative to the torrent root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub path: Vec<String>,
    pub length: u64,
}

/// Information about the torrent contents
#[derive(Debug, Clone)]
pub struct TorrentInfo {
    /// Suggested name for the file or directory
    pub name: String,
    /// Number of bytes in each piece
    pub piece_length: u64,
    /// SHA1 hashes of all pieces
    pub pieces: Pieces,
    /// Files in the torrent
    pub files: Vec<FileInfo>,
    /// Exact sum of all file lengths
    pub total_length: u64,
    /// Whether the torrent was described with a `files` list
    pub multi_file: bool,
}

fn invalid(msg: &str) -> BittorrentError {
    BittorrentError::InvalidTorrent(msg.to_string())
}

fn required_u64(dict: &Dict, key: &str) -> Result<u64> {
    dict.get(key.as_bytes())
        .and_then(|v| v.as_u64())
        .ok_or_else(|| BittorrentError::InvalidTorrent(format!("Missing or invalid '{}'", key)))
}

/// Reject path components that would escape the download directory
fn path_component(value: &BencodeValue) -> Result<String> {
    let component = value
        .as_str()
        .ok_or_else(|| invalid("Invalid path component"))?;

    if component.is_empty()
        || component == "."
        || component == ".."
        || component.contains(['/', '\\'])
    {
        return Err(BittorrentError::InvalidTorrent(format!(
            "Unsafe path component: {:?}",
            component
        )));
    }

    Ok(component.to_string())
}

impl TorrentInfo {
    pub fn from_bencode(value: &BencodeValue) -> Result<Self> {
        let dict = value.as_dict().ok_or_else(|| invalid("Info must be a dict"))?;

        let name = dict
            .get(b"name")
            .map(path_component)
            .ok_or_else(|| invalid("Missing 'name' field"))??;

        let piece_length = required_u64(dict, "piece length")?;
        if piece_length == 0 {
            return Err(invalid("'piece length' must be positive"));
        }

        let pieces_bytes = dict
            .get(b"pieces")
            .and_then(|v| v.as_bytes())
            .ok_or_else(|| invalid("Missing 'pieces' field"))?;
        let pieces = Pieces::from_bytes(pieces_bytes)?;

        // Single-file mode carries 'length', multi-file mode a 'files' list
        let (files, multi_file) = if dict.contains_key(b"length") {
            let length = required_u64(dict, "length")?;
            let file = FileInfo {
                path: vec![name.clone()],
                length,
            };
            (vec![file], false)
        } else if let Some(files_value) = dict.get(b"files") {
            let files_list = files_value
                .as_list()
                .ok_or_else(|| invalid("Invalid 'files' field"))?;

            let mut files = Vec::with_capacity(files_list.len());
            for file_value in files_list {
                let file_dict = file_value
                    .as_dict()
                    .ok_or_else(|| invalid("File entry must be a dict"))?;

                let length = required_u64(file_dict, "length")?;

                let path = file_dict
                    .get(b"path")
                    .and_then(|v| v.as_list())
                    .ok_or_else(|| invalid("Missing file 'path'"))?
                    .iter()
                    .map(path_component)
                    .collect::<Result<Vec<_>>>()?;

                if path.is_empty() {
                    return Err(invalid("Empty file 'path'"));
                }

                files.push(FileInfo { path, length });
            }

            if files.is_empty() {
                return Err(invalid("Empty 'files' list"));
            }

            (files, true)
        } else {
            return Err(invalid("Missing 'length' or 'files' field"));
        };

        let total_length = files
            .iter()
            .try_fold(0u64, |acc, f| acc.checked_add(f.length))
            .ok_or_else(|| invalid("Total length overflows"))?;

        let info = TorrentInfo {
            name,
            piece_length,
            pieces,
            files,
            total_length,
            multi_file,
        };
        info.validate()?;

        Ok(info)
    }

    /// The digest list must describe exactly the bytes of the file list
    fn validate(&self) -> Result<()> {
        let expected = self.total_length.div_ceil(self.piece_length);
        if expected != self.pieces.len() as u64 {
            return Err(BittorrentError::InvalidTorrent(format!(
                "{} piece hashes for {} bytes at piece length {} (expected {})",
                self.pieces.len(),
                self.total_length,
                self.piece_length,
                expected
            )));
        }
        Ok(())
    }

    pub fn piece_count(&self) -> usize {
        self.pieces.len()
    }

    /// Length of the piece at `index`; only the last piece may be shorter
    pub fn piece_len(&self, index: usize) -> u64 {
        let start = index as u64 * self.piece_length;
        self.piece_length.min(self.total_length.saturating_sub(start))
    }
}

/// Top-level metainfo structure from a .torrent file
#[derive(Debug, Clone)]
pub struct Metainfo {
    /// URL of the tracker
    pub announce: Option<String>,
    /// Additional tracker URLs (optional)
    pub announce_list: Option<Vec<Vec<String>>>,
    /// Information about the torrent contents
    pub info: TorrentInfo,
    /// SHA1 hash of the bencoded info dictionary
    pub info_hash: [u8; 20],
}

impl Metainfo {
    pub fn from_bencode(value: &BencodeValue) -> Result<Self> {
        let dict = value
            .as_dict()
            .ok_or_else(|| invalid("Torrent must be a dict"))?;

        let announce = dict
            .get(b"announce")
            .and_then(|v| v.as_str())
            .map(String::from);

        let announce_list = dict.get(b"announce-list").and_then(|v| {
            v.as_list().map(|list| {
                list.iter()
                    .filter_map(|tier| {
                        tier.as_list().map(|urls| {
                            urls.iter()
                                .filter_map(|u| u.as_str().map(String::from))
                                .collect()
                        })
                    })
                    .collect()
            })
        });

        let info_value = dict.get(b"info").ok_or_else(|| invalid("Missing 'info' field"))?;
        let info = TorrentInfo::from_bencode(info_value)?;

        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&Sha1::digest(encode(info_value)));

        let metainfo = Metainfo {
            announce,
            announce_list,
            info,
            info_hash,
        };

        if metainfo.trackers().is_empty() {
            return Err(invalid("No tracker in 'announce' or 'announce-list'"));
        }

        Ok(metainfo)
    }

    /// Tracker URLs in the order they should be tried, without duplicates
    pub fn trackers(&self) -> Vec<String> {
        let mut urls: Vec<String> = Vec::new();
        let tiers = self.announce_list.iter().flatten().flatten();
        for url in self.announce.iter().chain(tiers) {
            if !urls.contains(url) {
                urls.push(url.clone());
            }
        }
        urls
    }

    /// Get the info hash as a hex string
    pub fn info_hash_hex(&self) -> String {
        hex::encode(self.info_hash)
    }
}
