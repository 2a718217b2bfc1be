use thiserror::Error;

#[derive(Error, Debug)]
pub enum BittorrentError {
    #[error("Bencode parsing error: {0}")]
    BencodeError(String),

    #[error("Invalid torrent file: {0}")]
    InvalidTorrent(String),

    #[error("Tracker error: {0}")]
    TrackerError(String),

    #[error("Peer connection error: {0}")]
    PeerError(String),

    /// Malformed handshake or message. Fatal to the offending session only.
    #[error("Protocol violation: {0}")]
    ProtocolError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("UTF-8 error: {0}")]
    Utf8Error(#[from] std::string::FromUtf8Error),

    #[error("URL parse error: {0}")]
    UrlParseError(String),
}

impl From<url::ParseError> for BittorrentError {
    fn from(err: url::ParseError) -> Self {
        BittorrentError::UrlParseError(err.to_string())
    }
}

impl From<toml::de::Error> for BittorrentError {
    fn from(err: toml::de::Error) -> Self {
        BittorrentError::ConfigError(err.to_string())
    }
}

impl BittorrentError {
    /// Whether the error only concerns a single peer session.
    pub fn is_peer_local(&self) -> bool {
        matches!(
            self,
            BittorrentError::PeerError(_)
                | BittorrentError::ProtocolError(_)
                | BittorrentError::IoError(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, BittorrentError>;
