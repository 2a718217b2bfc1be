use crate::error::{BittorrentError, Result};

pub const PROTOCOL_STRING: &[u8] = b"BitTorrent protocol";

/// Total handshake size: 1 + 19 + 8 + 20 + 20
pub const HANDSHAKE_LEN: usize = 1 + PROTOCOL_STRING.len() + 8 + 20 + 20;

/// Handshake message for peer wire protocol
/// Format: <pstrlen><pstr><reserved><info_hash><peer_id>
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
}

impl Handshake {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Self { info_hash, peer_id }
    }

    /// Serialize handshake to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HANDSHAKE_LEN);

        buf.push(PROTOCOL_STRING.len() as u8);
        buf.extend_from_slice(PROTOCOL_STRING);

        // Reserved bytes, no extensions advertised
        buf.extend_from_slice(&[0u8; 8]);

        buf.extend_from_slice(&self.info_hash);
        buf.extend_from_slice(&self.peer_id);

        buf
    }

    /// Check the protocol-name length byte as soon as it arrives
    pub fn check_prefix(first_byte: u8) -> Result<()> {
        if first_byte as usize != PROTOCOL_STRING.len() {
            return Err(BittorrentError::ProtocolError(format!(
                "Invalid protocol string length: {}",
                first_byte
            )));
        }
        Ok(())
    }

    /// Deserialize a complete handshake
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < HANDSHAKE_LEN {
            return Err(BittorrentError::ProtocolError(
                "Handshake too short".to_string(),
            ));
        }

        Self::check_prefix(data[0])?;

        let pstr_end = 1 + PROTOCOL_STRING.len();
        if &data[1..pstr_end] != PROTOCOL_STRING {
            return Err(BittorrentError::ProtocolError(
                "Invalid protocol string".to_string(),
            ));
        }

        let hash_start = pstr_end + 8;
        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&data[hash_start..hash_start + 20]);

        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&data[hash_start + 20..hash_start + 40]);

        Ok(Handshake { info_hash, peer_id })
    }
}
