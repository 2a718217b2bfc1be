/// Events sent to the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerEvent {
    Started,
    Stopped,
    Completed,
}

impl TrackerEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackerEvent::Started => "started",
            TrackerEvent::Stopped => "stopped",
            TrackerEvent::Completed => "completed",
        }
    }

    /// Event code used by the UDP tracker protocol
    pub fn as_udp_id(&self) -> u32 {
        match self {
            TrackerEvent::Completed => 1,
            TrackerEvent::Started => 2,
            TrackerEvent::Stopped => 3,
        }
    }
}

/// Request parameters for tracker communication
#[derive(Debug, Clone)]
pub struct TrackerRequest {
    /// SHA1 hash of the info dictionary
    pub info_hash: [u8; 20],
    /// Unique peer ID
    pub peer_id: [u8; 20],
    /// Port this peer is listening on
    pub port: u16,
    /// Total amount uploaded
    pub uploaded: u64,
    /// Total amount downloaded
    pub downloaded: u64,
    /// Number of bytes left to download
    pub left: u64,
    /// Event (optional)
    pub event: Option<TrackerEvent>,
    /// Request compact peer list format
    pub compact: bool,
}

impl TrackerRequest {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20], port: u16, left: u64) -> Self {
        Self {
            info_hash,
            peer_id,
            port,
            uploaded: 0,
            downloaded: 0,
            left,
            event: Some(TrackerEvent::Started),
            compact: true,
        }
    }

    /// Build the query string for an HTTP announce.
    ///
    /// The hashes are raw bytes, so they are percent-encoded here rather than
    /// handed to a form serializer that expects UTF-8 text.
    pub fn to_query_string(&self) -> String {
        let mut params = vec![
            format!("info_hash={}", urlencoded_bytes(&self.info_hash)),
            format!("peer_id={}", urlencoded_bytes(&self.peer_id)),
            format!("port={}", self.port),
            format!("uploaded={}", self.uploaded),
            format!("downloaded={}", self.downloaded),
            format!("left={}", self.left),
            format!("compact={}", if self.compact { 1 } else { 0 }),
        ];

        if let Some(event) = &self.event {
            params.push(format!("event={}", event.as_str()));
        }

        params.join("&")
    }
}

/// URL-encode raw bytes for tracker requests
fn urlencoded_bytes(bytes: &[u8]) -> String {
    url::form_urlencoded::byte_serialize(bytes).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_string_encodes_raw_hash() {
        let mut info_hash = [0u8; 20];
        info_hash[0] = 0xFF;
        info_hash[1] = b'a';
        let request = TrackerRequest::new(info_hash, *b"-SF0100-abcdefghijkl", 6881, 100);
        let query = request.to_query_string();

        assert!(query.starts_with("info_hash=%FFa%00"));
        assert!(query.contains("peer_id=-SF0100-abcdefghijkl"));
        assert!(query.contains("left=100"));
        assert!(query.ends_with("event=started"));
    }
}
