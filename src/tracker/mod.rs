mod client;
mod peer;
mod request;
mod response;
mod udp;

pub use client::TrackerClient;
pub use peer::Peer;
pub use request::{TrackerEvent, TrackerRequest};
pub use response::TrackerResponse;

use rand::Rng;

/// Client identifier prefix, Azureus style
const PEER_ID_PREFIX: &[u8; 8] = b"-SF0100-";

/// Generate a random peer ID
/// Format: -SF0100-<12 random alphanumeric chars>
pub fn generate_peer_id() -> [u8; 20] {
    let mut peer_id = [0u8; 20];
    peer_id[0..8].copy_from_slice(PEER_ID_PREFIX);

    let mut rng = rand::thread_rng();
    for byte in &mut peer_id[8..] {
        *byte = rng.sample(rand::distributions::Alphanumeric);
    }

    peer_id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_peer_id() {
        let peer_id = generate_peer_id();
        assert_eq!(&peer_id[0..8], b"-SF0100-");
        assert!(peer_id[8..].iter().all(|b| b.is_ascii_alphanumeric()));
    }
}
