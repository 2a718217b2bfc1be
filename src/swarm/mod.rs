use crate::peer::{Bitfield, BlockInfo, Session, SessionEvent, Transport};
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use tracing::debug;

/// Stable handle for a peer for as long as it stays in the swarm.
/// Keys are never reused, so stale requests can't point at a new peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerKey(u64);

impl fmt::Display for PeerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A connected remote peer
pub struct Peer<T> {
    pub session: Session<T>,
    /// Pieces the peer has advertised
    pub bitfield: Bitfield,
    /// Block requests issued to this peer and not yet answered
    pub active_requests: usize,
}

impl<T: Transport> Peer<T> {
    pub fn addr(&self) -> SocketAddr {
        self.session.addr()
    }
}

/// All live sessions of one download
pub struct Swarm<T> {
    peers: HashMap<PeerKey, Peer<T>>,
    next_key: u64,
    num_pieces: usize,
}

impl<T: Transport> Swarm<T> {
    pub fn new(num_pieces: usize) -> Self {
        Self {
            peers: HashMap::new(),
            next_key: 0,
            num_pieces,
        }
    }

    /// Add a freshly connected session
    pub fn insert(&mut self, session: Session<T>) -> PeerKey {
        let key = PeerKey(self.next_key);
        self.next_key += 1;

        debug!("Peer {} joined the swarm as {}", session.addr(), key);
        self.peers.insert(
            key,
            Peer {
                session,
                bitfield: Bitfield::new(self.num_pieces),
                active_requests: 0,
            },
        );
        key
    }

    /// Drop a peer; its socket closes with the session
    pub fn remove(&mut self, key: PeerKey) -> Option<Peer<T>> {
        self.peers.remove(&key)
    }

    pub fn get(&self, key: PeerKey) -> Option<&Peer<T>> {
        self.peers.get(&key)
    }

    pub fn get_mut(&mut self, key: PeerKey) -> Option<&mut Peer<T>> {
        self.peers.get_mut(&key)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn keys(&self) -> Vec<PeerKey> {
        self.peers.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PeerKey, &Peer<T>)> {
        self.peers.iter().map(|(key, peer)| (*key, peer))
    }

    pub fn contains_addr(&self, addr: SocketAddr) -> bool {
        self.peers.values().any(|peer| peer.addr() == addr)
    }

    /// Fold availability updates from a session event into the peer's bitfield
    pub fn apply(&mut self, key: PeerKey, event: &SessionEvent) {
        let Some(peer) = self.peers.get_mut(&key) else {
            return;
        };

        match event {
            SessionEvent::Bitfield(bits) => {
                debug!(
                    "Peer {} has {}/{} pieces",
                    key,
                    bits.count(self.num_pieces),
                    self.num_pieces
                );
                peer.bitfield = bits.clone();
            }
            SessionEvent::Have(index) => peer.bitfield.set(*index as usize),
            _ => {}
        }
    }

    /// Queue a block request on the peer's session and count it
    pub fn send_request(&mut self, key: PeerKey, block: BlockInfo) -> bool {
        match self.peers.get_mut(&key) {
            Some(peer) => {
                peer.session.request(block);
                peer.active_requests += 1;
                true
            }
            None => false,
        }
    }

    /// A request to this peer was answered, timed out or cancelled
    pub fn release_request(&mut self, key: PeerKey) {
        if let Some(peer) = self.peers.get_mut(&key) {
            peer.active_requests = peer.active_requests.saturating_sub(1);
        }
    }

    /// Queue a Cancel for a block we no longer need from this peer
    pub fn send_cancel(&mut self, key: PeerKey, block: BlockInfo) {
        if let Some(peer) = self.peers.get_mut(&key) {
            peer.session.cancel(block);
        }
    }
}
