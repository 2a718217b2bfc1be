mod bitfield;
mod inbox;
mod message;
mod outbox;
mod protocol;
mod session;
pub(crate) mod transport;

pub use bitfield::Bitfield;
pub use inbox::Inbox;
pub use message::{BlockInfo, PeerMessage};
pub use outbox::{Outbox, Outgoing};
pub use protocol::{Handshake, HANDSHAKE_LEN};
pub use session::{Session, SessionConfig, SessionEvent};
pub use transport::{connect, Transport};

// Peer connection states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerState {
    /// Whether we are choking the peer
    pub am_choking: bool,
    /// Whether we are interested in the peer
    pub am_interested: bool,
    /// Whether the peer is choking us
    pub peer_choking: bool,
    /// Whether the peer is interested in us
    pub peer_interested: bool,
}

impl Default for PeerState {
    fn default() -> Self {
        Self {
            am_choking: true,
            am_interested: false,
            peer_choking: true,
            peer_interested: false,
        }
    }
}
