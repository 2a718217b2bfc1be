use super::{
    Bitfield, BlockInfo, Handshake, Inbox, Outbox, Outgoing, PeerMessage, PeerState, Transport,
    HANDSHAKE_LEN,
};
use crate::error::{BittorrentError, Result};
use bytes::Bytes;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Largest single read attempt
const READ_CHUNK: usize = 16 * 1024;

/// Parameters shared by every session of one download
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
    pub num_pieces: usize,
    /// Queue a keep-alive after this long without sending anything
    pub keep_alive_interval: Duration,
    /// Close the session after this long without receiving anything
    pub peer_timeout: Duration,
}

/// Typed events produced by a session from the peer's byte stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Handshaked { peer_id: [u8; 20] },
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have(u32),
    Bitfield(Bitfield),
    Request(BlockInfo),
    Piece {
        piece_index: u32,
        offset: u32,
        data: Bytes,
    },
    Cancel(BlockInfo),
}

/// Wire protocol session with one remote peer.
///
/// Owns the transport and both buffers. `poll` never blocks: it makes one
/// write attempt, one read attempt and extracts at most one complete
/// handshake or message. Any error is fatal to this session only.
pub struct Session<T> {
    addr: SocketAddr,
    transport: T,
    config: Arc<SessionConfig>,
    inbox: Inbox,
    outbox: Outbox,
    state: PeerState,
    handshaked: bool,
    remote_id: Option<[u8; 20]>,
    last_send: Instant,
    last_recv: Instant,
    io_bytes: usize,
}

impl<T: Transport> Session<T> {
    /// Wrap a connected transport; our handshake is queued immediately
    pub fn new(addr: SocketAddr, transport: T, config: Arc<SessionConfig>, now: Instant) -> Self {
        let mut outbox = Outbox::new();
        let handshake = Handshake::new(config.info_hash, config.peer_id);
        outbox.push_message(Bytes::from(handshake.to_bytes()));

        Self {
            addr,
            transport,
            config,
            inbox: Inbox::new(),
            outbox,
            state: PeerState::default(),
            handshaked: false,
            remote_id: None,
            last_send: now,
            last_recv: now,
            io_bytes: 0,
        }
    }

    /// Drive the session once
    pub fn poll(&mut self, now: Instant) -> Result<Option<SessionEvent>> {
        self.io_bytes = 0;

        self.flush(now)?;
        self.fill(now)?;

        if now.saturating_duration_since(self.last_recv) >= self.config.peer_timeout {
            return Err(BittorrentError::PeerError(format!(
                "{} sent nothing for {:?}",
                self.addr, self.config.peer_timeout
            )));
        }

        if self.handshaked {
            self.read_message()
        } else {
            self.read_handshake()
        }
    }

    fn flush(&mut self, now: Instant) -> Result<()> {
        if self.handshaked
            && self.outbox.is_idle()
            && now.saturating_duration_since(self.last_send) >= self.config.keep_alive_interval
        {
            debug!("Queueing keep-alive for {}", self.addr);
            self.outbox.push_message(PeerMessage::KeepAlive.to_bytes());
        }

        // One message per poll, written in chunks
        while let Some(chunk) = self.outbox.next_chunk(now, self.state.peer_choking) {
            match self.transport.try_write(&chunk) {
                Ok(0) => {
                    return Err(BittorrentError::PeerError(format!(
                        "{} stopped accepting data",
                        self.addr
                    )))
                }
                Ok(n) => {
                    self.last_send = now;
                    self.io_bytes += n;
                    if self.outbox.consume(n) {
                        break;
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(())
    }

    fn fill(&mut self, now: Instant) -> Result<()> {
        let mut buf = [0u8; READ_CHUNK];
        match self.transport.try_read(&mut buf) {
            Ok(0) => Err(BittorrentError::PeerError(format!(
                "{} closed the connection",
                self.addr
            ))),
            Ok(n) => {
                self.inbox.push(&buf[..n]);
                self.last_recv = now;
                self.io_bytes += n;
                Ok(())
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn read_handshake(&mut self) -> Result<Option<SessionEvent>> {
        let Some(first) = self.inbox.first() else {
            return Ok(None);
        };
        Handshake::check_prefix(first)?;

        if self.inbox.len() < HANDSHAKE_LEN {
            return Ok(None);
        }

        let handshake = Handshake::from_bytes(&self.inbox.pull(HANDSHAKE_LEN))?;
        if handshake.info_hash != self.config.info_hash {
            return Err(BittorrentError::ProtocolError(format!(
                "Info hash mismatch from {}",
                self.addr
            )));
        }

        self.handshaked = true;
        self.remote_id = Some(handshake.peer_id);
        info!(
            "Handshake with {} complete (peer id {})",
            self.addr,
            hex::encode(handshake.peer_id)
        );

        Ok(Some(SessionEvent::Handshaked {
            peer_id: handshake.peer_id,
        }))
    }

    fn read_message(&mut self) -> Result<Option<SessionEvent>> {
        let Some(frame) = self.inbox.next_frame()? else {
            return Ok(None);
        };
        let message = PeerMessage::from_frame(frame)?;

        let event = match message {
            PeerMessage::KeepAlive => SessionEvent::KeepAlive,
            PeerMessage::Choke => {
                self.state.peer_choking = true;
                SessionEvent::Choke
            }
            PeerMessage::Unchoke => {
                self.state.peer_choking = false;
                SessionEvent::Unchoke
            }
            PeerMessage::Interested => {
                self.state.peer_interested = true;
                SessionEvent::Interested
            }
            PeerMessage::NotInterested => {
                self.state.peer_interested = false;
                SessionEvent::NotInterested
            }
            PeerMessage::Have { piece_index } => {
                if piece_index as usize >= self.config.num_pieces {
                    return Err(BittorrentError::ProtocolError(format!(
                        "Have for piece {} of a {} piece torrent",
                        piece_index, self.config.num_pieces
                    )));
                }
                SessionEvent::Have(piece_index)
            }
            PeerMessage::Bitfield { bitfield } => SessionEvent::Bitfield(Bitfield::from_payload(
                &bitfield,
                self.config.num_pieces,
            )),
            PeerMessage::Request { block } => SessionEvent::Request(block),
            PeerMessage::Piece {
                piece_index,
                offset,
                data,
            } => SessionEvent::Piece {
                piece_index,
                offset,
                data,
            },
            PeerMessage::Cancel { block } => SessionEvent::Cancel(block),
            PeerMessage::Unknown { id } => {
                debug!("Ignoring message id {} from {}", id, self.addr);
                return Ok(None);
            }
        };

        debug!("Received from {}: {:?}", self.addr, event_name(&event));
        Ok(Some(event))
    }

    /// Queue a message, tracking our side of the choke/interest state
    pub fn send(&mut self, message: PeerMessage) {
        match message {
            PeerMessage::Choke => self.state.am_choking = true,
            PeerMessage::Unchoke => self.state.am_choking = false,
            PeerMessage::Interested => self.state.am_interested = true,
            PeerMessage::NotInterested => self.state.am_interested = false,
            _ => {}
        }
        self.outbox.push_message(message.to_bytes());
    }

    pub fn choke(&mut self) {
        self.send(PeerMessage::Choke);
    }

    pub fn unchoke(&mut self) {
        self.send(PeerMessage::Unchoke);
    }

    pub fn interested(&mut self) {
        self.send(PeerMessage::Interested);
    }

    pub fn not_interested(&mut self) {
        self.send(PeerMessage::NotInterested);
    }

    /// Request a block. The first request to a peer also unchokes it and
    /// declares interest; while the peer chokes us the request is held back.
    pub fn request(&mut self, block: BlockInfo) {
        if !self.state.am_interested {
            self.unchoke();
            self.interested();
        }
        if self.state.peer_choking {
            self.wait_unchoke();
        }
        self.send(PeerMessage::Request { block });
    }

    pub fn cancel(&mut self, block: BlockInfo) {
        self.send(PeerMessage::Cancel { block });
    }

    /// Hold back everything queued after this point for `duration`
    pub fn suspend_for(&mut self, duration: Duration) {
        self.outbox.push(Outgoing::SuspendFor(duration));
    }

    /// Hold back everything queued after this point until we are unchoked
    pub fn wait_unchoke(&mut self) {
        self.outbox.push(Outgoing::SuspendUntilUnchoked);
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn state(&self) -> &PeerState {
        &self.state
    }

    pub fn is_handshaked(&self) -> bool {
        self.handshaked
    }

    pub fn peer_id(&self) -> Option<&[u8; 20]> {
        self.remote_id.as_ref()
    }

    /// Whether the last poll moved any bytes
    pub fn did_io(&self) -> bool {
        self.io_bytes > 0
    }
}

/// Short label for traffic logging; Piece payloads are not worth printing
fn event_name(event: &SessionEvent) -> String {
    match event {
        SessionEvent::Piece {
            piece_index,
            offset,
            data,
        } => format!("Piece({}, {}, {} bytes)", piece_index, offset, data.len()),
        SessionEvent::Bitfield(bits) => format!("Bitfield({} bits)", bits.len()),
        other => format!("{:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::transport::memory::MemoryTransport;

    const INFO_HASH: [u8; 20] = [0xAB; 20];
    const OUR_ID: [u8; 20] = *b"-SF0100-ourpeeridxyz";
    const THEIR_ID: [u8; 20] = *b"-XX0001-theirpeerid0";

    fn session() -> (Session<MemoryTransport>, MemoryTransport, Instant) {
        let config = Arc::new(SessionConfig {
            info_hash: INFO_HASH,
            peer_id: OUR_ID,
            num_pieces: 4,
            keep_alive_interval: Duration::from_secs(100),
            peer_timeout: Duration::from_secs(120),
        });
        let remote = MemoryTransport::new();
        let now = Instant::now();
        let session = Session::new("127.0.0.1:6881".parse().unwrap(), remote.clone(), config, now);
        (session, remote, now)
    }

    fn handshaked() -> (Session<MemoryTransport>, MemoryTransport, Instant) {
        let (mut session, remote, now) = session();
        remote.push_inbound(&Handshake::new(INFO_HASH, THEIR_ID).to_bytes());
        assert!(matches!(
            session.poll(now).unwrap(),
            Some(SessionEvent::Handshaked { .. })
        ));
        remote.take_outbound();
        (session, remote, now)
    }

    #[test]
    fn test_handshake_is_sent_first() {
        let (mut session, remote, now) = session();
        assert_eq!(session.poll(now).unwrap(), None);
        assert_eq!(
            remote.take_outbound(),
            Handshake::new(INFO_HASH, OUR_ID).to_bytes()
        );
        assert!(!session.is_handshaked());
    }

    #[test]
    fn test_handshake_and_bitfield_in_one_read() {
        let (mut session, remote, now) = session();
        let mut bytes = Handshake::new(INFO_HASH, THEIR_ID).to_bytes();
        bytes.extend_from_slice(&[0, 0, 0, 2, 5, 0b1010_0000]);
        remote.push_inbound(&bytes);

        assert_eq!(
            session.poll(now).unwrap(),
            Some(SessionEvent::Handshaked { peer_id: THEIR_ID })
        );
        assert_eq!(session.peer_id(), Some(&THEIR_ID));

        match session.poll(now).unwrap() {
            Some(SessionEvent::Bitfield(bits)) => {
                assert_eq!(bits.len(), 4);
                assert!(bits.has(0) && !bits.has(1) && bits.has(2) && !bits.has(3));
            }
            other => panic!("expected bitfield, got {:?}", other),
        }
    }

    #[test]
    fn test_info_hash_mismatch_closes_before_messages() {
        let (mut session, remote, now) = session();
        let mut bytes = Handshake::new([0x11; 20], THEIR_ID).to_bytes();
        bytes.extend_from_slice(&PeerMessage::Unchoke.to_bytes());
        remote.push_inbound(&bytes);

        assert!(matches!(
            session.poll(now),
            Err(BittorrentError::ProtocolError(_))
        ));
        assert!(session.state().peer_choking);
        assert!(session.peer_id().is_none());
    }

    #[test]
    fn test_bad_protocol_length_fails_on_first_byte() {
        let (mut session, remote, now) = session();
        remote.push_inbound(&[18]);
        assert!(session.poll(now).is_err());
    }

    #[test]
    fn test_choke_with_payload_is_a_violation() {
        let (mut session, remote, now) = handshaked();
        remote.push_inbound(&[0, 0, 0, 2, 0, 1]);
        assert!(matches!(
            session.poll(now),
            Err(BittorrentError::ProtocolError(_))
        ));
    }

    #[test]
    fn test_message_split_across_reads() {
        let (mut session, remote, now) = handshaked();
        remote.push_inbound(&[0, 0, 0, 5, 4, 0]);
        assert_eq!(session.poll(now).unwrap(), None);
        remote.push_inbound(&[0, 0, 3]);
        assert_eq!(session.poll(now).unwrap(), Some(SessionEvent::Have(3)));
    }

    #[test]
    fn test_have_past_last_piece_is_a_violation() {
        let (mut session, remote, now) = handshaked();
        remote.push_inbound(&[0, 0, 0, 5, 4, 0x0B, 0xEB, 0xC2, 0x00]);
        assert!(matches!(
            session.poll(now),
            Err(BittorrentError::ProtocolError(_))
        ));
    }

    #[test]
    fn test_oversized_bitfield_keeps_piece_count() {
        let (mut session, remote, now) = handshaked();
        let payload = vec![0xFFu8; 1 << 20];
        let mut frame = ((payload.len() + 1) as u32).to_be_bytes().to_vec();
        frame.push(5);
        frame.extend_from_slice(&payload);
        remote.push_inbound(&frame);

        let event = loop {
            if let Some(event) = session.poll(now).unwrap() {
                break event;
            }
        };
        match event {
            SessionEvent::Bitfield(bits) => {
                assert_eq!(bits.len(), 4);
                assert_eq!(bits.count(4), 4);
            }
            other => panic!("expected bitfield, got {:?}", other),
        }
    }

    #[test]
    fn test_request_waits_for_unchoke() {
        let (mut session, remote, now) = handshaked();
        let block = BlockInfo::new(0, 0, 16384);
        session.request(block);
        assert!(session.state().am_interested);
        assert!(!session.state().am_choking);

        // Unchoke and Interested go out, the request is held back
        for _ in 0..4 {
            session.poll(now).unwrap();
        }
        let mut expected = PeerMessage::Unchoke.to_bytes().to_vec();
        expected.extend_from_slice(&PeerMessage::Interested.to_bytes());
        assert_eq!(remote.take_outbound(), expected);

        remote.push_inbound(&PeerMessage::Unchoke.to_bytes());
        assert_eq!(session.poll(now).unwrap(), Some(SessionEvent::Unchoke));
        session.poll(now).unwrap();
        assert_eq!(
            remote.take_outbound(),
            PeerMessage::Request { block }.to_bytes().to_vec()
        );
    }

    #[test]
    fn test_commands_track_our_state() {
        let (mut session, remote, now) = handshaked();
        session.interested();
        session.not_interested();
        session.choke();
        assert!(!session.state().am_interested);
        assert!(session.state().am_choking);

        session.suspend_for(Duration::from_secs(5));
        session.unchoke();
        for _ in 0..5 {
            session.poll(now).unwrap();
        }
        let mut expected = PeerMessage::Interested.to_bytes().to_vec();
        expected.extend_from_slice(&PeerMessage::NotInterested.to_bytes());
        expected.extend_from_slice(&PeerMessage::Choke.to_bytes());
        assert_eq!(remote.take_outbound(), expected);

        session.poll(now + Duration::from_secs(5)).unwrap();
        assert_eq!(
            remote.take_outbound(),
            PeerMessage::Unchoke.to_bytes().to_vec()
        );
        assert!(!session.state().am_choking);
    }

    #[test]
    fn test_keep_alive_after_idle_interval() {
        let (mut session, remote, now) = handshaked();
        remote.push_inbound(&PeerMessage::KeepAlive.to_bytes());
        let later = now + Duration::from_secs(101);
        assert_eq!(session.poll(later).unwrap(), Some(SessionEvent::KeepAlive));
        assert_eq!(remote.take_outbound(), vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_silent_peer_times_out() {
        let (mut session, _remote, now) = handshaked();
        assert!(session.poll(now + Duration::from_secs(121)).is_err());
    }

    #[test]
    fn test_remote_close_is_an_error() {
        let (mut session, remote, now) = handshaked();
        remote.close_remote();
        assert!(matches!(
            session.poll(now),
            Err(BittorrentError::PeerError(_))
        ));
    }

    #[test]
    fn test_write_failure_is_an_error() {
        let (mut session, remote, now) = handshaked();
        remote.break_pipe();
        session.interested();
        assert!(session.poll(now).is_err());
    }

    #[test]
    fn test_unknown_message_is_skipped() {
        let (mut session, remote, now) = handshaked();
        remote.push_inbound(&[0, 0, 0, 3, 9, 0x1A, 0xE1]);
        assert_eq!(session.poll(now).unwrap(), None);
        remote.push_inbound(&PeerMessage::Interested.to_bytes());
        assert_eq!(session.poll(now).unwrap(), Some(SessionEvent::Interested));
        assert!(session.state().peer_interested);
    }
}
