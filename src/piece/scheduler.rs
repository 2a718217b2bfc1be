use super::{BlockStatus, Piece, PieceStatus, BLOCK_SIZE};
use crate::error::{BittorrentError, Result};
use crate::peer::{BlockInfo, Transport};
use crate::swarm::{PeerKey, Swarm};
use crate::torrent::TorrentInfo;
use bytes::Bytes;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Concurrency limits and timeouts for block scheduling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Pieces downloading at the same time
    pub max_active_pieces: usize,
    /// Outstanding requests per downloading piece, outside endgame
    pub max_active_blocks_per_piece: usize,
    /// Outstanding requests per peer
    pub max_requests_per_peer: usize,
    pub request_timeout_secs: u64,
    pub block_size: u32,
}

impl SchedulerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_active_pieces: 16,
            max_active_blocks_per_piece: 16,
            max_requests_per_peer: 4,
            request_timeout_secs: 60,
            block_size: BLOCK_SIZE,
        }
    }
}

/// One outstanding block request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    pub peer: PeerKey,
    pub piece: usize,
    pub block: usize,
    pub issued: Instant,
}

/// Notifications for the poll loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// A piece passed verification; `offset` is its absolute byte offset
    PieceComplete { index: usize, offset: u64, data: Bytes },
    /// A piece failed verification and was discarded
    PieceReverted { index: usize },
    /// A request was dropped; the peer may be sent a Cancel
    Cancel { peer: PeerKey, block: BlockInfo },
}

/// Decides which block to request from which peer.
///
/// Sole owner of piece, block and request state. Every mutation happens
/// through `schedule`, `block_received`, `expire`, `peer_disconnected`
/// and `restore`, all called from the poll loop.
pub struct Scheduler {
    config: SchedulerConfig,
    pieces: Vec<Piece>,
    piece_length: u64,
    total_length: u64,
    requests: Vec<Request>,
    /// (peer, piece, block) of every outstanding request
    in_flight: HashSet<(PeerKey, usize, usize)>,
    /// Outstanding requests per piece
    piece_requests: Vec<usize>,
    rng: StdRng,
    downloaded_bytes: u64,
    completed_pieces: usize,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, info: &TorrentInfo) -> Result<Self> {
        if config.block_size == 0 {
            return Err(BittorrentError::ConfigError(
                "Block size must be non-zero".to_string(),
            ));
        }
        if config.max_requests_per_peer == 0
            || config.max_active_pieces == 0
            || config.max_active_blocks_per_piece == 0
        {
            return Err(BittorrentError::ConfigError(
                "Request and piece limits must be non-zero".to_string(),
            ));
        }

        let mut pieces = Vec::with_capacity(info.piece_count());
        for (index, hash) in info.pieces.iter().enumerate() {
            let length = u32::try_from(info.piece_len(index)).map_err(|_| {
                BittorrentError::InvalidTorrent(format!("Piece {} is too large", index))
            })?;
            pieces.push(Piece::new(index, *hash, length));
        }

        Ok(Self {
            config,
            pieces,
            piece_length: info.piece_length,
            total_length: info.total_length,
            requests: Vec::new(),
            in_flight: HashSet::new(),
            piece_requests: vec![0; info.piece_count()],
            rng: StdRng::from_entropy(),
            downloaded_bytes: 0,
            completed_pieces: 0,
        })
    }

    /// Allocate pieces and issue block requests through the peers' sessions.
    /// Returns the number of requests issued.
    pub fn schedule<T: Transport>(&mut self, swarm: &mut Swarm<T>, now: Instant) -> usize {
        self.allocate(swarm);

        let endgame = self.in_endgame();
        let max_per_peer = self.config.max_requests_per_peer;
        // Peers that already got a block in this round
        let mut used: HashSet<PeerKey> = HashSet::new();
        let mut issued = 0;

        for piece_index in 0..self.pieces.len() {
            if self.pieces[piece_index].status() != PieceStatus::Downloading {
                continue;
            }

            for block_index in 0..self.pieces[piece_index].blocks().len() {
                if !endgame
                    && self.requests_for_piece(piece_index)
                        >= self.config.max_active_blocks_per_piece
                {
                    break;
                }

                match self.pieces[piece_index].blocks()[block_index].status {
                    BlockStatus::Filled => continue,
                    BlockStatus::Requested if !endgame => continue,
                    _ => {}
                }

                let candidates: Vec<PeerKey> = swarm
                    .iter()
                    .filter(|(key, peer)| {
                        peer.bitfield.has(piece_index)
                            && peer.active_requests < max_per_peer
                            && !self.is_requested_from(*key, piece_index, block_index)
                    })
                    .map(|(key, _)| key)
                    .collect();

                // Endgame sends the block to everyone who has it
                let targets = if endgame {
                    candidates
                } else {
                    let fresh: Vec<PeerKey> = candidates
                        .iter()
                        .copied()
                        .filter(|key| !used.contains(key))
                        .collect();
                    let pool = if fresh.is_empty() { &candidates } else { &fresh };
                    match pool.choose(&mut self.rng) {
                        Some(&peer) => vec![peer],
                        None => continue,
                    }
                };

                for peer in targets {
                    self.issue(swarm, peer, piece_index, block_index, now);
                    used.insert(peer);
                    issued += 1;
                }
            }
        }

        if issued > 0 {
            debug!(
                "Issued {} requests ({} outstanding{})",
                issued,
                self.requests.len(),
                if endgame { ", endgame" } else { "" }
            );
        }
        issued
    }

    /// Move Empty pieces to Downloading, lowest index first, while below the
    /// active-piece cap and some peer with spare capacity advertises them.
    fn allocate<T: Transport>(&mut self, swarm: &Swarm<T>) {
        let mut active = self.active_pieces();
        let block_size = self.config.block_size;
        let max_per_peer = self.config.max_requests_per_peer;

        for piece in &mut self.pieces {
            if active >= self.config.max_active_pieces {
                break;
            }
            if piece.status() != PieceStatus::Empty {
                continue;
            }

            let available = swarm.iter().any(|(_, peer)| {
                peer.bitfield.has(piece.index) && peer.active_requests < max_per_peer
            });
            if available {
                piece.prepare(block_size);
                active += 1;
                debug!(
                    "Allocated piece {} ({} blocks)",
                    piece.index,
                    piece.blocks().len()
                );
            }
        }
    }

    fn issue<T: Transport>(
        &mut self,
        swarm: &mut Swarm<T>,
        peer: PeerKey,
        piece_index: usize,
        block_index: usize,
        now: Instant,
    ) {
        let Some(block) = self.pieces[piece_index].block_mut(block_index) else {
            return;
        };
        let info = BlockInfo::new(piece_index as u32, block.offset, block.length);

        if !swarm.send_request(peer, info) {
            return;
        }
        block.status = BlockStatus::Requested;
        self.track(Request {
            peer,
            piece: piece_index,
            block: block_index,
            issued: now,
        });
    }

    fn track(&mut self, request: Request) {
        self.in_flight
            .insert((request.peer, request.piece, request.block));
        self.piece_requests[request.piece] += 1;
        self.requests.push(request);
    }

    /// Forget a request already taken out of `requests`
    fn untrack(&mut self, request: &Request) {
        self.in_flight
            .remove(&(request.peer, request.piece, request.block));
        self.piece_requests[request.piece] = self.piece_requests[request.piece].saturating_sub(1);
    }

    /// Handle a Piece message. Fills the block, cancels duplicate requests
    /// and verifies the piece once every block is filled.
    pub fn block_received<T: Transport>(
        &mut self,
        swarm: &mut Swarm<T>,
        peer: PeerKey,
        piece_index: u32,
        offset: u32,
        data: Bytes,
    ) -> Vec<SchedulerEvent> {
        let index = piece_index as usize;
        let block_size = self.config.block_size;

        let Some(piece) = self.pieces.get(index) else {
            debug!("Peer {} sent block for unknown piece {}", peer, index);
            return Vec::new();
        };
        if piece.status() != PieceStatus::Downloading {
            debug!("Dropping block for piece {} which is not downloading", index);
            return Vec::new();
        }
        let Some(block_index) = piece.block_at(offset, block_size) else {
            debug!(
                "Peer {} sent piece {} at unaligned offset {}",
                peer, index, offset
            );
            return Vec::new();
        };
        let block = &piece.blocks()[block_index];
        let expected_len = block.length;
        let already_filled = block.status == BlockStatus::Filled;

        // This peer's request for the block is answered either way
        if self.in_flight.contains(&(peer, index, block_index)) {
            if let Some(pos) = self
                .requests
                .iter()
                .position(|r| r.peer == peer && r.piece == index && r.block == block_index)
            {
                let request = self.requests.swap_remove(pos);
                self.untrack(&request);
                swarm.release_request(peer);
            }
        }

        if already_filled {
            debug!("Duplicate block {}:{} from {}", index, offset, peer);
            return Vec::new();
        }

        if data.len() != expected_len as usize {
            warn!(
                "Peer {} sent {} bytes for block {}:{}, expected {}",
                peer,
                data.len(),
                index,
                offset,
                expected_len
            );
            self.reset_if_unrequested(index, block_index);
            return Vec::new();
        }

        let mut events = Vec::new();
        if let Some(block) = self.pieces[index].block_mut(block_index) {
            block.fill(data);
        }

        // Endgame duplicates still in flight for this block
        let info = BlockInfo::new(piece_index, offset, expected_len);
        let mut i = 0;
        while self.piece_requests[index] > 0 && i < self.requests.len() {
            let r = self.requests[i];
            if r.piece == index && r.block == block_index {
                self.requests.swap_remove(i);
                self.untrack(&r);
                swarm.release_request(r.peer);
                events.push(SchedulerEvent::Cancel {
                    peer: r.peer,
                    block: info,
                });
            } else {
                i += 1;
            }
        }

        if self.pieces[index].is_filled() {
            events.push(self.verify(index));
        }

        events
    }

    fn verify(&mut self, index: usize) -> SchedulerEvent {
        let piece = &mut self.pieces[index];
        let data = piece.assemble();

        if !piece.verify(&data) {
            warn!("Piece {} failed verification, discarding", index);
            piece.reset();
            return SchedulerEvent::PieceReverted { index };
        }

        piece.complete();
        self.completed_pieces += 1;
        self.downloaded_bytes += data.len() as u64;
        info!(
            "Piece {} verified ({}/{} pieces, {}/{} bytes)",
            index,
            self.completed_pieces,
            self.pieces.len(),
            self.downloaded_bytes,
            self.total_length
        );

        SchedulerEvent::PieceComplete {
            index,
            offset: index as u64 * self.piece_length,
            data,
        }
    }

    /// Cancel requests older than the request timeout
    pub fn expire<T: Transport>(&mut self, swarm: &mut Swarm<T>, now: Instant) -> Vec<SchedulerEvent> {
        let timeout = self.config.request_timeout();
        let (expired, live): (Vec<Request>, Vec<Request>) = self
            .requests
            .drain(..)
            .partition(|r| now.saturating_duration_since(r.issued) >= timeout);
        self.requests = live;

        let mut events = Vec::with_capacity(expired.len());
        for request in expired {
            self.untrack(&request);
            swarm.release_request(request.peer);
            self.reset_if_unrequested(request.piece, request.block);

            if let Some(block) = self.pieces[request.piece].blocks().get(request.block) {
                debug!(
                    "Request {}:{} to {} timed out",
                    request.piece, block.offset, request.peer
                );
                events.push(SchedulerEvent::Cancel {
                    peer: request.peer,
                    block: BlockInfo::new(request.piece as u32, block.offset, block.length),
                });
            }
        }

        if !events.is_empty() {
            warn!("{} requests timed out", events.len());
        }
        events
    }

    /// Roll back every request of a peer that left the swarm.
    /// Returns how many were outstanding.
    pub fn peer_disconnected(&mut self, peer: PeerKey) -> usize {
        let (dropped, live): (Vec<Request>, Vec<Request>) =
            self.requests.drain(..).partition(|r| r.peer == peer);
        self.requests = live;

        for request in &dropped {
            self.untrack(request);
            self.reset_if_unrequested(request.piece, request.block);
        }
        if !dropped.is_empty() {
            debug!("Rolled back {} requests of {}", dropped.len(), peer);
        }
        dropped.len()
    }

    /// Mark a piece as already present, e.g. verified from disk on resume
    pub fn restore(&mut self, index: usize) {
        let Some(piece) = self.pieces.get_mut(index) else {
            return;
        };
        if piece.status() == PieceStatus::Complete {
            return;
        }

        piece.complete();
        self.completed_pieces += 1;
        self.downloaded_bytes += piece.length as u64;
    }

    fn reset_if_unrequested(&mut self, piece: usize, block: usize) {
        if self.piece_requests[piece] > 0
            && self.requests.iter().any(|r| r.piece == piece && r.block == block)
        {
            return;
        }
        if let Some(block) = self.pieces[piece].block_mut(block) {
            if block.status == BlockStatus::Requested {
                block.status = BlockStatus::Empty;
            }
        }
    }

    fn is_requested_from(&self, peer: PeerKey, piece: usize, block: usize) -> bool {
        self.in_flight.contains(&(peer, piece, block))
    }

    fn requests_for_piece(&self, piece: usize) -> usize {
        self.piece_requests[piece]
    }

    /// No piece is left unallocated
    pub fn in_endgame(&self) -> bool {
        !self.pieces.iter().any(|p| p.status() == PieceStatus::Empty)
    }

    pub fn active_pieces(&self) -> usize {
        self.pieces
            .iter()
            .filter(|p| p.status() == PieceStatus::Downloading)
            .count()
    }

    pub fn requests(&self) -> &[Request] {
        &self.requests
    }

    pub fn piece(&self, index: usize) -> Option<&Piece> {
        self.pieces.get(index)
    }

    pub fn piece_count(&self) -> usize {
        self.pieces.len()
    }

    pub fn completed_pieces(&self) -> usize {
        self.completed_pieces
    }

    pub fn downloaded_bytes(&self) -> u64 {
        self.downloaded_bytes
    }

    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    pub fn left(&self) -> u64 {
        self.total_length.saturating_sub(self.downloaded_bytes)
    }

    pub fn is_complete(&self) -> bool {
        self.completed_pieces == self.pieces.len()
    }

    pub fn progress(&self) -> f64 {
        if self.pieces.is_empty() {
            return 100.0;
        }
        (self.completed_pieces as f64 / self.pieces.len() as f64) * 100.0
    }
}
