use super::{ClientConfig, Connector};
use crate::error::Result;
use crate::peer::{Session, SessionConfig, SessionEvent};
use crate::piece::{Scheduler, SchedulerEvent};
use crate::storage::Assembler;
use crate::swarm::{PeerKey, Swarm};
use crate::torrent::Metainfo;
use crate::tracker::{TrackerClient, TrackerEvent, TrackerRequest};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Single-threaded poll loop driving every session and the scheduler
pub struct Engine<'a, A> {
    config: &'a ClientConfig,
    metainfo: &'a Metainfo,
    assembler: &'a A,
    scheduler: Scheduler,
    swarm: Swarm<TcpStream>,
    session_config: Arc<SessionConfig>,
    connector: Connector,
    tracker: TrackerClient,
    /// Addresses learned from trackers and not yet tried
    candidates: VecDeque<SocketAddr>,
    last_announce: Option<Instant>,
    announce_interval: Duration,
}

impl<'a, A: Assembler> Engine<'a, A> {
    pub fn new(
        config: &'a ClientConfig,
        metainfo: &'a Metainfo,
        assembler: &'a A,
        scheduler: Scheduler,
    ) -> Self {
        let session_config = Arc::new(SessionConfig {
            info_hash: metainfo.info_hash,
            peer_id: config.peer_id,
            num_pieces: metainfo.info.piece_count(),
            keep_alive_interval: config.keep_alive_interval(),
            peer_timeout: config.peer_timeout(),
        });

        Self {
            config,
            metainfo,
            assembler,
            scheduler,
            swarm: Swarm::new(metainfo.info.piece_count()),
            session_config,
            connector: Connector::new(config.connect_workers, config.connect_timeout()),
            tracker: TrackerClient::new(),
            candidates: VecDeque::new(),
            last_announce: None,
            announce_interval: config.announce_interval_floor(),
        }
    }

    /// Run until every piece is verified and written.
    /// Only storage failures end the loop early.
    pub async fn run(mut self) -> Result<Scheduler> {
        self.announce(Some(TrackerEvent::Started)).await;

        while !self.scheduler.is_complete() {
            let now = Instant::now();

            self.connect_more();
            let mut busy = self.accept_connections(now);
            busy |= self.poll_sessions(now).await?;

            let expired = self.scheduler.expire(&mut self.swarm, now);
            self.handle_scheduler_events(expired).await?;
            self.scheduler.schedule(&mut self.swarm, now);

            if self.starved(now) {
                info!("No peers left, asking the trackers again");
                self.announce(None).await;
            }

            if busy {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(self.config.idle_sleep()).await;
            }
        }

        info!(
            "Download complete: {} ({} bytes)",
            self.metainfo.info.name,
            self.scheduler.total_length()
        );
        self.announce(Some(TrackerEvent::Completed)).await;

        Ok(self.scheduler)
    }

    async fn announce(&mut self, event: Option<TrackerEvent>) {
        let mut request = TrackerRequest::new(
            self.metainfo.info_hash,
            self.config.peer_id,
            self.config.listen_port,
            self.scheduler.left(),
        );
        request.downloaded = self.scheduler.downloaded_bytes();
        request.event = event;

        self.last_announce = Some(Instant::now());
        let trackers = self.metainfo.trackers();

        match self.tracker.announce_any(&trackers, &request).await {
            Ok(response) => {
                info!("Tracker returned {} peers", response.peers.len());
                self.announce_interval = self
                    .config
                    .announce_interval_floor()
                    .max(Duration::from_secs(response.interval));

                for peer in response.peers {
                    self.add_candidate(peer.addr);
                }
            }
            Err(e) => warn!("Announce failed: {}", e),
        }
    }

    fn add_candidate(&mut self, addr: SocketAddr) {
        if self.swarm.contains_addr(addr)
            || self.connector.is_pending(&addr)
            || self.candidates.contains(&addr)
        {
            return;
        }
        self.candidates.push_back(addr);
    }

    /// Nothing connected, nothing connecting and nobody left to try
    fn starved(&self, now: Instant) -> bool {
        let due = self
            .last_announce
            .map_or(true, |at| now.saturating_duration_since(at) >= self.announce_interval);

        due && self.swarm.is_empty() && self.connector.pending() == 0 && self.candidates.is_empty()
    }

    fn connect_more(&mut self) {
        while self.swarm.len() + self.connector.pending() < self.config.max_peers {
            let Some(addr) = self.candidates.pop_front() else {
                break;
            };
            self.connector.spawn(addr);
        }
    }

    fn accept_connections(&mut self, now: Instant) -> bool {
        let mut accepted = false;

        while let Some((addr, result)) = self.connector.try_recv() {
            match result {
                Ok(stream) => {
                    let session = Session::new(addr, stream, self.session_config.clone(), now);
                    let key = self.swarm.insert(session);
                    debug!("Connected to {} as {}", addr, key);
                    accepted = true;
                }
                Err(e) => debug!("Could not connect to {}: {}", addr, e),
            }
        }

        accepted
    }

    /// Poll every session once and dispatch what it produced
    async fn poll_sessions(&mut self, now: Instant) -> Result<bool> {
        let mut busy = false;

        for key in self.swarm.keys() {
            let Some(peer) = self.swarm.get_mut(key) else {
                continue;
            };

            match peer.session.poll(now) {
                Ok(Some(event)) => {
                    busy = true;
                    self.dispatch(key, event).await?;
                }
                Ok(None) => busy |= peer.session.did_io(),
                Err(e) => {
                    let addr = peer.addr();
                    if e.is_peer_local() {
                        info!("Dropping peer {}: {}", addr, e);
                    } else {
                        warn!("Dropping peer {}: {}", addr, e);
                    }
                    self.drop_peer(key);
                }
            }
        }

        Ok(busy)
    }

    async fn dispatch(&mut self, key: PeerKey, event: SessionEvent) -> Result<()> {
        match event {
            SessionEvent::Handshaked { peer_id } => {
                debug!("Peer {} identifies as {}", key, hex::encode(peer_id));
            }
            SessionEvent::Bitfield(_) | SessionEvent::Have(_) => self.swarm.apply(key, &event),
            SessionEvent::Piece {
                piece_index,
                offset,
                data,
            } => {
                let events =
                    self.scheduler
                        .block_received(&mut self.swarm, key, piece_index, offset, data);
                self.handle_scheduler_events(events).await?;
            }
            SessionEvent::Request(block) => {
                debug!("Peer {} requested {:?}; uploads are not served", key, block);
            }
            SessionEvent::Choke => debug!("Peer {} choked us", key),
            SessionEvent::Unchoke => debug!("Peer {} unchoked us", key),
            SessionEvent::KeepAlive
            | SessionEvent::Interested
            | SessionEvent::NotInterested
            | SessionEvent::Cancel(_) => {}
        }
        Ok(())
    }

    async fn handle_scheduler_events(&mut self, events: Vec<SchedulerEvent>) -> Result<()> {
        for event in events {
            match event {
                SchedulerEvent::PieceComplete {
                    index,
                    offset,
                    data,
                } => {
                    self.assembler.write_at(offset, &data).await?;
                    debug!("Piece {} written at offset {}", index, offset);
                }
                SchedulerEvent::PieceReverted { index } => {
                    debug!("Piece {} queued for download again", index);
                }
                SchedulerEvent::Cancel { peer, block } => self.swarm.send_cancel(peer, block),
            }
        }
        Ok(())
    }

    fn drop_peer(&mut self, key: PeerKey) {
        self.scheduler.peer_disconnected(key);
        self.swarm.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::{Bitfield, Handshake, PeerMessage};
    use crate::piece::SchedulerConfig;
    use crate::storage::StorageManager;
    use crate::torrent::{FileInfo, PieceHash, Pieces, TorrentInfo};
    use bytes::Bytes;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const INFO_HASH: [u8; 20] = [5; 20];

    /// Minimal seeder: handshake, advertise everything, unchoke, serve requests
    async fn seed(listener: TcpListener, content: Vec<u8>, piece_len: usize) {
        let (mut sock, _) = listener.accept().await.unwrap();

        let mut handshake = [0u8; 68];
        sock.read_exact(&mut handshake).await.unwrap();
        assert_eq!(&handshake[28..48], &INFO_HASH);
        sock.write_all(&Handshake::new(INFO_HASH, *b"-XX0001-seedseedseed").to_bytes())
            .await
            .unwrap();

        let num_pieces = content.len().div_ceil(piece_len);
        let mut bits = Bitfield::new(num_pieces);
        for index in 0..num_pieces {
            bits.set(index);
        }
        let bitfield = PeerMessage::Bitfield {
            bitfield: Bytes::from(bits.to_payload()),
        };
        sock.write_all(&bitfield.to_bytes()).await.unwrap();
        sock.write_all(&PeerMessage::Unchoke.to_bytes()).await.unwrap();

        loop {
            let mut len = [0u8; 4];
            if sock.read_exact(&mut len).await.is_err() {
                return;
            }
            let mut body = vec![0u8; u32::from_be_bytes(len) as usize];
            if sock.read_exact(&mut body).await.is_err() {
                return;
            }

            if let Ok(PeerMessage::Request { block }) = PeerMessage::from_frame(Bytes::from(body)) {
                let start = block.piece_index as usize * piece_len + block.offset as usize;
                let end = start + block.length as usize;
                let reply = PeerMessage::Piece {
                    piece_index: block.piece_index,
                    offset: block.offset,
                    data: Bytes::copy_from_slice(&content[start..end]),
                };
                if sock.write_all(&reply.to_bytes()).await.is_err() {
                    return;
                }
            }
        }
    }

    #[tokio::test]
    async fn test_downloads_from_local_seeder() {
        let piece_len = 32 * 1024;
        let content: Vec<u8> = (0..100_000u32).map(|i| (i % 241) as u8).collect();
        let pieces: Pieces = content.chunks(piece_len).map(PieceHash::of).collect();

        let metainfo = Metainfo {
            announce: Some("http://127.0.0.1:1/announce".to_string()),
            announce_list: None,
            info: TorrentInfo {
                name: "payload.bin".to_string(),
                piece_length: piece_len as u64,
                pieces,
                files: vec![FileInfo {
                    path: vec!["payload.bin".to_string()],
                    length: content.len() as u64,
                }],
                total_length: content.len() as u64,
                multi_file: false,
            },
            info_hash: INFO_HASH,
        };

        let dir = TempDir::new().unwrap();
        let config = ClientConfig {
            download_dir: dir.path().to_path_buf(),
            idle_sleep_ms: 1,
            ..ClientConfig::default()
        };
        let storage = StorageManager::new(&config.download_dir, &metainfo.info);
        storage.preallocate().await.unwrap();
        let scheduler = Scheduler::new(SchedulerConfig::default(), &metainfo.info).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(seed(listener, content.clone(), piece_len));

        let mut engine = Engine::new(&config, &metainfo, &storage, scheduler);
        engine.add_candidate(addr);
        let scheduler = tokio::time::timeout(Duration::from_secs(30), engine.run())
            .await
            .unwrap()
            .unwrap();

        assert!(scheduler.is_complete());
        assert_eq!(scheduler.downloaded_bytes(), content.len() as u64);
        let written = tokio::fs::read(dir.path().join("payload.bin")).await.unwrap();
        assert_eq!(written, content);
    }
}
