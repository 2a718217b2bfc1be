use super::{Peer, TrackerEvent, TrackerRequest, TrackerResponse};
use crate::error::{BittorrentError, Result};
use bytes::{Buf, BufMut, BytesMut};
use rand::Rng;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{lookup_host, UdpSocket};
use tokio::time::timeout;
use tracing::debug;

const PROTOCOL_ID: u64 = 0x41727101980;
const ACTION_CONNECT: u32 = 0;
const ACTION_ANNOUNCE: u32 = 1;
const ACTION_ERROR: u32 = 3;
const UDP_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_RETRIES: u32 = 3;

/// Announce client for the UDP tracker protocol (connect, then announce)
pub struct UdpTracker {
    socket: UdpSocket,
    addr: SocketAddr,
    connection_id: u64,
}

fn tracker_error(msg: &str) -> BittorrentError {
    BittorrentError::TrackerError(msg.to_string())
}

impl UdpTracker {
    pub async fn connect(url: &url::Url) -> Result<Self> {
        let host = url
            .host_str()
            .ok_or_else(|| tracker_error("UDP tracker URL has no host"))?;
        let port = url
            .port()
            .ok_or_else(|| tracker_error("UDP tracker URL has no port"))?;

        let addr = lookup_host((host, port))
            .await?
            .next()
            .ok_or_else(|| tracker_error("UDP tracker host did not resolve"))?;

        let bind = if addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind).await?;
        socket.connect(addr).await?;

        let transaction_id: u32 = rand::thread_rng().gen();
        let mut request = BytesMut::with_capacity(16);
        request.put_u64(PROTOCOL_ID);
        request.put_u32(ACTION_CONNECT);
        request.put_u32(transaction_id);

        let response = send_and_receive(&socket, &request, 16).await?;
        let mut response = &response[..];

        let action = response.get_u32();
        let resp_tid = response.get_u32();
        if action != ACTION_CONNECT || resp_tid != transaction_id {
            return Err(tracker_error("UDP connect response mismatch"));
        }
        let connection_id = response.get_u64();

        debug!("UDP tracker {} connected", addr);

        Ok(Self {
            socket,
            addr,
            connection_id,
        })
    }

    pub async fn announce(&mut self, request: &TrackerRequest) -> Result<TrackerResponse> {
        let (transaction_id, key): (u32, u32) = {
            let mut rng = rand::thread_rng();
            (rng.gen(), rng.gen())
        };

        let mut packet = BytesMut::with_capacity(98);
        packet.put_u64(self.connection_id);
        packet.put_u32(ACTION_ANNOUNCE);
        packet.put_u32(transaction_id);
        packet.put_slice(&request.info_hash);
        packet.put_slice(&request.peer_id);
        packet.put_u64(request.downloaded);
        packet.put_u64(request.left);
        packet.put_u64(request.uploaded);
        packet.put_u32(request.event.map_or(0, |e: TrackerEvent| e.as_udp_id()));
        packet.put_u32(0); // IP address (0 = sender address)
        packet.put_u32(key);
        packet.put_i32(-1); // num_want (-1 = tracker default)
        packet.put_u16(request.port);

        let response = send_and_receive(&self.socket, &packet, 8).await?;
        let mut body = &response[..];

        let action = body.get_u32();
        let resp_tid = body.get_u32();

        if action == ACTION_ERROR {
            return Err(BittorrentError::TrackerError(
                String::from_utf8_lossy(body).to_string(),
            ));
        }

        if action != ACTION_ANNOUNCE || resp_tid != transaction_id || body.len() < 12 {
            return Err(tracker_error("UDP announce response mismatch"));
        }

        let interval = body.get_u32() as u64;
        let leechers = body.get_u32() as u64;
        let seeders = body.get_u32() as u64;
        let peers = Peer::from_compact_list(body);

        debug!("UDP tracker {} returned {} peers", self.addr, peers.len());

        Ok(TrackerResponse {
            interval,
            min_interval: None,
            tracker_id: None,
            complete: Some(seeders),
            incomplete: Some(leechers),
            peers,
        })
    }
}

/// Send a datagram and wait for the answer, doubling the wait on each retry
async fn send_and_receive(
    socket: &UdpSocket,
    request: &[u8],
    min_response_size: usize,
) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; 2048];

    for attempt in 0..MAX_RETRIES {
        socket.send(request).await?;

        match timeout(UDP_TIMEOUT * (1 << attempt), socket.recv(&mut buf)).await {
            Ok(Ok(n)) if n >= min_response_size => return Ok(buf[..n].to_vec()),
            Ok(Ok(_)) => return Err(tracker_error("UDP tracker response too short")),
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => continue,
        }
    }

    Err(tracker_error("UDP tracker timed out"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONNECTION_ID: u64 = 0x0123_4567_89AB_CDEF;

    /// Loopback tracker answering one connect and, optionally, one announce
    async fn fake_tracker<F>(tid_offset: u32, announce_reply: F) -> url::Url
    where
        F: FnOnce(u32, &[u8]) -> Vec<u8> + Send + 'static,
    {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let url = url::Url::parse(&format!("udp://{}", socket.local_addr().unwrap())).unwrap();

        tokio::spawn(async move {
            let mut buf = [0u8; 2048];
            let (n, from) = socket.recv_from(&mut buf).await.unwrap();
            let mut connect = &buf[..n];
            assert_eq!(connect.get_u64(), PROTOCOL_ID);
            assert_eq!(connect.get_u32(), ACTION_CONNECT);
            let tid = connect.get_u32();

            let mut reply = BytesMut::new();
            reply.put_u32(ACTION_CONNECT);
            reply.put_u32(tid.wrapping_add(tid_offset));
            reply.put_u64(CONNECTION_ID);
            socket.send_to(&reply, from).await.unwrap();

            let Ok((n, from)) = socket.recv_from(&mut buf).await else {
                return;
            };
            let mut announce = &buf[..n];
            assert_eq!(n, 98);
            assert_eq!(announce.get_u64(), CONNECTION_ID);
            assert_eq!(announce.get_u32(), ACTION_ANNOUNCE);
            let tid = announce.get_u32();
            socket
                .send_to(&announce_reply(tid, &buf[..n]), from)
                .await
                .unwrap();
        });

        url
    }

    fn request() -> TrackerRequest {
        let mut request = TrackerRequest::new([0xAA; 20], [0xBB; 20], 6881, 1000);
        request.event = Some(TrackerEvent::Started);
        request
    }

    #[tokio::test]
    async fn test_connect_then_announce() {
        let url = fake_tracker(0, |tid, packet| {
            assert_eq!(&packet[16..36], &[0xAA; 20]);
            assert_eq!(&packet[36..56], &[0xBB; 20]);
            assert_eq!(&packet[64..72], &1000u64.to_be_bytes());
            assert_eq!(&packet[80..84], &TrackerEvent::Started.as_udp_id().to_be_bytes());
            assert_eq!(&packet[96..98], &6881u16.to_be_bytes());

            let mut reply = BytesMut::new();
            reply.put_u32(ACTION_ANNOUNCE);
            reply.put_u32(tid);
            reply.put_u32(1800);
            reply.put_u32(2);
            reply.put_u32(5);
            reply.put_slice(&[10, 0, 0, 1, 0x1A, 0xE1, 192, 168, 1, 2, 0x1A, 0xE2]);
            reply.to_vec()
        })
        .await;

        let mut tracker = UdpTracker::connect(&url).await.unwrap();
        let response = tracker.announce(&request()).await.unwrap();

        assert_eq!(response.interval, 1800);
        assert_eq!(response.incomplete, Some(2));
        assert_eq!(response.complete, Some(5));
        let addrs: Vec<SocketAddr> = response.peers.iter().map(|p| p.addr).collect();
        assert_eq!(
            addrs,
            vec![
                "10.0.0.1:6881".parse::<SocketAddr>().unwrap(),
                "192.168.1.2:6882".parse().unwrap(),
            ]
        );
    }

    #[tokio::test]
    async fn test_error_action_is_reported() {
        let url = fake_tracker(0, |tid, _| {
            let mut reply = BytesMut::new();
            reply.put_u32(ACTION_ERROR);
            reply.put_u32(tid);
            reply.put_slice(b"torrent not registered");
            reply.to_vec()
        })
        .await;

        let mut tracker = UdpTracker::connect(&url).await.unwrap();
        match tracker.announce(&request()).await {
            Err(BittorrentError::TrackerError(msg)) => assert_eq!(msg, "torrent not registered"),
            other => panic!("expected tracker error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connect_transaction_mismatch_is_rejected() {
        let url = fake_tracker(1, |_, _| Vec::new()).await;

        assert!(matches!(
            UdpTracker::connect(&url).await,
            Err(BittorrentError::TrackerError(_))
        ));
    }

    #[tokio::test]
    async fn test_announce_transaction_mismatch_is_rejected() {
        let url = fake_tracker(0, |tid, _| {
            let mut reply = BytesMut::new();
            reply.put_u32(ACTION_ANNOUNCE);
            reply.put_u32(tid.wrapping_add(1));
            reply.put_u32(1800);
            reply.put_u32(0);
            reply.put_u32(0);
            reply.to_vec()
        })
        .await;

        let mut tracker = UdpTracker::connect(&url).await.unwrap();
        assert!(matches!(
            tracker.announce(&request()).await,
            Err(BittorrentError::TrackerError(_))
        ));
    }
}
