use crate::error::Result;
use crate::peer::connect;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Semaphore};

type Connected = (SocketAddr, Result<TcpStream>);

/// Opens peer connections on background tasks.
///
/// At most `workers` connects run at once; finished sockets are handed back
/// over a channel and picked up by the poll loop with `try_recv`.
pub struct Connector {
    tx: mpsc::UnboundedSender<Connected>,
    rx: mpsc::UnboundedReceiver<Connected>,
    permits: Arc<Semaphore>,
    timeout: Duration,
    pending: HashSet<SocketAddr>,
}

impl Connector {
    pub fn new(workers: usize, timeout: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx,
            permits: Arc::new(Semaphore::new(workers.max(1))),
            timeout,
            pending: HashSet::new(),
        }
    }

    /// Start connecting to `addr` unless a connect is already underway
    pub fn spawn(&mut self, addr: SocketAddr) {
        if !self.pending.insert(addr) {
            return;
        }

        let tx = self.tx.clone();
        let permits = self.permits.clone();
        let timeout = self.timeout;

        tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            let result = connect(addr, timeout).await;
            let _ = tx.send((addr, result));
        });
    }

    /// A finished connect, if any
    pub fn try_recv(&mut self) -> Option<Connected> {
        let (addr, result) = self.rx.try_recv().ok()?;
        self.pending.remove(&addr);
        Some((addr, result))
    }

    pub fn is_pending(&self, addr: &SocketAddr) -> bool {
        self.pending.contains(addr)
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}
