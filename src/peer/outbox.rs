use bytes::{Buf, Bytes};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Largest slice handed to a single non-blocking write
pub const SEND_CHUNK: usize = 1024;

/// An entry in the outbound queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    /// A fully encoded handshake or message
    Message(Bytes),
    /// Hold back everything queued after this for the given time
    SuspendFor(Duration),
    /// Hold back everything queued after this until the peer unchokes us
    SuspendUntilUnchoked,
}

/// FIFO of outgoing messages and suspend directives
#[derive(Debug, Default)]
pub struct Outbox {
    queue: VecDeque<Outgoing>,
    /// Unsent remainder of the message currently being written
    current: Option<Bytes>,
    /// Deadline of the `SuspendFor` at the head of the queue, once reached
    suspended_until: Option<Instant>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: Outgoing) {
        self.queue.push_back(item);
    }

    pub fn push_message(&mut self, bytes: Bytes) {
        self.push(Outgoing::Message(bytes));
    }

    /// Nothing queued and nothing half-written
    pub fn is_idle(&self) -> bool {
        self.current.is_none() && self.queue.is_empty()
    }

    /// Resolve directives at the head of the queue and return the next slice
    /// to write, or `None` if the queue is empty or suspended.
    pub fn next_chunk(&mut self, now: Instant, peer_choking: bool) -> Option<Bytes> {
        loop {
            if let Some(current) = &self.current {
                let len = current.len().min(SEND_CHUNK);
                return Some(current.slice(..len));
            }

            match self.queue.front()? {
                Outgoing::SuspendFor(duration) => {
                    let until = *self.suspended_until.get_or_insert(now + *duration);
                    if now < until {
                        return None;
                    }
                    self.suspended_until = None;
                    self.queue.pop_front();
                }
                Outgoing::SuspendUntilUnchoked => {
                    if peer_choking {
                        return None;
                    }
                    self.queue.pop_front();
                }
                Outgoing::Message(_) => {
                    if let Some(Outgoing::Message(bytes)) = self.queue.pop_front() {
                        if !bytes.is_empty() {
                            self.current = Some(bytes);
                        }
                    }
                }
            }
        }
    }

    /// Record that `written` bytes of the current message went out.
    /// Returns true when the message has been sent completely.
    pub fn consume(&mut self, written: usize) -> bool {
        match &mut self.current {
            Some(current) => {
                current.advance(written.min(current.len()));
                if current.is_empty() {
                    self.current = None;
                    true
                } else {
                    false
                }
            }
            None => false,
        }
    }
}
