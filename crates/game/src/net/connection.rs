use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::TcpStream;

use super::address::Address;
use super::message::{Message, MESSAGE_CAPACITY};
use super::stats::NetworkStats;

/// Stable identity of a connection within its session. Slot indices are
/// reused; ids never are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub(crate) u32);

pub(crate) const FRAME_PREFIX_LEN: usize = 2;

// Frame length counts the type byte plus the payload.
pub(crate) const MAX_FRAME_LEN: usize = MESSAGE_CAPACITY + 1;
pub(crate) const STAGING_CAPACITY: usize = FRAME_PREFIX_LEN + MAX_FRAME_LEN;

/// One peer of a session: either the in-process loopback queue a session
/// keeps for itself, or a framed stream socket to a remote peer.
///
/// Connections are created and destroyed only by their owning session.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    slot: Option<u8>,
    addr: Address,
    stats: NetworkStats,
    link: Link,
}

#[derive(Debug)]
enum Link {
    Loopback(VecDeque<Message>),
    Transport(Transport),
}

impl Connection {
    pub(crate) fn loopback(id: ConnectionId, slot: Option<u8>, addr: Address) -> Self {
        Self {
            id,
            slot,
            addr,
            stats: NetworkStats::default(),
            link: Link::Loopback(VecDeque::new()),
        }
    }

    pub(crate) fn transport(
        id: ConnectionId,
        slot: Option<u8>,
        addr: Address,
        stream: TcpStream,
    ) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        Ok(Self {
            id,
            slot,
            addr,
            stats: NetworkStats::default(),
            link: Link::Transport(Transport::new(stream)),
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn slot(&self) -> Option<u8> {
        self.slot
    }

    pub(crate) fn set_slot(&mut self, slot: u8) {
        self.slot = Some(slot);
    }

    pub fn addr(&self) -> Address {
        self.addr
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    /// Queue a message for the peer, taking ownership of it.
    pub fn send(&mut self, msg: Message) {
        self.stats.messages_sent += 1;
        match &mut self.link {
            Link::Loopback(queue) => {
                self.stats.bytes_sent += msg.len() as u64;
                queue.push_back(msg);
            }
            Link::Transport(transport) => transport.send(&msg, &mut self.stats),
        }
    }

    /// Produce at most one complete message. `None` means nothing is ready
    /// yet; a transport link keeps any partial frame for the next poll.
    pub fn receive(&mut self) -> Option<Message> {
        match &mut self.link {
            Link::Loopback(queue) => {
                let msg = queue.pop_front()?;
                self.stats.messages_received += 1;
                self.stats.bytes_received += msg.len() as u64;
                Some(msg)
            }
            Link::Transport(transport) => transport.receive(&mut self.stats),
        }
    }

    /// Push any buffered outgoing bytes toward the socket.
    pub(crate) fn flush(&mut self) {
        if let Link::Transport(transport) = &mut self.link {
            transport.flush(&mut self.stats);
        }
    }

    pub fn is_disconnected(&self) -> bool {
        match &self.link {
            Link::Loopback(_) => false,
            Link::Transport(transport) => !transport.alive,
        }
    }
}

/// Framed non-blocking stream link. Outgoing messages become
/// `[u16 length][u8 tag][payload]` frames; incoming bytes accumulate in a
/// staging buffer across however many reads it takes to complete a frame.
#[derive(Debug)]
struct Transport {
    stream: TcpStream,
    staging: Box<[u8; STAGING_CAPACITY]>,
    filled: usize,
    outbox: Vec<u8>,
    alive: bool,
}

impl Transport {
    fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            staging: Box::new([0; STAGING_CAPACITY]),
            filled: 0,
            outbox: Vec::new(),
            alive: true,
        }
    }

    fn send(&mut self, msg: &Message, stats: &mut NetworkStats) {
        if !self.alive {
            return;
        }
        let payload = msg.wire_payload();
        let frame_len = (payload.len() + 1) as u16;
        self.outbox.extend_from_slice(&frame_len.to_le_bytes());
        self.outbox.push(msg.tag());
        self.outbox.extend_from_slice(payload);
        self.flush(stats);
    }

    fn flush(&mut self, stats: &mut NetworkStats) {
        while self.alive && !self.outbox.is_empty() {
            match self.stream.write(&self.outbox) {
                Ok(0) => self.alive = false,
                Ok(n) => {
                    self.outbox.drain(..n);
                    stats.bytes_sent += n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    log::debug!("transport write failed: {}", e);
                    self.alive = false;
                }
            }
        }
    }

    fn receive(&mut self, stats: &mut NetworkStats) -> Option<Message> {
        while self.alive {
            // How far the staging buffer must fill before we can make
            // progress: first the length prefix, then the whole frame.
            let want = if self.filled < FRAME_PREFIX_LEN {
                FRAME_PREFIX_LEN
            } else {
                let frame_len = u16::from_le_bytes([self.staging[0], self.staging[1]]) as usize;
                if frame_len == 0 || frame_len > MAX_FRAME_LEN {
                    // A stream with a garbage prefix cannot be resynced.
                    log::warn!("dropping connection: invalid frame length {}", frame_len);
                    self.alive = false;
                    return None;
                }
                FRAME_PREFIX_LEN + frame_len
            };

            if self.filled == want && self.filled > FRAME_PREFIX_LEN {
                let tag = self.staging[FRAME_PREFIX_LEN];
                let payload = &self.staging[FRAME_PREFIX_LEN + 1..want];
                let msg = Message::from_wire(tag, payload);
                self.filled = 0;
                stats.messages_received += 1;
                return Some(msg);
            }

            match self.stream.read(&mut self.staging[self.filled..want]) {
                Ok(0) => self.alive = false,
                Ok(n) => {
                    self.filled += n;
                    stats.bytes_received += n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return None,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    log::debug!("transport read failed: {}", e);
                    self.alive = false;
                }
            }
        }
        None
    }
}
