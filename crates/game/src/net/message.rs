use std::fmt;

use super::connection::ConnectionId;

/// Payload capacity of a single message. Anything larger must be split by
/// the caller; raw writes past this point truncate and report the shortfall.
pub const MESSAGE_CAPACITY: usize = 1024;

/// Length-prefix sentinel for an absent string (distinct from "").
pub const STRING_ABSENT: u16 = u16::MAX;

/// Longest string the 16-bit length prefix can carry.
pub const MAX_STRING_LEN: usize = (u16::MAX - 1) as usize;

// Reserved message type tags (0-31). Application tags start at
// MSG_FIRST_USER.
pub const MSG_JOIN_RESPONSE: u8 = 0;
pub const MSG_PING: u8 = 1;
pub const MSG_PONG: u8 = 2;
pub const MSG_REMOTE_COMMAND: u8 = 3;
pub const MSG_REMOTE_COMMAND_ECHO: u8 = 4;
pub const MSG_OBJECT_CREATE: u8 = 5;
pub const MSG_OBJECT_DESTROY: u8 = 6;
pub const MSG_OBJECT_UPDATE: u8 = 7;
pub const MSG_FIRST_USER: u8 = 32;

/// A tagged, bounded binary message with independent write and read
/// cursors.
///
/// Payload storage is normalized to little-endian: every chunk moved by
/// `write_bytes`/`read_bytes` is byte-reversed on big-endian hosts, so the
/// bytes that reach the wire are identical regardless of platform and the
/// flip cancels out on read.
#[derive(Clone)]
pub struct Message {
    tag: u8,
    data: [u8; MESSAGE_CAPACITY],
    write_cursor: usize,
    read_cursor: usize,
    sender: Option<ConnectionId>,
}

impl Message {
    pub fn new(tag: u8) -> Self {
        Self {
            tag,
            data: [0; MESSAGE_CAPACITY],
            write_cursor: 0,
            read_cursor: 0,
            sender: None,
        }
    }

    /// Rebuild a message from framed wire bytes. The payload is already in
    /// storage order, so it is copied verbatim.
    pub(crate) fn from_wire(tag: u8, payload: &[u8]) -> Self {
        let mut msg = Self::new(tag);
        let n = payload.len().min(MESSAGE_CAPACITY);
        msg.data[..n].copy_from_slice(&payload[..n]);
        msg.write_cursor = n;
        msg
    }

    /// Wrap an opaque payload blob (e.g. a stored snapshot) for decoding
    /// with the typed readers.
    pub fn from_payload(payload: &[u8]) -> Self {
        Self::from_wire(0, payload)
    }

    pub(crate) fn wire_payload(&self) -> &[u8] {
        &self.data[..self.write_cursor]
    }

    pub fn tag(&self) -> u8 {
        self.tag
    }

    /// The connection the message arrived on; `None` for locally built
    /// messages.
    pub fn sender(&self) -> Option<ConnectionId> {
        self.sender
    }

    pub(crate) fn set_sender(&mut self, id: ConnectionId) {
        self.sender = Some(id);
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.write_cursor
    }

    pub fn is_empty(&self) -> bool {
        self.write_cursor == 0
    }

    /// Writable bytes left.
    pub fn remaining(&self) -> usize {
        MESSAGE_CAPACITY - self.write_cursor
    }

    /// Written bytes not yet consumed by a read.
    pub fn unread(&self) -> usize {
        self.write_cursor - self.read_cursor
    }

    /// Copy up to `data.len()` bytes into the payload, normalizing byte
    /// order. Returns the number of bytes actually written; callers that
    /// must not truncate check it against `data.len()`.
    pub fn write_bytes(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.remaining());
        let dst = &mut self.data[self.write_cursor..self.write_cursor + n];
        dst.copy_from_slice(&data[..n]);
        if cfg!(target_endian = "big") {
            dst.reverse();
        }
        self.write_cursor += n;
        n
    }

    /// Copy up to `out.len()` bytes from the unread payload, undoing the
    /// byte-order normalization. Returns the number of bytes moved.
    pub fn read_bytes(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.unread());
        out[..n].copy_from_slice(&self.data[self.read_cursor..self.read_cursor + n]);
        if cfg!(target_endian = "big") {
            out[..n].reverse();
        }
        self.read_cursor += n;
        n
    }

    // Raw variants skip the endian flip; used for string bytes and for
    // snapshot blobs that must keep storage order.
    fn write_raw(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.remaining());
        self.data[self.write_cursor..self.write_cursor + n].copy_from_slice(&data[..n]);
        self.write_cursor += n;
        n
    }

    fn read_raw(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.unread());
        out[..n].copy_from_slice(&self.data[self.read_cursor..self.read_cursor + n]);
        self.read_cursor += n;
        n
    }

    pub(crate) fn read_blob(&mut self, out: &mut [u8]) -> usize {
        self.read_raw(out)
    }

    pub fn write_u8(&mut self, v: u8) -> bool {
        self.write_exact(&v.to_ne_bytes())
    }

    pub fn write_u16(&mut self, v: u16) -> bool {
        self.write_exact(&v.to_ne_bytes())
    }

    pub fn write_u32(&mut self, v: u32) -> bool {
        self.write_exact(&v.to_ne_bytes())
    }

    pub fn write_u64(&mut self, v: u64) -> bool {
        self.write_exact(&v.to_ne_bytes())
    }

    pub fn write_i32(&mut self, v: i32) -> bool {
        self.write_exact(&v.to_ne_bytes())
    }

    pub fn write_f32(&mut self, v: f32) -> bool {
        self.write_exact(&v.to_ne_bytes())
    }

    pub fn write_f64(&mut self, v: f64) -> bool {
        self.write_exact(&v.to_ne_bytes())
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        self.read_exact().map(u8::from_ne_bytes)
    }

    pub fn read_u16(&mut self) -> Option<u16> {
        self.read_exact().map(u16::from_ne_bytes)
    }

    pub fn read_u32(&mut self) -> Option<u32> {
        self.read_exact().map(u32::from_ne_bytes)
    }

    pub fn read_u64(&mut self) -> Option<u64> {
        self.read_exact().map(u64::from_ne_bytes)
    }

    pub fn read_i32(&mut self) -> Option<i32> {
        self.read_exact().map(i32::from_ne_bytes)
    }

    pub fn read_f32(&mut self) -> Option<f32> {
        self.read_exact().map(f32::from_ne_bytes)
    }

    pub fn read_f64(&mut self) -> Option<f64> {
        self.read_exact().map(f64::from_ne_bytes)
    }

    // Typed writes are atomic: either the whole value fits or nothing moves.
    fn write_exact(&mut self, bytes: &[u8]) -> bool {
        if self.remaining() < bytes.len() {
            return false;
        }
        self.write_bytes(bytes);
        true
    }

    fn read_exact<const N: usize>(&mut self) -> Option<[u8; N]> {
        if self.unread() < N {
            return None;
        }
        let mut buf = [0u8; N];
        self.read_bytes(&mut buf);
        Some(buf)
    }

    /// Write a length-prefixed string; `None` encodes the absent-string
    /// sentinel. Returns false (and writes nothing) if the string is too
    /// long for the prefix or does not fit in the remaining capacity.
    pub fn write_str(&mut self, s: Option<&str>) -> bool {
        let Some(s) = s else {
            return self.write_u16(STRING_ABSENT);
        };
        let bytes = s.as_bytes();
        if bytes.len() > MAX_STRING_LEN || self.remaining() < 2 + bytes.len() {
            return false;
        }
        self.write_u16(bytes.len() as u16);
        self.write_raw(bytes);
        true
    }

    /// Read a length-prefixed string. Outer `None` means the payload was
    /// malformed or exhausted; `Some(None)` is the absent-string sentinel.
    pub fn read_str(&mut self) -> Option<Option<String>> {
        let len = self.read_u16()?;
        if len == STRING_ABSENT {
            return Some(None);
        }
        let len = len as usize;
        if self.unread() < len {
            return None;
        }
        let mut bytes = vec![0u8; len];
        self.read_raw(&mut bytes);
        String::from_utf8(bytes).ok().map(Some)
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("tag", &self.tag)
            .field("len", &self.write_cursor)
            .field("read", &self.read_cursor)
            .field("sender", &self.sender)
            .finish()
    }
}
