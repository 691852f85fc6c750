use std::io;
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};

use super::address::Address;
use super::connection::{Connection, ConnectionId};
use super::message::{MSG_JOIN_RESPONSE, Message};
use super::stats::NetworkStats;

pub const DEFAULT_PORT: u16 = 27050;
pub const DEFAULT_MAX_CONNECTIONS: usize = 8;

const HANDLER_TABLE_LEN: usize = 256;

pub type Handler<C> = Box<dyn FnMut(&mut Session<C>, &mut C, &mut Message)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session already running")]
    AlreadyRunning,
    #[error("no free connection slot")]
    Full,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// One process's view of a game session: the connection table, the message
/// dispatch table, and the host/client role state machine.
///
/// `C` is the application context handed to message handlers on every
/// `update` call. The session itself only pre-registers the join-response
/// handler; everything else is application policy.
pub struct Session<C: 'static> {
    connections: Vec<Connection>,
    max_connections: usize,
    next_id: u32,
    self_id: Option<ConnectionId>,
    host_id: Option<ConnectionId>,
    listener: Option<TcpListener>,
    handlers: Vec<Option<Handler<C>>>,
    state: SessionState,
}

impl<C: 'static> Session<C> {
    pub fn new(max_connections: usize) -> Self {
        let mut session = Self {
            connections: Vec::new(),
            max_connections: max_connections.min(u8::MAX as usize),
            next_id: 0,
            self_id: None,
            host_id: None,
            listener: None,
            handlers: (0..HANDLER_TABLE_LEN).map(|_| None).collect(),
            state: SessionState::Disconnected,
        };

        let installed = session.register_handler(MSG_JOIN_RESPONSE, |session, _ctx, msg| {
            if session.state != SessionState::Connecting {
                log::warn!("unexpected join response");
                return;
            }
            let Some(slot) = msg.read_u8() else {
                log::warn!("malformed join response");
                return;
            };
            if let Some(id) = session.self_id {
                if let Some(conn) = session.connection_mut(id) {
                    conn.set_slot(slot);
                }
            }
            session.state = SessionState::Connected;
            log::info!("join accepted, assigned slot {}", slot);
        });
        debug_assert!(installed);

        session
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// A session is running once it has a self connection, whether or not
    /// the join handshake has finished.
    pub fn is_running(&self) -> bool {
        self.self_id.is_some()
    }

    /// Ready for application traffic.
    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Connected
    }

    pub fn is_host(&self) -> bool {
        self.self_id.is_some() && self.self_id == self.host_id
    }

    pub fn is_client(&self) -> bool {
        self.is_running() && !self.is_host()
    }

    /// The port the listening socket actually bound (useful with port 0).
    pub fn local_port(&self) -> Option<u16> {
        self.listener
            .as_ref()
            .and_then(|l| l.local_addr().ok())
            .map(|a| a.port())
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.iter().find(|c| c.id() == id)
    }

    fn connection_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections.iter_mut().find(|c| c.id() == id)
    }

    /// Connections in traversal (insertion) order.
    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.iter()
    }

    pub fn self_slot(&self) -> Option<u8> {
        self.self_id
            .and_then(|id| self.connection(id))
            .and_then(|c| c.slot())
    }

    pub fn stats(&self) -> NetworkStats {
        let mut total = NetworkStats::default();
        for conn in &self.connections {
            total.merge(conn.stats());
        }
        total
    }

    /// Start hosting: the loopback self connection takes slot 0 and doubles
    /// as the host connection, and the session is immediately ready.
    pub fn host(&mut self, port: u16) -> Result<(), SessionError> {
        if self.is_running() {
            return Err(SessionError::AlreadyRunning);
        }

        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))?;
        listener.set_nonblocking(true)?;
        let bound_port = listener.local_addr()?.port();

        let id = self.alloc_id();
        self.connections.push(Connection::loopback(
            id,
            Some(0),
            Address::new(u32::from(Ipv4Addr::LOCALHOST), bound_port),
        ));
        self.listener = Some(listener);
        self.self_id = Some(id);
        self.host_id = Some(id);
        self.state = SessionState::Connected;

        log::info!("hosting session on port {}", bound_port);
        Ok(())
    }

    /// Connect to a host. On success the session holds the host connection
    /// at slot 0 plus a slotless self connection, and waits in `Connecting`
    /// for the join response. A failed connect leaves the session untouched.
    pub fn join(&mut self, addr: Address) -> Result<(), SessionError> {
        if self.is_running() {
            return Err(SessionError::AlreadyRunning);
        }
        if self.lowest_free_slot().is_none() {
            return Err(SessionError::Full);
        }

        let stream = TcpStream::connect(addr.to_socket_addr())?;
        let host_id = self.alloc_id();
        let host_conn = Connection::transport(host_id, Some(0), addr, stream)?;

        let self_id = self.alloc_id();
        self.connections.push(host_conn);
        self.connections.push(Connection::loopback(
            self_id,
            None,
            Address::new(u32::from(Ipv4Addr::LOCALHOST), 0),
        ));
        self.host_id = Some(host_id);
        self.self_id = Some(self_id);
        self.state = SessionState::Connecting;

        log::info!("joining session at {}", addr);
        Ok(())
    }

    /// Tear down every connection and return to `Disconnected`. Callable
    /// from any state.
    pub fn leave(&mut self) {
        if self.is_running() {
            log::info!("leaving session");
        }
        self.connections.clear();
        self.listener = None;
        self.self_id = None;
        self.host_id = None;
        self.state = SessionState::Disconnected;
    }

    /// Per-tick driver: accept at most one pending peer, drain and dispatch
    /// every complete inbound message, prune dead connections, and fold the
    /// whole session if the host connection is gone.
    pub fn update(&mut self, ctx: &mut C) {
        if !self.is_running() {
            return;
        }

        for conn in &mut self.connections {
            conn.flush();
        }

        self.accept_pending();

        let ids: Vec<ConnectionId> = self.connections.iter().map(|c| c.id()).collect();
        for id in ids {
            loop {
                let msg = match self.connection_mut(id) {
                    Some(conn) => conn.receive(),
                    // A handler may destroy connections mid-drain.
                    None => break,
                };
                let Some(mut msg) = msg else { break };
                msg.set_sender(id);
                self.dispatch(ctx, &mut msg);
            }
        }

        let dead: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|c| c.is_disconnected())
            .map(|c| c.id())
            .collect();
        for id in dead {
            self.destroy_connection(id);
        }

        if self.is_running() && self.host_id.is_none() {
            log::info!("host connection lost");
            self.leave();
        }
    }

    fn accept_pending(&mut self) {
        let Some(listener) = self.listener.as_ref() else {
            return;
        };
        match listener.accept() {
            Ok((stream, peer)) => {
                let peer_addr = match peer {
                    SocketAddr::V4(v4) => Address::from(v4),
                    SocketAddr::V6(_) => {
                        log::warn!("rejecting non-IPv4 peer {}", peer);
                        return;
                    }
                };
                let Some(slot) = self.lowest_free_slot() else {
                    log::warn!("rejecting {}: session full", peer_addr);
                    return;
                };
                let id = self.alloc_id();
                let conn = match Connection::transport(id, Some(slot), peer_addr, stream) {
                    Ok(conn) => conn,
                    Err(e) => {
                        log::warn!("failed to set up connection from {}: {}", peer_addr, e);
                        return;
                    }
                };
                self.connections.push(conn);

                let mut response = Message::new(MSG_JOIN_RESPONSE);
                response.write_u8(slot);
                self.send_to(id, response);
                log::info!("{} joined as slot {}", peer_addr, slot);
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => log::warn!("accept failed: {}", e),
        }
    }

    fn dispatch(&mut self, ctx: &mut C, msg: &mut Message) {
        let tag = msg.tag() as usize;
        let Some(mut handler) = self.handlers[tag].take() else {
            log::debug!("dropping message with unhandled tag {}", msg.tag());
            return;
        };
        handler(self, ctx, msg);
        // The handler slot stays empty while its own handler runs, so a
        // handler re-registering its own tag wins; otherwise restore it.
        if self.handlers[tag].is_none() {
            self.handlers[tag] = Some(handler);
        }
    }

    /// Install a handler for a message tag. Refuses (and keeps the existing
    /// handler) if the tag is already claimed.
    pub fn register_handler<F>(&mut self, tag: u8, handler: F) -> bool
    where
        F: FnMut(&mut Session<C>, &mut C, &mut Message) + 'static,
    {
        let slot = &mut self.handlers[tag as usize];
        if slot.is_some() {
            return false;
        }
        *slot = Some(Box::new(handler));
        true
    }

    pub fn send_to(&mut self, id: ConnectionId, msg: Message) -> bool {
        match self.connection_mut(id) {
            Some(conn) => {
                conn.send(msg);
                true
            }
            None => false,
        }
    }

    /// Send a copy of the message to every connection except self, in
    /// traversal order.
    pub fn send_to_others(&mut self, msg: &Message) {
        let self_id = self.self_id;
        for conn in &mut self.connections {
            if Some(conn.id()) == self_id {
                continue;
            }
            conn.send(msg.clone());
        }
    }

    /// Remove a connection, clearing the self/host references if they point
    /// at it. Unknown or stale ids are a no-op.
    pub fn destroy_connection(&mut self, id: ConnectionId) {
        if self.self_id == Some(id) {
            self.self_id = None;
        }
        if self.host_id == Some(id) {
            self.host_id = None;
        }
        if let Some(pos) = self.connections.iter().position(|c| c.id() == id) {
            let conn = self.connections.remove(pos);
            log::info!("connection to {} removed (slot {:?})", conn.addr(), conn.slot());
        }
    }

    fn lowest_free_slot(&self) -> Option<u8> {
        (0..self.max_connections as u8)
            .find(|slot| !self.connections.iter().any(|c| c.slot() == Some(*slot)))
    }

    fn alloc_id(&mut self) -> ConnectionId {
        let id = ConnectionId(self.next_id);
        self.next_id += 1;
        id
    }
}
