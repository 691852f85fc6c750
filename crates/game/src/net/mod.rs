mod address;
mod connection;
mod message;
mod nat;
mod replication;
mod session;
mod stats;

pub use address::{Address, AddressError};
pub use connection::{Connection, ConnectionId};
pub use message::{
    MAX_STRING_LEN, MESSAGE_CAPACITY, MSG_FIRST_USER, MSG_JOIN_RESPONSE, MSG_OBJECT_CREATE,
    MSG_OBJECT_DESTROY, MSG_OBJECT_UPDATE, MSG_PING, MSG_PONG, MSG_REMOTE_COMMAND,
    MSG_REMOTE_COMMAND_ECHO, Message, STRING_ABSENT,
};
pub use nat::{NoMapping, PortMapping};
pub use replication::{
    DEFAULT_REFRESH_HZ, INVALID_NET_ID, ObjectClass, ReplicatedObject, ReplicationHost,
    ReplicationManager, install_handlers,
};
pub use session::{
    DEFAULT_MAX_CONNECTIONS, DEFAULT_PORT, Handler, Session, SessionError, SessionState,
};
pub use stats::NetworkStats;
