pub mod net;
pub mod sim;

pub use net::{
    Address, AddressError, Connection, ConnectionId, DEFAULT_MAX_CONNECTIONS, DEFAULT_PORT,
    DEFAULT_REFRESH_HZ, INVALID_NET_ID, MESSAGE_CAPACITY, Message, NetworkStats, NoMapping,
    ObjectClass, PortMapping, ReplicatedObject, ReplicationHost, ReplicationManager, Session,
    SessionError, SessionState,
};
pub use sim::{
    ARENA_EXTENT, ASTEROID_TYPE_ID, Asteroid, AsteroidClass, SHIP_TYPE_ID, Ship, ShipClass,
    ShipFlags, World,
};
