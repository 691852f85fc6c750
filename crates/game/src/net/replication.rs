use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use super::message::{
    MESSAGE_CAPACITY, MSG_OBJECT_CREATE, MSG_OBJECT_DESTROY, MSG_OBJECT_UPDATE, Message,
};
use super::session::Session;

/// Sentinel excluded from the allocatable network id space.
pub const INVALID_NET_ID: u16 = u16::MAX;

/// Default host snapshot broadcast rate.
pub const DEFAULT_REFRESH_HZ: f32 = 10.0;

const CLASS_TABLE_LEN: usize = 256;

// Every batched update entry carries net id + type id before the snapshot.
const ENTRY_HEADER_LEN: usize = 3;
const UPDATE_HEADER_LEN: usize = 8;

/// Per-type replication callbacks, implemented once per replicated object
/// kind and registered under its 8-bit type id.
///
/// `S` is the simulation the local object handles belong to. Create/destroy
/// payloads travel once per object lifetime; snapshots travel continuously
/// and must always occupy exactly `snapshot_len` bytes.
pub trait ObjectClass<S> {
    /// Size in bytes of one snapshot as written by `write_snapshot`.
    fn snapshot_len(&self) -> usize;

    fn write_create(&self, sim: &S, handle: u32, msg: &mut Message);

    /// Reconstruct the local object on the receiving side, returning its
    /// handle, or `None` to refuse the create.
    fn read_create(&self, sim: &mut S, msg: &mut Message) -> Option<u32>;

    fn write_destroy(&self, _sim: &S, _handle: u32, _msg: &mut Message) {}

    /// Tear down the local object on the receiving side.
    fn read_destroy(&self, sim: &mut S, handle: u32, msg: &mut Message);

    fn write_snapshot(&self, sim: &S, handle: u32, msg: &mut Message);

    /// Blend `last` and `current` (two `snapshot_len`-byte blobs) at factor
    /// `t` in [0, 1] into the local object.
    fn apply_snapshot(&self, sim: &mut S, handle: u32, last: &[u8], current: &[u8], t: f32);
}

#[derive(Debug)]
pub struct ReplicatedObject {
    net_id: u16,
    type_id: u8,
    handle: u32,
    last: Box<[u8]>,
    current: Box<[u8]>,
    host_time_ms: u64,
    received_at: Option<Instant>,
}

impl ReplicatedObject {
    pub fn net_id(&self) -> u16 {
        self.net_id
    }

    pub fn type_id(&self) -> u8 {
        self.type_id
    }

    pub fn handle(&self) -> u32 {
        self.handle
    }

    /// Host-declared time of the latest snapshot, milliseconds since the
    /// host's replication epoch.
    pub fn host_time_ms(&self) -> u64 {
        self.host_time_ms
    }
}

/// Keeps authoritative (host) and mirrored (client) object state in sync:
/// type registry, live-object registry, id allocation, periodic snapshot
/// broadcast, and receive-side interpolation.
pub struct ReplicationManager<S: 'static> {
    classes: Vec<Option<Box<dyn ObjectClass<S>>>>,
    objects: BTreeMap<u16, ReplicatedObject>,
    refresh_interval: Duration,
    accumulator: Duration,
    epoch: Instant,
}

impl<S: 'static> ReplicationManager<S> {
    pub fn new() -> Self {
        Self::with_refresh_hz(DEFAULT_REFRESH_HZ)
    }

    pub fn with_refresh_hz(hz: f32) -> Self {
        Self {
            classes: (0..CLASS_TABLE_LEN).map(|_| None).collect(),
            objects: BTreeMap::new(),
            refresh_interval: Duration::from_secs_f32(1.0 / hz.max(0.001)),
            accumulator: Duration::ZERO,
            epoch: Instant::now(),
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    /// Register the callbacks for a type id. Refuses (keeping the existing
    /// registration) if the id is already claimed.
    pub fn register_class<K>(&mut self, type_id: u8, class: K) -> bool
    where
        K: ObjectClass<S> + 'static,
    {
        let slot = &mut self.classes[type_id as usize];
        if slot.is_some() {
            return false;
        }
        *slot = Some(Box::new(class));
        true
    }

    pub fn object(&self, net_id: u16) -> Option<&ReplicatedObject> {
        self.objects.get(&net_id)
    }

    pub fn objects(&self) -> impl Iterator<Item = &ReplicatedObject> {
        self.objects.values()
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn find_by_handle(&self, handle: u32) -> Option<u16> {
        self.objects
            .values()
            .find(|obj| obj.handle == handle)
            .map(|obj| obj.net_id)
    }

    /// Start replicating a host-owned simulation object. Allocates the
    /// lowest unused network id and notifies every peer. Returns `None` if
    /// not hosting, the type is unregistered, or the id space is exhausted.
    pub fn replicate<C>(
        &mut self,
        sim: &S,
        session: &mut Session<C>,
        type_id: u8,
        handle: u32,
    ) -> Option<u16>
    where
        C: 'static,
    {
        if !session.is_host() {
            log::warn!("replicate called while not hosting");
            return None;
        }
        let class = self.classes[type_id as usize].as_ref()?;
        let net_id = (0..INVALID_NET_ID).find(|id| !self.objects.contains_key(id))?;
        let snapshot_len = class.snapshot_len();

        let mut msg = Message::new(MSG_OBJECT_CREATE);
        msg.write_u16(net_id);
        msg.write_u8(type_id);
        class.write_create(sim, handle, &mut msg);
        session.send_to_others(&msg);

        self.objects.insert(
            net_id,
            ReplicatedObject {
                net_id,
                type_id,
                handle,
                last: vec![0; snapshot_len].into_boxed_slice(),
                current: vec![0; snapshot_len].into_boxed_slice(),
                host_time_ms: 0,
                received_at: None,
            },
        );
        log::debug!("replicating object {} (type {})", net_id, type_id);
        Some(net_id)
    }

    /// Stop replicating an object. The host notifies every peer so they can
    /// tear down their mirrors.
    pub fn stop_replicating<C>(&mut self, sim: &S, session: &mut Session<C>, net_id: u16)
    where
        C: 'static,
    {
        let Some(obj) = self.objects.remove(&net_id) else {
            return;
        };
        if session.is_host() {
            let mut msg = Message::new(MSG_OBJECT_DESTROY);
            msg.write_u16(net_id);
            if let Some(class) = self.classes[obj.type_id as usize].as_ref() {
                class.write_destroy(sim, obj.handle, &mut msg);
            }
            session.send_to_others(&msg);
        }
        log::debug!("stopped replicating object {}", net_id);
    }

    /// Host-side per-tick driver: broadcast snapshots whenever the refresh
    /// accumulator rolls over. No-op on clients.
    pub fn tick<C>(&mut self, sim: &S, session: &mut Session<C>, dt: Duration)
    where
        C: 'static,
    {
        if !session.is_host() {
            return;
        }
        self.accumulator += dt;
        while self.accumulator >= self.refresh_interval {
            self.accumulator -= self.refresh_interval;
            self.broadcast(sim, session);
        }
    }

    fn broadcast<C>(&self, sim: &S, session: &mut Session<C>)
    where
        C: 'static,
    {
        if self.objects.is_empty() {
            return;
        }
        let host_ms = self.epoch.elapsed().as_millis() as u64;
        let mut msg = update_header(host_ms);
        for obj in self.objects.values() {
            let Some(class) = self.classes[obj.type_id as usize].as_ref() else {
                continue;
            };
            let entry_len = ENTRY_HEADER_LEN + class.snapshot_len();
            if entry_len > MESSAGE_CAPACITY - UPDATE_HEADER_LEN {
                log::warn!(
                    "snapshot of type {} too large to batch ({} bytes)",
                    obj.type_id,
                    class.snapshot_len()
                );
                continue;
            }
            // Never split an entry across messages; start a fresh batch.
            if msg.remaining() < entry_len {
                session.send_to_others(&msg);
                msg = update_header(host_ms);
            }
            msg.write_u16(obj.net_id);
            msg.write_u8(obj.type_id);
            class.write_snapshot(sim, obj.handle, &mut msg);
        }
        session.send_to_others(&msg);
    }

    /// Client-side create notification.
    pub fn handle_create(&mut self, sim: &mut S, msg: &mut Message) {
        let (Some(net_id), Some(type_id)) = (msg.read_u16(), msg.read_u8()) else {
            log::warn!("malformed object create");
            return;
        };
        let Some(class) = self.classes[type_id as usize].as_ref() else {
            log::warn!("object create for unregistered type {}", type_id);
            return;
        };
        let Some(handle) = class.read_create(sim, msg) else {
            log::warn!("create refused for type {}", type_id);
            return;
        };
        let snapshot_len = class.snapshot_len();
        let previous = self.objects.insert(
            net_id,
            ReplicatedObject {
                net_id,
                type_id,
                handle,
                last: vec![0; snapshot_len].into_boxed_slice(),
                current: vec![0; snapshot_len].into_boxed_slice(),
                host_time_ms: 0,
                received_at: None,
            },
        );
        if previous.is_some() {
            log::warn!("object {} recreated over a live mirror", net_id);
        }
    }

    /// Client-side destroy notification.
    pub fn handle_destroy(&mut self, sim: &mut S, msg: &mut Message) {
        let Some(net_id) = msg.read_u16() else {
            log::warn!("malformed object destroy");
            return;
        };
        let Some(obj) = self.objects.remove(&net_id) else {
            log::debug!("destroy for unknown object {}", net_id);
            return;
        };
        if let Some(class) = self.classes[obj.type_id as usize].as_ref() {
            class.read_destroy(sim, obj.handle, msg);
        }
    }

    /// Client-side batched snapshot update. Entries for objects we have not
    /// seen a create for yet are skipped; they stay authoritative on the
    /// host and will resync on the next refresh after the create lands.
    pub fn handle_update(&mut self, msg: &mut Message) {
        let Some(host_ms) = msg.read_u64() else {
            log::warn!("malformed object update");
            return;
        };
        let now = Instant::now();

        while msg.unread() > 0 {
            let (Some(net_id), Some(type_id)) = (msg.read_u16(), msg.read_u8()) else {
                log::warn!("truncated object update batch");
                return;
            };
            let Some(class) = self.classes[type_id as usize].as_ref() else {
                // Without the type we cannot size this or any later entry.
                log::warn!("object update for unregistered type {}", type_id);
                return;
            };
            let snapshot_len = class.snapshot_len();
            let mut incoming = vec![0u8; snapshot_len];
            if msg.read_blob(&mut incoming) != snapshot_len {
                log::warn!("truncated snapshot for object {}", net_id);
                return;
            }

            let Some(obj) = self.objects.get_mut(&net_id) else {
                continue;
            };
            if obj.type_id != type_id || obj.current.len() != snapshot_len {
                log::warn!("type mismatch in update for object {}", net_id);
                continue;
            }
            std::mem::swap(&mut obj.last, &mut obj.current);
            obj.current.copy_from_slice(&incoming);
            obj.host_time_ms = host_ms;
            obj.received_at = Some(now);
        }
    }

    /// Render-tick driver: blend each mirrored object from its last toward
    /// its current snapshot, with the factor derived from how long ago the
    /// current snapshot arrived relative to the refresh interval.
    pub fn interpolate(&self, sim: &mut S, now: Instant) {
        for obj in self.objects.values() {
            let Some(received_at) = obj.received_at else {
                continue;
            };
            let Some(class) = self.classes[obj.type_id as usize].as_ref() else {
                continue;
            };
            let elapsed = now.saturating_duration_since(received_at).as_secs_f32();
            let t = (elapsed / self.refresh_interval.as_secs_f32()).clamp(0.0, 1.0);
            class.apply_snapshot(sim, obj.handle, &obj.last, &obj.current, t);
        }
    }
}

impl<S: 'static> Default for ReplicationManager<S> {
    fn default() -> Self {
        Self::new()
    }
}

fn update_header(host_ms: u64) -> Message {
    let mut msg = Message::new(MSG_OBJECT_UPDATE);
    msg.write_u64(host_ms);
    msg
}

/// Application contexts that own a replication manager and its simulation,
/// split-borrowed so message handlers can drive one with the other.
pub trait ReplicationHost {
    type Sim: 'static;

    fn replication_parts(&mut self) -> (&mut ReplicationManager<Self::Sim>, &mut Self::Sim);
}

/// Install the object create/destroy/update handlers on a session. Returns
/// false if any of the three tags was already claimed.
pub fn install_handlers<C>(session: &mut Session<C>) -> bool
where
    C: ReplicationHost + 'static,
{
    let create = session.register_handler(MSG_OBJECT_CREATE, |_session, ctx, msg| {
        let (replication, sim) = ctx.replication_parts();
        replication.handle_create(sim, msg);
    });
    let destroy = session.register_handler(MSG_OBJECT_DESTROY, |_session, ctx, msg| {
        let (replication, sim) = ctx.replication_parts();
        replication.handle_destroy(sim, msg);
    });
    let update = session.register_handler(MSG_OBJECT_UPDATE, |_session, ctx, msg| {
        let (replication, _) = ctx.replication_parts();
        replication.handle_update(msg);
    });
    create && destroy && update
}
