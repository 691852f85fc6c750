use std::collections::HashMap;

use bitflags::bitflags;
use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::net::{Message, ObjectClass};

pub const SHIP_TYPE_ID: u8 = 0;
pub const ASTEROID_TYPE_ID: u8 = 1;

/// Half-extent of the square play area; positions wrap toroidally.
pub const ARENA_EXTENT: f32 = 512.0;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ShipFlags: u8 {
        const THRUSTING = 1 << 0;
        const FIRING = 1 << 1;
        const SHIELDED = 1 << 2;
    }
}

impl Default for ShipFlags {
    fn default() -> Self {
        Self::empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ship {
    pub position: Vec2,
    pub velocity: Vec2,
    pub heading: f32,
    #[serde(skip)]
    pub flags: ShipFlags,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asteroid {
    pub position: Vec2,
    pub velocity: Vec2,
    pub rotation: f32,
    pub spin: f32,
    pub radius: f32,
}

/// The demo game world the replication layer is exercised against. Objects
/// are addressed by opaque `u32` handles; the network layer never looks
/// inside them.
#[derive(Debug, Default)]
pub struct World {
    ships: HashMap<u32, Ship>,
    asteroids: HashMap<u32, Asteroid>,
    next_handle: u32,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn_ship(&mut self, position: Vec2) -> u32 {
        let handle = self.alloc_handle();
        self.ships.insert(
            handle,
            Ship {
                position,
                velocity: Vec2::ZERO,
                heading: 0.0,
                flags: ShipFlags::empty(),
            },
        );
        handle
    }

    pub fn spawn_asteroid(&mut self, position: Vec2, velocity: Vec2, radius: f32, spin: f32) -> u32 {
        let handle = self.alloc_handle();
        self.asteroids.insert(
            handle,
            Asteroid {
                position,
                velocity,
                rotation: 0.0,
                spin,
                radius,
            },
        );
        handle
    }

    pub fn despawn(&mut self, handle: u32) {
        self.ships.remove(&handle);
        self.asteroids.remove(&handle);
    }

    pub fn ship(&self, handle: u32) -> Option<&Ship> {
        self.ships.get(&handle)
    }

    pub fn ship_mut(&mut self, handle: u32) -> Option<&mut Ship> {
        self.ships.get_mut(&handle)
    }

    pub fn asteroid(&self, handle: u32) -> Option<&Asteroid> {
        self.asteroids.get(&handle)
    }

    pub fn asteroid_mut(&mut self, handle: u32) -> Option<&mut Asteroid> {
        self.asteroids.get_mut(&handle)
    }

    pub fn ships(&self) -> impl Iterator<Item = (u32, &Ship)> {
        self.ships.iter().map(|(&h, s)| (h, s))
    }

    pub fn asteroids(&self) -> impl Iterator<Item = (u32, &Asteroid)> {
        self.asteroids.iter().map(|(&h, a)| (h, a))
    }

    pub fn ship_count(&self) -> usize {
        self.ships.len()
    }

    pub fn asteroid_count(&self) -> usize {
        self.asteroids.len()
    }

    /// Advance the world one timestep: integrate positions and rotations,
    /// wrapping at the arena edge.
    pub fn step(&mut self, dt: f32) {
        for ship in self.ships.values_mut() {
            ship.position += ship.velocity * dt;
            ship.position = wrap_position(ship.position);
        }
        for asteroid in self.asteroids.values_mut() {
            asteroid.position += asteroid.velocity * dt;
            asteroid.position = wrap_position(asteroid.position);
            asteroid.rotation = normalize_angle(asteroid.rotation + asteroid.spin * dt);
        }
    }

    fn alloc_handle(&mut self) -> u32 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }
}

pub fn normalize_angle(angle: f32) -> f32 {
    let two_pi = std::f32::consts::TAU;
    let mut normalized = angle % two_pi;
    if normalized > std::f32::consts::PI {
        normalized -= two_pi;
    } else if normalized < -std::f32::consts::PI {
        normalized += two_pi;
    }
    normalized
}

fn lerp_angle(a: f32, b: f32, t: f32) -> f32 {
    normalize_angle(a + normalize_angle(b - a) * t)
}

fn wrap_position(p: Vec2) -> Vec2 {
    Vec2::new(wrap_coord(p.x), wrap_coord(p.y))
}

fn wrap_coord(value: f32) -> f32 {
    if value > ARENA_EXTENT {
        value - 2.0 * ARENA_EXTENT
    } else if value < -ARENA_EXTENT {
        value + 2.0 * ARENA_EXTENT
    } else {
        value
    }
}

/// Replication callbacks for ships. The create payload and the snapshot
/// are the same full state word.
pub struct ShipClass;

impl ShipClass {
    // A snapshot must always occupy exactly `snapshot_len` bytes or the
    // batched update framing breaks, so a stale handle writes zeros.
    fn write_state(sim: &World, handle: u32, msg: &mut Message) {
        let Some(ship) = sim.ship(handle) else {
            for _ in 0..5 {
                msg.write_f32(0.0);
            }
            msg.write_u8(0);
            return;
        };
        msg.write_f32(ship.position.x);
        msg.write_f32(ship.position.y);
        msg.write_f32(ship.velocity.x);
        msg.write_f32(ship.velocity.y);
        msg.write_f32(ship.heading);
        msg.write_u8(ship.flags.bits());
    }

    fn read_state(msg: &mut Message) -> Option<Ship> {
        let position = Vec2::new(msg.read_f32()?, msg.read_f32()?);
        let velocity = Vec2::new(msg.read_f32()?, msg.read_f32()?);
        let heading = msg.read_f32()?;
        let flags = ShipFlags::from_bits_truncate(msg.read_u8()?);
        Some(Ship {
            position,
            velocity,
            heading,
            flags,
        })
    }
}

impl ObjectClass<World> for ShipClass {
    fn snapshot_len(&self) -> usize {
        21
    }

    fn write_create(&self, sim: &World, handle: u32, msg: &mut Message) {
        Self::write_state(sim, handle, msg);
    }

    fn read_create(&self, sim: &mut World, msg: &mut Message) -> Option<u32> {
        let state = Self::read_state(msg)?;
        let handle = sim.spawn_ship(state.position);
        if let Some(ship) = sim.ship_mut(handle) {
            *ship = state;
        }
        Some(handle)
    }

    fn read_destroy(&self, sim: &mut World, handle: u32, _msg: &mut Message) {
        sim.despawn(handle);
    }

    fn write_snapshot(&self, sim: &World, handle: u32, msg: &mut Message) {
        Self::write_state(sim, handle, msg);
    }

    fn apply_snapshot(&self, sim: &mut World, handle: u32, last: &[u8], current: &[u8], t: f32) {
        let mut last = Message::from_payload(last);
        let mut current = Message::from_payload(current);
        let (Some(from), Some(to)) = (Self::read_state(&mut last), Self::read_state(&mut current))
        else {
            return;
        };
        let Some(ship) = sim.ship_mut(handle) else {
            return;
        };
        ship.position = from.position.lerp(to.position, t);
        ship.velocity = from.velocity.lerp(to.velocity, t);
        ship.heading = lerp_angle(from.heading, to.heading, t);
        // Discrete state snaps at the halfway point.
        ship.flags = if t < 0.5 { from.flags } else { to.flags };
    }
}

/// Replication callbacks for asteroids. Velocity, spin, and radius travel
/// only in the create payload; snapshots carry position and rotation.
pub struct AsteroidClass;

impl AsteroidClass {
    fn read_pose(msg: &mut Message) -> Option<(Vec2, f32)> {
        let position = Vec2::new(msg.read_f32()?, msg.read_f32()?);
        let rotation = msg.read_f32()?;
        Some((position, rotation))
    }
}

impl ObjectClass<World> for AsteroidClass {
    fn snapshot_len(&self) -> usize {
        12
    }

    fn write_create(&self, sim: &World, handle: u32, msg: &mut Message) {
        let Some(asteroid) = sim.asteroid(handle) else {
            return;
        };
        msg.write_f32(asteroid.position.x);
        msg.write_f32(asteroid.position.y);
        msg.write_f32(asteroid.velocity.x);
        msg.write_f32(asteroid.velocity.y);
        msg.write_f32(asteroid.rotation);
        msg.write_f32(asteroid.spin);
        msg.write_f32(asteroid.radius);
    }

    fn read_create(&self, sim: &mut World, msg: &mut Message) -> Option<u32> {
        let position = Vec2::new(msg.read_f32()?, msg.read_f32()?);
        let velocity = Vec2::new(msg.read_f32()?, msg.read_f32()?);
        let rotation = msg.read_f32()?;
        let spin = msg.read_f32()?;
        let radius = msg.read_f32()?;

        let handle = sim.spawn_asteroid(position, velocity, radius, spin);
        if let Some(asteroid) = sim.asteroid_mut(handle) {
            asteroid.rotation = rotation;
        }
        Some(handle)
    }

    fn read_destroy(&self, sim: &mut World, handle: u32, _msg: &mut Message) {
        sim.despawn(handle);
    }

    fn write_snapshot(&self, sim: &World, handle: u32, msg: &mut Message) {
        let Some(asteroid) = sim.asteroid(handle) else {
            for _ in 0..3 {
                msg.write_f32(0.0);
            }
            return;
        };
        msg.write_f32(asteroid.position.x);
        msg.write_f32(asteroid.position.y);
        msg.write_f32(asteroid.rotation);
    }

    fn apply_snapshot(&self, sim: &mut World, handle: u32, last: &[u8], current: &[u8], t: f32) {
        let mut last = Message::from_payload(last);
        let mut current = Message::from_payload(current);
        let (Some((from_pos, from_rot)), Some((to_pos, to_rot))) =
            (Self::read_pose(&mut last), Self::read_pose(&mut current))
        else {
            return;
        };
        let Some(asteroid) = sim.asteroid_mut(handle) else {
            return;
        };
        asteroid.position = from_pos.lerp(to_pos, t);
        asteroid.rotation = lerp_angle(from_rot, to_rot, t);
    }
}
