use std::f32::consts::{FRAC_PI_2, TAU};

use glam::Vec2;

use meteor::sim::normalize_angle;
use meteor::{
    ARENA_EXTENT, ASTEROID_TYPE_ID, ReplicationManager, SHIP_TYPE_ID, Session, ShipFlags, World,
};

use crate::config::ServerConfig;

/// Seed the host world and start replicating everything in it. Ships line
/// up near the origin; asteroids drift tangentially around a mid-arena
/// ring.
pub fn populate<C: 'static>(
    world: &mut World,
    replication: &mut ReplicationManager<World>,
    session: &mut Session<C>,
    config: &ServerConfig,
) {
    for i in 0..config.ships {
        let handle = world.spawn_ship(Vec2::new(i as f32 * 40.0, 0.0));
        replication.replicate(world, session, SHIP_TYPE_ID, handle);
    }

    for i in 0..config.asteroids {
        let angle = i as f32 / config.asteroids.max(1) as f32 * TAU;
        let position = Vec2::from_angle(angle) * (ARENA_EXTENT * 0.5);
        let velocity = Vec2::from_angle(angle + FRAC_PI_2) * 20.0;
        let radius = 16.0 + (i % 3) as f32 * 8.0;
        let spin = 0.2 + i as f32 * 0.05;

        let handle = world.spawn_asteroid(position, velocity, radius, spin);
        replication.replicate(world, session, ASTEROID_TYPE_ID, handle);
    }

    log::info!(
        "world seeded with {} ships and {} asteroids",
        config.ships,
        config.asteroids
    );
}

/// Fly the host ships in slow offset circles so joined peers have motion
/// to watch.
pub fn steer(world: &mut World, elapsed: f32) {
    let handles: Vec<u32> = world.ships().map(|(handle, _)| handle).collect();
    for (i, handle) in handles.into_iter().enumerate() {
        if let Some(ship) = world.ship_mut(handle) {
            let phase = elapsed * 0.5 + i as f32;
            ship.velocity = Vec2::from_angle(phase) * 60.0;
            ship.heading = normalize_angle(phase);
            ship.flags.set(ShipFlags::THRUSTING, true);
        }
    }
}
