use std::thread;
use std::time::{Duration, Instant};

use glam::Vec2;

use meteor::net::install_handlers;
use meteor::{
    ASTEROID_TYPE_ID, Address, AsteroidClass, ReplicationHost, ReplicationManager, SHIP_TYPE_ID,
    Session, ShipClass, World,
};

struct App {
    world: World,
    replication: ReplicationManager<World>,
}

impl ReplicationHost for App {
    type Sim = World;

    fn replication_parts(&mut self) -> (&mut ReplicationManager<World>, &mut World) {
        (&mut self.replication, &mut self.world)
    }
}

fn new_app(refresh_hz: f32) -> App {
    let mut replication = ReplicationManager::with_refresh_hz(refresh_hz);
    assert!(replication.register_class(SHIP_TYPE_ID, ShipClass));
    assert!(replication.register_class(ASTEROID_TYPE_ID, AsteroidClass));
    App {
        world: World::new(),
        replication,
    }
}

fn new_session(max_connections: usize) -> Session<App> {
    let mut session = Session::new(max_connections);
    assert!(install_handlers(&mut session));
    session
}

fn localhost(port: u16) -> Address {
    format!("127.0.0.1:{}", port).parse().unwrap()
}

/// Host + one joined client, ticked until the client is ready.
fn connected_pair(refresh_hz: f32) -> (Session<App>, App, Session<App>, App) {
    let mut host = new_session(8);
    let mut host_app = new_app(refresh_hz);
    host.host(0).unwrap();
    let port = host.local_port().unwrap();

    let mut client = new_session(8);
    let mut client_app = new_app(refresh_hz);
    client.join(localhost(port)).unwrap();

    let ok = pump_sessions(&mut host, &mut host_app, &mut client, &mut client_app, |_, c| {
        c.is_ready()
    });
    assert!(ok, "client never became ready");
    (host, host_app, client, client_app)
}

fn pump_sessions(
    host: &mut Session<App>,
    host_app: &mut App,
    client: &mut Session<App>,
    client_app: &mut App,
    mut done: impl FnMut(&Session<App>, &Session<App>) -> bool,
) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        host.update(host_app);
        client.update(client_app);
        if done(host, client) {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    false
}

fn pump_until(
    host: &mut Session<App>,
    host_app: &mut App,
    client: &mut Session<App>,
    client_app: &mut App,
    mut done: impl FnMut(&App, &App) -> bool,
) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        host.update(host_app);
        client.update(client_app);
        if done(host_app, client_app) {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    false
}

#[test]
fn test_create_notification_builds_client_mirror() {
    let (mut host, mut host_app, mut client, mut client_app) = connected_pair(10.0);

    let handle = host_app.world.spawn_ship(Vec2::new(25.0, -10.0));
    let net_id = host_app
        .replication
        .replicate(&host_app.world, &mut host, SHIP_TYPE_ID, handle)
        .expect("replicate failed");
    assert_eq!(net_id, 0);

    let ok = pump_until(&mut host, &mut host_app, &mut client, &mut client_app, |_, c| {
        c.replication.object_count() == 1
    });
    assert!(ok, "create never reached the client");

    assert_eq!(client_app.world.ship_count(), 1);
    let mirror = client_app.replication.object(net_id).unwrap();
    let ship = client_app.world.ship(mirror.handle()).unwrap();
    assert_eq!(ship.position, Vec2::new(25.0, -10.0));
}

#[test]
fn test_snapshot_broadcast_moves_client_mirror() {
    let (mut host, mut host_app, mut client, mut client_app) = connected_pair(10.0);

    let handle = host_app.world.spawn_ship(Vec2::ZERO);
    let net_id = host_app
        .replication
        .replicate(&host_app.world, &mut host, SHIP_TYPE_ID, handle)
        .unwrap();

    let ok = pump_until(&mut host, &mut host_app, &mut client, &mut client_app, |_, c| {
        c.replication.object_count() == 1
    });
    assert!(ok);

    // Teleport the host ship, then force a broadcast by feeding the
    // replication accumulator a whole refresh interval. The sleep puts the
    // host-declared timestamp strictly past zero.
    thread::sleep(Duration::from_millis(5));
    host_app.world.ship_mut(handle).unwrap().position = Vec2::new(100.0, 40.0);
    let interval = host_app.replication.refresh_interval();
    host_app
        .replication
        .tick(&host_app.world, &mut host, interval);

    let ok = pump_until(&mut host, &mut host_app, &mut client, &mut client_app, |_, c| {
        c.replication
            .object(net_id)
            .is_some_and(|obj| obj.host_time_ms() > 0)
    });
    assert!(ok, "snapshot never reached the client");

    // Interpolating well past the refresh interval lands on the new state.
    let later = Instant::now() + Duration::from_secs(1);
    let mirror_handle = client_app.replication.object(net_id).unwrap().handle();
    client_app
        .replication
        .interpolate(&mut client_app.world, later);

    let ship = client_app.world.ship(mirror_handle).unwrap();
    assert!((ship.position - Vec2::new(100.0, 40.0)).length() < 0.001);
}

#[test]
fn test_destroy_notification_tears_down_mirror() {
    let (mut host, mut host_app, mut client, mut client_app) = connected_pair(10.0);

    let handle = host_app
        .world
        .spawn_asteroid(Vec2::new(5.0, 5.0), Vec2::ZERO, 12.0, 0.1);
    let net_id = host_app
        .replication
        .replicate(&host_app.world, &mut host, ASTEROID_TYPE_ID, handle)
        .unwrap();

    let ok = pump_until(&mut host, &mut host_app, &mut client, &mut client_app, |_, c| {
        c.replication.object_count() == 1
    });
    assert!(ok);
    assert_eq!(client_app.world.asteroid_count(), 1);

    host_app
        .replication
        .stop_replicating(&host_app.world, &mut host, net_id);
    host_app.world.despawn(handle);

    let ok = pump_until(&mut host, &mut host_app, &mut client, &mut client_app, |_, c| {
        c.replication.object_count() == 0
    });
    assert!(ok, "destroy never reached the client");
    assert_eq!(client_app.world.asteroid_count(), 0);
}

#[test]
fn test_mixed_types_replicate_side_by_side() {
    let (mut host, mut host_app, mut client, mut client_app) = connected_pair(10.0);

    let ship = host_app.world.spawn_ship(Vec2::new(1.0, 1.0));
    let rock = host_app
        .world
        .spawn_asteroid(Vec2::new(-3.0, 7.0), Vec2::new(1.0, 0.0), 20.0, 0.4);

    host_app
        .replication
        .replicate(&host_app.world, &mut host, SHIP_TYPE_ID, ship)
        .unwrap();
    host_app
        .replication
        .replicate(&host_app.world, &mut host, ASTEROID_TYPE_ID, rock)
        .unwrap();

    let ok = pump_until(&mut host, &mut host_app, &mut client, &mut client_app, |_, c| {
        c.replication.object_count() == 2
    });
    assert!(ok, "creates never reached the client");

    assert_eq!(client_app.world.ship_count(), 1);
    assert_eq!(client_app.world.asteroid_count(), 1);

    // Asteroid shape parameters ride the create payload only.
    let (_, asteroid) = client_app.world.asteroids().next().unwrap();
    assert_eq!(asteroid.radius, 20.0);
    assert_eq!(asteroid.spin, 0.4);
}
