mod config;
mod simulation;

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;

use meteor::net::{
    MSG_PING, MSG_PONG, MSG_REMOTE_COMMAND, MSG_REMOTE_COMMAND_ECHO, install_handlers,
};
use meteor::{
    ASTEROID_TYPE_ID, Address, AsteroidClass, Message, NoMapping, PortMapping, ReplicationHost,
    ReplicationManager, SHIP_TYPE_ID, Session, ShipClass, World,
};

use config::ServerConfig;

#[derive(Parser)]
#[command(name = "meteor-server")]
#[command(about = "Meteor session host / join demo")]
struct Args {
    #[arg(short, long, default_value_t = meteor::DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, help = "Join an existing host (addr[:port]) instead of hosting")]
    join: Option<String>,

    #[arg(short, long, default_value_t = 60)]
    tick_rate: u32,

    #[arg(long, default_value_t = 10.0)]
    refresh_hz: f32,

    #[arg(short, long, default_value_t = meteor::DEFAULT_MAX_CONNECTIONS)]
    max_connections: usize,

    #[arg(long, default_value_t = 2)]
    ships: usize,

    #[arg(long, default_value_t = 6)]
    asteroids: usize,

    #[arg(long, help = "Request a router port mapping before hosting")]
    map_port: bool,
}

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

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = ServerConfig {
        tick_rate: args.tick_rate.max(1),
        refresh_hz: args.refresh_hz,
        max_connections: args.max_connections,
        ships: args.ships,
        asteroids: args.asteroids,
    };

    let mut app = App {
        world: World::new(),
        replication: ReplicationManager::with_refresh_hz(config.refresh_hz),
    };
    app.replication.register_class(SHIP_TYPE_ID, ShipClass);
    app.replication.register_class(ASTEROID_TYPE_ID, AsteroidClass);

    let epoch = Instant::now();
    let mut session: Session<App> = Session::new(config.max_connections);
    install_handlers(&mut session);
    register_ping_handlers(&mut session, epoch);
    register_command_handlers(&mut session);

    match &args.join {
        Some(target) => {
            let addr = parse_target(target, args.port)?;
            session.join(addr)?;
        }
        None => {
            if args.map_port {
                let mut mapper = NoMapping;
                if !mapper.establish_port_mapping("meteor", args.port, args.port) {
                    log::warn!("port mapping refused; hosting on the local bind only");
                }
            }
            session.host(args.port)?;
            simulation::populate(&mut app.world, &mut app.replication, &mut session, &config);
        }
    }

    run(&mut session, &mut app, &config, epoch);
    log::info!("session ended");
    Ok(())
}

fn parse_target(target: &str, default_port: u16) -> Result<Address> {
    if let Ok(addr) = target.parse::<Address>() {
        return Ok(addr);
    }
    match target.rsplit_once(':') {
        Some((host, port)) => {
            let port: u16 = port.parse().context("invalid port in join target")?;
            Ok(Address::resolve(host, port)?)
        }
        None => Ok(Address::resolve(target, default_port)?),
    }
}

fn run(session: &mut Session<App>, app: &mut App, config: &ServerConfig, epoch: Instant) {
    let tick = Duration::from_secs_f64(1.0 / config.tick_rate as f64);
    let mut last = Instant::now();
    let mut accumulator = Duration::ZERO;
    let mut last_status = Instant::now();
    let mut last_ping = Instant::now();
    let mut greeted = false;

    while session.is_running() {
        let now = Instant::now();
        accumulator += now - last;
        last = now;

        while accumulator >= tick {
            accumulator -= tick;
            session.update(app);

            if session.is_host() {
                simulation::steer(&mut app.world, epoch.elapsed().as_secs_f32());
                app.world.step(tick.as_secs_f32());
                app.replication.tick(&app.world, session, tick);
            } else {
                app.replication.interpolate(&mut app.world, Instant::now());
            }
        }

        if session.is_client() && session.is_ready() {
            if !greeted {
                greeted = true;
                let mut msg = Message::new(MSG_REMOTE_COMMAND);
                msg.write_str(Some("who"));
                session.send_to_others(&msg);
            }
            if last_ping.elapsed() >= Duration::from_secs(2) {
                last_ping = Instant::now();
                let mut msg = Message::new(MSG_PING);
                msg.write_u64(epoch.elapsed().as_micros() as u64);
                session.send_to_others(&msg);
            }
        }

        if last_status.elapsed() >= Duration::from_secs(5) {
            last_status = Instant::now();
            let stats = session.stats();
            log::info!(
                "{} peers, {} objects | out {} msgs / {} B, in {} msgs / {} B",
                session.connections().count(),
                app.replication.object_count(),
                stats.messages_sent,
                stats.bytes_sent,
                stats.messages_received,
                stats.bytes_received,
            );
        }

        std::thread::sleep(Duration::from_millis(1));
    }
}

fn register_ping_handlers(session: &mut Session<App>, epoch: Instant) {
    session.register_handler(MSG_PING, |session, _app, msg| {
        let Some(timestamp) = msg.read_u64() else {
            return;
        };
        let mut pong = Message::new(MSG_PONG);
        pong.write_u64(timestamp);
        if let Some(sender) = msg.sender() {
            session.send_to(sender, pong);
        }
    });

    session.register_handler(MSG_PONG, move |_session, _app, msg| {
        let Some(timestamp) = msg.read_u64() else {
            return;
        };
        let rtt_us = (epoch.elapsed().as_micros() as u64).saturating_sub(timestamp);
        log::info!("rtt {:.1} ms", rtt_us as f64 / 1000.0);
    });
}

fn register_command_handlers(session: &mut Session<App>) {
    session.register_handler(MSG_REMOTE_COMMAND, |session, app, msg| {
        // Only the host interprets commands.
        if !session.is_host() {
            return;
        }
        let Some(Some(command)) = msg.read_str() else {
            return;
        };
        let output = match command.as_str() {
            "who" => {
                let slots: Vec<String> = session
                    .connections()
                    .filter_map(|c| c.slot())
                    .map(|slot| slot.to_string())
                    .collect();
                format!("occupied slots: {}", slots.join(", "))
            }
            "stats" => format!("{} replicated objects", app.replication.object_count()),
            other => format!("unknown command {:?}", other),
        };

        let mut reply = Message::new(MSG_REMOTE_COMMAND_ECHO);
        reply.write_str(Some(&command));
        reply.write_str(Some(&output));
        if let Some(sender) = msg.sender() {
            session.send_to(sender, reply);
        }
    });

    session.register_handler(MSG_REMOTE_COMMAND_ECHO, |_session, _app, msg| {
        if let (Some(Some(command)), Some(Some(output))) = (msg.read_str(), msg.read_str()) {
            log::info!("{} -> {}", command, output);
        }
    });
}
