//! The `sphaira-client` binary: a headless player that joins a server and
//! walks a great circle around the world sphere until Ctrl-C.

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use clap::Parser;
use glam::{Quat, Vec3};
use sphaira_client::{Client, ClientError, ClientSettings};
use sphaira_config::{CliArgs, Config, NetworkConfig, default_config_dir};
use sphaira_net::{TcpClientTransport, TcpConfig, watch_ctrl_c};

/// Walking speed in radians of arc per second.
const WALK_SPEED: f32 = 0.2;
const REPORT_INTERVAL: Duration = Duration::from_secs(5);

fn server_address(network: &NetworkConfig) -> Result<SocketAddr, ClientError> {
    let target = format!("{}:{}", network.server_address, network.server_port);
    target
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or(ClientError::Address(target))
}

/// Position on a great circle through the poles, `angle` radians along.
fn walk_position(radius: f32, angle: f32) -> Vec3 {
    Quat::from_rotation_x(angle) * (Vec3::Y * radius)
}

fn run(args: &CliArgs) -> Result<(), ClientError> {
    let config_dir = args.config.clone().unwrap_or_else(default_config_dir);
    let mut config = Config::load_or_create(&config_dir)?;
    config.apply_cli_overrides(args);
    config.validate()?;

    sphaira_log::init_logging(
        Some(&config_dir.join("logs")),
        cfg!(debug_assertions) || config.debug.log_to_file,
        Some(&config),
        "sphaira-client.log",
    );

    let addr = server_address(&config.network)?;
    let tcp = TcpConfig {
        connection_timeout: config.network.connection_timeout(),
        keepalive_interval: config.network.keepalive_interval(),
        ..TcpConfig::default()
    };
    let transport = TcpClientTransport::connect(addr, tcp)?;
    let mut client = Client::new(transport, ClientSettings::from_config(&config))?;
    let world = client.join()?;
    tracing::info!(
        "World: seed {}, radius {}, density {}, server time {:.1}s",
        world.seed,
        world.radius,
        world.density,
        world.epoch
    );

    let stop = Arc::new(AtomicBool::new(false));
    watch_ctrl_c(Arc::clone(&stop));

    let frame = config.network.poll_interval();
    let mut angle = 0.0f32;
    let mut last_frame = Instant::now();
    let mut last_report = Instant::now();
    while !stop.load(Ordering::Relaxed) {
        let now = Instant::now();
        let dt = now - last_frame;
        last_frame = now;

        angle = (angle + WALK_SPEED * dt.as_secs_f32()) % std::f32::consts::TAU;
        client.update(dt, walk_position(world.radius, angle));
        if !client.is_connected() {
            tracing::warn!("Lost connection to server");
            break;
        }

        if last_report.elapsed() >= REPORT_INTERVAL {
            last_report = Instant::now();
            tracing::info!(
                "Roster {:?} at server time {:.1}s",
                client.remotes().roster(),
                client.server_time().unwrap_or_default()
            );
            for view in client.remotes().iter() {
                tracing::info!("  player {} at {:.2}", view.id(), view.rendered());
            }
        }
        std::thread::sleep(frame);
    }

    client.transport_mut().disconnect();
    Ok(())
}

fn main() {
    let args = CliArgs::parse();
    if let Err(e) = run(&args) {
        eprintln!("sphaira-client: {e}");
        std::process::exit(1);
    }
}
