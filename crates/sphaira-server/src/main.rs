//! The `sphaira-server` binary: load config, bind TCP, run the server loop
//! until Ctrl-C.

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use clap::Parser;
use sphaira_config::{CliArgs, Config, NetworkConfig, default_config_dir};
use sphaira_net::{FrameConfig, TcpConfig, TcpServerTransport, watch_ctrl_c};
use sphaira_server::{Server, ServerError};

fn tcp_config(network: &NetworkConfig) -> TcpConfig {
    TcpConfig {
        frame: FrameConfig::default(),
        max_connections: usize::try_from(network.max_players).unwrap_or(usize::MAX),
        connection_timeout: network.connection_timeout(),
        keepalive_interval: network.keepalive_interval(),
        ..TcpConfig::default()
    }
}

fn bind_address(network: &NetworkConfig) -> Result<SocketAddr, ServerError> {
    let target = format!("{}:{}", network.server_address, network.server_port);
    target
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or(ServerError::Address(target))
}

fn run(args: &CliArgs) -> Result<(), ServerError> {
    let config_dir = args.config.clone().unwrap_or_else(default_config_dir);
    let mut config = Config::load_or_create(&config_dir)?;
    config.apply_cli_overrides(args);
    config.validate()?;

    sphaira_log::init_logging(
        Some(&config_dir.join("logs")),
        cfg!(debug_assertions) || config.debug.log_to_file,
        Some(&config),
        "sphaira-server.log",
    );
    tracing::info!("Config loaded from {}", config_dir.display());

    let addr = bind_address(&config.network)?;
    let transport = TcpServerTransport::bind(addr, tcp_config(&config.network))?;
    let mut server = Server::new(transport, &config)?;

    let stop = Arc::new(AtomicBool::new(false));
    watch_ctrl_c(Arc::clone(&stop));
    server.run(&stop);
    server.transport_mut().shutdown();
    Ok(())
}

fn main() {
    let args = CliArgs::parse();
    if let Err(e) = run(&args) {
        eprintln!("sphaira-server: {e}");
        std::process::exit(1);
    }
}
