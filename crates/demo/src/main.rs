mod actors;
mod apps;

use std::net::SocketAddr;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use actors::build_registry;
use apps::{PongClient, PongServer};
use tether::{
    ClientPeer, MemoryNetwork, MemoryTransport, PacketLossSimulation, PeerConfig, ServerPeer,
    Transport, UdpConfig, UdpTransport,
};

#[derive(Parser)]
#[command(name = "tether-demo")]
#[command(about = "Headless pong over the tether replication layer")]
struct Args {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Host a session and run the authoritative court.
    Serve {
        #[arg(short, long, default_value_t = tether::DEFAULT_PORT)]
        port: u16,

        #[arg(short, long, default_value_t = 60)]
        tick_rate: u32,

        #[arg(short, long, default_value_t = 32)]
        max_clients: usize,

        #[arg(long, help = "Enable packet loss simulation")]
        simulate_packet_loss: bool,

        #[arg(long, default_value_t = 0.0, help = "Packet loss fraction (0-1)")]
        loss_percent: f32,

        #[arg(long, default_value_t = 0, help = "Stop after this many seconds, 0 runs forever")]
        seconds: u64,
    },
    /// Join a hosted session and play a paddle.
    Join {
        #[arg(short, long, default_value = "127.0.0.1:14242")]
        server: String,

        #[arg(short, long, default_value = "player")]
        name: String,

        #[arg(long, default_value_t = 0, help = "Stop after this many seconds, 0 runs forever")]
        seconds: u64,
    },
    /// Run a server and a client in one process over the loopback transport.
    Local {
        #[arg(long, default_value_t = 600)]
        ticks: u32,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Args::parse().mode {
        Mode::Serve {
            port,
            tick_rate,
            max_clients,
            simulate_packet_loss,
            loss_percent,
            seconds,
        } => {
            let config = UdpConfig {
                bind_port: port,
                max_clients,
                loss_sim: PacketLossSimulation {
                    enabled: simulate_packet_loss,
                    loss_percent,
                },
                ..UdpConfig::default()
            };
            run_server(config, tick_rate, seconds)
        }
        Mode::Join {
            server,
            name,
            seconds,
        } => run_client(&server, &name, seconds),
        Mode::Local { ticks } => run_local(ticks),
    }
}

fn run_server(config: UdpConfig, tick_rate: u32, seconds: u64) -> Result<()> {
    let transport = UdpTransport::server(config)?;
    let mut peer = ServerPeer::new(transport, PeerConfig { tick_rate }, build_registry());
    let mut app = PongServer::new();

    peer.create_session("pong")?;
    app.build_court(&mut peer);

    let epoch = Instant::now();
    loop {
        let now = epoch.elapsed().as_secs_f64() * 1000.0;
        if peer.update(now, &mut app) {
            app.step(&mut peer);
        }
        if seconds > 0 && epoch.elapsed() >= Duration::from_secs(seconds) {
            break;
        }
        thread::sleep(Duration::from_millis(1));
    }

    let stats = peer.transport().stats();
    log::info!(
        "shutting down at {}, {} packets out / {} in",
        app.score_line(),
        stats.packets_sent,
        stats.packets_received
    );
    peer.leave_session();
    Ok(())
}

fn run_client(server: &str, name: &str, seconds: u64) -> Result<()> {
    let addr: SocketAddr = server.parse().context("invalid server address")?;
    let transport = UdpTransport::client(addr, UdpConfig::default())?;
    let mut peer = ClientPeer::new(transport, PeerConfig::default(), build_registry());
    let mut app = PongClient::new(name);

    peer.join_session("pong", "pong")?;

    let epoch = Instant::now();
    loop {
        let now = epoch.elapsed().as_secs_f64() * 1000.0;
        if peer.update(now, &mut app) {
            app.drive(&mut peer);
        }
        if !peer.transport().is_connected() {
            log::info!("session closed");
            break;
        }
        if seconds > 0 && epoch.elapsed() >= Duration::from_secs(seconds) {
            peer.leave_session();
            break;
        }
        thread::sleep(Duration::from_millis(1));
    }
    Ok(())
}

fn run_local(ticks: u32) -> Result<()> {
    let network = MemoryNetwork::new();
    let mut server = ServerPeer::new(
        MemoryTransport::new(&network),
        PeerConfig::default(),
        build_registry(),
    );
    let mut client = ClientPeer::new(
        MemoryTransport::new(&network),
        PeerConfig::default(),
        build_registry(),
    );
    let mut host = PongServer::new();
    let mut app = PongClient::new("local");

    server.create_session("pong")?;
    host.build_court(&mut server);
    client.join_session("pong", "pong")?;

    let epoch = Instant::now();
    let mut completed = 0;
    while completed < ticks {
        let now = epoch.elapsed().as_secs_f64() * 1000.0;
        if server.update(now, &mut host) {
            host.step(&mut server);
            completed += 1;
        }
        if client.update(now, &mut app) {
            app.drive(&mut client);
        }
        thread::sleep(Duration::from_millis(1));
    }

    let stats = server.transport().stats();
    log::info!(
        "{} ticks played to {}, {} messages replicated",
        ticks,
        host.score_line(),
        stats.messages_sent
    );
    client.leave_session();
    server.leave_session();
    Ok(())
}
