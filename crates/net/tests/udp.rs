use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use tether::{
    ConnectionId, Delivery, IncomingMessage, MessageKind, OutgoingMessage, PacketLossSimulation,
    SERVER_CONNECTION_ID, Transport, UdpConfig, UdpTransport,
};

static PORT_COUNTER: AtomicU16 = AtomicU16::new(41000);

fn next_port() -> u16 {
    PORT_COUNTER.fetch_add(10, Ordering::SeqCst)
}

fn clock(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

/// Pumps both endpoints until `endpoint` surfaces a message or the timeout
/// runs out.
fn pump_for_message(
    endpoint: &mut UdpTransport,
    other: &mut UdpTransport,
    start: Instant,
    timeout_ms: u64,
) -> Option<IncomingMessage> {
    let began = Instant::now();
    while began.elapsed() < Duration::from_millis(timeout_ms) {
        let now = clock(start);
        endpoint.update(now);
        other.update(now);
        if let Some(msg) = endpoint.next_message() {
            return Some(msg);
        }
        thread::sleep(Duration::from_millis(1));
    }
    None
}

fn connected_pair_with(
    server_config: UdpConfig,
) -> (UdpTransport, UdpTransport, ConnectionId, Instant) {
    let port = server_config.bind_port;
    let start = Instant::now();

    let mut server = UdpTransport::server(server_config).unwrap();
    server.create_session("arena").unwrap();

    let addr: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
    let mut client = UdpTransport::client(addr, UdpConfig::default()).unwrap();
    client.join_session("arena", "open sesame").unwrap();

    let mut approval =
        pump_for_message(&mut server, &mut client, start, 4000).expect("approval request");
    assert_eq!(approval.kind(), MessageKind::ConnectionApproval);
    assert_eq!(approval.read_str().unwrap(), "open sesame");
    let conn = approval.sender();

    server.approve(conn);
    let connected =
        pump_for_message(&mut client, &mut server, start, 4000).expect("connected notice");
    assert_eq!(connected.kind(), MessageKind::Connected);
    assert_eq!(connected.sender(), SERVER_CONNECTION_ID);

    // The server queues its own notice when it approves.
    let notice = pump_for_message(&mut server, &mut client, start, 4000).expect("server notice");
    assert_eq!(notice.kind(), MessageKind::Connected);
    assert_eq!(notice.sender(), conn);

    (server, client, conn, start)
}

fn connected_pair(port: u16) -> (UdpTransport, UdpTransport, ConnectionId, Instant) {
    connected_pair_with(UdpConfig {
        bind_port: port,
        ..UdpConfig::default()
    })
}

#[test]
fn test_handshake_approves_and_connects() {
    let (server, client, conn, _start) = connected_pair(next_port());

    assert!(conn >= 1);
    assert!(server.has_connections());
    assert_eq!(server.connection_count(), 1);
    assert!(client.is_connected());
    assert!(client.has_connections());
}

#[test]
fn test_reliable_messages_arrive_in_order() {
    let (mut server, mut client, conn, start) = connected_pair(next_port());

    for text in ["one", "two", "three"] {
        let mut out = OutgoingMessage::new(MessageKind::Chat);
        out.write_str(text);
        server.send_to(conn, &out, Delivery::ReliableOrdered, 0);
    }

    let mut received = Vec::new();
    while received.len() < 3 {
        let mut msg =
            pump_for_message(&mut client, &mut server, start, 4000).expect("chat message");
        if msg.kind() == MessageKind::Chat {
            received.push(msg.read_str().unwrap());
        }
    }
    assert_eq!(received, ["one", "two", "three"]);
}

#[test]
fn test_unknown_session_is_denied() {
    let port = next_port();
    let start = Instant::now();

    let mut server = UdpTransport::server(UdpConfig {
        bind_port: port,
        ..UdpConfig::default()
    })
    .unwrap();
    server.create_session("arena").unwrap();

    let addr: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
    let mut client = UdpTransport::client(addr, UdpConfig::default()).unwrap();
    client.join_session("somewhere else", "").unwrap();

    let denial = pump_for_message(&mut client, &mut server, start, 4000).expect("denial notice");
    assert_eq!(denial.kind(), MessageKind::Disconnected);
    assert!(!client.is_connected());
    assert!(!server.has_connections());
}

#[test]
fn test_loss_does_not_stop_reliable_delivery() {
    let (mut server, mut client, conn, start) = connected_pair_with(UdpConfig {
        bind_port: next_port(),
        loss_sim: PacketLossSimulation {
            enabled: true,
            loss_percent: 0.25,
        },
        ..UdpConfig::default()
    });

    for index in 0..5 {
        let mut out = OutgoingMessage::new(MessageKind::Chat);
        out.write_str(&format!("payload {index}"));
        server.send_to(conn, &out, Delivery::ReliableOrdered, 0);
    }

    let mut received = Vec::new();
    while received.len() < 5 {
        let mut msg =
            pump_for_message(&mut client, &mut server, start, 8000).expect("retransmitted chat");
        if msg.kind() == MessageKind::Chat {
            received.push(msg.read_str().unwrap());
        }
    }
    for (index, text) in received.iter().enumerate() {
        assert_eq!(text, &format!("payload {index}"));
    }
}

#[test]
fn test_silent_peer_times_out() {
    let (mut server, client, conn, start) = connected_pair_with(UdpConfig {
        bind_port: next_port(),
        timeout_ms: 300,
        keepalive_ms: 10_000,
        ..UdpConfig::default()
    });
    drop(client);

    let began = Instant::now();
    let mut notice = None;
    while began.elapsed() < Duration::from_secs(3) {
        server.update(clock(start));
        if let Some(msg) = server.next_message() {
            notice = Some(msg);
            break;
        }
        thread::sleep(Duration::from_millis(5));
    }

    let notice = notice.expect("timeout notice");
    assert_eq!(notice.kind(), MessageKind::Disconnected);
    assert_eq!(notice.sender(), conn);
    assert_eq!(server.connection_count(), 0);
}

#[test]
fn test_stats_track_traffic() {
    let (mut server, mut client, conn, start) = connected_pair(next_port());

    let mut out = OutgoingMessage::new(MessageKind::Chat);
    out.write_str("counted");
    server.send_to(conn, &out, Delivery::ReliableOrdered, 0);
    let msg = pump_for_message(&mut client, &mut server, start, 4000).expect("chat message");
    assert_eq!(msg.kind(), MessageKind::Chat);

    let server_stats = server.stats();
    assert!(server_stats.packets_sent > 0);
    assert!(server_stats.bytes_sent > 0);
    assert!(server_stats.messages_sent >= 1);

    let client_stats = client.stats();
    assert!(client_stats.packets_received > 0);
    assert!(client_stats.bytes_received > 0);
    assert!(client_stats.messages_received >= 1);
}
