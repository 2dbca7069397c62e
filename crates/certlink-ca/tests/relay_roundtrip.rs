//! Relay engine integration tests over loopback TCP.
//!
//! A real manager socket talks to a real relay; the DUT side is either
//! the real DUT dispatcher (end-to-end) or a scripted endpoint.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use certlink_ca::commands::{CommandTable, MatchPolicy};
use certlink_ca::relay::{Relay, RelayConfig};
use certlink_ca::response::ResponseTable;
use certlink_core::types::{ConnKind, DutLink};
use certlink_dut::context::AgentContext;
use certlink_dut::dispatch::{Dispatcher, DispatcherConfig};

/// DUT link description pointing at a loopback TCP port.
fn tcp_dut(port: u16) -> DutLink {
    DutLink {
        kind: ConnKind::Tcp,
        device: String::new(),
        addr: "127.0.0.1".into(),
        port,
        baud: 0,
    }
}

/// Relay config tuned for test speed: short waits, same policy.
fn test_relay_config(dut_port: u16) -> RelayConfig {
    let mut config = RelayConfig::new("127.0.0.1", 0, tcp_dut(dut_port));
    config.ctrl_timeout = Duration::from_millis(500);
    config.accept_timeout = Duration::from_millis(100);
    config.connect_timeout = Duration::from_millis(500);
    config.unknown_backoff = Duration::from_millis(50);
    config
}

/// Bind the relay's manager listener, then run it in the background.
async fn spawn_relay(config: RelayConfig) -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
    let mut relay = Relay::new(config);
    let addr = relay.bind_listener().await.unwrap();
    let task = tokio::spawn(async move { relay.run().await });
    (addr, task)
}

/// Start the real DUT agent on a loopback port.
async fn spawn_dut() -> (u16, tokio::task::JoinHandle<()>) {
    let ctx = AgentContext::new("wlan0");
    let mut config = DispatcherConfig::tcp("127.0.0.1", 0);
    config.ctrl_timeout = Duration::from_millis(500);
    config.accept_timeout = Duration::from_millis(100);
    let mut dispatcher = Dispatcher::new(config, ctx);
    let addr = dispatcher.bind_listener().await.unwrap();
    let task = tokio::spawn(async move {
        let _ = dispatcher.run().await;
    });
    (addr.port(), task)
}

/// Read one CRLF-terminated status line from the manager socket.
async fn read_line(stream: &mut TcpStream, acc: &mut Vec<u8>) -> String {
    loop {
        if let Some(pos) = acc.windows(2).position(|w| w == b"\r\n") {
            let line = String::from_utf8_lossy(&acc[..pos + 2]).into_owned();
            acc.drain(..pos + 2);
            return line;
        }
        let mut buf = [0u8; 256];
        let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
            .await
            .expect("timed out waiting for a status line")
            .expect("manager read failed");
        assert!(n > 0, "relay closed the manager link unexpectedly");
        acc.extend_from_slice(&buf[..n]);
    }
}

#[tokio::test]
async fn end_to_end_get_version() {
    let (dut_port, dut_task) = spawn_dut().await;
    let (relay_addr, relay_task) = spawn_relay(test_relay_config(dut_port)).await;

    let mut manager = TcpStream::connect(relay_addr).await.unwrap();
    manager
        .write_all(b"GetVersion,interface,eth0\r\n")
        .await
        .unwrap();

    let mut acc = Vec::new();
    let first = read_line(&mut manager, &mut acc).await;
    assert_eq!(first, "status,RUNNING\r\n");

    let second = read_line(&mut manager, &mut acc).await;
    let expected = format!("status,COMPLETE,version,{}\r\n", env!("CARGO_PKG_VERSION"));
    assert_eq!(second, expected);

    relay_task.abort();
    dut_task.abort();
}

#[tokio::test]
async fn running_is_sent_before_any_dut_interaction() {
    // The DUT endpoint accepts but never answers; the RUNNING line must
    // still arrive immediately, ahead of the eventual timeout status.
    let silent_dut = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dut_port = silent_dut.local_addr().unwrap().port();
    let dut_task = tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = silent_dut.accept().await else {
                break;
            };
            // Hold the connection open, say nothing.
            tokio::spawn(async move {
                let _stream = stream;
                tokio::time::sleep(Duration::from_secs(30)).await;
            });
        }
    });

    let (relay_addr, relay_task) = spawn_relay(test_relay_config(dut_port)).await;

    let mut manager = TcpStream::connect(relay_addr).await.unwrap();
    manager
        .write_all(b"GetVersion,interface,eth0\r\n")
        .await
        .unwrap();

    let mut acc = Vec::new();
    assert_eq!(read_line(&mut manager, &mut acc).await, "status,RUNNING\r\n");
    assert_eq!(
        read_line(&mut manager, &mut acc).await,
        "status,INVALID,response_timeout\r\n"
    );

    relay_task.abort();
    dut_task.abort();
}

#[tokio::test]
async fn unknown_command_never_contacts_the_dut() {
    let fake_dut = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dut_port = fake_dut.local_addr().unwrap().port();

    let (relay_addr, relay_task) = spawn_relay(test_relay_config(dut_port)).await;

    let mut manager = TcpStream::connect(relay_addr).await.unwrap();
    manager.write_all(b"BogusCommand,x,y\r\n").await.unwrap();

    let mut acc = Vec::new();
    assert_eq!(read_line(&mut manager, &mut acc).await, "status,RUNNING\r\n");
    assert_eq!(
        read_line(&mut manager, &mut acc).await,
        "status,INVALID,no_such_command\r\n"
    );

    // No connection may have been made toward the DUT endpoint.
    let got_conn = tokio::time::timeout(Duration::from_millis(300), fake_dut.accept()).await;
    assert!(got_conn.is_err(), "relay opened a DUT connection for an unknown command");

    relay_task.abort();
}

#[tokio::test]
async fn dut_connect_failure_reports_error_status() {
    // Claim a port and free it again so connecting is refused.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_port = listener.local_addr().unwrap().port();
    drop(listener);

    let (relay_addr, relay_task) = spawn_relay(test_relay_config(dead_port)).await;

    let mut manager = TcpStream::connect(relay_addr).await.unwrap();
    manager
        .write_all(b"GetVersion,interface,eth0\r\n")
        .await
        .unwrap();

    let mut acc = Vec::new();
    assert_eq!(read_line(&mut manager, &mut acc).await, "status,RUNNING\r\n");
    assert_eq!(read_line(&mut manager, &mut acc).await, "status,ERROR\r\n");

    // The relay must keep serving: a second command round-trips the
    // same error surface instead of hitting a leaked descriptor.
    manager
        .write_all(b"GetVersion,interface,eth0\r\n")
        .await
        .unwrap();
    assert_eq!(read_line(&mut manager, &mut acc).await, "status,RUNNING\r\n");
    assert_eq!(read_line(&mut manager, &mut acc).await, "status,ERROR\r\n");

    relay_task.abort();
}

#[tokio::test]
async fn malformed_parameters_report_incorrect_syntax() {
    // Missing the mandatory ssid parameter; the encoder rejects before
    // any DUT contact, so a dead endpoint is fine here.
    let (relay_addr, relay_task) = spawn_relay(test_relay_config(1)).await;

    let mut manager = TcpStream::connect(relay_addr).await.unwrap();
    manager
        .write_all(b"StaAssociate,interface,eth0\r\n")
        .await
        .unwrap();

    let mut acc = Vec::new();
    assert_eq!(read_line(&mut manager, &mut acc).await, "status,RUNNING\r\n");
    assert_eq!(
        read_line(&mut manager, &mut acc).await,
        "status,INVALID,incorrect_syntax\r\n"
    );

    relay_task.abort();
}

#[tokio::test]
async fn trailing_whitespace_and_crlf_are_tolerated() {
    let (dut_port, dut_task) = spawn_dut().await;
    let (relay_addr, relay_task) = spawn_relay(test_relay_config(dut_port)).await;

    let mut manager = TcpStream::connect(relay_addr).await.unwrap();
    manager
        .write_all(b"GetVersion,interface,eth0 \t \r\n")
        .await
        .unwrap();

    let mut acc = Vec::new();
    assert_eq!(read_line(&mut manager, &mut acc).await, "status,RUNNING\r\n");
    let line = read_line(&mut manager, &mut acc).await;
    assert!(line.starts_with("status,COMPLETE,version,"), "got: {line}");

    relay_task.abort();
    dut_task.abort();
}

#[tokio::test]
async fn blank_input_is_ignored() {
    let (dut_port, dut_task) = spawn_dut().await;
    let (relay_addr, relay_task) = spawn_relay(test_relay_config(dut_port)).await;

    let mut manager = TcpStream::connect(relay_addr).await.unwrap();

    // Whitespace-only input produces no reply at all; a real command
    // afterwards still works.
    manager.write_all(b"\r\n").await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    manager
        .write_all(b"GetVersion,interface,eth0\r\n")
        .await
        .unwrap();

    let mut acc = Vec::new();
    assert_eq!(read_line(&mut manager, &mut acc).await, "status,RUNNING\r\n");
    let line = read_line(&mut manager, &mut acc).await;
    assert!(line.starts_with("status,COMPLETE,version,"), "got: {line}");

    relay_task.abort();
    dut_task.abort();
}

#[tokio::test]
async fn exact_match_policy_rejects_decorated_names() {
    // Under the default substring policy a vendor-decorated name like
    // xyzGetVersion2 still reaches the DUT; under Exact it must not.
    let (dut_port, dut_task) = spawn_dut().await;

    let commands = CommandTable::builtin().with_policy(MatchPolicy::Exact);
    let mut relay = Relay::with_tables(
        test_relay_config(dut_port),
        commands,
        ResponseTable::builtin(),
    );
    let relay_addr = relay.bind_listener().await.unwrap();
    let relay_task = tokio::spawn(async move { relay.run().await });

    let mut manager = TcpStream::connect(relay_addr).await.unwrap();
    manager
        .write_all(b"xyzGetVersion2,interface,eth0\r\n")
        .await
        .unwrap();

    let mut acc = Vec::new();
    assert_eq!(read_line(&mut manager, &mut acc).await, "status,RUNNING\r\n");
    assert_eq!(
        read_line(&mut manager, &mut acc).await,
        "status,INVALID,no_such_command\r\n"
    );

    // The exact name still round-trips.
    manager
        .write_all(b"GetVersion,interface,eth0\r\n")
        .await
        .unwrap();
    assert_eq!(read_line(&mut manager, &mut acc).await, "status,RUNNING\r\n");
    let line = read_line(&mut manager, &mut acc).await;
    assert!(line.starts_with("status,COMPLETE,version,"), "got: {line}");

    relay_task.abort();
    dut_task.abort();
}

#[tokio::test]
async fn end_to_end_get_version_over_udp_dut_link() {
    let ctx = AgentContext::new("wlan0");
    let mut dut_config = DispatcherConfig::udp("127.0.0.1", 0);
    dut_config.ctrl_timeout = Duration::from_millis(500);
    let mut dispatcher = Dispatcher::new(dut_config, ctx);
    let dut_port = dispatcher.bind_udp().await.unwrap().port();
    let dut_task = tokio::spawn(async move {
        let _ = dispatcher.run().await;
    });

    let mut config = test_relay_config(dut_port);
    config.dut.kind = ConnKind::Udp;
    let (relay_addr, relay_task) = spawn_relay(config).await;

    let mut manager = TcpStream::connect(relay_addr).await.unwrap();
    manager
        .write_all(b"GetVersion,interface,eth0\r\n")
        .await
        .unwrap();

    let mut acc = Vec::new();
    assert_eq!(read_line(&mut manager, &mut acc).await, "status,RUNNING\r\n");
    let line = read_line(&mut manager, &mut acc).await;
    assert!(line.starts_with("status,COMPLETE,version,"), "got: {line}");

    relay_task.abort();
    dut_task.abort();
}

#[tokio::test]
async fn end_to_end_traffic_stream_lifecycle() {
    let (dut_port, dut_task) = spawn_dut().await;
    let (relay_addr, relay_task) = spawn_relay(test_relay_config(dut_port)).await;

    let mut manager = TcpStream::connect(relay_addr).await.unwrap();
    let mut acc = Vec::new();

    // Configure a short finite stream toward a loopback sink.
    let sink = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let sink_port = sink.local_addr().unwrap().port();

    let config_cmd = format!(
        "TrafficAgentConfig,destination,127.0.0.1,destport,{sink_port},rate,1000,framecount,3\r\n"
    );
    manager.write_all(config_cmd.as_bytes()).await.unwrap();
    assert_eq!(read_line(&mut manager, &mut acc).await, "status,RUNNING\r\n");
    assert_eq!(
        read_line(&mut manager, &mut acc).await,
        "status,COMPLETE,streamid,1\r\n"
    );

    manager
        .write_all(b"TrafficAgentSend,streamid,1\r\n")
        .await
        .unwrap();
    assert_eq!(read_line(&mut manager, &mut acc).await, "status,RUNNING\r\n");
    assert_eq!(
        read_line(&mut manager, &mut acc).await,
        "status,COMPLETE,streamid,1\r\n"
    );

    // Let the 3-frame budget drain, then collect the counters.
    tokio::time::sleep(Duration::from_millis(300)).await;

    manager
        .write_all(b"TrafficAgentReceiveStop,streamid,1\r\n")
        .await
        .unwrap();
    assert_eq!(read_line(&mut manager, &mut acc).await, "status,RUNNING\r\n");
    let stats = read_line(&mut manager, &mut acc).await;
    assert!(
        stats.starts_with("status,COMPLETE,streamid,1,txFrames,3,"),
        "got: {stats}"
    );

    relay_task.abort();
    dut_task.abort();
}
