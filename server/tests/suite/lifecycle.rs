use std::time::Duration;

use crate::suite::support::Client;
use crate::suite::support::PKG;
use crate::suite::support::TestDaemon;
use pretty_assertions::assert_eq;
use privd_protocol::Response;

#[tokio::test]
async fn connections_beyond_the_cap_are_closed_unauthenticated() {
    let daemon = TestDaemon::start_with(|config| config.max_connections = 2).await;

    let mut first = Client::connect(daemon.addr).await;
    first.handshake(PKG).await;
    assert_eq!(first.request("PING").await, Response::ok("PONG"));
    let mut second = Client::connect(daemon.addr).await;
    second.handshake(PKG).await;
    assert_eq!(second.request("PING").await, Response::ok("PONG"));

    // Both workers are registered by now; the third accept must be rejected
    // before any handshake.
    let mut third = Client::connect(daemon.addr).await;
    assert_eq!(third.read_line().await, None, "no auth prompt expected");
    assert!(daemon.registry.len() <= 2);
    assert!(daemon.registry.peers().len() <= 2);

    // Existing connections are unaffected.
    assert_eq!(first.request("PING").await, Response::ok("PONG"));

    daemon.stop().await;
}

#[tokio::test]
async fn a_slot_frees_up_when_a_connection_closes() {
    let daemon = TestDaemon::start_with(|config| config.max_connections = 1).await;

    let mut first = Client::connect(daemon.addr).await;
    first.handshake(PKG).await;
    assert_eq!(first.request("PING").await, Response::ok("PONG"));
    drop(first);

    // Deregistration races the next accept; poll briefly.
    let mut admitted = false;
    for _ in 0..50 {
        let mut next = Client::connect(daemon.addr).await;
        if next.read_line().await.is_some() {
            next.send_line(PKG).await;
            admitted = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(admitted, "slot never freed after disconnect");

    daemon.stop().await;
}

#[tokio::test]
async fn idle_connections_are_closed() {
    let daemon = TestDaemon::start_with(|config| config.idle_timeout_ms = 200).await;

    let mut client = Client::connect(daemon.addr).await;
    client.handshake(PKG).await;
    assert_eq!(client.request("PING").await, Response::ok("PONG"));

    // Send nothing; the server must close the connection on its own.
    assert_eq!(client.read_line().await, None);

    daemon.stop().await;
}

#[tokio::test]
async fn shutdown_closes_live_connections_and_stops_accepting() {
    let daemon = TestDaemon::start().await;

    let mut client = Client::connect(daemon.addr).await;
    client.handshake(PKG).await;
    assert_eq!(client.request("PING").await, Response::ok("PONG"));

    let addr = daemon.addr;
    let registry = daemon.registry.clone();
    daemon.stop().await;

    assert_eq!(client.read_line().await, None, "worker should be cancelled");
    assert!(registry.is_empty(), "registry should drain on shutdown");
    assert!(
        tokio::net::TcpStream::connect(addr).await.is_err(),
        "listener should be closed"
    );
}

#[tokio::test]
async fn per_connection_order_is_arrival_order() {
    let daemon = TestDaemon::start().await;

    let mut client = Client::connect(daemon.addr).await;
    client.handshake(PKG).await;

    // Pipeline several commands before reading any reply; responses must
    // come back in exactly the order sent.
    client.send_line("PING").await;
    client.send_line("VERSION").await;
    client.send_line("CHECK_AUTH:com.example.app").await;

    let first: Response =
        serde_json::from_str(&client.read_line().await.expect("line")).expect("json");
    let second: Response =
        serde_json::from_str(&client.read_line().await.expect("line")).expect("json");
    let third: Response =
        serde_json::from_str(&client.read_line().await.expect("line")).expect("json");
    assert_eq!(first, Response::ok("PONG"));
    assert_eq!(second, Response::ok(privd_server::SERVER_VERSION));
    assert_eq!(third, Response::ok("true"));

    daemon.stop().await;
}
