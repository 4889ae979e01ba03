//! Shared harness for driving a relay through its sockets

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::timeout;

use wgmux::noise::testing::{build_initiation, build_response};
use wgmux::{
    IndexTranslationTable, NoisePrivateKey, NoisePublicKey, PeerEntry, Server, ServerConfig,
    ServerEntry, SourceValidateLevel,
};

/// Generous bound for anything that should happen promptly
pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// Bound for things that must NOT happen
pub const SILENCE_TIMEOUT: Duration = Duration::from_millis(300);

/// Build a peer entry for test configs
pub fn peer_entry(
    forward_to: &str,
    pubkey: Option<NoisePublicKey>,
    csvl: SourceValidateLevel,
) -> PeerEntry {
    PeerEntry {
        forward_to: forward_to.to_string(),
        pubkey,
        csvl,
        ssvl: SourceValidateLevel::Default,
        forward_addr: None,
    }
}

/// Build a single-backend server config listening on an ephemeral port
pub fn relay_config(
    server_key: &NoisePrivateKey,
    peers: Vec<PeerEntry>,
    timeout_secs: u64,
    obfs: &str,
    cache_file_path: Option<String>,
) -> ServerConfig {
    ServerConfig {
        listen: "127.0.0.1:0".to_string(),
        timeout: timeout_secs,
        obfs: obfs.to_string(),
        servers: vec![ServerEntry {
            privkey: Some(server_key.clone()),
            privkey_file: None,
            address: String::new(),
            peers,
            csvl: SourceValidateLevel::Default,
            ssvl: SourceValidateLevel::Default,
            public_key: None,
        }],
        cache: wgmux::config::CacheSettings {
            cache_file_path,
            skip_load_cache: false,
        },
    }
}

/// Start a relay and wait until its client-facing socket is bound
pub async fn start_relay(config: ServerConfig) -> (Arc<IndexTranslationTable>, SocketAddr) {
    let server = Server::new(config).expect("relay config");
    let table = Arc::clone(server.table());
    tokio::spawn(async move {
        let _ = server.run().await;
    });

    let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
    loop {
        if let Some(addr) = table.client_local_addr() {
            return (table, addr);
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "relay did not bind in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Receive one datagram or panic after the timeout
pub async fn must_recv(socket: &UdpSocket, what: &str) -> (Vec<u8>, SocketAddr) {
    let mut buf = vec![0u8; 65536];
    let (len, src) = timeout(RECV_TIMEOUT, socket.recv_from(&mut buf))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
        .expect("socket recv");
    buf.truncate(len);
    (buf, src)
}

/// Assert that nothing arrives on the socket for a short window
pub async fn must_stay_silent(socket: &UdpSocket, what: &str) {
    let mut buf = vec![0u8; 65536];
    let result = timeout(SILENCE_TIMEOUT, socket.recv_from(&mut buf)).await;
    assert!(result.is_err(), "unexpected {what} datagram");
}

/// Poll until the condition holds or the timeout elapses
pub async fn wait_until(mut condition: impl FnMut() -> bool, what: &str) {
    let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting: {what}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Outcome of a completed handshake through the relay
pub struct Handshake {
    /// Sender index the backend saw on the forwarded initiation
    pub client_proxy_index: u32,
    /// Sender index the backend chose for itself
    pub server_origin_index: u32,
    /// Sender index the client saw on the forwarded response
    pub server_proxy_index: u32,
    /// Address of the relay's backend-facing socket
    pub relay_server_addr: SocketAddr,
}

/// Run a full initiation/response exchange through the relay.
///
/// `client_socket` plays the WireGuard client, `backend` the WireGuard
/// server behind the relay.
pub async fn run_handshake(
    client_socket: &UdpSocket,
    relay_client_addr: SocketAddr,
    backend: &UdpSocket,
    client_key: &NoisePrivateKey,
    server_pk: &NoisePublicKey,
    client_origin_index: u32,
    server_origin_index: u32,
) -> Handshake {
    let initiation = build_initiation(client_key, server_pk, client_origin_index);
    client_socket
        .send_to(&initiation, relay_client_addr)
        .await
        .expect("send initiation");

    let (forwarded, relay_server_addr) = must_recv(backend, "forwarded initiation").await;
    assert_eq!(forwarded.len(), initiation.len(), "initiation size preserved");
    assert_eq!(forwarded[0], 1);
    let client_proxy_index = u32::from_le_bytes(forwarded[4..8].try_into().unwrap());

    let response = build_response(
        &client_key.public_key(),
        server_origin_index,
        client_proxy_index,
    );
    backend
        .send_to(&response, relay_server_addr)
        .await
        .expect("send response");

    let (forwarded, _) = must_recv(client_socket, "forwarded response").await;
    assert_eq!(forwarded[0], 2);
    let server_proxy_index = u32::from_le_bytes(forwarded[4..8].try_into().unwrap());
    let receiver = u32::from_le_bytes(forwarded[8..12].try_into().unwrap());
    assert_eq!(
        receiver, client_origin_index,
        "response receiver translated back to the client's own index"
    );

    Handshake {
        client_proxy_index,
        server_origin_index,
        server_proxy_index,
        relay_server_addr,
    }
}
