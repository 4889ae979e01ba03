//! Session cache persistence across relay restarts

use tokio::net::UdpSocket;

use wgmux::noise::testing::build_transport;
use wgmux::{NoisePrivateKey, SourceValidateLevel};

use super::common::*;

#[tokio::test]
async fn established_sessions_survive_a_restart() {
    let server_key = NoisePrivateKey::generate();
    let client_key = NoisePrivateKey::generate();
    let backend = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let backend_addr = backend.local_addr().unwrap();

    let dir = tempfile::tempdir().unwrap();
    let cache_path = dir.path().join("sessions.json");
    let cache_path_str = cache_path.to_string_lossy().into_owned();

    // First relay: complete a handshake, which persists the session
    let config = relay_config(
        &server_key,
        vec![peer_entry(&backend_addr.to_string(), None, SourceValidateLevel::Default)],
        60,
        "",
        Some(cache_path_str.clone()),
    );
    let (_table, relay_addr) = start_relay(config).await;

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let handshake = run_handshake(
        &client,
        relay_addr,
        &backend,
        &client_key,
        &server_key.public_key(),
        0x1357_9bdf,
        0x2468_ace0,
    )
    .await;

    wait_until(|| cache_path.exists(), "cache file written").await;

    // Second relay: same cache, fresh sockets. The restored session
    // translates transport without any new handshake.
    let config = relay_config(
        &server_key,
        vec![peer_entry(&backend_addr.to_string(), None, SourceValidateLevel::Default)],
        60,
        "",
        Some(cache_path_str),
    );
    let (restarted, relay_addr) = start_relay(config).await;
    assert_eq!(restarted.client_session_count(), 1);
    assert_eq!(restarted.server_session_count(), 1);

    let transport = build_transport(handshake.server_proxy_index, 96);
    client.send_to(&transport, relay_addr).await.unwrap();
    let (forwarded, _) = must_recv(&backend, "transport after restart").await;
    assert_eq!(
        u32::from_le_bytes(forwarded[4..8].try_into().unwrap()),
        handshake.server_origin_index
    );
}

#[tokio::test]
async fn corrupt_cache_is_tolerated() {
    let server_key = NoisePrivateKey::generate();
    let backend = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let backend_addr = backend.local_addr().unwrap();

    let dir = tempfile::tempdir().unwrap();
    let cache_path = dir.path().join("broken.json");
    std::fs::write(&cache_path, "{definitely not json").unwrap();

    let config = relay_config(
        &server_key,
        vec![peer_entry(&backend_addr.to_string(), None, SourceValidateLevel::Default)],
        60,
        "",
        Some(cache_path.to_string_lossy().into_owned()),
    );

    // The relay must come up regardless and start empty
    let (table, _relay_addr) = start_relay(config).await;
    assert_eq!(table.client_session_count(), 0);
}
