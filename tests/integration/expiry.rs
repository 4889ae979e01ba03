//! Session expiry scenarios

use std::time::Duration;

use tokio::net::UdpSocket;

use wgmux::noise::testing::{build_initiation, build_transport};
use wgmux::{NoisePrivateKey, SourceValidateLevel};

use super::common::*;

#[tokio::test]
async fn idle_sessions_expire_and_later_transport_is_dropped() {
    let server_key = NoisePrivateKey::generate();
    let client_key = NoisePrivateKey::generate();
    let backend = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let backend_addr = backend.local_addr().unwrap();

    let config = relay_config(
        &server_key,
        vec![peer_entry(&backend_addr.to_string(), None, SourceValidateLevel::Default)],
        1,
        "",
        None,
    );
    let (table, relay_addr) = start_relay(config).await;

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let handshake = run_handshake(
        &client,
        relay_addr,
        &backend,
        &client_key,
        &server_key.public_key(),
        0x0a0a_0a0a,
        0x0b0b_0b0b,
    )
    .await;
    assert_eq!(table.client_session_count(), 1);
    assert_eq!(table.server_session_count(), 1);

    // No traffic for two timeout periods: the sweep removes the session
    // from both maps.
    tokio::time::sleep(Duration::from_millis(2500)).await;
    wait_until(
        || table.client_session_count() == 0 && table.server_session_count() == 0,
        "session expiry",
    )
    .await;

    // Transport for the dead session goes nowhere
    let transport = build_transport(handshake.server_proxy_index, 64);
    client.send_to(&transport, relay_addr).await.unwrap();
    must_stay_silent(&backend, "transport for an expired session").await;
}

#[tokio::test]
async fn active_sessions_survive_the_sweep() {
    let server_key = NoisePrivateKey::generate();
    let client_key = NoisePrivateKey::generate();
    let backend = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let backend_addr = backend.local_addr().unwrap();

    let config = relay_config(
        &server_key,
        vec![peer_entry(&backend_addr.to_string(), None, SourceValidateLevel::Default)],
        1,
        "",
        None,
    );
    let (table, relay_addr) = start_relay(config).await;

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let handshake = run_handshake(
        &client,
        relay_addr,
        &backend,
        &client_key,
        &server_key.public_key(),
        0x0c0c_0c0c,
        0x0d0d_0d0d,
    )
    .await;

    // Keep the session warm across several sweep periods
    for _ in 0..4 {
        tokio::time::sleep(Duration::from_millis(500)).await;
        let transport = build_transport(handshake.server_proxy_index, 64);
        client.send_to(&transport, relay_addr).await.unwrap();
        must_recv(&backend, "keepalive transport").await;
    }
    assert_eq!(table.client_session_count(), 1);
}

#[tokio::test]
async fn half_open_sessions_expire_too() {
    let server_key = NoisePrivateKey::generate();
    let client_key = NoisePrivateKey::generate();
    let backend = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let backend_addr = backend.local_addr().unwrap();

    let config = relay_config(
        &server_key,
        vec![peer_entry(&backend_addr.to_string(), None, SourceValidateLevel::Default)],
        1,
        "",
        None,
    );
    let (table, relay_addr) = start_relay(config).await;

    // Initiation only, the backend never answers
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client
        .send_to(
            &build_initiation(&client_key, &server_key.public_key(), 7),
            relay_addr,
        )
        .await
        .unwrap();
    must_recv(&backend, "forwarded initiation").await;
    wait_until(|| table.client_session_count() == 1, "half-open session").await;

    tokio::time::sleep(Duration::from_millis(2500)).await;
    wait_until(|| table.client_session_count() == 0, "half-open expiry").await;
}
