//! Client roaming and source validation scenarios

use tokio::net::UdpSocket;

use wgmux::noise::testing::build_transport;
use wgmux::{NoisePrivateKey, SourceValidateLevel};

use super::common::*;

/// Complete a handshake and return everything needed to push transport
async fn established_relay(
    csvl: SourceValidateLevel,
) -> (
    UdpSocket,
    UdpSocket,
    std::net::SocketAddr,
    Handshake,
) {
    let server_key = NoisePrivateKey::generate();
    let client_key = NoisePrivateKey::generate();
    let backend = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let backend_addr = backend.local_addr().unwrap();

    let config = relay_config(
        &server_key,
        vec![peer_entry(&backend_addr.to_string(), None, csvl)],
        60,
        "",
        None,
    );
    let (_table, relay_addr) = start_relay(config).await;

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let handshake = run_handshake(
        &client,
        relay_addr,
        &backend,
        &client_key,
        &server_key.public_key(),
        0x0101_0101,
        0x0202_0202,
    )
    .await;

    (client, backend, relay_addr, handshake)
}

#[tokio::test]
async fn default_client_policy_allows_roaming() {
    let (original_client, backend, relay_addr, handshake) =
        established_relay(SourceValidateLevel::Default).await;

    // The client moves to a new socket and keeps talking
    let roamed_client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let transport = build_transport(handshake.server_proxy_index, 80);
    roamed_client.send_to(&transport, relay_addr).await.unwrap();
    let (forwarded, _) = must_recv(&backend, "roamed transport").await;
    assert_eq!(
        u32::from_le_bytes(forwarded[4..8].try_into().unwrap()),
        handshake.server_origin_index
    );

    // Replies now land at the new address
    let reply = build_transport(handshake.client_proxy_index, 80);
    backend
        .send_to(&reply, handshake.relay_server_addr)
        .await
        .unwrap();
    must_recv(&roamed_client, "reply at roamed address").await;
    must_stay_silent(&original_client, "reply at the stale address").await;
}

#[tokio::test]
async fn strict_client_policy_rejects_roaming() {
    let (original_client, backend, relay_addr, handshake) =
        established_relay(SourceValidateLevel::IpAndPort).await;

    let roamed_client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let transport = build_transport(handshake.server_proxy_index, 80);
    roamed_client.send_to(&transport, relay_addr).await.unwrap();
    must_stay_silent(&backend, "transport from a denied source").await;

    // The recorded destination is unchanged: replies still reach the
    // original socket.
    let reply = build_transport(handshake.client_proxy_index, 80);
    backend
        .send_to(&reply, handshake.relay_server_addr)
        .await
        .unwrap();
    must_recv(&original_client, "reply at the original address").await;

    // And the original socket can still send
    let transport = build_transport(handshake.server_proxy_index, 80);
    original_client.send_to(&transport, relay_addr).await.unwrap();
    must_recv(&backend, "transport from the original source").await;
}

#[tokio::test]
async fn ip_level_policy_allows_port_changes_only() {
    let (_original_client, backend, relay_addr, handshake) =
        established_relay(SourceValidateLevel::Ip).await;

    // Same IP, different port: accepted
    let same_ip = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let transport = build_transport(handshake.server_proxy_index, 80);
    same_ip.send_to(&transport, relay_addr).await.unwrap();
    must_recv(&backend, "transport after a port change").await;
}
