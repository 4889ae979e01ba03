//! End-to-end handshake scenarios

use tokio::net::UdpSocket;

use wgmux::noise::cookie::verify_mac1;
use wgmux::noise::testing::{build_initiation, build_transport};
use wgmux::{NoisePrivateKey, SourceValidateLevel};

use super::common::*;

#[tokio::test]
async fn handshake_establishes_session_and_translates_indices() {
    let server_key = NoisePrivateKey::generate();
    let client_key = NoisePrivateKey::generate();
    let backend = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let backend_addr = backend.local_addr().unwrap();

    let config = relay_config(
        &server_key,
        vec![peer_entry(
            &backend_addr.to_string(),
            Some(client_key.public_key()),
            SourceValidateLevel::Default,
        )],
        60,
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
        0x1122_3344,
        0x5566_7788,
    )
    .await;

    assert_eq!(table.client_session_count(), 1);
    assert_eq!(table.server_session_count(), 1);
    assert_eq!(handshake.server_origin_index, 0x5566_7788);

    // Client-to-server transport: receiver is rewritten from the proxy's
    // index space to the one the backend chose.
    let transport = build_transport(handshake.server_proxy_index, 96);
    client.send_to(&transport, relay_addr).await.unwrap();
    let (forwarded, _) = must_recv(&backend, "c2s transport").await;
    assert_eq!(forwarded[0], 4);
    assert_eq!(
        u32::from_le_bytes(forwarded[4..8].try_into().unwrap()),
        handshake.server_origin_index
    );
    assert_eq!(&forwarded[8..], &transport[8..], "payload untouched");

    // Server-to-client transport: receiver goes back to the index the
    // client picked for itself.
    let transport = build_transport(handshake.client_proxy_index, 128);
    backend
        .send_to(&transport, handshake.relay_server_addr)
        .await
        .unwrap();
    let (forwarded, _) = must_recv(&client, "s2c transport").await;
    assert_eq!(
        u32::from_le_bytes(forwarded[4..8].try_into().unwrap()),
        0x1122_3344
    );
}

#[tokio::test]
async fn colliding_origin_indices_are_remapped_and_resigned() {
    let server_key = NoisePrivateKey::generate();
    let key_a = NoisePrivateKey::generate();
    let key_b = NoisePrivateKey::generate();
    let backend = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let backend_addr = backend.local_addr().unwrap();

    let config = relay_config(
        &server_key,
        vec![peer_entry(&backend_addr.to_string(), None, SourceValidateLevel::Default)],
        60,
        "",
        None,
    );
    let (table, relay_addr) = start_relay(config).await;

    let client_a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let client_b = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    // Both clients picked the same sender index
    let origin = 0x0000_0042;
    client_a
        .send_to(&build_initiation(&key_a, &server_key.public_key(), origin), relay_addr)
        .await
        .unwrap();
    let (first, _) = must_recv(&backend, "first initiation").await;
    assert_eq!(u32::from_le_bytes(first[4..8].try_into().unwrap()), origin);

    client_b
        .send_to(&build_initiation(&key_b, &server_key.public_key(), origin), relay_addr)
        .await
        .unwrap();
    let (second, _) = must_recv(&backend, "second initiation").await;
    let remapped = u32::from_le_bytes(second[4..8].try_into().unwrap());

    // The second session cannot share the first one's index
    assert_ne!(remapped, origin);
    assert_ne!(remapped, 0);
    assert_eq!(table.client_session_count(), 2);

    // The rewritten header was re-signed: mac1 still verifies against the
    // backend's public key.
    assert!(verify_mac1(&server_key.public_key(), &second));
}

#[tokio::test]
async fn reinitiation_by_same_client_replaces_the_session() {
    let server_key = NoisePrivateKey::generate();
    let client_key = NoisePrivateKey::generate();
    let backend = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let backend_addr = backend.local_addr().unwrap();

    let config = relay_config(
        &server_key,
        vec![peer_entry(&backend_addr.to_string(), None, SourceValidateLevel::Default)],
        60,
        "",
        None,
    );
    let (table, relay_addr) = start_relay(config).await;

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let origin = 0x0bad_cafe;
    for _ in 0..3 {
        client
            .send_to(
                &build_initiation(&client_key, &server_key.public_key(), origin),
                relay_addr,
            )
            .await
            .unwrap();
        let (forwarded, _) = must_recv(&backend, "retried initiation").await;
        // The retry keeps its origin index instead of colliding with the
        // superseded session
        assert_eq!(u32::from_le_bytes(forwarded[4..8].try_into().unwrap()), origin);
    }
    assert_eq!(table.client_session_count(), 1);
}

#[tokio::test]
async fn unknown_transport_receiver_is_dropped() {
    let server_key = NoisePrivateKey::generate();
    let backend = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let backend_addr = backend.local_addr().unwrap();

    let config = relay_config(
        &server_key,
        vec![peer_entry(&backend_addr.to_string(), None, SourceValidateLevel::Default)],
        60,
        "",
        None,
    );
    let (_table, relay_addr) = start_relay(config).await;

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client
        .send_to(&build_transport(0xdead_beef, 64), relay_addr)
        .await
        .unwrap();
    must_stay_silent(&backend, "transport for unknown session").await;
}

#[tokio::test]
async fn initiation_for_unknown_server_key_is_dropped() {
    let server_key = NoisePrivateKey::generate();
    let stranger_server = NoisePrivateKey::generate();
    let client_key = NoisePrivateKey::generate();
    let backend = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let backend_addr = backend.local_addr().unwrap();

    let config = relay_config(
        &server_key,
        vec![peer_entry(&backend_addr.to_string(), None, SourceValidateLevel::Default)],
        60,
        "",
        None,
    );
    let (table, relay_addr) = start_relay(config).await;

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client
        .send_to(
            &build_initiation(&client_key, &stranger_server.public_key(), 9),
            relay_addr,
        )
        .await
        .unwrap();
    must_stay_silent(&backend, "initiation for foreign server").await;
    assert_eq!(table.client_session_count(), 0);
}
