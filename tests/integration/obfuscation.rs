//! Obfuscated links through the relay
//!
//! The relay must accept obfuscated and plain clients on the same socket,
//! remember which conversation is which, and obfuscate its replies only for
//! the obfuscated ones.

use tokio::net::UdpSocket;

use wgmux::noise::testing::{build_initiation, build_response, build_transport};
use wgmux::packet::{Packet, FLAG_OBFUSCATE_BEFORE_SEND};
use wgmux::wire::MESSAGE_INITIATION_SIZE;
use wgmux::{NoisePrivateKey, Obfuscator, SourceValidateLevel};

use super::common::*;

const OBFS_KEY: &str = "shared-obfuscation-key";

/// Obfuscate raw message bytes the way a wgmux client would on egress
fn obfuscate_bytes(obfuscator: &Obfuscator, bytes: &[u8]) -> Vec<u8> {
    let mut packet = Packet::with_capacity(65536);
    packet.buf_mut()[..bytes.len()].copy_from_slice(bytes);
    packet.set_len(bytes.len());
    packet.set_flag(FLAG_OBFUSCATE_BEFORE_SEND);
    obfuscator.obfuscate(&mut packet);
    packet.slice().to_vec()
}

/// Reverse obfuscation on received bytes
fn deobfuscate_bytes(obfuscator: &Obfuscator, bytes: &[u8]) -> Vec<u8> {
    let mut packet = Packet::with_capacity(65536);
    packet.buf_mut()[..bytes.len()].copy_from_slice(bytes);
    packet.set_len(bytes.len());
    obfuscator.deobfuscate(&mut packet);
    packet.slice().to_vec()
}

#[tokio::test]
async fn obfuscated_handshake_round_trip() {
    let server_key = NoisePrivateKey::generate();
    let client_key = NoisePrivateKey::generate();
    let obfuscator = Obfuscator::new(OBFS_KEY);
    let backend = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let backend_addr = backend.local_addr().unwrap();

    let config = relay_config(
        &server_key,
        vec![peer_entry(&backend_addr.to_string(), None, SourceValidateLevel::Default)],
        60,
        OBFS_KEY,
        None,
    );
    let (_table, relay_addr) = start_relay(config).await;

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let initiation = build_initiation(&client_key, &server_key.public_key(), 0x1234_5678);
    let wire_bytes = obfuscate_bytes(&obfuscator, &initiation);
    assert_ne!(wire_bytes.len(), initiation.len(), "initiation was expanded");
    client.send_to(&wire_bytes, relay_addr).await.unwrap();

    // The backend is a real WireGuard server: it must see plain bytes
    let (forwarded, relay_server_addr) = must_recv(&backend, "deobfuscated initiation").await;
    assert_eq!(forwarded.len(), MESSAGE_INITIATION_SIZE);
    assert_eq!(forwarded[..4], [1, 0, 0, 0]);
    let proxy_index = u32::from_le_bytes(forwarded[4..8].try_into().unwrap());

    // The reply comes back obfuscated for this conversation
    let response = build_response(&client_key.public_key(), 0x9999_0000, proxy_index);
    backend.send_to(&response, relay_server_addr).await.unwrap();
    let (reply_bytes, _) = must_recv(&client, "obfuscated response").await;
    assert_ne!(reply_bytes[..4], [2, 0, 0, 0], "reply is not plain on the wire");

    let plain = deobfuscate_bytes(&obfuscator, &reply_bytes);
    assert_eq!(plain[0], 2);
    assert_eq!(
        u32::from_le_bytes(plain[8..12].try_into().unwrap()),
        0x1234_5678,
        "receiver translated back to the client index"
    );
}

#[tokio::test]
async fn plain_and_obfuscated_clients_coexist() {
    let server_key = NoisePrivateKey::generate();
    let plain_key = NoisePrivateKey::generate();
    let obfs_key = NoisePrivateKey::generate();
    let obfuscator = Obfuscator::new(OBFS_KEY);
    let backend = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let backend_addr = backend.local_addr().unwrap();

    let config = relay_config(
        &server_key,
        vec![peer_entry(&backend_addr.to_string(), None, SourceValidateLevel::Default)],
        60,
        OBFS_KEY,
        None,
    );
    let (_table, relay_addr) = start_relay(config).await;

    // A plain WireGuard client
    let plain_client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    plain_client
        .send_to(
            &build_initiation(&plain_key, &server_key.public_key(), 0x0000_1111),
            relay_addr,
        )
        .await
        .unwrap();
    let (forwarded, relay_server_addr) = must_recv(&backend, "plain initiation").await;
    let plain_proxy = u32::from_le_bytes(forwarded[4..8].try_into().unwrap());

    // An obfuscated wgmux client
    let obfs_client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let initiation = build_initiation(&obfs_key, &server_key.public_key(), 0x0000_2222);
    obfs_client
        .send_to(&obfuscate_bytes(&obfuscator, &initiation), relay_addr)
        .await
        .unwrap();
    let (forwarded, _) = must_recv(&backend, "obfuscated client initiation").await;
    let obfs_proxy = u32::from_le_bytes(forwarded[4..8].try_into().unwrap());

    // Plain client gets a plain reply
    backend
        .send_to(
            &build_response(&plain_key.public_key(), 0x0000_3333, plain_proxy),
            relay_server_addr,
        )
        .await
        .unwrap();
    let (reply, _) = must_recv(&plain_client, "plain reply").await;
    assert_eq!(reply[..4], [2, 0, 0, 0]);

    // Obfuscated client gets an obfuscated reply
    backend
        .send_to(
            &build_response(&obfs_key.public_key(), 0x0000_4444, obfs_proxy),
            relay_server_addr,
        )
        .await
        .unwrap();
    let (reply, _) = must_recv(&obfs_client, "obfuscated reply").await;
    assert_ne!(reply[..4], [2, 0, 0, 0]);
    let plain = deobfuscate_bytes(&obfuscator, &reply);
    assert_eq!(plain[0], 2);
}

#[tokio::test]
async fn obfuscated_transport_both_directions() {
    let server_key = NoisePrivateKey::generate();
    let client_key = NoisePrivateKey::generate();
    let obfuscator = Obfuscator::new(OBFS_KEY);
    let backend = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let backend_addr = backend.local_addr().unwrap();

    let config = relay_config(
        &server_key,
        vec![peer_entry(&backend_addr.to_string(), None, SourceValidateLevel::Default)],
        60,
        OBFS_KEY,
        None,
    );
    let (_table, relay_addr) = start_relay(config).await;

    // Obfuscated handshake
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let initiation = build_initiation(&client_key, &server_key.public_key(), 0x0707_0707);
    client
        .send_to(&obfuscate_bytes(&obfuscator, &initiation), relay_addr)
        .await
        .unwrap();
    let (forwarded, relay_server_addr) = must_recv(&backend, "initiation").await;
    let client_proxy = u32::from_le_bytes(forwarded[4..8].try_into().unwrap());
    backend
        .send_to(
            &build_response(&client_key.public_key(), 0x0808_0808, client_proxy),
            relay_server_addr,
        )
        .await
        .unwrap();
    let (reply, _) = must_recv(&client, "response").await;
    let plain_reply = deobfuscate_bytes(&obfuscator, &reply);
    let server_proxy = u32::from_le_bytes(plain_reply[4..8].try_into().unwrap());

    // Obfuscated transport toward the relay comes out plain at the backend
    let transport = build_transport(server_proxy, 700);
    client
        .send_to(&obfuscate_bytes(&obfuscator, &transport), relay_addr)
        .await
        .unwrap();
    let (forwarded, _) = must_recv(&backend, "c2s transport").await;
    assert_eq!(forwarded[0], 4);
    assert_eq!(forwarded.len(), 700, "large transport stays MTU-neutral");
    assert_eq!(
        u32::from_le_bytes(forwarded[4..8].try_into().unwrap()),
        0x0808_0808
    );

    // Backend transport comes out obfuscated at the client
    let reply_transport = build_transport(client_proxy, 120);
    backend
        .send_to(&reply_transport, relay_server_addr)
        .await
        .unwrap();
    let (wire_reply, _) = must_recv(&client, "s2c transport").await;
    assert_ne!(wire_reply[..4], [4, 0, 0, 0]);
    let plain = deobfuscate_bytes(&obfuscator, &wire_reply);
    assert_eq!(plain.len(), 120);
    assert_eq!(
        u32::from_le_bytes(plain[4..8].try_into().unwrap()),
        0x0707_0707
    );
}

#[test]
fn initiation_expansion_stays_within_bounds() {
    let obfuscator = Obfuscator::new(OBFS_KEY);
    let client_key = NoisePrivateKey::generate();
    let server_pk = NoisePrivateKey::generate().public_key();

    for _ in 0..128 {
        let initiation = build_initiation(&client_key, &server_pk, 1);
        let wire_bytes = obfuscate_bytes(&obfuscator, &initiation);
        assert!(wire_bytes.len() >= 164, "length {}", wire_bytes.len());
        assert!(wire_bytes.len() <= 547, "length {}", wire_bytes.len());

        let plain = deobfuscate_bytes(&obfuscator, &wire_bytes);
        assert_eq!(plain, initiation);
    }
}
