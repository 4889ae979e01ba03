//! Handshake message builders for tests
//!
//! Produces byte-exact WireGuard handshake messages the way an initiating
//! client or a responding server would, so the relay can be exercised
//! without a live WireGuard stack.

use std::time::{SystemTime, UNIX_EPOCH};

use super::cookie::CookieGenerator;
use super::crypto::{
    aead_seal, hash_many, initial_chain_key, initial_hash, kdf1, kdf2, mac16, LABEL_MAC1,
};
use super::keys::{NoisePrivateKey, NoisePublicKey};
use crate::wire::{MESSAGE_INITIATION_SIZE, MESSAGE_RESPONSE_SIZE};

/// Build a handshake initiation from `client` toward `server_pk` carrying
/// the given sender index. Byte-compatible with a real WireGuard initiator.
#[must_use]
pub fn build_initiation(
    client: &NoisePrivateKey,
    server_pk: &NoisePublicKey,
    sender: u32,
) -> Vec<u8> {
    let mut msg = vec![0u8; MESSAGE_INITIATION_SIZE];

    let mut chain_key = initial_chain_key();
    let mut hash = hash_many(&[&initial_hash(), server_pk.as_bytes()]);

    let ephemeral = NoisePrivateKey::generate();
    let ephemeral_pk = ephemeral.public_key();

    msg[0] = 1;
    msg[4..8].copy_from_slice(&sender.to_le_bytes());
    msg[8..40].copy_from_slice(ephemeral_pk.as_bytes());

    chain_key = kdf1(&chain_key, ephemeral_pk.as_bytes());
    hash = hash_many(&[&hash, ephemeral_pk.as_bytes()]);

    let dh = ephemeral.shared_secret(server_pk);
    let (ck, key) = kdf2(&chain_key, &dh);
    chain_key = ck;

    let encrypted_static = aead_seal(&key, client.public_key().as_bytes(), &hash);
    msg[40..88].copy_from_slice(&encrypted_static);
    hash = hash_many(&[&hash, &encrypted_static]);

    let dh = client.shared_secret(server_pk);
    let (_ck, key) = kdf2(&chain_key, &dh);

    let encrypted_timestamp = aead_seal(&key, &tai64n_now(), &hash);
    msg[88..116].copy_from_slice(&encrypted_timestamp);

    let mac1_key = hash_many(&[LABEL_MAC1, server_pk.as_bytes()]);
    let mac1 = mac16(&mac1_key, &msg[..116]);
    msg[116..132].copy_from_slice(&mac1);
    // mac2 stays zero: no cookie

    msg
}

/// Build a handshake response shell carrying the given indices.
///
/// The ephemeral and sealed-empty fields are synthetic (the relay never
/// decrypts responses); sender/receiver and the MACs are real.
#[must_use]
pub fn build_response(
    client_pk: &NoisePublicKey,
    sender: u32,
    receiver: u32,
) -> Vec<u8> {
    let mut msg = vec![0u8; MESSAGE_RESPONSE_SIZE];
    msg[0] = 2;
    msg[4..8].copy_from_slice(&sender.to_le_bytes());
    msg[8..12].copy_from_slice(&receiver.to_le_bytes());
    // Ephemeral and sealed-empty fields are opaque to the relay
    msg[12..44].copy_from_slice(NoisePrivateKey::generate().public_key().as_bytes());

    let mut generator = CookieGenerator::new(client_pk);
    generator.add_macs(&mut msg);
    msg
}

/// Build a transport message of `len` bytes (at least 32) toward `receiver`
#[must_use]
pub fn build_transport(receiver: u32, len: usize) -> Vec<u8> {
    assert!(len >= 32, "transport messages are at least 32 bytes");
    let mut msg = vec![0u8; len];
    msg[0] = 4;
    msg[4..8].copy_from_slice(&receiver.to_le_bytes());
    for (i, b) in msg.iter_mut().enumerate().skip(16) {
        *b = (i % 251) as u8;
    }
    msg
}

fn tai64n_now() -> [u8; 12] {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let secs = now.as_secs() + 0x4000_0000_0000_000A;
    let mut timestamp = [0u8; 12];
    timestamp[..8].copy_from_slice(&secs.to_be_bytes());
    timestamp[8..].copy_from_slice(&now.subsec_nanos().to_be_bytes());
    timestamp
}
