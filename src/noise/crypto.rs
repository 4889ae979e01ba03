//! Cryptographic primitives for the WireGuard handshake
//!
//! BLAKE2s hashing, the keyed-BLAKE2s HMAC construction WireGuard uses for
//! its KDF, the 16-byte keyed MACs behind mac1/mac2, and ChaCha20-Poly1305
//! opening with the fixed zero nonce of handshake payloads.

use blake2::digest::consts::{U16, U32};
use blake2::digest::{FixedOutput, KeyInit, Update};
use blake2::{Blake2s256, Blake2sMac, Digest};
use chacha20poly1305::aead::{Aead, KeyInit as AeadKeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};

use crate::error::NoiseError;

/// Noise construction identifier
pub const CONSTRUCTION: &[u8] = b"Noise_IKpsk2_25519_ChaChaPoly_BLAKE2s";

/// WireGuard protocol identifier mixed into the initial hash
pub const IDENTIFIER: &[u8] = b"WireGuard v1 zx2c4 Jason@zx2c4.com";

/// Label prefixing the mac1 key derivation
pub const LABEL_MAC1: &[u8] = b"mac1----";

/// Label prefixing the cookie key derivation
pub const LABEL_COOKIE: &[u8] = b"cookie--";

/// BLAKE2s output size
pub const HASH_LEN: usize = 32;

/// mac1/mac2/cookie size
pub const MAC_LEN: usize = 16;

type Blake2sMac256 = Blake2sMac<U32>;
type Blake2sMac128 = Blake2sMac<U16>;

/// BLAKE2s over the concatenation of the inputs
#[must_use]
pub fn hash_many(data: &[&[u8]]) -> [u8; HASH_LEN] {
    let mut hasher = Blake2s256::new();
    for d in data {
        Digest::update(&mut hasher, d);
    }
    hasher.finalize().into()
}

/// The initial chain key, `BLAKE2s(construction)`
#[must_use]
pub fn initial_chain_key() -> [u8; HASH_LEN] {
    hash_many(&[CONSTRUCTION])
}

/// The initial hash, `BLAKE2s(initial_chain_key || identifier)`
#[must_use]
pub fn initial_hash() -> [u8; HASH_LEN] {
    hash_many(&[&initial_chain_key(), IDENTIFIER])
}

/// Keyed BLAKE2s, the HMAC of the WireGuard KDF.
///
/// Keys are always 16 or 32 bytes here, within what BLAKE2s accepts directly.
#[must_use]
pub fn hmac(key: &[u8], data: &[u8]) -> [u8; HASH_LEN] {
    let mut mac: Blake2sMac256 =
        KeyInit::new_from_slice(key).expect("BLAKE2s accepts keys up to 32 bytes");
    Update::update(&mut mac, data);
    mac.finalize_fixed().into()
}

/// KDF with one output
#[must_use]
pub fn kdf1(chaining_key: &[u8; HASH_LEN], input: &[u8]) -> [u8; HASH_LEN] {
    let prk = hmac(chaining_key, input);
    hmac(&prk, &[1])
}

/// KDF with two outputs
#[must_use]
pub fn kdf2(chaining_key: &[u8; HASH_LEN], input: &[u8]) -> ([u8; HASH_LEN], [u8; HASH_LEN]) {
    let prk = hmac(chaining_key, input);
    let t1 = hmac(&prk, &[1]);
    let mut t2_input = [0u8; HASH_LEN + 1];
    t2_input[..HASH_LEN].copy_from_slice(&t1);
    t2_input[HASH_LEN] = 2;
    let t2 = hmac(&prk, &t2_input);
    (t1, t2)
}

/// 16-byte keyed BLAKE2s, the MAC behind mac1 and mac2
#[must_use]
pub fn mac16(key: &[u8], data: &[u8]) -> [u8; MAC_LEN] {
    let mut mac: Blake2sMac128 =
        KeyInit::new_from_slice(key).expect("BLAKE2s accepts keys up to 32 bytes");
    Update::update(&mut mac, data);
    mac.finalize_fixed().into()
}

/// Seal a handshake AEAD field with the zero nonce.
#[must_use]
pub fn aead_seal(key: &[u8; HASH_LEN], plaintext: &[u8], aad: &[u8]) -> Vec<u8> {
    let cipher: ChaCha20Poly1305 =
        AeadKeyInit::new_from_slice(key).expect("32-byte ChaCha20-Poly1305 key");
    cipher
        .encrypt(
            Nonce::from_slice(&[0u8; 12]),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .expect("ChaCha20-Poly1305 encryption is infallible for in-memory buffers")
}

/// Open a handshake AEAD field with the zero nonce.
///
/// # Errors
///
/// Returns [`NoiseError::WrongKey`] when authentication fails.
pub fn aead_open(
    key: &[u8; HASH_LEN],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, NoiseError> {
    let cipher: ChaCha20Poly1305 =
        AeadKeyInit::new_from_slice(key).expect("32-byte ChaCha20-Poly1305 key");
    cipher
        .decrypt(
            Nonce::from_slice(&[0u8; 12]),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| NoiseError::WrongKey)
}
