//! Partial handshake processing
//!
//! The initiation is the only message the relay can decrypt. Replaying the
//! responder side of Noise_IK up to the static-field AEAD yields the
//! initiator's public key, which identifies the client without ever touching
//! the rest of the tunnel. The message itself is never modified here.

use super::crypto::{aead_open, hash_many, initial_chain_key, initial_hash, kdf1, kdf2};
use super::keys::{NoisePrivateKey, NoisePublicKey, KEY_LEN};
use crate::error::NoiseError;
use crate::wire::MESSAGE_INITIATION_SIZE;

/// Parsed view of a handshake initiation
#[derive(Debug, Clone)]
pub struct InitiationMessage {
    /// Index the initiator chose for itself
    pub sender: u32,
    /// Initiator's ephemeral public key
    pub ephemeral: [u8; KEY_LEN],
    /// AEAD-sealed initiator static key (32 + 16 tag)
    pub encrypted_static: [u8; 48],
    /// AEAD-sealed TAI64N timestamp (12 + 16 tag)
    pub encrypted_timestamp: [u8; 28],
    /// First authentication tag
    pub mac1: [u8; 16],
    /// Second authentication tag, zero unless the sender holds a cookie
    pub mac2: [u8; 16],
}

impl InitiationMessage {
    /// Parse an initiation from its wire bytes.
    ///
    /// # Errors
    ///
    /// Fails when the bytes are shorter than a full initiation or the type
    /// byte is wrong.
    pub fn parse(data: &[u8]) -> Result<Self, NoiseError> {
        if data.len() < MESSAGE_INITIATION_SIZE || data[0] != 1 {
            return Err(NoiseError::MalformedMessage {
                kind: "initiation",
                len: data.len(),
            });
        }
        Ok(Self {
            sender: u32::from_le_bytes(data[4..8].try_into().expect("4 bytes")),
            ephemeral: data[8..40].try_into().expect("32 bytes"),
            encrypted_static: data[40..88].try_into().expect("48 bytes"),
            encrypted_timestamp: data[88..116].try_into().expect("28 bytes"),
            mac1: data[116..132].try_into().expect("16 bytes"),
            mac2: data[132..148].try_into().expect("16 bytes"),
        })
    }
}

/// Recover the initiator's static public key from an initiation, acting as
/// the responder holding `private`.
///
/// # Errors
///
/// - [`NoiseError::SharedSecretZero`] when the ephemeral is a low-order point
/// - [`NoiseError::WrongKey`] when `private` is not the key the initiation
///   was built for (the AEAD open fails)
pub fn decrypt_static_key(
    private: &NoisePrivateKey,
    msg: &InitiationMessage,
) -> Result<NoisePublicKey, NoiseError> {
    let our_public = private.public_key();

    let mut hash = hash_many(&[&initial_hash(), our_public.as_bytes()]);
    hash = hash_many(&[&hash, &msg.ephemeral]);
    let chain_key = kdf1(&initial_chain_key(), &msg.ephemeral);

    let shared = private.shared_secret(&NoisePublicKey(msg.ephemeral));
    if shared.iter().all(|&b| b == 0) {
        return Err(NoiseError::SharedSecretZero);
    }
    let (_chain_key, key) = kdf2(&chain_key, &shared);

    let plaintext = aead_open(&key, &msg.encrypted_static, &hash)?;
    if plaintext.len() != KEY_LEN {
        return Err(NoiseError::WrongKey);
    }
    let mut pk = [0u8; KEY_LEN];
    pk.copy_from_slice(&plaintext);
    Ok(NoisePublicKey(pk))
}
