//! mac1/mac2 computation and cookie replies
//!
//! A [`CookieGenerator`] signs handshake messages on behalf of one endpoint.
//! It is seeded with the public key of the message *recipient*, because mac1
//! is keyed by a hash of the recipient's static key. When the recipient is
//! under load it answers with a cookie reply; consuming that reply arms mac2
//! for the next two minutes of retransmissions.

use std::time::{Duration, Instant};

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};

use super::crypto::{hash_many, mac16, HASH_LEN, LABEL_COOKIE, LABEL_MAC1, MAC_LEN};
use super::keys::NoisePublicKey;
use crate::error::NoiseError;

/// Cookie validity duration (120 seconds per the protocol)
const COOKIE_VALIDITY: Duration = Duration::from_secs(120);

/// Nonce size of the XChaCha20-Poly1305 cookie box
pub const COOKIE_NONCE_LEN: usize = 24;

/// Size of the encrypted cookie field (16-byte cookie plus tag)
pub const COOKIE_ENCRYPTED_LEN: usize = 32;

/// Signs initiations or responses toward one recipient and tracks the
/// cookie state needed for mac2.
#[derive(Debug, Clone)]
pub struct CookieGenerator {
    /// `BLAKE2s(label_mac1 || recipient_pk)`
    mac1_key: [u8; HASH_LEN],
    /// `BLAKE2s(label_cookie || recipient_pk)`, the cookie box key
    cookie_key: [u8; HASH_LEN],
    /// Decrypted cookie and when it was received
    cookie: Option<([u8; MAC_LEN], Instant)>,
    /// mac1 of the last message we signed, the AAD of any cookie reply
    last_mac1: Option<[u8; MAC_LEN]>,
}

impl CookieGenerator {
    /// Seed a generator with the recipient's public key.
    ///
    /// Derivation is deterministic; generators are never re-seeded.
    #[must_use]
    pub fn new(recipient: &NoisePublicKey) -> Self {
        Self {
            mac1_key: hash_many(&[LABEL_MAC1, recipient.as_bytes()]),
            cookie_key: hash_many(&[LABEL_COOKIE, recipient.as_bytes()]),
            cookie: None,
            last_mac1: None,
        }
    }

    /// Compute mac1 over `msg[..len-32]` and, when a fresh cookie is held,
    /// mac2 over `msg[..len-16]`, writing both into the message tail.
    ///
    /// The message must be a full initiation or response; the caller
    /// guarantees the length.
    pub fn add_macs(&mut self, msg: &mut [u8]) {
        debug_assert!(msg.len() >= 2 * MAC_LEN);
        let mac2_off = msg.len() - MAC_LEN;
        let mac1_off = mac2_off - MAC_LEN;

        let mac1 = mac16(&self.mac1_key, &msg[..mac1_off]);
        msg[mac1_off..mac2_off].copy_from_slice(&mac1);
        self.last_mac1 = Some(mac1);

        if let Some((cookie, received_at)) = &self.cookie {
            if received_at.elapsed() < COOKIE_VALIDITY {
                let mac2 = mac16(cookie, &msg[..mac2_off]);
                msg[mac2_off..].copy_from_slice(&mac2);
            }
        }
    }

    /// Decrypt a cookie reply and store the cookie for future mac2 fields.
    ///
    /// # Errors
    ///
    /// Fails when no message was signed yet (nothing to authenticate the
    /// reply against) or when the reply does not decrypt.
    pub fn consume_reply(
        &mut self,
        nonce: &[u8; COOKIE_NONCE_LEN],
        encrypted_cookie: &[u8; COOKIE_ENCRYPTED_LEN],
    ) -> Result<(), NoiseError> {
        let last_mac1 = self.last_mac1.ok_or(NoiseError::NoPriorMac1)?;

        let cipher = XChaCha20Poly1305::new_from_slice(&self.cookie_key)
            .expect("32-byte XChaCha20-Poly1305 key");
        let decrypted = cipher
            .decrypt(
                XNonce::from_slice(nonce),
                Payload {
                    msg: encrypted_cookie,
                    aad: &last_mac1,
                },
            )
            .map_err(|_| NoiseError::CookieDecryptFailed)?;
        if decrypted.len() != MAC_LEN {
            return Err(NoiseError::CookieDecryptFailed);
        }

        let mut cookie = [0u8; MAC_LEN];
        cookie.copy_from_slice(&decrypted);
        self.cookie = Some((cookie, Instant::now()));
        Ok(())
    }

    /// Whether a cookie younger than the validity window is held
    #[must_use]
    pub fn has_valid_cookie(&self) -> bool {
        self.cookie
            .as_ref()
            .is_some_and(|(_, at)| at.elapsed() < COOKIE_VALIDITY)
    }
}

/// Verify the mac1 of a full initiation or response against a recipient key.
///
/// Used by tests and diagnostics; the relay itself recomputes MACs rather
/// than verifying them.
#[must_use]
pub fn verify_mac1(recipient: &NoisePublicKey, msg: &[u8]) -> bool {
    if msg.len() < 2 * MAC_LEN {
        return false;
    }
    let mac1_off = msg.len() - 2 * MAC_LEN;
    let mac1_key = hash_many(&[LABEL_MAC1, recipient.as_bytes()]);
    let expected = mac16(&mac1_key, &msg[..mac1_off]);
    expected == msg[mac1_off..mac1_off + MAC_LEN]
}
