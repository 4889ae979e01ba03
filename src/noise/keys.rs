//! Curve25519 key types
//!
//! Newtype wrappers over raw 32-byte keys with base64 (standard alphabet,
//! padded) encoding, serde support matching the config and cache formats,
//! and the two X25519 operations the relay needs.

use std::fmt;
use std::path::Path;

use base64::prelude::*;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::error::ConfigError;

/// Length of a Curve25519 key
pub const KEY_LEN: usize = 32;

/// A Curve25519 public key
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct NoisePublicKey(pub [u8; KEY_LEN]);

impl NoisePublicKey {
    /// Decode from standard base64
    ///
    /// # Errors
    ///
    /// Fails on invalid base64 or a decoded length other than 32.
    pub fn from_base64(s: &str) -> Result<Self, ConfigError> {
        let bytes = BASE64_STANDARD
            .decode(s)
            .map_err(|e| ConfigError::InvalidKey(format!("bad base64: {e}")))?;
        if bytes.len() != KEY_LEN {
            return Err(ConfigError::InvalidKey(format!(
                "public key has wrong length: {}",
                bytes.len()
            )));
        }
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&bytes);
        Ok(Self(key))
    }

    /// Encode to standard base64
    #[must_use]
    pub fn to_base64(&self) -> String {
        BASE64_STANDARD.encode(self.0)
    }

    /// Raw key bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// The all-zero key, used as "not present"
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }
}

impl fmt::Debug for NoisePublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NoisePublicKey({})", self.to_base64())
    }
}

impl fmt::Display for NoisePublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

impl Serialize for NoisePublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.is_zero() {
            serializer.serialize_none()
        } else {
            serializer.serialize_str(&self.to_base64())
        }
    }
}

impl<'de> Deserialize<'de> for NoisePublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        if s.is_empty() {
            return Err(D::Error::custom("encoded public key is empty"));
        }
        Self::from_base64(&s).map_err(D::Error::custom)
    }
}

/// A Curve25519 private key
#[derive(Clone)]
pub struct NoisePrivateKey([u8; KEY_LEN]);

impl NoisePrivateKey {
    /// Wrap raw key bytes
    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Decode from standard base64
    ///
    /// # Errors
    ///
    /// Fails on invalid base64 or a decoded length other than 32.
    pub fn from_base64(s: &str) -> Result<Self, ConfigError> {
        let bytes = BASE64_STANDARD
            .decode(s)
            .map_err(|e| ConfigError::InvalidKey(format!("bad base64: {e}")))?;
        if bytes.len() != KEY_LEN {
            return Err(ConfigError::InvalidKey(format!(
                "private key has wrong length: {}",
                bytes.len()
            )));
        }
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&bytes);
        Ok(Self(key))
    }

    /// Encode to standard base64
    #[must_use]
    pub fn to_base64(&self) -> String {
        BASE64_STANDARD.encode(self.0)
    }

    /// Load a base64 key from the first line of a file
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or does not hold a valid key.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_base64(contents.trim())
    }

    /// Generate a fresh random key
    #[must_use]
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(rand::thread_rng());
        Self(secret.to_bytes())
    }

    /// The corresponding public key
    #[must_use]
    pub fn public_key(&self) -> NoisePublicKey {
        let secret = StaticSecret::from(self.0);
        NoisePublicKey(*PublicKey::from(&secret).as_bytes())
    }

    /// X25519 shared secret with a peer public key
    #[must_use]
    pub fn shared_secret(&self, peer: &NoisePublicKey) -> [u8; KEY_LEN] {
        let secret = StaticSecret::from(self.0);
        let peer = PublicKey::from(peer.0);
        *secret.diffie_hellman(&peer).as_bytes()
    }
}

impl fmt::Debug for NoisePrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print private key material
        f.write_str("NoisePrivateKey(..)")
    }
}

impl Serialize for NoisePrivateKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for NoisePrivateKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        if s.is_empty() {
            return Err(D::Error::custom("encoded private key is empty"));
        }
        Self::from_base64(&s).map_err(D::Error::custom)
    }
}
