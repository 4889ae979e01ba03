//! WireGuard handshake support
//!
//! Only what a relay needs: key types, the hash/KDF/AEAD primitives, the
//! mac1/mac2 cookie machinery, and the partial Noise_IK replay that recovers
//! an initiator's static key. The tunnel itself is never terminated here.

pub mod cookie;
pub mod crypto;
pub mod initiation;
pub mod keys;
pub mod testing;

pub use cookie::CookieGenerator;
pub use initiation::{decrypt_static_key, InitiationMessage};
pub use keys::{NoisePrivateKey, NoisePublicKey};
