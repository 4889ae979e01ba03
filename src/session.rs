//! Session state
//!
//! A [`Session`] is the state for one end-to-end WireGuard conversation: the
//! four translated indices, both static public keys, the two cookie
//! generators used to re-sign edited headers, the current destinations on
//! both sides, and liveness/roaming policy.
//!
//! Sessions are shared between both index maps behind an `Arc`; the fields
//! that change after creation use atomics or small per-field locks so that
//! the map lock stays short-lived.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::error::{NoiseError, PacketError};
use crate::noise::cookie::{COOKIE_ENCRYPTED_LEN, COOKIE_NONCE_LEN};
use crate::noise::{CookieGenerator, NoisePublicKey};
use crate::packet::Packet;
use crate::wire;

/// How transport packets from an unexpected source address are handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum SourceValidateLevel {
    /// Side-dependent default: `None` for the client side, `IpAndPort` for
    /// the server side
    #[default]
    Default,
    /// Accept any source. Enables roaming, at the cost of a spoofing window.
    None,
    /// Accept port changes from the same IP. Survives some NAT rebindings.
    Ip,
    /// Reject on any mismatch. The peer must re-handshake after moving.
    IpAndPort,
}

impl SourceValidateLevel {
    /// Numeric form used in config and cache files
    #[must_use]
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Default => 0,
            Self::None => 1,
            Self::Ip => 2,
            Self::IpAndPort => 3,
        }
    }

    /// Resolve `Default` against another level (per-peer over per-server)
    #[must_use]
    pub fn or(self, fallback: Self) -> Self {
        match self {
            Self::Default => fallback,
            other => other,
        }
    }
}

impl TryFrom<u8> for SourceValidateLevel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Default),
            1 => Ok(Self::None),
            2 => Ok(Self::Ip),
            3 => Ok(Self::IpAndPort),
            other => Err(format!("source validate level out of range: {other}")),
        }
    }
}

impl From<SourceValidateLevel> for u8 {
    fn from(level: SourceValidateLevel) -> Self {
        level.as_u8()
    }
}

/// Inputs for creating a session at handshake time
pub struct SessionParams {
    /// Index the client chose in its initiation
    pub client_origin_index: u32,
    /// Index the relay substitutes toward the backend
    pub client_proxy_index: u32,
    /// The client's static public key (concrete, even for fallback matches)
    pub client_public_key: NoisePublicKey,
    /// The matched backend's static public key
    pub server_public_key: NoisePublicKey,
    /// Where the client currently is
    pub client_destination: SocketAddr,
    /// Where the backend is
    pub server_destination: SocketAddr,
    /// Validation policy for client-side transport sources
    pub client_source_validate_level: SourceValidateLevel,
    /// Validation policy for backend reply sources
    pub server_source_validate_level: SourceValidateLevel,
    /// Whether the initiation arrived obfuscated
    pub obfuscate_enabled: bool,
}

/// State for one proxied WireGuard conversation
pub struct Session {
    client_origin_index: u32,
    client_proxy_index: u32,
    /// Zero until the backend replies
    server_origin_index: AtomicU32,
    /// Zero until the backend replies; non-zero marks the session established
    server_proxy_index: AtomicU32,

    client_public_key: NoisePublicKey,
    server_public_key: NoisePublicKey,

    /// Signs messages travelling client to server, so keyed by the server key
    client_cookie_generator: Mutex<CookieGenerator>,
    /// Signs messages travelling server to client, so keyed by the client key
    server_cookie_generator: Mutex<CookieGenerator>,

    /// Mutable under client roaming
    client_destination: RwLock<SocketAddr>,
    server_destination: RwLock<SocketAddr>,

    client_source_validate_level: SourceValidateLevel,
    server_source_validate_level: SourceValidateLevel,

    obfuscate_enabled: AtomicBool,

    /// Milliseconds since the UNIX epoch, monotonically non-decreasing
    last_active: AtomicU64,
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

impl Session {
    /// Create a session in its first populated state.
    ///
    /// Cookie generators are seeded here from the opposite end's public key
    /// and never re-seeded.
    #[must_use]
    pub fn new(params: SessionParams) -> Self {
        Self {
            client_origin_index: params.client_origin_index,
            client_proxy_index: params.client_proxy_index,
            server_origin_index: AtomicU32::new(0),
            server_proxy_index: AtomicU32::new(0),
            client_cookie_generator: Mutex::new(CookieGenerator::new(&params.server_public_key)),
            server_cookie_generator: Mutex::new(CookieGenerator::new(&params.client_public_key)),
            client_public_key: params.client_public_key,
            server_public_key: params.server_public_key,
            client_destination: RwLock::new(params.client_destination),
            server_destination: RwLock::new(params.server_destination),
            client_source_validate_level: params.client_source_validate_level,
            server_source_validate_level: params.server_source_validate_level,
            obfuscate_enabled: AtomicBool::new(params.obfuscate_enabled),
            last_active: AtomicU64::new(now_millis()),
        }
    }

    /// Index the client told us it is
    #[must_use]
    pub fn client_origin_index(&self) -> u32 {
        self.client_origin_index
    }

    /// Index we told the backend the client is
    #[must_use]
    pub fn client_proxy_index(&self) -> u32 {
        self.client_proxy_index
    }

    /// Index the backend told us it is (zero before its reply)
    #[must_use]
    pub fn server_origin_index(&self) -> u32 {
        self.server_origin_index.load(Ordering::Acquire)
    }

    /// Index we told the client the backend is (zero before its reply)
    #[must_use]
    pub fn server_proxy_index(&self) -> u32 {
        self.server_proxy_index.load(Ordering::Acquire)
    }

    /// Record the backend's reply indices, establishing the session
    pub fn set_server_indices(&self, origin: u32, proxy: u32) {
        self.server_origin_index.store(origin, Ordering::Release);
        self.server_proxy_index.store(proxy, Ordering::Release);
    }

    /// Whether the backend has replied yet
    #[must_use]
    pub fn is_server_replied(&self) -> bool {
        self.server_proxy_index() != 0
    }

    /// The client's static public key
    #[must_use]
    pub fn client_public_key(&self) -> &NoisePublicKey {
        &self.client_public_key
    }

    /// The backend's static public key
    #[must_use]
    pub fn server_public_key(&self) -> &NoisePublicKey {
        &self.server_public_key
    }

    /// Where packets for the client go
    #[must_use]
    pub fn client_destination(&self) -> SocketAddr {
        *self.client_destination.read()
    }

    /// Move the client after an accepted roam
    pub fn set_client_destination(&self, addr: SocketAddr) {
        *self.client_destination.write() = addr;
    }

    /// Where packets for the backend go
    #[must_use]
    pub fn server_destination(&self) -> SocketAddr {
        *self.server_destination.read()
    }

    /// Repoint the backend, used when the upstream address re-resolves
    pub fn set_server_destination(&self, addr: SocketAddr) {
        *self.server_destination.write() = addr;
    }

    /// Client-side source validation policy
    #[must_use]
    pub fn client_source_validate_level(&self) -> SourceValidateLevel {
        self.client_source_validate_level
    }

    /// Server-side source validation policy
    #[must_use]
    pub fn server_source_validate_level(&self) -> SourceValidateLevel {
        self.server_source_validate_level
    }

    /// Whether egress toward the client must be obfuscated
    #[must_use]
    pub fn obfuscate_enabled(&self) -> bool {
        self.obfuscate_enabled.load(Ordering::Relaxed)
    }

    /// Mark the conversation as obfuscated on the client side
    pub fn set_obfuscate_enabled(&self, enabled: bool) {
        self.obfuscate_enabled.store(enabled, Ordering::Relaxed);
    }

    /// Record activity now. The stored value never decreases.
    pub fn touch(&self) {
        self.last_active.fetch_max(now_millis(), Ordering::AcqRel);
    }

    /// Milliseconds since the UNIX epoch of the last activity
    #[must_use]
    pub fn last_active_millis(&self) -> u64 {
        self.last_active.load(Ordering::Acquire)
    }

    /// Whether the session outlived the timeout with no traffic
    #[must_use]
    pub fn is_expired(&self, timeout: Duration) -> bool {
        self.last_active_millis()
            .saturating_add(timeout.as_millis() as u64)
            < now_millis()
    }

    /// Re-sign a client-to-server handshake message after header edits
    ///
    /// # Errors
    ///
    /// Fails when the packet is not a full initiation or response.
    pub fn sign_toward_server(&self, packet: &mut Packet) -> Result<(), PacketError> {
        wire::fix_macs(packet, &mut self.client_cookie_generator.lock())
    }

    /// Re-sign a server-to-client handshake message after header edits
    ///
    /// # Errors
    ///
    /// Fails when the packet is not a full initiation or response.
    pub fn sign_toward_client(&self, packet: &mut Packet) -> Result<(), PacketError> {
        wire::fix_macs(packet, &mut self.server_cookie_generator.lock())
    }

    /// Feed a backend cookie reply into the client-to-server generator so
    /// the next re-sent initiation carries a valid mac2.
    ///
    /// # Errors
    ///
    /// Fails when the reply does not decrypt or no initiation was signed.
    pub fn consume_cookie_reply(
        &self,
        nonce: &[u8; COOKIE_NONCE_LEN],
        encrypted_cookie: &[u8; COOKIE_ENCRYPTED_LEN],
    ) -> Result<(), NoiseError> {
        self.client_cookie_generator
            .lock()
            .consume_reply(nonce, encrypted_cookie)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field(
                "client",
                &format_args!(
                    "{}(idx:{:08x}->{:08x})",
                    self.client_destination(),
                    self.client_origin_index,
                    self.client_proxy_index
                ),
            )
            .field(
                "server",
                &format_args!(
                    "{}(idx:{:08x}->{:08x})",
                    self.server_destination(),
                    self.server_origin_index(),
                    self.server_proxy_index()
                ),
            )
            .field("obfuscated", &self.obfuscate_enabled())
            .finish()
    }
}
