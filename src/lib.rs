//! wgmux: multiplexing WireGuard proxy
//!
//! A UDP relay that terminates WireGuard handshake initiations from many
//! clients on one listening endpoint, identifies each client by the static
//! public key carried in its initiation, and forwards its traffic to one of
//! several configured backend peers. The complementary client mode performs
//! the inverse role on the tunnel entry host, forwarding a local WireGuard
//! endpoint to a single upstream proxy with optional on-wire obfuscation.
//!
//! WireGuard peers demultiplex sessions with 32-bit indices each endpoint
//! chooses independently, so the relay maintains a bidirectional translation
//! between the index spaces of the client-facing and server-facing
//! conversations for every live session. That translation, the handshake
//! peer extraction, MAC recomputation, and the obfuscation scheme are the
//! core of the crate.
//!
//! # Architecture
//!
//! ```text
//! WireGuard client → wgmux server ─┬→ backend A (by client public key)
//!                 (index translation)├→ backend B
//!                                    └→ fallback peer
//!
//! WireGuard endpoint → wgmux client → (obfuscated) → wgmux server → ...
//! ```
//!
//! # Modules
//!
//! - [`packet`]: pooled packet buffers and flags
//! - [`wire`]: message layouts and the sender/receiver index codec
//! - [`noise`]: keys, handshake crypto, mac1/mac2 cookie machinery
//! - [`obfs`]: keyed, MTU-neutral header obfuscation
//! - [`session`]: per-conversation state and validation policy
//! - [`table`]: the index translation table and its packet pumps
//! - [`cache`]: atomic JSON persistence of established sessions
//! - [`resolver`]: pluggable upstream name resolution
//! - [`config`]: configuration types and loading
//! - [`server`] / [`client`]: the two deployments

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod noise;
pub mod obfs;
pub mod packet;
pub mod resolver;
pub mod server;
pub mod session;
pub mod table;
pub mod wire;

pub use cache::{CacheJar, CachedSession};
pub use client::Client;
pub use config::{load_config, ClientConfig, PeerEntry, ServerConfig, ServerEntry};
pub use error::{
    CacheError, ConfigError, NoiseError, PacketError, RelayError, ResolveError, Result, WgMuxError,
};
pub use noise::{CookieGenerator, NoisePrivateKey, NoisePublicKey};
pub use obfs::Obfuscator;
pub use packet::{Packet, PacketPool, PooledPacket};
pub use resolver::{ResolverRegistry, UdpAddrResolver};
pub use server::Server;
pub use session::{Session, SessionParams, SourceValidateLevel};
pub use table::{IndexTranslationTable, PeerExtractor, ResolvedPeer, TableOptions};
pub use wire::MessageType;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
