//! Error types for wgmux
//!
//! Errors are categorized by subsystem. Per-packet errors are expected during
//! normal operation (unknown peers, roaming denials, stray datagrams) and are
//! logged and dropped; startup errors abort the process.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Top-level error type for wgmux
#[derive(Debug, Error)]
pub enum WgMuxError {
    /// Configuration errors (file parsing, validation)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Packet parsing and patching errors
    #[error("Packet error: {0}")]
    Packet(#[from] PacketError),

    /// Handshake cryptography errors
    #[error("Noise error: {0}")]
    Noise(#[from] NoiseError),

    /// Relay and session table errors
    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    /// Name resolution errors
    #[error("Resolve error: {0}")]
    Resolve(#[from] ResolveError),

    /// Session cache persistence errors
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// I/O errors not covered by other categories
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl WgMuxError {
    /// Check if this error is recoverable (the relay keeps running)
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Config(_) => false,
            Self::Packet(_) | Self::Noise(_) => true,
            Self::Relay(e) => e.is_recoverable(),
            Self::Resolve(_) => true,
            Self::Cache(_) => true,
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::ConnectionReset
            ),
        }
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File not found or inaccessible
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// JSON/JSON5 parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Validation error (invalid values, missing or conflicting fields)
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// Bad listen or forward address
    #[error("Invalid {kind} address {addr}: {reason}")]
    InvalidAddress {
        kind: &'static str,
        addr: String,
        reason: String,
    },

    /// Key decoding error
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// I/O error while reading config or key files
    #[error("I/O error reading configuration: {0}")]
    IoError(#[from] io::Error),
}

impl ConfigError {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }

    /// Create an invalid address error
    pub fn invalid_address(
        kind: &'static str,
        addr: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidAddress {
            kind,
            addr: addr.into(),
            reason: reason.into(),
        }
    }
}

/// Packet parsing and patching errors
#[derive(Debug, Error)]
pub enum PacketError {
    /// Packet is shorter than the accessed field requires
    #[error("packet too short to access u32 at offset {offset} (len={len})")]
    TooShort { offset: usize, len: usize },

    /// The message type carries no such index field
    #[error("message type {message_type} has no {field} field")]
    NoSuchField {
        message_type: u8,
        field: &'static str,
    },

    /// The first byte is not a known WireGuard message type
    #[error("unknown message type {0}")]
    UnknownMessageType(u8),

    /// Packet is empty or shorter than any WireGuard message
    #[error("packet too short for any message: len={0}")]
    Runt(usize),
}

/// Handshake cryptography errors
#[derive(Debug, Error)]
pub enum NoiseError {
    /// X25519 shared secret was all zero (low-order point)
    #[error("shared secret is zero")]
    SharedSecretZero,

    /// AEAD open of the encrypted static field failed
    #[error("wrong key: static field did not decrypt")]
    WrongKey,

    /// Cookie reply arrived before any initiation was signed
    #[error("no prior mac1 to decrypt cookie reply against")]
    NoPriorMac1,

    /// Cookie reply failed to decrypt
    #[error("cookie reply did not decrypt")]
    CookieDecryptFailed,

    /// Message bytes do not form a valid handshake message
    #[error("malformed {kind} message: len={len}")]
    MalformedMessage { kind: &'static str, len: usize },
}

/// Relay and session table errors
#[derive(Debug, Error)]
pub enum RelayError {
    /// Failed to bind a relay socket
    #[error("failed to listen on {side} addr {addr}: {reason}")]
    BindError {
        side: &'static str,
        addr: SocketAddr,
        reason: String,
    },

    /// A message type arrived from a direction that never sends it
    #[error("unexpected message type {message_type} from {src_addr}")]
    UnexpectedMessageType { message_type: u8, src_addr: SocketAddr },

    /// A sender/receiver index of zero is never valid on the wire
    #[error("received {kind} from {src_addr} with impossible receiver_index=0")]
    ZeroReceiverIndex { kind: &'static str, src_addr: SocketAddr },

    /// No session matches the receiver index of a packet
    #[error("no session found for {side}_map[{index:08x}], referred by packet from {src_addr}")]
    SessionNotFound {
        side: &'static str,
        index: u32,
        src_addr: SocketAddr,
    },

    /// Transport packet arrived from a source the validation level rejects
    #[error("{side} source mismatch: expected {expected}, got {got}")]
    SourceValidationFailed {
        side: &'static str,
        expected: SocketAddr,
        got: SocketAddr,
    },

    /// Initiation did not match any configured peer
    #[error("no matching peer and no fallback peer for the decrypted client key")]
    NoMatchingPeer,

    /// Handshake did not decrypt under any configured server key
    #[error("no server private key decrypted the message")]
    HandshakeDecryptFailed,

    /// Client mode: the upstream address has not been resolved yet
    #[error("forward address is not resolved yet")]
    NotResolved,

    /// Cookie reply could not be consumed
    #[error("failed to consume cookie reply from {src_addr}: {reason}")]
    CookieReplyRejected { src_addr: SocketAddr, reason: String },

    /// Packet-level error during dispatch
    #[error(transparent)]
    Packet(#[from] PacketError),

    /// Handshake-level error during dispatch
    #[error(transparent)]
    Noise(#[from] NoiseError),

    /// Socket I/O error
    #[error("relay I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl RelayError {
    /// Per-packet errors are recoverable; bind failures are not.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::BindError { .. })
    }

    /// Expected errors log at info; everything else logs at error.
    #[must_use]
    pub fn is_expected(&self) -> bool {
        !matches!(self, Self::BindError { .. } | Self::IoError(_))
    }
}

/// Name resolution errors
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Resolver URL could not be parsed
    #[error("cannot parse resolver url: {0}")]
    InvalidUrl(String),

    /// No registered resolver for the scheme prefix
    #[error("unknown resolver type: {0}")]
    UnknownScheme(String),

    /// Address is not of the host:port form
    #[error("invalid address {0}")]
    InvalidAddress(String),

    /// DNS query failed or timed out
    #[error("dns query for {name} failed: {reason}")]
    QueryFailed { name: String, reason: String },

    /// No usable record in the response
    #[error("no {kind} record found for {name}")]
    NoRecord { kind: &'static str, name: String },

    /// Encrypted TXT record failed to decode or decrypt
    #[error("invalid encrypted record: {0}")]
    BadRecord(String),

    /// I/O error while querying
    #[error("resolver I/O error: {0}")]
    IoError(#[from] io::Error),
}

/// Session cache persistence errors
#[derive(Debug, Error)]
pub enum CacheError {
    /// Cache file could not be written or renamed
    #[error("failed to write cache file {path}: {reason}")]
    WriteFailed { path: String, reason: String },

    /// Cache file content is not valid JSON
    #[error("failed to parse cache file: {0}")]
    ParseError(String),

    /// A cached session entry is unusable
    #[error("invalid cached session: {0}")]
    InvalidEntry(String),
}

/// Type alias for Result with WgMuxError
pub type Result<T> = std::result::Result<T, WgMuxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_recovery_classification() {
        let config_err: WgMuxError = ConfigError::validation("bad").into();
        assert!(!config_err.is_recoverable());

        let relay_err: WgMuxError = RelayError::NoMatchingPeer.into();
        assert!(relay_err.is_recoverable());

        let bind_err = RelayError::BindError {
            side: "client",
            addr: "127.0.0.1:51820".parse().unwrap(),
            reason: "in use".into(),
        };
        assert!(!bind_err.is_recoverable());
    }

    #[test]
    fn test_expected_errors() {
        let src: SocketAddr = "10.0.0.1:1000".parse().unwrap();
        assert!(RelayError::SessionNotFound {
            side: "client",
            index: 0xdead_beef,
            src_addr: src,
        }
        .is_expected());
        assert!(RelayError::NoMatchingPeer.is_expected());
        assert!(!RelayError::IoError(io::Error::new(io::ErrorKind::Other, "x")).is_expected());
    }

    #[test]
    fn test_error_display() {
        let err = PacketError::TooShort { offset: 4, len: 3 };
        assert!(err.to_string().contains("offset 4"));

        let err = RelayError::SessionNotFound {
            side: "server",
            index: 0x1234,
            src_addr: "10.0.0.1:1000".parse().unwrap(),
        };
        let msg = err.to_string();
        assert!(msg.contains("server_map"));
        assert!(msg.contains("00001234"));
    }
}
