//! Configuration types and loading
//!
//! Both deployments are configured from a JSON file (JSON5 is accepted, so
//! comments and trailing commas are fine). Parsing is followed by an
//! explicit initialization pass that resolves addresses, loads key files,
//! applies per-peer defaulting, and rejects conflicting options. A few
//! environment variables override cache behavior after the file is parsed.

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::CacheJar;
use crate::error::ConfigError;
use crate::noise::{NoisePrivateKey, NoisePublicKey};
use crate::session::SourceValidateLevel;

/// Default session timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Cache-related settings shared by both deployments
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Path of the session cache file; empty disables persistence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_file_path: Option<String>,

    /// Skip loading the cache at startup (set via environment only)
    #[serde(skip)]
    pub skip_load_cache: bool,
}

impl CacheSettings {
    /// Apply the `MWGP_CACHE_FILE`, `MWGP_NO_CACHE`, and
    /// `MWGP_SKIP_LOAD_CACHE` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("MWGP_CACHE_FILE") {
            debug!("cache file path overridden to {path}");
            self.cache_file_path = Some(path);
        }
        if std::env::var("MWGP_NO_CACHE").is_ok() {
            debug!("cache disabled by environment");
            self.cache_file_path = None;
        }
        if std::env::var("MWGP_SKIP_LOAD_CACHE").is_ok() {
            debug!("cache load skipped by environment");
            self.skip_load_cache = true;
        }
    }

    /// Build the cache jar these settings describe
    #[must_use]
    pub fn jar(&self) -> CacheJar {
        CacheJar::new(
            self.cache_file_path
                .as_ref()
                .filter(|p| !p.is_empty())
                .map(PathBuf::from),
            self.skip_load_cache,
        )
    }
}

/// One peer behind a configured backend server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerEntry {
    /// `host:port` to forward this peer's traffic to. An empty host
    /// inherits the server-level `address`.
    pub forward_to: String,

    /// The peer's static public key; absent marks the fallback peer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pubkey: Option<NoisePublicKey>,

    /// Per-peer client source validation override
    #[serde(default, skip_serializing_if = "is_default_level")]
    pub csvl: SourceValidateLevel,

    /// Per-peer server source validation override
    #[serde(default, skip_serializing_if = "is_default_level")]
    pub ssvl: SourceValidateLevel,

    /// Resolved forward address, filled by initialization
    #[serde(skip)]
    pub forward_addr: Option<SocketAddr>,
}

fn is_default_level(level: &SourceValidateLevel) -> bool {
    *level == SourceValidateLevel::Default
}

impl PeerEntry {
    /// Whether this peer matches any client key not matched elsewhere
    #[must_use]
    pub fn is_fallback(&self) -> bool {
        self.pubkey.is_none()
    }
}

/// One backend WireGuard server the relay can front for
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerEntry {
    /// The backend's private key, inline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privkey: Option<NoisePrivateKey>,

    /// The backend's private key, read from a file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privkey_file: Option<String>,

    /// Default forward host for peers whose `forward_to` omits one
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub address: String,

    /// The peers served by this backend
    pub peers: Vec<PeerEntry>,

    /// Server-wide client source validation default
    #[serde(default, skip_serializing_if = "is_default_level")]
    pub csvl: SourceValidateLevel,

    /// Server-wide server source validation default
    #[serde(default, skip_serializing_if = "is_default_level")]
    pub ssvl: SourceValidateLevel,

    /// Public key derived from the private key, filled by initialization
    #[serde(skip)]
    pub public_key: Option<NoisePublicKey>,
}

impl ServerEntry {
    /// Resolve keys and addresses and apply per-peer defaulting.
    ///
    /// # Errors
    ///
    /// Fails on missing peers, conflicting or missing key sources, more
    /// than one fallback peer, or unresolvable forward addresses.
    pub fn initialize(&mut self) -> Result<(), ConfigError> {
        if self.peers.is_empty() {
            return Err(ConfigError::validation("no peers"));
        }

        match (&self.privkey, &self.privkey_file) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::validation(
                    "cannot specify both privkey and privkey_file",
                ));
            }
            (None, Some(path)) => {
                self.privkey = Some(NoisePrivateKey::from_file(path).map_err(|e| {
                    ConfigError::validation(format!(
                        "cannot read private key from file {path}: {e}"
                    ))
                })?);
            }
            (None, None) => {
                return Err(ConfigError::validation("no server private key provided"));
            }
            (Some(_), None) => {}
        }
        let public_key = self
            .privkey
            .as_ref()
            .expect("private key resolved above")
            .public_key();
        self.public_key = Some(public_key);

        let mut found_fallback = false;
        for (index, peer) in self.peers.iter_mut().enumerate() {
            if peer.is_fallback() {
                if found_fallback {
                    return Err(ConfigError::validation("multiple fallback peers found"));
                }
                found_fallback = true;
            }

            if peer.forward_to.is_empty() {
                return Err(ConfigError::validation(format!(
                    "peer[{index}] has no forward_to address"
                )));
            }
            let (host, port) = peer.forward_to.rsplit_once(':').ok_or_else(|| {
                ConfigError::invalid_address("forward_to", &peer.forward_to, "missing port")
            })?;
            let host = if host.trim().is_empty() {
                self.address.trim()
            } else {
                host.trim()
            };
            if host.is_empty() {
                return Err(ConfigError::invalid_address(
                    "forward_to",
                    &peer.forward_to,
                    "no host and no server-level address",
                ));
            }
            let target = format!("{}:{}", host, port.trim());
            peer.forward_addr = Some(
                target
                    .to_socket_addrs()
                    .map_err(|e| {
                        ConfigError::invalid_address("forward_to", &target, e.to_string())
                    })?
                    .next()
                    .ok_or_else(|| {
                        ConfigError::invalid_address("forward_to", &target, "no address")
                    })?,
            );

            peer.csvl = peer.csvl.or(self.csvl);
            peer.ssvl = peer.ssvl.or(self.ssvl);
        }
        Ok(())
    }
}

/// Configuration of the server deployment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// `host:port` the relay listens on toward clients
    pub listen: String,

    /// Session inactivity timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Obfuscation user key; empty disables obfuscation
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub obfs: String,

    /// The backend servers to multiplex between
    pub servers: Vec<ServerEntry>,

    /// Cache persistence settings
    #[serde(flatten)]
    pub cache: CacheSettings,
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl ServerConfig {
    /// Initialize every server entry and validate the whole config.
    ///
    /// # Errors
    ///
    /// Fails when no server is defined or any entry fails initialization.
    pub fn initialize(&mut self) -> Result<(), ConfigError> {
        if self.servers.is_empty() {
            return Err(ConfigError::validation("no server defined"));
        }
        if self.listen.is_empty() {
            return Err(ConfigError::validation("no listen address"));
        }
        for (index, server) in self.servers.iter_mut().enumerate() {
            server
                .initialize()
                .map_err(|e| ConfigError::validation(format!("server[{index}]: {e}")))?;
        }
        self.cache.apply_env_overrides();
        Ok(())
    }

    /// Resolve the listen address
    ///
    /// # Errors
    ///
    /// Fails when the configured string does not resolve.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        resolve_listen(&self.listen)
    }
}

/// Configuration of the client deployment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// `host:port` of the upstream proxy
    pub server: String,

    /// `host:port` the local WireGuard endpoint sends to
    pub listen: String,

    /// Session inactivity timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Fixed DNS server for upstream resolution (plain `host:port`)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub dns: String,

    /// Resolver URL (`dns+udp://...`, `hn2etxt+udp://...?secret=...`);
    /// empty uses `dns` or the system resolver
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resolver: String,

    /// Client source validation level
    #[serde(default, skip_serializing_if = "is_default_level")]
    pub csvl: SourceValidateLevel,

    /// Server source validation level
    #[serde(default, skip_serializing_if = "is_default_level")]
    pub ssvl: SourceValidateLevel,

    /// The local WireGuard endpoint's public key
    pub client_pubkey: NoisePublicKey,

    /// The tunnel server's public key (behind the upstream proxy)
    pub server_pubkey: NoisePublicKey,

    /// Obfuscation user key shared with the upstream proxy
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub obfs: String,

    /// Cache persistence settings
    #[serde(flatten)]
    pub cache: CacheSettings,
}

impl ClientConfig {
    /// Validate the config and apply environment overrides.
    ///
    /// # Errors
    ///
    /// Fails on missing addresses or zero keys.
    pub fn initialize(&mut self) -> Result<(), ConfigError> {
        if self.server.is_empty() {
            return Err(ConfigError::validation("no server address"));
        }
        if self.listen.is_empty() {
            return Err(ConfigError::validation("no listen address"));
        }
        if self.client_pubkey.is_zero() {
            return Err(ConfigError::validation("client_pubkey is required"));
        }
        if self.server_pubkey.is_zero() {
            return Err(ConfigError::validation("server_pubkey is required"));
        }
        self.cache.apply_env_overrides();
        Ok(())
    }

    /// Resolve the listen address
    ///
    /// # Errors
    ///
    /// Fails when the configured string does not resolve.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        resolve_listen(&self.listen)
    }

    /// The resolver URL, falling back to the plain `dns` setting
    #[must_use]
    pub fn resolver_url(&self) -> String {
        if !self.resolver.is_empty() {
            return self.resolver.clone();
        }
        if !self.dns.is_empty() {
            return format!("dns+udp://{}", self.dns);
        }
        String::new()
    }
}

fn resolve_listen(listen: &str) -> Result<SocketAddr, ConfigError> {
    // A bare ":port" listens on every interface
    let target = if listen.starts_with(':') {
        format!("0.0.0.0{listen}")
    } else {
        listen.to_string()
    };
    target
        .to_socket_addrs()
        .map_err(|e| ConfigError::invalid_address("listen", listen, e.to_string()))?
        .next()
        .ok_or_else(|| ConfigError::invalid_address("listen", listen, "no address"))
}

/// Read and parse a config file (JSON or JSON5).
///
/// # Errors
///
/// Fails when the file is missing or does not parse.
pub fn load_config<T: serde::de::DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, ConfigError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.display().to_string(),
        });
    }
    let contents = std::fs::read_to_string(path)?;
    json5::from_str(&contents)
        .map_err(|e| ConfigError::ParseError(format!("{e} at {}", path.display())))
}
