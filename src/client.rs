//! Client deployment
//!
//! The inverse role, run next to the WireGuard endpoint that initiates: it
//! accepts traffic from the local WireGuard peer and forwards everything to
//! a single upstream proxy, re-resolving the upstream name periodically and
//! optionally obfuscating the upstream leg. No handshake decryption happens
//! here; the peer identity is fixed by configuration.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::config::ClientConfig;
use crate::error::{RelayError, Result};
use crate::noise::initiation::InitiationMessage;
use crate::noise::NoisePublicKey;
use crate::obfs::Obfuscator;
use crate::packet::DEFAULT_MAX_PACKET_SIZE;
use crate::resolver::{ResolverRegistry, UdpAddrResolver};
use crate::session::SourceValidateLevel;
use crate::table::{IndexTranslationTable, PeerExtractor, ResolvedPeer, TableOptions};

/// How often the upstream name is re-resolved
const RESOLVE_INTERVAL: Duration = Duration::from_secs(300);

/// Retry delay after a failed resolution
const RESOLVE_RETRY: Duration = Duration::from_secs(10);

/// Returns the one configured upstream peer for every initiation
struct ClientPeerExtractor {
    client_public_key: NoisePublicKey,
    server_public_key: NoisePublicKey,
    client_source_validate_level: SourceValidateLevel,
    server_source_validate_level: SourceValidateLevel,
    forward: Arc<RwLock<Option<SocketAddr>>>,
}

impl PeerExtractor for ClientPeerExtractor {
    fn extract_peer(&self, _msg: &InitiationMessage) -> std::result::Result<ResolvedPeer, RelayError> {
        let forward_to = (*self.forward.read()).ok_or(RelayError::NotResolved)?;
        Ok(ResolvedPeer {
            client_public_key: self.client_public_key,
            server_public_key: self.server_public_key,
            forward_to,
            client_source_validate_level: self.client_source_validate_level,
            server_source_validate_level: self.server_source_validate_level,
        })
    }
}

/// The client deployment: resolver loop plus the translation table
pub struct Client {
    table: Arc<IndexTranslationTable>,
    server: String,
    resolver: Arc<dyn UdpAddrResolver>,
    forward: Arc<RwLock<Option<SocketAddr>>>,
}

impl Client {
    /// Build a client from its configuration.
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration or an unknown resolver scheme.
    pub fn new(mut config: ClientConfig) -> Result<Self> {
        config.initialize()?;
        let listen = config.listen_addr()?;
        let resolver = ResolverRegistry::with_builtins().create(&config.resolver_url())?;
        let forward = Arc::new(RwLock::new(None));

        let table = IndexTranslationTable::new(TableOptions {
            client_listen: listen,
            server_listen: None,
            timeout: Duration::from_secs(config.timeout),
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            client_obfuscator: Obfuscator::disabled(),
            server_obfuscator: Obfuscator::new(&config.obfs),
            extractor: Arc::new(ClientPeerExtractor {
                client_public_key: config.client_pubkey,
                server_public_key: config.server_pubkey,
                client_source_validate_level: config.csvl,
                server_source_validate_level: config.ssvl,
                forward: Arc::clone(&forward),
            }),
            cache_jar: config.cache.jar(),
            always_generate_proxy_index: false,
        });

        Ok(Self {
            table,
            server: config.server,
            resolver,
            forward,
        })
    }

    /// The underlying translation table
    #[must_use]
    pub fn table(&self) -> &Arc<IndexTranslationTable> {
        &self.table
    }

    /// Serve until the process exits, re-resolving the upstream in the
    /// background.
    ///
    /// # Errors
    ///
    /// Fails only at startup, when a socket cannot be bound.
    pub async fn run(&self) -> Result<()> {
        tokio::spawn(resolve_loop(
            self.server.clone(),
            Arc::clone(&self.resolver),
            Arc::clone(&self.forward),
            self.table.destination_update_sender(),
        ));

        info!("listening toward the local WireGuard endpoint");
        Arc::clone(&self.table).serve().await?;
        Ok(())
    }
}

/// Keep the upstream address fresh; push changes into the table so live
/// sessions are repointed.
async fn resolve_loop(
    server: String,
    resolver: Arc<dyn UdpAddrResolver>,
    forward: Arc<RwLock<Option<SocketAddr>>>,
    updates: mpsc::Sender<SocketAddr>,
) {
    loop {
        match resolver.resolve(&server).await {
            Ok(addr) => {
                let changed = {
                    let mut current = forward.write();
                    if *current == Some(addr) {
                        false
                    } else {
                        *current = Some(addr);
                        true
                    }
                };
                if changed {
                    info!(%addr, "upstream server resolved");
                    if updates.send(addr).await.is_err() {
                        return;
                    }
                }
                tokio::time::sleep(RESOLVE_INTERVAL).await;
            }
            Err(e) => {
                error!("failed to resolve server addr {server}: {e}, retry in 10 seconds");
                tokio::time::sleep(RESOLVE_RETRY).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::noise::testing::build_initiation;
    use crate::noise::NoisePrivateKey;

    fn make_extractor(forward: Arc<RwLock<Option<SocketAddr>>>) -> ClientPeerExtractor {
        ClientPeerExtractor {
            client_public_key: NoisePrivateKey::generate().public_key(),
            server_public_key: NoisePrivateKey::generate().public_key(),
            client_source_validate_level: SourceValidateLevel::Default,
            server_source_validate_level: SourceValidateLevel::Default,
            forward,
        }
    }

    fn any_initiation() -> InitiationMessage {
        let sk = NoisePrivateKey::generate();
        let server_pk = NoisePrivateKey::generate().public_key();
        InitiationMessage::parse(&build_initiation(&sk, &server_pk, 1)).unwrap()
    }

    #[test]
    fn test_unresolved_upstream_rejects_initiations() {
        let forward = Arc::new(RwLock::new(None));
        let extractor = make_extractor(Arc::clone(&forward));
        assert!(matches!(
            extractor.extract_peer(&any_initiation()),
            Err(RelayError::NotResolved)
        ));
    }

    #[test]
    fn test_resolved_upstream_is_returned() {
        let addr: SocketAddr = "203.0.113.5:2333".parse().unwrap();
        let forward = Arc::new(RwLock::new(Some(addr)));
        let extractor = make_extractor(Arc::clone(&forward));

        let resolved = extractor.extract_peer(&any_initiation()).unwrap();
        assert_eq!(resolved.forward_to, addr);
        assert_eq!(resolved.client_public_key, extractor.client_public_key);
        assert_eq!(resolved.server_public_key, extractor.server_public_key);
    }
}
