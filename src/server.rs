//! Server deployment
//!
//! The server side of the relay: one listening endpoint terminates
//! initiations from many clients, identifies each by the static key
//! recovered from its handshake, and forwards the conversation to whichever
//! configured backend owns that key. Obfuscation, when configured, applies
//! on the client-facing socket, where the peers are wgmux clients.

use std::sync::Arc;

use tracing::info;

use crate::config::{ServerConfig, ServerEntry};
use crate::error::{RelayError, Result};
use crate::noise::initiation::{decrypt_static_key, InitiationMessage};
use crate::noise::NoisePublicKey;
use crate::obfs::Obfuscator;
use crate::packet::DEFAULT_MAX_PACKET_SIZE;
use crate::table::{IndexTranslationTable, PeerExtractor, ResolvedPeer, TableOptions};

/// Walks the configured servers and their peers to identify an initiation
struct ServerPeerExtractor {
    servers: Vec<ServerEntry>,
}

impl PeerExtractor for ServerPeerExtractor {
    fn extract_peer(&self, msg: &InitiationMessage) -> std::result::Result<ResolvedPeer, RelayError> {
        // The first server whose private key opens the static field wins
        let mut matched: Option<(&ServerEntry, NoisePublicKey)> = None;
        for server in &self.servers {
            let private_key = server.privkey.as_ref().expect("initialized config");
            if let Ok(client_pk) = decrypt_static_key(private_key, msg) {
                matched = Some((server, client_pk));
                break;
            }
        }
        let Some((server, client_public_key)) = matched else {
            return Err(RelayError::HandshakeDecryptFailed);
        };

        // Exact key match wins; a fallback peer catches the rest
        let mut exact = None;
        let mut fallback = None;
        for peer in &server.peers {
            if peer.is_fallback() {
                fallback = Some(peer);
            } else if peer.pubkey == Some(client_public_key) {
                exact = Some(peer);
            }
        }
        let peer = exact.or(fallback).ok_or(RelayError::NoMatchingPeer)?;

        Ok(ResolvedPeer {
            client_public_key,
            server_public_key: server.public_key.expect("initialized config"),
            forward_to: peer.forward_addr.expect("initialized config"),
            client_source_validate_level: peer.csvl,
            server_source_validate_level: peer.ssvl,
        })
    }
}

/// The server deployment: config, extractor, and the translation table
pub struct Server {
    table: Arc<IndexTranslationTable>,
}

impl Server {
    /// Build a server from its configuration.
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration or unresolvable addresses.
    pub fn new(mut config: ServerConfig) -> Result<Self> {
        config.initialize()?;
        let listen = config.listen_addr()?;

        let table = IndexTranslationTable::new(TableOptions {
            client_listen: listen,
            server_listen: None,
            timeout: std::time::Duration::from_secs(config.timeout),
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            client_obfuscator: Obfuscator::new(&config.obfs),
            server_obfuscator: Obfuscator::disabled(),
            extractor: Arc::new(ServerPeerExtractor {
                servers: config.servers,
            }),
            cache_jar: config.cache.jar(),
            always_generate_proxy_index: false,
        });

        Ok(Self { table })
    }

    /// The underlying translation table
    #[must_use]
    pub fn table(&self) -> &Arc<IndexTranslationTable> {
        &self.table
    }

    /// Serve until the process exits.
    ///
    /// # Errors
    ///
    /// Fails only at startup, when a socket cannot be bound.
    pub async fn run(&self) -> Result<()> {
        info!("listening toward clients");
        Arc::clone(&self.table).serve().await?;
        Ok(())
    }
}
