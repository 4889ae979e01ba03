//! Index translation table
//!
//! The heart of the relay. WireGuard endpoints identify sessions by 32-bit
//! indices they each choose independently, so a proxy that fans many clients
//! out to several backends must keep a bidirectional translation between the
//! index spaces of the client-facing and server-facing conversations. This
//! module owns that registry and the four tasks that pump packets through it.
//!
//! # Tasks
//!
//! - `client_read_loop` / `server_read_loop`: blocking socket reads into
//!   pooled packets, deobfuscation, then a bounded channel to the dispatcher
//! - `write_loop`: drains both write queues, obfuscates on egress, sends
//! - `main_loop`: the single dispatcher. Transport packets are handled
//!   inline to preserve per-session ordering; handshake-class messages do
//!   AEAD and MAC work, so each is shipped to a fresh task instead
//!
//! All map mutation happens under one short-lived RwLock over both maps.
//! Establishing a session holds the write lock across the lookup and the
//! paired insert so an expiry sweep cannot drop the half-open entry in
//! between.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::cache::{CacheJar, CachedSession};
use crate::error::RelayError;
use crate::noise::initiation::InitiationMessage;
use crate::obfs::Obfuscator;
use crate::packet::{
    PacketPool, PooledPacket, DEFAULT_MAX_PACKET_SIZE, FLAG_DEOBFUSCATED_AFTER_RECEIVED,
    FLAG_OBFUSCATE_BEFORE_SEND,
};
use crate::session::{Session, SessionParams, SourceValidateLevel};
use crate::wire::{MessageType, MESSAGE_COOKIE_REPLY_SIZE};

/// Depth of the read-to-dispatch and write queues
const QUEUE_DEPTH: usize = 64;

/// A peer description returned by handshake extraction.
///
/// Always carries the concrete client key, even when the configuration
/// matched through a fallback entry.
#[derive(Debug, Clone)]
pub struct ResolvedPeer {
    /// The initiator's static public key, decrypted from the handshake
    pub client_public_key: crate::noise::NoisePublicKey,
    /// Static public key of the backend that will terminate the tunnel
    pub server_public_key: crate::noise::NoisePublicKey,
    /// Where to forward this conversation
    pub forward_to: SocketAddr,
    /// Client-side source validation policy
    pub client_source_validate_level: SourceValidateLevel,
    /// Server-side source validation policy
    pub server_source_validate_level: SourceValidateLevel,
}

/// Maps a handshake initiation to the backend peer it belongs to.
///
/// The server deployment walks its configured keys; the client deployment
/// returns its single upstream. Implementations must not mutate the message.
pub trait PeerExtractor: Send + Sync {
    /// Identify the peer an initiation belongs to.
    ///
    /// # Errors
    ///
    /// Implementations fail with `HandshakeDecryptFailed`, `NoMatchingPeer`,
    /// or `NotResolved`; the packet is then dropped and logged.
    fn extract_peer(&self, msg: &InitiationMessage) -> Result<ResolvedPeer, RelayError>;
}

/// Construction parameters for the table
pub struct TableOptions {
    /// Address facing the clients
    pub client_listen: SocketAddr,
    /// Address facing the backends; an ephemeral port when absent
    pub server_listen: Option<SocketAddr>,
    /// Session inactivity timeout and expiry sweep period
    pub timeout: Duration,
    /// Packet buffer capacity
    pub max_packet_size: usize,
    /// Obfuscation on the client-facing socket (server deployment)
    pub client_obfuscator: Obfuscator,
    /// Obfuscation on the server-facing socket (client deployment)
    pub server_obfuscator: Obfuscator,
    /// Handshake peer extraction
    pub extractor: Arc<dyn PeerExtractor>,
    /// Session persistence
    pub cache_jar: CacheJar,
    /// Force random proxy indices instead of preferring the origin value.
    /// Exercises the collision paths; only tests set this.
    pub always_generate_proxy_index: bool,
}

#[derive(Default)]
struct Maps {
    /// client_proxy_index -> session
    client_map: HashMap<u32, Arc<Session>>,
    /// server_proxy_index -> session
    server_map: HashMap<u32, Arc<Session>>,
}

/// The session registry and its packet pumps
pub struct IndexTranslationTable {
    client_listen: SocketAddr,
    server_listen: SocketAddr,
    timeout: Duration,
    client_obfuscator: Obfuscator,
    server_obfuscator: Obfuscator,
    extractor: Arc<dyn PeerExtractor>,
    cache_jar: CacheJar,
    always_generate_proxy_index: bool,

    state: RwLock<Maps>,
    pool: Arc<PacketPool>,

    destination_update_tx: mpsc::Sender<SocketAddr>,
    destination_update_rx: Mutex<Option<mpsc::Receiver<SocketAddr>>>,

    client_local_addr: std::sync::OnceLock<SocketAddr>,
    server_local_addr: std::sync::OnceLock<SocketAddr>,
}

impl IndexTranslationTable {
    /// Create a table. No sockets are bound until [`serve`](Self::serve).
    #[must_use]
    pub fn new(options: TableOptions) -> Arc<Self> {
        let (destination_update_tx, destination_update_rx) = mpsc::channel(QUEUE_DEPTH);
        let max_packet_size = if options.max_packet_size == 0 {
            DEFAULT_MAX_PACKET_SIZE
        } else {
            options.max_packet_size
        };
        Arc::new(Self {
            client_listen: options.client_listen,
            server_listen: options
                .server_listen
                .unwrap_or_else(|| SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))),
            timeout: options.timeout,
            client_obfuscator: options.client_obfuscator,
            server_obfuscator: options.server_obfuscator,
            extractor: options.extractor,
            cache_jar: options.cache_jar,
            always_generate_proxy_index: options.always_generate_proxy_index,
            state: RwLock::new(Maps::default()),
            pool: Arc::new(PacketPool::new(max_packet_size)),
            destination_update_tx,
            destination_update_rx: Mutex::new(Some(destination_update_rx)),
            client_local_addr: std::sync::OnceLock::new(),
            server_local_addr: std::sync::OnceLock::new(),
        })
    }

    /// Bound address of the client-facing socket, once serving
    #[must_use]
    pub fn client_local_addr(&self) -> Option<SocketAddr> {
        self.client_local_addr.get().copied()
    }

    /// Bound address of the server-facing socket, once serving
    #[must_use]
    pub fn server_local_addr(&self) -> Option<SocketAddr> {
        self.server_local_addr.get().copied()
    }

    /// Sender half of the destination-update channel, used by the client
    /// deployment when the upstream re-resolves.
    #[must_use]
    pub fn destination_update_sender(&self) -> mpsc::Sender<SocketAddr> {
        self.destination_update_tx.clone()
    }

    /// Number of live sessions discoverable from the client side
    #[must_use]
    pub fn client_session_count(&self) -> usize {
        self.state.read().client_map.len()
    }

    /// Number of established sessions discoverable from the server side
    #[must_use]
    pub fn server_session_count(&self) -> usize {
        self.state.read().server_map.len()
    }

    /// Bind both sockets, start the pump tasks, and dispatch forever.
    ///
    /// # Errors
    ///
    /// Fails only at startup, when a socket cannot be bound.
    pub async fn serve(self: Arc<Self>) -> Result<(), RelayError> {
        match self.cache_jar.load() {
            Ok(sessions) => {
                let mut maps = self.state.write();
                for session in sessions {
                    if session.server_proxy_index() != 0 {
                        maps.server_map
                            .insert(session.server_proxy_index(), Arc::clone(&session));
                    }
                    maps.client_map.insert(session.client_proxy_index(), session);
                }
                if !maps.client_map.is_empty() {
                    info!(sessions = maps.client_map.len(), "session cache loaded");
                }
            }
            Err(e) => warn!("session table cache not loaded: {e}"),
        }

        let client_socket = Arc::new(UdpSocket::bind(self.client_listen).await.map_err(|e| {
            RelayError::BindError {
                side: "client",
                addr: self.client_listen,
                reason: e.to_string(),
            }
        })?);
        let server_socket = Arc::new(UdpSocket::bind(self.server_listen).await.map_err(|e| {
            RelayError::BindError {
                side: "server",
                addr: self.server_listen,
                reason: e.to_string(),
            }
        })?);

        if let Ok(addr) = client_socket.local_addr() {
            let _ = self.client_local_addr.set(addr);
        }
        if let Ok(addr) = server_socket.local_addr() {
            let _ = self.server_local_addr.set(addr);
        }

        let (client_read_tx, mut client_read_rx) = mpsc::channel::<PooledPacket>(QUEUE_DEPTH);
        let (server_read_tx, mut server_read_rx) = mpsc::channel::<PooledPacket>(QUEUE_DEPTH);
        let (client_write_tx, client_write_rx) = mpsc::channel::<PooledPacket>(QUEUE_DEPTH);
        let (server_write_tx, server_write_rx) = mpsc::channel::<PooledPacket>(QUEUE_DEPTH);

        tokio::spawn(read_loop(
            "client",
            Arc::clone(&client_socket),
            Arc::clone(&self.pool),
            self.client_obfuscator.clone(),
            client_read_tx,
        ));
        tokio::spawn(read_loop(
            "server",
            Arc::clone(&server_socket),
            Arc::clone(&self.pool),
            self.server_obfuscator.clone(),
            server_read_tx,
        ));
        tokio::spawn(write_loop(
            client_socket,
            server_socket,
            self.client_obfuscator.clone(),
            self.server_obfuscator.clone(),
            client_write_rx,
            server_write_rx,
        ));

        let dispatcher = Dispatcher {
            table: Arc::clone(&self),
            client_write_tx,
            server_write_tx,
        };

        let mut destination_update_rx = self
            .destination_update_rx
            .lock()
            .take()
            .expect("serve called twice");
        let mut expire = tokio::time::interval_at(
            tokio::time::Instant::now() + self.timeout,
            self.timeout,
        );

        loop {
            tokio::select! {
                Some(packet) = client_read_rx.recv() => {
                    if packet.message_type() == Some(MessageType::Transport) {
                        dispatcher.handle_client_packet(packet).await;
                    } else {
                        let dispatcher = dispatcher.clone();
                        tokio::spawn(async move { dispatcher.handle_client_packet(packet).await });
                    }
                }
                Some(packet) = server_read_rx.recv() => {
                    if packet.message_type() == Some(MessageType::Transport) {
                        dispatcher.handle_server_packet(packet).await;
                    } else {
                        let dispatcher = dispatcher.clone();
                        tokio::spawn(async move { dispatcher.handle_server_packet(packet).await });
                    }
                }
                _ = expire.tick() => {
                    self.expire_sweep();
                }
                Some(addr) = destination_update_rx.recv() => {
                    self.update_all_server_destinations(addr);
                }
            }
        }
    }

    /// Remove every session whose inactivity exceeds the timeout. Expiry is
    /// the only deletion path besides re-initiation by the same client.
    fn expire_sweep(&self) {
        {
            let mut maps = self.state.write();
            let expired: Vec<Arc<Session>> = maps
                .client_map
                .values()
                .filter(|s| s.is_expired(self.timeout))
                .cloned()
                .collect();
            for session in expired {
                maps.client_map.remove(&session.client_proxy_index());
                maps.server_map.remove(&session.server_proxy_index());
                info!(session = ?session, "session expired");
            }
        }
        self.spawn_persist();
    }

    /// Repoint every session at a new upstream address
    fn update_all_server_destinations(&self, addr: SocketAddr) {
        {
            let maps = self.state.read();
            for session in maps.client_map.values() {
                session.set_server_destination(addr);
            }
            info!(%addr, sessions = maps.client_map.len(), "upstream destination updated");
        }
        self.spawn_persist();
    }

    /// Snapshot established sessions and write them out off the dispatcher
    fn spawn_persist(&self) {
        if !self.cache_jar.is_enabled() {
            return;
        }
        let snapshots: Vec<CachedSession> = {
            let maps = self.state.read();
            maps.server_map
                .values()
                .map(|s| CachedSession::from_session(s))
                .collect()
        };
        let jar = self.cache_jar.clone();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = jar.save(&snapshots) {
                error!("failed to save session table cache: {e}");
            }
        });
    }

    /// Pick a proxy index for `origin` that is free in `map` and non-zero.
    ///
    /// The origin value is preferred so most sessions keep their index on
    /// the wire; collisions fall back to uniform random draws. Zero is
    /// reserved to mean "not yet allocated".
    fn allocate_proxy_index(&self, map: &HashMap<u32, Arc<Session>>, origin: u32) -> u32 {
        let mut proxy = if self.always_generate_proxy_index {
            0
        } else {
            origin
        };
        while proxy == 0 || map.contains_key(&proxy) {
            proxy = rand::random();
        }
        proxy
    }
}

/// Pull packets off a socket into the dispatcher queue
async fn read_loop(
    side: &'static str,
    socket: Arc<UdpSocket>,
    pool: Arc<PacketPool>,
    obfuscator: Obfuscator,
    tx: mpsc::Sender<PooledPacket>,
) {
    loop {
        let mut packet = pool.get();
        match socket.recv_from(packet.buf_mut()).await {
            Ok((len, source)) => {
                packet.set_len(len);
                packet.set_source(source);
                obfuscator.deobfuscate(&mut packet);
                if tx.send(packet).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                error!("failed to read from {side} socket: {e}");
                // packet drops back into the pool
            }
        }
    }
}

/// Drain both write queues, obfuscating flagged packets on the way out
async fn write_loop(
    client_socket: Arc<UdpSocket>,
    server_socket: Arc<UdpSocket>,
    client_obfuscator: Obfuscator,
    server_obfuscator: Obfuscator,
    mut client_rx: mpsc::Receiver<PooledPacket>,
    mut server_rx: mpsc::Receiver<PooledPacket>,
) {
    loop {
        tokio::select! {
            packet = client_rx.recv() => {
                let Some(mut packet) = packet else { return };
                client_obfuscator.obfuscate(&mut packet);
                send_packet(&client_socket, &packet, "client").await;
            }
            packet = server_rx.recv() => {
                let Some(mut packet) = packet else { return };
                server_obfuscator.obfuscate(&mut packet);
                send_packet(&server_socket, &packet, "server").await;
            }
        }
    }
}

async fn send_packet(socket: &UdpSocket, packet: &PooledPacket, side: &str) {
    let Some(destination) = packet.destination() else {
        error!("dropping {side} packet with no destination");
        return;
    };
    if let Err(e) = socket.send_to(packet.slice(), destination).await {
        error!("failed to write to {side} socket dest={destination}: {e}");
    }
}

/// Handler bundle cloned into spawned handshake tasks
#[derive(Clone)]
struct Dispatcher {
    table: Arc<IndexTranslationTable>,
    client_write_tx: mpsc::Sender<PooledPacket>,
    server_write_tx: mpsc::Sender<PooledPacket>,
}

impl Dispatcher {
    /// Dispatch a packet that arrived on the client-facing socket
    async fn handle_client_packet(&self, mut packet: PooledPacket) {
        let source = packet.source().unwrap_or_else(unspecified_source);
        let message_type = packet.slice().first().copied().unwrap_or(0);

        let result = match packet.message_type() {
            Some(MessageType::Initiation) => self.process_client_initiation(&packet),
            Some(MessageType::Transport) => self.table.process_transport(&packet, false),
            _ => Err(RelayError::UnexpectedMessageType {
                message_type,
                src_addr: source,
            }),
        };
        let session = match result {
            Ok(session) => session,
            Err(e) => {
                log_drop("client", message_type, source, &e);
                return;
            }
        };

        if let Err(e) = patch_client_packet(&mut packet, &session) {
            error!("failed to patch type {message_type} packet from client {source}: {e}");
            return;
        }

        packet.set_destination(session.server_destination());
        if self.table.server_obfuscator.is_enabled() {
            packet.set_flag(FLAG_OBFUSCATE_BEFORE_SEND);
        }
        let _ = self.server_write_tx.send(packet).await;
    }

    /// Dispatch a packet that arrived on the server-facing socket
    async fn handle_server_packet(&self, mut packet: PooledPacket) {
        let source = packet.source().unwrap_or_else(unspecified_source);
        let message_type = packet.slice().first().copied().unwrap_or(0);

        let result = match packet.message_type() {
            Some(MessageType::Response) => self.table.process_server_response(&packet),
            Some(MessageType::CookieReply) => self.table.process_server_cookie_reply(&packet),
            Some(MessageType::Transport) => self.table.process_transport(&packet, true),
            _ => Err(RelayError::UnexpectedMessageType {
                message_type,
                src_addr: source,
            }),
        };
        let session = match result {
            Ok(session) => session,
            Err(e) => {
                log_drop("server", message_type, source, &e);
                return;
            }
        };

        if let Err(e) = patch_server_packet(&mut packet, &session) {
            error!("failed to patch type {message_type} packet from server {source}: {e}");
            return;
        }

        if session.obfuscate_enabled() {
            packet.set_flag(FLAG_OBFUSCATE_BEFORE_SEND);
        }
        packet.set_destination(session.client_destination());
        let _ = self.client_write_tx.send(packet).await;
    }

    /// The initiation is the only message the relay can decrypt: identify
    /// the client, create the session, and register its client-side index.
    fn process_client_initiation(&self, packet: &PooledPacket) -> Result<Arc<Session>, RelayError> {
        let source = packet.source().unwrap_or_else(unspecified_source);
        let msg = InitiationMessage::parse(packet.slice())?;
        let peer = self.table.extractor.extract_peer(&msg)?;

        let obfuscated = packet.has_flag(FLAG_DEOBFUSCATED_AFTER_RECEIVED);

        let table = &self.table;
        let mut maps = table.state.write();

        // The same client re-initiating supersedes its half-open session
        // instead of leaking it until expiry.
        let supersedes = maps.client_map.get(&msg.sender).is_some_and(|existing| {
            existing.client_origin_index() == msg.sender
                && existing.client_public_key() == &peer.client_public_key
        });
        if supersedes {
            if let Some(stale) = maps.client_map.remove(&msg.sender) {
                maps.server_map.remove(&stale.server_proxy_index());
                debug!(session = ?stale, "session replaced by new initiation");
            }
        }

        let client_proxy_index = table.allocate_proxy_index(&maps.client_map, msg.sender);
        let session = Arc::new(Session::new(SessionParams {
            client_origin_index: msg.sender,
            client_proxy_index,
            client_public_key: peer.client_public_key,
            server_public_key: peer.server_public_key,
            client_destination: source,
            server_destination: peer.forward_to,
            client_source_validate_level: peer.client_source_validate_level,
            server_source_validate_level: peer.server_source_validate_level,
            obfuscate_enabled: obfuscated,
        }));
        maps.client_map.insert(client_proxy_index, Arc::clone(&session));
        drop(maps);

        info!(
            "received initiation from client, session created: {}(idx:{:08x}->{:08x}) <=> {}",
            source,
            session.client_origin_index(),
            session.client_proxy_index(),
            session.server_destination(),
        );
        Ok(session)
    }
}

impl IndexTranslationTable {
    /// The backend's reply establishes the session: record its origin index,
    /// allocate the server-side proxy index, and make the session
    /// discoverable from the server map.
    ///
    /// The write lock spans the lookup and the insert so a concurrent expiry
    /// sweep cannot remove the half-open entry in between.
    fn process_server_response(&self, packet: &PooledPacket) -> Result<Arc<Session>, RelayError> {
        let source = packet.source().unwrap_or_else(unspecified_source);
        let receiver = packet.receiver_index()?;
        let sender = packet.sender_index()?;
        if receiver == 0 {
            return Err(RelayError::ZeroReceiverIndex {
                kind: "handshake_response",
                src_addr: source,
            });
        }

        let mut maps = self.state.write();
        let Some(session) = maps.client_map.get(&receiver).cloned() else {
            return Err(RelayError::SessionNotFound {
                side: "client",
                index: receiver,
                src_addr: source,
            });
        };
        session.touch();
        let server_proxy_index = self.allocate_proxy_index(&maps.server_map, sender);
        session.set_server_indices(sender, server_proxy_index);
        maps.server_map.insert(server_proxy_index, Arc::clone(&session));
        drop(maps);

        info!(
            "received response from server, session established: {}(idx:{:08x}->{:08x}) <=> {}(idx:{:08x}->{:08x})",
            session.client_destination(),
            session.client_origin_index(),
            session.client_proxy_index(),
            session.server_destination(),
            session.server_origin_index(),
            session.server_proxy_index(),
        );

        self.spawn_persist();
        Ok(session)
    }

    /// Feed a cookie reply into the session's signing state, then let it
    /// pass through so the client retries its initiation with a valid mac2.
    fn process_server_cookie_reply(&self, packet: &PooledPacket) -> Result<Arc<Session>, RelayError> {
        let source = packet.source().unwrap_or_else(unspecified_source);
        let receiver = packet.receiver_index()?;
        if receiver == 0 {
            return Err(RelayError::ZeroReceiverIndex {
                kind: "cookie_reply",
                src_addr: source,
            });
        }

        let session = {
            let maps = self.state.read();
            maps.client_map.get(&receiver).cloned()
        }
        .ok_or(RelayError::SessionNotFound {
            side: "client",
            index: receiver,
            src_addr: source,
        })?;

        let data = packet.slice();
        if data.len() < MESSAGE_COOKIE_REPLY_SIZE {
            return Err(RelayError::Packet(crate::error::PacketError::TooShort {
                offset: MESSAGE_COOKIE_REPLY_SIZE,
                len: data.len(),
            }));
        }
        let nonce: [u8; 24] = data[8..32].try_into().expect("24 bytes");
        let encrypted_cookie: [u8; 32] = data[32..64].try_into().expect("32 bytes");
        session
            .consume_cookie_reply(&nonce, &encrypted_cookie)
            .map_err(|e| RelayError::CookieReplyRejected {
                src_addr: source,
                reason: e.to_string(),
            })?;
        Ok(session)
    }

    /// Look up the session a transport packet belongs to and apply the
    /// per-direction source validation and roaming policy.
    fn process_transport(
        &self,
        packet: &PooledPacket,
        server_to_client: bool,
    ) -> Result<Arc<Session>, RelayError> {
        let source = packet.source().unwrap_or_else(unspecified_source);
        let receiver = packet.receiver_index()?;
        if receiver == 0 {
            return Err(RelayError::ZeroReceiverIndex {
                kind: "transport",
                src_addr: source,
            });
        }

        let session = {
            let maps = self.state.read();
            if server_to_client {
                maps.client_map.get(&receiver).cloned()
            } else {
                maps.server_map.get(&receiver).cloned()
            }
        }
        .ok_or(RelayError::SessionNotFound {
            side: if server_to_client { "client" } else { "server" },
            index: receiver,
            src_addr: source,
        })?;

        session.touch();

        if server_to_client {
            // Backend replies are validated only once the session is
            // established; its recorded address is never rewritten.
            if session.is_server_replied() {
                let expected = session.server_destination();
                let ip_changed = source.ip() != expected.ip();
                let port_changed = source.port() != expected.port();
                let level = session
                    .server_source_validate_level()
                    .or(SourceValidateLevel::IpAndPort);
                match level {
                    SourceValidateLevel::Ip if ip_changed => {
                        return Err(RelayError::SourceValidationFailed {
                            side: "server",
                            expected,
                            got: source,
                        });
                    }
                    SourceValidateLevel::IpAndPort if ip_changed || port_changed => {
                        return Err(RelayError::SourceValidationFailed {
                            side: "server",
                            expected,
                            got: source,
                        });
                    }
                    _ => {}
                }
                if ip_changed || port_changed {
                    info!("allowed server reply from another source: {expected} => {source}");
                }
            }
        } else {
            let expected = session.client_destination();
            let ip_changed = source.ip() != expected.ip();
            let port_changed = source.port() != expected.port();
            let level = session
                .client_source_validate_level()
                .or(SourceValidateLevel::None);
            match level {
                SourceValidateLevel::Ip if ip_changed => {
                    return Err(RelayError::SourceValidationFailed {
                        side: "client",
                        expected,
                        got: source,
                    });
                }
                SourceValidateLevel::IpAndPort if ip_changed || port_changed => {
                    return Err(RelayError::SourceValidationFailed {
                        side: "client",
                        expected,
                        got: source,
                    });
                }
                _ => {}
            }
            if ip_changed || port_changed {
                info!("allowed client roaming: {expected} => {source}");
                session.set_client_destination(source);
            }
        }

        Ok(session)
    }
}

/// Rewrite the header of a client-to-server packet to the proxy's index
/// space, re-signing edited handshake messages.
fn patch_client_packet(
    packet: &mut PooledPacket,
    session: &Session,
) -> Result<(), crate::error::PacketError> {
    match packet.message_type() {
        Some(MessageType::Initiation)
            if session.client_origin_index() != session.client_proxy_index() =>
        {
            packet.set_sender_index(session.client_proxy_index())?;
            session.sign_toward_server(packet)?;
        }
        Some(MessageType::Transport) => {
            packet.set_receiver_index(session.server_origin_index())?;
        }
        _ => {}
    }
    Ok(())
}

/// Rewrite the header of a server-to-client packet back to the client's
/// index space, re-signing edited handshake messages.
fn patch_server_packet(
    packet: &mut PooledPacket,
    session: &Session,
) -> Result<(), crate::error::PacketError> {
    match packet.message_type() {
        Some(MessageType::Response)
            if session.server_origin_index() != session.server_proxy_index()
                || session.client_origin_index() != session.client_proxy_index() =>
        {
            packet.set_sender_index(session.server_proxy_index())?;
            packet.set_receiver_index(session.client_origin_index())?;
            session.sign_toward_client(packet)?;
        }
        Some(MessageType::CookieReply) | Some(MessageType::Transport) => {
            packet.set_receiver_index(session.client_origin_index())?;
        }
        _ => {}
    }
    Ok(())
}

fn unspecified_source() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
}

fn log_drop(side: &str, message_type: u8, source: SocketAddr, err: &RelayError) {
    if err.is_expected() {
        info!("failed to handle type {message_type} packet from {side} {source}: {err}");
    } else {
        error!("failed to handle type {message_type} packet from {side} {source}: {err}");
    }
}
