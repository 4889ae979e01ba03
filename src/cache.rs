//! Session cache persistence
//!
//! Established sessions are snapshotted to a JSON file so a relay restart
//! does not force every client through a fresh handshake. Saves go through a
//! temp file and an atomic rename; loads are best-effort (a missing file is
//! normal, a corrupt one is reported and treated as empty).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::error::CacheError;
use crate::noise::NoisePublicKey;
use crate::session::{Session, SessionParams, SourceValidateLevel};

/// One session snapshot in the cache file.
///
/// Field names are part of the on-disk format and must not change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedSession {
    /// Client origin index
    pub coidx: u32,
    /// Client proxy index
    pub cpidx: u32,
    /// Client public key
    pub cpk: NoisePublicKey,
    /// Client destination address
    pub cdst: String,
    /// Client source validate level
    pub csvl: SourceValidateLevel,
    /// Server origin index
    pub soidx: u32,
    /// Server proxy index (zero when the backend never replied)
    pub spidx: u32,
    /// Server public key
    pub spk: NoisePublicKey,
    /// Server destination address
    pub sdst: String,
    /// Server source validate level
    pub ssvl: SourceValidateLevel,
    /// Whether the conversation is obfuscated on the client side
    pub obfe: bool,
}

impl CachedSession {
    /// Snapshot a live session
    #[must_use]
    pub fn from_session(session: &Session) -> Self {
        Self {
            coidx: session.client_origin_index(),
            cpidx: session.client_proxy_index(),
            cpk: *session.client_public_key(),
            cdst: session.client_destination().to_string(),
            csvl: session.client_source_validate_level(),
            soidx: session.server_origin_index(),
            spidx: session.server_proxy_index(),
            spk: *session.server_public_key(),
            sdst: session.server_destination().to_string(),
            ssvl: session.server_source_validate_level(),
            obfe: session.obfuscate_enabled(),
        }
    }

    /// Rebuild a session from its snapshot.
    ///
    /// `last_active` restarts at now; cookie generators are re-seeded
    /// deterministically from the stored public keys.
    ///
    /// # Errors
    ///
    /// Fails when a stored address does not parse.
    pub fn into_session(self) -> Result<Session, CacheError> {
        let client_destination = self
            .cdst
            .parse()
            .map_err(|e| CacheError::InvalidEntry(format!("client destination {}: {e}", self.cdst)))?;
        let server_destination = self
            .sdst
            .parse()
            .map_err(|e| CacheError::InvalidEntry(format!("server destination {}: {e}", self.sdst)))?;

        let session = Session::new(SessionParams {
            client_origin_index: self.coidx,
            client_proxy_index: self.cpidx,
            client_public_key: self.cpk,
            server_public_key: self.spk,
            client_destination,
            server_destination,
            client_source_validate_level: self.csvl,
            server_source_validate_level: self.ssvl,
            obfuscate_enabled: self.obfe,
        });
        if self.spidx != 0 {
            session.set_server_indices(self.soidx, self.spidx);
        }
        Ok(session)
    }
}

/// Cache file wrapper: `{"client_map": [...]}`
#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheTable {
    client_map: Vec<CachedSession>,
}

/// Persists and restores the session table.
///
/// With no path configured, every operation is a no-op.
#[derive(Debug, Clone, Default)]
pub struct CacheJar {
    path: Option<PathBuf>,
    skip_load: bool,
}

impl CacheJar {
    /// Create a jar backed by the given file path
    #[must_use]
    pub fn new(path: Option<PathBuf>, skip_load: bool) -> Self {
        Self { path, skip_load }
    }

    /// Whether persistence is configured
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.path.is_some()
    }

    /// Write a snapshot list, atomically replacing the previous file.
    ///
    /// # Errors
    ///
    /// Fails when the temp file cannot be written or renamed.
    pub fn save(&self, sessions: &[CachedSession]) -> Result<(), CacheError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let table = CacheTable {
            client_map: sessions.to_vec(),
        };
        let json = serde_json::to_string_pretty(&table)
            .map_err(|e| CacheError::ParseError(e.to_string()))?;

        let tmp = tmp_path(path);
        std::fs::write(&tmp, json).map_err(|e| CacheError::WriteFailed {
            path: tmp.display().to_string(),
            reason: e.to_string(),
        })?;
        std::fs::rename(&tmp, path).map_err(|e| CacheError::WriteFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        debug!(count = sessions.len(), path = %path.display(), "session cache saved");
        Ok(())
    }

    /// Load snapshots from disk.
    ///
    /// A missing file or disabled jar yields an empty list. Entries that do
    /// not convert are skipped with an error log.
    ///
    /// # Errors
    ///
    /// Fails only when the file exists but is not valid JSON.
    pub fn load(&self) -> Result<Vec<Arc<Session>>, CacheError> {
        let Some(path) = &self.path else {
            return Ok(Vec::new());
        };
        if self.skip_load {
            return Ok(Vec::new());
        }

        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(_) => return Ok(Vec::new()),
        };
        let table: CacheTable =
            serde_json::from_str(&contents).map_err(|e| CacheError::ParseError(e.to_string()))?;

        let mut sessions = Vec::with_capacity(table.client_map.len());
        for cached in table.client_map {
            match cached.into_session() {
                Ok(session) => sessions.push(Arc::new(session)),
                Err(e) => error!("skipping cached session: {e}"),
            }
        }
        Ok(sessions)
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".tmp");
    PathBuf::from(os)
}
