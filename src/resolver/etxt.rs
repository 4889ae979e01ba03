//! Encrypted TXT record resolution
//!
//! `hn2etxt+udp://host:port?secret=...` reads TXT records from a fixed DNS
//! server, decrypts each with ChaCha20-Poly1305 under `SHA-256(secret)`
//! (the first 12 bytes of the decoded record are the nonce), and parses the
//! plaintext as space-separated `key=value` tokens. A record must carry the
//! `hn2etxt` marker and an `addr=`; among valid records the one with the
//! greatest `time=` wins. This lets an upstream publish its current address
//! over plain DNS without revealing it to onlookers.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use base64::prelude::*;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use rand::Rng;
use sha2::{Digest, Sha256};

use super::dns::{parse_resolver_server, DnsClient};
use super::{split_host_port, UdpAddrResolver};
use crate::error::ResolveError;

/// Nonce length of the record cipher
const NONCE_LEN: usize = 12;

/// One decrypted record
#[derive(Debug, Default, Clone)]
struct EtxtRecord {
    addr: String,
    time: i64,
}

impl EtxtRecord {
    /// Parse space-separated `key=value` tokens.
    ///
    /// Requires the `hn2etxt` marker and an `addr=`; a missing or
    /// unparsable `time=` is tolerated and sorts first.
    fn parse(s: &str) -> Result<Self, ResolveError> {
        let mut marker = false;
        let mut record = Self::default();
        for token in s.split(' ') {
            let (key, value) = match token.split_once('=') {
                Some((k, v)) => (k, v),
                None => (token, ""),
            };
            match key {
                "hn2etxt" => marker = true,
                "addr" => record.addr = value.to_string(),
                "time" => record.time = value.parse().unwrap_or(0),
                _ => {}
            }
        }
        if !marker {
            return Err(ResolveError::BadRecord("not a hn2etxt record".to_string()));
        }
        if record.addr.is_empty() {
            return Err(ResolveError::BadRecord(
                "no addr found in hn2etxt record".to_string(),
            ));
        }
        Ok(record)
    }
}

/// `hn2etxt+udp://host:port?secret=...` resolver
pub struct EtxtResolver {
    dns: DnsClient,
    key: [u8; 32],
}

impl EtxtResolver {
    /// Build from the full configured URL.
    ///
    /// # Errors
    ///
    /// Fails on a malformed URL or an unsupported transport scheme.
    pub fn from_url(url_str: &str) -> Result<Arc<dyn UdpAddrResolver>, ResolveError> {
        let server = parse_resolver_server(url_str, "hn2etxt")?;
        let stripped = url_str
            .strip_prefix("hn2etxt+")
            .ok_or_else(|| ResolveError::InvalidUrl(url_str.to_string()))?;
        let url = url::Url::parse(stripped).map_err(|e| ResolveError::InvalidUrl(e.to_string()))?;
        let secret = url
            .query_pairs()
            .find(|(k, _)| k == "secret")
            .map(|(_, v)| v.into_owned())
            .unwrap_or_default();

        Ok(Arc::new(Self::new(server, &secret)))
    }

    /// Build directly from a server address and shared secret
    #[must_use]
    pub fn new(server: SocketAddr, secret: &str) -> Self {
        Self {
            dns: DnsClient::new(server),
            key: Sha256::digest(secret.as_bytes()).into(),
        }
    }

    /// Decode and decrypt one TXT record
    fn try_decrypt(&self, record: &str) -> Result<String, ResolveError> {
        let bytes = BASE64_STANDARD_NO_PAD
            .decode(record)
            .map_err(|e| ResolveError::BadRecord(format!("bad base64: {e}")))?;
        if bytes.len() < NONCE_LEN {
            return Err(ResolveError::BadRecord("invalid record length".to_string()));
        }
        let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);
        let cipher = ChaCha20Poly1305::new_from_slice(&self.key).expect("32-byte key");
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| ResolveError::BadRecord("record did not decrypt".to_string()))?;
        String::from_utf8(plaintext)
            .map_err(|e| ResolveError::BadRecord(format!("record is not utf-8: {e}")))
    }

    /// Decrypt and parse every TXT record, keeping the newest valid one
    fn select_record(&self, records: &[String]) -> Result<EtxtRecord, ResolveError> {
        let mut latest: Option<EtxtRecord> = None;
        let mut last_err: Option<ResolveError> = None;
        for text in records {
            let parsed = self
                .try_decrypt(text)
                .and_then(|plain| EtxtRecord::parse(&plain));
            match parsed {
                Ok(record) => {
                    if latest.as_ref().map_or(true, |best| record.time > best.time) {
                        latest = Some(record);
                    }
                }
                Err(e) => last_err = Some(e),
            }
        }
        latest.ok_or_else(|| {
            last_err.unwrap_or_else(|| ResolveError::BadRecord("no valid record".to_string()))
        })
    }
}

#[async_trait]
impl UdpAddrResolver for EtxtResolver {
    async fn resolve(&self, address: &str) -> Result<SocketAddr, ResolveError> {
        let (host, port) = split_host_port(address)?;
        let records = self.dns.lookup_txt(host).await?;
        let record = self.select_record(&records)?;

        // The published addr may itself be a name; resolve it over the same
        // server and pick a random address among the answers.
        let ips = self.dns.lookup_ips(&record.addr).await?;
        let ip = ips[rand::thread_rng().gen_range(0..ips.len())];
        Ok(SocketAddr::new(ip, port))
    }
}
