//! Plain DNS resolution against a fixed server
//!
//! `dns+udp://host:port` routes lookups through one nameserver instead of
//! the system resolver, which matters when the host's own DNS path is the
//! thing being tunneled.

use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hickory_proto::op::{Message, MessageType, OpCode, Query};
use hickory_proto::rr::{Name, RData, RecordType};
use rand::Rng;
use tokio::net::UdpSocket;
use tokio::time::timeout;

use super::{split_host_port, UdpAddrResolver};
use crate::error::ResolveError;

/// Query timeout per attempt
const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Response buffer, large enough for EDNS0 answers
const RECV_BUFFER_SIZE: usize = 4096;

/// A stateless DNS client bound to one server.
///
/// Each query opens a fresh socket, sends one datagram, and validates the
/// response id before trusting the answers.
#[derive(Debug, Clone)]
pub(crate) struct DnsClient {
    server: SocketAddr,
}

impl DnsClient {
    pub(crate) fn new(server: SocketAddr) -> Self {
        Self { server }
    }

    /// Send one query and return the answer records
    async fn query(&self, name: &Name, rtype: RecordType) -> Result<Message, ResolveError> {
        let id: u16 = rand::thread_rng().gen();
        let mut message = Message::new();
        message
            .set_id(id)
            .set_message_type(MessageType::Query)
            .set_op_code(OpCode::Query)
            .set_recursion_desired(true)
            .add_query(Query::query(name.clone(), rtype));

        let query_bytes = message.to_vec().map_err(|e| ResolveError::QueryFailed {
            name: name.to_string(),
            reason: e.to_string(),
        })?;

        let bind_addr: SocketAddr = if self.server.is_ipv4() {
            "0.0.0.0:0".parse().expect("literal")
        } else {
            "[::]:0".parse().expect("literal")
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.send_to(&query_bytes, self.server).await?;

        let mut buf = [0u8; RECV_BUFFER_SIZE];
        let (len, _) = timeout(QUERY_TIMEOUT, socket.recv_from(&mut buf))
            .await
            .map_err(|_| ResolveError::QueryFailed {
                name: name.to_string(),
                reason: "timed out".to_string(),
            })??;

        let response = Message::from_vec(&buf[..len]).map_err(|e| ResolveError::QueryFailed {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        if response.id() != id {
            return Err(ResolveError::QueryFailed {
                name: name.to_string(),
                reason: "response id mismatch".to_string(),
            });
        }
        Ok(response)
    }

    /// All A and AAAA addresses for a host
    pub(crate) async fn lookup_ips(&self, host: &str) -> Result<Vec<IpAddr>, ResolveError> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(vec![ip]);
        }
        let name = parse_name(host)?;

        let mut ips = Vec::new();
        for rtype in [RecordType::A, RecordType::AAAA] {
            let response = match self.query(&name, rtype).await {
                Ok(response) => response,
                // One family failing is fine as long as the other answers
                Err(_) if rtype == RecordType::AAAA && !ips.is_empty() => continue,
                Err(e) => return Err(e),
            };
            for record in response.answers() {
                match record.data() {
                    Some(RData::A(a)) => ips.push(IpAddr::V4(a.0)),
                    Some(RData::AAAA(aaaa)) => ips.push(IpAddr::V6(aaaa.0)),
                    _ => {}
                }
            }
        }
        if ips.is_empty() {
            return Err(ResolveError::NoRecord {
                kind: "address",
                name: host.to_string(),
            });
        }
        Ok(ips)
    }

    /// All TXT strings for a host, one concatenated string per record
    pub(crate) async fn lookup_txt(&self, host: &str) -> Result<Vec<String>, ResolveError> {
        let name = parse_name(host)?;
        let response = self.query(&name, RecordType::TXT).await?;

        let mut records = Vec::new();
        for record in response.answers() {
            if let Some(RData::TXT(txt)) = record.data() {
                let mut joined = Vec::new();
                for part in txt.txt_data() {
                    joined.extend_from_slice(part);
                }
                records.push(String::from_utf8_lossy(&joined).into_owned());
            }
        }
        if records.is_empty() {
            return Err(ResolveError::NoRecord {
                kind: "TXT",
                name: host.to_string(),
            });
        }
        Ok(records)
    }
}

fn parse_name(host: &str) -> Result<Name, ResolveError> {
    let mut name = Name::from_str(host).map_err(|e| ResolveError::QueryFailed {
        name: host.to_string(),
        reason: e.to_string(),
    })?;
    name.set_fqdn(true);
    Ok(name)
}

/// `dns+udp://host:port` resolver
pub struct DnsResolver {
    client: DnsClient,
}

impl DnsResolver {
    /// Build from the full configured URL.
    ///
    /// # Errors
    ///
    /// Fails on a malformed URL or an unsupported transport scheme.
    pub fn from_url(url: &str) -> Result<Arc<dyn UdpAddrResolver>, ResolveError> {
        let server = parse_resolver_server(url, "dns")?;
        Ok(Arc::new(Self {
            client: DnsClient::new(server),
        }))
    }
}

#[async_trait]
impl UdpAddrResolver for DnsResolver {
    async fn resolve(&self, address: &str) -> Result<SocketAddr, ResolveError> {
        let (host, port) = split_host_port(address)?;
        let ips = self.client.lookup_ips(host).await?;
        let ip = ips[rand::thread_rng().gen_range(0..ips.len())];
        Ok(SocketAddr::new(ip, port))
    }
}

/// Parse `scheme+udp://host:port[?query]` down to the server address
pub(crate) fn parse_resolver_server(
    url_str: &str,
    scheme: &str,
) -> Result<SocketAddr, ResolveError> {
    let stripped = url_str
        .strip_prefix(&format!("{scheme}+"))
        .ok_or_else(|| ResolveError::InvalidUrl(url_str.to_string()))?;
    let url = url::Url::parse(stripped).map_err(|e| ResolveError::InvalidUrl(e.to_string()))?;
    if url.scheme() != "udp" {
        return Err(ResolveError::UnknownScheme(format!(
            "unsupported dns protocol: {}",
            url.scheme()
        )));
    }
    let host = url
        .host_str()
        .ok_or_else(|| ResolveError::InvalidUrl(url_str.to_string()))?;
    let port = url.port().unwrap_or(53);
    let ip: IpAddr = host
        .parse()
        .map_err(|_| ResolveError::InvalidUrl(format!("resolver host must be an IP: {host}")))?;
    Ok(SocketAddr::new(ip, port))
}
