//! IPv4 host lookup over the DNS fallback resolver.
//!
//! Names are answered from IP literals, then the static hosts table, then
//! an A query sent over whichever name server the fallback resolver could
//! reach first.

use super::resolver::{DnsConn, DnsFallbackResolver, NameServerDialer, SocketDialer};
use crate::error::TransportError;
use crate::net::Network;
use hickory_resolver::proto::{
    op::{Message, MessageType, OpCode, Query, ResponseCode},
    rr::{Name, RData, RecordType},
    serialize::binary::{BinDecodable, BinEncodable},
};
use std::{
    collections::HashMap,
    future::Future,
    io,
    net::{Ipv4Addr, Ipv6Addr},
    pin::Pin,
    sync::{
        atomic::{AtomicU16, Ordering},
        Arc,
    },
    time::{SystemTime, UNIX_EPOCH},
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

/// Largest UDP reply we are prepared to read.
const MAX_UDP_REPLY: usize = 4096;

pub type LookupFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<Ipv4Addr>, TransportError>> + Send + 'a>>;

/// Resolves a host name to IPv4 addresses.
pub trait Lookup: Send + Sync {
    fn lookup_ipv4<'a>(&'a self, cancel: &'a CancellationToken, host: &'a str) -> LookupFuture<'a>;
}

/// Lookup backed by [`DnsFallbackResolver`].
pub struct HostLookup<D = SocketDialer> {
    resolver: DnsFallbackResolver<D>,
    hosts: Arc<HashMap<String, Ipv4Addr>>,
}

impl<D> HostLookup<D>
where
    D: NameServerDialer<Conn = DnsConn>,
{
    pub fn new(resolver: DnsFallbackResolver<D>, hosts: HashMap<String, Ipv4Addr>) -> Self {
        Self {
            resolver,
            hosts: Arc::new(hosts),
        }
    }

    pub fn resolver(&self) -> &DnsFallbackResolver<D> {
        &self.resolver
    }

    async fn lookup(&self, cancel: &CancellationToken, host: &str) -> Result<Vec<Ipv4Addr>, TransportError> {
        if let Ok(ip) = host.parse::<Ipv4Addr>() {
            return Ok(vec![ip]);
        }
        if host.parse::<Ipv6Addr>().is_ok() {
            return Err(TransportError::AddressParse {
                addr: host.to_string(),
                reason: "IPv6 addresses are not dialed",
            });
        }
        if let Some(ip) = self.hosts.get(&host.to_ascii_lowercase()) {
            return Ok(vec![*ip]);
        }

        let id = next_query_id();
        let request = encode_query(host, id)?;

        let mut reply = self.query(cancel, Network::Udp, host, id, &request).await?;
        if reply.truncated() {
            tracing::debug!(host, "Truncated DNS reply, retrying over TCP");
            reply = self.query(cancel, Network::Tcp, host, id, &request).await?;
        }

        let ips = ipv4_answers(host, &reply)?;
        tracing::debug!(host, ?ips, "Resolved host");
        Ok(ips)
    }

    /// Sends `request` to the configured servers in order until one answers.
    ///
    /// A server that accepts the connection but then refuses, stays silent
    /// past the timeout or sends garbage is skipped like an unreachable one.
    /// Any reply that decodes, including an error rcode, ends the walk.
    async fn query(
        &self,
        cancel: &CancellationToken,
        network: Network,
        host: &str,
        id: u16,
        request: &[u8],
    ) -> Result<Message, TransportError> {
        let mut start = 0;
        let mut last_err = None;

        loop {
            let (index, conn) = match self.resolver.connect_from(cancel, network, start).await {
                Ok(found) => found,
                Err(TransportError::AllResolutionAttemptsFailed { source }) => {
                    return Err(TransportError::AllResolutionAttemptsFailed {
                        source: source.or(last_err),
                    });
                }
                Err(e) => return Err(e),
            };

            let exchange = send_and_receive(conn, id, request);
            match tokio::time::timeout(self.resolver.timeout(), exchange).await {
                Ok(Ok(reply)) => return Ok(reply),
                Ok(Err(e)) => {
                    tracing::warn!(host, server_index = index, error = %e, "DNS query failed");
                    last_err = Some(e);
                }
                Err(_) => {
                    tracing::warn!(host, server_index = index, "DNS query timed out");
                    last_err = Some(io::Error::new(io::ErrorKind::TimedOut, "DNS query timed out"));
                }
            }
            start = index + 1;
        }
    }
}

impl<D> Lookup for HostLookup<D>
where
    D: NameServerDialer<Conn = DnsConn>,
{
    fn lookup_ipv4<'a>(&'a self, cancel: &'a CancellationToken, host: &'a str) -> LookupFuture<'a> {
        Box::pin(self.lookup(cancel, host))
    }
}

fn next_query_id() -> u16 {
    static COUNTER: AtomicU16 = AtomicU16::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    COUNTER.fetch_add(1, Ordering::Relaxed) ^ (nanos as u16)
}

fn encode_query(host: &str, id: u16) -> Result<Vec<u8>, TransportError> {
    let lookup_err = |reason: String| TransportError::Lookup {
        host: host.to_string(),
        reason,
    };

    let mut name = Name::from_ascii(host).map_err(|e| lookup_err(e.to_string()))?;
    name.set_fqdn(true);

    let mut message = Message::new();
    message
        .set_id(id)
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(true);
    message.add_query(Query::query(name, RecordType::A));

    message.to_bytes().map_err(|e| lookup_err(e.to_string()))
}

async fn send_and_receive(conn: DnsConn, id: u16, request: &[u8]) -> io::Result<Message> {
    match conn {
        DnsConn::Udp(socket) => {
            socket.send(request).await?;
            let mut buf = vec![0u8; MAX_UDP_REPLY];
            loop {
                let n = socket.recv(&mut buf).await?;
                let reply = decode(&buf[..n])?;
                // Stale or spoofed datagrams are skipped; the caller's timeout bounds the wait.
                if reply.id() == id {
                    return Ok(reply);
                }
            }
        }
        DnsConn::Tcp(mut stream) => {
            let len = u16::try_from(request.len())
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "DNS query too large"))?;
            let mut framed = Vec::with_capacity(request.len() + 2);
            framed.extend_from_slice(&len.to_be_bytes());
            framed.extend_from_slice(request);
            stream.write_all(&framed).await?;

            let mut len_buf = [0u8; 2];
            stream.read_exact(&mut len_buf).await?;
            let mut buf = vec![0u8; u16::from_be_bytes(len_buf) as usize];
            stream.read_exact(&mut buf).await?;

            let reply = decode(&buf)?;
            if reply.id() != id {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "DNS reply id mismatch"));
            }
            Ok(reply)
        }
    }
}

fn decode(buf: &[u8]) -> io::Result<Message> {
    Message::from_bytes(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

fn ipv4_answers(host: &str, reply: &Message) -> Result<Vec<Ipv4Addr>, TransportError> {
    let lookup_err = |reason: String| TransportError::Lookup {
        host: host.to_string(),
        reason,
    };

    if reply.message_type() != MessageType::Response {
        return Err(lookup_err("server sent a query instead of a response".to_string()));
    }
    if reply.response_code() != ResponseCode::NoError {
        return Err(lookup_err(format!("server answered {}", reply.response_code())));
    }

    let ips: Vec<Ipv4Addr> = reply
        .answers()
        .iter()
        .filter_map(|record| match record.data() {
            Some(RData::A(a)) => Some(a.0),
            _ => None,
        })
        .collect();

    if ips.is_empty() {
        Err(lookup_err("no A records in reply".to_string()))
    } else {
        Ok(ips)
    }
}
