//! IPv4-only dialing for plain and TLS connections.

use crate::config::TCP_KEEPALIVE;
use crate::error::TransportError;
use crate::infra::lookup::{HostLookup, Lookup};
use crate::infra::timeout::{wrap, TimeoutStream};
use crate::infra::tls::{server_name, LazyTlsStream};
use crate::net::{split_host_port, Network};
use socket2::{SockRef, TcpKeepalive};
use std::{
    io,
    net::SocketAddrV4,
    sync::Arc,
    time::Duration,
};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;

/// When the TLS handshake of a dialed connection runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandshakeMode {
    /// On the first read or write. Failures surface from I/O.
    #[default]
    Deferred,
    /// Inside `dial_tls`, bounded by the dial timeout.
    Eager,
}

/// Dialer that only ever connects over IPv4.
pub struct Ipv4Dialer<L = HostLookup> {
    lookup: L,
    timeout: Duration,
    tls: TlsConnector,
    handshake: HandshakeMode,
}

impl<L: Lookup> Ipv4Dialer<L> {
    pub fn new(
        lookup: L,
        timeout: Duration,
        tls_config: Arc<rustls::ClientConfig>,
        handshake: HandshakeMode,
    ) -> Self {
        Self {
            lookup,
            timeout,
            tls: TlsConnector::from(tls_config),
            handshake,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn handshake_mode(&self) -> HandshakeMode {
        self.handshake
    }

    /// Opens a raw TCP connection to `addr` (`host:port`).
    ///
    /// The host is resolved to IPv4 addresses which are tried in order,
    /// each bounded by the dial timeout. The last connect error is returned
    /// when none of them answers.
    pub async fn dial(
        &self,
        cancel: &CancellationToken,
        network: Network,
        addr: &str,
    ) -> Result<TcpStream, TransportError> {
        let network = network.force_ipv4();
        if !network.is_stream() {
            return Err(TransportError::AddressParse {
                addr: addr.to_string(),
                reason: "only stream networks can be dialed",
            });
        }
        let (host, port) = split_host_port(addr)?;

        let ips = self.lookup.lookup_ipv4(cancel, host).await?;

        let mut last_err = None;
        for ip in ips {
            if cancel.is_cancelled() {
                return Err(TransportError::Cancelled);
            }

            let target = SocketAddrV4::new(ip, port);
            tracing::debug!(%target, %network, "Dialing");
            let attempt = tokio::time::timeout(self.timeout, TcpStream::connect(target));
            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                result = attempt => result,
            };

            match result {
                Ok(Ok(stream)) => {
                    set_keepalive(&stream);
                    return Ok(stream);
                }
                Ok(Err(e)) => {
                    tracing::debug!(%target, error = %e, "Connect failed");
                    last_err = Some(e);
                }
                Err(_) => {
                    last_err = Some(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("connect {} timed out", target),
                    ));
                }
            }
        }

        Err(TransportError::Dial {
            addr: addr.to_string(),
            source: last_err
                .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no addresses to dial")),
        })
    }

    /// Opens a TLS connection to `addr`, verified against the trust store
    /// with the host part of `addr` as the server name.
    ///
    /// A malformed `addr` fails before any network activity. With
    /// [`HandshakeMode::Deferred`] the handshake runs on first I/O.
    pub async fn dial_tls(
        &self,
        cancel: &CancellationToken,
        network: Network,
        addr: &str,
    ) -> Result<TimeoutStream<LazyTlsStream>, TransportError> {
        let (host, _) = split_host_port(addr)?;
        let name = server_name(host)?;

        let tcp = self.dial(cancel, network, addr).await?;
        let mut tls = LazyTlsStream::new(&self.tls, name, tcp);

        if self.handshake == HandshakeMode::Eager {
            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                result = tokio::time::timeout(self.timeout, tls.handshake()) => result,
            };
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(handshake_error(host, e)),
                Err(_) => {
                    return Err(TransportError::Handshake {
                        server_name: host.to_string(),
                        source: io::Error::new(io::ErrorKind::TimedOut, "handshake timed out"),
                    })
                }
            }
        }

        Ok(wrap(tls, self.timeout))
    }
}

fn set_keepalive(stream: &TcpStream) {
    let keepalive = TcpKeepalive::new().with_time(TCP_KEEPALIVE);
    if let Err(e) = SockRef::from(stream).set_tcp_keepalive(&keepalive) {
        tracing::warn!(error = %e, "Failed to enable TCP keep-alive");
    }
}

/// Recovers the [`TransportError`] carried by an I/O error from the TLS stream.
fn handshake_error(host: &str, err: io::Error) -> TransportError {
    let kind = err.kind();
    match err.into_inner() {
        Some(inner) => match inner.downcast::<TransportError>() {
            Ok(transport) => *transport,
            Err(other) => TransportError::Handshake {
                server_name: host.to_string(),
                source: io::Error::new(kind, other),
            },
        },
        None => TransportError::Handshake {
            server_name: host.to_string(),
            source: io::Error::from(kind),
        },
    }
}
