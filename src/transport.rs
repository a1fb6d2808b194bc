//! Transport assembly.
//!
//! Puts the trust store, the IPv4 dialer and the timeout wrapper behind a
//! hyper-util connector and hands it to a pooled client.

use crate::config::{self, IDLE_CONN_TIMEOUT, MAX_IDLE_CONNS};
use crate::dialer::{HandshakeMode, Ipv4Dialer};
use crate::error::TransportError;
use crate::infra::lookup::HostLookup;
use crate::infra::resolver::DnsFallbackResolver;
use crate::infra::timeout::TimeoutStream;
use crate::infra::tls::{client_config, default_trust_store, LazyTlsStream, ALPN_H2, ALPN_HTTP11};
use crate::net::Network;
use crate::round_trip::{RoundTrip, RoundTripFuture};
use http_body_util::Full;
use hyper::{
    body::{Body, Bytes, Incoming},
    rt::ReadBufCursor,
    Request, Response, Uri,
};
use hyper_util::{
    client::legacy::{
        connect::{Connected, Connection},
        Client, ResponseFuture,
    },
    rt::{TokioExecutor, TokioIo, TokioTimer},
};
use rustls::RootCertStore;
use std::{
    collections::HashMap,
    error::Error as StdError,
    future::Future,
    io,
    net::{Ipv4Addr, SocketAddrV4},
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tower::Service;

/// Builds a transport with the default trust store and DNS servers.
///
/// The TLS handshake is deferred to the first write, so these connections
/// offer only `http/1.1` in ALPN and never negotiate HTTP/2. Use
/// [`TransportBuilder::handshake`] with [`HandshakeMode::Eager`] for h2.
pub fn build_transport(timeout: Duration) -> Result<Transport, TransportError> {
    TransportBuilder::new(timeout).build()
}

/// Configures a [`Transport`].
pub struct TransportBuilder {
    timeout: Duration,
    trust_store: Option<Arc<RootCertStore>>,
    dns_servers: Vec<SocketAddrV4>,
    hosts: HashMap<String, Ipv4Addr>,
    handshake: HandshakeMode,
    cancel: CancellationToken,
}

impl TransportBuilder {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            trust_store: None,
            dns_servers: config::DEFAULT_DNS_SERVERS.to_vec(),
            hosts: config::default_hosts(),
            handshake: HandshakeMode::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Replaces the process-wide trust store for this transport.
    pub fn trust_store(mut self, roots: Arc<RootCertStore>) -> Self {
        self.trust_store = Some(roots);
        self
    }

    /// Replaces the DNS server list. Order is priority.
    pub fn dns_servers(mut self, servers: impl IntoIterator<Item = SocketAddrV4>) -> Self {
        self.dns_servers = servers.into_iter().collect();
        self
    }

    /// Adds a static name that bypasses DNS.
    pub fn host(mut self, name: impl Into<String>, ip: Ipv4Addr) -> Self {
        self.hosts.insert(name.into().to_ascii_lowercase(), ip);
        self
    }

    pub fn handshake(mut self, mode: HandshakeMode) -> Self {
        self.handshake = mode;
        self
    }

    /// Ties every dial of the transport to `token`.
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn build<B>(self) -> Result<Transport<B>, TransportError>
    where
        B: Body + Send + 'static + Unpin,
        B::Data: Send,
        B::Error: Into<Box<dyn StdError + Send + Sync>>,
    {
        // h2 can only be offered when the handshake finishes before hyper
        // picks a protocol for the connection.
        let alpn: &[&[u8]] = match self.handshake {
            HandshakeMode::Eager => &[ALPN_H2, ALPN_HTTP11],
            HandshakeMode::Deferred => &[ALPN_HTTP11],
        };
        let roots = self.trust_store.unwrap_or_else(default_trust_store);
        let tls_config = client_config(roots, alpn)?;

        let resolver = DnsFallbackResolver::new(self.dns_servers, self.timeout);
        let lookup = HostLookup::new(resolver, self.hosts);
        let dialer = Ipv4Dialer::new(lookup, self.timeout, tls_config, self.handshake);

        let connector = Connector {
            dialer: Arc::new(dialer),
            cancel: self.cancel.clone(),
        };

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(IDLE_CONN_TIMEOUT)
            .pool_max_idle_per_host(MAX_IDLE_CONNS)
            .pool_timer(TokioTimer::new())
            .build(connector.clone());

        Ok(Transport {
            client,
            connector,
            cancel: self.cancel,
            timeout: self.timeout,
        })
    }
}

/// Reusable HTTP(S) transport. Clones share the connection pool.
pub struct Transport<B = Full<Bytes>> {
    client: Client<Connector, B>,
    connector: Connector,
    cancel: CancellationToken,
    timeout: Duration,
}

impl<B> Clone for Transport<B> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            connector: self.connector.clone(),
            cancel: self.cancel.clone(),
            timeout: self.timeout,
        }
    }
}

impl<B> Transport<B>
where
    B: Body + Send + 'static + Unpin,
    B::Data: Send,
    B::Error: Into<Box<dyn StdError + Send + Sync>>,
{
    pub fn request(&self, request: Request<B>) -> ResponseFuture {
        self.client.request(request)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Connector the pooled client dials through.
    pub fn connector(&self) -> &Connector {
        &self.connector
    }

    /// Aborts pending dials and refuses new ones.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl<B> RoundTrip<B> for Transport<B>
where
    B: Body + Send + 'static + Unpin,
    B::Data: Send,
    B::Error: Into<Box<dyn StdError + Send + Sync>>,
{
    type Body = Incoming;
    type Error = hyper_util::client::legacy::Error;

    fn round_trip(&self, request: Request<B>) -> RoundTripFuture<'_, Response<Incoming>, Self::Error> {
        Box::pin(self.request(request))
    }
}

/// Connector used by the pooled client: plain dials for `http`, TLS
/// dials for `https`.
#[derive(Clone)]
pub struct Connector {
    dialer: Arc<Ipv4Dialer>,
    cancel: CancellationToken,
}

impl Connector {
    async fn connect(&self, uri: Uri) -> Result<Conn, TransportError> {
        let bad_uri = |reason| TransportError::AddressParse {
            addr: uri.to_string(),
            reason,
        };

        let https = match uri.scheme_str() {
            Some("https") => true,
            Some("http") => false,
            _ => return Err(bad_uri("unsupported scheme")),
        };
        let host = uri.host().ok_or_else(|| bad_uri("missing host"))?;
        let port = uri.port_u16().unwrap_or(if https { 443 } else { 80 });
        let addr = format!("{}:{}", host, port);

        if https {
            let stream = self.dialer.dial_tls(&self.cancel, Network::Tcp, &addr).await?;
            let h2 = stream.get_ref().alpn_protocol() == Some(ALPN_H2);
            Ok(Conn::new(MaybeTls::Tls(stream), h2))
        } else {
            let stream = self.dialer.dial(&self.cancel, Network::Tcp, &addr).await?;
            Ok(Conn::new(MaybeTls::Plain(stream), false))
        }
    }
}

impl Service<Uri> for Connector {
    type Response = Conn;
    type Error = TransportError;
    type Future = Pin<Box<dyn Future<Output = Result<Conn, TransportError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, uri: Uri) -> Self::Future {
        let connector = self.clone();
        Box::pin(async move { connector.connect(uri).await })
    }
}

#[derive(Debug)]
enum MaybeTls {
    Plain(TcpStream),
    Tls(TimeoutStream<LazyTlsStream>),
}

impl AsyncRead for MaybeTls {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTls::Plain(s) => Pin::new(s).poll_read(cx, buf),
            MaybeTls::Tls(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeTls {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            MaybeTls::Plain(s) => Pin::new(s).poll_write(cx, buf),
            MaybeTls::Tls(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTls::Plain(s) => Pin::new(s).poll_flush(cx),
            MaybeTls::Tls(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTls::Plain(s) => Pin::new(s).poll_shutdown(cx),
            MaybeTls::Tls(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

/// Connection handed to the HTTP layer.
#[derive(Debug)]
pub struct Conn {
    io: TokioIo<MaybeTls>,
    h2: bool,
}

impl Conn {
    fn new(stream: MaybeTls, h2: bool) -> Self {
        Self {
            io: TokioIo::new(stream),
            h2,
        }
    }

    pub fn is_tls(&self) -> bool {
        matches!(self.io.inner(), MaybeTls::Tls(_))
    }
}

impl Connection for Conn {
    fn connected(&self) -> Connected {
        let connected = Connected::new();
        if self.h2 {
            connected.negotiated_h2()
        } else {
            connected
        }
    }
}

impl hyper::rt::Read for Conn {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: ReadBufCursor<'_>,
    ) -> Poll<io::Result<()>> {
        hyper::rt::Read::poll_read(Pin::new(&mut self.get_mut().io), cx, buf)
    }
}

impl hyper::rt::Write for Conn {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        hyper::rt::Write::poll_write(Pin::new(&mut self.get_mut().io), cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        hyper::rt::Write::poll_flush(Pin::new(&mut self.get_mut().io), cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        hyper::rt::Write::poll_shutdown(Pin::new(&mut self.get_mut().io), cx)
    }
}
