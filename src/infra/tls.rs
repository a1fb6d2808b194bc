//! TLS infrastructure.
//!
//! Holds the process-wide trust store, builds client configurations that
//! verify against it, and provides a client stream whose handshake runs on
//! first use.

use crate::error::TransportError;
use rustls::pki_types::ServerName;
use rustls::RootCertStore;
use std::{
    fmt,
    future::{poll_fn, Future},
    io,
    pin::Pin,
    sync::{Arc, OnceLock},
    task::{ready, Context, Poll},
};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::{client::TlsStream, Connect, TlsConnector};

pub const ALPN_H2: &[u8] = b"h2";
pub const ALPN_HTTP11: &[u8] = b"http/1.1";

static TRUST_STORE: OnceLock<Arc<RootCertStore>> = OnceLock::new();

/// Returns the process-wide trust store, loading Mozilla's roots on first use.
pub fn default_trust_store() -> Arc<RootCertStore> {
    TRUST_STORE
        .get_or_init(|| {
            Arc::new(RootCertStore::from_iter(
                webpki_roots::TLS_SERVER_ROOTS.iter().cloned(),
            ))
        })
        .clone()
}

/// Creates a client configuration that only trusts `roots`.
///
/// `alpn` lists the protocols offered during the handshake, most
/// preferred first.
pub fn client_config(
    roots: Arc<RootCertStore>,
    alpn: &[&[u8]],
) -> Result<Arc<rustls::ClientConfig>, TransportError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.alpn_protocols = alpn.iter().map(|p| p.to_vec()).collect();

    Ok(Arc::new(config))
}

/// Parses `host` into the name the server certificate is verified against.
pub fn server_name(host: &str) -> Result<ServerName<'static>, TransportError> {
    ServerName::try_from(host.to_string())
        .map_err(|e| TransportError::InvalidServerName(format!("{}: {}", host, e)))
}

enum State {
    Handshaking(Pin<Box<Connect<TcpStream>>>),
    Streaming(Box<TlsStream<TcpStream>>),
    /// Kind and text of the handshake error, replayed on later I/O.
    Failed(io::ErrorKind, String),
}

/// TLS client stream that performs its handshake on the first read or write.
///
/// Handshake failures therefore surface from I/O, as an `io::Error`
/// wrapping [`TransportError::Handshake`].
pub struct LazyTlsStream {
    server_name: String,
    state: State,
}

impl fmt::Debug for LazyTlsStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            State::Handshaking(_) => "handshaking",
            State::Streaming(_) => "streaming",
            State::Failed(..) => "failed",
        };
        f.debug_struct("LazyTlsStream")
            .field("server_name", &self.server_name)
            .field("state", &state)
            .finish()
    }
}

impl LazyTlsStream {
    /// Starts a client session over `tcp`. No bytes are exchanged until
    /// the stream is polled.
    pub fn new(connector: &TlsConnector, server_name: ServerName<'static>, tcp: TcpStream) -> Self {
        let name = server_name.to_str().into_owned();
        Self {
            server_name: name,
            state: State::Handshaking(Box::pin(connector.connect(server_name, tcp))),
        }
    }

    /// Name the server certificate is verified against.
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn is_handshake_complete(&self) -> bool {
        matches!(self.state, State::Streaming(_))
    }

    /// ALPN protocol chosen by the server, once the handshake has run.
    pub fn alpn_protocol(&self) -> Option<&[u8]> {
        match &self.state {
            State::Streaming(tls) => tls.get_ref().1.alpn_protocol(),
            _ => None,
        }
    }

    /// Drives the handshake to completion without sending application data.
    pub fn handshake(&mut self) -> impl Future<Output = io::Result<()>> + '_ {
        poll_fn(move |cx| self.poll_handshake(cx))
    }

    fn poll_handshake(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let result = match &mut self.state {
            State::Streaming(_) => return Poll::Ready(Ok(())),
            State::Failed(kind, msg) => {
                let err = TransportError::Handshake {
                    server_name: self.server_name.clone(),
                    source: io::Error::new(*kind, msg.clone()),
                };
                return Poll::Ready(Err(err.into()));
            }
            State::Handshaking(connect) => ready!(connect.as_mut().poll(cx)),
        };

        match result {
            Ok(tls) => {
                tracing::debug!(server_name = %self.server_name, "TLS handshake complete");
                self.state = State::Streaming(Box::new(tls));
                Poll::Ready(Ok(()))
            }
            Err(source) => {
                tracing::warn!(server_name = %self.server_name, error = %source, "TLS handshake failed");
                self.state = State::Failed(source.kind(), source.to_string());
                let err = TransportError::Handshake {
                    server_name: self.server_name.clone(),
                    source,
                };
                Poll::Ready(Err(err.into()))
            }
        }
    }

    fn streaming(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<Pin<&mut TlsStream<TcpStream>>>> {
        ready!(self.poll_handshake(cx))?;
        match &mut self.state {
            State::Streaming(tls) => Poll::Ready(Ok(Pin::new(tls.as_mut()))),
            _ => Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, "TLS stream not established"))),
        }
    }
}

impl AsyncRead for LazyTlsStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.streaming(cx))?.poll_read(cx, buf)
    }
}

impl AsyncWrite for LazyTlsStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        ready!(this.streaming(cx))?.poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.streaming(cx))?.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match &mut this.state {
            State::Streaming(tls) => Pin::new(tls.as_mut()).poll_shutdown(cx),
            // Nothing was negotiated, so there is no session to close.
            _ => Poll::Ready(Ok(())),
        }
    }
}
