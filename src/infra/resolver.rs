//! DNS server fallback.
//!
//! Establishes connectivity to the first reachable name server from a
//! fixed, ordered list. Decoding of DNS traffic is left to the lookup
//! layer that owns the returned connection.

use crate::error::TransportError;
use crate::net::Network;
use std::{
    future::Future,
    io,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    pin::Pin,
    sync::Arc,
    time::Duration,
};
use tokio::net::{TcpStream, UdpSocket};
use tokio_util::sync::CancellationToken;

/// Boxed future returned by [`NameServerDialer::dial`].
pub type DialFuture<'a, C> = Pin<Box<dyn Future<Output = io::Result<C>> + Send + 'a>>;

/// Opens a socket to a single name server.
///
/// Kept behind a trait so the fallback order can be exercised without
/// touching the network.
pub trait NameServerDialer: Send + Sync {
    type Conn: Send;

    fn dial(&self, network: Network, server: SocketAddrV4) -> DialFuture<'_, Self::Conn>;
}

/// Connection to a name server.
#[derive(Debug)]
pub enum DnsConn {
    Udp(UdpSocket),
    Tcp(TcpStream),
}

impl DnsConn {
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        match self {
            DnsConn::Udp(s) => s.peer_addr(),
            DnsConn::Tcp(s) => s.peer_addr(),
        }
    }
}

/// Dials name servers over real sockets.
#[derive(Debug, Default, Clone, Copy)]
pub struct SocketDialer;

impl NameServerDialer for SocketDialer {
    type Conn = DnsConn;

    fn dial(&self, network: Network, server: SocketAddrV4) -> DialFuture<'_, DnsConn> {
        Box::pin(async move {
            if network.is_stream() {
                Ok(DnsConn::Tcp(TcpStream::connect(server).await?))
            } else {
                let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
                socket.connect(server).await?;
                Ok(DnsConn::Udp(socket))
            }
        })
    }
}

/// Tries each configured DNS server strictly in order and returns the
/// first connection that could be established.
pub struct DnsFallbackResolver<D = SocketDialer> {
    servers: Arc<[SocketAddrV4]>,
    timeout: Duration,
    dialer: D,
}

impl DnsFallbackResolver<SocketDialer> {
    pub fn new(servers: impl Into<Arc<[SocketAddrV4]>>, timeout: Duration) -> Self {
        Self::with_dialer(servers, timeout, SocketDialer)
    }
}

impl<D: NameServerDialer> DnsFallbackResolver<D> {
    pub fn with_dialer(servers: impl Into<Arc<[SocketAddrV4]>>, timeout: Duration, dialer: D) -> Self {
        Self {
            servers: servers.into(),
            timeout,
            dialer,
        }
    }

    pub fn servers(&self) -> &[SocketAddrV4] {
        &self.servers
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Connects to the first reachable server.
    ///
    /// Cancellation is only checked between candidates; a dial already in
    /// flight runs until it succeeds, fails, or hits the timeout.
    pub async fn connect(
        &self,
        cancel: &CancellationToken,
        network: Network,
    ) -> Result<D::Conn, TransportError> {
        self.connect_from(cancel, network, 0).await.map(|(_, conn)| conn)
    }

    /// Like [`connect`](Self::connect), but skips the first `start` servers.
    ///
    /// Returns the index of the server that answered so callers can resume
    /// after it when the connection later turns out to be useless.
    pub async fn connect_from(
        &self,
        cancel: &CancellationToken,
        network: Network,
        start: usize,
    ) -> Result<(usize, D::Conn), TransportError> {
        let network = network.force_ipv4();
        let mut last_err = None;

        for (index, &server) in self.servers.iter().enumerate().skip(start) {
            if cancel.is_cancelled() {
                return Err(TransportError::Cancelled);
            }

            tracing::debug!(%server, %network, "Dialing DNS server");
            let attempt = tokio::time::timeout(self.timeout, self.dialer.dial(network, server));
            match attempt.await {
                Ok(Ok(conn)) => return Ok((index, conn)),
                Ok(Err(e)) => {
                    tracing::warn!(%server, error = %e, "DNS server unreachable");
                    last_err = Some(e);
                }
                Err(_) => {
                    tracing::warn!(%server, "DNS server dial timed out");
                    last_err = Some(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("dial {} timed out", server),
                    ));
                }
            }
        }

        Err(TransportError::AllResolutionAttemptsFailed { source: last_err })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;
    use std::sync::Mutex;

    /// Scripted dialer: servers listed in `reachable` succeed, everything
    /// else fails with an error naming the server.
    #[derive(Default)]
    struct ScriptedDialer {
        reachable: Vec<SocketAddrV4>,
        hang: Vec<SocketAddrV4>,
        attempts: Mutex<Vec<(Network, SocketAddrV4)>>,
    }

    impl ScriptedDialer {
        fn attempted(&self) -> Vec<SocketAddrV4> {
            self.attempts.lock().unwrap().iter().map(|(_, s)| *s).collect()
        }
    }

    impl NameServerDialer for ScriptedDialer {
        type Conn = SocketAddrV4;

        fn dial(&self, network: Network, server: SocketAddrV4) -> DialFuture<'_, SocketAddrV4> {
            self.attempts.lock().unwrap().push((network, server));
            let hang = self.hang.contains(&server);
            let ok = self.reachable.contains(&server);
            Box::pin(async move {
                if hang {
                    std::future::pending::<()>().await;
                }
                if ok {
                    Ok(server)
                } else {
                    Err(io::Error::new(
                        io::ErrorKind::ConnectionRefused,
                        format!("refused by {}", server),
                    ))
                }
            })
        }
    }

    fn server(last: u8) -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::new(192, 0, 2, last), 53)
    }

    #[tokio::test]
    async fn test_first_success_wins_in_order() {
        let (a, b, c, d) = (server(1), server(2), server(3), server(4));
        let dialer = ScriptedDialer {
            reachable: vec![c, d],
            ..Default::default()
        };
        let resolver = DnsFallbackResolver::with_dialer(vec![a, b, c, d], Duration::from_secs(5), dialer);

        let conn = resolver
            .connect(&CancellationToken::new(), Network::Udp)
            .await
            .unwrap();

        assert_eq!(conn, c);
        assert_eq!(resolver.dialer.attempted(), vec![a, b, c]);
    }

    #[tokio::test]
    async fn test_all_failed_wraps_last_error() {
        let servers = vec![server(1), server(2), server(3)];
        let resolver = DnsFallbackResolver::with_dialer(
            servers.clone(),
            Duration::from_secs(5),
            ScriptedDialer::default(),
        );

        let err = resolver
            .connect(&CancellationToken::new(), Network::Tcp)
            .await
            .unwrap_err();

        assert!(matches!(err, TransportError::AllResolutionAttemptsFailed { .. }));
        assert_eq!(err.source().unwrap().to_string(), "refused by 192.0.2.3:53");
        assert_eq!(resolver.dialer.attempted(), servers);
    }

    #[tokio::test]
    async fn test_empty_list_fails_without_cause() {
        let resolver = DnsFallbackResolver::with_dialer(
            Vec::<SocketAddrV4>::new(),
            Duration::from_secs(5),
            ScriptedDialer::default(),
        );

        let err = resolver
            .connect(&CancellationToken::new(), Network::Udp)
            .await
            .unwrap_err();

        match err {
            TransportError::AllResolutionAttemptsFailed { source } => assert!(source.is_none()),
            other => panic!("unexpected error: {other}"),
        }
        assert!(resolver.dialer.attempted().is_empty());
    }

    #[tokio::test]
    async fn test_connect_from_resumes_after_index() {
        let (a, b, c) = (server(1), server(2), server(3));
        let dialer = ScriptedDialer {
            reachable: vec![a, c],
            ..Default::default()
        };
        let resolver = DnsFallbackResolver::with_dialer(vec![a, b, c], Duration::from_secs(5), dialer);
        let cancel = CancellationToken::new();

        let (first, conn) = resolver.connect_from(&cancel, Network::Udp, 0).await.unwrap();
        assert_eq!((first, conn), (0, a));

        let (next, conn) = resolver.connect_from(&cancel, Network::Udp, first + 1).await.unwrap();
        assert_eq!((next, conn), (2, c));
        assert_eq!(resolver.dialer.attempted(), vec![a, b, c]);

        let err = resolver.connect_from(&cancel, Network::Udp, 3).await.unwrap_err();
        assert!(matches!(err, TransportError::AllResolutionAttemptsFailed { source: None }));
    }

    #[tokio::test]
    async fn test_networks_are_forced_to_ipv4() {
        let resolver = DnsFallbackResolver::with_dialer(
            vec![server(1)],
            Duration::from_secs(5),
            ScriptedDialer::default(),
        );
        let cancel = CancellationToken::new();

        for network in [Network::Tcp, Network::Udp, Network::Tcp6, Network::Udp6] {
            let _ = resolver.connect(&cancel, network).await;
        }

        let seen: Vec<Network> = resolver
            .dialer
            .attempts
            .lock()
            .unwrap()
            .iter()
            .map(|(n, _)| *n)
            .collect();
        assert_eq!(seen, vec![Network::Tcp4, Network::Udp4, Network::Tcp4, Network::Udp4]);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_candidate() {
        let resolver = DnsFallbackResolver::with_dialer(
            vec![server(1), server(2)],
            Duration::from_secs(5),
            ScriptedDialer::default(),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = resolver.connect(&cancel, Network::Udp).await.unwrap_err();

        assert!(matches!(err, TransportError::Cancelled));
        assert!(resolver.dialer.attempted().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_server_falls_through_after_timeout() {
        let (slow, good) = (server(1), server(2));
        let dialer = ScriptedDialer {
            reachable: vec![good],
            hang: vec![slow],
            ..Default::default()
        };
        let timeout = Duration::from_secs(5);
        let resolver = DnsFallbackResolver::with_dialer(vec![slow, good], timeout, dialer);

        let started = tokio::time::Instant::now();
        let conn = resolver
            .connect(&CancellationToken::new(), Network::Udp)
            .await
            .unwrap();

        assert_eq!(conn, good);
        let elapsed = started.elapsed();
        assert!(elapsed >= timeout && elapsed < timeout * 2, "{:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_does_not_interrupt_running_candidate() {
        let (slow, good) = (server(1), server(2));
        let dialer = ScriptedDialer {
            reachable: vec![good],
            hang: vec![slow],
            ..Default::default()
        };
        let resolver = DnsFallbackResolver::with_dialer(vec![slow, good], Duration::from_secs(5), dialer);
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let started = tokio::time::Instant::now();
        let err = resolver.connect(&cancel, Network::Udp).await.unwrap_err();

        assert!(matches!(err, TransportError::Cancelled));
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert_eq!(resolver.dialer.attempted(), vec![slow]);
    }
}
