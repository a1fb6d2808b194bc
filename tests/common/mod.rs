//! Loopback servers shared by the integration tests.
#![allow(dead_code)]

use hickory_resolver::proto::{
    op::{Message, MessageType, OpCode},
    rr::{rdata::A, RData, Record},
    serialize::binary::{BinDecodable, BinEncodable},
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, UdpSocket};
use tokio_rustls::TlsAcceptor;

/// Answers every A query with `answer` on a loopback UDP port.
pub async fn spawn_fake_dns(answer: Ipv4Addr) -> SocketAddrV4 {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = match socket.local_addr().unwrap() {
        SocketAddr::V4(addr) => addr,
        other => panic!("unexpected address {other}"),
    };

    tokio::spawn(async move {
        let mut buf = vec![0u8; 512];
        loop {
            let Ok((n, peer)) = socket.recv_from(&mut buf).await else {
                break;
            };
            let Ok(query) = Message::from_bytes(&buf[..n]) else {
                continue;
            };
            let mut reply = Message::new();
            reply
                .set_id(query.id())
                .set_message_type(MessageType::Response)
                .set_op_code(OpCode::Query)
                .set_recursion_available(true);
            for q in query.queries() {
                reply.add_query(q.clone());
                reply.add_answer(Record::from_rdata(q.name().clone(), 60, RData::A(A(answer))));
            }
            let bytes = reply.to_bytes().unwrap();
            let _ = socket.send_to(&bytes, peer).await;
        }
    });

    addr
}

/// Loopback UDP address with nothing listening on it.
pub async fn closed_udp_port() -> SocketAddrV4 {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    match socket.local_addr().unwrap() {
        SocketAddr::V4(addr) => addr,
        other => panic!("unexpected address {other}"),
    }
}

/// Reads one request head and answers with a fixed body, then closes.
async fn answer_once<S>(mut socket: S, body: &'static str)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => head.extend_from_slice(&buf[..n]),
        }
    }
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;
}

/// Plain HTTP backend on loopback. Returns its port.
pub async fn start_http_backend(body: &'static str) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(answer_once(socket, body));
        }
    });

    port
}

/// Self-signed certificate for `localhost`.
pub struct TestCert {
    pub cert: CertificateDer<'static>,
    pub key: PrivateKeyDer<'static>,
}

impl TestCert {
    pub fn localhost() -> Self {
        let rcgen::CertifiedKey { cert, key_pair } =
            rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        Self {
            cert: cert.der().clone(),
            key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der())),
        }
    }

    pub fn trust_store(&self) -> Arc<rustls::RootCertStore> {
        let mut roots = rustls::RootCertStore::empty();
        roots.add(self.cert.clone()).unwrap();
        Arc::new(roots)
    }
}

/// HTTPS backend on loopback presenting `cert`. Returns its port.
pub async fn start_https_backend(cert: &TestCert, body: &'static str) -> u16 {
    start_https_backend_with_alpn(cert, &[], body).await
}

/// Like [`start_https_backend`], but the server selects from `alpn`.
pub async fn start_https_backend_with_alpn(cert: &TestCert, alpn: &[&[u8]], body: &'static str) -> u16 {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(vec![cert.cert.clone()], cert.key.clone_key())
        .unwrap();
    config.alpn_protocols = alpn.iter().map(|p| p.to_vec()).collect();
    let acceptor = TlsAcceptor::from(Arc::new(config));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                if let Ok(tls) = acceptor.accept(socket).await {
                    answer_once(tls, body).await;
                }
            });
        }
    });

    port
}
