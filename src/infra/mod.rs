//! Infrastructure layer providing the pieces the dialer is assembled from.
//!
//! This module contains traits and implementations for:
//! - DNS server fallback and IPv4 host lookup
//! - TLS trust store, client configuration and deferred handshakes
//! - I/O deadlines on established connections
//!
//! The traits exist so the dialer can be exercised with scripted name
//! servers and lookups instead of the network.

pub mod lookup;
pub mod resolver;
pub mod timeout;
pub mod tls;

pub use lookup::{HostLookup, Lookup, LookupFuture};
pub use resolver::{DnsConn, DnsFallbackResolver, NameServerDialer, SocketDialer};
pub use timeout::{wrap, TimeoutStream};
pub use tls::{client_config, default_trust_store, server_name, LazyTlsStream};
