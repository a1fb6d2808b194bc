pub mod config;
pub mod dialer;
pub mod error;
pub mod infra;
pub mod logging;
pub mod net;
pub mod round_trip;
pub mod transport;

pub use config::Config;
pub use dialer::{HandshakeMode, Ipv4Dialer};
pub use error::TransportError;
pub use logging::{with_logging, LogTransport};
pub use round_trip::RoundTrip;
pub use transport::{build_transport, Transport, TransportBuilder};
