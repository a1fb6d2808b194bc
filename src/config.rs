use std::collections::HashMap;
use std::env;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

/// Environment variable that turns on request/response diagnostics.
pub const HTTP_LOG_ENV: &str = "ISE_HTTP_LOG";

/// Environment variable holding the CLI's timeout in seconds.
pub const TIMEOUT_ENV: &str = "TRANSPORT_TIMEOUT_SECS";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Public resolvers tried in order when a host needs a DNS lookup.
pub const DEFAULT_DNS_SERVERS: [SocketAddrV4; 4] = [
    SocketAddrV4::new(Ipv4Addr::new(8, 8, 8, 8), 53),
    SocketAddrV4::new(Ipv4Addr::new(8, 8, 4, 4), 53),
    SocketAddrV4::new(Ipv4Addr::new(1, 1, 1, 1), 53),
    SocketAddrV4::new(Ipv4Addr::new(114, 114, 114, 114), 53),
];

/// Keep-alive time applied to every dialed TCP connection.
pub const TCP_KEEPALIVE: Duration = Duration::from_secs(30);

/// Idle pool bounds, independent of the per-request timeout.
pub const MAX_IDLE_CONNS: usize = 100;
pub const IDLE_CONN_TIMEOUT: Duration = Duration::from_secs(90);

pub struct Config {
    pub timeout: Duration,
    pub http_log: bool,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            timeout: env::var(TIMEOUT_ENV)
                .ok()
                .and_then(|t| t.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_TIMEOUT),
            http_log: http_log_enabled(),
        }
    }
}

/// Reads the logging toggle. Only the exact value `"1"` enables it.
pub fn http_log_enabled() -> bool {
    is_enabled(env::var(HTTP_LOG_ENV).ok().as_deref())
}

fn is_enabled(value: Option<&str>) -> bool {
    value == Some("1")
}

/// Static name table consulted before any DNS query.
pub fn default_hosts() -> HashMap<String, Ipv4Addr> {
    HashMap::from([("localhost".to_string(), Ipv4Addr::LOCALHOST)])
}
