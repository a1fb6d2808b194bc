use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("invalid address {addr:?}: {reason}")]
    AddressParse { addr: String, reason: &'static str },

    #[error("all DNS servers failed{}", last_cause(.source))]
    AllResolutionAttemptsFailed {
        #[source]
        source: Option<io::Error>,
    },

    #[error("dial {addr} failed: {source}")]
    Dial {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("TLS handshake with {server_name} failed: {source}")]
    Handshake {
        server_name: String,
        #[source]
        source: io::Error,
    },

    #[error("lookup {host} failed: {reason}")]
    Lookup { host: String, reason: String },

    #[error("invalid TLS server name: {0}")]
    InvalidServerName(String),

    #[error("TLS configuration error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("operation cancelled")]
    Cancelled,
}

fn last_cause(source: &Option<io::Error>) -> String {
    match source {
        Some(e) => format!(": {}", e),
        None => String::new(),
    }
}

impl TransportError {
    /// Kind used when this error has to travel through an `io::Error`.
    pub fn io_kind(&self) -> io::ErrorKind {
        match self {
            TransportError::AddressParse { .. } | TransportError::InvalidServerName(_) => {
                io::ErrorKind::InvalidInput
            }
            TransportError::Dial { source, .. } | TransportError::Handshake { source, .. } => {
                source.kind()
            }
            TransportError::AllResolutionAttemptsFailed { .. } | TransportError::Lookup { .. } => {
                io::ErrorKind::NotFound
            }
            TransportError::Cancelled => io::ErrorKind::Interrupted,
            TransportError::Tls(_) => io::ErrorKind::InvalidData,
        }
    }
}

impl From<TransportError> for io::Error {
    fn from(err: TransportError) -> Self {
        io::Error::new(err.io_kind(), err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_resolution_failure_without_cause() {
        let err = TransportError::AllResolutionAttemptsFailed { source: None };
        assert_eq!(err.to_string(), "all DNS servers failed");
        assert!(err.source().is_none());
    }

    #[test]
    fn test_resolution_failure_keeps_last_cause() {
        let err = TransportError::AllResolutionAttemptsFailed {
            source: Some(io::Error::new(io::ErrorKind::ConnectionRefused, "refused")),
        };
        assert_eq!(err.to_string(), "all DNS servers failed: refused");
        assert_eq!(err.source().unwrap().to_string(), "refused");
    }

    #[test]
    fn test_into_io_error_is_downcastable() {
        let io_err: io::Error = TransportError::Cancelled.into();
        assert_eq!(io_err.kind(), io::ErrorKind::Interrupted);
        let inner = io_err
            .get_ref()
            .and_then(|e| e.downcast_ref::<TransportError>());
        assert!(matches!(inner, Some(TransportError::Cancelled)));
    }
}
