use http_body_util::{BodyExt, Full};
use hyper::{body::Bytes, Request};
use resilient_transport::{build_transport, Config, LogTransport, RoundTrip};
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is unset.
const DEFAULT_LOG_FILTER: &str = "resilient_transport=debug,resilient_fetch=info";

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let Some(target) = std::env::args().nth(1) else {
        eprintln!("usage: resilient-fetch <url>");
        return ExitCode::from(2);
    };

    let url = match url::Url::parse(&target) {
        Ok(u) if matches!(u.scheme(), "http" | "https") => u,
        Ok(u) => {
            tracing::error!(scheme = u.scheme(), "Unsupported scheme");
            return ExitCode::from(2);
        }
        Err(e) => {
            tracing::error!("Invalid URL: {}", e);
            return ExitCode::from(2);
        }
    };

    let config = Config::from_env();
    tracing::info!(timeout = ?config.timeout, http_log = config.http_log, "Fetching {}", url);

    let transport = match build_transport(config.timeout) {
        Ok(t) => t,
        Err(e) => {
            tracing::error!("Failed to build transport: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let client = LogTransport::new(transport, config.http_log);

    let request = match Request::get(url.as_str()).body(Full::new(Bytes::new())) {
        Ok(r) => r,
        Err(e) => {
            tracing::error!("Failed to build request: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let response = match client.round_trip(request).await {
        Ok(r) => r,
        Err(e) => {
            tracing::error!("Request failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let status = response.status();
    let version = response.version();
    match response.into_body().collect().await {
        Ok(body) => {
            tracing::info!(%status, ?version, bytes = body.to_bytes().len(), "Request succeeded");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(%status, "Failed to read body: {}", e);
            ExitCode::FAILURE
        }
    }
}
