//! Diagnostic logging around round trips.
//!
//! When enabled, every exchange prints the request head, then either the
//! response head and elapsed seconds or the error text followed by a blank
//! line. Bodies are never read and results are forwarded untouched.

use crate::config::http_log_enabled;
use crate::round_trip::{RoundTrip, RoundTripFuture};
use hyper::{header::HOST, Request, Response};
use std::{
    fmt::{self, Write as _},
    sync::{Arc, Mutex},
    time::Instant,
};

/// Destination for diagnostic text.
pub trait DiagnosticSink: Send + Sync {
    /// Writes `text` followed by a newline.
    fn write_line(&self, text: &str);
}

/// Writes diagnostics to standard output.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl DiagnosticSink for StdoutSink {
    fn write_line(&self, text: &str) {
        println!("{}", text);
    }
}

/// Collects diagnostics in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    buf: Mutex<String>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        self.buf.lock().map(|b| b.clone()).unwrap_or_default()
    }
}

impl DiagnosticSink for MemorySink {
    fn write_line(&self, text: &str) {
        if let Ok(mut buf) = self.buf.lock() {
            buf.push_str(text);
            buf.push('\n');
        }
    }
}

/// Wraps `handler`, enabling diagnostics when `ISE_HTTP_LOG` is `"1"`.
///
/// The variable is read once, here; the returned wrapper keeps that
/// decision for its whole life.
pub fn with_logging<H>(handler: H) -> LogTransport<H> {
    LogTransport::new(handler, http_log_enabled())
}

/// Round-trip decorator that prints request/response heads.
pub struct LogTransport<H> {
    lower: H,
    enabled: bool,
    sink: Arc<dyn DiagnosticSink>,
}

impl<H> LogTransport<H> {
    pub fn new(lower: H, enabled: bool) -> Self {
        Self::with_sink(lower, enabled, Arc::new(StdoutSink))
    }

    pub fn with_sink(lower: H, enabled: bool, sink: Arc<dyn DiagnosticSink>) -> Self {
        Self {
            lower,
            enabled,
            sink,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn get_ref(&self) -> &H {
        &self.lower
    }

    pub fn into_inner(self) -> H {
        self.lower
    }
}

impl<B, H> RoundTrip<B> for LogTransport<H>
where
    H: RoundTrip<B>,
    H::Body: 'static,
    H::Error: fmt::Display + 'static,
{
    type Body = H::Body;
    type Error = H::Error;

    fn round_trip(&self, request: Request<B>) -> RoundTripFuture<'_, Response<H::Body>, H::Error> {
        if !self.enabled {
            return self.lower.round_trip(request);
        }

        let request_head = dump_request_head(&request);
        let sink = &self.sink;
        let started = Instant::now();
        let pending = self.lower.round_trip(request);

        Box::pin(async move {
            match pending.await {
                Err(e) => {
                    sink.write_line(&request_head);
                    sink.write_line(&format!("Failed {}", e));
                    sink.write_line("");
                    Err(e)
                }
                Ok(response) => {
                    sink.write_line(&request_head);
                    sink.write_line(&dump_response_head(&response));
                    sink.write_line(&format!(
                        "Success in {} seconds",
                        started.elapsed().as_secs()
                    ));
                    Ok(response)
                }
            }
        })
    }
}

/// Renders the request line and headers the way they go on the wire.
///
/// A `Host` header is derived from the URI when the request has none.
pub fn dump_request_head<B>(request: &Request<B>) -> String {
    let uri = request.uri();
    let target = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");

    let mut head = String::new();
    let _ = write!(head, "{} {} {:?}\r\n", request.method(), target, request.version());
    if !request.headers().contains_key(HOST) {
        if let Some(authority) = uri.authority() {
            let _ = write!(head, "Host: {}\r\n", authority);
        }
    }
    write_headers(&mut head, request.headers());
    head
}

/// Renders the status line and headers of `response`.
pub fn dump_response_head<B>(response: &Response<B>) -> String {
    let mut head = String::new();
    let _ = write!(head, "{:?} {}\r\n", response.version(), response.status());
    write_headers(&mut head, response.headers());
    head
}

fn write_headers(out: &mut String, headers: &hyper::HeaderMap) {
    for (name, value) in headers {
        let _ = write!(out, "{}: {}\r\n", name, String::from_utf8_lossy(value.as_bytes()));
    }
    out.push_str("\r\n");
}
