#![allow(dead_code)]

use async_trait::async_trait;
use lead_compliance::{
    checkers::{CheckFailure, CheckResult, Checker},
    Identifier,
};
use serde_json::json;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Checker that blocks a fixed set of values, optionally after a delay
pub struct StubChecker {
    source: &'static str,
    blocked: HashSet<String>,
    delay: Option<Duration>,
    errored: bool,
}

impl StubChecker {
    pub fn clean(source: &'static str) -> Self {
        Self {
            source,
            blocked: HashSet::new(),
            delay: None,
            errored: false,
        }
    }

    pub fn blocking(source: &'static str, values: &[&str]) -> Self {
        Self {
            blocked: values.iter().map(|v| v.to_string()).collect(),
            ..Self::clean(source)
        }
    }

    pub fn failing(source: &'static str) -> Self {
        Self {
            errored: true,
            ..Self::clean(source)
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl Checker for StubChecker {
    fn source(&self) -> &'static str {
        self.source
    }

    async fn check(&self, identifier: &Identifier) -> CheckResult {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.errored {
            return CheckResult::errored(self.source, CheckFailure::Network, "connection refused");
        }
        if self.blocked.contains(identifier.value()) {
            CheckResult::non_compliant(self.source, vec![format!("{} is listed", identifier)], json!({}))
        } else {
            CheckResult::compliant(self.source, json!({}))
        }
    }
}

/// Clean checker that records the most calls it ever saw at once
pub struct CountingChecker {
    source: &'static str,
    delay: Duration,
    in_flight: AtomicUsize,
    peak: Arc<AtomicUsize>,
}

impl CountingChecker {
    pub fn new(source: &'static str, delay: Duration) -> Self {
        Self {
            source,
            delay,
            in_flight: AtomicUsize::new(0),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn peak(&self) -> Arc<AtomicUsize> {
        self.peak.clone()
    }
}

#[async_trait]
impl Checker for CountingChecker {
    fn source(&self) -> &'static str {
        self.source
    }

    async fn check(&self, _identifier: &Identifier) -> CheckResult {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        CheckResult::compliant(self.source, json!({}))
    }
}

/// One request captured by the local responder
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub request_line: String,
    pub headers: Vec<String>,
    pub body: String,
}

/// Minimal HTTP/1.1 responder answering every request with the same status
/// and JSON body; returns its address and the captured requests
pub async fn serve_json(status: u16, body: &str) -> (SocketAddr, Arc<Mutex<Vec<CapturedRequest>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let captured = Arc::new(Mutex::new(Vec::new()));
    let body = body.to_string();

    let log = captured.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else { return };
            let log = log.clone();
            let body = body.clone();
            tokio::spawn(async move {
                if let Some(request) = read_request(&mut socket).await {
                    log.lock().unwrap().push(request);
                }
                let response = format!(
                    "HTTP/1.1 {} Stub\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (addr, captured)
}

async fn read_request(socket: &mut tokio::net::TcpStream) -> Option<CapturedRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];

    let header_end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.split("\r\n").filter(|l| !l.is_empty());
    let request_line = lines.next()?.to_string();
    let headers: Vec<String> = lines.map(str::to_string).collect();

    let content_length = headers
        .iter()
        .filter_map(|h| h.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let end = buf.len().min(header_end + content_length);
    Some(CapturedRequest {
        request_line,
        headers,
        body: String::from_utf8_lossy(&buf[header_end..end]).to_string(),
    })
}
