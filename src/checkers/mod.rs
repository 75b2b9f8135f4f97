pub mod http;
pub mod internal_dnc;
pub mod external_blacklist;
pub mod litigation_scrub;
pub mod tcpa;
pub mod registry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use crate::identifier::Identifier;

pub use external_blacklist::ExternalBlacklistChecker;
pub use internal_dnc::InternalDncChecker;
pub use litigation_scrub::LitigationScrubChecker;
pub use registry::{Capabilities, CheckerRegistry, RegisteredChecker};
pub use tcpa::{CallingWindow, TcpaChecker};

/// Why a checker could not reach a verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckFailure {
    Timeout,
    Network,
    UpstreamStatus(u16),
    MalformedResponse,
    RateLimited,
    Unavailable,
}

impl fmt::Display for CheckFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckFailure::Timeout => write!(f, "timeout"),
            CheckFailure::Network => write!(f, "network"),
            CheckFailure::UpstreamStatus(code) => write!(f, "upstream_status_{}", code),
            CheckFailure::MalformedResponse => write!(f, "malformed_response"),
            CheckFailure::RateLimited => write!(f, "rate_limited"),
            CheckFailure::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// One checker's opinion about one identifier.
///
/// `errored_reason` is present iff `errored`. A business negative is a
/// normal, non-errored result with `is_compliant == false`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub source: String,
    pub is_compliant: bool,
    pub reasons: Vec<String>,
    pub details: serde_json::Value,
    pub latency_ms: u64,
    pub errored: bool,
    pub errored_reason: Option<CheckFailure>,
    pub error_detail: Option<String>,
}

impl CheckResult {
    pub fn compliant(source: &str, details: serde_json::Value) -> Self {
        Self {
            source: source.to_string(),
            is_compliant: true,
            reasons: Vec::new(),
            details,
            latency_ms: 0,
            errored: false,
            errored_reason: None,
            error_detail: None,
        }
    }

    pub fn non_compliant(source: &str, reasons: Vec<String>, details: serde_json::Value) -> Self {
        Self {
            source: source.to_string(),
            is_compliant: false,
            reasons,
            details,
            latency_ms: 0,
            errored: false,
            errored_reason: None,
            error_detail: None,
        }
    }

    /// No verdict was reached; `is_compliant` carries no meaning here
    pub fn errored(source: &str, failure: CheckFailure, detail: impl Into<String>) -> Self {
        Self {
            source: source.to_string(),
            is_compliant: false,
            reasons: Vec::new(),
            details: serde_json::Value::Null,
            latency_ms: 0,
            errored: true,
            errored_reason: Some(failure),
            error_detail: Some(detail.into()),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency_ms = latency.as_millis() as u64;
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    /// True for a reached, negative verdict
    pub fn blocks(&self) -> bool {
        !self.errored && !self.is_compliant
    }
}

/// A single compliance data source.
///
/// Implementations never fail for business negatives and never share
/// mutable state with other checkers. Persisting raw responses is left to
/// the caller; they travel in `CheckResult::details`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Checker: Send + Sync {
    /// Registry-unique source name
    fn source(&self) -> &'static str;

    async fn check(&self, identifier: &Identifier) -> CheckResult;

    /// Check several identifiers at once; one result per input, same order
    async fn check_bulk(&self, identifiers: &[Identifier]) -> Vec<CheckResult> {
        let mut results = Vec::with_capacity(identifiers.len());
        for identifier in identifiers {
            results.push(self.check(identifier).await);
        }
        results
    }
}
