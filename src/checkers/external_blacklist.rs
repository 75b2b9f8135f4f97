use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Instant;
use tracing::{debug, warn};
use crate::{
    checkers::{http::HttpTransport, CheckFailure, CheckResult, Checker},
    identifier::{Identifier, IdentifierKind},
};

pub const SOURCE: &str = "external-blacklist";

/// Remote blacklist scrub (ping endpoint that reports a rejection reason).
///
/// Only one rejection code means "blocked". The upstream adds and renames
/// other codes freely, so any other value, or no value, is compliant.
pub struct ExternalBlacklistChecker {
    transport: HttpTransport,
    url: String,
    blocked_code: String,
}

impl ExternalBlacklistChecker {
    pub fn new(transport: HttpTransport, url: &str, blocked_code: &str) -> Self {
        Self {
            transport,
            url: url.to_string(),
            blocked_code: blocked_code.to_string(),
        }
    }

    /// Map an upstream response body to a verdict
    pub fn interpret(&self, body: &Value) -> CheckResult {
        let rejection = body.get("rejection_reason").and_then(Value::as_str);
        let blocked = rejection == Some(self.blocked_code.as_str());

        let details = json!({
            "rejection_reason": rejection,
            "blocked": blocked,
            "raw": body,
        });

        if blocked {
            CheckResult::non_compliant(
                SOURCE,
                vec![format!(
                    "Number found on external blacklist (rejection_reason: {})",
                    self.blocked_code
                )],
                details,
            )
        } else {
            CheckResult::compliant(SOURCE, details)
        }
    }
}

#[async_trait]
impl Checker for ExternalBlacklistChecker {
    fn source(&self) -> &'static str {
        SOURCE
    }

    async fn check(&self, identifier: &Identifier) -> CheckResult {
        let started = Instant::now();

        if identifier.kind() != IdentifierKind::Phone {
            return CheckResult::errored(SOURCE, CheckFailure::Unavailable, "only phone numbers are supported")
                .with_latency(started.elapsed());
        }

        let request = self
            .transport
            .client()
            .post(&self.url)
            .json(&json!({ "caller_id": identifier.value() }));

        let result = match self.transport.fetch_json(SOURCE, request).await {
            Ok(body) => self.interpret(&body),
            Err(e) => {
                warn!(source = SOURCE, failure = %e.failure, "blacklist lookup failed: {}", e.detail);
                CheckResult::errored(SOURCE, e.failure, e.detail)
            }
        };

        debug!(source = SOURCE, compliant = result.is_compliant, errored = result.errored, "checked {}", identifier);
        result.with_latency(started.elapsed())
    }
}
