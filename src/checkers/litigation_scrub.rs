use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Instant;
use tracing::{debug, warn};
use crate::{
    checkers::{http::HttpTransport, CheckFailure, CheckResult, Checker},
    identifier::{Identifier, IdentifierKind},
};

pub const SOURCE: &str = "litigation-scrub";

/// Litigation/complaint database scrub, keyed on a hit count
pub struct LitigationScrubChecker {
    transport: HttpTransport,
    endpoint: String,
}

impl LitigationScrubChecker {
    pub fn new(transport: HttpTransport, base_url: &str, api_key: &str) -> Self {
        Self {
            transport,
            endpoint: format!("{}/phone_scrub/{}", base_url.trim_end_matches('/'), api_key),
        }
    }

    /// Read `TotalHits` from a response.
    ///
    /// The upstream reports zero as `0`, `"0"`, `""`, or by omitting the
    /// field; all of those are zero hits. Negative or non-numeric values
    /// are malformed.
    pub fn total_hits(body: &Value) -> Option<u64> {
        match body.get("TotalHits") {
            None | Some(Value::Null) => Some(0),
            Some(Value::Number(n)) => n.as_u64(),
            Some(Value::String(s)) if s.trim().is_empty() => Some(0),
            Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
            Some(_) => None,
        }
    }

    pub fn interpret(body: &Value) -> CheckResult {
        match Self::total_hits(body) {
            Some(0) => CheckResult::compliant(SOURCE, json!({ "total_hits": 0, "raw": body })),
            Some(hits) => CheckResult::non_compliant(
                SOURCE,
                vec![format!("Phone number found in litigation database ({} hits)", hits)],
                json!({ "total_hits": hits, "raw": body }),
            ),
            None => CheckResult::errored(
                SOURCE,
                CheckFailure::MalformedResponse,
                format!("unexpected TotalHits value: {}", body.get("TotalHits").unwrap_or(&Value::Null)),
            )
            .with_details(json!({ "raw": body })),
        }
    }
}

#[async_trait]
impl Checker for LitigationScrubChecker {
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
            .post(&self.endpoint)
            .json(&json!([{ "Phones": identifier.value() }]));

        let result = match self.transport.fetch_json(SOURCE, request).await {
            Ok(body) => Self::interpret(&body),
            Err(e) => {
                warn!(source = SOURCE, failure = %e.failure, "litigation scrub failed: {}", e.detail);
                CheckResult::errored(SOURCE, e.failure, e.detail)
            }
        };

        debug!(source = SOURCE, compliant = result.is_compliant, errored = result.errored, "checked {}", identifier);
        result.with_latency(started.elapsed())
    }
}
