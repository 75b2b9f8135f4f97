use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Timelike, Utc};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};
use crate::{
    checkers::{http::{HttpTransport, UpstreamError}, CheckFailure, CheckResult, Checker},
    error::{ComplianceError, Result},
    identifier::{Identifier, IdentifierKind},
};

pub const SOURCE: &str = "tcpa";

const LITIGATOR_SCRUB_TYPES: &str = r#"["tcpa","dnc"]"#;

/// Federal quiet-hours rule: calls allowed only between `start_hour` and
/// `end_hour` in the recipient's local time
#[derive(Debug, Clone, Copy)]
pub struct CallingWindow {
    start_hour: u32,
    end_hour: u32,
    offset: FixedOffset,
}

impl CallingWindow {
    pub fn new(start_hour: u32, end_hour: u32, utc_offset_hours: i32) -> Result<Self> {
        if start_hour >= end_hour || end_hour > 24 {
            return Err(ComplianceError::Config(format!(
                "invalid calling window {}..{}",
                start_hour, end_hour
            )));
        }
        let offset = FixedOffset::east_opt(utc_offset_hours * 3600)
            .ok_or_else(|| ComplianceError::Config(format!("invalid UTC offset {}", utc_offset_hours)))?;

        Ok(Self { start_hour, end_hour, offset })
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        let hour = at.with_timezone(&self.offset).hour();
        hour >= self.start_hour && hour < self.end_hour
    }
}

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// TCPA rules as one checker: litigator-list membership plus an optional
/// calling-window rule. Reasons from every failing sub-check are reported
/// together, in that order.
pub struct TcpaChecker {
    transport: HttpTransport,
    endpoint: String,
    username: String,
    password: String,
    calling_window: Option<CallingWindow>,
    clock: Clock,
}

impl TcpaChecker {
    pub fn new(transport: HttpTransport, base_url: &str, username: &str, password: &str) -> Self {
        Self {
            transport,
            endpoint: format!("{}/scrub/phone", base_url.trim_end_matches('/')),
            username: username.to_string(),
            password: password.to_string(),
            calling_window: None,
            clock: Arc::new(Utc::now),
        }
    }

    pub fn with_calling_window(mut self, window: CallingWindow) -> Self {
        self.calling_window = Some(window);
        self
    }

    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Reasons the litigator list gives for listing the number; empty when clean
    pub fn litigator_reasons(body: &Value) -> std::result::Result<Vec<String>, UpstreamError> {
        let results = body
            .get("results")
            .filter(|r| r.is_object())
            .ok_or_else(|| UpstreamError::new(CheckFailure::MalformedResponse, "response has no results object"))?;

        let clean = match results.get("clean") {
            Some(Value::Bool(b)) => *b,
            Some(v) => v.as_i64() == Some(1) || v.as_str() == Some("1"),
            None => false,
        };
        if clean {
            return Ok(Vec::new());
        }

        let mut reasons: Vec<String> = results
            .get("status_array")
            .and_then(Value::as_array)
            .map(|statuses| {
                statuses
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        if reasons.is_empty() {
            let fallback = results
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or("Listed on TCPA litigator list");
            reasons.push(fallback.to_string());
        }

        Ok(reasons)
    }

    async fn query_litigator(&self, identifier: &Identifier) -> std::result::Result<Value, UpstreamError> {
        let request = self
            .transport
            .client()
            .post(&self.endpoint)
            .basic_auth(&self.username, Some(&self.password))
            .form(&[("phone_number", identifier.value()), ("type", LITIGATOR_SCRUB_TYPES)]);

        self.transport.fetch_json(SOURCE, request).await
    }
}

#[async_trait]
impl Checker for TcpaChecker {
    fn source(&self) -> &'static str {
        SOURCE
    }

    async fn check(&self, identifier: &Identifier) -> CheckResult {
        let started = Instant::now();

        if identifier.kind() != IdentifierKind::Phone {
            return CheckResult::errored(SOURCE, CheckFailure::Unavailable, "only phone numbers are supported")
                .with_latency(started.elapsed());
        }

        let mut reasons = Vec::new();
        let mut details = Map::new();
        let mut failure: Option<UpstreamError> = None;

        match self.query_litigator(identifier).await {
            Ok(body) => {
                match Self::litigator_reasons(&body) {
                    Ok(listed) => {
                        details.insert("litigator".into(), json!({ "listed": !listed.is_empty(), "raw": body }));
                        reasons.extend(listed);
                    }
                    Err(e) => {
                        details.insert("litigator".into(), json!({ "raw": body }));
                        failure = Some(e);
                    }
                }
            }
            Err(e) => failure = Some(e),
        }

        if let Some(window) = &self.calling_window {
            let now = (self.clock)();
            let open = window.contains(now);
            details.insert(
                "calling_window".into(),
                json!({
                    "open": open,
                    "start_hour": window.start_hour,
                    "end_hour": window.end_hour,
                    "checked_at": now.to_rfc3339(),
                }),
            );
            if !open {
                reasons.push(format!(
                    "Outside TCPA calling window ({:02}:00-{:02}:00 local time)",
                    window.start_hour, window.end_hour
                ));
            }
        }

        let details = Value::Object(details);
        let result = if !reasons.is_empty() {
            CheckResult::non_compliant(SOURCE, reasons, details)
        } else if let Some(e) = failure {
            warn!(source = SOURCE, failure = %e.failure, "litigator lookup failed: {}", e.detail);
            CheckResult::errored(SOURCE, e.failure, e.detail).with_details(details)
        } else {
            CheckResult::compliant(SOURCE, details)
        };

        debug!(source = SOURCE, compliant = result.is_compliant, errored = result.errored, "checked {}", identifier);
        result.with_latency(started.elapsed())
    }
}
