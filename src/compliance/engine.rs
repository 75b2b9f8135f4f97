use futures::future::{join_all, FutureExt};
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use crate::{
    checkers::{CheckFailure, CheckResult, CheckerRegistry, RegisteredChecker},
    compliance::verdict::ComplianceVerdict,
    error::Result,
    identifier::Identifier,
};

/// Per-call correlation data
#[derive(Debug, Clone, Default)]
pub struct CheckContext {
    pub request_id: Option<String>,
    pub batch_id: Option<String>,
}

impl CheckContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_batch_id(mut self, batch_id: impl Into<String>) -> Self {
        self.batch_id = Some(batch_id.into());
        self
    }

    fn request_id_or_new(&self) -> String {
        self.request_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    }
}

/// Fans one identifier out to every applicable checker and folds the
/// answers into a single verdict.
///
/// Checkers run concurrently and each is bounded by its own timeout, so a
/// verdict takes at most the slowest timeout. A checker that errors, times
/// out or panics contributes an errored result and never aborts the verdict.
pub struct ComplianceEngine {
    registry: CheckerRegistry,
    timeout: Duration,
}

impl ComplianceEngine {
    pub fn new(registry: CheckerRegistry, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    pub fn registry(&self) -> &CheckerRegistry {
        &self.registry
    }

    /// Normalize raw input and check it. Malformed input is a validation
    /// error and no checker is called.
    pub async fn check_compliance(&self, raw: &str, ctx: &CheckContext) -> Result<ComplianceVerdict> {
        let identifier = Identifier::parse(raw)?;
        Ok(self.check_identifier(&identifier, ctx).await)
    }

    pub async fn check_identifier(&self, identifier: &Identifier, ctx: &CheckContext) -> ComplianceVerdict {
        let started = Instant::now();
        let request_id = ctx.request_id_or_new();

        let checks = self
            .registry
            .applicable(identifier.kind())
            .map(|entry| self.run_single(entry, identifier));
        let results = join_all(checks).await;

        let verdict = ComplianceVerdict::new(identifier.clone(), results, request_id);
        info!(
            request_id = %verdict.request_id,
            batch_id = ctx.batch_id.as_deref().unwrap_or("-"),
            compliant = verdict.is_compliant,
            checkers = verdict.results.len(),
            errored = verdict.errored_sources().len(),
            latency_ms = started.elapsed().as_millis() as u64,
            "verdict for {}",
            identifier
        );
        verdict
    }

    /// Check several identifiers in one pass. Bulk-capable checkers get a
    /// single bulk call; the rest are called once per identifier. Returns
    /// one verdict per input, in input order.
    pub async fn check_many(&self, identifiers: &[Identifier], ctx: &CheckContext) -> Vec<ComplianceVerdict> {
        if identifiers.is_empty() {
            return Vec::new();
        }

        let per_checker = self.registry.entries().map(|entry| {
            let indices: Vec<usize> = identifiers
                .iter()
                .enumerate()
                .filter(|(_, id)| entry.capabilities.accepts(id.kind()))
                .map(|(i, _)| i)
                .collect();
            self.run_for_indices(entry, identifiers, indices)
        });
        let outputs = join_all(per_checker).await;

        let mut grouped: Vec<Vec<CheckResult>> = vec![Vec::new(); identifiers.len()];
        for output in outputs {
            for (index, result) in output {
                grouped[index].push(result);
            }
        }

        identifiers
            .iter()
            .zip(grouped)
            .map(|(identifier, results)| {
                let verdict = ComplianceVerdict::new(identifier.clone(), results, uuid::Uuid::new_v4().to_string());
                debug!(
                    request_id = %verdict.request_id,
                    batch_id = ctx.batch_id.as_deref().unwrap_or("-"),
                    compliant = verdict.is_compliant,
                    "verdict for {}",
                    identifier
                );
                verdict
            })
            .collect()
    }

    async fn run_for_indices(
        &self,
        entry: &RegisteredChecker,
        identifiers: &[Identifier],
        indices: Vec<usize>,
    ) -> Vec<(usize, CheckResult)> {
        if indices.is_empty() {
            return Vec::new();
        }

        if entry.capabilities.bulk {
            let subset: Vec<Identifier> = indices.iter().map(|&i| identifiers[i].clone()).collect();
            let results = self.run_bulk(entry, &subset).await;
            return indices.into_iter().zip(results).collect();
        }

        let singles = indices.iter().map(|&i| self.run_single(entry, &identifiers[i]));
        indices.iter().copied().zip(join_all(singles).await).collect()
    }

    async fn run_single(&self, entry: &RegisteredChecker, identifier: &Identifier) -> CheckResult {
        let limit = entry.timeout.unwrap_or(self.timeout);
        let started = Instant::now();
        let call = AssertUnwindSafe(entry.checker.check(identifier)).catch_unwind();

        let result = match tokio::time::timeout(limit, call).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => CheckResult::errored(entry.source, CheckFailure::Unavailable, "checker panicked")
                .with_latency(started.elapsed()),
            Err(_) => timed_out(entry.source, limit).with_latency(started.elapsed()),
        };

        stamp(entry, result)
    }

    async fn run_bulk(&self, entry: &RegisteredChecker, identifiers: &[Identifier]) -> Vec<CheckResult> {
        let limit = entry.timeout.unwrap_or(self.timeout);
        let started = Instant::now();
        let call = AssertUnwindSafe(entry.checker.check_bulk(identifiers)).catch_unwind();

        let results = match tokio::time::timeout(limit, call).await {
            Ok(Ok(results)) if results.len() == identifiers.len() => results,
            Ok(Ok(results)) => {
                let detail = format!("bulk call returned {} results for {} inputs", results.len(), identifiers.len());
                vec![CheckResult::errored(entry.source, CheckFailure::MalformedResponse, detail); identifiers.len()]
            }
            Ok(Err(_)) => vec![CheckResult::errored(entry.source, CheckFailure::Unavailable, "checker panicked"); identifiers.len()],
            Err(_) => vec![timed_out(entry.source, limit); identifiers.len()],
        };

        let elapsed = started.elapsed();
        results
            .into_iter()
            .map(|r| {
                let r = if r.latency_ms == 0 { r.with_latency(elapsed) } else { r };
                stamp(entry, r)
            })
            .collect()
    }
}

fn timed_out(source: &str, limit: Duration) -> CheckResult {
    CheckResult::errored(
        source,
        CheckFailure::Timeout,
        format!("no response within {} ms", limit.as_millis()),
    )
}

/// The registry, not the checker, owns the source name
fn stamp(entry: &RegisteredChecker, mut result: CheckResult) -> CheckResult {
    result.source = entry.source.to_string();
    if result.errored {
        warn!(
            source = entry.source,
            failure = %result.errored_reason.map(|f| f.to_string()).unwrap_or_default(),
            latency_ms = result.latency_ms,
            "checker errored: {}",
            result.error_detail.as_deref().unwrap_or("")
        );
    } else {
        debug!(
            source = entry.source,
            compliant = result.is_compliant,
            latency_ms = result.latency_ms,
            "checker finished"
        );
    }
    result
}
