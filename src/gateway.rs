use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use crate::{
    compliance::{BatchHandle, BatchProcessor, CheckContext, ComplianceEngine, ComplianceVerdict, FailPolicy},
    error::Result,
    identifier::Identifier,
    notify::{Notifiers, NotifyEvent},
    ratelimit::RateLimiters,
    storage::{AuditStore, Database, NewSuppression, SuppressionEntry},
};

/// Answer given to the lead-ingestion pipeline
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum LeadDecision {
    Accepted { verdict: ComplianceVerdict },
    Rejected { reasons: Vec<String>, verdict: ComplianceVerdict },
}

impl LeadDecision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, LeadDecision::Accepted { .. })
    }

    pub fn verdict(&self) -> &ComplianceVerdict {
        match self {
            LeadDecision::Accepted { verdict } | LeadDecision::Rejected { verdict, .. } => verdict,
        }
    }
}

/// Front door for lead submissions: rate limiting, checking, audit
pub struct LeadGate {
    engine: Arc<ComplianceEngine>,
    store: Arc<dyn AuditStore>,
    limiters: Arc<RateLimiters>,
    processor: Arc<BatchProcessor>,
    policy: FailPolicy,
}

impl LeadGate {
    pub fn new(
        engine: Arc<ComplianceEngine>,
        store: Arc<dyn AuditStore>,
        limiters: Arc<RateLimiters>,
        processor: Arc<BatchProcessor>,
        policy: FailPolicy,
    ) -> Self {
        Self {
            engine,
            store,
            limiters,
            processor,
            policy,
        }
    }

    /// Decide whether a single lead may be accepted. The verdict is stored
    /// before the decision is returned.
    pub async fn admit(&self, api_key: &str, raw_phone: &str) -> Result<LeadDecision> {
        self.limiters.check_inbound(api_key, 1)?;
        let identifier = Identifier::phone(raw_phone)?;

        let verdict = self.engine.check_identifier(&identifier, &CheckContext::new()).await;
        self.store.record_verdict(&verdict, None)?;

        if verdict.is_compliant_with(&self.policy) {
            return Ok(LeadDecision::Accepted { verdict });
        }

        let mut reasons = verdict.reasons();
        for result in verdict.results.iter().filter(|r| r.errored && self.policy.is_fail_closed(&r.source)) {
            let failure = result.errored_reason.map(|f| f.to_string()).unwrap_or_default();
            reasons.push(format!("{} unavailable ({})", result.source, failure));
        }

        info!("Rejected lead {} ({} reasons)", identifier, reasons.len());
        Ok(LeadDecision::Rejected { reasons, verdict })
    }

    /// Submit many identifiers at once; rate limited by their count
    pub async fn submit_batch(&self, api_key: &str, identifiers: Vec<String>, label: Option<String>) -> Result<BatchHandle> {
        let cost = identifiers.len().max(1) as u32;
        self.limiters.check_inbound(api_key, cost)?;
        self.processor.submit(identifiers, label).await
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BulkAddOutcome {
    Added { input: String, identifier: String },
    Failed { input: String, error: String },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkAddReport {
    pub added: usize,
    pub failed: usize,
    pub outcomes: Vec<BulkAddOutcome>,
}

/// Management surface for the internal do-not-contact list
pub struct SuppressionList {
    db: Arc<Database>,
    notifiers: Notifiers,
}

impl SuppressionList {
    pub fn new(db: Arc<Database>, notifiers: Notifiers) -> Self {
        Self { db, notifiers }
    }

    pub fn add(&self, entry: &NewSuppression) -> Result<SuppressionEntry> {
        let added = self.db.add_suppression(entry)?;
        info!("Added {} to the suppression list ({})", added.identifier, added.reason);
        self.notifiers.dispatch(NotifyEvent::DncAdded(added.clone()));
        Ok(added)
    }

    /// Revoke an identifier; false when it was not on the list
    pub fn remove(&self, raw: &str) -> Result<bool> {
        let revoked = self.db.revoke_suppression(raw)? > 0;
        if revoked {
            info!("Removed {} from the suppression list", raw.trim());
        }
        Ok(revoked)
    }

    /// Add every entry independently; one bad entry never stops the rest
    pub fn bulk_add(&self, entries: Vec<NewSuppression>) -> BulkAddReport {
        let mut report = BulkAddReport::default();

        for entry in entries {
            match self.add(&entry) {
                Ok(added) => {
                    report.added += 1;
                    report.outcomes.push(BulkAddOutcome::Added {
                        input: entry.identifier,
                        identifier: added.identifier,
                    });
                }
                Err(e) => {
                    warn!("Could not add '{}' to the suppression list: {}", entry.identifier, e);
                    report.failed += 1;
                    report.outcomes.push(BulkAddOutcome::Failed {
                        input: entry.identifier,
                        error: e.to_string(),
                    });
                }
            }
        }

        report
    }
}
