use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error};
use crate::{
    checkers::{CheckFailure, CheckResult, Checker},
    identifier::{Identifier, IdentifierKind},
    storage::{Database, SuppressionEntry},
};

pub const SOURCE: &str = "internal-dnc";

/// Checks identifiers against the internally owned suppression list
pub struct InternalDncChecker {
    db: Arc<Database>,
}

impl InternalDncChecker {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    fn result_for(entries: &[&SuppressionEntry]) -> CheckResult {
        if entries.is_empty() {
            return CheckResult::compliant(SOURCE, json!({ "suppressed": false }));
        }

        let reasons = entries
            .iter()
            .map(|e| format!("Suppressed by internal DNC list: {}", e.reason))
            .collect();
        let matches: Vec<_> = entries
            .iter()
            .map(|e| {
                json!({
                    "id": e.id,
                    "reason": e.reason,
                    "source": e.source,
                    "added_by": e.added_by,
                    "added_at": e.added_at.to_rfc3339(),
                    "expires_at": e.expires_at.map(|t| t.to_rfc3339()),
                })
            })
            .collect();

        CheckResult::non_compliant(SOURCE, reasons, json!({ "suppressed": true, "entries": matches }))
    }
}

#[async_trait]
impl Checker for InternalDncChecker {
    fn source(&self) -> &'static str {
        SOURCE
    }

    async fn check(&self, identifier: &Identifier) -> CheckResult {
        self.check_bulk(std::slice::from_ref(identifier))
            .await
            .pop()
            .unwrap_or_else(|| CheckResult::errored(SOURCE, CheckFailure::Unavailable, "no result"))
    }

    /// One lookup for the whole slice, run on the blocking pool so the
    /// engine's timeout can still fire while SQLite waits on a busy database
    async fn check_bulk(&self, identifiers: &[Identifier]) -> Vec<CheckResult> {
        let started = Instant::now();
        let db = self.db.clone();
        let owned = identifiers.to_vec();

        let lookup = tokio::task::spawn_blocking(move || db.find_active_suppressions(&owned, Utc::now()))
            .await
            .map_err(|e| e.to_string())
            .and_then(|found| found.map_err(|e| e.to_string()));

        let entries = match lookup {
            Ok(entries) => entries,
            Err(message) => {
                error!(source = SOURCE, "suppression lookup failed: {}", message);
                let elapsed = started.elapsed();
                return identifiers
                    .iter()
                    .map(|_| {
                        CheckResult::errored(SOURCE, CheckFailure::Unavailable, message.clone())
                            .with_latency(elapsed)
                    })
                    .collect();
            }
        };

        let mut by_identifier: HashMap<(IdentifierKind, &str), Vec<&SuppressionEntry>> = HashMap::new();
        for entry in &entries {
            by_identifier
                .entry((entry.kind, entry.identifier.as_str()))
                .or_default()
                .push(entry);
        }

        let elapsed = started.elapsed();
        debug!(source = SOURCE, "{} identifiers, {} suppression matches", identifiers.len(), entries.len());

        identifiers
            .iter()
            .map(|identifier| {
                let matched = by_identifier
                    .get(&(identifier.kind(), identifier.value()))
                    .map(Vec::as_slice)
                    .unwrap_or(&[]);
                Self::result_for(matched).with_latency(elapsed)
            })
            .collect()
    }
}
