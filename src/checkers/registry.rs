use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use crate::{
    checkers::{
        external_blacklist::ExternalBlacklistChecker, http::HttpTransport, internal_dnc::InternalDncChecker,
        litigation_scrub::LitigationScrubChecker, tcpa::{CallingWindow, TcpaChecker}, Checker,
    },
    config::Config,
    error::{ComplianceError, Result},
    identifier::IdentifierKind,
    ratelimit::RateLimiters,
    storage::Database,
};

/// What a registered checker can be asked
#[derive(Debug, Clone)]
pub struct Capabilities {
    pub kinds: HashSet<IdentifierKind>,
    pub single: bool,
    pub bulk: bool,
}

impl Capabilities {
    pub fn phone_only() -> Self {
        Self {
            kinds: [IdentifierKind::Phone].into_iter().collect(),
            single: true,
            bulk: false,
        }
    }

    pub fn all_kinds() -> Self {
        Self {
            kinds: [IdentifierKind::Phone, IdentifierKind::Email, IdentifierKind::PostalCode]
                .into_iter()
                .collect(),
            single: true,
            bulk: false,
        }
    }

    pub fn with_bulk(mut self) -> Self {
        self.bulk = true;
        self
    }

    pub fn accepts(&self, kind: IdentifierKind) -> bool {
        self.kinds.contains(&kind)
    }
}

#[derive(Clone)]
pub struct RegisteredChecker {
    pub source: &'static str,
    pub capabilities: Capabilities,
    /// Overrides the engine-wide timeout for this source
    pub timeout: Option<Duration>,
    pub checker: Arc<dyn Checker>,
}

/// Ordered set of checkers. Order is registration order and is the order
/// results appear in every verdict.
#[derive(Clone, Default)]
pub struct CheckerRegistry {
    checkers: Vec<RegisteredChecker>,
}

impl CheckerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, checker: Arc<dyn Checker>, capabilities: Capabilities) -> Result<()> {
        self.register_with_timeout(checker, capabilities, None)
    }

    pub fn register_with_timeout(
        &mut self,
        checker: Arc<dyn Checker>,
        capabilities: Capabilities,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let source = checker.source();
        if self.checkers.iter().any(|c| c.source == source) {
            return Err(ComplianceError::Config(format!("checker '{}' registered twice", source)));
        }

        self.checkers.push(RegisteredChecker {
            source,
            capabilities,
            timeout,
            checker,
        });
        Ok(())
    }

    /// Checkers that accept `kind`, in registry order
    pub fn applicable(&self, kind: IdentifierKind) -> impl Iterator<Item = &RegisteredChecker> {
        self.checkers.iter().filter(move |c| c.capabilities.accepts(kind))
    }

    pub fn entries(&self) -> impl Iterator<Item = &RegisteredChecker> {
        self.checkers.iter()
    }

    pub fn sources(&self) -> Vec<&'static str> {
        self.checkers.iter().map(|c| c.source).collect()
    }

    pub fn len(&self) -> usize {
        self.checkers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkers.is_empty()
    }

    /// Build every enabled checker, in the fixed order TCPA, external
    /// blacklist, litigation scrub, internal DNC
    pub fn from_config(config: &Config, db: Arc<Database>, limiters: &RateLimiters) -> Result<Self> {
        let transport = HttpTransport::new(config.checker_timeout())?
            .with_limiter(limiters.outbound.clone(), limiters.outbound_max_wait);
        let checkers = &config.checkers;
        let mut registry = Self::new();

        if checkers.tcpa.enabled {
            let tcpa = &checkers.tcpa;
            let mut checker = TcpaChecker::new(transport.clone(), &tcpa.base_url, &tcpa.username, &tcpa.password);
            if let Some(window) = &tcpa.calling_window {
                checker = checker.with_calling_window(CallingWindow::new(
                    window.start_hour,
                    window.end_hour,
                    window.utc_offset_hours,
                )?);
            }
            registry.register(Arc::new(checker), Capabilities::phone_only())?;
        }

        if checkers.external_blacklist.enabled {
            let blacklist = &checkers.external_blacklist;
            registry.register(
                Arc::new(ExternalBlacklistChecker::new(transport.clone(), &blacklist.url, &blacklist.blocked_code)),
                Capabilities::phone_only(),
            )?;
        }

        if checkers.litigation_scrub.enabled {
            let scrub = &checkers.litigation_scrub;
            registry.register(
                Arc::new(LitigationScrubChecker::new(transport, &scrub.base_url, &scrub.api_key)),
                Capabilities::phone_only(),
            )?;
        }

        if checkers.internal_dnc.enabled {
            registry.register(
                Arc::new(InternalDncChecker::new(db)),
                Capabilities::all_kinds().with_bulk(),
            )?;
        }

        info!("Registered {} checkers: {}", registry.len(), registry.sources().join(", "));
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkers::MockChecker;
    use crate::config::tests::sample_config;

    fn mock(source: &'static str) -> Arc<dyn Checker> {
        let mut checker = MockChecker::new();
        checker.expect_source().return_const(source);
        Arc::new(checker)
    }

    #[test]
    fn test_duplicate_source_is_rejected() {
        let mut registry = CheckerRegistry::new();
        registry.register(mock("tcpa"), Capabilities::phone_only()).unwrap();
        let err = registry.register(mock("tcpa"), Capabilities::all_kinds()).unwrap_err();
        assert!(matches!(err, ComplianceError::Config(_)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_applicable_filters_by_kind() {
        let mut registry = CheckerRegistry::new();
        registry.register(mock("tcpa"), Capabilities::phone_only()).unwrap();
        registry.register(mock("internal-dnc"), Capabilities::all_kinds().with_bulk()).unwrap();

        let phone: Vec<_> = registry.applicable(IdentifierKind::Phone).map(|c| c.source).collect();
        assert_eq!(phone, vec!["tcpa", "internal-dnc"]);

        let email: Vec<_> = registry.applicable(IdentifierKind::Email).map(|c| c.source).collect();
        assert_eq!(email, vec!["internal-dnc"]);
    }

    #[test]
    fn test_from_config_order_and_toggles() {
        let mut config = sample_config();
        let db = Arc::new(Database::in_memory().unwrap());
        let limiters = RateLimiters::from_config(&config.rate_limit);

        let registry = CheckerRegistry::from_config(&config, db.clone(), &limiters).unwrap();
        assert_eq!(
            registry.sources(),
            vec!["tcpa", "external-blacklist", "litigation-scrub", "internal-dnc"]
        );

        config.checkers.litigation_scrub.enabled = false;
        config.checkers.tcpa.enabled = false;
        let registry = CheckerRegistry::from_config(&config, db, &limiters).unwrap();
        assert_eq!(registry.sources(), vec!["external-blacklist", "internal-dnc"]);
    }
}
