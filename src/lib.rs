pub mod checkers;
pub mod compliance;
pub mod config;
pub mod error;
pub mod gateway;
pub mod identifier;
pub mod notify;
pub mod ratelimit;
pub mod schedule;
pub mod storage;
pub mod utils;

pub use compliance::{BatchProcessor, CheckContext, ComplianceEngine, ComplianceVerdict};
pub use config::Config;
pub use error::{ComplianceError, Result};
pub use identifier::{Identifier, IdentifierKind};
