pub mod batch;
pub mod engine;
pub mod progress;
pub mod verdict;

pub use batch::{BatchHandle, BatchProcessor, CancelHandle};
pub use engine::{CheckContext, ComplianceEngine};
pub use progress::BatchProgress;
pub use verdict::{aggregate, ComplianceVerdict, FailPolicy};
