//! Time-staged enrichment scheduler.
//!
//! Per token: DISCOVERED -> STAGE_1 -> ... -> STAGE_N -> {PRUNED | EXHAUSTED}.
//! Every stage is anchored at the discovery time, so a slow stage never
//! shifts the cadence of the ones after it.

pub mod fanout;
pub mod queue;
pub mod stage;
pub mod task;
pub mod worker;

pub use fanout::{check_all, fetch_all, merge_facts, LookupResult};
pub use queue::{RestoreReport, TaskQueue};
pub use stage::{Stage, StageTable};
pub use task::{EnrichmentTask, PriorityClass, RiskAnnotations};
pub use worker::{EnrichmentWorker, TaskOutcome, WorkerPool};
