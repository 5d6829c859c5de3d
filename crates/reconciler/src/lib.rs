//! Reconciliation of event sources: resolve the sink, keep one owned child
//! in the desired shape, and publish the result in status.

#![forbid(unsafe_code)]

pub mod child;
pub mod kinds;
pub mod orchestrator;
pub mod sink;
pub mod worker;

pub use child::{ChildResourceManager, ChildStrategy, DiffSummary};
pub use kinds::{CronJobStrategy, JobStrategy, ServiceStrategy};
pub use orchestrator::{KeyReconciler, Reconciler};
pub use sink::{SinkResolver, SinkTracker};
pub use worker::{spawn_workers, Outcome, WorkerPool};
