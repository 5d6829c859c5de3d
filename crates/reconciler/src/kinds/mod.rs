//! Child strategies, one per source kind.

mod cronjob;
mod job;
mod service;

pub use cronjob::CronJobStrategy;
pub use job::JobStrategy;
pub use service::ServiceStrategy;
