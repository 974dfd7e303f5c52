//! Background cron-style executor for recurring report jobs.
//!
//! Registration validates the cron expression up front; each job fires on
//! its own tokio task under a synthesized correlation id, with start and
//! completion/failure audit events around every run.

mod cron;
mod scheduler;

pub use cron::{CronError, CronSchedule};
pub use scheduler::{job_correlation_id, JobHandler, ReportScheduler, ScheduleError};
