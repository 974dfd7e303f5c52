use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use gk_audit::{AuditEventCreate, AuditLog, EventType};

use crate::cron::{CronError, CronSchedule};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ScheduleError {
    InvalidCron(CronError),
    DuplicateJob(String),
    AlreadyStarted,
}

impl std::fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScheduleError::InvalidCron(e) => write!(f, "invalid cron expression: {e}"),
            ScheduleError::DuplicateJob(id) => write!(f, "job already registered: {id}"),
            ScheduleError::AlreadyStarted => write!(f, "scheduler already started"),
        }
    }
}

impl std::error::Error for ScheduleError {}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

/// A job body: runs synchronously (report pulls are blocking I/O) and
/// returns a JSON summary for the completion audit event.
pub type JobHandler = Arc<dyn Fn() -> anyhow::Result<Value> + Send + Sync>;

struct JobSpec {
    id: String,
    name: String,
    schedule: CronSchedule,
    handler: JobHandler,
}

/// Correlation id synthesized for one firing of a job.
pub fn job_correlation_id(job_id: &str, fired_at: DateTime<Utc>) -> String {
    format!("scheduled-{job_id}-{}", fired_at.timestamp())
}

// ---------------------------------------------------------------------------
// ReportScheduler
// ---------------------------------------------------------------------------

/// Cron-style executor for recurring report jobs.
///
/// One tokio task per job. The firing loop awaits the job body, so a job
/// never overlaps itself (`max_instances = 1`); a firing whose slot passed
/// while the previous run was still going is skipped, not queued.
pub struct ReportScheduler {
    audit: Arc<AuditLog>,
    jobs: Mutex<Vec<JobSpec>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ReportScheduler {
    pub fn new(audit: Arc<AuditLog>) -> Self {
        Self {
            audit,
            jobs: Mutex::new(Vec::new()),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Register a job. A malformed cron expression is refused here, with a
    /// typed error, and leaves previously registered jobs untouched.
    pub fn register_job(
        &self,
        id: impl Into<String>,
        name: impl Into<String>,
        cron_expression: &str,
        handler: JobHandler,
    ) -> Result<(), ScheduleError> {
        let id = id.into();
        let schedule = CronSchedule::parse(cron_expression).map_err(ScheduleError::InvalidCron)?;

        let mut jobs = self.jobs.lock().expect("jobs lock poisoned");
        if jobs.iter().any(|j| j.id == id) {
            return Err(ScheduleError::DuplicateJob(id));
        }
        info!(job_id = %id, cron = cron_expression, "registered scheduled job");
        jobs.push(JobSpec {
            id,
            name: name.into(),
            schedule,
            handler,
        });
        Ok(())
    }

    pub fn job_count(&self) -> usize {
        self.jobs.lock().expect("jobs lock poisoned").len()
    }

    /// Spawn the firing loops. Call once, from within a tokio runtime.
    pub fn start(&self) -> Result<usize, ScheduleError> {
        let mut handles = self.handles.lock().expect("handles lock poisoned");
        if !handles.is_empty() {
            return Err(ScheduleError::AlreadyStarted);
        }

        let jobs = std::mem::take(&mut *self.jobs.lock().expect("jobs lock poisoned"));
        let count = jobs.len();
        for job in jobs {
            let audit = Arc::clone(&self.audit);
            handles.push(tokio::spawn(run_job_loop(audit, job)));
        }
        Ok(count)
    }

    /// Abort all firing loops. In-flight job bodies finish on the blocking
    /// pool; no new firings happen.
    pub fn stop(&self) {
        for handle in self.handles.lock().expect("handles lock poisoned").drain(..) {
            handle.abort();
        }
    }
}

async fn run_job_loop(audit: Arc<AuditLog>, job: JobSpec) {
    loop {
        let now = Utc::now();
        let next = match job.schedule.next_after(now) {
            Some(next) => next,
            None => {
                warn!(job_id = %job.id, "schedule has no future firings; stopping loop");
                return;
            }
        };
        let wait = (next - now)
            .to_std()
            .unwrap_or(std::time::Duration::ZERO);
        tokio::time::sleep(wait).await;

        let audit = Arc::clone(&audit);
        let id = job.id.clone();
        let name = job.name.clone();
        let handler = Arc::clone(&job.handler);
        // The loop awaits the run: a job cannot overlap itself, and any
        // firing slots that pass meanwhile are skipped.
        let result =
            tokio::task::spawn_blocking(move || fire_job(&audit, &id, &name, next, &handler))
                .await;
        if let Err(e) = result {
            error!(job_id = %job.id, error = %e, "scheduled job panicked");
        }
    }
}

/// Execute one firing: start event, handler, completion or failure event.
/// Synchronous so tests can drive it without a runtime.
pub(crate) fn fire_job(
    audit: &AuditLog,
    job_id: &str,
    job_name: &str,
    fired_at: DateTime<Utc>,
    handler: &JobHandler,
) {
    let correlation_id = job_correlation_id(job_id, fired_at);

    let started = audit.append(AuditEventCreate::new(
        EventType::ScheduledReportStarted,
        &correlation_id,
        json!({
            "job_id": job_id,
            "job_name": job_name,
            "scheduled_for": fired_at,
        }),
    ));
    if let Err(e) = started {
        error!(job_id, error = %e, "failed to audit scheduled job start; skipping run");
        return;
    }

    let run = handler.as_ref();
    match run() {
        Ok(result) => {
            info!(job_id, correlation_id, "scheduled job completed");
            let _ = audit.append(AuditEventCreate::new(
                EventType::ScheduledReportCompleted,
                &correlation_id,
                json!({
                    "job_id": job_id,
                    "result": result,
                }),
            ));
        }
        Err(e) => {
            error!(job_id, correlation_id, error = %e, "scheduled job failed");
            let _ = audit.append(AuditEventCreate::new(
                EventType::ScheduledReportFailed,
                &correlation_id,
                json!({
                    "job_id": job_id,
                    "error": e.to_string(),
                }),
            ));
        }
    }
}
