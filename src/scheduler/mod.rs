//! Cron-driven scheduling of job runs (spec.md §4.6).
//!
//! A single `tokio::time::interval` timer-loop task checks due schedules
//! each tick, rather than arming one timer per job — closer to the
//! teacher's single job-agent task model, and keeps the `max_instances=1`
//! coalescing check centralized in one place.

use crate::executor::{Executor, RunOutcome};
use crate::model::Job;
use crate::store::Store;
use chrono::{Local, Utc};
use cron::Schedule;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

struct Entry {
    job: Job,
    schedule: Schedule,
    running: bool,
}

/// The most recent outcome of a job's execution, kept in memory only
/// (spec.md §9 supplement: a single most-recent-result, not a log).
#[derive(Debug, Clone)]
pub struct LastResult {
    /// When the run finished.
    pub at: chrono::DateTime<Utc>,
    /// Whether it succeeded, and if not, the stage and message.
    pub outcome: LastOutcome,
}

/// Serializable shape of a [`RunOutcome`] for read-back via the API.
#[derive(Debug, Clone)]
pub enum LastOutcome {
    /// The run succeeded.
    Success,
    /// The run failed at the named stage.
    Failure {
        /// Stage name (`"fetch"`, `"transform"`, `"serialize"`, `"deliver"`).
        stage: &'static str,
        /// Human-readable cause.
        message: String,
    },
}

impl From<RunOutcome> for LastOutcome {
    fn from(outcome: RunOutcome) -> Self {
        match outcome {
            RunOutcome::Success => Self::Success,
            RunOutcome::Failure { stage, message } => Self::Failure { stage, message },
        }
    }
}

/// Scheduling error: an invalid cron expression (spec.md §4.6/§4.7).
#[derive(Debug, thiserror::Error)]
#[error("invalid schedule expression: {0}")]
pub struct ScheduleError(String);

/// Errors from [`Scheduler::preview`].
#[derive(Debug, thiserror::Error)]
pub enum RunNowError {
    /// No job with that name is registered.
    #[error("job not found: {0}")]
    NotFound(String),
    /// The job is already running (`max_instances = 1`, spec.md §4.6).
    #[error("job is already running")]
    AlreadyRunning,
    /// The fetch or transform stage failed.
    #[error("{stage} failed: {message}")]
    PreviewFailed {
        /// Which stage failed.
        stage: &'static str,
        /// Human-readable cause.
        message: String,
    },
}

/// Parse a five-field cron expression (minute hour dom month dow) the way
/// spec.md §4.6 specifies, accommodating the `cron` crate's native
/// six-field (with leading seconds) format by prefixing `"0 "`.
pub fn parse_schedule(expression: &str) -> Result<Schedule, ScheduleError> {
    let with_seconds = format!("0 {expression}");
    Schedule::from_str(&with_seconds).map_err(|err| ScheduleError(err.to_string()))
}

/// Owns the in-process schedule table and the single timer-loop task.
pub struct Scheduler {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    last_results: Arc<RwLock<HashMap<String, LastResult>>>,
    executor: Arc<Executor>,
    store: Arc<Store>,
    tick: Arc<RwLock<Option<JoinHandle<()>>>>,
}

impl Scheduler {
    /// Build an empty scheduler. Call [`Scheduler::load_all`] before
    /// [`Scheduler::start`] to populate it from the [`Store`].
    #[must_use]
    pub fn new(executor: Arc<Executor>, store: Arc<Store>) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            last_results: Arc::new(RwLock::new(HashMap::new())),
            executor,
            store,
            tick: Arc::new(RwLock::new(None)),
        }
    }

    /// Load every job currently in the store into the schedule table.
    /// Jobs with a schedule expression that fails to parse are skipped
    /// with a logged warning rather than aborting startup.
    pub async fn load_all(&self) {
        for job in self.store.list().await {
            if let Err(err) = self.register(job.clone()) {
                tracing::warn!(job = %job.name, error = %err, "skipping job with invalid schedule");
            }
        }
    }

    /// Register (or replace) a job's schedule.
    pub fn register(&self, job: Job) -> Result<(), ScheduleError> {
        let schedule = parse_schedule(&job.schedule)?;
        let name = job.name.clone();
        self.entries.write().insert(
            name,
            Entry {
                job,
                schedule,
                running: false,
            },
        );
        Ok(())
    }

    /// Run a job's fetch and transform stages immediately, outside its
    /// regular schedule, and return the resulting CSV bytes without
    /// sending any mail (the Control API's `POST /api/jobs/{name}/test`,
    /// spec.md §4.7/§6/§9). Subject to the same `max_instances = 1`
    /// coalescing as the timer loop: if the job is already running, this
    /// returns [`RunNowError::AlreadyRunning`] rather than running
    /// concurrently with it. Never touches `last_run` or the job's
    /// last-result — a preview is diagnostic, not an official run.
    pub async fn preview(&self, name: &str) -> Result<Vec<u8>, RunNowError> {
        let job = {
            let mut guard = self.entries.write();
            let entry = guard.get_mut(name).ok_or_else(|| RunNowError::NotFound(name.to_string()))?;
            if entry.running {
                return Err(RunNowError::AlreadyRunning);
            }
            entry.running = true;
            entry.job.clone()
        };

        let result = self.executor.preview(&job).await;

        if let Some(entry) = self.entries.write().get_mut(name) {
            entry.running = false;
        }

        result.map_err(|err| RunNowError::PreviewFailed {
            stage: err.stage,
            message: err.message,
        })
    }

    /// Remove a job from the schedule table. A no-op if it wasn't present.
    pub fn unregister(&self, name: &str) {
        self.entries.write().remove(name);
        self.last_results.write().remove(name);
    }

    /// Read back the most recent run outcome for a job, if any.
    #[must_use]
    pub fn last_result(&self, name: &str) -> Option<LastResult> {
        self.last_results.read().get(name).cloned()
    }

    /// Start the timer-loop task, ticking every second and running any
    /// schedule whose next fire time has passed, subject to
    /// `max_instances = 1` coalescing (spec.md §4.6: a schedule already
    /// running is skipped rather than queued).
    pub fn start(&self) {
        let entries = Arc::clone(&self.entries);
        let last_results = Arc::clone(&self.last_results);
        let executor = Arc::clone(&self.executor);
        let store = Arc::clone(&self.store);

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            loop {
                interval.tick().await;
                let due = Self::due_jobs(&entries);

                for job in due {
                    let entries = Arc::clone(&entries);
                    let last_results = Arc::clone(&last_results);
                    let executor = Arc::clone(&executor);
                    let store = Arc::clone(&store);
                    let name = job.name.clone();

                    tokio::spawn(async move {
                        let outcome = executor.run(&job).await;

                        if matches!(outcome, RunOutcome::Success) {
                            let now = Utc::now();
                            if let Err(err) = store.touch_last_run(&name, now).await {
                                tracing::warn!(job = %name, error = %err, "failed to record last_run");
                            }
                            if let Some(entry) = entries.write().get_mut(&name) {
                                entry.job.last_run = Some(now);
                            }
                        }

                        last_results.write().insert(
                            name.clone(),
                            LastResult {
                                at: Utc::now(),
                                outcome: outcome.into(),
                            },
                        );

                        if let Some(entry) = entries.write().get_mut(&name) {
                            entry.running = false;
                        }
                    });
                }
            }
        });

        *self.tick.write() = Some(handle);
    }

    fn due_jobs(entries: &Arc<RwLock<HashMap<String, Entry>>>) -> Vec<Job> {
        // Cron expressions run against the host's local wall clock
        // (spec.md §4.6), not UTC; only persisted timestamps use UTC.
        let now = Local::now();
        let mut guard = entries.write();
        let mut due = Vec::new();

        for entry in guard.values_mut() {
            if entry.running {
                continue;
            }

            let fires = entry
                .schedule
                .after(&(now - chrono::Duration::seconds(1)))
                .next()
                .is_some_and(|next| next <= now);

            if fires {
                entry.running = true;
                due.push(entry.job.clone());
            }
        }

        due
    }

    /// Stop the timer-loop task, waiting up to `timeout` for in-flight
    /// runs to finish before returning (spec.md §4.6: graceful shutdown
    /// lets a running job complete against its snapshot).
    pub async fn stop(&self, timeout: Duration) {
        if let Some(handle) = self.tick.write().take() {
            handle.abort();
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let any_running = self.entries.read().values().any(|e| e.running);
            if !any_running || tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_field_expression_parses() {
        assert!(parse_schedule("* * * * *").is_ok());
    }

    #[test]
    fn malformed_expression_is_rejected() {
        assert!(parse_schedule("not a cron expression").is_err());
    }

    #[test]
    fn every_minute_schedule_has_a_next_fire_within_a_minute() {
        let schedule = parse_schedule("* * * * *").unwrap();
        let next = schedule.after(&Utc::now()).next();
        assert!(next.is_some());
    }
}
