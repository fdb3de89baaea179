//! Orchestrates one job run: fetch, transform, then email (spec.md §4.5).

use crate::config::AppConfig;
use crate::fetcher::Fetcher;
use crate::mailer::email::Email;
use crate::mailer::{send_with_retry, table_to_csv, EmailSender};
use crate::model::Job;
use crate::sandbox;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

/// A fetch-and-transform failure surfaced to [`Executor::preview`],
/// distinct from [`RunOutcome`] since a preview never reaches the mail
/// stage.
#[derive(Debug, thiserror::Error)]
#[error("{stage} failed: {message}")]
pub struct PreviewError {
    /// Which stage failed (`"fetch"` or `"transform"`).
    pub stage: &'static str,
    /// Human-readable cause.
    pub message: String,
}

/// The outcome of one job run, kept as the single most-recent-result the
/// Control API can read back (spec.md §9 supplement, not a history log).
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// The run completed and a result email was delivered.
    Success,
    /// The run failed at the named stage; a failure notice may or may not
    /// have been delivered.
    Failure {
        /// Which stage the job failed at.
        stage: &'static str,
        /// Human-readable cause.
        message: String,
    },
}

/// Runs a single job end to end.
pub struct Executor {
    fetcher: Arc<dyn Fetcher>,
    mailer: Arc<dyn EmailSender>,
    script_timeout: Duration,
    mail_max_attempts: u32,
    mail_retry_pause: Duration,
    from_email: String,
}

impl Executor {
    /// Build an executor wired to the given fetcher and mailer
    /// implementations and the configured timeouts.
    #[must_use]
    pub fn new(fetcher: Arc<dyn Fetcher>, mailer: Arc<dyn EmailSender>, config: &AppConfig) -> Self {
        Self {
            fetcher,
            mailer,
            script_timeout: Duration::from_secs(config.script_timeout),
            mail_max_attempts: 2,
            mail_retry_pause: Duration::from_secs(5),
            from_email: config.smtp_from_email.clone().unwrap_or_default(),
        }
    }

    /// Run `job` to completion, returning whether it succeeded.
    ///
    /// Follows spec.md §4.5's five steps: fetch, transform, serialize,
    /// deliver, then (only on full success) advance `last_run`. A failure
    /// at fetch or transform triggers a best-effort failure notice to the
    /// job's recipients rather than silently dropping the run.
    pub async fn run(&self, job: &Job) -> RunOutcome {
        let table = match self.fetcher.fetch(&job.source).await {
            Ok(table) => table,
            Err(err) => {
                self.notify_failure(job, "fetch", &err.to_string()).await;
                return RunOutcome::Failure {
                    stage: "fetch",
                    message: err.to_string(),
                };
            }
        };

        let result = match sandbox::run(&job.transform, table, self.script_timeout).await {
            Ok(result) => result,
            Err(err) => {
                self.notify_failure(job, "transform", &err.to_string()).await;
                return RunOutcome::Failure {
                    stage: "transform",
                    message: err.to_string(),
                };
            }
        };

        let csv_bytes = match table_to_csv(&result) {
            Ok(bytes) => bytes,
            Err(err) => {
                self.notify_failure(job, "serialize", &err.to_string()).await;
                return RunOutcome::Failure {
                    stage: "serialize",
                    message: err.to_string(),
                };
            }
        };

        let run_time = format_run_time(Utc::now());
        let mut email = Email::builder()
            .from(self.from_email.clone())
            .subject(format!("Job Results: {} - {run_time}", job.name))
            .text(format!("Results for job \"{}\" are attached.", job.name))
            .attachment(
                format!("{}_{run_time}.csv", job.name),
                "text/csv",
                csv_bytes,
            );
        for recipient in &job.recipients {
            email = email.to(recipient.clone());
        }

        match send_with_retry(
            self.mailer.as_ref(),
            email,
            self.mail_max_attempts,
            self.mail_retry_pause,
        )
        .await
        {
            Ok(()) => RunOutcome::Success,
            Err(err) => {
                tracing::error!(job = %job.name, error = %err, "failed to deliver job result");
                RunOutcome::Failure {
                    stage: "deliver",
                    message: err.to_string(),
                }
            }
        }
    }

    /// Run only the fetch and transform stages and return the resulting
    /// CSV bytes, without sending any mail (spec.md §6:
    /// `POST /api/jobs/{name}/test` → `200` CSV blob). Used for on-demand
    /// previews; never advances `last_run` or delivers a failure notice.
    pub async fn preview(&self, job: &Job) -> Result<Vec<u8>, PreviewError> {
        let table = self
            .fetcher
            .fetch(&job.source)
            .await
            .map_err(|err| PreviewError {
                stage: "fetch",
                message: err.to_string(),
            })?;

        let result = sandbox::run(&job.transform, table, self.script_timeout)
            .await
            .map_err(|err| PreviewError {
                stage: "transform",
                message: err.to_string(),
            })?;

        table_to_csv(&result).map_err(|err| PreviewError {
            stage: "serialize",
            message: err.to_string(),
        })
    }

    async fn notify_failure(&self, job: &Job, stage: &str, message: &str) {
        tracing::error!(job = %job.name, stage, error = message, "job run failed");

        let run_time = format_run_time(Utc::now());
        let mut email = Email::builder()
            .from(self.from_email.clone())
            .subject(format!("Job Failed: {} - {run_time}", job.name))
            .text(format!(
                "Job \"{}\" failed at the {stage} stage: {message}",
                job.name
            ));
        for recipient in &job.recipients {
            email = email.to(recipient.clone());
        }

        if let Err(err) =
            send_with_retry(self.mailer.as_ref(), email, self.mail_max_attempts, self.mail_retry_pause)
                .await
        {
            tracing::warn!(job = %job.name, error = %err, "failed to deliver failure notice");
        }
    }
}

/// Render a run's completion time for subject lines and attachment names
/// (spec.md §4.4: `"Job Results: {job_name} - {run_time}"`,
/// `{job_name}_{run_time}.csv`). Colons are not filename-safe on every
/// target filesystem, so the attachment-facing form and the subject-facing
/// form share one rendering rather than diverging.
fn format_run_time(at: chrono::DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H-%M-%SZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::fetcher::MockFetcher;
    use crate::mailer::MockEmailSender;
    use crate::model::DataSource;
    use crate::table::Table;
    use serde_json::json;

    fn sample_job() -> Job {
        Job {
            name: "job-a".to_string(),
            schedule: "* * * * *".to_string(),
            source: DataSource::Api {
                location: "https://example.test/data".to_string(),
            },
            transform: "[]".to_string(),
            recipients: vec!["a@example.test".to_string()],
            created_at: Utc::now(),
            last_run: None,
        }
    }

    fn config() -> AppConfig {
        AppConfig {
            smtp_host: Some("smtp.example.test".to_string()),
            smtp_from_email: Some("noreply@example.test".to_string()),
            ..AppConfig::default()
        }
    }

    #[tokio::test]
    async fn preview_returns_csv_without_sending_mail() {
        let mut fetcher = MockFetcher::new();
        fetcher
            .expect_fetch()
            .returning(|_| Box::pin(async { Ok(Table::from_json(&json!([{"a": 1}])).unwrap()) }));

        // No expect_send() calls configured: a call would panic the mock.
        let mailer = MockEmailSender::new();

        let executor = Executor::new(Arc::new(fetcher), Arc::new(mailer), &config());
        let csv_bytes = executor.preview(&sample_job()).await.unwrap();
        assert!(String::from_utf8(csv_bytes).unwrap().contains('a'));
    }

    #[tokio::test]
    async fn successful_run_delivers_mail_once() {
        let mut fetcher = MockFetcher::new();
        fetcher
            .expect_fetch()
            .returning(|_| Box::pin(async { Ok(Table::from_json(&json!([{"a": 1}])).unwrap()) }));

        let mut mailer = MockEmailSender::new();
        mailer
            .expect_send()
            .times(1)
            .returning(|_| Box::pin(async { Ok(()) }));

        let executor = Executor::new(Arc::new(fetcher), Arc::new(mailer), &config());
        let outcome = executor.run(&sample_job()).await;
        assert!(matches!(outcome, RunOutcome::Success));
    }

    #[tokio::test]
    async fn success_email_subject_and_attachment_follow_the_documented_format() {
        let mut fetcher = MockFetcher::new();
        fetcher
            .expect_fetch()
            .returning(|_| Box::pin(async { Ok(Table::from_json(&json!([{"a": 1}])).unwrap()) }));

        let mut mailer = MockEmailSender::new();
        mailer
            .expect_send()
            .withf(|email| {
                email
                    .subject_text()
                    .is_some_and(|s| s.starts_with("Job Results: job-a - "))
                    && email
                        .attachments()
                        .first()
                        .is_some_and(|a| a.filename.starts_with("job-a_") && a.filename.ends_with(".csv"))
            })
            .times(1)
            .returning(|_| Box::pin(async { Ok(()) }));

        let executor = Executor::new(Arc::new(fetcher), Arc::new(mailer), &config());
        let outcome = executor.run(&sample_job()).await;
        assert!(matches!(outcome, RunOutcome::Success));
    }

    #[tokio::test]
    async fn fetch_failure_sends_failure_notice_not_result() {
        let mut fetcher = MockFetcher::new();
        fetcher
            .expect_fetch()
            .returning(|_| Box::pin(async { Err(FetchError::Permanent("boom".to_string())) }));

        let mut mailer = MockEmailSender::new();
        mailer
            .expect_send()
            .times(1)
            .returning(|_| Box::pin(async { Ok(()) }));

        let executor = Executor::new(Arc::new(fetcher), Arc::new(mailer), &config());
        let outcome = executor.run(&sample_job()).await;
        match outcome {
            RunOutcome::Failure { stage, .. } => assert_eq!(stage, "fetch"),
            RunOutcome::Success => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn transform_failure_is_reported() {
        let mut fetcher = MockFetcher::new();
        fetcher
            .expect_fetch()
            .returning(|_| Box::pin(async { Ok(Table::from_json(&json!([{"a": 1}])).unwrap()) }));

        let mut mailer = MockEmailSender::new();
        mailer
            .expect_send()
            .times(1)
            .returning(|_| Box::pin(async { Ok(()) }));

        let mut job = sample_job();
        job.transform = "not json".to_string();

        let executor = Executor::new(Arc::new(fetcher), Arc::new(mailer), &config());
        let outcome = executor.run(&job).await;
        match outcome {
            RunOutcome::Failure { stage, .. } => assert_eq!(stage, "transform"),
            RunOutcome::Success => panic!("expected failure"),
        }
    }
}
