//! Core data model: the persisted `Job` and its wire representation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a job's input data comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source_type", rename_all = "lowercase")]
pub enum DataSource {
    /// An HTTP GET endpoint returning JSON.
    Api {
        /// Request URL.
        location: String,
    },
    /// A local file, either CSV or JSON.
    File {
        /// Filesystem path, resolved relative to the project root.
        location: String,
        /// Format of the file.
        file_type: FileType,
    },
}

/// File formats accepted for `{file, ...}` sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    /// Comma-separated values with a header row.
    Csv,
    /// JSON array-of-objects or single object.
    Json,
}

/// The persisted configuration of one scheduled task.
///
/// `name` is the primary key (spec.md §3); `created_at` is set once at
/// creation and never changes; `last_run` only advances after a fully
/// successful run (spec.md §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier, opaque to the engine.
    pub name: String,
    /// Five-field cron expression (minute hour dom month dow).
    pub schedule: String,
    /// Where to fetch input data from.
    pub source: DataSource,
    /// Source text of the job's transform (see `sandbox` module).
    pub transform: String,
    /// Non-empty list of recipient email addresses.
    pub recipients: Vec<String>,
    /// When this job was created. Immutable.
    pub created_at: DateTime<Utc>,
    /// When this job last completed successfully, if ever.
    pub last_run: Option<DateTime<Utc>>,
}

/// Wire schema for job creation/update requests (spec.md §6).
///
/// Field names intentionally differ from [`Job`]'s Rust-native names; the
/// `From`/`TryFrom` conversions below are the only place the two schemas
/// meet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobCreateDto {
    /// Job name (primary key).
    pub job_name: String,
    /// Cron expression.
    pub schedule_time: String,
    /// Input data source.
    pub data_source: DataSourceDto,
    /// Transform source text.
    pub processing_script: String,
    /// Recipient email addresses; must be non-empty.
    pub consumer_emails: Vec<String>,
}

/// Wire schema for [`DataSource`]; `file_type` is only meaningful for
/// `source_type == "file"` and is validated, not type-enforced, at the
/// API boundary (spec.md §3: "`file_type` required iff variant = file").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSourceDto {
    /// `"api"` or `"file"`.
    pub source_type: String,
    /// URL (api) or path (file).
    pub location: String,
    /// `"csv"` or `"json"`, required iff `source_type == "file"`.
    #[serde(default)]
    pub file_type: Option<String>,
}

/// Wire schema for a [`Job`] returned from the API: the create DTO plus
/// the two server-assigned timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDto {
    /// Job name.
    pub job_name: String,
    /// Cron expression.
    pub schedule_time: String,
    /// Input data source.
    pub data_source: DataSourceDto,
    /// Transform source text.
    pub processing_script: String,
    /// Recipient email addresses.
    pub consumer_emails: Vec<String>,
    /// Creation timestamp, ISO-8601.
    pub created_at: DateTime<Utc>,
    /// Last successful run timestamp, ISO-8601, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
}

impl JobCreateDto {
    /// Validate and convert a wire-level creation/update request into the
    /// internal [`Job`] representation (spec.md §4.7).
    ///
    /// `created_at` is stamped fresh; callers updating an existing job
    /// discard it via [`crate::store::Store::replace`], which preserves
    /// the original.
    ///
    /// # Errors
    ///
    /// Returns a human-readable message on the first validation failure:
    /// an empty name, an empty recipient list, a malformed recipient
    /// address, a `file` source missing `file_type`, or transform text
    /// that isn't valid JSON.
    pub fn into_job(self) -> Result<Job, String> {
        if self.job_name.trim().is_empty() {
            return Err("job_name must not be empty".to_string());
        }
        if self.consumer_emails.is_empty() {
            return Err("consumer_emails must not be empty".to_string());
        }
        for address in &self.consumer_emails {
            if !is_plausible_email(address) {
                return Err(format!("invalid recipient address: {address}"));
            }
        }
        if serde_json::from_str::<serde_json::Value>(&self.processing_script).is_err() {
            return Err("processing_script must be valid JSON".to_string());
        }

        let source = match self.data_source.source_type.as_str() {
            "api" => DataSource::Api {
                location: self.data_source.location,
            },
            "file" => {
                let file_type = match self.data_source.file_type.as_deref() {
                    Some("csv") => FileType::Csv,
                    Some("json") => FileType::Json,
                    Some(other) => return Err(format!("unsupported file_type: {other}")),
                    None => return Err("file_type is required for file sources".to_string()),
                };
                DataSource::File {
                    location: self.data_source.location,
                    file_type,
                }
            }
            other => return Err(format!("unsupported source_type: {other}")),
        };

        Ok(Job {
            name: self.job_name,
            schedule: self.schedule_time,
            source,
            transform: self.processing_script,
            recipients: self.consumer_emails,
            created_at: Utc::now(),
            last_run: None,
        })
    }
}

fn is_plausible_email(address: &str) -> bool {
    let Some((local, domain)) = address.split_once('@') else {
        return false;
    };
    !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
}

impl From<&Job> for JobDto {
    fn from(job: &Job) -> Self {
        let data_source = match &job.source {
            DataSource::Api { location } => DataSourceDto {
                source_type: "api".to_string(),
                location: location.clone(),
                file_type: None,
            },
            DataSource::File { location, file_type } => DataSourceDto {
                source_type: "file".to_string(),
                location: location.clone(),
                file_type: Some(match file_type {
                    FileType::Csv => "csv".to_string(),
                    FileType::Json => "json".to_string(),
                }),
            },
        };

        Self {
            job_name: job.name.clone(),
            schedule_time: job.schedule.clone(),
            data_source,
            processing_script: job.transform.clone(),
            consumer_emails: job.recipients.clone(),
            created_at: job.created_at,
            last_run: job.last_run,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_dto_roundtrip_preserves_fields() {
        let job = Job {
            name: "j1".to_string(),
            schedule: "* * * * *".to_string(),
            source: DataSource::Api {
                location: "https://example.test/arr".to_string(),
            },
            transform: "[]".to_string(),
            recipients: vec!["x@y.test".to_string()],
            created_at: Utc::now(),
            last_run: None,
        };

        let dto = JobDto::from(&job);
        assert_eq!(dto.job_name, "j1");
        assert_eq!(dto.data_source.source_type, "api");
        assert!(dto.last_run.is_none());
    }

    fn create_dto() -> JobCreateDto {
        JobCreateDto {
            job_name: "job-a".to_string(),
            schedule_time: "* * * * *".to_string(),
            data_source: DataSourceDto {
                source_type: "api".to_string(),
                location: "https://example.test/data".to_string(),
                file_type: None,
            },
            processing_script: "[]".to_string(),
            consumer_emails: vec!["a@example.test".to_string()],
        }
    }

    #[test]
    fn valid_create_dto_converts() {
        assert!(create_dto().into_job().is_ok());
    }

    #[test]
    fn empty_recipients_is_rejected() {
        let mut dto = create_dto();
        dto.consumer_emails.clear();
        assert!(dto.into_job().is_err());
    }

    #[test]
    fn file_source_without_file_type_is_rejected() {
        let mut dto = create_dto();
        dto.data_source.source_type = "file".to_string();
        dto.data_source.file_type = None;
        assert!(dto.into_job().is_err());
    }

    #[test]
    fn malformed_transform_json_is_rejected() {
        let mut dto = create_dto();
        dto.processing_script = "not json".to_string();
        assert!(dto.into_job().is_err());
    }

    #[test]
    fn implausible_email_is_rejected() {
        let mut dto = create_dto();
        dto.consumer_emails = vec!["not-an-email".to_string()];
        assert!(dto.into_job().is_err());
    }
}
