//! Retrieves a job's input data and converts it into a [`Table`].

use crate::error::FetchError;
use crate::model::{DataSource, FileType};
use crate::table::Table;
use async_trait::async_trait;
use std::time::Duration;

/// Fetches input data for a [`DataSource`] (spec.md §4.2).
///
/// A trait rather than a concrete struct so the Executor can be tested
/// against a `mockall`-generated fake, the way the teacher's job context
/// holds `Arc<dyn EmailSender>` rather than a concrete mailer.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Retrieve and parse the data source into a table.
    async fn fetch(&self, source: &DataSource) -> Result<Table, FetchError>;
}

/// The production [`Fetcher`]: HTTP GET via `reqwest`, local file reads
/// via `tokio::fs`.
pub struct HttpFetcher {
    client: reqwest::Client,
    max_attempts: u32,
}

impl HttpFetcher {
    /// Build a fetcher whose HTTP requests time out after `timeout` and
    /// that retries transient failures up to 3 attempts total (spec.md
    /// §4.2).
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            max_attempts: 3,
        }
    }

    async fn fetch_api(&self, location: &str) -> Result<Table, FetchError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_fetch_api(location).await {
                Ok(table) => return Ok(table),
                Err(FetchError::Permanent(msg)) => return Err(FetchError::Permanent(msg)),
                Err(transient) if attempt >= self.max_attempts => return Err(transient),
                Err(transient) => {
                    let delay = Duration::from_millis(200 * 2u64.pow(attempt - 1));
                    tracing::warn!(%location, attempt, error = %transient, "retrying fetch");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn try_fetch_api(&self, location: &str) -> Result<Table, FetchError> {
        let response = self
            .client
            .get(location)
            .send()
            .await
            .map_err(|err| FetchError::Transient(err.to_string()))?;

        let status = response.status();
        if status.is_client_error() {
            return Err(FetchError::Permanent(format!(
                "request rejected with status {status}"
            )));
        }
        if status.is_server_error() {
            return Err(FetchError::Transient(format!(
                "server returned status {status}"
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|err| FetchError::Permanent(format!("invalid JSON response: {err}")))?;

        Table::from_json(&body).map_err(FetchError::Permanent)
    }

    async fn fetch_file(&self, location: &str, file_type: FileType) -> Result<Table, FetchError> {
        let bytes = tokio::fs::read(location).await.map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                FetchError::Permanent(format!("file not found: {location}"))
            } else {
                FetchError::Transient(err.to_string())
            }
        })?;

        match file_type {
            FileType::Json => {
                let value: serde_json::Value = serde_json::from_slice(&bytes)
                    .map_err(|err| FetchError::Permanent(format!("invalid JSON file: {err}")))?;
                Table::from_json(&value).map_err(FetchError::Permanent)
            }
            FileType::Csv => {
                let mut reader = csv::Reader::from_reader(bytes.as_slice());
                let header: Vec<String> = reader
                    .headers()
                    .map_err(|err| FetchError::Permanent(format!("invalid CSV header: {err}")))?
                    .iter()
                    .map(str::to_string)
                    .collect();

                let mut records = Vec::new();
                for result in reader.records() {
                    let record = result
                        .map_err(|err| FetchError::Permanent(format!("invalid CSV row: {err}")))?;
                    records.push(record.iter().map(str::to_string).collect());
                }

                Ok(Table::from_csv_records(header, records))
            }
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, source: &DataSource) -> Result<Table, FetchError> {
        match source {
            DataSource::Api { location } => self.fetch_api(location).await,
            DataSource::File { location, file_type } => {
                self.fetch_file(location, *file_type).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_is_permanent() {
        let fetcher = HttpFetcher::new(Duration::from_secs(5));
        let source = DataSource::File {
            location: "/nonexistent/path/data.json".to_string(),
            file_type: FileType::Json,
        };
        let err = fetcher.fetch(&source).await.unwrap_err();
        assert!(matches!(err, FetchError::Permanent(_)));
    }

    #[tokio::test]
    async fn csv_file_is_parsed_into_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.csv");
        tokio::fs::write(&path, "a,b\n1,2\n3,4\n").await.unwrap();

        let fetcher = HttpFetcher::new(Duration::from_secs(5));
        let source = DataSource::File {
            location: path.to_string_lossy().to_string(),
            file_type: FileType::Csv,
        };
        let table = fetcher.fetch(&source).await.unwrap();
        assert_eq!(table.columns, vec!["a", "b"]);
        assert_eq!(table.len(), 2);
    }

    #[tokio::test]
    async fn json_file_is_parsed_into_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        tokio::fs::write(&path, r#"[{"x": 1}, {"x": 2}]"#)
            .await
            .unwrap();

        let fetcher = HttpFetcher::new(Duration::from_secs(5));
        let source = DataSource::File {
            location: path.to_string_lossy().to_string(),
            file_type: FileType::Json,
        };
        let table = fetcher.fetch(&source).await.unwrap();
        assert_eq!(table.len(), 2);
    }
}
