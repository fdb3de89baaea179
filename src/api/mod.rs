//! The Control API (spec.md §4.7, §6): HTTP management of jobs.
//!
//! Handlers follow the teacher's `handlers::job_admin` shape: thin async
//! functions over `State<AppState>`, returning `Result<Response, ApiError>`,
//! logging at the admin-action granularity.

use crate::error::ApiError;
use crate::model::{JobCreateDto, JobDto};
use crate::scheduler::{parse_schedule, LastOutcome};
use crate::state::AppState;
use crate::uploads::UploadStorage;
use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde_json::json;

/// Build the Control API router over shared [`AppState`].
///
/// Management paths live under `/api/jobs` (spec.md §6); `/healthz` is
/// the one route outside that prefix, since it's a platform-level probe
/// rather than a job-management operation.
#[must_use]
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(health))
        .route("/api/jobs", get(list_jobs))
        .route("/api/jobs/create", post(create_job))
        .route("/api/jobs/upload-file", post(upload_file))
        .route(
            "/api/jobs/{name}",
            get(get_job).put(update_job).delete(delete_job),
        )
        .route("/api/jobs/{name}/test", post(test_job))
        .route("/api/jobs/{name}/last-result", get(last_result))
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn list_jobs(State(state): State<AppState>) -> Response {
    let jobs: Vec<JobDto> = state.store.list().await.iter().map(JobDto::from).collect();
    Json(jobs).into_response()
}

async fn get_job(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let job = state.store.get(&name).await?;
    Ok(Json(JobDto::from(&job)).into_response())
}

async fn create_job(
    State(state): State<AppState>,
    Json(dto): Json<JobCreateDto>,
) -> Result<Response, ApiError> {
    let job = dto.into_job().map_err(ApiError::Validation)?;

    // Order per spec: Store.put, then Scheduler.register; if register
    // fails (e.g. a malformed cron expression), Store.remove undoes the
    // put so the two stay in agreement.
    state.store.put(job.clone()).await?;
    if let Err(err) = state.scheduler.register(job.clone()) {
        let _ = state.store.remove(&job.name).await;
        return Err(err.into());
    }

    tracing::info!(job = %job.name, "job created");
    Ok((StatusCode::CREATED, Json(JobDto::from(&job))).into_response())
}

async fn update_job(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(dto): Json<JobCreateDto>,
) -> Result<Response, ApiError> {
    if dto.job_name != name {
        return Err(ApiError::Validation(
            "job_name in body must match the path".to_string(),
        ));
    }

    let job = dto.into_job().map_err(ApiError::Validation)?;

    // Validate the cron before touching Store or Scheduler: unregister is
    // not reversible, so a malformed schedule must be rejected up front
    // rather than discovered only when the final `register` runs, which
    // would otherwise leave the Store holding a definition the Scheduler
    // has no entry for.
    parse_schedule(&job.schedule).map_err(|err| ApiError::Validation(err.to_string()))?;

    // Order per spec: Scheduler.unregister, then Store.replace, then
    // Scheduler.register with the new definition.
    state.scheduler.unregister(&name);
    state.store.replace(&name, job.clone()).await?;
    state.scheduler.register(job.clone())?;

    tracing::info!(job = %name, "job updated");
    Ok(Json(JobDto::from(&job)).into_response())
}

async fn delete_job(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    // Order per spec: Scheduler.unregister, then Store.remove.
    state.scheduler.unregister(&name);
    state.store.remove(&name).await?;

    tracing::info!(job = %name, "job deleted");
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn test_job(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let csv_bytes = state.scheduler.preview(&name).await?;
    tracing::info!(job = %name, "on-demand preview run completed");

    Ok((
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/csv")],
        csv_bytes,
    )
        .into_response())
}

async fn last_result(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    // Confirm the job exists so a typo reads as 404, not an empty body.
    state.store.get(&name).await?;

    let body = state.scheduler.last_result(&name).map_or_else(
        || json!({ "status": "never run" }),
        |result| match result.outcome {
            LastOutcome::Success => json!({ "status": "success", "at": result.at }),
            LastOutcome::Failure { stage, message } => {
                json!({ "status": "failure", "at": result.at, "stage": stage, "message": message })
            }
        },
    );

    Ok(Json(body).into_response())
}

async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let storage = UploadStorage::new(state.config.upload_dir.clone());

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::Validation(err.to_string()))?
    {
        let filename = field.file_name().unwrap_or("upload").to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|err| ApiError::Validation(err.to_string()))?;

        let stored_name = storage.store(&filename, &bytes).await?;
        let canonical_path = format!("/data/uploads/{}", stored_name.display());
        tracing::info!(file = %filename, path = %canonical_path, "upload stored");

        return Ok(Json(json!({
            "filename": filename,
            "path": canonical_path,
            "size": bytes.len(),
        }))
        .into_response());
    }

    Err(ApiError::Validation("no file field in upload".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::executor::Executor;
    use crate::fetcher::MockFetcher;
    use crate::mailer::MockEmailSender;
    use crate::scheduler::Scheduler;
    use crate::store::Store;
    use axum_test::TestServer;
    use serde_json::json;
    use std::sync::Arc;

    async fn test_state() -> AppState {
        let dir = tempfile::tempdir().unwrap();
        let dir_path = dir.path().to_path_buf();
        // Leaked deliberately: the TempDir must outlive this function for
        // the duration of the test, and test_state has no owner to hand
        // it back to.
        std::mem::forget(dir);
        let config = Arc::new(AppConfig {
            smtp_host: Some("smtp.example.test".to_string()),
            smtp_from_email: Some("noreply@example.test".to_string()),
            job_storage_path: dir_path.join("jobs.json"),
            upload_dir: dir_path.join("uploads"),
            ..AppConfig::default()
        });
        let store = Arc::new(Store::load(&config.job_storage_path).await.unwrap());

        let fetcher = Arc::new(MockFetcher::new());
        let mailer = Arc::new(MockEmailSender::new());
        let executor = Arc::new(Executor::new(fetcher, mailer, &config));
        let scheduler = Arc::new(Scheduler::new(executor, Arc::clone(&store)));

        AppState {
            config,
            store,
            scheduler,
        }
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let app = router().with_state(test_state().await);
        let server = TestServer::new(app).unwrap();
        let response = server.get("/healthz").await;
        response.assert_status_ok();
    }

    #[tokio::test]
    async fn create_then_list_returns_the_job() {
        let app = router().with_state(test_state().await);
        let server = TestServer::new(app).unwrap();

        let body = json!({
            "job_name": "job-a",
            "schedule_time": "* * * * *",
            "data_source": {"source_type": "api", "location": "https://example.test/data"},
            "processing_script": "[]",
            "consumer_emails": ["a@example.test"]
        });

        let create = server.post("/api/jobs/create").json(&body).await;
        create.assert_status(StatusCode::CREATED);

        let list = server.get("/api/jobs").await;
        let jobs: Vec<JobDto> = list.json();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].job_name, "job-a");
    }

    #[tokio::test]
    async fn create_with_duplicate_name_is_rejected() {
        let app = router().with_state(test_state().await);
        let server = TestServer::new(app).unwrap();

        let body = json!({
            "job_name": "job-a",
            "schedule_time": "* * * * *",
            "data_source": {"source_type": "api", "location": "https://example.test/data"},
            "processing_script": "[]",
            "consumer_emails": ["a@example.test"]
        });

        server.post("/api/jobs/create").json(&body).await.assert_status(StatusCode::CREATED);
        server
            .post("/api/jobs/create")
            .json(&body)
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn delete_missing_job_returns_404() {
        let app = router().with_state(test_state().await);
        let server = TestServer::new(app).unwrap();
        server
            .delete("/api/jobs/does-not-exist")
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_endpoint_on_unknown_job_returns_404() {
        let app = router().with_state(test_state().await);
        let server = TestServer::new(app).unwrap();
        server
            .post("/api/jobs/does-not-exist/test")
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn create_with_malformed_cron_is_rejected_and_not_left_in_store() {
        let app = router().with_state(test_state().await);
        let server = TestServer::new(app).unwrap();

        let body = json!({
            "job_name": "job-a",
            "schedule_time": "not a cron expression",
            "data_source": {"source_type": "api", "location": "https://example.test/data"},
            "processing_script": "[]",
            "consumer_emails": ["a@example.test"]
        });

        server
            .post("/api/jobs/create")
            .json(&body)
            .await
            .assert_status(StatusCode::BAD_REQUEST);

        let list = server.get("/api/jobs").await;
        let jobs: Vec<JobDto> = list.json();
        assert!(jobs.is_empty());
    }

    #[tokio::test]
    async fn update_with_malformed_cron_leaves_the_original_job_intact() {
        let app = router().with_state(test_state().await);
        let server = TestServer::new(app).unwrap();

        let create_body = json!({
            "job_name": "job-a",
            "schedule_time": "* * * * *",
            "data_source": {"source_type": "api", "location": "https://example.test/data"},
            "processing_script": "[]",
            "consumer_emails": ["a@example.test"]
        });
        server
            .post("/api/jobs/create")
            .json(&create_body)
            .await
            .assert_status(StatusCode::CREATED);

        let update_body = json!({
            "job_name": "job-a",
            "schedule_time": "not a cron expression",
            "data_source": {"source_type": "api", "location": "https://example.test/data"},
            "processing_script": "[]",
            "consumer_emails": ["a@example.test"]
        });
        server
            .put("/api/jobs/job-a")
            .json(&update_body)
            .await
            .assert_status(StatusCode::BAD_REQUEST);

        let job: JobDto = server.get("/api/jobs/job-a").await.json();
        assert_eq!(job.schedule_time, "* * * * *");
    }
}
