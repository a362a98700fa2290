//! Job management endpoints.
//!
//! | Method | Path                 | Effect                                  |
//! |--------|----------------------|-----------------------------------------|
//! | GET    | `/jobs[?status=..]`  | list jobs, optionally by status         |
//! | POST   | `/jobs`              | validate, persist and arm a new job     |
//! | GET    | `/jobs/{id}`         | fetch one job                           |
//! | PUT    | `/jobs/{id}`         | edit a scheduled job and re-arm it      |
//! | POST   | `/jobs/{id}/cancel`  | cancel a scheduled job (idempotent)     |

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use blaster_core::{BlasterError, BroadcastJob, JobId, JobStatus};
use blaster_scheduler::{JobDraft, SchedulerError};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

use crate::app::AppState;

#[derive(Serialize)]
pub struct ApiErrorBody {
    pub code: &'static str,
    pub error: String,
}

/// Error response: status code plus `{ "code", "error" }` body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn not_found(id: &JobId) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "JOB_NOT_FOUND",
            message: format!("Job not found: {id}"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ApiErrorBody {
                code: self.code,
                error: self.message,
            }),
        )
            .into_response()
    }
}

impl From<BlasterError> for ApiError {
    fn from(e: BlasterError) -> Self {
        let status = match e {
            BlasterError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNPROCESSABLE_ENTITY,
        };
        Self {
            status,
            code: e.code(),
            message: e.to_string(),
        }
    }
}

impl From<SchedulerError> for ApiError {
    fn from(e: SchedulerError) -> Self {
        let (status, code) = match e {
            SchedulerError::JobNotFound { .. } => (StatusCode::NOT_FOUND, "JOB_NOT_FOUND"),
            SchedulerError::NotEditable { .. } => (StatusCode::CONFLICT, "NOT_EDITABLE"),
            SchedulerError::Running { .. } => (StatusCode::CONFLICT, "JOB_RUNNING"),
            _ => {
                error!(error = %e, "job store failure");
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL")
            }
        };
        Self {
            status,
            code,
            message: e.to_string(),
        }
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
}

#[derive(Serialize)]
pub struct CancelReply {
    pub cancelled: bool,
    pub job: BroadcastJob,
}

/// GET /jobs: every job, newest schedule last; `?status=` filters.
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<BroadcastJob>>> {
    let jobs = match query.status.as_deref() {
        Some(raw) => {
            let status: JobStatus = raw.parse().map_err(|_| ApiError {
                status: StatusCode::BAD_REQUEST,
                code: "INVALID_STATUS",
                message: format!("unknown status: {raw}"),
            })?;
            state.store.list_by_status(status)?
        }
        None => state.store.list_all()?,
    };
    Ok(Json(jobs))
}

/// POST /jobs: validate a draft, persist it as `scheduled` and arm its timer.
pub async fn create_job(
    State(state): State<Arc<AppState>>,
    Json(draft): Json<JobDraft>,
) -> ApiResult<(StatusCode, Json<BroadcastJob>)> {
    let now = Utc::now();
    let job = draft.validate(&state.phone, state.grace(), now)?.into_job(now);
    state.store.insert(&job)?;
    state.scheduler.arm(&job)?;
    info!(
        job_id = %job.id,
        scheduled_at = %job.scheduled_at,
        recipients = job.recipients.len(),
        "job created"
    );
    Ok((StatusCode::CREATED, Json(reload(&state, &job.id)?)))
}

/// GET /jobs/{id}
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<BroadcastJob>> {
    Ok(Json(reload(&state, &JobId::from(id))?))
}

/// PUT /jobs/{id}: replace the editable fields and re-arm for the new time.
/// Uploads the new attachment list no longer names are deleted.
pub async fn edit_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(draft): Json<JobDraft>,
) -> ApiResult<Json<BroadcastJob>> {
    let id = JobId::from(id);
    let mut job = reload(&state, &id)?;
    if job.status != JobStatus::Scheduled {
        return Err(SchedulerError::NotEditable {
            id: id.to_string(),
            status: job.status.to_string(),
        }
        .into());
    }
    let now = Utc::now();
    draft
        .validate(&state.phone, state.grace(), now)?
        .apply_to(&mut job, now);
    state.scheduler.reschedule(&job)?;
    info!(job_id = %id, scheduled_at = %job.scheduled_at, "job rescheduled");
    Ok(Json(reload(&state, &id)?))
}

/// POST /jobs/{id}/cancel: `cancelled: false` when the job had already
/// left `scheduled` (or is being delivered right now). A cancelled job's
/// uploads are deleted.
pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<CancelReply>> {
    let id = JobId::from(id);
    let cancelled = state.scheduler.cancel(&id)?;
    let job = reload(&state, &id)?;
    Ok(Json(CancelReply { cancelled, job }))
}

fn reload(state: &AppState, id: &JobId) -> ApiResult<BroadcastJob> {
    state.store.get(id)?.ok_or_else(|| ApiError::not_found(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{build_router, AppState};
    use crate::ws::broadcast::EventBroadcaster;
    use axum::{body::Body, http::Request, Router};
    use blaster_core::config::BlasterConfig;
    use blaster_delivery::{AttachmentResolver, FsStorage, TransportSlot};
    use blaster_scheduler::{FiredJob, JobScheduler, JobStore, ResultReporter, SqliteJobStore};
    use serde_json::{json, Value};
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    struct TestApp {
        router: Router,
        state: Arc<AppState>,
        uploads: tempfile::TempDir,
        _fired: mpsc::Receiver<FiredJob>,
    }

    fn app() -> TestApp {
        let uploads = tempfile::tempdir().unwrap();
        let config = BlasterConfig::default();
        let store: Arc<dyn JobStore> = Arc::new(
            SqliteJobStore::new(rusqlite::Connection::open_in_memory().unwrap()).unwrap(),
        );
        let broadcaster = Arc::new(EventBroadcaster::new());
        let reporter = Arc::new(ResultReporter::new(store.clone(), broadcaster.clone()));
        let (tx, rx) = mpsc::channel(8);
        let sweeper = AttachmentResolver::new(Arc::new(FsStorage::new(uploads.path())));
        let scheduler = Arc::new(
            JobScheduler::new(store.clone(), reporter, crate::app::grace(&config), tx)
                .with_sweeper(Arc::new(sweeper)),
        );
        let state = Arc::new(AppState::new(
            config,
            store,
            scheduler,
            broadcaster,
            TransportSlot::empty(),
        ));
        TestApp {
            router: build_router(state.clone()),
            state,
            uploads,
            _fired: rx,
        }
    }

    async fn call(
        router: &Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(v) => {
                req = req.header("content-type", "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        let resp = router
            .clone()
            .oneshot(req.body(body).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    fn draft(at: chrono::DateTime<Utc>) -> Value {
        json!({
            "recipients": ["0811-1111-1111", "+62 822 2222 2222", "081111111111"],
            "message_body": "Halo",
            "scheduled_at": at,
        })
    }

    #[tokio::test]
    async fn create_normalizes_and_arms() {
        let t = app();
        let (status, body) = call(
            &t.router,
            "POST",
            "/jobs",
            Some(draft(Utc::now() + chrono::Duration::hours(1))),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["status"], "scheduled");
        assert_eq!(body["recipients"], json!(["081111111111", "082222222222"]));
        let id = JobId::from(body["id"].as_str().unwrap());
        assert!(t.state.scheduler.is_armed(&id));
    }

    #[tokio::test]
    async fn create_rejects_bad_drafts() {
        let t = app();
        let (status, body) = call(
            &t.router,
            "POST",
            "/jobs",
            Some(json!({
                "recipients": ["INVALID"],
                "message_body": "Halo",
                "scheduled_at": Utc::now() + chrono::Duration::hours(1),
            })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["code"], "INVALID_RECIPIENT");

        let (status, body) = call(
            &t.router,
            "POST",
            "/jobs",
            Some(draft(Utc::now() - chrono::Duration::minutes(5))),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["code"], "SCHEDULE_REJECTED");
        assert_eq!(t.state.scheduler.armed_count(), 0);
    }

    #[tokio::test]
    async fn edit_then_cancel_is_idempotent() {
        let t = app();
        let (_, created) = call(
            &t.router,
            "POST",
            "/jobs",
            Some(draft(Utc::now() + chrono::Duration::hours(1))),
        )
        .await;
        let id = created["id"].as_str().unwrap().to_string();

        let later = Utc::now() + chrono::Duration::hours(3);
        let (status, edited) = call(
            &t.router,
            "PUT",
            &format!("/jobs/{id}"),
            Some(json!({
                "recipients": ["083333333333"],
                "message_body": "Rapat diundur",
                "scheduled_at": later,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(edited["recipients"], json!(["083333333333"]));
        assert_eq!(edited["message_body"], "Rapat diundur");

        let (status, first) = call(&t.router, "POST", &format!("/jobs/{id}/cancel"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["cancelled"], true);
        assert_eq!(first["job"]["status"], "cancelled");

        let (_, second) = call(&t.router, "POST", &format!("/jobs/{id}/cancel"), None).await;
        assert_eq!(second["cancelled"], false);

        let (status, body) = call(
            &t.router,
            "PUT",
            &format!("/jobs/{id}"),
            Some(draft(Utc::now() + chrono::Duration::hours(1))),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "NOT_EDITABLE");
    }

    /// Background deletes finish within a second.
    async fn removed(path: &std::path::Path) -> bool {
        for _ in 0..100 {
            if !path.exists() {
                return true;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn edit_and_cancel_delete_unused_uploads() {
        let t = app();
        for name in ["flyer.png", "agenda.pdf"] {
            std::fs::write(t.uploads.path().join(name), b"file").unwrap();
        }
        let upload = |name: &str| {
            json!({
                "storage_path": name,
                "display_name": name,
                "mime_type": "application/octet-stream",
                "size_bytes": 4,
            })
        };
        let at = Utc::now() + chrono::Duration::hours(1);
        let (status, created) = call(
            &t.router,
            "POST",
            "/jobs",
            Some(json!({
                "recipients": ["081111111111"],
                "attachments": [upload("flyer.png")],
                "scheduled_at": at,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = created["id"].as_str().unwrap().to_string();

        let (status, _) = call(
            &t.router,
            "PUT",
            &format!("/jobs/{id}"),
            Some(json!({
                "recipients": ["081111111111"],
                "attachments": [upload("agenda.pdf")],
                "scheduled_at": at,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(removed(&t.uploads.path().join("flyer.png")).await);
        assert!(t.uploads.path().join("agenda.pdf").exists());

        let (_, cancelled) = call(&t.router, "POST", &format!("/jobs/{id}/cancel"), None).await;
        assert_eq!(cancelled["cancelled"], true);
        assert!(removed(&t.uploads.path().join("agenda.pdf")).await);
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let t = app();
        let (status, body) = call(&t.router, "GET", "/jobs/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "JOB_NOT_FOUND");
        let (status, _) = call(&t.router, "POST", "/jobs/nope/cancel", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn list_filters_by_status() {
        let t = app();
        for _ in 0..2 {
            call(
                &t.router,
                "POST",
                "/jobs",
                Some(draft(Utc::now() + chrono::Duration::hours(1))),
            )
            .await;
        }
        let (_, all) = call(&t.router, "GET", "/jobs", None).await;
        let id = all[0]["id"].as_str().unwrap().to_string();
        call(&t.router, "POST", &format!("/jobs/{id}/cancel"), None).await;

        let (_, scheduled) = call(&t.router, "GET", "/jobs?status=scheduled", None).await;
        let (_, cancelled) = call(&t.router, "GET", "/jobs?status=cancelled", None).await;
        assert_eq!(scheduled.as_array().unwrap().len(), 1);
        assert_eq!(cancelled.as_array().unwrap().len(), 1);

        let (status, body) = call(&t.router, "GET", "/jobs?status=bogus", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_STATUS");
    }

    #[tokio::test]
    async fn health_reports_transport_and_timers() {
        let t = app();
        let (status, body) = call(&t.router, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["transport_ready"], false);
        assert_eq!(body["armed_jobs"], 0);
        assert!(body["git_sha"].as_str().is_some_and(|sha| !sha.is_empty()));
        assert!(body["build_profile"].is_string());
    }
}
