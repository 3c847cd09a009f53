use std::sync::Arc;

use axum::{
    async_trait,
    body::Bytes,
    extract::{FromRequestParts, Path, Query, State},
    http::{header, request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::AppError;
use crate::files::StorageError;
use crate::workflows::roster::{VisitorExporter, VisitorImporter};

use super::domain::{
    DocumentId, DocumentTypeId, DocumentVersion, DocumentVersionId, EventId, VisitorId,
};
use super::repository::ConfirmationRepository;
use super::service::{
    reference_date, ConfirmationService, ConfirmationServiceError, FileUpload, NewDocumentUpload,
};

/// Router builder exposing the confirmation, document and roster endpoints.
pub fn confirmation_router<R>(service: Arc<ConfirmationService<R>>) -> Router
where
    R: ConfirmationRepository + 'static,
{
    Router::new()
        .route(
            "/api/v1/events/:event_id/required-documents",
            get(required_documents_handler::<R>),
        )
        .route(
            "/api/v1/events/:event_id/visitors/:visitor_id/confirmations",
            get(status_handler::<R>).post(confirm_handler::<R>),
        )
        .route("/api/v1/documents", post(create_document_handler::<R>))
        .route(
            "/api/v1/documents/:document_id/versions",
            get(versions_handler::<R>).post(upload_version_handler::<R>),
        )
        .route(
            "/api/v1/documents/:document_id/current-version",
            post(current_version_handler::<R>),
        )
        .route(
            "/api/v1/confirmations/outstanding",
            get(outstanding_handler::<R>),
        )
        .route("/api/v1/reminders", post(reminders_handler::<R>))
        .route("/api/v1/visitors/import", post(import_handler::<R>))
        .route("/api/v1/visitors/export", get(export_handler::<R>))
        .route("/files/*path", get(file_handler::<R>))
        .with_state(service)
}

/// Identity resolved upstream and forwarded as headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: String,
    pub visitor_id: Option<VisitorId>,
    pub is_admin: bool,
}

impl Actor {
    pub fn may_act_for(&self, visitor_id: VisitorId) -> bool {
        self.is_admin || self.visitor_id == Some(visitor_id)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = header_str(parts, "x-user-id")
            .ok_or_else(|| error_response(StatusCode::UNAUTHORIZED, "missing x-user-id header"))?
            .to_string();
        let visitor_id = header_str(parts, "x-visitor-id")
            .map(str::parse::<VisitorId>)
            .transpose()
            .map_err(|_| error_response(StatusCode::BAD_REQUEST, "invalid x-visitor-id header"))?;
        let is_admin = header_str(parts, "x-admin")
            .map(|value| value.eq_ignore_ascii_case("true") || value == "1")
            .unwrap_or(false);

        Ok(Actor {
            user_id,
            visitor_id,
            is_admin,
        })
    }
}

fn header_str<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

#[derive(Debug, Deserialize)]
pub(crate) struct ConfirmRequest {
    pub(crate) document_id: DocumentId,
    pub(crate) version_id: DocumentVersionId,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CurrentVersionRequest {
    pub(crate) version_id: DocumentVersionId,
}

#[derive(Debug, Deserialize)]
pub(crate) struct VersionUploadQuery {
    pub(crate) file_name: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DocumentUploadQuery {
    pub(crate) document_type_id: DocumentTypeId,
    pub(crate) title: String,
    pub(crate) event_id: Option<EventId>,
    pub(crate) file_name: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReminderQuery {
    pub(crate) today: Option<NaiveDate>,
    pub(crate) event_id: Option<EventId>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ExportQuery {
    pub(crate) event: Option<String>,
}

#[derive(Debug, Serialize)]
struct VersionView {
    #[serde(flatten)]
    version: DocumentVersion,
    url: String,
}

#[derive(Debug, Serialize)]
struct OutstandingView {
    event_id: EventId,
    event_name: String,
    starts_on: NaiveDate,
    visitor_id: VisitorId,
    visitor_name: String,
    email: String,
    required_count: usize,
    confirmed_count: usize,
    stale_count: usize,
    missing_count: usize,
}

pub(crate) async fn required_documents_handler<R>(
    State(service): State<Arc<ConfirmationService<R>>>,
    _actor: Actor,
    Path(event_id): Path<EventId>,
) -> Response
where
    R: ConfirmationRepository + 'static,
{
    match service.resolve_required_documents(event_id).await {
        Ok(documents) => (StatusCode::OK, Json(documents)).into_response(),
        Err(error) => service_error_response(error),
    }
}

pub(crate) async fn status_handler<R>(
    State(service): State<Arc<ConfirmationService<R>>>,
    actor: Actor,
    Path((event_id, visitor_id)): Path<(EventId, VisitorId)>,
) -> Response
where
    R: ConfirmationRepository + 'static,
{
    if !actor.may_act_for(visitor_id) {
        return forbidden();
    }
    match service.resolve_confirmation_status(visitor_id, event_id).await {
        Ok(status) => (StatusCode::OK, Json(status)).into_response(),
        Err(error) => service_error_response(error),
    }
}

pub(crate) async fn confirm_handler<R>(
    State(service): State<Arc<ConfirmationService<R>>>,
    actor: Actor,
    Path((event_id, visitor_id)): Path<(EventId, VisitorId)>,
    Json(request): Json<ConfirmRequest>,
) -> Response
where
    R: ConfirmationRepository + 'static,
{
    if !actor.may_act_for(visitor_id) {
        return forbidden();
    }
    match service
        .record_confirmation(visitor_id, event_id, request.document_id, request.version_id)
        .await
    {
        Ok(receipt) => {
            let status = if receipt.created {
                StatusCode::CREATED
            } else {
                StatusCode::OK
            };
            (status, Json(receipt)).into_response()
        }
        Err(error) => service_error_response(error),
    }
}

pub(crate) async fn versions_handler<R>(
    State(service): State<Arc<ConfirmationService<R>>>,
    actor: Actor,
    Path(document_id): Path<DocumentId>,
) -> Response
where
    R: ConfirmationRepository + 'static,
{
    if !actor.is_admin {
        return forbidden();
    }
    match service.document_versions(document_id).await {
        Ok(versions) => {
            let views: Vec<VersionView> = versions
                .into_iter()
                .map(|version| VersionView {
                    url: service.version_url(&version),
                    version,
                })
                .collect();
            (StatusCode::OK, Json(views)).into_response()
        }
        Err(error) => service_error_response(error),
    }
}

pub(crate) async fn upload_version_handler<R>(
    State(service): State<Arc<ConfirmationService<R>>>,
    actor: Actor,
    Path(document_id): Path<DocumentId>,
    Query(query): Query<VersionUploadQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response
where
    R: ConfirmationRepository + 'static,
{
    if !actor.is_admin {
        return forbidden();
    }
    let file = FileUpload {
        file_name: query.file_name,
        content_type: content_type(&headers),
        bytes: body.to_vec(),
    };
    match service.upload_version(document_id, file).await {
        Ok(version) => {
            let view = VersionView {
                url: service.version_url(&version),
                version,
            };
            (StatusCode::CREATED, Json(view)).into_response()
        }
        Err(error) => service_error_response(error),
    }
}

pub(crate) async fn create_document_handler<R>(
    State(service): State<Arc<ConfirmationService<R>>>,
    actor: Actor,
    Query(query): Query<DocumentUploadQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response
where
    R: ConfirmationRepository + 'static,
{
    if !actor.is_admin {
        return forbidden();
    }
    let upload = NewDocumentUpload {
        document_type_id: query.document_type_id,
        title: query.title,
        event_id: query.event_id,
        file: FileUpload {
            file_name: query.file_name,
            content_type: content_type(&headers),
            bytes: body.to_vec(),
        },
    };
    match service.upload_document(upload).await {
        Ok(uploaded) => (StatusCode::CREATED, Json(uploaded)).into_response(),
        Err(error) => service_error_response(error),
    }
}

pub(crate) async fn current_version_handler<R>(
    State(service): State<Arc<ConfirmationService<R>>>,
    actor: Actor,
    Path(document_id): Path<DocumentId>,
    Json(request): Json<CurrentVersionRequest>,
) -> Response
where
    R: ConfirmationRepository + 'static,
{
    if !actor.is_admin {
        return forbidden();
    }
    match service
        .set_current_version(document_id, request.version_id)
        .await
    {
        Ok(version) => {
            let view = VersionView {
                url: service.version_url(&version),
                version,
            };
            (StatusCode::OK, Json(view)).into_response()
        }
        Err(error) => service_error_response(error),
    }
}

pub(crate) async fn outstanding_handler<R>(
    State(service): State<Arc<ConfirmationService<R>>>,
    actor: Actor,
    Query(query): Query<ReminderQuery>,
) -> Response
where
    R: ConfirmationRepository + 'static,
{
    if !actor.is_admin {
        return forbidden();
    }
    let today = reference_date(query.today);
    match service.outstanding_confirmations(today).await {
        Ok(outstanding) => {
            let views: Vec<OutstandingView> = outstanding
                .into_iter()
                .filter(|entry| query.event_id.map_or(true, |id| entry.event.id == id))
                .map(|entry| OutstandingView {
                    event_id: entry.event.id,
                    event_name: entry.event.name.clone(),
                    starts_on: entry.event.starts_on,
                    visitor_id: entry.visitor.id,
                    visitor_name: entry.visitor.full_name(),
                    email: entry.visitor.email.clone(),
                    required_count: entry.status.required_count,
                    confirmed_count: entry.status.confirmed_count,
                    stale_count: entry.status.stale_count(),
                    missing_count: entry.missing_count(),
                })
                .collect();
            (StatusCode::OK, Json(views)).into_response()
        }
        Err(error) => service_error_response(error),
    }
}

pub(crate) async fn reminders_handler<R>(
    State(service): State<Arc<ConfirmationService<R>>>,
    actor: Actor,
    Query(query): Query<ReminderQuery>,
) -> Response
where
    R: ConfirmationRepository + 'static,
{
    if !actor.is_admin {
        return forbidden();
    }
    let today = reference_date(query.today);
    match service.send_reminders(today, query.event_id).await {
        Ok(recipients) => (StatusCode::OK, Json(json!({ "recipients": recipients }))).into_response(),
        Err(error) => service_error_response(error),
    }
}

pub(crate) async fn import_handler<R>(
    State(service): State<Arc<ConfirmationService<R>>>,
    actor: Actor,
    body: Bytes,
) -> Response
where
    R: ConfirmationRepository + 'static,
{
    if !actor.is_admin {
        return forbidden();
    }
    let importer = VisitorImporter::new(service.repository());
    match importer.import_reader(body.as_ref()).await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(error) => AppError::from(error).into_response(),
    }
}

pub(crate) async fn export_handler<R>(
    State(service): State<Arc<ConfirmationService<R>>>,
    actor: Actor,
    Query(query): Query<ExportQuery>,
) -> Response
where
    R: ConfirmationRepository + 'static,
{
    if !actor.is_admin {
        return forbidden();
    }
    let exporter = VisitorExporter::new(service.repository());
    match exporter.export_to_string(query.event.as_deref()).await {
        Ok(csv) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/csv; charset=utf-8")],
            csv,
        )
            .into_response(),
        Err(error) => AppError::from(error).into_response(),
    }
}

/// Serves stored document files at the paths `version_url` hands out.
pub(crate) async fn file_handler<R>(
    State(service): State<Arc<ConfirmationService<R>>>,
    Path(path): Path<String>,
) -> Response
where
    R: ConfirmationRepository + 'static,
{
    match service.open_file(&path).await {
        Ok(Some(file)) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, file.content_type)],
            file.bytes,
        )
            .into_response(),
        Ok(None) | Err(ConfirmationServiceError::Storage(StorageError::InvalidPath(_))) => {
            error_response(StatusCode::NOT_FOUND, "file not found")
        }
        Err(error) => service_error_response(error),
    }
}

fn content_type(headers: &HeaderMap) -> String {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string()
}

fn forbidden() -> Response {
    error_response(StatusCode::FORBIDDEN, "not allowed to act for this resource")
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

pub(crate) fn service_error_response(error: ConfirmationServiceError) -> Response {
    AppError::from(error).into_response()
}
