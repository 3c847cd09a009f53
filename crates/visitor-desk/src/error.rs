use crate::config::ConfigError;
use crate::files::StorageError;
use crate::telemetry::TelemetryError;
use crate::workflows::confirmations::{ConfirmationServiceError, RepositoryError};
use crate::workflows::roster::{RosterExportError, RosterImportError};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::fmt;
use tracing::error;

#[derive(Debug)]
pub enum AppError {
    Config(ConfigError),
    Telemetry(TelemetryError),
    Io(std::io::Error),
    Server(axum::Error),
    Database(sqlx::Error),
    Repository(RepositoryError),
    Import(RosterImportError),
    Export(RosterExportError),
    Service(ConfirmationServiceError),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(err) => write!(f, "configuration error: {}", err),
            AppError::Telemetry(err) => write!(f, "telemetry error: {}", err),
            AppError::Io(err) => write!(f, "io error: {}", err),
            AppError::Server(err) => write!(f, "server error: {}", err),
            AppError::Database(err) => write!(f, "database error: {}", err),
            AppError::Repository(err) => write!(f, "storage error: {}", err),
            AppError::Import(err) => write!(f, "import error: {}", err),
            AppError::Export(err) => write!(f, "export error: {}", err),
            AppError::Service(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Config(err) => Some(err),
            AppError::Telemetry(err) => Some(err),
            AppError::Io(err) => Some(err),
            AppError::Server(err) => Some(err),
            AppError::Database(err) => Some(err),
            AppError::Repository(err) => Some(err),
            AppError::Import(err) => Some(err),
            AppError::Export(err) => Some(err),
            AppError::Service(err) => Some(err),
        }
    }
}

impl AppError {
    /// HTTP status an error renders as; every handler error goes through this mapping.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Service(err) => service_status(err),
            AppError::Repository(err) => repository_status(err),
            AppError::Import(RosterImportError::Repository(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Import(_) => StatusCode::BAD_REQUEST,
            AppError::Export(RosterExportError::UnknownEvent(_)) => StatusCode::NOT_FOUND,
            AppError::Config(_)
            | AppError::Telemetry(_)
            | AppError::Io(_)
            | AppError::Server(_)
            | AppError::Database(_)
            | AppError::Export(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn repository_status(error: &RepositoryError) -> StatusCode {
    match error {
        RepositoryError::NotFound => StatusCode::NOT_FOUND,
        RepositoryError::Conflict => StatusCode::CONFLICT,
        RepositoryError::Unavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn service_status(error: &ConfirmationServiceError) -> StatusCode {
    match error {
        ConfirmationServiceError::NotAssigned
        | ConfirmationServiceError::DocumentNotRequired
        | ConfirmationServiceError::NoCurrentVersion
        | ConfirmationServiceError::VersionNotCurrent { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        ConfirmationServiceError::Repository(err) => repository_status(err),
        ConfirmationServiceError::Storage(StorageError::Io(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        ConfirmationServiceError::Storage(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ConfirmationServiceError::Reminder(_) => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, status = status.as_u16(), "request failed");
        }

        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

impl From<ConfigError> for AppError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<TelemetryError> for AppError {
    fn from(value: TelemetryError) -> Self {
        Self::Telemetry(value)
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<axum::Error> for AppError {
    fn from(value: axum::Error) -> Self {
        Self::Server(value)
    }
}

impl From<sqlx::Error> for AppError {
    fn from(value: sqlx::Error) -> Self {
        Self::Database(value)
    }
}

impl From<RepositoryError> for AppError {
    fn from(value: RepositoryError) -> Self {
        Self::Repository(value)
    }
}

impl From<RosterImportError> for AppError {
    fn from(value: RosterImportError) -> Self {
        Self::Import(value)
    }
}

impl From<RosterExportError> for AppError {
    fn from(value: RosterExportError) -> Self {
        Self::Export(value)
    }
}

impl From<ConfirmationServiceError> for AppError {
    fn from(value: ConfirmationServiceError) -> Self {
        Self::Service(value)
    }
}
