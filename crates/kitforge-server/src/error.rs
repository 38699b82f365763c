use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use kitforge_cloud::{BuildError, DeployError, StorageError};
use kitforge_core::error::{ErrorClass, ForgeError};

// ---------------------------------------------------------------------------
// Internal sentinels for explicit status codes
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct BadRequestError(String);

impl std::fmt::Display for BadRequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for BadRequestError {}

#[derive(Debug)]
struct NotFoundError(String);

impl std::fmt::Display for NotFoundError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for NotFoundError {}

#[derive(Debug)]
struct UnavailableError(String);

impl std::fmt::Display for UnavailableError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for UnavailableError {}

// ---------------------------------------------------------------------------
// AppError: unified error type for HTTP responses
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self(BadRequestError(msg.into()).into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self(NotFoundError(msg.into()).into())
    }

    /// 503: the server runs but a subsystem is not configured.
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self(UnavailableError(msg.into()).into())
    }
}

fn forge_status(e: &ForgeError) -> StatusCode {
    match e {
        ForgeError::BuildNotFound(_) | ForgeError::TenantNotFound(_) => StatusCode::NOT_FOUND,
        ForgeError::DeployInProgress(_)
        | ForgeError::NotDeployed(_)
        | ForgeError::AlreadyDeployed(_) => StatusCode::CONFLICT,
        ForgeError::InvalidTransition { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        other => match other.class() {
            ErrorClass::Configuration => StatusCode::BAD_REQUEST,
            ErrorClass::Resolver => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorClass::Storage => StatusCode::BAD_GATEWAY,
            ErrorClass::Template | ErrorClass::Assembly | ErrorClass::Ledger => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        },
    }
}

fn storage_status(e: &StorageError) -> StatusCode {
    match e {
        StorageError::NotFound(_) => StatusCode::NOT_FOUND,
        StorageError::Upload { .. } | StorageError::Backend(_) => StatusCode::BAD_GATEWAY,
        StorageError::WrongBackend { .. } | StorageError::Config(_) | StorageError::Io(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn deploy_status(e: &DeployError) -> StatusCode {
    match e {
        DeployError::Forge(f) => forge_status(f),
        DeployError::Storage(s) => storage_status(s),
        DeployError::NotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
        DeployError::Api { .. }
        | DeployError::Http(_)
        | DeployError::Response { .. }
        | DeployError::HealthTimeout { .. }
        | DeployError::ServiceFailed { .. } => StatusCode::BAD_GATEWAY,
        DeployError::Unpack(_) | DeployError::Panicked(_) | DeployError::Join(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl AppError {
    fn status(&self) -> StatusCode {
        if self.0.downcast_ref::<BadRequestError>().is_some() {
            return StatusCode::BAD_REQUEST;
        }
        if self.0.downcast_ref::<NotFoundError>().is_some() {
            return StatusCode::NOT_FOUND;
        }
        if self.0.downcast_ref::<UnavailableError>().is_some() {
            return StatusCode::SERVICE_UNAVAILABLE;
        }
        if let Some(e) = self.0.downcast_ref::<ForgeError>() {
            return forge_status(e);
        }
        if let Some(e) = self.0.downcast_ref::<BuildError>() {
            return match e {
                BuildError::Forge(f) => forge_status(f),
                BuildError::Storage(s) => storage_status(s),
                BuildError::Join(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };
        }
        if let Some(e) = self.0.downcast_ref::<DeployError>() {
            return deploy_status(e);
        }
        if let Some(e) = self.0.downcast_ref::<StorageError>() {
            return storage_status(e);
        }
        StatusCode::INTERNAL_SERVER_ERROR
    }

    /// Whether repeating the request unchanged may succeed.
    fn retry_safe(&self) -> Option<bool> {
        let forge = self
            .0
            .downcast_ref::<ForgeError>()
            .or_else(|| match self.0.downcast_ref::<BuildError>() {
                Some(BuildError::Forge(f)) => Some(f),
                _ => None,
            })
            .or_else(|| self.0.downcast_ref::<DeployError>().and_then(DeployError::as_forge));
        forge.map(ForgeError::retry_safe)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self.0, "request failed");
        }
        let mut body = serde_json::json!({ "error": self.0.to_string() });
        if let Some(retry) = self.retry_safe() {
            body["retry_safe"] = serde_json::Value::Bool(retry);
        }
        (status, axum::Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
