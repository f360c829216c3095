//! HTTP error boundary. Folds `imgtag_core::CoreError` (and the handful
//! of request-shape errors only this transport can detect) down to a
//! status code by matching on `ErrorKind` once, rather than repeating a
//! per-error-type `match` in every handler's `IntoResponse` impl.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use imgtag_core::{CoreError, ErrorKind};
use serde::Serialize;

pub enum AppError {
    Core(CoreError),
    BadRequest(String),
}

impl From<CoreError> for AppError {
    fn from(value: CoreError) -> Self {
        AppError::Core(value)
    }
}

macro_rules! from_core {
    ($err:ty) => {
        impl From<$err> for AppError {
            fn from(value: $err) -> Self {
                AppError::Core(CoreError::from(value))
            }
        }
    };
}

from_core!(imgtag_core::db::DbError);
from_core!(imgtag_core::storage::StorageError);
from_core!(imgtag_core::queue::QueueError);
from_core!(imgtag_core::ingest::IngestError);
from_core!(imgtag_core::search::SearchError);
from_core!(imgtag_core::background::BackgroundError);
from_core!(imgtag_core::storage::admin::EndpointAdminError);

impl From<imgtag_core::update::UpdateError> for AppError {
    fn from(value: imgtag_core::update::UpdateError) -> Self {
        match value {
            imgtag_core::update::UpdateError::NotFound(id) => {
                AppError::Core(CoreError::not_found(format!("image {id} not found")))
            }
            imgtag_core::update::UpdateError::Db(e) => AppError::Core(CoreError::Db(e)),
            imgtag_core::update::UpdateError::Queue(e) => AppError::Core(CoreError::Queue(e)),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Core(err) => {
                let status = match err.kind() {
                    ErrorKind::NotFound => StatusCode::NOT_FOUND,
                    ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
                    ErrorKind::Validation => StatusCode::BAD_REQUEST,
                    ErrorKind::Conflict => StatusCode::CONFLICT,
                    ErrorKind::UpstreamUnavailable => StatusCode::BAD_GATEWAY,
                    ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
                    ErrorKind::IntegrityViolated => StatusCode::UNPROCESSABLE_ENTITY,
                    ErrorKind::Transient => StatusCode::SERVICE_UNAVAILABLE,
                    ErrorKind::Fatal => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, err.to_string())
            }
        };

        (status, Json(ErrorBody { message })).into_response()
    }
}
