//! JSON envelopes shared by every endpoint.
//!
//! Successful bodies are `{"success": true, ...fields}`; failures are
//! `{"success": false, "error": "..."}` with a status code chosen by
//! [`ApiError`]. Internal details are logged, never returned.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::catalog::{self, RegionInfo};
use crate::error::{InferenceError, PipelineError, UploadError};

// ---

#[derive(Debug, Serialize)]
pub struct Success<T> {
    success: bool,
    #[serde(flatten)]
    data: T,
}

/// Wrap a payload in the success envelope.
pub fn ok<T: Serialize>(data: T) -> Json<Success<T>> {
    Json(Success {
        success: true,
        data,
    })
}

pub type ApiResult<T> = Result<Json<Success<T>>, ApiError>;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    InsufficientHistory(String),
    Unavailable(String),
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InsufficientHistory(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // ---
        let status = self.status();
        let error = match self {
            ApiError::Internal(detail) => {
                tracing::error!(%detail, "request failed");
                "internal server error".to_string()
            }
            ApiError::BadRequest(msg)
            | ApiError::NotFound(msg)
            | ApiError::InsufficientHistory(msg)
            | ApiError::Unavailable(msg) => {
                tracing::debug!(%status, %msg, "request rejected");
                msg
            }
        };
        (
            status,
            Json(ErrorBody {
                success: false,
                error,
            }),
        )
            .into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        // ---
        match e {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                tracing::error!(error = %e, "database unavailable");
                ApiError::Unavailable("database unavailable".to_string())
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<InferenceError> for ApiError {
    fn from(e: InferenceError) -> Self {
        match e {
            InferenceError::ModelUnavailable(_) => ApiError::Unavailable(e.to_string()),
            InferenceError::InsufficientHistory { .. } => ApiError::InsufficientHistory(e.to_string()),
        }
    }
}

impl From<UploadError> for ApiError {
    fn from(e: UploadError) -> Self {
        match e {
            UploadError::Ingest(inner) => ApiError::BadRequest(inner.to_string()),
            UploadError::Pipeline(PipelineError::NoUsableInput { .. }) => {
                ApiError::BadRequest("the file contains no usable weekly data".to_string())
            }
        }
    }
}

/// Catalog entry for an id taken from a request; out of range is a 400.
pub fn region_in_range(region_id: i32) -> Result<&'static RegionInfo, ApiError> {
    catalog::lookup(region_id).ok_or_else(|| {
        ApiError::BadRequest(format!(
            "region_id must be between {} and {}, got {region_id}",
            catalog::MIN_REGION_ID,
            catalog::MAX_REGION_ID
        ))
    })
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::error::FeatureError;

    #[test]
    fn maps_inference_errors_to_status() {
        // ---
        let e: ApiError = InferenceError::ModelUnavailable("risk classifier").into();
        assert_eq!(e.status(), StatusCode::SERVICE_UNAVAILABLE);

        let e: ApiError = InferenceError::InsufficientHistory {
            region_id: 7,
            source: FeatureError::InsufficientHistory {
                available: 3,
                required: 4,
            },
        }
        .into();
        assert_eq!(e.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn rejects_out_of_range_regions() {
        // ---
        assert!(region_in_range(1).is_ok());
        assert!(region_in_range(32).is_ok());
        let e = region_in_range(33).unwrap_err();
        assert_eq!(e.status(), StatusCode::BAD_REQUEST);
        assert!(region_in_range(0).is_err());
    }

    #[tokio::test]
    async fn error_body_hides_internal_detail() {
        // ---
        let resp = ApiError::Internal("connection string leaked".into()).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "internal server error");
    }

    #[test]
    fn success_envelope_flattens_payload() {
        // ---
        #[derive(Serialize)]
        struct Payload {
            count: u32,
        }
        let Json(body) = ok(Payload { count: 3 });
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(v, serde_json::json!({"success": true, "count": 3}));
    }
}
