//! API error types with HTTP response mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::StockError;
use projections::ProjectionError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Bad request from the client.
    BadRequest(String),
    /// Ledger operation error.
    Stock(StockError),
    /// Audit or view error.
    Projection(ProjectionError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let response = match self {
            ApiError::BadRequest(msg) => error_body(StatusCode::BAD_REQUEST, msg),
            ApiError::Stock(err) => stock_error_to_response(err),
            ApiError::Projection(err) => {
                tracing::error!(error = %err, "projection failure");
                error_body(StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };
        metrics::counter!(
            "api_errors_total",
            "kind" => kind,
            "status" => response.status().as_u16().to_string()
        )
        .increment(1);
        response
    }
}

impl ApiError {
    /// Short label used for the error counter.
    fn kind(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Projection(_) => "projection",
            ApiError::Stock(err) => match err {
                StockError::NotFound { .. } => "not_found",
                StockError::InvalidArgument(_) => "invalid_argument",
                StockError::InsufficientStock { .. } => "insufficient_stock",
                StockError::InvalidTransition { .. } => "invalid_transition",
                StockError::Conflict { .. } => "conflict",
                StockError::Unavailable(_) => "unavailable",
                StockError::Store(_) => "store",
            },
        }
    }
}

fn error_body(status: StatusCode, message: String) -> Response {
    let body = serde_json::json!({ "error": message });
    (status, Json(body)).into_response()
}

fn stock_error_to_response(err: StockError) -> Response {
    match &err {
        StockError::NotFound { .. } => error_body(StatusCode::NOT_FOUND, err.to_string()),
        StockError::InvalidArgument(_) => error_body(StatusCode::BAD_REQUEST, err.to_string()),
        StockError::InsufficientStock {
            product_id,
            requested,
            available,
            shortfall,
        } => {
            let body = serde_json::json!({
                "error": format!("only {available} available"),
                "product_id": product_id,
                "requested": requested,
                "available": available,
                "shortfall": shortfall,
            });
            (StatusCode::UNPROCESSABLE_ENTITY, Json(body)).into_response()
        }
        StockError::InvalidTransition { .. } | StockError::Conflict { .. } => {
            error_body(StatusCode::CONFLICT, err.to_string())
        }
        StockError::Unavailable(_) => {
            tracing::warn!(error = %err, "ledger store unavailable");
            error_body(StatusCode::SERVICE_UNAVAILABLE, "service unavailable".to_string())
        }
        StockError::Store(_) => {
            tracing::error!(error = %err, "internal server error");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
        }
    }
}

impl From<StockError> for ApiError {
    fn from(err: StockError) -> Self {
        ApiError::Stock(err)
    }
}

impl From<ProjectionError> for ApiError {
    fn from(err: ProjectionError) -> Self {
        ApiError::Projection(err)
    }
}
