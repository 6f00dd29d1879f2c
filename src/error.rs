use std::error::Error;
use std::fmt::{Display, Formatter};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidRequestBody,
    InvalidJson,
    MissingStructuredQuery,
    MissingStructuredAggregationQuery,
    MissingCollection,
    MissingData,
    MissingWrites,
    MissingTransactionId,
    MissingProjectId,
    MissingDocumentId,
    InvalidPath,
    UnsupportedOperator,
    UnsupportedComposite,
    Unauthorized,
    Forbidden,
    DocumentNotFound,
    DatabaseNotFound,
    ProjectNotFound,
    Conflict,
    ValidationFailed,
    Internal,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::InvalidRequestBody => "invalid_request_body",
            ErrorKind::InvalidJson => "invalid_json",
            ErrorKind::MissingStructuredQuery => "missing_structured_query",
            ErrorKind::MissingStructuredAggregationQuery => "missing_structured_aggregation_query",
            ErrorKind::MissingCollection => "missing_collection",
            ErrorKind::MissingData => "missing_data",
            ErrorKind::MissingWrites => "missing_writes",
            ErrorKind::MissingTransactionId => "missing_transaction_id",
            ErrorKind::MissingProjectId => "missing_project_id",
            ErrorKind::MissingDocumentId => "missing_document_id",
            ErrorKind::InvalidPath => "invalid_path",
            ErrorKind::UnsupportedOperator => "unsupported_operator",
            ErrorKind::UnsupportedComposite => "unsupported_composite",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::DocumentNotFound => "document_not_found",
            ErrorKind::DatabaseNotFound => "database_not_found",
            ErrorKind::ProjectNotFound => "project_not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::ValidationFailed => "validation_failed",
            ErrorKind::Internal => "internal",
        }
    }

    pub fn http_status(&self) -> StatusCode {
        match self {
            ErrorKind::InvalidRequestBody
            | ErrorKind::InvalidJson
            | ErrorKind::MissingStructuredQuery
            | ErrorKind::MissingStructuredAggregationQuery
            | ErrorKind::MissingCollection
            | ErrorKind::MissingData
            | ErrorKind::MissingWrites
            | ErrorKind::MissingTransactionId
            | ErrorKind::MissingProjectId
            | ErrorKind::MissingDocumentId
            | ErrorKind::InvalidPath
            | ErrorKind::UnsupportedOperator
            | ErrorKind::UnsupportedComposite
            | ErrorKind::ValidationFailed => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::DocumentNotFound
            | ErrorKind::DatabaseNotFound
            | ErrorKind::ProjectNotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Error code used in the `error.code` field of WebSocket error envelopes.
    pub fn ws_code(&self) -> &'static str {
        match self {
            ErrorKind::InvalidRequestBody | ErrorKind::InvalidJson => "invalid_json",
            ErrorKind::MissingStructuredQuery
            | ErrorKind::MissingStructuredAggregationQuery
            | ErrorKind::MissingCollection
            | ErrorKind::MissingData
            | ErrorKind::MissingWrites
            | ErrorKind::MissingTransactionId
            | ErrorKind::MissingProjectId
            | ErrorKind::MissingDocumentId
            | ErrorKind::ValidationFailed => "invalid_request",
            ErrorKind::InvalidPath => "invalid_path",
            ErrorKind::UnsupportedOperator | ErrorKind::UnsupportedComposite => {
                "invalid_query_format"
            }
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::DocumentNotFound
            | ErrorKind::DatabaseNotFound
            | ErrorKind::ProjectNotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Internal => "internal",
        }
    }
}

#[derive(Clone, Debug)]
pub struct ApiError {
    pub kind: ErrorKind,
    message: String,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn http_status(&self) -> StatusCode {
        self.kind.http_status()
    }

    pub fn ws_code(&self) -> &'static str {
        self.kind.ws_code()
    }
}

impl Display for ApiError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": self.code(),
            "message": self.message,
        });
        (self.kind.http_status(), Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

pub fn invalid_request_body(message: impl Into<String>) -> ApiError {
    ApiError::new(ErrorKind::InvalidRequestBody, message)
}

pub fn invalid_json(message: impl Into<String>) -> ApiError {
    ApiError::new(ErrorKind::InvalidJson, message)
}

pub fn missing_structured_query() -> ApiError {
    ApiError::new(
        ErrorKind::MissingStructuredQuery,
        "Request body must contain a structuredQuery",
    )
}

pub fn missing_structured_aggregation_query() -> ApiError {
    ApiError::new(
        ErrorKind::MissingStructuredAggregationQuery,
        "Request body must contain a structuredAggregationQuery",
    )
}

pub fn missing_collection(message: impl Into<String>) -> ApiError {
    ApiError::new(ErrorKind::MissingCollection, message)
}

pub fn missing_data(message: impl Into<String>) -> ApiError {
    ApiError::new(ErrorKind::MissingData, message)
}

pub fn missing_writes(message: impl Into<String>) -> ApiError {
    ApiError::new(ErrorKind::MissingWrites, message)
}

pub fn missing_transaction_id() -> ApiError {
    ApiError::new(
        ErrorKind::MissingTransactionId,
        "Request must carry a transaction id",
    )
}

pub fn missing_project_id() -> ApiError {
    ApiError::new(ErrorKind::MissingProjectId, "Request must carry a project id")
}

pub fn missing_document_id(message: impl Into<String>) -> ApiError {
    ApiError::new(ErrorKind::MissingDocumentId, message)
}

pub fn invalid_path(message: impl Into<String>) -> ApiError {
    ApiError::new(ErrorKind::InvalidPath, message)
}

pub fn unsupported_operator(message: impl Into<String>) -> ApiError {
    ApiError::new(ErrorKind::UnsupportedOperator, message)
}

pub fn unsupported_composite(message: impl Into<String>) -> ApiError {
    ApiError::new(ErrorKind::UnsupportedComposite, message)
}

pub fn unauthorized(message: impl Into<String>) -> ApiError {
    ApiError::new(ErrorKind::Unauthorized, message)
}

pub fn forbidden(message: impl Into<String>) -> ApiError {
    ApiError::new(ErrorKind::Forbidden, message)
}

pub fn document_not_found(message: impl Into<String>) -> ApiError {
    ApiError::new(ErrorKind::DocumentNotFound, message)
}

pub fn database_not_found(message: impl Into<String>) -> ApiError {
    ApiError::new(ErrorKind::DatabaseNotFound, message)
}

pub fn project_not_found(message: impl Into<String>) -> ApiError {
    ApiError::new(ErrorKind::ProjectNotFound, message)
}

pub fn conflict(message: impl Into<String>) -> ApiError {
    ApiError::new(ErrorKind::Conflict, message)
}

pub fn validation_failed(message: impl Into<String>) -> ApiError {
    ApiError::new(ErrorKind::ValidationFailed, message)
}

pub fn internal_error(message: impl Into<String>) -> ApiError {
    ApiError::new(ErrorKind::Internal, message)
}
