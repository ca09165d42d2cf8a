//! Typed error handling
//!
//! The dispatcher is the single place where failures become HTTP statuses:
//!
//! - [`ValidationError`]: malformed input, unparsable timestamps, dangling references → 400
//! - [`RestError::Forbidden`]: an authorization predicate denied (or failed) → 403
//! - [`RestError::NotFound`]: id-qualified operation on a missing entity → 404
//! - [`RestError::MethodNotAllowed`]: the verb needs an identifier that was not given → 405
//! - [`RestError::Internal`]: anything else → 500, detail logged and never echoed
//!
//! [`ConfigError`] covers registration and configuration loading and never
//! reaches a caller.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use crate::core::key::EntityId;

/// Caller-facing body of a 500 response
pub const GENERIC_ERROR_MESSAGE: &str = "An error occurred.";

/// Errors raised while turning untrusted parameters into entity fields
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("failed to parse datetime")]
    InvalidDatetime { field: String },

    #[error("stored key must reference an existing entity")]
    DanglingReference { field: String },

    #[error("invalid value for field '{field}': expected {expected}")]
    InvalidValue { field: String, expected: String },

    #[error("missing required field '{field}'")]
    MissingRequired { field: String },
}

impl ValidationError {
    /// Name of the offending field
    pub fn field(&self) -> &str {
        match self {
            ValidationError::InvalidDatetime { field }
            | ValidationError::DanglingReference { field }
            | ValidationError::InvalidValue { field, .. }
            | ValidationError::MissingRequired { field } => field,
        }
    }
}

/// Outcome of a failed REST operation
#[derive(Debug, Error)]
pub enum RestError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("not allowed to {operation} {kind}")]
    Forbidden {
        kind: String,
        operation: &'static str,
    },

    #[error("{kind} '{id}' not found")]
    NotFound { kind: String, id: EntityId },

    #[error("unknown resource '{resource}'")]
    UnknownResource { resource: String },

    #[error("{method} requires an entity identifier")]
    MethodNotAllowed { method: String },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Error response structure for HTTP responses
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
}

impl RestError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            RestError::Validation(_) => StatusCode::BAD_REQUEST,
            RestError::Forbidden { .. } => StatusCode::FORBIDDEN,
            RestError::NotFound { .. } | RestError::UnknownResource { .. } => {
                StatusCode::NOT_FOUND
            }
            RestError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            RestError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            RestError::Validation(_) => "VALIDATION_ERROR",
            RestError::Forbidden { .. } => "FORBIDDEN",
            RestError::NotFound { .. } => "ENTITY_NOT_FOUND",
            RestError::UnknownResource { .. } => "UNKNOWN_RESOURCE",
            RestError::MethodNotAllowed { .. } => "METHOD_NOT_ALLOWED",
            RestError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Convert to an error response
    ///
    /// Internal failures are reduced to a generic message.
    pub fn to_response(&self) -> ErrorResponse {
        let message = match self {
            RestError::Internal(_) => GENERIC_ERROR_MESSAGE.to_string(),
            other => other.to_string(),
        };
        ErrorResponse {
            code: self.error_code().to_string(),
            message,
        }
    }
}

impl IntoResponse for RestError {
    fn into_response(self) -> Response {
        if let RestError::Internal(err) = &self {
            tracing::error!(error = ?err, "unhandled failure while serving request");
        }
        let status = self.status_code();
        let body = Json(self.to_response());
        (status, body).into_response()
    }
}

/// Errors raised while registering entity types or loading configuration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid schema for '{kind}': {message}")]
    InvalidSchema { kind: String, message: String },

    #[error("resource '{resource}' is registered twice")]
    DuplicateResource { resource: String },

    #[error("unknown authorization rule '{rule}'")]
    UnknownRule { rule: String },

    #[error("invalid server setting '{setting}': {message}")]
    InvalidSetting { setting: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let validation = RestError::from(ValidationError::InvalidDatetime {
            field: "created_at".into(),
        });
        assert_eq!(validation.status_code(), StatusCode::BAD_REQUEST);

        let forbidden = RestError::Forbidden {
            kind: "widget".into(),
            operation: "delete",
        };
        assert_eq!(forbidden.status_code(), StatusCode::FORBIDDEN);

        let missing = RestError::NotFound {
            kind: "widget".into(),
            id: EntityId::Int(7),
        };
        assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);

        let no_id = RestError::MethodNotAllowed {
            method: "PATCH".into(),
        };
        assert_eq!(no_id.status_code(), StatusCode::METHOD_NOT_ALLOWED);

        let internal = RestError::from(anyhow::anyhow!("disk on fire"));
        assert_eq!(internal.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_contract_messages() {
        let datetime = ValidationError::InvalidDatetime { field: "at".into() };
        assert_eq!(datetime.to_string(), "failed to parse datetime");

        let dangling = ValidationError::DanglingReference {
            field: "owner".into(),
        };
        assert_eq!(
            dangling.to_string(),
            "stored key must reference an existing entity"
        );
        assert_eq!(dangling.field(), "owner");

        let response = RestError::from(dangling).to_response();
        assert_eq!(response.code, "VALIDATION_ERROR");
        assert_eq!(
            response.message,
            "stored key must reference an existing entity"
        );
    }

    #[test]
    fn test_internal_detail_is_not_exposed() {
        let err = RestError::from(anyhow::anyhow!("connection refused at 10.0.0.3"));
        let response = err.to_response();
        assert_eq!(response.message, GENERIC_ERROR_MESSAGE);
        assert_eq!(response.code, "INTERNAL_ERROR");
    }
}
