//! Typed errors and HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
    #[error("invalid exclusion pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Which stage of introspection failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntrospectionErrorKind {
    ConnectionLost,
    QueryFailed,
    DecodeFailed,
}

impl std::fmt::Display for IntrospectionErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IntrospectionErrorKind::ConnectionLost => "connection_lost",
            IntrospectionErrorKind::QueryFailed => "query_failed",
            IntrospectionErrorKind::DecodeFailed => "decode_failed",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("unknown field: {0}")]
    UnknownField(String),
    #[error("unknown relation: {0}")]
    UnknownRelation(String),
    #[error("operator '{operator}' cannot be applied to field '{field}' of type {type_name}")]
    OperatorTypeMismatch {
        field: String,
        operator: &'static str,
        type_name: String,
    },
    #[error("provided keys must exactly match the primary key or one unique constraint")]
    KeyShapeMismatch { provided: Vec<String> },
    #[error("limit {requested} exceeds maximum {max}")]
    LimitExceeded { requested: i64, max: i64 },
    #[error("missing required field: {0}")]
    MissingField(String),
    #[error("missing required argument: {0}")]
    MissingArgument(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error("introspection failed ({kind}): {context}")]
    Introspection {
        kind: IntrospectionErrorKind,
        context: String,
    },
    #[error("cannot decode value of type oid {oid}: {reason}")]
    Decode { oid: u32, reason: String },
    #[error("cannot encode value for type oid {oid}: {reason}")]
    Encode { oid: u32, reason: String },
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("internal: {0}")]
    Internal(String),
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub kind: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl AppError {
    /// Taxonomy kind and HTTP status. Database errors are classified by
    /// SQLSTATE class; unknown classes default to internal.
    pub fn kind_and_status(&self) -> (&'static str, StatusCode) {
        match self {
            AppError::UnknownField(_)
            | AppError::UnknownRelation(_)
            | AppError::OperatorTypeMismatch { .. }
            | AppError::KeyShapeMismatch { .. }
            | AppError::LimitExceeded { .. }
            | AppError::MissingField(_)
            | AppError::MissingArgument(_)
            | AppError::BadRequest(_) => ("validation", StatusCode::BAD_REQUEST),
            AppError::NotFound(_) => ("not_found", StatusCode::NOT_FOUND),
            AppError::Conflict(_) => ("conflict", StatusCode::CONFLICT),
            AppError::Unavailable(_) => ("unavailable", StatusCode::SERVICE_UNAVAILABLE),
            AppError::Introspection { .. }
            | AppError::Decode { .. }
            | AppError::Encode { .. }
            | AppError::Internal(_) => ("internal", StatusCode::INTERNAL_SERVER_ERROR),
            AppError::Db(e) => classify_db_error(e),
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            AppError::UnknownField(name) => Some(json!({ "code": "unknown_field", "field": name })),
            AppError::UnknownRelation(name) => {
                Some(json!({ "code": "unknown_relation", "relation": name }))
            }
            AppError::OperatorTypeMismatch {
                field,
                operator,
                type_name,
            } => Some(json!({
                "code": "operator_type_mismatch",
                "field": field,
                "operator": operator,
                "type": type_name,
            })),
            AppError::KeyShapeMismatch { provided } => {
                Some(json!({ "code": "key_shape_mismatch", "provided": provided }))
            }
            AppError::LimitExceeded { requested, max } => {
                Some(json!({ "code": "limit_exceeded", "requested": requested, "max": max }))
            }
            AppError::MissingField(name) => Some(json!({ "code": "missing_field", "field": name })),
            AppError::MissingArgument(name) => {
                Some(json!({ "code": "missing_argument", "argument": name }))
            }
            AppError::Db(sqlx::Error::Database(e)) => {
                e.code().map(|c| json!({ "sqlstate": c.as_ref() }))
            }
            _ => None,
        }
    }
}

/// SQLSTATE class 23 (integrity violations) surfaces as a conflict; classes
/// 08, 53 and 57 (connection, insufficient resources, operator intervention)
/// as unavailable. Everything else is internal.
fn classify_db_error(e: &sqlx::Error) -> (&'static str, StatusCode) {
    match e {
        sqlx::Error::RowNotFound => ("not_found", StatusCode::NOT_FOUND),
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            ("unavailable", StatusCode::SERVICE_UNAVAILABLE)
        }
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) => ("unavailable", StatusCode::SERVICE_UNAVAILABLE),
        sqlx::Error::Database(db) => {
            let class = db.code().map(|c| c.as_ref().chars().take(2).collect::<String>());
            match class.as_deref() {
                Some("23") => ("conflict", StatusCode::CONFLICT),
                Some("08") | Some("53") | Some("57") => {
                    ("unavailable", StatusCode::SERVICE_UNAVAILABLE)
                }
                Some("22") => ("validation", StatusCode::BAD_REQUEST),
                _ => ("internal", StatusCode::INTERNAL_SERVER_ERROR),
            }
        }
        _ => ("internal", StatusCode::INTERNAL_SERVER_ERROR),
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (kind, status) = self.kind_and_status();
        if status.is_server_error() {
            tracing::error!(error = %self, kind, "request failed");
        } else {
            tracing::debug!(error = %self, kind, "request rejected");
        }
        let body = ErrorBody {
            error: ErrorDetail {
                kind,
                message: self.to_string(),
                details: self.details(),
            },
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_map_to_400() {
        let errs = [
            AppError::UnknownField("nope".into()),
            AppError::KeyShapeMismatch {
                provided: vec!["name".into()],
            },
            AppError::LimitExceeded {
                requested: 20000,
                max: 10000,
            },
            AppError::MissingField("id".into()),
            AppError::MissingArgument("x".into()),
        ];
        for e in errs {
            let (kind, status) = e.kind_and_status();
            assert_eq!(kind, "validation");
            assert_eq!(status, StatusCode::BAD_REQUEST);
        }
    }

    #[test]
    fn pool_timeout_is_unavailable() {
        let (kind, status) = AppError::Db(sqlx::Error::PoolTimedOut).kind_and_status();
        assert_eq!(kind, "unavailable");
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn row_not_found_is_not_found() {
        let (kind, status) = AppError::Db(sqlx::Error::RowNotFound).kind_and_status();
        assert_eq!(kind, "not_found");
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn key_shape_details_carry_provided_columns() {
        let e = AppError::KeyShapeMismatch {
            provided: vec!["name".into()],
        };
        let details = e.details().unwrap();
        assert_eq!(details["code"], "key_shape_mismatch");
        assert_eq!(details["provided"][0], "name");
    }
}
