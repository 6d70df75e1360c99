use std::collections::BTreeMap;

use axum::{
    extract::multipart::MultipartRejection,
    extract::rejection::{FormRejection, JsonRejection, PathRejection, QueryRejection},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::{DbErr, SqlErr};
use thiserror::Error;
use tracing::{error, warn};

use crate::schemas::ErrorResponse;
use crate::storage::StorageError;

/// Per-field validation messages, keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.entry(field.into()).or_default().push(message.into());
    }

    pub fn extend_field(&mut self, field: &str, messages: impl IntoIterator<Item = String>) {
        for message in messages {
            self.add(field, message);
        }
    }

    pub fn merge(&mut self, other: FieldErrors) {
        for (field, messages) in other.0 {
            self.0.entry(field).or_default().extend(messages);
        }
    }

    /// Moves the messages of `from` under `to`.
    pub fn rename(&mut self, from: &str, to: &str) {
        if let Some(messages) = self.0.remove(from) {
            self.0.entry(to.to_string()).or_default().extend(messages);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&Vec<String>> {
        self.0.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn into_map(self) -> BTreeMap<String, Vec<String>> {
        self.0
    }

}

impl From<validator::ValidationErrors> for FieldErrors {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut fields = FieldErrors::new();
        for (field, field_errors) in errors.field_errors() {
            for err in field_errors.iter() {
                let message = match &err.message {
                    Some(message) => message.to_string(),
                    None => default_message(&err.code),
                };
                fields.add(field.to_string(), message);
            }
        }
        fields
    }
}

fn default_message(code: &str) -> String {
    match code {
        "email" => "Enter a valid email address.".to_string(),
        "length" => "Ensure this field has a valid length.".to_string(),
        "required" => REQUIRED.to_string(),
        "range" => "Ensure this value is within the allowed range.".to_string(),
        other => format!("Invalid value ({other})."),
    }
}

/// Errors surfaced by handlers. Each one is scoped to the request that
/// triggered it and rendered as an [`ErrorResponse`].
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid input.")]
    Validation(FieldErrors),

    #[error("{0}")]
    BadRequest(String),

    #[error("Authentication credentials were not provided.")]
    Unauthenticated,

    #[error("Invalid username/password.")]
    InvalidCredentials,

    #[error("User inactive or deleted.")]
    InactiveUser,

    #[error("You do not have permission to perform this action.")]
    Forbidden,

    #[error("{0} not found")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Template error: {0}")]
    Template(#[from] minijinja::Error),

    #[error("Password hashing error: {0}")]
    PasswordHash(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Validation error carrying a single field message.
    pub fn field(field: &str, message: impl Into<String>) -> Self {
        let mut errors = FieldErrors::new();
        errors.add(field, message);
        ApiError::Validation(errors)
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthenticated | ApiError::InvalidCredentials | ApiError::InactiveUser => {
                StatusCode::UNAUTHORIZED
            }
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Database(_)
            | ApiError::Storage(_)
            | ApiError::Template(_)
            | ApiError::PasswordHash(_)
            | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "VALIDATION_ERROR",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Unauthenticated => "NOT_AUTHENTICATED",
            ApiError::InvalidCredentials | ApiError::InactiveUser => "AUTHENTICATION_FAILED",
            ApiError::Forbidden => "PERMISSION_DENIED",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Database(_) => "DATABASE_ERROR",
            ApiError::Storage(_) => "STORAGE_ERROR",
            ApiError::Template(_) => "TEMPLATE_ERROR",
            ApiError::PasswordHash(_) => "PASSWORD_HASH_ERROR",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Maps a unique constraint violation on `users.username` to the same
    /// validation error the pre-insert check produces.
    pub fn from_write_error(err: DbErr) -> Self {
        match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(detail)) => {
                warn!("Unique constraint violated: {}", detail);
                ApiError::field("username", USERNAME_TAKEN)
            }
            _ => ApiError::Database(err),
        }
    }
}

pub const USERNAME_TAKEN: &str = "A user with that username already exists.";
pub const REQUIRED: &str = "This field is required.";

/// Turns a serde message (`missing field `x``, `x: invalid type ...`) into
/// a per-field error when it names a field.
fn deserialize_error(body_text: &str) -> ApiError {
    // Drop axum's "Failed to deserialize ...: " prefix and serde's position suffix
    let detail = body_text.split_once(": ").map_or(body_text, |(_, detail)| detail);
    let detail = detail.rsplit_once(" at line ").map_or(detail, |(head, _)| head);

    if let Some((_, rest)) = detail.split_once("missing field `") {
        if let Some((field, _)) = rest.split_once('`') {
            return ApiError::field(field, REQUIRED);
        }
    }
    match detail.split_once(": ") {
        Some((path, message)) if is_field_path(path) => ApiError::field(path, message),
        _ => ApiError::BadRequest(detail.to_string()),
    }
}

fn is_field_path(path: &str) -> bool {
    !path.is_empty()
        && path
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '[' | ']'))
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        warn!("Rejected JSON body: {}", rejection.body_text());
        match rejection {
            JsonRejection::JsonDataError(err) => deserialize_error(&err.body_text()),
            other => ApiError::BadRequest(other.body_text()),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        warn!("Rejected query string: {}", rejection.body_text());
        match rejection {
            QueryRejection::FailedToDeserializeQueryString(err) => deserialize_error(&err.body_text()),
            other => ApiError::BadRequest(other.body_text()),
        }
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        match rejection {
            PathRejection::FailedToDeserializePathParams(err) => ApiError::BadRequest(err.body_text()),
            other => ApiError::Internal(other.body_text()),
        }
    }
}

impl From<FormRejection> for ApiError {
    fn from(rejection: FormRejection) -> Self {
        warn!("Rejected form body: {}", rejection.body_text());
        match rejection {
            FormRejection::FailedToDeserializeForm(err) => deserialize_error(&err.body_text()),
            FormRejection::FailedToDeserializeFormBody(err) => deserialize_error(&err.body_text()),
            other => ApiError::BadRequest(other.body_text()),
        }
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(rejection: MultipartRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }

        // Internal details stay in the logs
        let message = if status.is_server_error() {
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = ErrorResponse {
            error: message,
            code: self.code().to_string(),
            success: false,
            fields: match self {
                ApiError::Validation(fields) => Some(fields.into_map()),
                _ => None,
            },
        };

        let mut response = (status, Json(body)).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                header::HeaderValue::from_static("Basic realm=\"accounts\""),
            );
        }
        response
    }
}
