use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use model::entities::user;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use tracing::{debug, trace, warn};

use crate::error::ApiError;
use crate::passwords::{verify_password, verify_unknown_user};
use crate::schemas::AppState;

/// The authenticated account of the current request.
///
/// Inserted into request extensions by [`require_authentication`].
#[derive(Clone)]
pub struct CurrentUser(pub user::Model);

impl std::fmt::Debug for CurrentUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CurrentUser")
            .field("id", &self.0.id)
            .field("username", &self.0.username)
            .finish()
    }
}

impl CurrentUser {
    pub fn id(&self) -> i32 {
        self.0.id
    }
}

/// Username and password taken from an `Authorization: Basic` header.
#[derive(PartialEq, Eq)]
pub struct BasicCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for BasicCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicCredentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Parses the `Authorization` header.
///
/// `Ok(None)` when no header is present; an error when one is present but
/// is not well-formed Basic credentials.
pub fn parse_basic_credentials(headers: &HeaderMap) -> Result<Option<BasicCredentials>, ApiError> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };

    let value = value.to_str().map_err(|_| ApiError::InvalidCredentials)?;
    let (scheme, encoded) = value.split_once(' ').ok_or(ApiError::InvalidCredentials)?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return Err(ApiError::InvalidCredentials);
    }

    let decoded = STANDARD
        .decode(encoded.trim())
        .map_err(|_| ApiError::InvalidCredentials)?;
    let decoded = String::from_utf8(decoded).map_err(|_| ApiError::InvalidCredentials)?;
    let (username, password) = decoded.split_once(':').ok_or(ApiError::InvalidCredentials)?;

    Ok(Some(BasicCredentials {
        username: username.to_string(),
        password: password.to_string(),
    }))
}

/// Looks the user up and checks the password. Inactive accounts are refused.
pub async fn authenticate(db: &DatabaseConnection, credentials: BasicCredentials) -> Result<user::Model, ApiError> {
    let account = user::Entity::find()
        .filter(user::Column::Username.eq(credentials.username.as_str()))
        .one(db)
        .await?;

    // Unknown usernames pay for a verification too
    let stored_hash = account.as_ref().map(|account| account.password.clone());
    let password = credentials.password;
    let verified = tokio::task::spawn_blocking(move || match stored_hash {
        Some(hash) => verify_password(&password, &hash),
        None => verify_unknown_user(&password),
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))?;

    let Some(account) = account else {
        debug!("Unknown username in credentials: {}", credentials.username);
        return Err(ApiError::InvalidCredentials);
    };

    if !verified {
        debug!("Password mismatch for user ID: {}", account.id);
        return Err(ApiError::InvalidCredentials);
    }
    if !account.is_active {
        warn!("Inactive user {} attempted to authenticate", account.id);
        return Err(ApiError::InactiveUser);
    }

    Ok(account)
}

/// Rejects requests without valid credentials and exposes the account as a
/// [`CurrentUser`] extension.
pub async fn require_authentication(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    trace!("Authenticating request to {}", request.uri().path());

    let credentials = parse_basic_credentials(request.headers())?.ok_or(ApiError::Unauthenticated)?;
    let account = authenticate(&state.db, credentials).await?;

    trace!("Authenticated user ID: {}", account.id);
    request.extensions_mut().insert(CurrentUser(account));
    Ok(next.run(request).await)
}

/// Only lets staff accounts through. Must run after [`require_authentication`].
pub async fn require_staff(request: Request, next: Next) -> Result<Response, ApiError> {
    let is_staff = request
        .extensions()
        .get::<CurrentUser>()
        .map(|current| current.0.is_staff)
        .ok_or(ApiError::Unauthenticated)?;

    if !is_staff {
        warn!("Non-staff user denied access to {}", request.uri().path());
        return Err(ApiError::Forbidden);
    }
    Ok(next.run(request).await)
}
