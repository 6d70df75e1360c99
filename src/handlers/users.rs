use crate::auth::CurrentUser;
use crate::error::{ApiError, REQUIRED};
use crate::extract::{ApiJson, ApiPath, ValidQuery};
use crate::schemas::{ApiResponse, AppState};
use crate::services::users::{
    self as accounts, AccountChanges, AccountFilter, NewAccount, API_ORDERING_FIELDS, DEFAULT_ORDERING,
    DEFAULT_PAGE_SIZE,
};
use crate::storage::MediaStorage;
use axum::{
    extract::{multipart::MultipartRejection, Multipart, State},
    http::StatusCode,
    response::Json,
    Extension,
};
use chrono::{DateTime, Utc};
use model::entities::user;
use serde::{de::Error as _, Deserialize, Deserializer, Serialize};
use tracing::{debug, info, instrument, trace, warn};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

/// Request body for creating a new user
#[derive(Deserialize, Serialize, ToSchema)]
pub struct CreateUserRequest {
    /// Username (unique; letters, digits and @/./+/-/_)
    pub username: String,
    /// Password (write-only)
    pub password: String,
    /// Repeat of the password; checked when present
    pub password_confirm: Option<String>,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub phone_number: Option<String>,
}

impl std::fmt::Debug for CreateUserRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreateUserRequest")
            .field("username", &self.username)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

impl From<CreateUserRequest> for NewAccount {
    fn from(request: CreateUserRequest) -> Self {
        NewAccount {
            username: request.username,
            email: request.email,
            first_name: request.first_name,
            last_name: request.last_name,
            phone_number: request.phone_number,
            password: request.password,
            password_confirm: request.password_confirm,
            is_staff: false,
            is_superuser: false,
            is_active: true,
        }
    }
}

/// Request body for updating a user. Omitted fields are left unchanged.
#[derive(Default, Deserialize, Serialize, ToSchema)]
pub struct UpdateUserRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    /// Empty string clears the phone number
    pub phone_number: Option<String>,
    /// New password; empty or omitted keeps the current one
    pub password: Option<String>,
    pub password_confirm: Option<String>,
}

impl std::fmt::Debug for UpdateUserRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateUserRequest")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("first_name", &self.first_name)
            .field("last_name", &self.last_name)
            .field("phone_number", &self.phone_number)
            .finish_non_exhaustive()
    }
}

impl From<UpdateUserRequest> for AccountChanges {
    fn from(request: UpdateUserRequest) -> Self {
        AccountChanges {
            username: request.username,
            email: request.email,
            first_name: request.first_name,
            last_name: request.last_name,
            phone_number: request.phone_number,
            password: request.password,
            password_confirm: request.password_confirm,
            ..Default::default()
        }
    }
}

/// Full user projection
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UserResponse {
    pub id: i32,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: Option<String>,
    /// Public URL of the profile photo
    pub profile_photo: Option<String>,
    pub last_login: Option<DateTime<Utc>>,
    pub date_joined: DateTime<Utc>,
}

impl UserResponse {
    pub fn new(model: user::Model, storage: &MediaStorage) -> Self {
        Self {
            profile_photo: model.profile_photo.as_deref().map(|name| storage.url(name)),
            id: model.id,
            username: model.username,
            email: model.email,
            first_name: model.first_name,
            last_name: model.last_name,
            phone_number: model.phone_number,
            last_login: model.last_login,
            date_joined: model.date_joined,
        }
    }
}

/// Compact projection used in listings
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UserListItem {
    pub id: i32,
    pub username: String,
    pub email: String,
    /// First and last name, or the username when both are blank
    pub full_name: String,
    pub date_joined: DateTime<Utc>,
    pub profile_photo: Option<String>,
}

impl UserListItem {
    pub fn new(model: user::Model, storage: &MediaStorage) -> Self {
        Self {
            full_name: model.full_name(),
            profile_photo: model.profile_photo.as_deref().map(|name| storage.url(name)),
            id: model.id,
            username: model.username,
            email: model.email,
            date_joined: model.date_joined,
        }
    }
}

/// One page of users
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UserPage {
    /// Number of users matching the query
    pub count: u64,
    pub page: u64,
    pub page_size: u64,
    pub total_pages: u64,
    pub results: Vec<UserListItem>,
}

/// Query parameters for listing users
#[derive(Debug, Deserialize, IntoParams, Validate)]
pub struct ListUsersQuery {
    /// Page number (default: 1)
    #[validate(range(min = 1))]
    pub page: Option<u64>,
    /// Page size (default: 25, max: 100)
    #[validate(range(min = 1, max = 100))]
    pub page_size: Option<u64>,
    /// Exact match on the staff flag (`true`/`false` or `1`/`0`)
    #[serde(default, deserialize_with = "deserialize_flag")]
    #[param(value_type = Option<bool>)]
    pub is_staff: Option<bool>,
    /// Terms matched against username, email, names and phone number
    pub search: Option<String>,
    /// Comma-separated fields among date_joined, username and email; prefix with `-` for descending
    pub ordering: Option<String>,
}

/// Accepts `true`/`false` in any case as well as `1`/`0`.
fn deserialize_flag<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => match value.to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(Some(true)),
            "false" | "0" => Ok(Some(false)),
            _ => Err(D::Error::custom("Must be a valid boolean.")),
        },
    }
}

/// Create a new user
#[utoipa::path(
    post,
    path = "/api/v1/users",
    tag = "users",
    request_body = CreateUserRequest,
    responses(
        (status = 201, description = "User created successfully", body = ApiResponse<UserResponse>),
        (status = 400, description = "Invalid request", body = ErrorResponse),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    security(("basic_auth" = []))
)]
#[instrument(skip(state))]
pub async fn create_user(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    ApiJson(request): ApiJson<CreateUserRequest>,
) -> Result<(StatusCode, Json<ApiResponse<UserResponse>>), ApiError> {
    trace!("Entering create_user function");
    debug!("Creating user with username: {}", request.username);

    let created = accounts::create_account(
        &state.db,
        &state.password_policy,
        request.into(),
        Some(current.id()),
    )
    .await?;

    info!("User created successfully with ID: {}, username: {}", created.id, created.username);
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok(
            UserResponse::new(created, &state.storage),
            "User created successfully",
        )),
    ))
}

/// List users
#[utoipa::path(
    get,
    path = "/api/v1/users",
    tag = "users",
    params(ListUsersQuery),
    responses(
        (status = 200, description = "Users retrieved successfully", body = ApiResponse<UserPage>),
        (status = 400, description = "Invalid query", body = ErrorResponse),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    security(("basic_auth" = []))
)]
#[instrument(skip(state))]
pub async fn get_users(
    State(state): State<AppState>,
    ValidQuery(query): ValidQuery<ListUsersQuery>,
) -> Result<Json<ApiResponse<UserPage>>, ApiError> {
    trace!("Entering get_users function");

    let filter = AccountFilter {
        is_staff: query.is_staff,
        search: query.search,
        ..Default::default()
    };
    let ordering = accounts::parse_ordering(query.ordering.as_deref(), API_ORDERING_FIELDS, DEFAULT_ORDERING);
    let page = accounts::list_accounts(
        &state.db,
        &filter,
        &ordering,
        query.page.unwrap_or(1),
        query.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
    )
    .await?;

    info!("Successfully retrieved {} of {} users", page.items.len(), page.total);
    let results = page
        .items
        .into_iter()
        .map(|model| UserListItem::new(model, &state.storage))
        .collect();

    Ok(Json(ApiResponse::ok(
        UserPage {
            count: page.total,
            page: page.page,
            page_size: page.page_size,
            total_pages: page.total_pages,
            results,
        },
        "Users retrieved successfully",
    )))
}

/// Get the authenticated user
#[utoipa::path(
    get,
    path = "/api/v1/users/me",
    tag = "users",
    responses(
        (status = 200, description = "Current user retrieved successfully", body = ApiResponse<UserResponse>),
        (status = 401, description = "Not authenticated", body = ErrorResponse)
    ),
    security(("basic_auth" = []))
)]
#[instrument(skip(state))]
pub async fn get_current_user(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> Json<ApiResponse<UserResponse>> {
    debug!("Returning current user ID: {}", current.id());
    Json(ApiResponse::ok(
        UserResponse::new(current.0, &state.storage),
        "Current user retrieved successfully",
    ))
}

/// Get a specific user by ID
#[utoipa::path(
    get,
    path = "/api/v1/users/{user_id}",
    tag = "users",
    params(
        ("user_id" = i32, Path, description = "User ID"),
    ),
    responses(
        (status = 200, description = "User retrieved successfully", body = ApiResponse<UserResponse>),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
        (status = 404, description = "User not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    security(("basic_auth" = []))
)]
#[instrument(skip(state))]
pub async fn get_user(
    ApiPath(user_id): ApiPath<i32>,
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<UserResponse>>, ApiError> {
    trace!("Entering get_user function for user_id: {}", user_id);

    let found = accounts::find_account(&state.db, user_id).await?;

    info!("Successfully retrieved user with ID: {}, username: {}", found.id, found.username);
    Ok(Json(ApiResponse::ok(
        UserResponse::new(found, &state.storage),
        "User retrieved successfully",
    )))
}

/// Replace a user's editable fields
#[utoipa::path(
    put,
    path = "/api/v1/users/{user_id}",
    tag = "users",
    params(
        ("user_id" = i32, Path, description = "User ID"),
    ),
    request_body = UpdateUserRequest,
    responses(
        (status = 200, description = "User updated successfully", body = ApiResponse<UserResponse>),
        (status = 400, description = "Invalid request", body = ErrorResponse),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
        (status = 404, description = "User not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    security(("basic_auth" = []))
)]
#[instrument(skip(state))]
pub async fn update_user(
    ApiPath(user_id): ApiPath<i32>,
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    ApiJson(request): ApiJson<UpdateUserRequest>,
) -> Result<Json<ApiResponse<UserResponse>>, ApiError> {
    trace!("Entering update_user function for user_id: {}", user_id);

    if request.username.is_none() {
        warn!("PUT on user {} without username", user_id);
        return Err(ApiError::field("username", REQUIRED));
    }

    apply_update(&state, user_id, request, current.id()).await
}

/// Update some of a user's fields
#[utoipa::path(
    patch,
    path = "/api/v1/users/{user_id}",
    tag = "users",
    params(
        ("user_id" = i32, Path, description = "User ID"),
    ),
    request_body = UpdateUserRequest,
    responses(
        (status = 200, description = "User updated successfully", body = ApiResponse<UserResponse>),
        (status = 400, description = "Invalid request", body = ErrorResponse),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
        (status = 404, description = "User not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    security(("basic_auth" = []))
)]
#[instrument(skip(state))]
pub async fn partial_update_user(
    ApiPath(user_id): ApiPath<i32>,
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    ApiJson(request): ApiJson<UpdateUserRequest>,
) -> Result<Json<ApiResponse<UserResponse>>, ApiError> {
    trace!("Entering partial_update_user function for user_id: {}", user_id);
    apply_update(&state, user_id, request, current.id()).await
}

async fn apply_update(
    state: &AppState,
    user_id: i32,
    request: UpdateUserRequest,
    actor_id: i32,
) -> Result<Json<ApiResponse<UserResponse>>, ApiError> {
    let updated = accounts::update_account(
        &state.db,
        &state.password_policy,
        user_id,
        request.into(),
        Some(actor_id),
    )
    .await?;

    Ok(Json(ApiResponse::ok(
        UserResponse::new(updated, &state.storage),
        "User updated successfully",
    )))
}

/// Delete a user
#[utoipa::path(
    delete,
    path = "/api/v1/users/{user_id}",
    tag = "users",
    params(
        ("user_id" = i32, Path, description = "User ID"),
    ),
    responses(
        (status = 200, description = "User deleted successfully", body = ApiResponse<String>),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
        (status = 404, description = "User not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    security(("basic_auth" = []))
)]
#[instrument(skip(state))]
pub async fn delete_user(
    ApiPath(user_id): ApiPath<i32>,
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<String>>, ApiError> {
    trace!("Entering delete_user function for user_id: {}", user_id);

    accounts::delete_account(&state.db, &state.storage, user_id).await?;

    Ok(Json(ApiResponse::ok(
        format!("User {} deleted", user_id),
        "User deleted successfully",
    )))
}

/// Upload a profile photo
///
/// Multipart body with the image in the `file` field.
#[utoipa::path(
    put,
    path = "/api/v1/users/{user_id}/profile-photo",
    tag = "users",
    params(
        ("user_id" = i32, Path, description = "User ID"),
    ),
    request_body(content = String, description = "Image file in the `file` field", content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Profile photo stored", body = ApiResponse<UserResponse>),
        (status = 400, description = "Missing or invalid image", body = ErrorResponse),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
        (status = 404, description = "User not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    security(("basic_auth" = []))
)]
#[instrument(skip(state, multipart))]
pub async fn upload_profile_photo(
    ApiPath(user_id): ApiPath<i32>,
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ApiResponse<UserResponse>>, ApiError> {
    trace!("Entering upload_profile_photo function for user_id: {}", user_id);
    let mut multipart = multipart?;

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        if field.name() == Some("file") {
            let bytes = field.bytes().await.map_err(|e| ApiError::BadRequest(e.body_text()))?;
            upload = Some(bytes);
            break;
        }
        debug!("Ignoring multipart field {:?}", field.name());
    }

    let Some(bytes) = upload else {
        warn!("Profile photo upload for user {} without a file field", user_id);
        return Err(ApiError::field("profile_photo", "No file was submitted."));
    };

    let updated = accounts::set_profile_photo(&state.db, &state.storage, user_id, &bytes, Some(current.id())).await?;

    Ok(Json(ApiResponse::ok(
        UserResponse::new(updated, &state.storage),
        "Profile photo updated successfully",
    )))
}

/// Remove the profile photo
#[utoipa::path(
    delete,
    path = "/api/v1/users/{user_id}/profile-photo",
    tag = "users",
    params(
        ("user_id" = i32, Path, description = "User ID"),
    ),
    responses(
        (status = 200, description = "Profile photo removed", body = ApiResponse<UserResponse>),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
        (status = 404, description = "User not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    security(("basic_auth" = []))
)]
#[instrument(skip(state))]
pub async fn delete_profile_photo(
    ApiPath(user_id): ApiPath<i32>,
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> Result<Json<ApiResponse<UserResponse>>, ApiError> {
    trace!("Entering delete_profile_photo function for user_id: {}", user_id);

    let updated = accounts::clear_profile_photo(&state.db, &state.storage, user_id, Some(current.id())).await?;

    Ok(Json(ApiResponse::ok(
        UserResponse::new(updated, &state.storage),
        "Profile photo removed successfully",
    )))
}
