use std::collections::BTreeMap;
use std::sync::Arc;

use minijinja::Environment;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use utoipa::{OpenApi, ToSchema};

use crate::config::Settings;
use crate::handlers::users::{
    CreateUserRequest, UpdateUserRequest, UserListItem, UserPage, UserResponse,
};
use crate::passwords::PasswordPolicy;
use crate::storage::MediaStorage;

/// Application state shared across handlers
#[derive(Clone, Debug)]
pub struct AppState {
    /// Database connection
    pub db: DatabaseConnection,
    /// Loaded settings
    pub settings: Arc<Settings>,
    /// Where profile photos are written and how they are addressed
    pub storage: MediaStorage,
    /// Password rules applied on creation and password changes
    pub password_policy: Arc<PasswordPolicy>,
    /// Admin console templates
    pub templates: Arc<Environment<'static>>,
}

/// API response wrapper
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiResponse<T> {
    /// Response data
    pub data: T,
    /// Response message
    pub message: String,
    /// Success status
    pub success: bool,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T, message: impl Into<String>) -> Self {
        Self {
            data,
            message: message.into(),
            success: true,
        }
    }
}

/// Error response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,
    /// Error code
    pub code: String,
    /// Success status (always false for errors)
    pub success: bool,
    /// Per-field validation messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<BTreeMap<String, Vec<String>>>,
}

/// Health check response
#[derive(Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Service status
    pub status: String,
    /// Service version
    pub version: String,
    /// Database connection status
    pub database: String,
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::health::health_check,
        crate::handlers::users::create_user,
        crate::handlers::users::get_users,
        crate::handlers::users::get_current_user,
        crate::handlers::users::get_user,
        crate::handlers::users::update_user,
        crate::handlers::users::partial_update_user,
        crate::handlers::users::delete_user,
        crate::handlers::users::upload_profile_photo,
        crate::handlers::users::delete_profile_photo,
    ),
    components(
        schemas(
            ErrorResponse,
            HealthResponse,
            CreateUserRequest,
            UpdateUserRequest,
            UserResponse,
            UserListItem,
            UserPage,
        )
    ),
    modifiers(&BasicAuthAddon),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "users", description = "User account endpoints"),
    ),
    info(
        title = "Accounts API",
        description = "User accounts: CRUD, current user lookup and profile photos",
        version = "0.1.0",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    )
)]
pub struct ApiDoc;

/// Registers the HTTP Basic security scheme used by every user endpoint.
struct BasicAuthAddon;

impl utoipa::Modify for BasicAuthAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        use utoipa::openapi::security::{Http, HttpAuthScheme, SecurityScheme};

        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "basic_auth",
            SecurityScheme::Http(Http::new(HttpAuthScheme::Basic)),
        );
    }
}
