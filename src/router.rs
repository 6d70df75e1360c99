use crate::admin;
use crate::auth::require_authentication;
use crate::handlers::{
    health::health_check,
    users::{
        create_user, delete_profile_photo, delete_user, get_current_user, get_user, get_users,
        partial_update_user, update_user, upload_profile_photo,
    },
};
use crate::schemas::{ApiDoc, AppState};
use crate::storage::MAX_UPLOAD_BODY_BYTES;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, put},
    Router,
};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, services::ServeDir, timeout::TimeoutLayer, trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// User endpoints; every one requires an authenticated, active user.
fn user_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/api/v1/users", get(get_users).post(create_user))
        // Static segment wins over `:user_id`
        .route("/api/v1/users/me", get(get_current_user))
        .route(
            "/api/v1/users/:user_id",
            get(get_user)
                .put(update_user)
                .patch(partial_update_user)
                .delete(delete_user),
        )
        .route(
            "/api/v1/users/:user_id/profile-photo",
            put(upload_profile_photo)
                .delete(delete_profile_photo)
                .layer(DefaultBodyLimit::max(MAX_UPLOAD_BODY_BYTES)),
        )
        .route_layer(middleware::from_fn_with_state(state, require_authentication))
}

/// Create application router with all routes and middleware
pub fn create_router(state: AppState) -> Router {
    let media_url = state.settings.media_url.trim_end_matches('/').to_string();
    let media_dir = ServeDir::new(state.storage.root());
    let timeout = Duration::from_secs(state.settings.request_timeout_secs);

    Router::new()
        // Health check
        .route("/health", get(health_check))
        .merge(user_routes(state.clone()))
        .merge(admin::routes(state.clone()))
        // Uploaded profile photos
        .nest_service(&media_url, media_dir)
        // Swagger UI
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // Add middleware
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(TimeoutLayer::new(timeout))
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
