//! Server-rendered admin console for user accounts.
//!
//! Every page requires an authenticated, active staff user.

pub mod display;
pub mod forms;
pub mod templates;
pub mod views;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use model::entities::user;

use crate::auth::{require_authentication, require_staff};
use crate::schemas::AppState;
use crate::storage::MAX_UPLOAD_BODY_BYTES;

pub const INDEX_ROUTE: &str = "/admin/";
pub const CHANGE_LIST_ROUTE: &str = "/admin/accounts/user/";
pub const ADD_ROUTE: &str = "/admin/accounts/user/add/";
pub const CHANGE_ROUTE: &str = "/admin/accounts/user/:user_id/change/";
pub const PASSWORD_CHANGE_ROUTE: &str = "/admin/accounts/user/:user_id/password/";
pub const DELETE_ROUTE: &str = "/admin/accounts/user/:user_id/delete/";

/// Rows per change list page.
pub const LIST_PER_PAGE: u64 = 25;

/// "Show all" is offered up to this many rows.
pub const LIST_MAX_SHOW_ALL: u64 = 100;

/// Sortable change list columns, by `o` parameter value.
pub const LIST_ORDERING_FIELDS: &[(&str, user::Column)] = &[
    ("username", user::Column::Username),
    ("email", user::Column::Email),
    ("first_name", user::Column::FirstName),
    ("phone_number", user::Column::PhoneNumber),
    ("is_staff", user::Column::IsStaff),
    ("date_joined", user::Column::DateJoined),
];

/// Fills the `:user_id` segment of a route template.
pub fn url_for(route: &str, user_id: i32) -> String {
    route.replace(":user_id", &user_id.to_string())
}

pub fn routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route(INDEX_ROUTE, get(views::index))
        .route(CHANGE_LIST_ROUTE, get(views::change_list))
        // Add and change forms may carry a profile photo
        .route(
            ADD_ROUTE,
            get(views::add_form)
                .post(views::add_submit)
                .layer(DefaultBodyLimit::max(MAX_UPLOAD_BODY_BYTES)),
        )
        .route(
            CHANGE_ROUTE,
            get(views::change_form)
                .post(views::change_submit)
                .layer(DefaultBodyLimit::max(MAX_UPLOAD_BODY_BYTES)),
        )
        .route(PASSWORD_CHANGE_ROUTE, get(views::password_form).post(views::password_submit))
        .route(DELETE_ROUTE, post(views::delete_submit))
        // Layers run bottom-up: authentication first, then the staff check
        .route_layer(middleware::from_fn(require_staff))
        .route_layer(middleware::from_fn_with_state(state, require_authentication))
}
