use std::collections::BTreeMap;

use axum::{
    extract::{Query, State},
    response::{IntoResponse, Redirect, Response},
    Extension,
};
use chrono::{DateTime, Utc};
use minijinja::context;
use model::entities::user;
use sea_orm::{EntityTrait, PaginatorTrait};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, trace, warn};

use super::display::{avatar_html, full_name_display, password_field_html};
use super::forms::{
    attach_errors, AdminPasswordChangeForm, FormField, Submission, UserChangeForm, UserCreationForm,
};
use super::templates::render;
use super::{
    url_for, ADD_ROUTE, CHANGE_LIST_ROUTE, CHANGE_ROUTE, DELETE_ROUTE, LIST_MAX_SHOW_ALL, LIST_ORDERING_FIELDS,
    LIST_PER_PAGE,
};
use crate::auth::CurrentUser;
use crate::error::{ApiError, FieldErrors};
use crate::extract::{ApiForm, ApiPath};
use crate::schemas::AppState;
use crate::services::users::{self as accounts, AccountFilter, JoinedWithin, DEFAULT_ORDERING};

type Params = BTreeMap<&'static str, String>;

/// Query string of the change list.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChangeListQuery {
    pub q: Option<String>,
    pub o: Option<String>,
    pub p: Option<u64>,
    pub all: Option<String>,
    pub is_staff: Option<String>,
    pub is_superuser: Option<String>,
    pub is_active: Option<String>,
    pub date_joined: Option<String>,
}

fn parse_flag(value: Option<&str>) -> Option<bool> {
    match value {
        Some("1") => Some(true),
        Some("0") => Some(false),
        _ => None,
    }
}

impl ChangeListQuery {
    fn filter(&self) -> AccountFilter {
        AccountFilter {
            is_staff: parse_flag(self.is_staff.as_deref()),
            is_superuser: parse_flag(self.is_superuser.as_deref()),
            is_active: parse_flag(self.is_active.as_deref()),
            joined: self.date_joined.as_deref().and_then(JoinedWithin::parse),
            search: self.q.clone().filter(|q| !q.trim().is_empty()),
        }
    }

    fn show_all(&self) -> bool {
        self.all.as_deref() == Some("1")
    }

    /// Current parameters minus the page number.
    fn params(&self) -> Params {
        let mut params = Params::new();
        let fields = [
            ("q", &self.q),
            ("o", &self.o),
            ("all", &self.all),
            ("is_staff", &self.is_staff),
            ("is_superuser", &self.is_superuser),
            ("is_active", &self.is_active),
            ("date_joined", &self.date_joined),
        ];
        for (key, value) in fields {
            if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
                params.insert(key, value.to_string());
            }
        }
        params
    }
}

fn with_param(params: &Params, key: &'static str, value: Option<String>) -> Params {
    let mut params = params.clone();
    match value {
        Some(value) => params.insert(key, value),
        None => params.remove(key),
    };
    params
}

#[derive(Debug, Serialize)]
struct FilterChoice {
    label: &'static str,
    selected: bool,
    params: Params,
}

#[derive(Debug, Serialize)]
struct ListFilter {
    title: &'static str,
    choices: Vec<FilterChoice>,
}

#[derive(Debug, Serialize)]
struct Column {
    label: &'static str,
    params: Option<Params>,
    /// `ascending`, `descending` or empty
    sorted: &'static str,
}

#[derive(Debug, Serialize)]
struct PageLink {
    number: u64,
    current: bool,
    params: Params,
}

#[derive(Debug, Serialize)]
struct HiddenInput {
    name: &'static str,
    value: String,
}

#[derive(Debug, Serialize)]
struct UserRow {
    change_url: String,
    avatar: String,
    username: String,
    email: String,
    full_name: String,
    phone_number: String,
    is_staff: bool,
    date_joined: String,
}

#[derive(Debug, Serialize)]
struct ReadonlyField {
    label: &'static str,
    value: String,
}

fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.format("%b %-d, %Y, %H:%M").to_string()
}

fn list_filters(query: &ChangeListQuery, params: &Params) -> Vec<ListFilter> {
    let mut base = params.clone();
    base.remove("all");

    let flag_filter = |title: &'static str, key: &'static str, current: Option<bool>| ListFilter {
        title,
        choices: vec![
            FilterChoice {
                label: "All",
                selected: current.is_none(),
                params: with_param(&base, key, None),
            },
            FilterChoice {
                label: "Yes",
                selected: current == Some(true),
                params: with_param(&base, key, Some("1".to_string())),
            },
            FilterChoice {
                label: "No",
                selected: current == Some(false),
                params: with_param(&base, key, Some("0".to_string())),
            },
        ],
    };

    let filter = query.filter();
    let mut date_choices = vec![FilterChoice {
        label: "Any date",
        selected: filter.joined.is_none(),
        params: with_param(&base, "date_joined", None),
    }];
    date_choices.extend(JoinedWithin::ALL.into_iter().map(|window| FilterChoice {
        label: window.label(),
        selected: filter.joined == Some(window),
        params: with_param(&base, "date_joined", Some(window.as_str().to_string())),
    }));

    vec![
        flag_filter("staff status", "is_staff", filter.is_staff),
        flag_filter("superuser status", "is_superuser", filter.is_superuser),
        flag_filter("active", "is_active", filter.is_active),
        ListFilter {
            title: "date joined",
            choices: date_choices,
        },
    ]
}

fn list_columns(query: &ChangeListQuery, params: &Params) -> Vec<Column> {
    // Sort state comes from the first `o` term
    let (sorted_field, descending) = match query.o.as_deref().and_then(|o| o.split(',').next()) {
        Some(term) => match term.trim().strip_prefix('-') {
            Some(field) => (field.to_string(), true),
            None => (term.trim().to_string(), false),
        },
        None => (String::new(), false),
    };

    let labels = [
        ("username", "Username"),
        ("email", "Email address"),
        ("first_name", "Full name"),
        ("phone_number", "Phone number"),
        ("is_staff", "Staff status"),
        ("date_joined", "Date joined"),
    ];

    let mut columns = vec![Column {
        label: "Avatar",
        params: None,
        sorted: "",
    }];
    for (field, label) in labels {
        let is_sorted = sorted_field == field && LIST_ORDERING_FIELDS.iter().any(|(name, _)| *name == field);
        let next = if is_sorted && !descending { format!("-{}", field) } else { field.to_string() };
        columns.push(Column {
            label,
            params: Some(with_param(params, "o", Some(next))),
            sorted: match (is_sorted, descending) {
                (true, false) => "ascending",
                (true, true) => "descending",
                _ => "",
            },
        });
    }
    columns
}

#[instrument]
pub async fn index() -> Redirect {
    Redirect::to(CHANGE_LIST_ROUTE)
}

#[instrument(skip(state, current))]
pub async fn change_list(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Query(query): Query<ChangeListQuery>,
) -> Result<Response, ApiError> {
    trace!("Entering admin change_list");

    let filter = query.filter();
    let ordering = accounts::parse_ordering(query.o.as_deref(), LIST_ORDERING_FIELDS, DEFAULT_ORDERING);
    let params = query.params();

    // Probe the filtered total first: "show all" only applies to small result sets
    let show_all = query.show_all()
        && accounts::filtered_query(&filter, &ordering).count(&state.db).await? <= LIST_MAX_SHOW_ALL;
    let (page_number, page_size) = if show_all {
        (1, LIST_MAX_SHOW_ALL)
    } else {
        (query.p.unwrap_or(1).max(1), LIST_PER_PAGE)
    };

    let page = accounts::list_accounts(&state.db, &filter, &ordering, page_number, page_size).await?;
    let total_count = user::Entity::find().count(&state.db).await?;
    debug!("Change list page {} with {} of {} users", page.page, page.items.len(), page.total);

    let users: Vec<UserRow> = page
        .items
        .iter()
        .map(|account| UserRow {
            change_url: url_for(CHANGE_ROUTE, account.id),
            avatar: avatar_html(account, &state.storage),
            username: account.username.clone(),
            email: account.email.clone(),
            full_name: full_name_display(account),
            phone_number: account.phone_number.clone().unwrap_or_default(),
            is_staff: account.is_staff,
            date_joined: format_timestamp(&account.date_joined),
        })
        .collect();

    let pages: Vec<PageLink> = if show_all || page.total_pages <= 1 {
        Vec::new()
    } else {
        (1..=page.total_pages)
            .map(|number| PageLink {
                number,
                current: number == page.page,
                params: with_param(&params, "p", Some(number.to_string())),
            })
            .collect()
    };
    let show_all_params = (!show_all && page.total_pages > 1 && page.total <= LIST_MAX_SHOW_ALL)
        .then(|| with_param(&params, "all", Some("1".to_string())));

    let search_hidden: Vec<HiddenInput> = params
        .iter()
        .filter(|(key, _)| **key != "q")
        .map(|(key, value)| HiddenInput {
            name: *key,
            value: value.clone(),
        })
        .collect();

    let html = render(
        &state.templates,
        "admin/change_list.html",
        context! {
            title => "Select user to change",
            current_user => current.0.username,
            add_url => ADD_ROUTE,
            q => query.q.clone().unwrap_or_default(),
            search_hidden => search_hidden,
            clear_search_params => with_param(&params, "q", None),
            result_count => page.total,
            total_count => total_count,
            users => users,
            columns => list_columns(&query, &params),
            filters => list_filters(&query, &params),
            pages => pages,
            show_all_params => show_all_params,
            errors => Vec::<String>::new(),
        },
    )?;
    Ok(html.into_response())
}

fn render_change_form(
    state: &AppState,
    current: &CurrentUser,
    title: &str,
    action: &str,
    mut fields: Vec<FormField>,
    errors: &FieldErrors,
    account: Option<&user::Model>,
) -> Result<Response, ApiError> {
    let non_field_errors = attach_errors(&mut fields, errors);

    let readonly: Vec<ReadonlyField> = account
        .map(|account| {
            vec![
                ReadonlyField {
                    label: "Last login",
                    value: account.last_login.as_ref().map(format_timestamp).unwrap_or_else(|| "-".to_string()),
                },
                ReadonlyField {
                    label: "Date joined",
                    value: format_timestamp(&account.date_joined),
                },
            ]
        })
        .unwrap_or_default();

    let html = render(
        &state.templates,
        "admin/change_form.html",
        context! {
            title => title,
            current_user => current.0.username.clone(),
            action => action,
            fields => fields,
            errors => non_field_errors,
            readonly => readonly,
            avatar => account.map(|account| avatar_html(account, &state.storage)),
            password_html => account.map(|account| password_field_html(account.id)),
            delete_url => account.map(|account| url_for(DELETE_ROUTE, account.id)),
        },
    )?;
    Ok(html.into_response())
}

#[instrument(skip(state, current))]
pub async fn add_form(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> Result<Response, ApiError> {
    let form = UserCreationForm::initial();
    let fields = form.fields(&state.password_policy.help_text());
    render_change_form(&state, &current, "Add user", ADD_ROUTE, fields, &FieldErrors::new(), None)
}

/// Errors of an uploaded photo, checked before anything is written.
fn photo_errors(photo: Option<&[u8]>) -> FieldErrors {
    match photo.map(accounts::check_profile_photo) {
        Some(Err(errors)) => errors,
        _ => FieldErrors::new(),
    }
}

#[instrument(skip(state, current, submission))]
pub async fn add_submit(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    submission: Submission<UserCreationForm>,
) -> Result<Response, ApiError> {
    trace!("Admin add user submitted by {}", current.id());
    let Submission { form, photo } = submission;

    let new = form.to_new_account();
    let mut errors = form.required_errors();
    errors.merge(UserCreationForm::map_service_errors(
        accounts::check_new_account(&state.db, &state.password_policy, &new).await?,
    ));
    errors.merge(photo_errors(photo.as_deref()));

    if errors.is_empty() {
        match accounts::create_account(&state.db, &state.password_policy, new, Some(current.id())).await {
            Ok(created) => {
                if let Some(bytes) = &photo {
                    accounts::set_profile_photo(&state.db, &state.storage, created.id, bytes, Some(current.id()))
                        .await?;
                }
                info!("Admin {} added user {}", current.id(), created.id);
                return Ok(Redirect::to(&url_for(CHANGE_ROUTE, created.id)).into_response());
            }
            Err(ApiError::Validation(service_errors)) => {
                errors = UserCreationForm::map_service_errors(service_errors);
            }
            Err(e) => return Err(e),
        }
    }

    warn!("Admin add user form rejected: {:?}", errors);
    let fields = form.fields(&state.password_policy.help_text());
    render_change_form(&state, &current, "Add user", ADD_ROUTE, fields, &errors, None)
}

#[instrument(skip(state, current))]
pub async fn change_form(
    ApiPath(user_id): ApiPath<i32>,
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> Result<Response, ApiError> {
    let account = accounts::find_account(&state.db, user_id).await?;
    let form = UserChangeForm::from_model(&account);
    let fields = form.fields(account.profile_photo.is_some());
    let action = url_for(CHANGE_ROUTE, user_id);
    render_change_form(
        &state,
        &current,
        &format!("Change user: {}", account.username),
        &action,
        fields,
        &FieldErrors::new(),
        Some(&account),
    )
}

#[instrument(skip(state, current, submission))]
pub async fn change_submit(
    ApiPath(user_id): ApiPath<i32>,
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    submission: Submission<UserChangeForm>,
) -> Result<Response, ApiError> {
    trace!("Admin change of user {} submitted by {}", user_id, current.id());
    let Submission { form, photo } = submission;

    let account = accounts::find_account(&state.db, user_id).await?;
    let changes = form.to_changes();
    let mut errors = accounts::check_account_changes(&state.db, &state.password_policy, &account, &changes).await?;
    errors.merge(photo_errors(photo.as_deref()));

    if errors.is_empty() {
        match accounts::update_account(&state.db, &state.password_policy, user_id, changes, Some(current.id())).await {
            Ok(_) => {
                // A new upload wins over the clear checkbox
                if let Some(bytes) = &photo {
                    accounts::set_profile_photo(&state.db, &state.storage, user_id, bytes, Some(current.id())).await?;
                } else if form.clears_photo() {
                    accounts::clear_profile_photo(&state.db, &state.storage, user_id, Some(current.id())).await?;
                }
                info!("Admin {} changed user {}", current.id(), user_id);
                return Ok(Redirect::to(CHANGE_LIST_ROUTE).into_response());
            }
            Err(ApiError::Validation(service_errors)) => errors = service_errors,
            Err(e) => return Err(e),
        }
    }

    warn!("Admin change form for user {} rejected: {:?}", user_id, errors);
    let fields = form.fields(account.profile_photo.is_some());
    let action = url_for(CHANGE_ROUTE, user_id);
    render_change_form(
        &state,
        &current,
        &format!("Change user: {}", account.username),
        &action,
        fields,
        &errors,
        Some(&account),
    )
}

fn render_password_form(
    state: &AppState,
    current: &CurrentUser,
    account: &user::Model,
    errors: &FieldErrors,
) -> Result<Response, ApiError> {
    let mut fields = AdminPasswordChangeForm::fields(&state.password_policy.help_text());
    let non_field_errors = attach_errors(&mut fields, errors);

    let html = render(
        &state.templates,
        "admin/password_change.html",
        context! {
            title => format!("Change password: {}", account.username),
            current_user => current.0.username.clone(),
            username => account.username.clone(),
            change_url => url_for(CHANGE_ROUTE, account.id),
            fields => fields,
            errors => non_field_errors,
        },
    )?;
    Ok(html.into_response())
}

#[instrument(skip(state, current))]
pub async fn password_form(
    ApiPath(user_id): ApiPath<i32>,
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> Result<Response, ApiError> {
    let account = accounts::find_account(&state.db, user_id).await?;
    render_password_form(&state, &current, &account, &FieldErrors::new())
}

#[instrument(skip(state, current, form))]
pub async fn password_submit(
    ApiPath(user_id): ApiPath<i32>,
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    ApiForm(form): ApiForm<AdminPasswordChangeForm>,
) -> Result<Response, ApiError> {
    let account = accounts::find_account(&state.db, user_id).await?;

    let errors = form.required_errors();
    if !errors.is_empty() {
        return render_password_form(&state, &current, &account, &errors);
    }

    match accounts::change_password(
        &state.db,
        &state.password_policy,
        user_id,
        form.password1,
        form.password2,
        Some(current.id()),
    )
    .await
    {
        Ok(_) => {
            info!("Admin {} changed the password of user {}", current.id(), user_id);
            Ok(Redirect::to(&url_for(CHANGE_ROUTE, user_id)).into_response())
        }
        Err(ApiError::Validation(service_errors)) => {
            warn!("Admin password change for user {} rejected", user_id);
            let errors = AdminPasswordChangeForm::map_service_errors(service_errors);
            render_password_form(&state, &current, &account, &errors)
        }
        Err(e) => Err(e),
    }
}

#[instrument(skip(state, current))]
pub async fn delete_submit(
    ApiPath(user_id): ApiPath<i32>,
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> Result<Response, ApiError> {
    accounts::delete_account(&state.db, &state.storage, user_id).await?;
    info!("Admin {} deleted user {}", current.id(), user_id);
    Ok(Redirect::to(CHANGE_LIST_ROUTE).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(pairs: &[(&str, &str)]) -> ChangeListQuery {
        let mut query = ChangeListQuery::default();
        for (key, value) in pairs {
            let value = Some(value.to_string());
            match *key {
                "q" => query.q = value,
                "o" => query.o = value,
                "is_staff" => query.is_staff = value,
                "date_joined" => query.date_joined = value,
                "all" => query.all = value,
                _ => {}
            }
        }
        query
    }

    #[test]
    fn test_flags_parse_only_one_and_zero() {
        assert_eq!(parse_flag(Some("1")), Some(true));
        assert_eq!(parse_flag(Some("0")), Some(false));
        assert_eq!(parse_flag(Some("yes")), None);
        assert_eq!(parse_flag(None), None);
    }

    #[test]
    fn test_filter_from_query() {
        let filter = query(&[("is_staff", "1"), ("date_joined", "this_month"), ("q", "  ")]).filter();
        assert_eq!(filter.is_staff, Some(true));
        assert_eq!(filter.joined, Some(JoinedWithin::ThisMonth));
        assert_eq!(filter.search, None);
    }

    #[test]
    fn test_filter_links_keep_other_params() {
        let query = query(&[("q", "ali"), ("is_staff", "1"), ("all", "1")]);
        let filters = list_filters(&query, &query.params());
        let active_yes = &filters[2].choices[1];
        assert_eq!(active_yes.params.get("is_active").map(String::as_str), Some("1"));
        assert_eq!(active_yes.params.get("q").map(String::as_str), Some("ali"));
        assert!(!active_yes.params.contains_key("all"));
        assert!(filters[0].choices[1].selected);
    }

    #[test]
    fn test_sorted_column_toggles_direction() {
        let query = query(&[("o", "username")]);
        let columns = list_columns(&query, &query.params());
        let username = &columns[1];
        assert_eq!(username.sorted, "ascending");
        assert_eq!(
            username.params.as_ref().and_then(|p| p.get("o")).map(String::as_str),
            Some("-username")
        );
        assert!(columns[0].params.is_none());
    }
}
