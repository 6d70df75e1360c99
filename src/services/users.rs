//! Account operations shared by the REST API, the admin console and the CLI.
//!
//! Every write is a single validate-then-persist step: all field errors are
//! collected first and nothing is written when any is found.

use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc};
use model::entities::user;
use model::timestamps::Timestamped;
use sea_orm::sea_query::{Condition, Expr, Func, LikeExpr};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, Order, PaginatorTrait, QueryFilter, QueryOrder,
    Select, Set,
};
use serde::Deserialize;
use tracing::{debug, info, instrument, trace, warn};
use validator::{Validate, ValidateEmail, ValidationError};

use crate::error::{ApiError, FieldErrors, REQUIRED, USERNAME_TAKEN};
use crate::passwords::{hash_password, PasswordPolicy, UserAttributes};
use crate::storage::{ImageFormat, MediaStorage, MAX_PHOTO_BYTES, PROFILE_PHOTO_DIR};

pub const PASSWORD_MISMATCH: &str = "The two password fields didn't match.";
pub const INVALID_IMAGE: &str =
    "Upload a valid image. The file you uploaded was either not an image or a corrupted image.";

/// Fields searched by the free-text `search` parameter.
pub const SEARCH_FIELDS: [user::Column; 5] = [
    user::Column::Username,
    user::Column::Email,
    user::Column::FirstName,
    user::Column::LastName,
    user::Column::PhoneNumber,
];

/// Ordering fields accepted by the REST API.
pub const API_ORDERING_FIELDS: &[(&str, user::Column)] = &[
    ("date_joined", user::Column::DateJoined),
    ("username", user::Column::Username),
    ("email", user::Column::Email),
];

/// Newest accounts first.
pub const DEFAULT_ORDERING: &str = "-date_joined";

pub const DEFAULT_PAGE_SIZE: u64 = 25;
pub const MAX_PAGE_SIZE: u64 = 100;

fn invalid(code: &'static str, message: &'static str) -> ValidationError {
    let mut error = ValidationError::new(code);
    error.message = Some(message.into());
    error
}

/// Letters, digits and `@ . + - _` only.
pub fn validate_username(username: &str) -> Result<(), ValidationError> {
    if username.is_empty() {
        return Err(invalid("blank", "This field may not be blank."));
    }
    let valid = username
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '@' | '.' | '+' | '-' | '_'));
    if valid {
        Ok(())
    } else {
        Err(invalid(
            "username",
            "Enter a valid username. This value may contain only letters, numbers, and @/./+/-/_ characters.",
        ))
    }
}

/// Empty means "no email"; anything else must be well-formed.
pub fn validate_optional_email(email: &str) -> Result<(), ValidationError> {
    if email.is_empty() || email.validate_email() {
        Ok(())
    } else {
        Err(invalid("email", "Enter a valid email address."))
    }
}

/// Candidate fields of a new account.
#[derive(Clone, Default, Validate)]
pub struct NewAccount {
    #[validate(
        length(max = 150, message = "Ensure this field has no more than 150 characters."),
        custom(function = "validate_username")
    )]
    pub username: String,
    #[validate(
        length(max = 254, message = "Ensure this field has no more than 254 characters."),
        custom(function = "validate_optional_email")
    )]
    pub email: String,
    #[validate(length(max = 150, message = "Ensure this field has no more than 150 characters."))]
    pub first_name: String,
    #[validate(length(max = 150, message = "Ensure this field has no more than 150 characters."))]
    pub last_name: String,
    #[validate(length(max = 20, message = "Ensure this field has no more than 20 characters."))]
    pub phone_number: Option<String>,
    pub password: String,
    /// Second entry of the password; checked when present.
    pub password_confirm: Option<String>,
    pub is_staff: bool,
    pub is_superuser: bool,
    pub is_active: bool,
}

impl std::fmt::Debug for NewAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewAccount")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("is_staff", &self.is_staff)
            .field("is_superuser", &self.is_superuser)
            .finish_non_exhaustive()
    }
}

impl NewAccount {
    fn attributes(&self) -> UserAttributes<'_> {
        UserAttributes {
            username: &self.username,
            first_name: &self.first_name,
            last_name: &self.last_name,
            email: &self.email,
        }
    }
}

/// A partial update: `None` leaves the stored value untouched.
#[derive(Clone, Default, Validate)]
pub struct AccountChanges {
    #[validate(
        length(max = 150, message = "Ensure this field has no more than 150 characters."),
        custom(function = "validate_username")
    )]
    pub username: Option<String>,
    #[validate(
        length(max = 254, message = "Ensure this field has no more than 254 characters."),
        custom(function = "validate_optional_email")
    )]
    pub email: Option<String>,
    #[validate(length(max = 150, message = "Ensure this field has no more than 150 characters."))]
    pub first_name: Option<String>,
    #[validate(length(max = 150, message = "Ensure this field has no more than 150 characters."))]
    pub last_name: Option<String>,
    /// An empty string clears the phone number.
    #[validate(length(max = 20, message = "Ensure this field has no more than 20 characters."))]
    pub phone_number: Option<String>,
    /// Rehashed only when present and non-empty.
    pub password: Option<String>,
    pub password_confirm: Option<String>,
    pub is_staff: Option<bool>,
    pub is_superuser: Option<bool>,
    pub is_active: Option<bool>,
}

impl AccountChanges {
    /// The password to set, if one was supplied and is non-empty.
    pub fn new_password(&self) -> Option<&str> {
        self.password.as_deref().filter(|p| !p.is_empty())
    }
}

impl std::fmt::Debug for AccountChanges {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountChanges")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("password", &self.password.as_ref().map(|_| "********"))
            .finish_non_exhaustive()
    }
}

/// Join date windows offered by the admin filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinedWithin {
    Today,
    #[serde(rename = "past_7_days")]
    Past7Days,
    ThisMonth,
    ThisYear,
}

impl JoinedWithin {
    pub const ALL: [JoinedWithin; 4] = [
        JoinedWithin::Today,
        JoinedWithin::Past7Days,
        JoinedWithin::ThisMonth,
        JoinedWithin::ThisYear,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JoinedWithin::Today => "today",
            JoinedWithin::Past7Days => "past_7_days",
            JoinedWithin::ThisMonth => "this_month",
            JoinedWithin::ThisYear => "this_year",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            JoinedWithin::Today => "Today",
            JoinedWithin::Past7Days => "Past 7 days",
            JoinedWithin::ThisMonth => "This month",
            JoinedWithin::ThisYear => "This year",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|window| window.as_str() == value)
    }

    /// Start of the window containing `now`.
    pub fn since(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.date_naive();
        let start = match self {
            JoinedWithin::Today => today,
            JoinedWithin::Past7Days => today - Duration::days(7),
            JoinedWithin::ThisMonth => today.with_day(1).unwrap_or(today),
            JoinedWithin::ThisYear => today.with_ordinal(1).unwrap_or(today),
        };
        start.and_time(NaiveTime::MIN).and_utc()
    }
}

/// List filters. Every field is optional.
#[derive(Debug, Clone, Default)]
pub struct AccountFilter {
    pub is_staff: Option<bool>,
    pub is_superuser: Option<bool>,
    pub is_active: Option<bool>,
    pub joined: Option<JoinedWithin>,
    pub search: Option<String>,
}

/// One page of a listing.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub page_size: u64,
    pub total_pages: u64,
}

/// Splits a search string into terms on whitespace and commas.
pub fn search_terms(raw: &str) -> Vec<String> {
    raw.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|term| !term.is_empty())
        .map(str::to_string)
        .collect()
}

/// `LIKE` pattern matching `term` anywhere, case-insensitively. `%`, `_`
/// and the escape character itself match literally.
fn contains_pattern(term: &str) -> LikeExpr {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for c in term.to_lowercase().chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    LikeExpr::new(escaped).escape('\\')
}

/// Parses `field,-other` against the allowed fields. Unknown fields are
/// dropped; when nothing valid remains `default` is used.
pub fn parse_ordering(
    raw: Option<&str>,
    allowed: &[(&str, user::Column)],
    default: &str,
) -> Vec<(user::Column, Order)> {
    let parse = |spec: &str| -> Vec<(user::Column, Order)> {
        spec.split(',')
            .map(str::trim)
            .filter_map(|term| {
                let (name, order) = match term.strip_prefix('-') {
                    Some(name) => (name, Order::Desc),
                    None => (term, Order::Asc),
                };
                allowed
                    .iter()
                    .find(|(field, _)| *field == name)
                    .map(|(_, column)| (*column, order))
            })
            .collect()
    };

    let requested = raw.map(parse).unwrap_or_default();
    if requested.is_empty() { parse(default) } else { requested }
}

/// Builds the filtered and ordered select for a listing.
pub fn filtered_query(filter: &AccountFilter, ordering: &[(user::Column, Order)]) -> Select<user::Entity> {
    let mut query = user::Entity::find();

    if let Some(is_staff) = filter.is_staff {
        query = query.filter(user::Column::IsStaff.eq(is_staff));
    }
    if let Some(is_superuser) = filter.is_superuser {
        query = query.filter(user::Column::IsSuperuser.eq(is_superuser));
    }
    if let Some(is_active) = filter.is_active {
        query = query.filter(user::Column::IsActive.eq(is_active));
    }
    if let Some(window) = filter.joined {
        query = query.filter(user::Column::DateJoined.gte(window.since(Utc::now())));
    }

    // Every term has to match at least one of the search fields
    if let Some(search) = filter.search.as_deref() {
        for term in search_terms(search) {
            let mut any_field = Condition::any();
            for column in SEARCH_FIELDS {
                let lowered = Expr::expr(Func::lower(Expr::col(column)));
                any_field = any_field.add(lowered.like(contains_pattern(&term)));
            }
            query = query.filter(any_field);
        }
    }

    let tie_break = ordering.first().map(|(_, order)| order.clone()).unwrap_or(Order::Asc);
    for (column, order) in ordering {
        query = query.order_by(*column, order.clone());
    }
    query.order_by(user::Column::Id, tie_break)
}

#[instrument(skip(db))]
pub async fn list_accounts(
    db: &DatabaseConnection,
    filter: &AccountFilter,
    ordering: &[(user::Column, Order)],
    page: u64,
    page_size: u64,
) -> Result<Page<user::Model>, ApiError> {
    let page = page.max(1);
    let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
    trace!("Listing accounts - page: {}, page_size: {}", page, page_size);

    let paginator = filtered_query(filter, ordering).paginate(db, page_size);
    let total = paginator.num_items().await?;
    let items = paginator.fetch_page(page - 1).await?;
    let total_pages = total.div_ceil(page_size);

    debug!("Fetched {} of {} accounts", items.len(), total);
    Ok(Page {
        items,
        total,
        page,
        page_size,
        total_pages,
    })
}

pub async fn find_account(db: &DatabaseConnection, user_id: i32) -> Result<user::Model, ApiError> {
    user::Entity::find_by_id(user_id)
        .one(db)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("User {}", user_id)))
}

/// Case-insensitive username lookup, optionally ignoring one account.
async fn username_taken(db: &DatabaseConnection, username: &str, except_id: Option<i32>) -> Result<bool, ApiError> {
    let mut query = user::Entity::find()
        .filter(Expr::expr(Func::lower(Expr::col(user::Column::Username))).eq(username.to_lowercase()));
    if let Some(id) = except_id {
        query = query.filter(user::Column::Id.ne(id));
    }
    Ok(query.count(db).await? > 0)
}

fn validation_errors(result: Result<(), validator::ValidationErrors>) -> FieldErrors {
    match result {
        Ok(()) => FieldErrors::new(),
        Err(errors) => errors.into(),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Collects every field error of a new account without writing anything.
pub async fn check_new_account(
    db: &DatabaseConnection,
    policy: &PasswordPolicy,
    new: &NewAccount,
) -> Result<FieldErrors, ApiError> {
    let mut errors = validation_errors(new.validate());

    if let Some(confirm) = &new.password_confirm {
        if confirm != &new.password {
            errors.add("password_confirm", PASSWORD_MISMATCH);
        }
    }
    if let Err(messages) = policy.validate(&new.password, &new.attributes()) {
        errors.extend_field("password", messages);
    }
    if !errors.contains("username") && username_taken(db, &new.username, None).await? {
        errors.add("username", USERNAME_TAKEN);
    }
    Ok(errors)
}

#[instrument(skip(db, policy))]
pub async fn create_account(
    db: &DatabaseConnection,
    policy: &PasswordPolicy,
    new: NewAccount,
    actor_id: Option<i32>,
) -> Result<user::Model, ApiError> {
    trace!("Validating new account '{}'", new.username);
    let errors = check_new_account(db, policy, &new).await?;
    if !errors.is_empty() {
        warn!("Rejected new account '{}': {:?}", new.username, errors);
        return Err(ApiError::Validation(errors));
    }

    let password_hash = hash_password(&new.password)?;
    let mut account = user::ActiveModel {
        password: Set(password_hash),
        last_login: Set(None),
        is_superuser: Set(new.is_superuser),
        username: Set(new.username),
        first_name: Set(new.first_name),
        last_name: Set(new.last_name),
        email: Set(new.email),
        is_staff: Set(new.is_staff),
        is_active: Set(new.is_active),
        phone_number: Set(non_empty(new.phone_number)),
        profile_photo: Set(None),
        ..Default::default()
    };
    account.record_actor(actor_id, true);

    let created = account.insert(db).await.map_err(ApiError::from_write_error)?;
    info!("Account created with ID: {}, username: {}", created.id, created.username);
    Ok(created)
}

/// Collects every field error the changes would cause on `existing`.
pub async fn check_account_changes(
    db: &DatabaseConnection,
    policy: &PasswordPolicy,
    existing: &user::Model,
    changes: &AccountChanges,
) -> Result<FieldErrors, ApiError> {
    let mut errors = validation_errors(changes.validate());

    if let Some(password) = changes.new_password() {
        if let Some(confirm) = &changes.password_confirm {
            if confirm != password {
                errors.add("password_confirm", PASSWORD_MISMATCH);
            }
        }
        let attributes = UserAttributes {
            username: changes.username.as_deref().unwrap_or(&existing.username),
            first_name: changes.first_name.as_deref().unwrap_or(&existing.first_name),
            last_name: changes.last_name.as_deref().unwrap_or(&existing.last_name),
            email: changes.email.as_deref().unwrap_or(&existing.email),
        };
        if let Err(messages) = policy.validate(password, &attributes) {
            errors.extend_field("password", messages);
        }
    }

    if let Some(username) = changes.username.as_deref() {
        if !errors.contains("username")
            && username != existing.username
            && username_taken(db, username, Some(existing.id)).await?
        {
            errors.add("username", USERNAME_TAKEN);
        }
    }
    Ok(errors)
}

#[instrument(skip(db, policy))]
pub async fn update_account(
    db: &DatabaseConnection,
    policy: &PasswordPolicy,
    user_id: i32,
    changes: AccountChanges,
    actor_id: Option<i32>,
) -> Result<user::Model, ApiError> {
    let existing = find_account(db, user_id).await?;
    let errors = check_account_changes(db, policy, &existing, &changes).await?;
    if !errors.is_empty() {
        warn!("Rejected update of user ID {}: {:?}", user_id, errors);
        return Err(ApiError::Validation(errors));
    }

    let password_hash = changes.new_password().map(hash_password).transpose()?;

    let mut account: user::ActiveModel = existing.into();
    let mut updated_fields = Vec::new();

    if let Some(username) = changes.username {
        account.username = Set(username);
        updated_fields.push("username");
    }
    if let Some(email) = changes.email {
        account.email = Set(email);
        updated_fields.push("email");
    }
    if let Some(first_name) = changes.first_name {
        account.first_name = Set(first_name);
        updated_fields.push("first_name");
    }
    if let Some(last_name) = changes.last_name {
        account.last_name = Set(last_name);
        updated_fields.push("last_name");
    }
    if let Some(phone_number) = changes.phone_number {
        account.phone_number = Set(non_empty(Some(phone_number)));
        updated_fields.push("phone_number");
    }
    if let Some(is_staff) = changes.is_staff {
        account.is_staff = Set(is_staff);
        updated_fields.push("is_staff");
    }
    if let Some(is_superuser) = changes.is_superuser {
        account.is_superuser = Set(is_superuser);
        updated_fields.push("is_superuser");
    }
    if let Some(is_active) = changes.is_active {
        account.is_active = Set(is_active);
        updated_fields.push("is_active");
    }
    if let Some(password_hash) = password_hash {
        account.password = Set(password_hash);
        updated_fields.push("password");
    }
    account.record_actor(actor_id, false);

    let updated = account.update(db).await.map_err(ApiError::from_write_error)?;
    info!(
        "User with ID {} updated. Updated fields: {}",
        user_id,
        if updated_fields.is_empty() { "none".to_string() } else { updated_fields.join(", ") }
    );
    Ok(updated)
}

/// Replaces the password of an account; both entries must match.
#[instrument(skip(db, policy, password, password_confirm))]
pub async fn change_password(
    db: &DatabaseConnection,
    policy: &PasswordPolicy,
    user_id: i32,
    password: String,
    password_confirm: String,
    actor_id: Option<i32>,
) -> Result<user::Model, ApiError> {
    if password.is_empty() {
        return Err(ApiError::field("password", REQUIRED));
    }
    let changes = AccountChanges {
        password: Some(password),
        password_confirm: Some(password_confirm),
        ..Default::default()
    };
    update_account(db, policy, user_id, changes, actor_id).await
}

#[instrument(skip(db, storage))]
pub async fn delete_account(db: &DatabaseConnection, storage: &MediaStorage, user_id: i32) -> Result<(), ApiError> {
    let existing = find_account(db, user_id).await?;

    let result = user::Entity::delete_by_id(user_id).exec(db).await?;
    if result.rows_affected == 0 {
        return Err(ApiError::NotFound(format!("User {}", user_id)));
    }
    info!("User with ID {} deleted", user_id);

    if let Some(photo) = existing.profile_photo {
        if let Err(e) = storage.delete(&photo).await {
            warn!("Could not remove profile photo {} of deleted user {}: {}", photo, user_id, e);
        }
    }
    Ok(())
}

/// Size and content checks for an uploaded profile photo.
pub fn check_profile_photo(bytes: &[u8]) -> Result<ImageFormat, FieldErrors> {
    let mut errors = FieldErrors::new();
    if bytes.len() > MAX_PHOTO_BYTES {
        errors.add(
            "profile_photo",
            format!("The file is too large. The maximum size is {} MiB.", MAX_PHOTO_BYTES / (1024 * 1024)),
        );
        return Err(errors);
    }
    ImageFormat::sniff(bytes).ok_or_else(|| {
        errors.add("profile_photo", INVALID_IMAGE);
        errors
    })
}

/// Stores a new profile photo and drops the previous one.
#[instrument(skip(db, storage, bytes), fields(size = bytes.len()))]
pub async fn set_profile_photo(
    db: &DatabaseConnection,
    storage: &MediaStorage,
    user_id: i32,
    bytes: &[u8],
    actor_id: Option<i32>,
) -> Result<user::Model, ApiError> {
    let existing = find_account(db, user_id).await?;
    let format = check_profile_photo(bytes).map_err(ApiError::Validation)?;

    let stem = format!("{}_{}", user_id, Utc::now().timestamp_millis());
    let name = storage.save(PROFILE_PHOTO_DIR, &stem, format.extension(), bytes).await?;

    let previous = existing.profile_photo.clone();
    let mut account: user::ActiveModel = existing.into();
    account.profile_photo = Set(Some(name));
    account.record_actor(actor_id, false);
    let updated = account.update(db).await?;
    info!("Profile photo of user {} stored as {:?}", user_id, updated.profile_photo);

    if let Some(previous) = previous {
        if let Err(e) = storage.delete(&previous).await {
            warn!("Could not remove previous profile photo {}: {}", previous, e);
        }
    }
    Ok(updated)
}

#[instrument(skip(db, storage))]
pub async fn clear_profile_photo(
    db: &DatabaseConnection,
    storage: &MediaStorage,
    user_id: i32,
    actor_id: Option<i32>,
) -> Result<user::Model, ApiError> {
    let existing = find_account(db, user_id).await?;
    let Some(previous) = existing.profile_photo.clone() else {
        debug!("User {} has no profile photo", user_id);
        return Ok(existing);
    };

    let mut account: user::ActiveModel = existing.into();
    account.profile_photo = Set(None);
    account.record_actor(actor_id, false);
    let updated = account.update(db).await?;

    if let Err(e) = storage.delete(&previous).await {
        warn!("Could not remove profile photo {}: {}", previous, e);
    }
    info!("Profile photo of user {} cleared", user_id);
    Ok(updated)
}
