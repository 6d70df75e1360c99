//! Admin forms: urlencoded bodies in, service inputs and rendered fields out.

use std::collections::BTreeMap;

use axum::{
    async_trait,
    extract::{FromRequest, Multipart, Request},
    http::header,
    Form,
};
use model::entities::user;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{ApiError, FieldErrors, REQUIRED};
use crate::services::users::{AccountChanges, NewAccount};

/// Name of the file input on the add and change forms.
pub const PHOTO_FIELD: &str = "profile_photo";

/// A submitted admin form plus the uploaded profile photo, if any.
/// Accepts urlencoded and `multipart/form-data` bodies.
pub struct Submission<T> {
    pub form: T,
    pub photo: Option<Vec<u8>>,
}

fn is_multipart(request: &Request) -> bool {
    request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("multipart/form-data"))
}

#[async_trait]
impl<S, T> FromRequest<S> for Submission<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Send,
{
    type Rejection = ApiError;

    async fn from_request(request: Request, state: &S) -> Result<Self, Self::Rejection> {
        if !is_multipart(&request) {
            let Form(form) = Form::<T>::from_request(request, state).await?;
            return Ok(Self { form, photo: None });
        }

        let mut multipart = Multipart::from_request(request, state).await?;
        let mut values = Map::new();
        let mut photo = None;
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?
        {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            if name == PHOTO_FIELD {
                let bytes = field.bytes().await.map_err(|e| ApiError::BadRequest(e.body_text()))?;
                // An empty file input still sends an empty part
                if !bytes.is_empty() {
                    debug!("Admin form carries a {} byte photo", bytes.len());
                    photo = Some(bytes.to_vec());
                }
            } else {
                let text = field.text().await.map_err(|e| ApiError::BadRequest(e.body_text()))?;
                values.insert(name, Value::String(text));
            }
        }

        let form = serde_json::from_value(Value::Object(values)).map_err(|e| ApiError::BadRequest(e.to_string()))?;
        Ok(Self { form, photo })
    }
}

/// One input as rendered by `change_form.html`.
#[derive(Debug, Clone, Serialize)]
pub struct FormField {
    pub name: &'static str,
    pub label: &'static str,
    /// `text`, `email`, `password`, `file` or `checkbox`
    pub kind: &'static str,
    pub value: String,
    pub checked: bool,
    pub required: bool,
    pub help_text: Option<String>,
    pub errors: Vec<String>,
}

impl FormField {
    fn input(name: &'static str, label: &'static str, kind: &'static str, value: &str) -> Self {
        Self {
            name,
            label,
            kind,
            value: value.to_string(),
            checked: false,
            required: false,
            help_text: None,
            errors: Vec::new(),
        }
    }

    fn checkbox(name: &'static str, label: &'static str, checked: bool, help_text: &str) -> Self {
        Self {
            checked,
            help_text: Some(help_text.to_string()),
            ..Self::input(name, label, "checkbox", "")
        }
    }

    fn required(mut self) -> Self {
        self.required = true;
        self
    }

    fn help(mut self, text: impl Into<String>) -> Self {
        self.help_text = Some(text.into());
        self
    }
}

/// Attaches errors to their fields; returns the ones no field claimed.
pub fn attach_errors(fields: &mut [FormField], errors: &FieldErrors) -> Vec<String> {
    let mut remaining: BTreeMap<String, Vec<String>> = errors.clone().into_map();
    for field in fields.iter_mut() {
        if let Some(messages) = remaining.remove(field.name) {
            field.errors = messages;
        }
    }
    remaining.into_values().flatten().collect()
}

fn checked(value: &Option<String>) -> bool {
    value.is_some()
}

const ACTIVE_HELP: &str =
    "Designates whether this user should be treated as active. Unselect this instead of deleting accounts.";
const STAFF_HELP: &str = "Designates whether the user can log into this admin site.";
const SUPERUSER_HELP: &str =
    "Designates that this user has all permissions without explicitly assigning them.";
const USERNAME_HELP: &str = "Required. 150 characters or fewer. Letters, digits and @/./+/-/_ only.";

/// The "add user" form.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UserCreationForm {
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: String,
    pub password1: String,
    pub password2: String,
    pub is_active: Option<String>,
    pub is_staff: Option<String>,
    pub is_superuser: Option<String>,
}

impl UserCreationForm {
    /// Blank form; new accounts start out active.
    pub fn initial() -> Self {
        Self {
            is_active: Some("on".to_string()),
            ..Default::default()
        }
    }

    /// Errors the account service does not check.
    pub fn required_errors(&self) -> FieldErrors {
        let mut errors = FieldErrors::new();
        if self.email.trim().is_empty() {
            errors.add("email", REQUIRED);
        }
        if self.password1.is_empty() {
            errors.add("password1", REQUIRED);
        }
        if self.password2.is_empty() {
            errors.add("password2", REQUIRED);
        }
        errors
    }

    pub fn to_new_account(&self) -> NewAccount {
        NewAccount {
            username: self.username.trim().to_string(),
            email: self.email.trim().to_string(),
            first_name: self.first_name.trim().to_string(),
            last_name: self.last_name.trim().to_string(),
            phone_number: Some(self.phone_number.trim().to_string()),
            password: self.password1.clone(),
            password_confirm: Some(self.password2.clone()),
            is_staff: checked(&self.is_staff),
            is_superuser: checked(&self.is_superuser),
            is_active: checked(&self.is_active),
        }
    }

    /// Renames service error keys to this form's field names.
    pub fn map_service_errors(mut errors: FieldErrors) -> FieldErrors {
        errors.rename("password", "password2");
        errors.rename("password_confirm", "password2");
        errors
    }

    pub fn fields(&self, password_help: &str) -> Vec<FormField> {
        vec![
            FormField::input("username", "Username", "text", &self.username)
                .required()
                .help(USERNAME_HELP),
            FormField::input("email", "Email address", "email", &self.email).required(),
            FormField::input("first_name", "First name", "text", &self.first_name),
            FormField::input("last_name", "Last name", "text", &self.last_name),
            FormField::input("phone_number", "Phone number", "text", &self.phone_number),
            FormField::input(PHOTO_FIELD, "Profile photo", "file", ""),
            FormField::input("password1", "Password", "password", "")
                .required()
                .help(password_help),
            FormField::input("password2", "Password confirmation", "password", "")
                .required()
                .help("Enter the same password as before, for verification."),
            FormField::checkbox("is_active", "Active", checked(&self.is_active), ACTIVE_HELP),
            FormField::checkbox("is_staff", "Staff status", checked(&self.is_staff), STAFF_HELP),
            FormField::checkbox("is_superuser", "Superuser status", checked(&self.is_superuser), SUPERUSER_HELP),
        ]
    }
}

/// The "change user" form. The password is changed through its own form.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UserChangeForm {
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: String,
    pub is_active: Option<String>,
    pub is_staff: Option<String>,
    pub is_superuser: Option<String>,
    pub clear_profile_photo: Option<String>,
}

impl UserChangeForm {
    pub fn from_model(account: &user::Model) -> Self {
        let flag = |set: bool| set.then(|| "on".to_string());
        Self {
            username: account.username.clone(),
            email: account.email.clone(),
            first_name: account.first_name.clone(),
            last_name: account.last_name.clone(),
            phone_number: account.phone_number.clone().unwrap_or_default(),
            is_active: flag(account.is_active),
            is_staff: flag(account.is_staff),
            is_superuser: flag(account.is_superuser),
            clear_profile_photo: None,
        }
    }

    pub fn clears_photo(&self) -> bool {
        checked(&self.clear_profile_photo)
    }

    pub fn to_changes(&self) -> AccountChanges {
        AccountChanges {
            username: Some(self.username.trim().to_string()),
            email: Some(self.email.trim().to_string()),
            first_name: Some(self.first_name.trim().to_string()),
            last_name: Some(self.last_name.trim().to_string()),
            phone_number: Some(self.phone_number.trim().to_string()),
            password: None,
            password_confirm: None,
            is_staff: Some(checked(&self.is_staff)),
            is_superuser: Some(checked(&self.is_superuser)),
            is_active: Some(checked(&self.is_active)),
        }
    }

    pub fn fields(&self, has_photo: bool) -> Vec<FormField> {
        let mut fields = vec![
            FormField::input("username", "Username", "text", &self.username)
                .required()
                .help(USERNAME_HELP),
            FormField::input("first_name", "First name", "text", &self.first_name),
            FormField::input("last_name", "Last name", "text", &self.last_name),
            FormField::input("email", "Email address", "email", &self.email),
            FormField::input("phone_number", "Phone number", "text", &self.phone_number),
            FormField::input(PHOTO_FIELD, "Profile photo", "file", "")
                .help("Replaces the current photo when a file is chosen."),
            FormField::checkbox("is_active", "Active", checked(&self.is_active), ACTIVE_HELP),
            FormField::checkbox("is_staff", "Staff status", checked(&self.is_staff), STAFF_HELP),
            FormField::checkbox("is_superuser", "Superuser status", checked(&self.is_superuser), SUPERUSER_HELP),
        ];
        if has_photo {
            fields.push(FormField::checkbox(
                "clear_profile_photo",
                "Clear profile photo",
                self.clears_photo(),
                "Removes the stored photo on save.",
            ));
        }
        fields
    }
}

/// Sets a new password for another user.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct AdminPasswordChangeForm {
    pub password1: String,
    pub password2: String,
}

impl std::fmt::Debug for AdminPasswordChangeForm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminPasswordChangeForm").finish_non_exhaustive()
    }
}

impl AdminPasswordChangeForm {
    pub fn required_errors(&self) -> FieldErrors {
        let mut errors = FieldErrors::new();
        if self.password1.is_empty() {
            errors.add("password1", REQUIRED);
        }
        if self.password2.is_empty() {
            errors.add("password2", REQUIRED);
        }
        errors
    }

    pub fn map_service_errors(mut errors: FieldErrors) -> FieldErrors {
        errors.rename("password", "password2");
        errors.rename("password_confirm", "password2");
        errors
    }

    pub fn fields(password_help: &str) -> Vec<FormField> {
        vec![
            FormField::input("password1", "Password", "password", "")
                .required()
                .help(password_help),
            FormField::input("password2", "Password (again)", "password", "")
                .required()
                .help("Enter the same password as before, for verification."),
        ]
    }
}
