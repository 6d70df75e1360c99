//! HTML fragments shown in admin pages.

use model::entities::user;

use super::{url_for, PASSWORD_CHANGE_ROUTE};
use crate::storage::MediaStorage;

pub fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

/// 40x40 circular thumbnail, or a grey circle holding the username's initial.
pub fn avatar_html(account: &user::Model, storage: &MediaStorage) -> String {
    match account.profile_photo.as_deref().filter(|name| !name.is_empty()) {
        Some(name) => format!(
            r#"<img src="{}" alt="{}" width="40" height="40" style="border-radius:50%;object-fit:cover">"#,
            escape_html(&storage.url(name)),
            escape_html(&account.username),
        ),
        None => format!(
            r#"<span class="avatar-placeholder" style="display:inline-block;width:40px;height:40px;border-radius:50%;background:#ccc;color:#fff;text-align:center;line-height:40px;font-weight:bold">{}</span>"#,
            escape_html(&account.initial()),
        ),
    }
}

/// Full name for list columns; `-` when both names are blank.
pub fn full_name_display(account: &user::Model) -> String {
    let name = format!("{} {}", account.first_name, account.last_name);
    let name = name.trim();
    if name.is_empty() { "-".to_string() } else { name.to_string() }
}

pub fn password_change_url(user_id: i32) -> String {
    url_for(PASSWORD_CHANGE_ROUTE, user_id)
}

/// What the change form shows instead of the password hash.
pub fn password_field_html(user_id: i32) -> String {
    format!(
        r#"Raw passwords are not stored, so there is no way to see this user's password, but you can change the password using <a href="{}">this form</a>."#,
        escape_html(&password_change_url(user_id)),
    )
}
