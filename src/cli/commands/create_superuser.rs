use anyhow::{bail, Result};
use sea_orm::Database;
use tracing::{error, info, trace};

use crate::config::Settings;
use crate::error::ApiError;
use crate::passwords::PasswordPolicy;
use crate::services::users::{create_account, NewAccount};

pub async fn create_superuser(settings: Settings, username: String, email: String, password: String) -> Result<()> {
    trace!("Entering create_superuser function");
    let db = Database::connect(&settings.database_url).await?;
    let policy = PasswordPolicy::new(settings.password_min_length);

    if email.trim().is_empty() {
        bail!("email: This field is required.");
    }

    let new = NewAccount {
        username,
        email,
        password,
        is_staff: true,
        is_superuser: true,
        is_active: true,
        ..Default::default()
    };

    match create_account(&db, &policy, new, None).await {
        Ok(created) => {
            info!("Superuser '{}' created with ID {}", created.username, created.id);
            Ok(())
        }
        Err(ApiError::Validation(errors)) => {
            let details: Vec<String> = errors
                .into_map()
                .into_iter()
                .map(|(field, messages)| format!("{}: {}", field, messages.join(" ")))
                .collect();
            error!("Superuser rejected: {}", details.join("; "));
            bail!("Superuser not created: {}", details.join("; "))
        }
        Err(e) => Err(e.into()),
    }
}
