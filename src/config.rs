use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use sea_orm::{Database, DatabaseConnection};
use serde::Deserialize;

use crate::admin::templates::build_environment;
use crate::passwords::PasswordPolicy;
use crate::schemas::AppState;
use crate::storage::MediaStorage;

/// Runtime settings.
///
/// Sources, later ones winning: built-in defaults, `accounts.toml` (or the
/// file given with `--config`), `ACCOUNTS_*` environment variables, then
/// command line flags.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Settings {
    pub database_url: String,
    pub bind_address: String,
    /// Directory profile photos are written to
    pub media_root: PathBuf,
    /// URL prefix media files are served under
    pub media_url: String,
    pub password_min_length: usize,
    pub request_timeout_secs: u64,
}

impl Settings {
    pub fn load(config_file: Option<&Path>) -> Result<Self, config::ConfigError> {
        let file = match config_file {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name("accounts").required(false),
        };

        config::Config::builder()
            .set_default("database_url", "sqlite://accounts.db?mode=rwc")?
            .set_default("bind_address", "0.0.0.0:3000")?
            .set_default("media_root", "media")?
            .set_default("media_url", "/media")?
            .set_default("password_min_length", 8)?
            .set_default("request_timeout_secs", 30)?
            .add_source(file)
            .add_source(config::Environment::with_prefix("ACCOUNTS"))
            .build()?
            .try_deserialize()
    }

    /// Applies command line overrides on top of the loaded settings.
    pub fn with_overrides(mut self, database_url: Option<String>, bind_address: Option<String>) -> Self {
        if let Some(database_url) = database_url {
            self.database_url = database_url;
        }
        if let Some(bind_address) = bind_address {
            self.bind_address = bind_address;
        }
        self
    }
}

/// Initialize application state for the given settings
pub async fn initialize_app_state(settings: Settings) -> Result<AppState> {
    tracing::info!("Connecting to database: {}", settings.database_url);
    let db = Database::connect(&settings.database_url).await?;

    build_app_state(db, settings)
}

/// Assemble application state around an existing connection
pub fn build_app_state(db: DatabaseConnection, settings: Settings) -> Result<AppState> {
    let storage = MediaStorage::new(&settings.media_root, &settings.media_url);
    let password_policy = PasswordPolicy::new(settings.password_min_length);
    let templates = build_environment()?;

    Ok(AppState {
        db,
        settings: Arc::new(settings),
        storage,
        password_policy: Arc::new(password_policy),
        templates: Arc::new(templates),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::load(Some(Path::new("does-not-exist.toml")));
        assert!(settings.is_err(), "explicit config file must exist");

        let settings = Settings::load(None).unwrap();
        assert_eq!(settings.password_min_length, 8);
        assert_eq!(settings.media_url, "/media");
        assert_eq!(settings.request_timeout_secs, 30);
    }

    #[test]
    fn test_overrides() {
        let settings = Settings::load(None)
            .unwrap()
            .with_overrides(Some("sqlite::memory:".to_string()), None);
        assert_eq!(settings.database_url, "sqlite::memory:");
        assert_eq!(settings.bind_address, "0.0.0.0:3000");
    }
}
