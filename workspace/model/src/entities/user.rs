use std::fmt;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::entity::prelude::*;
use sea_orm::Set;

use crate::timestamps::Timestamped;

/// Represents an account of the system.
/// Carries the usual identity fields plus a phone number and a profile photo.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    /// Argon2 PHC string. Never the plaintext password.
    pub password: String,
    pub last_login: Option<DateTimeUtc>,
    pub is_superuser: bool,
    #[sea_orm(unique)]
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub is_staff: bool,
    pub is_active: bool,
    pub date_joined: DateTimeUtc,
    pub phone_number: Option<String>,
    /// Storage name relative to the media root, e.g. `profile_photos/3_1700000000.png`.
    pub profile_photo: Option<String>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
    pub created_by_id: Option<i32>,
    pub updated_by_id: Option<i32>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// The user that created this account, if still present.
    #[sea_orm(
        belongs_to = "Entity",
        from = "Column::CreatedById",
        to = "Column::Id",
        on_delete = "SetNull"
    )]
    CreatedBy,
    /// The user that last modified this account, if still present.
    #[sea_orm(
        belongs_to = "Entity",
        from = "Column::UpdatedById",
        to = "Column::Id",
        on_delete = "SetNull"
    )]
    UpdatedBy,
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(mut self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let now = Utc::now();
        if insert && self.date_joined.is_not_set() {
            self.date_joined = Set(now);
        }
        self.touch(insert, now);
        Ok(self)
    }
}

impl Timestamped for ActiveModel {
    fn touch(&mut self, insert: bool, now: DateTimeUtc) {
        if insert && self.created_at.is_not_set() {
            self.created_at = Set(now);
        }
        self.updated_at = Set(now);
    }

    fn record_actor(&mut self, actor_id: Option<i32>, insert: bool) {
        if insert {
            self.created_by_id = Set(actor_id);
        }
        self.updated_by_id = Set(actor_id);
    }
}

impl Model {
    /// First and last name joined by a space and trimmed.
    /// Falls back to the username when both are blank.
    pub fn full_name(&self) -> String {
        let joined = format!("{} {}", self.first_name, self.last_name);
        let trimmed = joined.trim();
        if trimmed.is_empty() {
            self.username.clone()
        } else {
            trimmed.to_string()
        }
    }

    /// Upper-cased first character of the username, `U` when it is empty.
    pub fn initial(&self) -> String {
        self.username
            .chars()
            .next()
            .map(|c| c.to_uppercase().collect())
            .unwrap_or_else(|| "U".to_string())
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::sea_query::SqliteQueryBuilder;
    use sea_orm::{ActiveModelTrait, Database, DatabaseConnection, DbBackend, Schema, Statement};

    async fn setup_test_db() -> DatabaseConnection {
        let db = Database::connect("sqlite::memory:").await.unwrap();

        let schema = Schema::new(DbBackend::Sqlite);
        let stmt = schema.create_table_from_entity(Entity);
        let statement = Statement::from_string(DbBackend::Sqlite, stmt.to_string(SqliteQueryBuilder));
        db.execute(statement).await.unwrap();

        db
    }

    fn new_user(username: &str) -> ActiveModel {
        ActiveModel {
            password: Set("argon2-placeholder".to_string()),
            is_superuser: Set(false),
            username: Set(username.to_string()),
            first_name: Set(String::new()),
            last_name: Set(String::new()),
            email: Set(String::new()),
            is_staff: Set(false),
            is_active: Set(true),
            ..Default::default()
        }
    }

    fn model_with_names(username: &str, first: &str, last: &str) -> Model {
        let now = Utc::now();
        Model {
            id: 1,
            password: String::new(),
            last_login: None,
            is_superuser: false,
            username: username.to_string(),
            first_name: first.to_string(),
            last_name: last.to_string(),
            email: String::new(),
            is_staff: false,
            is_active: true,
            date_joined: now,
            phone_number: None,
            profile_photo: None,
            created_at: now,
            updated_at: now,
            created_by_id: None,
            updated_by_id: None,
        }
    }

    #[test]
    fn test_full_name_first_only() {
        assert_eq!(model_with_names("ali01", "Ali", "").full_name(), "Ali");
    }

    #[test]
    fn test_full_name_falls_back_to_username() {
        assert_eq!(model_with_names("ali01", "", "").full_name(), "ali01");
        assert_eq!(model_with_names("ali01", "  ", " ").full_name(), "ali01");
    }

    #[test]
    fn test_full_name_both_parts() {
        let user = model_with_names("ali01", "Ali", "Valiyev");
        assert_eq!(user.full_name(), "Ali Valiyev");
        assert_eq!(user.to_string(), "Ali Valiyev");
    }

    #[test]
    fn test_initial() {
        assert_eq!(model_with_names("bobur", "", "").initial(), "B");
        assert_eq!(model_with_names("", "", "").initial(), "U");
    }

    #[tokio::test]
    async fn test_insert_sets_timestamps() {
        let db = setup_test_db().await;

        let user = new_user("alice").insert(&db).await.unwrap();

        assert_eq!(user.created_at, user.updated_at);
        assert!(user.date_joined <= user.created_at);
        assert_eq!(user.created_by_id, None);
    }

    #[tokio::test]
    async fn test_update_refreshes_updated_at_only() {
        let db = setup_test_db().await;
        let user = new_user("alice").insert(&db).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let mut active: ActiveModel = user.clone().into();
        active.first_name = Set("Alice".to_string());
        let updated = active.update(&db).await.unwrap();

        assert_eq!(updated.created_at, user.created_at);
        assert_eq!(updated.date_joined, user.date_joined);
        assert!(updated.updated_at > user.updated_at);
    }

    #[tokio::test]
    async fn test_record_actor() {
        let db = setup_test_db().await;
        let admin = new_user("admin").insert(&db).await.unwrap();

        let mut active = new_user("bob");
        active.record_actor(Some(admin.id), true);
        let bob = active.insert(&db).await.unwrap();
        assert_eq!(bob.created_by_id, Some(admin.id));
        assert_eq!(bob.updated_by_id, Some(admin.id));

        let mut active: ActiveModel = bob.into();
        active.record_actor(None, false);
        let bob = active.update(&db).await.unwrap();
        assert_eq!(bob.created_by_id, Some(admin.id));
        assert_eq!(bob.updated_by_id, None);
    }
}
