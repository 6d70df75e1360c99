use sea_orm::entity::prelude::*;

/// Soft lifecycle state of an account.
/// Entities that track it store the string value; `users` itself only
/// enforces the `is_active` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(10))")]
pub enum AccountState {
    #[sea_orm(string_value = "active")]
    Active,
    #[sea_orm(string_value = "inactive")]
    Inactive,
    #[sea_orm(string_value = "deleted")]
    Deleted,
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "suspended")]
    Suspended,
}

impl AccountState {
    /// Human readable label shown in the admin console.
    pub fn label(&self) -> &'static str {
        match self {
            AccountState::Active => "Active",
            AccountState::Inactive => "Inactive",
            AccountState::Deleted => "Deleted",
            AccountState::Pending => "Pending",
            AccountState::Suspended => "Suspended",
        }
    }

    /// Whether an account in this state may sign in.
    pub fn allows_login(&self) -> bool {
        matches!(self, AccountState::Active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::Iterable;

    #[test]
    fn test_string_values() {
        assert_eq!(AccountState::Suspended.to_value(), "suspended");
        assert_eq!(
            AccountState::try_from_value(&"pending".to_string()).unwrap(),
            AccountState::Pending
        );
        assert!(AccountState::try_from_value(&"archived".to_string()).is_err());
    }

    #[test]
    fn test_only_active_allows_login() {
        let allowed: Vec<AccountState> = AccountState::iter().filter(|s| s.allows_login()).collect();
        assert_eq!(allowed, vec![AccountState::Active]);
    }
}
