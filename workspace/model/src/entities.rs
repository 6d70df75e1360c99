//! This file serves as the root for all SeaORM entity modules.
//! The account service only persists users; the soft account state
//! lives next to the entity because other parts of the system share it.

pub mod account_state;
pub mod user;

pub mod prelude {
    //! A prelude module for easy importing of all entities.
    pub use super::account_state::AccountState;
    pub use super::user::Entity as User;
}
