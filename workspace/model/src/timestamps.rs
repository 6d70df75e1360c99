//! Audit columns shared by entities that track who touched a row and when.
//!
//! An entity adopting the contract carries four columns:
//! `created_at`, `updated_at`, `created_by_id` and `updated_by_id`.
//! The two `*_by_id` columns are weak references to `users.id`: they are
//! nullable and the foreign key is `ON DELETE SET NULL`.

use sea_orm::entity::prelude::DateTimeUtc;

/// Maintenance of the audit columns on an active model.
pub trait Timestamped {
    /// Sets `created_at` on insert (unless already set) and always refreshes
    /// `updated_at`.
    fn touch(&mut self, insert: bool, now: DateTimeUtc);

    /// Records the acting user. `created_by_id` is only written on insert.
    fn record_actor(&mut self, actor_id: Option<i32>, insert: bool);
}
