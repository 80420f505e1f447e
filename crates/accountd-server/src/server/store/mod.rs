//! Backing stores for the `users` table.
//!
//! A [`UserStore`] is shared by every bulk worker at once, so implementations
//! must be safe for concurrent use and must enforce their own uniqueness
//! constraints; the bulk core adds no locking of its own.
//!
//! - [`MemoryUserStore`] - default, process-local table.
//! - `PgUserStore` - PostgreSQL table (feature `postgres`).

mod memory;
#[cfg(feature = "postgres")]
mod postgres;
#[cfg(test)]
pub mod testing;

use accountd_core::{StoreError, types::User};
use std::sync::Arc;

pub use memory::MemoryUserStore;
#[cfg(feature = "postgres")]
pub use postgres::PgUserStore;

/// Single-item access to the `users` table.
#[tonic::async_trait]
pub trait UserStore: Send + Sync + 'static {
    /// Inserts `user` and returns the identifier assigned to it.
    async fn create(&self, user: &User) -> Result<u64, StoreError>;

    /// Replaces the row identified by `user.id`.
    async fn update(&self, user: &User) -> Result<(), StoreError>;

    async fn get(&self, id: u64) -> Result<User, StoreError>;

    async fn delete(&self, id: u64) -> Result<(), StoreError>;
}

/// Store handle shared between the service and every bulk request.
pub type SharedStore = Arc<dyn UserStore>;
