use super::UserStore;
use accountd_core::{StoreError, types::User};
use parking_lot::Mutex;
use portable_atomic::{AtomicU64, Ordering};
use std::collections::HashMap;

#[derive(Default)]
struct Table {
    rows: HashMap<u64, User>,
    // Normalized email -> owning row id.
    emails: HashMap<String, u64>,
}

/// Process-local user table.
///
/// The row map and the unique email index sit behind one lock, so a
/// duplicate check and the insert that follows it are atomic even when many
/// bulk workers race on the same address.
pub struct MemoryUserStore {
    table: Mutex<Table>,
    next_id: AtomicU64,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(Table::default()),
            next_id: AtomicU64::new(1),
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.table.lock().rows.len()
    }
}

impl Default for MemoryUserStore {
    fn default() -> Self {
        Self::new()
    }
}

fn email_key(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

fn duplicate_email() -> StoreError {
    StoreError::Duplicate {
        field: "email".to_string(),
    }
}

#[tonic::async_trait]
impl UserStore for MemoryUserStore {
    async fn create(&self, user: &User) -> Result<u64, StoreError> {
        user.validate()?;
        let key = email_key(&user.email);

        let mut table = self.table.lock();
        if table.emails.contains_key(&key) {
            return Err(duplicate_email());
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        table.emails.insert(key, id);
        table.rows.insert(
            id,
            User {
                id,
                email: user.email.trim().to_string(),
                ..user.clone()
            },
        );
        Ok(id)
    }

    async fn update(&self, user: &User) -> Result<(), StoreError> {
        user.validate()?;
        let key = email_key(&user.email);

        let mut table = self.table.lock();
        let Some(existing) = table.rows.get(&user.id) else {
            return Err(StoreError::NotFound { id: user.id });
        };

        let old_key = email_key(&existing.email);
        if old_key != key {
            if table.emails.contains_key(&key) {
                return Err(duplicate_email());
            }
            table.emails.remove(&old_key);
            table.emails.insert(key, user.id);
        }

        table.rows.insert(
            user.id,
            User {
                email: user.email.trim().to_string(),
                ..user.clone()
            },
        );
        Ok(())
    }

    async fn get(&self, id: u64) -> Result<User, StoreError> {
        self.table
            .lock()
            .rows
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound { id })
    }

    async fn delete(&self, id: u64) -> Result<(), StoreError> {
        let mut table = self.table.lock();
        let user = table.rows.remove(&id).ok_or(StoreError::NotFound { id })?;
        table.emails.remove(&email_key(&user.email));
        Ok(())
    }
}
