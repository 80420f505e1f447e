//! Instrumented stores for exercising the bulk core.

use super::UserStore;
use accountd_core::{StoreError, types::User};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::Semaphore;

pub fn user(email: &str) -> User {
    User {
        account_id: "acc-1".into(),
        name: email.split('@').next().unwrap_or(email).into(),
        email: email.into(),
        role: "member".into(),
        password: "pw".into(),
        ..User::default()
    }
}

/// Succeeds unless told otherwise for a given email.
///
/// Ids are handed out from `next_id` upwards. Emails registered with
/// [`ScriptedStore::failing`] return the scripted error, emails registered
/// with [`ScriptedStore::stalling`] never complete, and emails registered
/// with [`ScriptedStore::panicking`] panic inside the store call.
pub struct ScriptedStore {
    next_id: AtomicU64,
    failures: HashMap<String, StoreError>,
    stalls: HashSet<String>,
    panics: HashSet<String>,
    pub calls: AtomicUsize,
}

impl ScriptedStore {
    pub fn starting_at(next_id: u64) -> Self {
        Self {
            next_id: AtomicU64::new(next_id),
            failures: HashMap::new(),
            stalls: HashSet::new(),
            panics: HashSet::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(mut self, email: &str, err: StoreError) -> Self {
        self.failures.insert(email.to_string(), err);
        self
    }

    pub fn stalling(mut self, email: &str) -> Self {
        self.stalls.insert(email.to_string());
        self
    }

    pub fn panicking(mut self, email: &str) -> Self {
        self.panics.insert(email.to_string());
        self
    }

    async fn script(&self, user: &User) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.stalls.contains(&user.email) {
            std::future::pending::<()>().await;
        }
        if self.panics.contains(&user.email) {
            panic!("scripted store panic for {}", user.email);
        }
        match self.failures.get(&user.email) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[tonic::async_trait]
impl UserStore for ScriptedStore {
    async fn create(&self, user: &User) -> Result<u64, StoreError> {
        self.script(user).await?;
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn update(&self, user: &User) -> Result<(), StoreError> {
        self.script(user).await
    }

    async fn get(&self, id: u64) -> Result<User, StoreError> {
        Err(StoreError::NotFound { id })
    }

    async fn delete(&self, id: u64) -> Result<(), StoreError> {
        Err(StoreError::NotFound { id })
    }
}

/// Blocks every call until released and records peak concurrency.
pub struct GatedStore {
    active: AtomicUsize,
    peak: AtomicUsize,
    next_id: AtomicU64,
    gate: Semaphore,
}

impl GatedStore {
    pub fn new() -> Self {
        Self {
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
            gate: Semaphore::new(0),
        }
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Lets `n` blocked (or future) calls through.
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    async fn pass(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if let Ok(permit) = self.gate.acquire().await {
            permit.forget();
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[tonic::async_trait]
impl UserStore for GatedStore {
    async fn create(&self, _user: &User) -> Result<u64, StoreError> {
        self.pass().await;
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn update(&self, _user: &User) -> Result<(), StoreError> {
        self.pass().await;
        Ok(())
    }

    async fn get(&self, id: u64) -> Result<User, StoreError> {
        Err(StoreError::NotFound { id })
    }

    async fn delete(&self, id: u64) -> Result<(), StoreError> {
        Err(StoreError::NotFound { id })
    }
}
