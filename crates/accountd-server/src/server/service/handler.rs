//! gRPC `AccountService` implementation.
//!
//! [`UserService`] answers single-user CRUD directly from the store and
//! hands `BulkUsers` calls to a [`BulkCoordinator`]. Per-item bulk failures
//! travel in the reply body; only request-level problems (unknown
//! operation, oversized batch, shutdown) fail the RPC.

use crate::server::{
    bulk::coordinator::BulkCoordinator, config::ServerConfig, metrics::Metrics,
    store::SharedStore,
};
use accountd_core::{
    Error,
    proto::{
        self, BulkUsersReply, BulkUsersRequest, DeleteUserReply, DeleteUserRequest,
        GetUserRequest, UserReply, account_service_server::AccountService,
    },
    types::{OperationKind, User},
};
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};

#[derive(Clone)]
pub struct UserService {
    config: ServerConfig,
    store: SharedStore,
    coordinator: BulkCoordinator,
    metrics: Metrics,
    /// Cancels every in-flight batch.
    shutdown: CancellationToken,
    batches: Arc<InflightBatches>,
}

impl UserService {
    pub fn new(config: ServerConfig, store: SharedStore, metrics: Metrics) -> Self {
        let shutdown = CancellationToken::new();
        let coordinator = BulkCoordinator::new(store.clone(), metrics.clone())
            .with_deadline(config.bulk_timeout)
            .with_shutdown(shutdown.clone());

        Self {
            config,
            store,
            coordinator,
            metrics,
            shutdown,
            batches: Arc::new(InflightBatches::default()),
        }
    }

    /// Stops accepting bulk work and waits up to `shutdown_timeout` for
    /// running batches to finish. Whatever is still running afterwards is
    /// cancelled and reports its unfinished items as timed out.
    pub async fn shutdown(&self) {
        self.batches.close();

        let inflight = self.batches.count();
        if inflight > 0 {
            tracing::info!(inflight, "Waiting for in-flight bulk batches");
        }

        if tokio::time::timeout(self.config.shutdown_timeout, self.batches.wait_idle())
            .await
            .is_err()
        {
            tracing::warn!(
                inflight = self.batches.count(),
                "Shutdown timeout reached, cancelling bulk batches"
            );
        }

        self.shutdown.cancel();
    }
}

#[tonic::async_trait]
impl AccountService for UserService {
    #[tracing::instrument(skip_all)]
    async fn create_user(&self, req: Request<proto::User>) -> Result<Response<UserReply>, Status> {
        self.metrics.increment_requests("create_user");
        let mut user = User::from(req.into_inner());

        user.id = self.store.create(&user).await?;
        tracing::debug!(id = user.id, "User created");

        Ok(Response::new(reply(user)))
    }

    #[tracing::instrument(skip_all, fields(id = req.get_ref().id))]
    async fn get_user(&self, req: Request<GetUserRequest>) -> Result<Response<UserReply>, Status> {
        self.metrics.increment_requests("get_user");
        let id = required_id(req.get_ref().id)?;

        let user = self.store.get(id).await?;
        Ok(Response::new(reply(user)))
    }

    #[tracing::instrument(skip_all, fields(id = req.get_ref().id))]
    async fn update_user(&self, req: Request<proto::User>) -> Result<Response<UserReply>, Status> {
        self.metrics.increment_requests("update_user");
        let user = User::from(req.into_inner());
        required_id(user.id)?;

        self.store.update(&user).await?;
        Ok(Response::new(reply(user)))
    }

    #[tracing::instrument(skip_all, fields(id = req.get_ref().id))]
    async fn delete_user(
        &self,
        req: Request<DeleteUserRequest>,
    ) -> Result<Response<DeleteUserReply>, Status> {
        self.metrics.increment_requests("delete_user");
        let id = required_id(req.get_ref().id)?;

        self.store.delete(id).await?;
        Ok(Response::new(DeleteUserReply { id }))
    }

    #[tracing::instrument(
        skip_all,
        fields(operation = req.get_ref().operation, count = req.get_ref().users.len())
    )]
    async fn bulk_users(
        &self,
        req: Request<BulkUsersRequest>,
    ) -> Result<Response<BulkUsersReply>, Status> {
        self.metrics.increment_requests("bulk_users");
        let BulkUsersRequest { operation, users } = req.into_inner();

        let kind = proto::Operation::try_from(operation)
            .map_err(|_| Error::InvalidRequest {
                reason: format!("Unknown operation {operation}"),
            })
            .and_then(OperationKind::try_from)?;

        if users.len() > self.config.max_batch_size {
            return Err(Error::InvalidRequest {
                reason: format!(
                    "Batch of {} users exceeds maximum allowed ({})",
                    users.len(),
                    self.config.max_batch_size
                ),
            }
            .into());
        }

        let Some(_batch) = self.batches.enter() else {
            return Err(Error::ServiceShutdown.into());
        };

        let users = users.into_iter().map(User::from).collect();
        let result = self
            .coordinator
            .run_batch(users, kind, self.config.concurrency_limit)
            .await?;

        Ok(Response::new(result.into()))
    }
}

fn reply(user: User) -> UserReply {
    UserReply {
        user: Some(user.without_credential().into()),
    }
}

fn required_id(id: u64) -> Result<u64, Status> {
    if id == 0 {
        return Err(Error::InvalidRequest {
            reason: "User id is required".to_string(),
        }
        .into());
    }
    Ok(id)
}

/// Counts running bulk batches so shutdown can wait for them.
#[derive(Default)]
struct InflightBatches {
    closed: AtomicBool,
    count: AtomicUsize,
    idle: Notify,
}

impl InflightBatches {
    /// Registers a batch, or returns `None` once closed.
    fn enter(&self) -> Option<BatchGuard<'_>> {
        self.count.fetch_add(1, Ordering::SeqCst);
        let guard = BatchGuard(self);
        // Checked after incrementing so `wait_idle` cannot miss a batch that
        // slipped in concurrently with `close`.
        if self.closed.load(Ordering::SeqCst) {
            return None;
        }
        Some(guard)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.count() == 0 {
                return;
            }
            notified.await;
        }
    }
}

struct BatchGuard<'a>(&'a InflightBatches);

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::store::{
        MemoryUserStore,
        testing::{ScriptedStore, user},
    };
    use accountd_core::proto::ItemStatus;
    use core::time::Duration;
    use tonic::Code;

    fn service_with(store: SharedStore, config: ServerConfig) -> UserService {
        UserService::new(config, store, Metrics::disabled())
    }

    fn service() -> UserService {
        service_with(Arc::new(MemoryUserStore::new()), ServerConfig::default())
    }

    fn bulk(operation: proto::Operation, users: Vec<User>) -> Request<BulkUsersRequest> {
        Request::new(BulkUsersRequest {
            operation: operation as i32,
            users: users.into_iter().map(Into::into).collect(),
        })
    }

    #[tokio::test]
    async fn crud_round_trip() {
        let service = service();

        let created = service
            .create_user(Request::new(user("a@x.io").into()))
            .await
            .unwrap()
            .into_inner()
            .user
            .unwrap();
        assert_ne!(created.id, 0);
        assert!(created.password.is_empty());

        let mut renamed = created.clone();
        renamed.name = "renamed".into();
        service
            .update_user(Request::new(renamed))
            .await
            .unwrap();

        let fetched = service
            .get_user(Request::new(GetUserRequest { id: created.id }))
            .await
            .unwrap()
            .into_inner()
            .user
            .unwrap();
        assert_eq!(fetched.name, "renamed");

        service
            .delete_user(Request::new(DeleteUserRequest { id: created.id }))
            .await
            .unwrap();
        let status = service
            .get_user(Request::new(GetUserRequest { id: created.id }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::NotFound);
    }

    #[tokio::test]
    async fn duplicate_create_is_already_exists() {
        let service = service();
        service
            .create_user(Request::new(user("a@x.io").into()))
            .await
            .unwrap();

        let status = service
            .create_user(Request::new(user("a@x.io").into()))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::AlreadyExists);
    }

    #[tokio::test]
    async fn zero_id_is_invalid_argument() {
        let service = service();
        let status = service
            .delete_user(Request::new(DeleteUserRequest { id: 0 }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn bulk_create_reports_each_item() {
        let service = service_with(
            Arc::new(ScriptedStore::starting_at(10)),
            ServerConfig::default(),
        );

        let reply = service
            .bulk_users(bulk(
                proto::Operation::Create,
                vec![user("a@x.io"), user("b@x.io")],
            ))
            .await
            .unwrap()
            .into_inner();

        assert_eq!(reply.status, ItemStatus::Created as i32);
        assert_eq!(reply.outcomes.len(), 2);
        let mut ids: Vec<_> = reply
            .outcomes
            .iter()
            .map(|o| o.user.as_ref().unwrap().id)
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, [10, 11]);
    }

    #[tokio::test]
    async fn bulk_partial_failure_is_conflict_not_an_rpc_error() {
        let service = service();
        service
            .create_user(Request::new(user("taken@x.io").into()))
            .await
            .unwrap();

        let reply = service
            .bulk_users(bulk(
                proto::Operation::Create,
                vec![user("new@x.io"), user("taken@x.io")],
            ))
            .await
            .unwrap()
            .into_inner();

        assert_eq!(reply.status, ItemStatus::Conflict as i32);
        let failed: Vec<_> = reply
            .outcomes
            .iter()
            .filter(|o| o.status == ItemStatus::BadRequest as i32)
            .collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].error_reason, "duplicate");
    }

    #[tokio::test]
    async fn bulk_rejects_unspecified_operation() {
        let status = service()
            .bulk_users(bulk(proto::Operation::Unspecified, vec![user("a@x.io")]))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);

        let status = service()
            .bulk_users(Request::new(BulkUsersRequest {
                operation: 99,
                users: Vec::new(),
            }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn bulk_rejects_oversized_batch() {
        let config = ServerConfig {
            max_batch_size: 2,
            ..ServerConfig::default()
        };
        let service = service_with(Arc::new(MemoryUserStore::new()), config);
        let users = (0..3).map(|i| user(&format!("u{i}@x.io"))).collect();

        let status = service
            .bulk_users(bulk(proto::Operation::Create, users))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn empty_bulk_succeeds_with_no_outcomes() {
        let reply = service()
            .bulk_users(bulk(proto::Operation::Update, Vec::new()))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(reply.status, ItemStatus::Ok as i32);
        assert!(reply.outcomes.is_empty());
    }

    #[tokio::test]
    async fn shutdown_cancels_stuck_batches_and_refuses_new_ones() {
        let config = ServerConfig {
            shutdown_timeout: Duration::from_millis(50),
            ..ServerConfig::default()
        };
        let store = Arc::new(ScriptedStore::starting_at(1).stalling("slow@x.io"));
        let service = service_with(store, config);

        let running = {
            let service = service.clone();
            tokio::spawn(async move {
                service
                    .bulk_users(bulk(proto::Operation::Update, vec![user("slow@x.io")]))
                    .await
            })
        };
        while service.batches.count() == 0 {
            tokio::task::yield_now().await;
        }

        service.shutdown().await;

        let reply = running.await.unwrap().unwrap().into_inner();
        assert_eq!(reply.status, ItemStatus::Conflict as i32);
        assert_eq!(reply.outcomes[0].status, ItemStatus::TimedOut as i32);

        let status = service
            .bulk_users(bulk(proto::Operation::Update, vec![user("a@x.io")]))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::Unavailable);
    }

    #[tokio::test]
    async fn shutdown_with_nothing_running_returns_immediately() {
        let service = service();
        tokio::time::timeout(Duration::from_secs(1), service.shutdown())
            .await
            .unwrap();
    }
}
