use crate::server::{
    bulk::{outcome::Outcome, request::BulkRequest},
    metrics::Metrics,
    store::UserStore,
};
use accountd_core::types::{OperationKind, StatusCode, User};
use tokio::sync::OwnedSemaphorePermit;
use tokio_util::sync::CancellationToken;

/// Runs one [`BulkRequest`] to completion on a dedicated task.
///
/// `permit` is the concurrency slot the dispatch loop acquired for this
/// request. It and the in-flight gauge are released together, before the
/// outcome is published, and on unwind if the store panics.
pub async fn run_worker(request: BulkRequest, permit: OwnedSemaphorePermit, metrics: Metrics) {
    let inflight = metrics.track_worker();
    let BulkRequest {
        index,
        user,
        kind,
        store,
        cancel,
        respond_to,
    } = request;

    let outcome = execute(user, kind, store.as_ref(), &cancel).await;
    drop(permit);
    drop(inflight);

    metrics.record_item(kind, outcome.status);
    tracing::trace!(index, status = %outcome.status, "bulk item finished");

    if respond_to.send(outcome).is_err() {
        tracing::debug!(index, "Outcome receiver dropped before bulk item finished");
    }
}

/// Applies `kind` to `user` through `store`.
///
/// Store failures become a failed [`Outcome`] for this item only. Get and
/// Delete are not bulk operations and are answered as unsupported without
/// touching the store.
pub async fn execute(
    mut user: User,
    kind: OperationKind,
    store: &dyn UserStore,
    cancel: &CancellationToken,
) -> Outcome {
    if cancel.is_cancelled() {
        return Outcome::cancelled(user);
    }

    match kind {
        OperationKind::Create => {
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                result = store.create(&user) => Some(result),
            };
            match result {
                None => Outcome::cancelled(user),
                Some(Ok(id)) => {
                    user.id = id;
                    Outcome::success(StatusCode::Created, user)
                }
                Some(Err(e)) => Outcome::from_store_error(&e, user),
            }
        }
        OperationKind::Update => {
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                result = store.update(&user) => Some(result),
            };
            match result {
                None => Outcome::cancelled(user),
                Some(Ok(())) => Outcome::success(StatusCode::Ok, user),
                Some(Err(e)) => Outcome::from_store_error(&e, user),
            }
        }
        other => Outcome::unsupported(other, user),
    }
}
