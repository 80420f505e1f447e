use super::outcome::Outcome;
use crate::server::store::SharedStore;
use accountd_core::types::{OperationKind, User};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// One user, one operation, consumed exactly once by a bulk worker.
///
/// The request owns the sending half of a single-slot outcome cell; the
/// matching [`PendingOutcome`] stays with the coordinator.
pub struct BulkRequest {
    pub index: usize,
    pub user: User,
    pub kind: OperationKind,
    pub store: SharedStore,
    /// Child of the batch token; cancelled on deadline or shutdown.
    pub cancel: CancellationToken,
    pub respond_to: oneshot::Sender<Outcome>,
}

/// Receiving half of a request's outcome cell.
pub struct PendingOutcome {
    pub index: usize,
    /// Copy of the submitted user, echoed back if the request never
    /// reports.
    pub user: User,
    pub rx: oneshot::Receiver<Outcome>,
}

pub struct BulkBatch {
    pub requests: Vec<BulkRequest>,
    pub pending: Vec<PendingOutcome>,
}

/// Turns a list of users into one request per user.
///
/// Requests come out in input order and `index` is the user's position in
/// `users`. Outcomes may still arrive in any order.
pub fn build_requests(
    users: Vec<User>,
    kind: OperationKind,
    store: &SharedStore,
    cancel: &CancellationToken,
) -> BulkBatch {
    let mut requests = Vec::with_capacity(users.len());
    let mut pending = Vec::with_capacity(users.len());

    for (index, user) in users.into_iter().enumerate() {
        let (tx, rx) = oneshot::channel();
        pending.push(PendingOutcome {
            index,
            user: user.clone(),
            rx,
        });
        requests.push(BulkRequest {
            index,
            user,
            kind,
            store: store.clone(),
            cancel: cancel.child_token(),
            respond_to: tx,
        });
    }

    BulkBatch { requests, pending }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::store::testing::{ScriptedStore, user};
    use accountd_core::types::StatusCode;
    use std::sync::Arc;

    #[test]
    fn builds_one_request_per_user_in_order() {
        let store: SharedStore = Arc::new(ScriptedStore::starting_at(1));
        let users = vec![user("a@x.io"), user("b@x.io"), user("c@x.io")];

        let batch = build_requests(
            users,
            OperationKind::Create,
            &store,
            &CancellationToken::new(),
        );

        assert_eq!(batch.requests.len(), 3);
        assert_eq!(batch.pending.len(), 3);
        let emails: Vec<_> = batch.requests.iter().map(|r| r.user.email.as_str()).collect();
        assert_eq!(emails, ["a@x.io", "b@x.io", "c@x.io"]);
        assert!(batch.requests.iter().enumerate().all(|(i, r)| r.index == i));
    }

    #[tokio::test]
    async fn each_cell_carries_its_own_outcome() {
        let store: SharedStore = Arc::new(ScriptedStore::starting_at(1));
        let batch = build_requests(
            vec![user("a@x.io"), user("b@x.io")],
            OperationKind::Update,
            &store,
            &CancellationToken::new(),
        );

        // Answer in reverse order; each pending cell still sees its own user.
        for request in batch.requests.into_iter().rev() {
            let outcome = Outcome::success(StatusCode::Ok, request.user);
            request.respond_to.send(outcome).unwrap();
        }
        for pending in batch.pending {
            let outcome = pending.rx.await.unwrap();
            assert_eq!(outcome.user, pending.user);
        }
    }

    #[test]
    fn cancelling_the_batch_reaches_every_request() {
        let store: SharedStore = Arc::new(ScriptedStore::starting_at(1));
        let cancel = CancellationToken::new();
        let batch = build_requests(
            vec![user("a@x.io"), user("b@x.io")],
            OperationKind::Create,
            &store,
            &cancel,
        );

        cancel.cancel();
        assert!(batch.requests.iter().all(|r| r.cancel.is_cancelled()));
    }
}
