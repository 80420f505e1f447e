//! Per-item outcomes and their aggregation into a batch result.

use accountd_core::{
    StoreError, proto,
    types::{OperationKind, StatusCode, User},
};

/// Result of applying one operation to one user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outcome {
    pub status: StatusCode,
    pub error_message: String,
    pub error_reason: String,
    /// The submitted user, with its assigned id after a successful create.
    pub user: User,
}

impl Outcome {
    pub fn success(status: StatusCode, user: User) -> Self {
        Self {
            status,
            error_message: String::new(),
            error_reason: String::new(),
            user,
        }
    }

    pub fn failure(
        status: StatusCode,
        reason: impl Into<String>,
        message: impl Into<String>,
        user: User,
    ) -> Self {
        Self {
            status,
            error_message: message.into(),
            error_reason: reason.into(),
            user,
        }
    }

    /// An unreachable store is the server's fault; everything else is the
    /// item's.
    pub fn from_store_error(err: &StoreError, user: User) -> Self {
        let status = match err {
            StoreError::Unavailable { .. } => StatusCode::ServerError,
            _ => StatusCode::BadRequest,
        };
        Self::failure(status, err.reason(), err.to_string(), user)
    }

    pub fn unsupported(kind: OperationKind, user: User) -> Self {
        Self::failure(
            StatusCode::BadRequest,
            "unsupported operation",
            format!("operation `{kind}` is not supported in bulk"),
            user,
        )
    }

    pub fn cancelled(user: User) -> Self {
        Self::failure(
            StatusCode::TimedOut,
            "cancelled",
            "operation cancelled before it completed",
            user,
        )
    }

    pub fn deadline_exceeded(user: User) -> Self {
        Self::failure(
            StatusCode::TimedOut,
            "deadline_exceeded",
            "batch deadline passed before the operation completed",
            user,
        )
    }

    /// The worker went away without reporting (panic, or the request was
    /// dropped by a stopped processor).
    pub fn worker_lost(user: User) -> Self {
        Self::failure(
            StatusCode::ServerError,
            "worker_lost",
            "worker exited without reporting an outcome",
            user,
        )
    }
}

/// Aggregate of a whole bulk request.
///
/// `status` starts at the optimistic value for the operation and drops to
/// [`StatusCode::Conflict`] as soon as one item is neither `Ok` nor
/// `Created`. The result therefore does not depend on the order in which
/// outcomes are recorded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchResult {
    pub status: StatusCode,
    pub outcomes: Vec<Outcome>,
}

impl BatchResult {
    pub fn new(kind: OperationKind, capacity: usize) -> Self {
        Self {
            status: initial_status(kind),
            outcomes: Vec::with_capacity(capacity),
        }
    }

    pub fn record(&mut self, outcome: Outcome) {
        if !outcome.status.is_success() {
            self.status = StatusCode::Conflict;
        }
        self.outcomes.push(outcome);
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| !o.status.is_success())
            .count()
    }
}

const fn initial_status(kind: OperationKind) -> StatusCode {
    match kind {
        OperationKind::Create => StatusCode::Created,
        _ => StatusCode::Ok,
    }
}

impl From<Outcome> for proto::ItemOutcome {
    fn from(outcome: Outcome) -> Self {
        Self {
            status: proto::ItemStatus::from(outcome.status) as i32,
            error_message: outcome.error_message,
            error_reason: outcome.error_reason,
            user: Some(outcome.user.without_credential().into()),
        }
    }
}

impl From<BatchResult> for proto::BulkUsersReply {
    fn from(result: BatchResult) -> Self {
        Self {
            status: proto::ItemStatus::from(result.status) as i32,
            outcomes: result.outcomes.into_iter().map(Into::into).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(status: StatusCode) -> Outcome {
        Outcome::success(status, User::default())
    }

    fn aggregate(kind: OperationKind, outcomes: &[Outcome]) -> StatusCode {
        let mut result = BatchResult::new(kind, outcomes.len());
        for o in outcomes {
            result.record(o.clone());
        }
        result.status
    }

    #[test]
    fn empty_batch_keeps_optimistic_status() {
        assert_eq!(
            BatchResult::new(OperationKind::Create, 0).status,
            StatusCode::Created
        );
        assert_eq!(
            BatchResult::new(OperationKind::Update, 0).status,
            StatusCode::Ok
        );
    }

    #[test]
    fn any_failure_downgrades_to_conflict() {
        let outcomes = [
            outcome(StatusCode::Created),
            outcome(StatusCode::BadRequest),
        ];
        let mut result = BatchResult::new(OperationKind::Create, 2);
        for o in outcomes {
            result.record(o);
        }
        assert_eq!(result.status, StatusCode::Conflict);
        assert_eq!(result.failed(), 1);
        assert_eq!(result.outcomes.len(), 2);
    }

    #[test]
    fn aggregation_ignores_arrival_order() {
        let base = [
            outcome(StatusCode::Ok),
            outcome(StatusCode::ServerError),
            outcome(StatusCode::Ok),
        ];
        let permutations = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];

        for order in permutations {
            let shuffled: Vec<_> = order.iter().map(|&i| base[i].clone()).collect();
            assert_eq!(
                aggregate(OperationKind::Update, &shuffled),
                StatusCode::Conflict
            );
        }

        let all_ok = [outcome(StatusCode::Ok), outcome(StatusCode::Ok)];
        assert_eq!(aggregate(OperationKind::Update, &all_ok), StatusCode::Ok);
    }

    #[test]
    fn store_errors_split_between_client_and_server_faults() {
        let duplicate = Outcome::from_store_error(
            &StoreError::Duplicate {
                field: "email".into(),
            },
            User::default(),
        );
        assert_eq!(duplicate.status, StatusCode::BadRequest);
        assert_eq!(duplicate.error_reason, "duplicate");
        assert!(!duplicate.error_message.is_empty());

        let down = Outcome::from_store_error(
            &StoreError::Unavailable {
                context: "connection refused".into(),
            },
            User::default(),
        );
        assert_eq!(down.status, StatusCode::ServerError);
    }

    #[test]
    fn reply_omits_credentials() {
        let mut user = User::default();
        user.password = "secret".into();
        let item: proto::ItemOutcome = Outcome::success(StatusCode::Created, user).into();

        assert_eq!(item.status, proto::ItemStatus::Created as i32);
        assert_eq!(item.user.map(|u| u.password), Some(String::new()));
    }
}
