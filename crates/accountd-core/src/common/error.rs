//! Error types for the account service.
//!
//! Two layers of failure exist:
//!
//! - [`Error`]: request-level failures that abort an RPC (bad input,
//!   invalid configuration, shutdown, internal channel failures). Converts
//!   into [`tonic::Status`] at the transport boundary.
//! - [`StoreError`]: per-item failures reported by a backing store. Inside a
//!   bulk batch these never abort the batch; they are folded into the item's
//!   outcome instead.

use tonic::Status;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the account service.
#[derive(Clone, thiserror::Error, Debug)]
pub enum Error {
    /// Internal channel send/receive failure (e.g., closed channel).
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// The client request was invalid or exceeded constraints.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// A bulk processor was asked to run with no concurrency slots.
    #[error("Concurrency limit must be greater than 0 (got {limit})")]
    InvalidConcurrencyLimit { limit: usize },

    /// A single-item operation failed in the backing store.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The service is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::ChannelError { context } => Status::internal(format!("Channel error: {context}")),
            Error::InvalidRequest { reason } => Status::invalid_argument(reason),
            Error::InvalidConcurrencyLimit { limit } => Status::internal(format!(
                "Bulk processor misconfigured: concurrency limit {limit}"
            )),
            Error::Store(e) => e.into(),
            Error::ServiceShutdown => Status::unavailable("Service is shutting down"),
        }
    }
}

/// Failure reported by a backing store for one user.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum StoreError {
    /// A unique column already holds this value.
    #[error("user with this {field} already exists")]
    Duplicate { field: String },

    #[error("user {id} not found")]
    NotFound { id: u64 },

    #[error("missing required field `{field}`")]
    MissingField { field: String },

    /// The store could not be reached or failed internally.
    #[error("store unavailable: {context}")]
    Unavailable { context: String },
}

impl StoreError {
    /// Stable, machine-readable reason code for this failure.
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::Duplicate { .. } => "duplicate",
            Self::NotFound { .. } => "not_found",
            Self::MissingField { .. } => "missing_field",
            Self::Unavailable { .. } => "unavailable",
        }
    }
}

impl From<StoreError> for Status {
    fn from(err: StoreError) -> Self {
        let message = err.to_string();
        match err {
            StoreError::Duplicate { .. } => Status::already_exists(message),
            StoreError::NotFound { .. } => Status::not_found(message),
            StoreError::MissingField { .. } => Status::invalid_argument(message),
            StoreError::Unavailable { .. } => Status::unavailable(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    #[test]
    fn store_errors_map_to_grpc_codes() {
        let cases = [
            (
                StoreError::Duplicate {
                    field: "email".into(),
                },
                Code::AlreadyExists,
            ),
            (StoreError::NotFound { id: 7 }, Code::NotFound),
            (
                StoreError::MissingField {
                    field: "name".into(),
                },
                Code::InvalidArgument,
            ),
            (
                StoreError::Unavailable {
                    context: "pool timed out".into(),
                },
                Code::Unavailable,
            ),
        ];

        for (err, code) in cases {
            let status: Status = Error::from(err).into();
            assert_eq!(status.code(), code);
        }
    }

    #[test]
    fn reason_codes_are_stable() {
        assert_eq!(StoreError::NotFound { id: 1 }.reason(), "not_found");
        assert_eq!(
            StoreError::Duplicate {
                field: "email".into()
            }
            .reason(),
            "duplicate"
        );
    }
}
