//! # Domain types
//!
//! The `User` entity and the small enums that describe what a bulk batch
//! does to it and how each item ended up.
//!
//! Every type has a protobuf counterpart in [`crate::proto`]; the
//! conversions live here so both the server and any client agree on the
//! mapping.

use crate::{Error, StoreError, proto};

/// A row of the `users` table.
///
/// `id` is zero until a store assigns one during creation and non-zero
/// afterwards.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct User {
    pub id: u64,
    pub account_id: String,
    pub name: String,
    pub email: String,
    pub role: String,
    pub password: String,
}

impl User {
    /// Checks that the columns every store requires are present.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MissingField`] naming the first blank field.
    pub fn validate(&self) -> Result<(), StoreError> {
        for (field, value) in [
            ("account_id", &self.account_id),
            ("name", &self.name),
            ("email", &self.email),
        ] {
            if value.trim().is_empty() {
                return Err(StoreError::MissingField {
                    field: field.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Returns a copy that is safe to send back to a client.
    #[must_use]
    pub fn without_credential(&self) -> Self {
        Self {
            password: String::new(),
            ..self.clone()
        }
    }
}

impl From<proto::User> for User {
    fn from(user: proto::User) -> Self {
        Self {
            id: user.id,
            account_id: user.account_id,
            name: user.name,
            email: user.email,
            role: user.role,
            password: user.password,
        }
    }
}

impl From<User> for proto::User {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            account_id: user.account_id,
            name: user.name,
            email: user.email,
            role: user.role,
            password: user.password,
        }
    }
}

/// The operation a request applies to a user.
///
/// Only [`OperationKind::Create`] and [`OperationKind::Update`] are bulk
/// capable; the bulk worker answers anything else with a `BadRequest`
/// outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Create,
    Update,
    Get,
    Delete,
}

impl OperationKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Get => "get",
            Self::Delete => "delete",
        }
    }
}

impl core::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<proto::Operation> for OperationKind {
    type Error = Error;

    fn try_from(op: proto::Operation) -> Result<Self, Self::Error> {
        match op {
            proto::Operation::Create => Ok(Self::Create),
            proto::Operation::Update => Ok(Self::Update),
            proto::Operation::Get => Ok(Self::Get),
            proto::Operation::Delete => Ok(Self::Delete),
            proto::Operation::Unspecified => Err(Error::InvalidRequest {
                reason: "operation must be specified".to_string(),
            }),
        }
    }
}

impl From<OperationKind> for proto::Operation {
    fn from(kind: OperationKind) -> Self {
        match kind {
            OperationKind::Create => Self::Create,
            OperationKind::Update => Self::Update,
            OperationKind::Get => Self::Get,
            OperationKind::Delete => Self::Delete,
        }
    }
}

/// Status of a single bulk item, and of the batch as a whole.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StatusCode {
    BadRequest,
    Ok,
    Created,
    /// Batch level only: at least one item did not succeed.
    Conflict,
    ServerError,
    NotFound,
    /// The item was cancelled or the batch deadline passed before it
    /// finished.
    TimedOut,
}

impl StatusCode {
    /// `Ok` and `Created` are the only successful statuses.
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Ok | Self::Created)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BadRequest => "bad_request",
            Self::Ok => "ok",
            Self::Created => "created",
            Self::Conflict => "conflict",
            Self::ServerError => "server_error",
            Self::NotFound => "not_found",
            Self::TimedOut => "timed_out",
        }
    }
}

impl core::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<StatusCode> for proto::ItemStatus {
    fn from(status: StatusCode) -> Self {
        match status {
            StatusCode::BadRequest => Self::BadRequest,
            StatusCode::Ok => Self::Ok,
            StatusCode::Created => Self::Created,
            StatusCode::Conflict => Self::Conflict,
            StatusCode::ServerError => Self::ServerError,
            StatusCode::NotFound => Self::NotFound,
            StatusCode::TimedOut => Self::TimedOut,
        }
    }
}
