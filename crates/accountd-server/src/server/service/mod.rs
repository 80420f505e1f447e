//! gRPC service implementation.
//!
//! - [`handler`] - `AccountService` entry point (`UserService`).

pub mod handler;
