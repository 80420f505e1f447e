//! Server-side components of the `accountd` service.
//!
//! - [`service`] - gRPC `AccountService` implementation.
//! - [`bulk`] - fan-out / fan-in of bulk create and update.
//! - [`pool`] - bounded-concurrency processor and its workers.
//! - [`store`] - user storage backends.
//! - [`metrics`] / [`telemetry`] - instruments and subscriber setup.
//!
//! These are wired together in the binary's `main.rs`.

pub mod bulk;
pub mod config;
pub mod metrics;
pub mod pool;
pub mod service;
pub mod store;
pub mod telemetry;
