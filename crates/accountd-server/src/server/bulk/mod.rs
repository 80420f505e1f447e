//! Fan-out / fan-in of bulk user operations.
//!
//! [`coordinator::BulkCoordinator`] turns a list of users into
//! [`request::BulkRequest`]s, feeds them to a
//! [`crate::server::pool::manager::BulkProcessor`], and folds the
//! [`outcome::Outcome`]s into a [`outcome::BatchResult`].

pub mod coordinator;
pub mod outcome;
pub mod request;
