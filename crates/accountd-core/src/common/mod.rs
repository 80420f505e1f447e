//! Shared protocol bindings, errors, and domain types.
//!
//! - [`error`] - Service error and per-item store error.
//! - [`types`] - The `User` entity plus operation and status enums.
//! - [`proto`] - Generated gRPC bindings for `accountd.proto`.

pub mod error;
pub mod types;

pub use error::{Error, Result, StoreError};

pub mod proto {
    tonic::include_proto!("accountd");

    /// Encoded descriptor set for `tonic-reflection`.
    pub const FILE_DESCRIPTOR_SET: &[u8] =
        tonic::include_file_descriptor_set!("accountd_descriptor");
}
