//! Object storage for generated files.
//!
//! - [`ObjectStore`]: the storage seam, with an S3-compatible
//!   implementation in [`S3ObjectStore`].
//! - [`Uploader`]: uploads a batch of local files concurrently and
//!   returns one pre-signed URL per file, in input order. Without a
//!   store it produces `simulated_uploaded/` paths instead.

pub mod store;
pub mod uploader;

pub use store::{ObjectStore, S3ObjectStore};
pub use uploader::{UploadError, Uploader};
