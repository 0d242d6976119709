//! `relay-worker` library crate.
//!
//! Job entry points and the result materializer. The binary entrypoint
//! lives in `main.rs`; modules are public for integration testing.

pub mod handler;
pub mod materialize;

pub use handler::{JobError, JobHandler};
pub use materialize::{MaterializeError, Materializer};
