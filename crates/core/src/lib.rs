//! Shared configuration, error and job types for the ComfyUI relay.
//!
//! This crate has no internal dependencies so that every other crate in
//! the workspace can depend on it.

pub mod config;
pub mod error;
pub mod types;
