//! # TaskTrail Shared Library
//!
//! This crate contains the authorization and audit core used by the TaskTrail
//! API server, together with the database layer it runs on.
//!
//! ## Module Organization
//!
//! - `auth`: Token handling, password hashing, identity resolution and the
//!   permission evaluator
//! - `audit`: Audit recorder and read-only export queries
//! - `db`: Connection pooling and migrations
//! - `models`: Database models and data structures

pub mod audit;
pub mod auth;
pub mod db;
pub mod models;

/// Current version of the TaskTrail shared library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
