//! # TaskTrail API Server Library
//!
//! HTTP surface for organizations, users, tasks and sprints. Every
//! protected request resolves the caller's identity, passes the permission
//! evaluator, and records its mutation in the organization's audit trail
//! inside the same transaction.
//!
//! ## Modules
//!
//! - `app`: Application state and router builder
//! - `config`: Configuration management
//! - `error`: Error handling and HTTP response mapping
//! - `middleware`: Authentication and security headers
//! - `routes`: API route handlers

pub mod app;
pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
