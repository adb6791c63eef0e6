//! # CivicTask Shared Library
//!
//! Core of the CivicTask volunteering marketplace: persistence, geospatial
//! task search, the task creation workflow, and the domain services used by
//! the admin CLI and any outer surface.
//!
//! ## Module Organization
//!
//! - `db`: pool, migrations, generic persistence, pagination, transactions,
//!   and the PostGIS point codec
//! - `models`: database models and their relations
//! - `services`: tasks, users, categories, skills, media, moderation,
//!   nearby notifications
//! - `auth`: session-token verification and signed user-event webhooks
//! - `storage`: object storage for uploaded media
//! - `notifications`: outbound SMS
//! - `config`: configuration management
//! - `error`: the core error type

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod notifications;
pub mod services;
pub mod storage;

/// Current version of the CivicTask shared library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
