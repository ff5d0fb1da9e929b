//! ODK Central binding for [`EntityRemote`](crate::EntityRemote).
//!
//! Rows live in a Central entity list ("dataset"). The snapshot is read
//! through the OData feed; writes go through the REST entity endpoints.

pub mod auth;
pub mod client;
pub mod config;
pub mod urls;

pub use auth::SessionAuth;
pub use client::{CentralClient, RetryPolicy};
pub use config::{cache_path, config_path, CentralConfig, ConfigError, TokenCache};
