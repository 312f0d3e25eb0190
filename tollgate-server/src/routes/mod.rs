//! HTTP route handlers, one module per resource.

pub mod auth;
pub mod config;
pub mod logs;
pub mod oauth;
pub mod providers;
pub mod proxy;
pub mod usage;
pub mod users;
pub mod v1;
