//! Request middleware: session auth, API-key auth, CSRF, rate limiting.

pub mod admin_session;
pub mod api_key;
pub mod csrf;
pub mod rate_limit;

pub use admin_session::AdminSession;
pub use api_key::ApiKeyAuth;
pub use rate_limit::{RateDecision, RateGate};
