//! tollgate-db: embedded store for the tollgate gateway.
//!
//! This crate provides database operations for:
//! - End users and their API key digests
//! - Admin sessions and OAuth state nonces
//! - Upstream providers and sealed credential accounts
//! - Per-request usage logs and daily rollups
//! - Process-wide key/value settings

pub(crate) mod clock;
pub mod db;
pub mod error;
pub mod oauth_states;
pub mod providers;
pub mod sessions;
pub mod settings;
pub mod usage;
pub mod users;

// Re-export commonly used types
pub use db::TollgateDb;
pub use error::{DbError, DbResult};
pub use oauth_states::{OAuthState, OAuthStateRepository};
pub use providers::{
    AccountRepository, AccountStatus, Provider, ProviderAccount, ProviderKind, ProviderRepository,
};
pub use sessions::{SESSION_CAP_DAYS, SESSION_TTL_HOURS, Session, SessionRepository};
pub use settings::SettingsRepository;
pub use usage::{
    DailyUsage, LogEntry, LogFilter, Period, ProviderUsage, UsageRecord, UsageRepository,
    UsageStats, UsageStatus,
};
pub use users::{User, UserRepository, UserUpdate, UserWithHash};

// Re-export test helpers when running tests or when the test-helpers
// feature is enabled
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;
