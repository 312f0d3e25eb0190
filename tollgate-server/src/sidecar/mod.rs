//! Sidecar lifecycle: config projection, process supervision, and the
//! loopback management client.
//!
//! The sidecar is a separately-distributed routing binary. This module
//! owns generating its YAML from store state, spawning and monitoring
//! the child, and talking to its loopback-only management endpoint.

pub mod config_gen;
pub mod management;
pub mod supervisor;

pub use config_gen::{
    ServerConfig, ensure_internal_key, load_server_config, render_from_store, render_sidecar_yaml,
    save_server_config, write_atomic,
};
pub use management::{
    HttpSidecarManagement, MockSidecarManagement, SidecarHealth, SidecarManagement,
    SidecarProviderStatus, SidecarResponse,
};
pub use supervisor::{
    CrashState, LocalSidecarProcess, MockSidecarProcess, RestartDecision, SidecarProcessManager,
    Supervisor, SupervisorStatus,
};

/// Errors from sidecar lifecycle and management operations
#[derive(Debug, thiserror::Error)]
pub enum SidecarError {
    #[error("Failed to spawn sidecar: {0}")]
    Spawn(String),

    #[error("Sidecar did not answer health within {0} seconds")]
    HealthTimeout(u64),

    #[error("Sidecar request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Sidecar is not running")]
    NotRunning,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store error: {0}")]
    Store(#[from] tollgate_db::DbError),
}
