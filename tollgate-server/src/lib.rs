//! tollgate-server: HTTP control plane and data plane.
//!
//! The control plane (session-authenticated `/api/*`) manages users,
//! providers, the sidecar lifecycle, and usage reporting. The data plane
//! (`/v1/*`, API-key authenticated) forwards OpenAI-shaped requests to
//! the supervised sidecar and accounts for token usage.

pub mod error;
pub mod gateway;
pub mod jobs;
pub mod lock;
pub mod middleware;
pub mod oauth;
pub mod routes;
pub mod server;
pub mod sidecar;
pub mod state;

pub use error::{ApiError, ApiJson};
pub use state::AppState;
