//! WordPress messaging backend.
//!
//! Talks to the JWT auth plugin, Better Messages and the BuddyPress REST API
//! over HTTP and drives the command/event protocol from `backend-core`.

mod api;
mod client;
mod runtime;
mod session;

pub use api::ChatApi;
pub use client::{DEFAULT_BASE_URL, DEFAULT_REQUEST_TIMEOUT_MS, WpClient, parse_base_url};
pub use runtime::{
    ApiFactory, RuntimeSettings, WpRuntimeHandle, spawn_runtime, spawn_runtime_with,
    wp_api_factory,
};
pub use session::{SECRET_SERVICE, Session, SessionStore, session_account_for_base_url};
