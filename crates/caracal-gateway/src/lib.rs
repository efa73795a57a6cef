//! Pre-execution authority gateway.
//!
//! Sits in front of every outbound call an agent makes: authenticates the
//! caller, replay-protects the request, resolves and evaluates the
//! presented mandate, and either forwards the call or fails closed. The
//! mandate evaluation itself lives in `caracal-core`; this crate owns the
//! HTTP surface, the policy + spending cache that lets it degrade
//! gracefully when the policy store is unreachable, and the outbound
//! forwarding discipline that keeps inbound credentials from leaking
//! downstream.

pub mod auth;
pub mod error;
pub mod forward;
pub mod policy_cache;
pub mod replay_guard;
pub mod router;
pub mod state;

pub use error::ApiError;
pub use router::build_app;
pub use state::AppState;
