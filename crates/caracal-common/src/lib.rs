//! Shared primitives for the Caracal authority enforcement service.
//!
//! Every other crate in the workspace depends on this one for the error
//! taxonomy, content-addressed id helpers, and the small `Clock` capability
//! trait that keeps call sites synchronous and testable without a global
//! singleton.

pub mod error;
pub mod ids;
pub mod time;

pub use error::{CaracalError, ErrorKind};
pub use ids::{new_principal_id, sha256_id};
pub use time::{Clock, SystemClock};
