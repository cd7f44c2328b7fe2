//! # mars-core - Core Domain Types
//!
//! Foundation crate for the Mars desktop shell. Provides domain types, error
//! handling, event definitions and logging setup.
//!
//! This crate has **zero internal dependencies** -- it only depends on external
//! crates (serde, chrono, thiserror, tracing, dirs, dunce).
//!
//! ## Public API
//!
//! ### Domain Types (`types`)
//! - [`ServerConfig`] - Host/port of one logical opencode server
//! - [`ServerState`] - Supervisor lifecycle state (Stopped, Starting, Running, Stopping)
//! - [`ReadinessPolicy`] - Bounded readiness polling budget
//! - [`same_directory()`] - Normalized directory comparison
//!
//! ### Events (`events`)
//! - [`ServerEvent`] - Decoded event from the server's SSE stream
//! - [`ServerProcessEvent`] - stdout/stderr/exit notifications from the child process
//!
//! ### Error Handling (`error`)
//! - [`Error`] - Custom error enum with `fatal` vs `recoverable` classification
//! - [`Result`] - Type alias for `std::result::Result<T, Error>`
//! - [`ResultExt`] - Extension trait for adding error context
//!
//! ## Prelude
//!
//! Import commonly used types with:
//! ```rust
//! use mars_core::prelude::*;
//! ```

pub mod error;
pub mod events;
pub mod logging;
pub mod types;

/// Prelude for common imports used throughout all Mars crates
pub mod prelude {
    pub use super::error::{Error, Result, ResultExt};
    pub use tracing::{debug, error, info, instrument, trace, warn};
}

// Re-export commonly used types at crate root for convenience
pub use error::{Error, Result, ResultExt};
pub use events::{ServerEvent, ServerProcessEvent};
pub use types::{
    normalize_for_compare, normalize_lexically, same_directory, ReadinessPolicy, ServerConfig,
    ServerState, DEFAULT_HOST, DEFAULT_PORT,
};
