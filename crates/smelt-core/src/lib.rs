//! # smelt-core
//!
//! Core abstractions for the Smelt build server.
//!
//! This crate provides the foundational types used across all Smelt
//! components:
//!
//! - **Identifiers**: Strongly-typed ids for projects, clients, and
//!   compilation attempts
//! - **Fingerprints**: The unique-compile-inputs digest that identifies a
//!   logical unit of compilation work
//! - **Error Types**: Shared error definitions and result types
//! - **Observability**: Logging initialization and span helpers
//!
//! ## Crate Boundary
//!
//! `smelt-core` is the only crate allowed to define shared primitives.
//! Cross-component interaction happens via the contracts defined here.
//!
//! ## Example
//!
//! ```rust
//! use smelt_core::prelude::*;
//!
//! let project = ProjectId::new("backend");
//! let client = ClientId::generate();
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod fingerprint;
pub mod id;
pub mod observability;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use smelt_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::fingerprint::UniqueCompileInputs;
    pub use crate::id::{AttemptId, ClientId, ProjectId};
    pub use crate::observability::{LogFormat, init_logging};
}

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use fingerprint::UniqueCompileInputs;
pub use id::{AttemptId, ClientId, ProjectId};
pub use observability::{LogFormat, init_logging};
