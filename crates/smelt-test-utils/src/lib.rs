//! Shared test utilities for Smelt integration tests.
//!
//! This crate provides:
//! - [`TestHarness`]: a pre-configured scheduler context with a client,
//!   bundle setup, and stub compiler
//! - [`StubCompiler`]: deterministic compiler behaviors (succeed, fail,
//!   hang, signature gaps) with invocation recording
//! - [`RecordingSink`]: an event sink that captures the delivered stream
//! - DAG factories for the common test topologies
//!
//! # Example
//!
//! ```rust,ignore
//! use smelt_test_utils::TestHarness;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let harness = TestHarness::new();
//!     let dag = harness.dag(&[("a", &[])]);
//!     let result = harness.traverse(&dag, false).await;
//!     // ... assert ...
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
// Test utilities use expect/unwrap for cleaner test code - panics are acceptable in tests
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]

pub mod fixtures;
pub mod stubs;

pub use fixtures::*;
pub use stubs::*;

/// Initialize test logging (call once per test module).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("smelt=debug".parse().expect("valid directive")),
        )
        .with_test_writer()
        .try_init();
}
