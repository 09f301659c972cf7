//! # EntiGrid Testkit
//!
//! Test utilities for EntiGrid.
//!
//! This crate provides:
//! - A [`TestCore`] wired to in-memory collaborators the test can inspect
//! - Property-based test generators using proptest
//! - Test logging setup
//!
//! Cross-crate integration tests live in this crate's `tests/` directory.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use entigrid_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn writes_a_user() {
//!     let test = TestCore::start().await;
//!     let users = test.collection(test_scope("users"));
//!     users.write(user("ann@example.com")).await.unwrap();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod logging;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::logging::*;
}

pub use fixtures::*;
pub use generators::*;
pub use logging::*;
