//! # Skim Testkit
//!
//! Test utilities for the registry skimmer.
//!
//! This crate provides:
//! - Registry document fixtures
//! - Property-based generators for registry documents
//! - A harness wiring a skimmer to in-memory databases and targets
//!
//! ## Usage
//!
//! ```rust,ignore
//! use skim_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn mirrors_a_package() {
//!     let mut harness = Harness::shared();
//!     publish_package(&harness.source, "foo", &["1.0.0"]);
//!     harness.run_to_quiescence().await.unwrap();
//!     assert!(harness.target(0).get("foo/doc.json").is_some());
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod harness;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::harness::*;
}

pub use fixtures::*;
pub use generators::*;
pub use harness::*;
