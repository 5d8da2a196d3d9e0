//! # Skim Storage
//!
//! Storage targets that receive mirrored registry content.
//!
//! Targets are **opaque file stores** addressed by relative paths such as
//! `left-pad/doc.json` or `left-pad/_attachments/left-pad-1.0.0.tgz`. They
//! know nothing about registry documents; the engine decides what to write.
//!
//! ## Available Targets
//!
//! - [`MemoryTarget`] - For testing
//! - [`FileTarget`] - Files under a root directory
//! - [`MultiTarget`] - Fans every operation out to a set of targets
//!
//! ## Example
//!
//! ```rust
//! use skim_storage::{MemoryTarget, StorageTarget};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let target = MemoryTarget::new("mem");
//! target.write("foo/doc.json", "{}".into()).await.unwrap();
//! let stat = target.stat("foo/doc.json").await.unwrap().unwrap();
//! assert_eq!(stat.size, 2);
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod memory;
mod multi;
mod target;

pub use error::{StorageError, StorageResult, TargetFailure};
pub use file::FileTarget;
pub use memory::MemoryTarget;
pub use multi::MultiTarget;
pub use target::{normalize_path, sha256_hex, EntryStat, StorageTarget};
