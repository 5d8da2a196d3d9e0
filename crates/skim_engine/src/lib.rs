//! # Skim Engine
//!
//! Follows a registry database's change feed and mirrors every package
//! document, stripped of its binary attachments, into storage targets.
//!
//! This crate provides:
//! - Change feed coordination (follow, pause, resume, reconnect on silence)
//! - Durable sequence checkpointing
//! - Artifact fan-out to storage targets
//! - Putback of skimmed documents, in place or into a separate sink
//! - Conflict purging for deletions replicated into a sink
//! - An HTTP CouchDB client and an in-memory database for tests
//!
//! ## Pipeline
//!
//! Each change is handled to completion before the next one is read:
//! 1. Fetch the document with attachment metadata and revision history
//! 2. Apply the transform policy (attachment allow-list, URL rewrite, readme trim)
//! 3. Write `doc.json` and the pending attachments to every target
//! 4. Write the document back without attachments
//! 5. Persist the change's sequence
//!
//! ## Key Invariants
//!
//! - Changes are applied in feed order, one at a time
//! - The checkpoint never passes a change that has not completed
//! - Re-applying a change is harmless
//! - An attachment marked as skipped is never fetched again

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod checkpoint;
mod config;
mod content;
mod database;
mod dispatcher;
mod error;
mod events;
mod feed;
mod http;
mod memory;
mod putback;
mod reconcile;

pub use checkpoint::{CheckpointStore, SaveOutcome};
pub use config::SkimConfig;
pub use content::{ContentSynchronizer, SyncReport, TransferPolicy};
pub use database::{CouchDatabase, Endpoints, FetchOptions, WriteMode};
pub use dispatcher::{ChangeOutcome, SkimState, SkimStats, Skimmer};
pub use error::{SkimError, SkimResult};
pub use events::{EventBus, SkimEvent};
pub use feed::{ChangeSource, FeedCoordinator, FeedItem, FeedState, VecFeed};
pub use http::HttpDatabase;
pub use memory::{MemoryChanges, MemoryDatabase, RequestCounts};
pub use putback::{PutbackOutcome, PutbackWriter};
pub use reconcile::ConflictReconciler;
