//! The change dispatcher.
//!
//! Changes are handled one at a time, in feed order:
//!
//! ```text
//! Idle -> Fetching -> Transforming -> Syncing -> WritingBack -> Completed
//!   |                                                            ^
//!   +-> Deleting ------------------------------------------------+
//!   (any step) -> Failed
//! ```
//!
//! The checkpoint is saved only after a change has been fully handled, so a
//! restart replays at most the change that was in flight. Every effect of a
//! change is idempotent, which makes the replay harmless.

use crate::checkpoint::CheckpointStore;
use crate::config::SkimConfig;
use crate::content::{ContentSynchronizer, SyncReport};
use crate::database::{Endpoints, FetchOptions};
use crate::error::{SkimError, SkimResult};
use crate::events::{EventBus, SkimEvent};
use crate::feed::{ChangeSource, FeedCoordinator};
use crate::putback::{PutbackOutcome, PutbackWriter};
use crate::reconcile::ConflictReconciler;
use parking_lot::RwLock;
use skim_protocol::{ChangeEvent, Sequence, SkimPolicy, TransformPolicy};
use skim_storage::{MultiTarget, StorageTarget};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, error, info, warn};

/// Processing state of the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkimState {
    /// Waiting for a change.
    Idle,
    /// Fetching the document.
    Fetching,
    /// Applying the transform policy.
    Transforming,
    /// Delivering artifacts.
    Syncing,
    /// Writing the skimmed document.
    WritingBack,
    /// Handling a deletion.
    Deleting,
    /// The last change was handled.
    Completed,
    /// The last change failed.
    Failed,
}

impl SkimState {
    /// Returns true while a change is in flight.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SkimState::Fetching
                | SkimState::Transforming
                | SkimState::Syncing
                | SkimState::WritingBack
                | SkimState::Deleting
        )
    }
}

/// How a change was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeOutcome {
    /// The document was skimmed and mirrored.
    Completed {
        /// Artifact transfer results.
        report: SyncReport,
        /// Whether the skimmed document was written back.
        written_back: bool,
    },
    /// A deletion was propagated.
    Deleted,
    /// The id cannot be mirrored safely.
    Skipped,
    /// The document no longer exists.
    Vanished,
    /// The record carried no document id.
    Ignored,
}

/// Counters over the lifetime of a dispatcher.
#[derive(Debug, Clone, Default)]
pub struct SkimStats {
    /// Changes received.
    pub changes_seen: u64,
    /// Documents skimmed and mirrored.
    pub changes_completed: u64,
    /// Deletions handled.
    pub deletions: u64,
    /// Changes skipped for unsafe ids.
    pub skipped_ids: u64,
    /// Documents gone by the time they were fetched.
    pub vanished: u64,
    /// Artifacts delivered.
    pub artifacts_sent: u64,
    /// Artifacts that failed.
    pub artifacts_failed: u64,
    /// Artifacts every target already had.
    pub artifacts_skipped: u64,
    /// Putbacks that were not needed.
    pub putbacks_suppressed: u64,
    /// In-place putback conflicts ignored.
    pub conflicts_swallowed: u64,
    /// Changes that failed.
    pub errors: u64,
    /// Last failure.
    pub last_error: Option<String>,
    /// When the last change finished.
    pub last_change_time: Option<Instant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Ignore,
    Delete,
    Design,
    Skip,
    Package,
}

/// Applies change-feed records.
pub struct Skimmer {
    endpoints: Endpoints,
    policy: Arc<dyn TransformPolicy>,
    content: ContentSynchronizer,
    putback: PutbackWriter,
    reconciler: Option<ConflictReconciler>,
    checkpoint: CheckpointStore,
    events: Arc<EventBus>,
    propagate_deletions: bool,
    require_complete_transfer: bool,
    start_sequence: Option<Sequence>,
    state: RwLock<SkimState>,
    stats: RwLock<SkimStats>,
    current: RwLock<Sequence>,
    in_flight: AtomicBool,
}

/// Clears the in-flight flag when a change finishes, however it finishes.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Skimmer {
    /// Creates a dispatcher.
    ///
    /// # Errors
    ///
    /// Returns [`SkimError::InvalidConfig`] if the configuration is invalid.
    pub fn new(config: &SkimConfig, endpoints: Endpoints, targets: MultiTarget) -> SkimResult<Self> {
        config.validate()?;

        let mut policy = SkimPolicy::new().with_max_readme_bytes(config.max_readme_bytes);
        if let Some(registry) = &config.registry_url {
            policy = policy.with_registry(registry.as_str());
        }

        let events = Arc::new(EventBus::new());
        let content = ContentSynchronizer::new(targets, Arc::clone(&events))
            .with_policy(config.transfer_policy)
            .with_timeout(config.artifact_timeout);
        let reconciler = match &endpoints {
            Endpoints::Split { sink, .. } => {
                Some(ConflictReconciler::new(Arc::clone(sink), config.max_purge_rounds))
            }
            Endpoints::Shared(_) => None,
        };

        Ok(Self {
            putback: PutbackWriter::new(endpoints.clone()),
            endpoints,
            policy: Arc::new(policy),
            content,
            reconciler,
            checkpoint: CheckpointStore::new(&config.sequence_file),
            events,
            propagate_deletions: config.propagate_deletions,
            require_complete_transfer: config.require_complete_transfer,
            start_sequence: config.start_sequence,
            state: RwLock::new(SkimState::Idle),
            stats: RwLock::new(SkimStats::default()),
            current: RwLock::new(Sequence::ZERO),
            in_flight: AtomicBool::new(false),
        })
    }

    /// Replaces the transform policy.
    #[must_use]
    pub fn with_policy(mut self, policy: Arc<dyn TransformPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Subscribes to events.
    pub fn subscribe(&self) -> UnboundedReceiver<SkimEvent> {
        self.events.subscribe()
    }

    /// The event bus.
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// The checkpoint store.
    pub fn checkpoint(&self) -> &CheckpointStore {
        &self.checkpoint
    }

    /// The configured endpoints.
    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Current state.
    pub fn state(&self) -> SkimState {
        *self.state.read()
    }

    /// Counters so far.
    pub fn stats(&self) -> SkimStats {
        self.stats.read().clone()
    }

    /// Sequence of the latest change received.
    pub fn current_sequence(&self) -> Sequence {
        *self.current.read()
    }

    fn set_state(&self, state: SkimState) {
        *self.state.write() = state;
    }

    /// Determines where to resume: the configured start sequence, else the
    /// checkpoint file.
    pub async fn resume_point(&self) -> SkimResult<Sequence> {
        let sequence = match self.start_sequence {
            Some(sequence) => {
                info!(%sequence, "starting from configured sequence");
                sequence
            }
            None => self.checkpoint.load().await?,
        };
        *self.current.write() = sequence;
        Ok(sequence)
    }

    fn route(&self, change: &ChangeEvent) -> Route {
        if change.id.is_empty() {
            Route::Ignore
        } else if change.deleted {
            Route::Delete
        } else if change.is_design_document() && !self.endpoints.is_shared() {
            Route::Design
        } else if !change.has_url_safe_id() {
            Route::Skip
        } else {
            Route::Package
        }
    }

    /// Handles one change and advances the checkpoint.
    ///
    /// # Errors
    ///
    /// A failure is reported as an error event and returned as
    /// [`SkimError::ChangeFailed`]; the checkpoint is left alone.
    pub async fn process(&self, change: &ChangeEvent) -> SkimResult<ChangeOutcome> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return Err(SkimError::InvalidStateTransition {
                from: format!("{:?}", self.state()),
                to: "process".into(),
            });
        }
        let _in_flight = InFlight(&self.in_flight);

        *self.current.write() = change.sequence;
        self.stats.write().changes_seen += 1;

        let result = match self.route(change) {
            Route::Ignore => Ok(ChangeOutcome::Ignored),
            Route::Delete => self.delete(change).await,
            Route::Design => self.replicate_design(change).await,
            Route::Skip => {
                warn!(id = %change.id, sequence = %change.sequence, "skipping id that is not url-safe");
                self.stats.write().skipped_ids += 1;
                Ok(ChangeOutcome::Skipped)
            }
            Route::Package => self.skim(change).await,
        };

        let result = match result {
            Ok(outcome) => self.checkpoint.save(change.sequence).await.map(|_| outcome),
            Err(e) => Err(e),
        };

        match result {
            Ok(outcome) => {
                self.set_state(SkimState::Completed);
                self.stats.write().last_change_time = Some(Instant::now());
                Ok(outcome)
            }
            Err(e) => {
                self.set_state(SkimState::Failed);
                error!(id = %change.id, sequence = %change.sequence, error = %e, "change failed");
                {
                    let mut stats = self.stats.write();
                    stats.errors += 1;
                    stats.last_error = Some(e.to_string());
                }
                self.events.emit(SkimEvent::Error {
                    id: Some(change.id.clone()),
                    path: None,
                    message: e.to_string(),
                });
                Err(SkimError::ChangeFailed {
                    sequence: change.sequence,
                    id: change.id.clone(),
                    source: Box::new(e),
                })
            }
        }
    }

    async fn skim(&self, change: &ChangeEvent) -> SkimResult<ChangeOutcome> {
        let id = &change.id;

        self.set_state(SkimState::Fetching);
        let source = self.endpoints.source();
        let Some(doc) = source.get_document(id, FetchOptions::package()).await? else {
            debug!(%id, "document vanished");
            self.stats.write().vanished += 1;
            return Ok(ChangeOutcome::Vanished);
        };
        self.events.emit(SkimEvent::Put { id: id.clone() });

        self.set_state(SkimState::Transforming);
        let outcome = self.policy.apply(doc);

        self.set_state(SkimState::Syncing);
        let report = self.content.sync(source.as_ref(), &outcome.document).await?;
        {
            let mut stats = self.stats.write();
            stats.artifacts_sent += report.sent.len() as u64;
            stats.artifacts_failed += report.failed.len() as u64;
            stats.artifacts_skipped += report.skipped.len() as u64;
        }
        if self.require_complete_transfer && !report.is_complete() {
            return Err(SkimError::IncompleteTransfer {
                id: id.clone(),
                failed: report.failed.len(),
            });
        }

        self.set_state(SkimState::WritingBack);
        let written_back = if self.endpoints.is_shared() && !outcome.changed {
            debug!(%id, "already skimmed, not writing back");
            self.stats.write().putbacks_suppressed += 1;
            false
        } else {
            if self.putback.write(outcome.document).await? == PutbackOutcome::Conflicted {
                self.stats.write().conflicts_swallowed += 1;
            }
            true
        };

        self.stats.write().changes_completed += 1;
        self.events.emit(SkimEvent::Complete {
            id: id.clone(),
            sequence: change.sequence,
        });
        Ok(ChangeOutcome::Completed {
            report,
            written_back,
        })
    }

    async fn replicate_design(&self, change: &ChangeEvent) -> SkimResult<ChangeOutcome> {
        self.set_state(SkimState::Fetching);
        let Some(doc) = self
            .endpoints
            .source()
            .get_document(&change.id, FetchOptions::design())
            .await?
        else {
            return Ok(ChangeOutcome::Vanished);
        };

        self.set_state(SkimState::WritingBack);
        self.putback.write(doc).await?;
        self.events.emit(SkimEvent::Complete {
            id: change.id.clone(),
            sequence: change.sequence,
        });
        Ok(ChangeOutcome::Completed {
            report: SyncReport::default(),
            written_back: true,
        })
    }

    async fn delete(&self, change: &ChangeEvent) -> SkimResult<ChangeOutcome> {
        let id = &change.id;
        self.set_state(SkimState::Deleting);

        if self.propagate_deletions {
            self.events.emit(SkimEvent::Rm { id: id.clone() });
            if change.has_url_safe_id() {
                self.content.targets().remove_all(id).await?;
            } else {
                debug!(%id, "nothing was mirrored for this id");
            }
        }
        if let Some(reconciler) = &self.reconciler {
            reconciler.purge(id).await?;
        }

        self.stats.write().deletions += 1;
        self.events.emit(SkimEvent::Delete { id: id.clone() });
        Ok(ChangeOutcome::Deleted)
    }

    /// Follows `feed` until it ends or `shutdown` resolves.
    ///
    /// The feed is paused while each change is handled. On a clean exit the
    /// checkpoint is flushed and the feed stopped.
    ///
    /// # Errors
    ///
    /// Stops at the first failed change or feed error, leaving the
    /// checkpoint at the last completed change.
    pub async fn run<S, F>(&self, feed: &mut FeedCoordinator<S>, shutdown: F) -> SkimResult<SkimStats>
    where
        S: ChangeSource,
        F: Future<Output = ()>,
    {
        let since = self.resume_point().await?;
        feed.start(since).await?;
        info!(%since, source = self.endpoints.source().url(), "skimmer running");

        tokio::pin!(shutdown);
        loop {
            let next = tokio::select! {
                _ = &mut shutdown => None,
                next = feed.next_event() => Some(next),
            };

            let change = match next {
                None => {
                    info!("shutdown requested");
                    break;
                }
                Some(Ok(Some(change))) => change,
                Some(Ok(None)) => {
                    debug!("change feed ended");
                    break;
                }
                Some(Err(e)) => {
                    error!(error = %e, "change feed failed");
                    {
                        let mut stats = self.stats.write();
                        stats.errors += 1;
                        stats.last_error = Some(e.to_string());
                    }
                    self.events.emit(SkimEvent::Error {
                        id: None,
                        path: None,
                        message: e.to_string(),
                    });
                    let _ = feed.stop().await;
                    return Err(e);
                }
            };

            feed.pause().await?;
            if let Err(e) = self.process(&change).await {
                let _ = feed.stop().await;
                return Err(e);
            }
            feed.resume().await?;
        }

        self.checkpoint.save(self.current_sequence()).await?;
        self.checkpoint.flush().await?;
        feed.stop().await?;
        self.set_state(SkimState::Idle);
        Ok(self.stats())
    }
}

impl std::fmt::Debug for Skimmer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Skimmer")
            .field("endpoints", &self.endpoints)
            .field("state", &self.state())
            .field("current", &self.current_sequence())
            .finish_non_exhaustive()
    }
}
