//! Change feed coordination.
//!
//! A [`ChangeSource`] is the transport that delivers change records in
//! sequence order. The [`FeedCoordinator`] wraps it with the lifecycle the
//! dispatcher needs:
//!
//! ```text
//! Stopped --start--> Following --pause--> Paused
//!    ^                   ^  <----resume----  |
//!    +------stop---------+-------stop--------+
//! ```
//!
//! When the source stays silent for longer than the inactivity timeout, the
//! coordinator drops the connection and reconnects from the last sequence it
//! delivered. Transport errors are returned to the caller as-is.

use crate::error::{SkimError, SkimResult};
use async_trait::async_trait;
use skim_protocol::{ChangeEvent, Sequence};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, warn};

/// A transport delivering change records.
#[async_trait]
pub trait ChangeSource: Send {
    /// Opens the stream at the first change after `since`.
    async fn connect(&mut self, since: Sequence) -> SkimResult<()>;

    /// Waits for the next change. `None` means the stream has ended.
    async fn next_change(&mut self) -> Option<SkimResult<ChangeEvent>>;

    /// Closes the stream.
    async fn disconnect(&mut self) -> SkimResult<()>;

    /// Stops reading from the network while a change is processed.
    async fn pause(&mut self) {}

    /// Resumes reading after [`pause`](Self::pause).
    async fn resume(&mut self) {}
}

/// Lifecycle state of a [`FeedCoordinator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    /// Not connected.
    Stopped,
    /// Delivering changes.
    Following,
    /// Connected, but not delivering.
    Paused,
}

impl FeedState {
    /// Returns true if the feed is connected.
    pub fn is_active(&self) -> bool {
        matches!(self, FeedState::Following | FeedState::Paused)
    }
}

/// Drives a [`ChangeSource`].
pub struct FeedCoordinator<S: ChangeSource> {
    source: S,
    state: FeedState,
    last: Sequence,
    inactivity: Duration,
    reconnects: u64,
}

impl<S: ChangeSource> FeedCoordinator<S> {
    /// Wraps `source`; it is not connected until [`start`](Self::start).
    pub fn new(source: S, inactivity: Duration) -> Self {
        Self {
            source,
            state: FeedState::Stopped,
            last: Sequence::ZERO,
            inactivity,
            reconnects: 0,
        }
    }

    /// Current state.
    pub fn state(&self) -> FeedState {
        self.state
    }

    /// Last sequence delivered (or the start sequence).
    pub fn last_sequence(&self) -> Sequence {
        self.last
    }

    /// Number of inactivity reconnects so far.
    pub fn reconnects(&self) -> u64 {
        self.reconnects
    }

    /// The wrapped source.
    pub fn source(&self) -> &S {
        &self.source
    }

    fn transition(&mut self, allowed: &[FeedState], to: FeedState) -> SkimResult<()> {
        if !allowed.contains(&self.state) {
            return Err(SkimError::InvalidStateTransition {
                from: format!("{:?}", self.state),
                to: format!("{to:?}"),
            });
        }
        self.state = to;
        Ok(())
    }

    /// Connects and starts following after `from`.
    pub async fn start(&mut self, from: Sequence) -> SkimResult<()> {
        self.transition(&[FeedState::Stopped], FeedState::Following)?;
        if let Err(e) = self.source.connect(from).await {
            self.state = FeedState::Stopped;
            return Err(e);
        }
        self.last = from;
        debug!(since = %from, "change feed started");
        Ok(())
    }

    /// Stops delivering changes until [`resume`](Self::resume).
    pub async fn pause(&mut self) -> SkimResult<()> {
        self.transition(&[FeedState::Following], FeedState::Paused)?;
        self.source.pause().await;
        Ok(())
    }

    /// Resumes delivering changes.
    pub async fn resume(&mut self) -> SkimResult<()> {
        self.transition(&[FeedState::Paused], FeedState::Following)?;
        self.source.resume().await;
        Ok(())
    }

    /// Disconnects. Stopping a stopped feed is a no-op.
    pub async fn stop(&mut self) -> SkimResult<()> {
        if self.state == FeedState::Stopped {
            return Ok(());
        }
        self.state = FeedState::Stopped;
        self.source.disconnect().await?;
        debug!(last = %self.last, "change feed stopped");
        Ok(())
    }

    /// Waits for the next change.
    ///
    /// Returns `Ok(None)` when the source ends.
    ///
    /// # Errors
    ///
    /// Returns [`SkimError::FeedClosed`] if stopped, an invalid transition if
    /// paused, and any transport error unchanged.
    pub async fn next_event(&mut self) -> SkimResult<Option<ChangeEvent>> {
        match self.state {
            FeedState::Stopped => return Err(SkimError::FeedClosed),
            FeedState::Paused => {
                return Err(SkimError::InvalidStateTransition {
                    from: "Paused".into(),
                    to: "next_event".into(),
                })
            }
            FeedState::Following => {}
        }

        loop {
            match tokio::time::timeout(self.inactivity, self.source.next_change()).await {
                Ok(Some(Ok(change))) => {
                    self.last = self.last.max(change.sequence);
                    return Ok(Some(change));
                }
                Ok(Some(Err(e))) => return Err(e),
                Ok(None) => return Ok(None),
                Err(_) => {
                    self.reconnects += 1;
                    warn!(
                        since = %self.last,
                        inactivity_ms = self.inactivity.as_millis() as u64,
                        "change feed inactive, reconnecting"
                    );
                    self.source.disconnect().await?;
                    self.source.connect(self.last).await?;
                }
            }
        }
    }
}

/// One scripted step of a [`VecFeed`].
#[derive(Debug)]
pub enum FeedItem {
    /// Deliver a change.
    Change(ChangeEvent),
    /// Fail the read.
    Error(SkimError),
    /// Never answer (until reconnected).
    Stall,
}

/// An in-memory [`ChangeSource`] replaying a script.
///
/// Reconnecting skips changes at or before the requested sequence, like a
/// real feed resuming from `since`.
#[derive(Debug, Default)]
pub struct VecFeed {
    items: VecDeque<FeedItem>,
    connects: Vec<Sequence>,
    pauses: usize,
}

impl VecFeed {
    /// Creates a feed delivering `changes` in order.
    pub fn new(changes: impl IntoIterator<Item = ChangeEvent>) -> Self {
        Self {
            items: changes.into_iter().map(FeedItem::Change).collect(),
            ..Self::default()
        }
    }

    /// Appends a scripted step.
    #[must_use]
    pub fn then(mut self, item: FeedItem) -> Self {
        self.items.push_back(item);
        self
    }

    /// Sequences passed to every `connect` call.
    pub fn connects(&self) -> &[Sequence] {
        &self.connects
    }

    /// Number of `pause` calls.
    pub fn pauses(&self) -> usize {
        self.pauses
    }
}

#[async_trait]
impl ChangeSource for VecFeed {
    async fn connect(&mut self, since: Sequence) -> SkimResult<()> {
        self.connects.push(since);
        while let Some(FeedItem::Change(change)) = self.items.front() {
            if change.sequence > since {
                break;
            }
            self.items.pop_front();
        }
        Ok(())
    }

    async fn next_change(&mut self) -> Option<SkimResult<ChangeEvent>> {
        match self.items.pop_front()? {
            FeedItem::Change(change) => Some(Ok(change)),
            FeedItem::Error(e) => Some(Err(e)),
            FeedItem::Stall => std::future::pending().await,
        }
    }

    async fn disconnect(&mut self) -> SkimResult<()> {
        Ok(())
    }

    async fn pause(&mut self) {
        self.pauses += 1;
    }
}
