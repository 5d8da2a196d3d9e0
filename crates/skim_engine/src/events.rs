//! Observable skimmer events.
//!
//! Every step the dispatcher takes is announced on an [`EventBus`]. Monitors
//! subscribe to receive a copy of each event; events are also logged.
//!
//! ```rust
//! use skim_engine::{EventBus, SkimEvent};
//!
//! let bus = EventBus::new();
//! let mut rx = bus.subscribe();
//! bus.emit(SkimEvent::Put { id: "left-pad".into() });
//! assert_eq!(rx.try_recv().unwrap().to_string(), "put left-pad");
//! ```

use parking_lot::RwLock;
use skim_protocol::Sequence;
use std::fmt;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info};

/// A step taken while processing a change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkimEvent {
    /// A document was fetched and is about to be skimmed.
    Put {
        /// Document id.
        id: String,
    },
    /// Mirrored files of a deleted document are being removed.
    Rm {
        /// Document id.
        id: String,
    },
    /// An attachment is about to be fetched from the source.
    Attachment {
        /// Document id.
        id: String,
        /// Attachment filename.
        filename: String,
    },
    /// An artifact reached every target.
    Send {
        /// Target-relative path.
        path: String,
    },
    /// A deletion has been fully handled.
    Delete {
        /// Document id.
        id: String,
    },
    /// A change has been fully handled.
    Complete {
        /// Document id.
        id: String,
        /// Sequence of the change.
        sequence: Sequence,
    },
    /// Something went wrong.
    Error {
        /// Document id, when the error belongs to a change.
        id: Option<String>,
        /// Artifact path, when the error belongs to a transfer.
        path: Option<String>,
        /// Error message.
        message: String,
    },
}

impl SkimEvent {
    /// Event name as used in logs and monitors.
    pub fn kind(&self) -> &'static str {
        match self {
            SkimEvent::Put { .. } => "put",
            SkimEvent::Rm { .. } => "rm",
            SkimEvent::Attachment { .. } => "attachment",
            SkimEvent::Send { .. } => "send",
            SkimEvent::Delete { .. } => "delete",
            SkimEvent::Complete { .. } => "complete",
            SkimEvent::Error { .. } => "error",
        }
    }

    /// Returns true for error events.
    pub fn is_error(&self) -> bool {
        matches!(self, SkimEvent::Error { .. })
    }
}

impl fmt::Display for SkimEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkimEvent::Put { id } | SkimEvent::Rm { id } | SkimEvent::Delete { id } => {
                write!(f, "{} {id}", self.kind())
            }
            SkimEvent::Attachment { id, filename } => write!(f, "attachment {id}/{filename}"),
            SkimEvent::Send { path } => write!(f, "send {path}"),
            SkimEvent::Complete { id, sequence } => write!(f, "complete {id} @{sequence}"),
            SkimEvent::Error { id, path, message } => {
                f.write_str("error")?;
                if let Some(subject) = path.as_ref().or(id.as_ref()) {
                    write!(f, " {subject}")?;
                }
                write!(f, ": {message}")
            }
        }
    }
}

/// Distributes events to subscribers.
///
/// Subscribers that dropped their receiver are removed on the next emit.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: RwLock<Vec<UnboundedSender<SkimEvent>>>,
}

impl EventBus {
    /// Creates a bus with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to all future events.
    pub fn subscribe(&self) -> UnboundedReceiver<SkimEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Logs `event` and sends it to every subscriber.
    pub fn emit(&self, event: SkimEvent) {
        match &event {
            SkimEvent::Error { .. } => error!(event = %event, "skim event"),
            SkimEvent::Complete { .. } | SkimEvent::Delete { .. } => {
                info!(event = %event, "skim event")
            }
            _ => debug!(event = %event, "skim event"),
        }

        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}
