//! Artifact fan-out.
//!
//! For a skimmed document the synchronizer delivers `doc.json` and every
//! pending attachment to all storage targets. Transfers run concurrently and
//! independently: a failed artifact is reported and the others carry on.
//! The call returns once every artifact has finished.

use crate::database::CouchDatabase;
use crate::error::{SkimError, SkimResult};
use crate::events::{EventBus, SkimEvent};
use bytes::Bytes;
use futures::future::join_all;
use skim_protocol::{plan_artifacts, Artifact, ArtifactKind, Document};
use skim_storage::{MultiTarget, StorageTarget};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Whether artifacts already present on a target are written again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferPolicy {
    /// Write every artifact to every target.
    #[default]
    AlwaysWrite,
    /// Skip targets that already hold an attachment of the expected length.
    /// `doc.json` is always written.
    SkipExisting,
}

/// Result of synchronizing one document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Paths delivered to their targets.
    pub sent: Vec<String>,
    /// Paths that failed on at least one target.
    pub failed: Vec<String>,
    /// Paths every target already had.
    pub skipped: Vec<String>,
}

impl SyncReport {
    /// Returns true if nothing failed.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Delivers document artifacts to storage targets.
#[derive(Debug)]
pub struct ContentSynchronizer {
    targets: MultiTarget,
    policy: TransferPolicy,
    timeout: Duration,
    events: Arc<EventBus>,
}

struct Planned {
    artifact: Artifact,
    targets: MultiTarget,
}

enum Delivery {
    Sent,
    Failed,
}

impl ContentSynchronizer {
    /// Creates a synchronizer writing to `targets`.
    pub fn new(targets: MultiTarget, events: Arc<EventBus>) -> Self {
        Self {
            targets,
            policy: TransferPolicy::default(),
            timeout: Duration::from_secs(5 * 60),
            events,
        }
    }

    /// Sets the transfer policy.
    #[must_use]
    pub fn with_policy(mut self, policy: TransferPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Bounds each artifact transfer.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The storage targets.
    pub fn targets(&self) -> &MultiTarget {
        &self.targets
    }

    /// Delivers the artifacts of `doc`, fetching attachments from `source`.
    ///
    /// A document without pending attachments completes immediately: no
    /// events, no writes.
    ///
    /// # Errors
    ///
    /// Only if `doc` cannot be serialized. Transfer failures are reported in
    /// the [`SyncReport`] and as error events.
    pub async fn sync(&self, source: &dyn CouchDatabase, doc: &Document) -> SkimResult<SyncReport> {
        let artifacts = plan_artifacts(doc);
        if artifacts.iter().all(Artifact::is_document) {
            debug!(id = %doc.id, "no attachments to transfer");
            return Ok(SyncReport::default());
        }

        let doc_json = Bytes::from(doc.to_json_line()?);
        let planned = join_all(artifacts.into_iter().map(|a| self.plan(a))).await;

        let mut report = SyncReport::default();
        let mut transfers = Vec::new();
        for plan in planned {
            if plan.targets.is_empty() {
                report.skipped.push(plan.artifact.path);
                continue;
            }
            if let ArtifactKind::Attachment { filename } = &plan.artifact.kind {
                self.events.emit(SkimEvent::Attachment {
                    id: doc.id.clone(),
                    filename: filename.clone(),
                });
            }
            transfers.push(plan);
        }

        let results = join_all(
            transfers
                .iter()
                .map(|plan| self.deliver(source, &doc.id, plan, doc_json.clone())),
        )
        .await;

        for (plan, delivery) in transfers.into_iter().zip(results) {
            match delivery {
                Delivery::Sent => report.sent.push(plan.artifact.path),
                Delivery::Failed => report.failed.push(plan.artifact.path),
            }
        }
        Ok(report)
    }

    async fn plan(&self, artifact: Artifact) -> Planned {
        let targets = match (self.policy, &artifact.kind, artifact.expected_length) {
            (TransferPolicy::SkipExisting, ArtifactKind::Attachment { .. }, Some(len)) => {
                self.targets.select_missing(&artifact.path, len).await
            }
            _ => self.targets.clone(),
        };
        Planned { artifact, targets }
    }

    async fn deliver(
        &self,
        source: &dyn CouchDatabase,
        id: &str,
        plan: &Planned,
        doc_json: Bytes,
    ) -> Delivery {
        let path = &plan.artifact.path;
        let transfer = async {
            let data = match &plan.artifact.kind {
                ArtifactKind::Document => doc_json,
                ArtifactKind::Attachment { filename } => source.get_attachment(id, filename).await?,
            };
            plan.targets.write(path, data).await?;
            Ok::<(), SkimError>(())
        };

        let result = match tokio::time::timeout(self.timeout, transfer).await {
            Ok(result) => result,
            Err(_) => Err(SkimError::Timeout),
        };

        match result {
            Ok(()) => {
                self.events.emit(SkimEvent::Send { path: path.clone() });
                Delivery::Sent
            }
            Err(e) => {
                self.events.emit(SkimEvent::Error {
                    id: Some(id.to_string()),
                    path: Some(path.clone()),
                    message: e.to_string(),
                });
                Delivery::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{FetchOptions, WriteMode};
    use crate::memory::MemoryDatabase;
    use skim_protocol::{SkimPolicy, TransformPolicy, VersionInfo};
    use skim_storage::MemoryTarget;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn published(db: &MemoryDatabase) -> Document {
        let mut doc = Document::new("foo");
        doc.name = Some("foo".into());
        doc.versions = Some(
            [("1.0.0".to_string(), VersionInfo::with_tarball("https://anywhere/foo-1.0.0.tgz"))]
                .into_iter()
                .collect(),
        );
        db.publish(doc, vec![("foo-1.0.0.tgz".into(), Bytes::from_static(b"tarball!"))]);
        db.peek("foo").unwrap()
    }

    fn setup() -> (Arc<MemoryTarget>, Arc<MemoryTarget>, ContentSynchronizer, UnboundedReceiver<SkimEvent>) {
        let a = Arc::new(MemoryTarget::new("a"));
        let b = Arc::new(MemoryTarget::new("b"));
        let events = Arc::new(EventBus::new());
        let rx = events.subscribe();
        let sync = ContentSynchronizer::new(MultiTarget::new(vec![a.clone(), b.clone()]), events);
        (a, b, sync, rx)
    }

    fn drain(rx: &mut UnboundedReceiver<SkimEvent>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event.to_string());
        }
        out
    }

    #[tokio::test]
    async fn delivers_doc_and_tarball_everywhere() {
        let db = MemoryDatabase::new("mem://registry");
        let doc = SkimPolicy::new().apply(published(&db)).document;
        let (a, b, sync, mut rx) = setup();

        let report = sync.sync(&db, &doc).await.unwrap();

        assert_eq!(report.sent, vec!["foo/doc.json", "foo/_attachments/foo-1.0.0.tgz"]);
        assert!(report.is_complete());
        for target in [&a, &b] {
            assert_eq!(target.get("foo/_attachments/foo-1.0.0.tgz").unwrap(), Bytes::from_static(b"tarball!"));
            let json = target.get("foo/doc.json").unwrap();
            assert_eq!(json.last(), Some(&b'\n'));
        }
        assert_eq!(
            drain(&mut rx),
            vec!["attachment foo/foo-1.0.0.tgz", "send foo/doc.json", "send foo/_attachments/foo-1.0.0.tgz"]
        );
    }

    #[tokio::test]
    async fn document_only_short_circuits() {
        let db = MemoryDatabase::new("mem://registry");
        let (a, _b, sync, mut rx) = setup();
        let mut doc = SkimPolicy::new().apply(published(&db)).document;
        doc.attachments = None;
        let doc = SkimPolicy::new().apply(doc).document;

        let report = sync.sync(&db, &doc).await.unwrap();
        assert_eq!(report, SyncReport::default());
        assert!(a.is_empty());
        assert!(drain(&mut rx).is_empty());
        assert_eq!(db.requests().attachments, 0);
    }

    #[tokio::test]
    async fn failures_are_reported_and_others_continue() {
        let db = MemoryDatabase::new("mem://registry");
        let doc = SkimPolicy::new().apply(published(&db)).document;
        let (a, b, sync, mut rx) = setup();
        b.fail_writes_matching(".tgz");

        let report = sync.sync(&db, &doc).await.unwrap();

        assert_eq!(report.sent, vec!["foo/doc.json"]);
        assert_eq!(report.failed, vec!["foo/_attachments/foo-1.0.0.tgz"]);
        assert!(a.get("foo/_attachments/foo-1.0.0.tgz").is_some());
        let events = drain(&mut rx);
        assert!(events.iter().any(|e| e.starts_with("error foo/_attachments/foo-1.0.0.tgz")));
    }

    #[tokio::test]
    async fn skip_existing_avoids_refetch() {
        let db = MemoryDatabase::new("mem://registry");
        let doc = SkimPolicy::new().apply(published(&db)).document;
        let (a, b, sync, mut rx) = setup();
        let sync = sync.with_policy(TransferPolicy::SkipExisting);

        sync.sync(&db, &doc).await.unwrap();
        drain(&mut rx);
        let report = sync.sync(&db, &doc).await.unwrap();

        assert_eq!(report.skipped, vec!["foo/_attachments/foo-1.0.0.tgz"]);
        assert_eq!(report.sent, vec!["foo/doc.json"]);
        assert_eq!(db.requests().attachments, 1);
        assert_eq!(drain(&mut rx), vec!["send foo/doc.json"]);
        assert_eq!(a.write_count(), 3);
        assert_eq!(b.write_count(), 3);
    }

    #[tokio::test]
    async fn missing_attachment_is_an_error_event() {
        let db = MemoryDatabase::new("mem://registry");
        let mut doc = SkimPolicy::new().apply(published(&db)).document;
        doc.id = "elsewhere".into();
        let (_a, _b, sync, mut rx) = setup();

        let report = sync.sync(&db, &doc).await.unwrap();
        assert_eq!(report.failed.len(), 1);
        assert!(drain(&mut rx).iter().any(|e| e.starts_with("error")));
    }

    /// Source whose attachment downloads never finish.
    struct StalledSource;

    #[async_trait::async_trait]
    impl CouchDatabase for StalledSource {
        fn url(&self) -> &str {
            "mem://stalled"
        }

        async fn get_document(&self, _: &str, _: FetchOptions) -> SkimResult<Option<Document>> {
            Ok(None)
        }

        async fn get_attachment(&self, _: &str, _: &str) -> SkimResult<Bytes> {
            std::future::pending().await
        }

        async fn head_revision(&self, _: &str) -> SkimResult<Option<String>> {
            Ok(None)
        }

        async fn put_document(&self, doc: &Document, _: WriteMode) -> SkimResult<String> {
            Err(SkimError::Conflict { id: doc.id.clone() })
        }

        async fn delete_revision(&self, _: &str, _: &str) -> SkimResult<bool> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn stalled_download_times_out() {
        let db = MemoryDatabase::new("mem://registry");
        let doc = SkimPolicy::new().apply(published(&db)).document;
        let (a, _b, sync, mut rx) = setup();
        let sync = sync.with_timeout(Duration::from_millis(100));

        let report = tokio::time::timeout(Duration::from_secs(5), sync.sync(&StalledSource, &doc))
            .await
            .expect("artifact timeout did not fire")
            .unwrap();

        assert_eq!(report.sent, vec!["foo/doc.json"]);
        assert_eq!(report.failed, vec!["foo/_attachments/foo-1.0.0.tgz"]);
        assert!(a.get("foo/doc.json").is_some());
        assert!(a.get("foo/_attachments/foo-1.0.0.tgz").is_none());
        let events = drain(&mut rx);
        assert!(events.contains(&format!("error foo/_attachments/foo-1.0.0.tgz: {}", SkimError::Timeout)));
    }
}
