//! A skimmer wired to in-memory databases and storage targets.
//!
//! The harness owns everything a run touches: the source database, the
//! sink (the source itself in shared mode), two memory targets, the
//! checkpoint file in a temporary directory, and an event subscription.

use skim_engine::{
    ChangeOutcome, CouchDatabase, Endpoints, FeedCoordinator, MemoryChanges, MemoryDatabase,
    SkimConfig, SkimEvent, SkimResult, SkimStats, Skimmer,
};
use skim_protocol::{ChangeEvent, Document, Sequence};
use skim_storage::{MemoryTarget, MultiTarget, StorageTarget};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

/// Source database URL used by the harness.
pub const SOURCE_URL: &str = "http://localhost:5984/registry";
/// Sink database URL used in split mode.
pub const SINK_URL: &str = "http://localhost:5984/skim";
/// Mirror registry used for tarball rewriting.
pub const MIRROR_REGISTRY: &str = "http://registry.example.com";

/// Whether skimmed documents go back to the source or to a separate sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Write back into the source.
    Shared,
    /// Replicate into a separate sink.
    Split,
}

/// A test harness for end-to-end skimming.
pub struct Harness {
    /// The database the feed follows.
    pub source: Arc<MemoryDatabase>,
    /// The database skimmed documents are written to.
    pub sink: Arc<MemoryDatabase>,
    /// The dispatcher under test.
    pub skimmer: Skimmer,
    targets: Vec<Arc<MemoryTarget>>,
    config: SkimConfig,
    events: UnboundedReceiver<SkimEvent>,
    _temp_dir: TempDir,
}

impl Harness {
    /// Shared-mode harness with the default configuration.
    pub fn shared() -> Self {
        Self::new(Mode::Shared, |config| config)
    }

    /// Split-mode harness with the default configuration.
    pub fn split() -> Self {
        Self::new(Mode::Split, |config| config)
    }

    /// Creates a harness, letting `configure` adjust the configuration.
    ///
    /// The mirror registry is set to [`MIRROR_REGISTRY`] and the feed
    /// inactivity is short, so runs end quickly once the source is quiet.
    pub fn new(mode: Mode, configure: impl FnOnce(SkimConfig) -> SkimConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let source = Arc::new(MemoryDatabase::new(SOURCE_URL));

        let mut config = SkimConfig::new(SOURCE_URL, temp_dir.path().join("sequence"))
            .with_registry(MIRROR_REGISTRY)
            .with_inactivity(Duration::from_millis(200));
        let sink = match mode {
            Mode::Shared => Arc::clone(&source),
            Mode::Split => {
                config = config.with_sink(SINK_URL);
                Arc::new(MemoryDatabase::new(SINK_URL))
            }
        };
        let config = configure(config);

        let targets = vec![Arc::new(MemoryTarget::new("primary")), Arc::new(MemoryTarget::new("replica"))];
        let (skimmer, events) = Self::build(&config, &source, &sink, &targets);

        Self {
            source,
            sink,
            skimmer,
            targets,
            config,
            events,
            _temp_dir: temp_dir,
        }
    }

    fn build(
        config: &SkimConfig,
        source: &Arc<MemoryDatabase>,
        sink: &Arc<MemoryDatabase>,
        targets: &[Arc<MemoryTarget>],
    ) -> (Skimmer, UnboundedReceiver<SkimEvent>) {
        let source_db: Arc<dyn CouchDatabase> = Arc::<MemoryDatabase>::clone(source);
        let endpoints = if Arc::ptr_eq(source, sink) {
            Endpoints::Shared(source_db)
        } else {
            let sink_db: Arc<dyn CouchDatabase> = Arc::<MemoryDatabase>::clone(sink);
            Endpoints::Split {
                source: source_db,
                sink: sink_db,
            }
        };
        let multi = MultiTarget::new(
            targets
                .iter()
                .map(|t| Arc::clone(t) as Arc<dyn StorageTarget>)
                .collect(),
        );
        let skimmer = Skimmer::new(config, endpoints, multi).expect("Failed to create skimmer");
        let events = skimmer.subscribe();
        (skimmer, events)
    }

    /// Storage target `index` (0 or 1).
    pub fn target(&self, index: usize) -> &Arc<MemoryTarget> {
        &self.targets[index]
    }

    /// All storage targets.
    pub fn targets(&self) -> &[Arc<MemoryTarget>] {
        &self.targets
    }

    /// The configuration the skimmer was built from.
    pub fn config(&self) -> &SkimConfig {
        &self.config
    }

    /// The checkpoint file.
    pub fn sequence_file(&self) -> PathBuf {
        self.config.sequence_file.clone()
    }

    /// Reads the checkpoint file, `None` if it does not exist.
    pub fn persisted_sequence(&self) -> Option<Sequence> {
        let content = std::fs::read_to_string(self.sequence_file()).ok()?;
        Some(content.parse().expect("Checkpoint file is not a sequence"))
    }

    /// Handles a single change.
    pub async fn process(&self, change: &ChangeEvent) -> SkimResult<ChangeOutcome> {
        self.skimmer.process(change).await
    }

    /// Follows the source feed until it has nothing more to deliver.
    pub async fn run_to_quiescence(&self) -> SkimResult<SkimStats> {
        let changes = MemoryChanges::new(Arc::clone(&self.source));
        let mut feed = FeedCoordinator::new(changes, self.config.inactivity);
        self.skimmer.run(&mut feed, std::future::pending()).await
    }

    /// Event lines emitted since the last drain, e.g. `send foo/doc.json`.
    pub fn drain_events(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            lines.push(event.to_string());
        }
        lines
    }

    /// Replaces the skimmer with a fresh one over the same databases,
    /// targets and checkpoint file, as a process restart would.
    pub fn restart(&mut self) {
        let (skimmer, events) = Self::build(&self.config, &self.source, &self.sink, &self.targets);
        self.skimmer = skimmer;
        self.events = events;
    }

    /// Parses `{id}/doc.json` from target `index`.
    pub fn mirrored_document(&self, index: usize, id: &str) -> Option<Document> {
        let bytes = self.targets[index].get(&format!("{id}/doc.json"))?;
        Some(Document::from_slice(&bytes).expect("Mirrored doc.json is not a document"))
    }
}

impl std::fmt::Debug for Harness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Harness")
            .field("skimmer", &self.skimmer)
            .field("sequence_file", &self.config.sequence_file)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::publish_package;

    #[tokio::test]
    async fn shared_and_split_wiring() {
        let shared = Harness::shared();
        assert!(Arc::ptr_eq(&shared.source, &shared.sink));
        assert!(shared.skimmer.endpoints().is_shared());

        let split = Harness::split();
        assert!(!Arc::ptr_eq(&split.source, &split.sink));
        assert_eq!(split.config().sink_url.as_deref(), Some(SINK_URL));
    }

    #[tokio::test]
    async fn restart_keeps_checkpoint() {
        let mut harness = Harness::shared();
        publish_package(&harness.source, "foo", &["1.0.0"]);
        harness.run_to_quiescence().await.unwrap();
        let persisted = harness.persisted_sequence();
        assert!(persisted.is_some());

        harness.restart();
        assert!(harness.drain_events().is_empty());
        assert_eq!(harness.skimmer.resume_point().await.unwrap(), persisted.unwrap());
    }
}
