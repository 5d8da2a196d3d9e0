//! Configuration for the skimmer.

use crate::content::TransferPolicy;
use crate::error::{SkimError, SkimResult};
use skim_protocol::{Sequence, DEFAULT_MAX_README_BYTES};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Configuration for one skimmer process.
#[derive(Debug, Clone)]
pub struct SkimConfig {
    /// Database the change feed is read from.
    pub source_url: String,
    /// Database the skimmed documents are written to. `None` means the
    /// source itself.
    pub sink_url: Option<String>,
    /// Mirror registry base for tarball URL rewriting.
    pub registry_url: Option<String>,
    /// Checkpoint file.
    pub sequence_file: PathBuf,
    /// Overrides the checkpoint for this run.
    pub start_sequence: Option<Sequence>,
    /// Feed inactivity before reconnecting.
    pub inactivity: Duration,
    /// Remove mirrored files when a document is deleted.
    pub propagate_deletions: bool,
    /// Whether artifacts already present on a target are rewritten.
    pub transfer_policy: TransferPolicy,
    /// Bound on a single artifact transfer.
    pub artifact_timeout: Duration,
    /// Bound on a single database request.
    pub request_timeout: Duration,
    /// Bound on the conflict purge loop.
    pub max_purge_rounds: u32,
    /// Top-level readme cap.
    pub max_readme_bytes: usize,
    /// Fail the change instead of completing it when an artifact could not
    /// be delivered.
    pub require_complete_transfer: bool,
}

impl SkimConfig {
    /// Creates a configuration that skims `source_url` in place.
    pub fn new(source_url: impl Into<String>, sequence_file: impl Into<PathBuf>) -> Self {
        Self {
            source_url: source_url.into(),
            sink_url: None,
            registry_url: None,
            sequence_file: sequence_file.into(),
            start_sequence: None,
            inactivity: Duration::from_secs(60),
            propagate_deletions: false,
            transfer_policy: TransferPolicy::AlwaysWrite,
            artifact_timeout: Duration::from_secs(5 * 60),
            request_timeout: Duration::from_secs(30),
            max_purge_rounds: 1000,
            max_readme_bytes: DEFAULT_MAX_README_BYTES,
            require_complete_transfer: false,
        }
    }

    /// Writes skimmed documents to a separate database.
    pub fn with_sink(mut self, sink_url: impl Into<String>) -> Self {
        self.sink_url = Some(sink_url.into());
        self
    }

    /// Sets the mirror registry base.
    pub fn with_registry(mut self, registry_url: impl Into<String>) -> Self {
        self.registry_url = Some(registry_url.into());
        self
    }

    /// Sets the feed inactivity timeout.
    pub fn with_inactivity(mut self, inactivity: Duration) -> Self {
        self.inactivity = inactivity;
        self
    }

    /// Enables or disables deletion propagation.
    pub fn with_propagate_deletions(mut self, propagate: bool) -> Self {
        self.propagate_deletions = propagate;
        self
    }

    /// Sets the transfer policy.
    pub fn with_transfer_policy(mut self, policy: TransferPolicy) -> Self {
        self.transfer_policy = policy;
        self
    }

    /// Sets the per-artifact timeout.
    pub fn with_artifact_timeout(mut self, timeout: Duration) -> Self {
        self.artifact_timeout = timeout;
        self
    }

    /// Sets the per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the purge loop bound.
    pub fn with_max_purge_rounds(mut self, rounds: u32) -> Self {
        self.max_purge_rounds = rounds;
        self
    }

    /// Starts from `sequence` regardless of the checkpoint file.
    pub fn with_start_sequence(mut self, sequence: impl Into<Sequence>) -> Self {
        self.start_sequence = Some(sequence.into());
        self
    }

    /// Sets the readme cap.
    pub fn with_max_readme_bytes(mut self, max: usize) -> Self {
        self.max_readme_bytes = max;
        self
    }

    /// Fails changes with undelivered artifacts.
    pub fn with_require_complete_transfer(mut self, require: bool) -> Self {
        self.require_complete_transfer = require;
        self
    }

    /// Checks the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SkimError::InvalidConfig`] for non-http(s) URLs, an empty
    /// checkpoint path, or zero bounds.
    pub fn validate(&self) -> SkimResult<()> {
        check_url("source", &self.source_url)?;
        if let Some(sink) = &self.sink_url {
            check_url("sink", sink)?;
        }
        if let Some(registry) = &self.registry_url {
            check_url("registry", registry)?;
        }
        if self.sequence_file.as_os_str().is_empty() {
            return Err(SkimError::InvalidConfig("sequence file is required".into()));
        }
        if self.max_purge_rounds == 0 {
            return Err(SkimError::InvalidConfig("max_purge_rounds must be positive".into()));
        }
        if self.inactivity.is_zero() || self.artifact_timeout.is_zero() {
            return Err(SkimError::InvalidConfig("timeouts must be positive".into()));
        }
        Ok(())
    }

    /// Returns true if documents are written back to the source database.
    pub fn is_shared(&self) -> bool {
        match &self.sink_url {
            None => true,
            Some(sink) => normalize_url(sink) == normalize_url(&self.source_url),
        }
    }
}

/// Canonical form of a database URL.
///
/// Parsing lowercases the scheme and host and drops a default port; trailing
/// slashes are then stripped. Unparseable input is only trimmed.
pub(crate) fn normalize_url(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => parsed.as_str().trim_end_matches('/').to_string(),
        Err(_) => url.trim_end_matches('/').to_string(),
    }
}

fn check_url(what: &str, value: &str) -> SkimResult<()> {
    let url = Url::parse(value)
        .map_err(|e| SkimError::InvalidConfig(format!("{what} url {value:?}: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(SkimError::InvalidConfig(format!(
            "{what} url {value:?}: unsupported scheme {scheme}"
        ))),
    }
}
