//! Document skimming.
//!
//! A transform policy turns a fetched registry document into the slim
//! document that is mirrored and written back:
//!
//! 1. attachments not referenced by a version tarball are dropped
//! 2. referenced tarballs without an attachment entry get a skip marker
//! 3. tarball URLs are pointed at the mirror registry, if one is configured
//! 4. per-version readmes are removed, leaving one capped top-level readme
//!
//! The policy is injected into the dispatcher, so alternative skimming rules
//! can be plugged in without touching the pipeline.

use crate::document::{AttachmentMeta, Document};
use std::collections::BTreeMap;
use url::Url;

/// Default cap on the top-level readme (2 MiB).
pub const DEFAULT_MAX_README_BYTES: usize = 2 * 1024 * 1024;

/// Result of applying a transform policy.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformOutcome {
    /// The skimmed document.
    pub document: Document,
    /// Whether the stored document differs from the skimmed one.
    ///
    /// Inserting skip markers alone does not count: a document that carries
    /// no attachments and is already rewritten and trimmed is unchanged.
    pub changed: bool,
}

/// A pluggable skimming policy.
pub trait TransformPolicy: Send + Sync {
    /// Restricts `_attachments` to version tarballs, inserting skip markers.
    fn filter_attachments(&self, doc: &mut Document);

    /// Rewrites tarball URLs.
    fn rewrite_urls(&self, doc: &mut Document);

    /// Removes version readmes and caps the top-level readme.
    fn trim_readmes(&self, doc: &mut Document);

    /// Applies all three steps in order.
    fn apply(&self, mut doc: Document) -> TransformOutcome {
        let had_attachments = doc.has_attachments();
        let versions = doc.versions.clone();
        let readme = doc.readme.clone();

        self.filter_attachments(&mut doc);
        self.rewrite_urls(&mut doc);
        self.trim_readmes(&mut doc);

        let changed = had_attachments || doc.versions != versions || doc.readme != readme;
        TransformOutcome {
            document: doc,
            changed,
        }
    }
}

/// The registry skimming policy.
#[derive(Debug, Clone)]
pub struct SkimPolicy {
    registry: Option<String>,
    max_readme_bytes: usize,
}

impl SkimPolicy {
    /// Creates a policy that keeps tarball URLs as they are.
    pub fn new() -> Self {
        Self {
            registry: None,
            max_readme_bytes: DEFAULT_MAX_README_BYTES,
        }
    }

    /// Rewrites tarball URLs to live under `registry`.
    pub fn with_registry(mut self, registry: impl Into<String>) -> Self {
        let registry: String = registry.into();
        self.registry = Some(registry.trim_end_matches('/').to_string());
        self
    }

    /// Sets the top-level readme cap.
    pub fn with_max_readme_bytes(mut self, max: usize) -> Self {
        self.max_readme_bytes = max;
        self
    }

    /// Returns the mirror registry base, if any.
    pub fn registry(&self) -> Option<&str> {
        self.registry.as_deref()
    }
}

impl Default for SkimPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl TransformPolicy for SkimPolicy {
    fn filter_attachments(&self, doc: &mut Document) {
        let keep = doc.tarball_names();
        let attachments = doc.attachments.get_or_insert_with(BTreeMap::new);

        attachments.retain(|name, _| keep.contains(name));
        for name in keep {
            attachments
                .entry(name)
                .or_insert_with(AttachmentMeta::skipped);
        }
    }

    fn rewrite_urls(&self, doc: &mut Document) {
        let Some(registry) = &self.registry else {
            return;
        };
        let package = doc.package_name().to_string();
        let Some(versions) = doc.versions.as_mut() else {
            return;
        };

        for info in versions.values_mut() {
            let Some(dist) = info.dist.as_mut() else {
                continue;
            };
            let Some(basename) = dist.tarball.as_deref().and_then(tarball_basename) else {
                continue;
            };
            dist.tarball = Some(format!("{registry}/{package}/-/{basename}"));
        }
    }

    fn trim_readmes(&self, doc: &mut Document) {
        if doc.readme.is_none() {
            let latest = doc.latest_version().map(str::to_string);
            doc.readme = latest
                .and_then(|v| doc.versions.as_ref()?.get(&v)?.readme.clone());
        }

        if let Some(versions) = doc.versions.as_mut() {
            for info in versions.values_mut() {
                info.readme = None;
            }
        }

        if let Some(readme) = doc.readme.as_mut() {
            truncate_at_char_boundary(readme, self.max_readme_bytes);
        }
    }
}

/// Returns the last path segment of a tarball URL.
///
/// Accepts absolute URLs and bare paths; query strings and fragments are
/// ignored.
pub fn tarball_basename(tarball: &str) -> Option<String> {
    let path = match Url::parse(tarball) {
        Ok(url) => url.path().to_string(),
        Err(_) => tarball
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
    };

    path.rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
}

fn truncate_at_char_boundary(s: &mut String, max: usize) {
    if s.len() <= max {
        return;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s.truncate(end);
}
