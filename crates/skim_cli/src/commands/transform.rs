//! Transform command implementation.

use serde::Serialize;
use skim_protocol::{plan_artifacts, Artifact, Document, SkimPolicy, TransformPolicy};
use std::path::Path;

/// What skimming a document produced.
#[derive(Debug, Serialize)]
pub struct TransformReport {
    /// Whether a putback would be needed.
    pub changed: bool,
    /// The skimmed document.
    pub document: Document,
    /// Artifacts that would be delivered, in order.
    pub artifacts: Vec<Artifact>,
}

/// Skims `bytes` with the given registry and readme cap.
pub fn skim(
    bytes: &[u8],
    registry: Option<&str>,
    max_readme_bytes: Option<usize>,
) -> Result<TransformReport, Box<dyn std::error::Error>> {
    let doc = Document::from_slice(bytes)?;

    let mut policy = SkimPolicy::new();
    if let Some(registry) = registry {
        policy = policy.with_registry(registry);
    }
    if let Some(max) = max_readme_bytes {
        policy = policy.with_max_readme_bytes(max);
    }

    let outcome = policy.apply(doc);
    let artifacts = plan_artifacts(&outcome.document);
    Ok(TransformReport {
        changed: outcome.changed,
        document: outcome.document,
        artifacts,
    })
}

/// Runs the transform command.
pub fn run(
    path: &Path,
    registry: Option<&str>,
    max_readme_bytes: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = std::fs::read(path).map_err(|e| format!("{}: {e}", path.display()))?;
    let report = skim(&bytes, registry, max_readme_bytes)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
