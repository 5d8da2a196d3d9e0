//! Registry document fixtures.
//!
//! Documents are shaped like the ones a public registry stores: one
//! tarball per version under `dist.tarball`, a `dist-tags.latest` pointer,
//! and a readme on every version.

use bytes::Bytes;
use serde_json::json;
use skim_engine::MemoryDatabase;
use skim_protocol::{Document, VersionInfo};

/// Upstream registry the fixture tarball URLs point at.
pub const UPSTREAM_REGISTRY: &str = "https://registry.npmjs.org";

/// Tarball filename of `name@version`.
pub fn tarball_name(name: &str, version: &str) -> String {
    format!("{name}-{version}.tgz")
}

/// Deterministic tarball content for `name@version`.
pub fn tarball_bytes(name: &str, version: &str) -> Bytes {
    Bytes::from(format!("tarball of {name}@{version}"))
}

/// A package document with the given versions, the last one tagged latest.
pub fn package_document(name: &str, versions: &[&str]) -> Document {
    let mut doc = Document::new(name);
    doc.name = Some(name.to_string());
    doc.versions = Some(
        versions
            .iter()
            .map(|version| {
                let mut info = VersionInfo::with_tarball(format!(
                    "{UPSTREAM_REGISTRY}/{name}/-/{}",
                    tarball_name(name, version)
                ));
                info.readme = Some(format!("# {name}\n\nVersion {version}.\n"));
                (version.to_string(), info)
            })
            .collect(),
    );
    if let Some(latest) = versions.last() {
        doc.extra
            .insert("dist-tags".into(), json!({ "latest": latest }));
    }
    doc
}

/// Publishes `name` with a tarball attachment for every version.
///
/// Returns the new revision.
pub fn publish_package(db: &MemoryDatabase, name: &str, versions: &[&str]) -> String {
    let attachments = versions
        .iter()
        .map(|version| (tarball_name(name, version), tarball_bytes(name, version)))
        .collect();
    db.publish(package_document(name, versions), attachments)
}

/// Publishes `name` with its tarballs and an attachment no version
/// references.
pub fn publish_with_stray(db: &MemoryDatabase, name: &str, versions: &[&str], stray: &str) -> String {
    let mut attachments: Vec<(String, Bytes)> = versions
        .iter()
        .map(|version| (tarball_name(name, version), tarball_bytes(name, version)))
        .collect();
    attachments.push((stray.to_string(), Bytes::from_static(b"stray")));
    db.publish(package_document(name, versions), attachments)
}

/// Publishes `name` without any attachments, as a registry does once the
/// tarballs live elsewhere.
pub fn publish_metadata_only(db: &MemoryDatabase, name: &str, versions: &[&str]) -> String {
    db.publish(package_document(name, versions), Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixture_references_its_tarballs() {
        let doc = package_document("foo", &["1.0.0", "1.1.0"]);
        assert_eq!(doc.latest_version(), Some("1.1.0"));
        let names: Vec<String> = doc.tarball_names().into_iter().collect();
        assert_eq!(names, vec!["foo-1.0.0.tgz", "foo-1.1.0.tgz"]);
    }

    #[test]
    fn publish_stores_tarballs() {
        let db = MemoryDatabase::new("mem://registry");
        let rev = publish_with_stray(&db, "foo", &["1.0.0"], "notes.txt");
        assert!(rev.starts_with("1-"));
        assert_eq!(db.attachment_names("foo"), vec!["foo-1.0.0.tgz", "notes.txt"]);
    }
}
