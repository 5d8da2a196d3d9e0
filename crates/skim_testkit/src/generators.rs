//! Property-based test generators using proptest.
//!
//! Generated documents mix what real registry documents contain: versions
//! whose tarballs may or may not be attached, attachments no version
//! references, readmes of any size and an optional `latest` tag.

use proptest::prelude::*;
use serde_json::json;
use skim_protocol::{AttachmentMeta, Document, VersionInfo};
use std::collections::BTreeMap;

/// Strategy for package names.
pub fn package_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9-]{0,12}").expect("Invalid regex")
}

/// Strategy for semver-ish version strings.
pub fn version_strategy() -> impl Strategy<Value = String> {
    (0u8..4, 0u8..10, 0u8..10).prop_map(|(major, minor, patch)| format!("{major}.{minor}.{patch}"))
}

/// Strategy for readme text, including multi-byte characters.
pub fn readme_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9 #\\n\u{e9}\u{4e2d}\u{1f600}]{0,256}").expect("Invalid regex")
}

/// Strategy for tarball URLs ending in `basename`.
pub fn tarball_url_strategy(basename: String) -> impl Strategy<Value = String> {
    prop_oneof![
        Just(format!("https://registry.npmjs.org/pkg/-/{basename}")),
        Just(format!("http://localhost:5984/registry/pkg/-/{basename}?cache=1")),
        Just(format!("/pkg/-/{basename}")),
    ]
}

#[derive(Debug, Clone)]
struct GeneratedVersion {
    version: String,
    attached: bool,
    readme: Option<String>,
    url_style: usize,
}

fn version_entry_strategy() -> impl Strategy<Value = GeneratedVersion> {
    (version_strategy(), any::<bool>(), prop::option::of(readme_strategy()), 0usize..3).prop_map(
        |(version, attached, readme, url_style)| GeneratedVersion {
            version,
            attached,
            readme,
            url_style,
        },
    )
}

fn tarball_url(style: usize, name: &str, basename: &str) -> String {
    match style {
        0 => format!("https://registry.npmjs.org/{name}/-/{basename}"),
        1 => format!("http://localhost:5984/registry/{name}/-/{basename}?cache=1"),
        _ => format!("/{name}/-/{basename}"),
    }
}

/// Strategy for complete registry documents, as fetched with attachment
/// metadata.
pub fn registry_document_strategy() -> impl Strategy<Value = Document> {
    (
        package_name_strategy(),
        prop::collection::vec(version_entry_strategy(), 0..5),
        prop::collection::vec(prop::string::string_regex("stray-[a-z]{1,6}\\.bin").expect("Invalid regex"), 0..3),
        prop::option::of(readme_strategy()),
        any::<bool>(),
    )
        .prop_map(|(name, versions, strays, readme, tag_latest)| {
            let mut doc = Document::new(name.clone());
            doc.name = Some(name.clone());
            doc.readme = readme;

            let mut infos = BTreeMap::new();
            let mut attachments = BTreeMap::new();
            for entry in &versions {
                let basename = format!("{name}-{}.tgz", entry.version);
                let mut info = VersionInfo::with_tarball(tarball_url(entry.url_style, &name, &basename));
                info.readme = entry.readme.clone();
                infos.insert(entry.version.clone(), info);
                if entry.attached {
                    attachments.insert(basename, AttachmentMeta::stub("application/octet-stream", 64));
                }
            }
            for stray in strays {
                attachments.insert(stray, AttachmentMeta::stub("application/octet-stream", 8));
            }

            if tag_latest {
                if let Some(last) = versions.last() {
                    doc.extra
                        .insert("dist-tags".into(), json!({ "latest": last.version }));
                }
            }
            if !infos.is_empty() {
                doc.versions = Some(infos);
            }
            if !attachments.is_empty() {
                doc.attachments = Some(attachments);
            }
            doc
        })
}
