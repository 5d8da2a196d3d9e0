//! Properties of the skimming transform over generated registry documents.

use proptest::prelude::*;
use skim_protocol::{plan_artifacts, SkimPolicy, TransformPolicy, DOC_JSON};
use skim_testkit::generators::registry_document_strategy;

fn policy() -> SkimPolicy {
    SkimPolicy::new()
        .with_registry("http://mirror.example.com/")
        .with_max_readme_bytes(64)
}

proptest! {
    #[test]
    fn attachments_are_exactly_the_version_tarballs(doc in registry_document_strategy()) {
        let expected = doc.tarball_names();
        let skimmed = policy().apply(doc.clone()).document;

        let names: Vec<String> = skimmed.attachments.clone().unwrap_or_default().into_keys().collect();
        prop_assert_eq!(names, expected.into_iter().collect::<Vec<_>>());

        // tarballs that were not attached become skip markers, the rest keep
        // their metadata
        for (name, meta) in skimmed.attachments.unwrap_or_default() {
            let original = doc.attachments.as_ref().and_then(|a| a.get(&name));
            prop_assert_eq!(meta.skip, original.is_none());
        }
    }

    #[test]
    fn skimming_is_idempotent(doc in registry_document_strategy()) {
        let once = policy().apply(doc).document;
        let twice = policy().apply(once.clone()).document;
        prop_assert_eq!(&twice, &once);

        // what a putback stores is left alone on the next pass
        let mut stored = once;
        stored.attachments = None;
        prop_assert!(!policy().apply(stored).changed);
    }

    #[test]
    fn readme_is_a_capped_prefix(doc in registry_document_strategy()) {
        let source = doc.readme.clone().or_else(|| {
            let latest = doc.latest_version()?;
            doc.versions.as_ref()?.get(latest)?.readme.clone()
        });
        let skimmed = policy().apply(doc).document;

        if let Some(versions) = &skimmed.versions {
            prop_assert!(versions.values().all(|v| v.readme.is_none()));
        }
        match (source, skimmed.readme) {
            (Some(source), Some(readme)) => {
                prop_assert!(readme.len() <= 64);
                prop_assert!(source.starts_with(&readme));
                prop_assert!(source.len() <= 64 || readme.len() > 60);
            }
            (None, None) => {}
            (source, readme) => {
                prop_assert!(false, "readme {:?} from {:?}", readme, source);
            }
        }
    }

    #[test]
    fn tarballs_point_at_the_mirror(doc in registry_document_strategy()) {
        let name = doc.package_name().to_string();
        let skimmed = policy().apply(doc).document;
        for info in skimmed.versions.unwrap_or_default().values() {
            let tarball = info.tarball().unwrap();
            let prefix = format!("http://mirror.example.com/{name}/-/");
            prop_assert!(tarball.starts_with(&prefix), "{}", tarball);
        }
    }

    #[test]
    fn artifacts_lead_with_the_document(doc in registry_document_strategy()) {
        let skimmed = policy().apply(doc).document;
        let artifacts = plan_artifacts(&skimmed);
        let first = format!("{}/{DOC_JSON}", skimmed.package_name());
        prop_assert_eq!(&artifacts[0].path, &first);
        prop_assert_eq!(artifacts.len(), 1 + skimmed.pending_attachments().count());
    }
}
