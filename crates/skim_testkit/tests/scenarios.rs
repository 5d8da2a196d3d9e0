//! End-to-end skimming scenarios over in-memory databases.

use skim_engine::{ChangeOutcome, SkimError};
use skim_protocol::{ChangeEvent, Document, Sequence};
use skim_testkit::prelude::*;

#[tokio::test]
async fn first_sync_mirrors_and_second_sync_is_quiet() {
    let mut harness = Harness::shared();
    publish_package(&harness.source, "foo", &["1.0.0"]);

    harness.run_to_quiescence().await.unwrap();

    assert_eq!(
        harness.drain_events(),
        vec![
            "put foo",
            "attachment foo/foo-1.0.0.tgz",
            "send foo/doc.json",
            "send foo/_attachments/foo-1.0.0.tgz",
            "complete foo @1",
            // the putback is itself a change, and finds nothing left to do
            "put foo",
            "complete foo @2",
        ]
    );
    for target in harness.targets() {
        assert_eq!(
            target.get("foo/_attachments/foo-1.0.0.tgz").unwrap(),
            tarball_bytes("foo", "1.0.0")
        );
    }
    assert!(harness.source.attachment_names("foo").is_empty());
    assert_eq!(harness.source.requests().attachments, 1);
    assert_eq!(harness.persisted_sequence(), Some(Sequence(2)));
}

#[tokio::test]
async fn tarball_urls_point_at_mirror() {
    let harness = Harness::shared();
    publish_package(&harness.source, "foo", &["1.0.0"]);

    harness.run_to_quiescence().await.unwrap();

    let expected = format!("{MIRROR_REGISTRY}/foo/-/foo-1.0.0.tgz");
    let mirrored = harness.mirrored_document(0, "foo").unwrap();
    assert_eq!(mirrored.versions.unwrap()["1.0.0"].tarball(), Some(expected.as_str()));
    let stored = harness.source.peek("foo").unwrap();
    assert_eq!(stored.versions.unwrap()["1.0.0"].tarball(), Some(expected.as_str()));
}

#[tokio::test]
async fn readmes_are_promoted_and_capped() {
    let harness = Harness::new(Mode::Shared, |config| config.with_max_readme_bytes(8));
    publish_package(&harness.source, "foo", &["1.0.0", "2.0.0"]);

    harness.run_to_quiescence().await.unwrap();

    let stored = harness.source.peek("foo").unwrap();
    assert_eq!(stored.readme.as_deref(), Some("# foo\n\nV"));
    assert!(stored.versions.unwrap().values().all(|v| v.readme.is_none()));
}

#[tokio::test]
async fn stray_attachments_are_neither_mirrored_nor_kept() {
    let harness = Harness::shared();
    publish_with_stray(&harness.source, "foo", &["1.0.0"], "notes.txt");

    harness.run_to_quiescence().await.unwrap();

    assert_eq!(
        harness.target(0).paths(),
        vec!["foo/_attachments/foo-1.0.0.tgz", "foo/doc.json"]
    );
    assert_eq!(harness.source.attachment_requests(), vec!["foo/foo-1.0.0.tgz"]);
    assert!(harness.source.attachment_names("foo").is_empty());
}

#[tokio::test]
async fn skip_markers_are_never_fetched() {
    let mut harness = Harness::shared();
    publish_metadata_only(&harness.source, "foo", &["1.0.0"]);

    harness.run_to_quiescence().await.unwrap();

    assert_eq!(harness.source.requests().attachments, 0);
    assert_eq!(
        harness.drain_events(),
        vec!["put foo", "complete foo @1", "put foo", "complete foo @2"]
    );
    assert!(harness.target(0).is_empty());
}

#[tokio::test]
async fn new_version_transfers_only_its_tarball() {
    let harness = Harness::shared();
    publish_package(&harness.source, "foo", &["1.0.0"]);
    harness.run_to_quiescence().await.unwrap();

    let mut doc = harness.source.peek("foo").unwrap();
    let next = package_document("foo", &["1.1.0"]);
    doc.versions
        .as_mut()
        .unwrap()
        .extend(next.versions.unwrap());
    harness.source.publish(doc, vec![(tarball_name("foo", "1.1.0"), tarball_bytes("foo", "1.1.0"))]);
    harness.run_to_quiescence().await.unwrap();

    assert_eq!(
        harness.source.attachment_requests(),
        vec!["foo/foo-1.0.0.tgz", "foo/foo-1.1.0.tgz"]
    );
    assert!(harness.target(1).get("foo/_attachments/foo-1.1.0.tgz").is_some());
}

#[tokio::test]
async fn shared_putback_conflict_is_not_an_error() {
    let mut harness = Harness::shared();
    publish_package(&harness.source, "foo", &["1.0.0"]);
    harness.source.inject_conflicts(1);

    let outcome = harness.process(&ChangeEvent::update(1, "foo")).await.unwrap();

    assert!(matches!(outcome, ChangeOutcome::Completed { written_back: true, .. }));
    assert!(!harness.drain_events().iter().any(|e| e.starts_with("error")));
    assert_eq!(harness.skimmer.stats().conflicts_swallowed, 1);
    assert_eq!(harness.persisted_sequence(), Some(Sequence(1)));
}

#[tokio::test]
async fn split_mode_replicates_and_leaves_source_alone() {
    let harness = Harness::split();
    let rev = publish_package(&harness.source, "foo", &["1.0.0"]);

    harness.run_to_quiescence().await.unwrap();

    assert_eq!(harness.sink.leaf_revisions("foo"), vec![rev]);
    assert!(harness.sink.attachment_names("foo").is_empty());
    assert_eq!(harness.source.attachment_names("foo"), vec!["foo-1.0.0.tgz"]);
    assert_eq!(harness.source.requests().puts, 0);
}

#[tokio::test]
async fn split_deletion_purges_sink_and_targets() {
    let mut harness = Harness::new(Mode::Split, |config| config.with_propagate_deletions(true));
    publish_package(&harness.source, "foo", &["1.0.0"]);
    harness.run_to_quiescence().await.unwrap();

    // an edit made directly on the sink, then a newer upstream publish,
    // leave the sink with two conflicting leaves
    harness.sink.publish(Document::new("foo"), Vec::new());
    publish_package(&harness.source, "foo", &["1.0.0", "1.0.1"]);
    harness.run_to_quiescence().await.unwrap();
    assert_eq!(harness.sink.leaf_revisions("foo").len(), 2);
    harness.drain_events();

    harness.source.remove("foo");
    harness.run_to_quiescence().await.unwrap();

    assert_eq!(harness.drain_events(), vec!["rm foo", "delete foo"]);
    for target in harness.targets() {
        assert!(target.is_empty());
    }
    assert!(harness.sink.leaf_revisions("foo").is_empty());
    assert_eq!(harness.skimmer.stats().deletions, 1);
}

#[tokio::test]
async fn deletion_without_propagation_keeps_files() {
    let mut harness = Harness::shared();
    publish_package(&harness.source, "foo", &["1.0.0"]);
    harness.run_to_quiescence().await.unwrap();
    harness.drain_events();

    harness.source.remove("foo");
    harness.run_to_quiescence().await.unwrap();

    assert_eq!(harness.drain_events(), vec!["delete foo"]);
    assert!(harness.target(0).get("foo/doc.json").is_some());
}

#[tokio::test]
async fn design_documents_replicate_only_in_split_mode() {
    let split = Harness::split();
    let rev = split.source.publish(Document::new("_design/app"), Vec::new());
    split.run_to_quiescence().await.unwrap();
    assert_eq!(split.sink.leaf_revisions("_design/app"), vec![rev]);
    assert!(split.target(0).is_empty());

    let shared = Harness::shared();
    shared.source.publish(Document::new("_design/app"), Vec::new());
    let stats = shared.run_to_quiescence().await.unwrap();
    assert_eq!(stats.skipped_ids, 1);
    assert_eq!(shared.source.requests().documents, 0);
}

#[tokio::test]
async fn ids_that_need_escaping_are_skipped() {
    let harness = Harness::shared();

    let outcome = harness.process(&ChangeEvent::update(3, "@scope/pkg")).await.unwrap();

    assert_eq!(outcome, ChangeOutcome::Skipped);
    assert_eq!(harness.source.requests().documents, 0);
    assert_eq!(harness.persisted_sequence(), Some(Sequence(3)));
}

#[tokio::test]
async fn vanished_documents_advance_the_checkpoint() {
    let harness = Harness::shared();

    let outcome = harness.process(&ChangeEvent::update(5, "ghost")).await.unwrap();

    assert_eq!(outcome, ChangeOutcome::Vanished);
    assert_eq!(harness.persisted_sequence(), Some(Sequence(5)));
}

#[tokio::test]
async fn failed_artifact_does_not_stop_the_change() {
    let mut harness = Harness::shared();
    harness.target(1).fail_writes_matching(".tgz");
    publish_package(&harness.source, "foo", &["1.0.0"]);

    let stats = harness.run_to_quiescence().await.unwrap();

    let events = harness.drain_events();
    assert!(events.contains(&"complete foo @1".to_string()));
    assert!(events
        .iter()
        .any(|e| e.starts_with("error foo/_attachments/foo-1.0.0.tgz")));
    assert!(harness.target(0).get("foo/_attachments/foo-1.0.0.tgz").is_some());
    assert_eq!(stats.artifacts_failed, 1);
}

#[tokio::test]
async fn failed_artifact_can_hold_the_change() {
    let harness = Harness::new(Mode::Shared, |config| config.with_require_complete_transfer(true));
    harness.target(1).fail_writes_matching(".tgz");
    publish_package(&harness.source, "foo", &["1.0.0"]);

    let err = harness.run_to_quiescence().await.unwrap_err();

    assert!(matches!(err, SkimError::ChangeFailed { sequence: Sequence(1), .. }));
    assert_eq!(harness.source.attachment_names("foo"), vec!["foo-1.0.0.tgz"]);
    assert_eq!(harness.persisted_sequence(), None);
}

#[tokio::test]
async fn restart_resumes_after_checkpoint() {
    let mut harness = Harness::shared();
    publish_package(&harness.source, "foo", &["1.0.0"]);
    publish_package(&harness.source, "bar", &["1.0.0"]);
    harness.run_to_quiescence().await.unwrap();
    assert_eq!(harness.persisted_sequence(), Some(Sequence(4)));

    harness.restart();
    publish_package(&harness.source, "baz", &["1.0.0"]);
    let stats = harness.run_to_quiescence().await.unwrap();

    let events = harness.drain_events();
    assert!(events.iter().all(|e| !e.contains("foo") && !e.contains("bar")));
    assert!(events.contains(&"put baz".to_string()));
    assert_eq!(stats.changes_seen, 2);
    assert_eq!(harness.persisted_sequence(), Some(Sequence(6)));
}

#[tokio::test]
async fn replaying_a_completed_change_is_harmless() {
    let harness = Harness::shared();
    publish_package(&harness.source, "foo", &["1.0.0"]);
    harness.run_to_quiescence().await.unwrap();
    let before = harness.target(0).paths();

    let outcome = harness.process(&ChangeEvent::update(1, "foo")).await.unwrap();

    assert!(matches!(outcome, ChangeOutcome::Completed { written_back: false, .. }));
    assert_eq!(harness.target(0).paths(), before);
    assert_eq!(harness.source.requests().attachments, 1);
}

#[tokio::test]
async fn fetch_error_stops_the_run_before_checkpointing() {
    let mut harness = Harness::shared();
    publish_package(&harness.source, "bar", &["1.0.0"]);
    publish_package(&harness.source, "foo", &["1.0.0"]);
    harness.source.fail_fetches("foo");

    let err = harness.run_to_quiescence().await.unwrap_err();

    assert!(matches!(err, SkimError::ChangeFailed { sequence: Sequence(2), ref id, .. } if id == "foo"));
    assert_eq!(harness.persisted_sequence(), Some(Sequence(1)));
    assert!(harness.drain_events().iter().any(|e| e.starts_with("error foo")));
}

#[tokio::test]
async fn corrupt_checkpoint_is_fatal() {
    let harness = Harness::shared();
    std::fs::write(harness.sequence_file(), "not-a-number").unwrap();

    let err = harness.run_to_quiescence().await.unwrap_err();
    assert!(matches!(err, SkimError::CorruptCheckpoint { .. }));
}
