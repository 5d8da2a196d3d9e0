//! In-memory database for testing.
//!
//! [`MemoryDatabase`] models the parts of CouchDB the skimmer depends on:
//! revision generations, conflicting leaves created by replication,
//! attachment stubs, a change log, and the fact that a document written
//! without `_attachments` loses them. [`MemoryChanges`] follows its change
//! log as a [`ChangeSource`].

use crate::database::{CouchDatabase, FetchOptions, WriteMode};
use crate::error::{SkimError, SkimResult};
use crate::feed::ChangeSource;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use serde_json::json;
use skim_protocol::{AttachmentMeta, ChangeEvent, Document, Sequence};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
struct Leaf {
    rev: String,
    /// Revision ids of this leaf and its ancestors, newest first.
    history: Vec<String>,
    body: Document,
}

impl Leaf {
    fn generation(&self) -> u64 {
        rev_generation(&self.rev)
    }
}

#[derive(Debug, Default)]
struct Stored {
    leaves: Vec<Leaf>,
    attachments: BTreeMap<String, (AttachmentMeta, Bytes)>,
}

impl Stored {
    /// CouchDB picks the leaf with the highest generation, then the highest
    /// revision string.
    fn winner(&self) -> Option<&Leaf> {
        self.leaves
            .iter()
            .max_by(|a, b| (a.generation(), &a.rev).cmp(&(b.generation(), &b.rev)))
    }
}

#[derive(Debug, Default)]
struct Inner {
    salt: u64,
    docs: BTreeMap<String, Stored>,
    log: Vec<ChangeEvent>,
    seq: u64,
    rev_counter: u64,
    inject_conflicts: usize,
    failing_fetches: HashSet<String>,
}

impl Inner {
    fn next_rev(&mut self, generation: u64) -> String {
        self.rev_counter += 1;
        format!("{generation}-{:016x}{:016x}", self.salt, self.rev_counter)
    }

    fn record(&mut self, id: &str, deleted: bool) {
        self.seq += 1;
        let change = if deleted {
            ChangeEvent::deletion(self.seq, id)
        } else {
            ChangeEvent::update(self.seq, id)
        };
        self.log.push(change);
    }
}

/// Request counts, for asserting what the pipeline asked for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestCounts {
    /// Document GETs.
    pub documents: usize,
    /// Attachment GETs.
    pub attachments: usize,
    /// HEADs.
    pub heads: usize,
    /// PUTs.
    pub puts: usize,
    /// DELETEs.
    pub deletes: usize,
}

#[derive(Debug, Default)]
struct Counters {
    documents: AtomicUsize,
    attachments: AtomicUsize,
    heads: AtomicUsize,
    puts: AtomicUsize,
    deletes: AtomicUsize,
}

/// An in-memory CouchDB stand-in.
#[derive(Debug)]
pub struct MemoryDatabase {
    url: String,
    inner: RwLock<Inner>,
    counters: Counters,
    attachment_requests: RwLock<Vec<String>>,
}

fn rev_generation(rev: &str) -> u64 {
    rev.split_once('-')
        .and_then(|(generation, _)| generation.parse().ok())
        .unwrap_or(0)
}

fn rev_hash(rev: &str) -> &str {
    rev.split_once('-').map_or(rev, |(_, hash)| hash)
}

/// Expands `{"start": N, "ids": [...]}` into full revision strings.
fn revision_history(doc: &Document) -> Option<Vec<String>> {
    let revisions = doc.revisions.as_ref()?;
    let start = revisions.get("start")?.as_u64()?;
    let ids = revisions.get("ids")?.as_array()?;
    ids.iter()
        .enumerate()
        .map(|(i, id)| Some(format!("{}-{}", start.checked_sub(i as u64)?, id.as_str()?)))
        .collect()
}

impl MemoryDatabase {
    /// Creates an empty database.
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        let mut hasher = DefaultHasher::new();
        url.hash(&mut hasher);
        Self {
            inner: RwLock::new(Inner {
                salt: hasher.finish(),
                ..Inner::default()
            }),
            url,
            counters: Counters::default(),
            attachment_requests: RwLock::new(Vec::new()),
        }
    }

    /// Writes `doc` as a new edit on top of the current winner, storing
    /// `attachments` with it, as a registry publish would.
    pub fn publish(&self, mut doc: Document, attachments: Vec<(String, Bytes)>) -> String {
        let mut inner = self.inner.write();
        let stored = inner.docs.remove(&doc.id).unwrap_or_default();
        let parent = stored.winner().cloned();
        let generation = parent.as_ref().map_or(0, Leaf::generation) + 1;
        let rev = inner.next_rev(generation);

        let mut history = vec![rev.clone()];
        if let Some(parent) = &parent {
            history.extend(parent.history.iter().cloned());
        }

        let mut kept = stored.attachments;
        for (name, data) in attachments {
            let mut meta = AttachmentMeta::stub("application/octet-stream", data.len() as u64);
            meta.revpos = Some(generation);
            kept.insert(name, (meta, data));
        }

        doc.rev = None;
        doc.revisions = None;
        doc.attachments = None;
        let mut leaves: Vec<Leaf> = stored
            .leaves
            .into_iter()
            .filter(|leaf| Some(&leaf.rev) != parent.as_ref().map(|p| &p.rev))
            .collect();
        leaves.push(Leaf {
            rev: rev.clone(),
            history,
            body: doc.clone(),
        });
        inner.docs.insert(
            doc.id.clone(),
            Stored {
                leaves,
                attachments: kept,
            },
        );
        inner.record(&doc.id, false);
        rev
    }

    /// Deletes a document entirely, as an unpublish would.
    pub fn remove(&self, id: &str) {
        let mut inner = self.inner.write();
        if inner.docs.remove(id).is_some() {
            inner.record(id, true);
        }
    }

    /// Makes the next `count` document writes fail with a conflict.
    pub fn inject_conflicts(&self, count: usize) {
        self.inner.write().inject_conflicts = count;
    }

    /// Makes document fetches of `id` fail with a server error.
    pub fn fail_fetches(&self, id: impl Into<String>) {
        self.inner.write().failing_fetches.insert(id.into());
    }

    /// Revisions of every leaf of `id`, sorted.
    pub fn leaf_revisions(&self, id: &str) -> Vec<String> {
        let inner = self.inner.read();
        let mut revs: Vec<String> = inner
            .docs
            .get(id)
            .map(|stored| stored.leaves.iter().map(|l| l.rev.clone()).collect())
            .unwrap_or_default();
        revs.sort();
        revs
    }

    /// The winning revision of `id`, as a client would see it.
    pub fn peek(&self, id: &str) -> Option<Document> {
        let inner = self.inner.read();
        Self::render(inner.docs.get(id)?, FetchOptions::package())
    }

    /// Stored attachment names of `id`.
    pub fn attachment_names(&self, id: &str) -> Vec<String> {
        let inner = self.inner.read();
        inner
            .docs
            .get(id)
            .map(|stored| stored.attachments.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Latest sequence in the change log.
    pub fn update_seq(&self) -> Sequence {
        Sequence(self.inner.read().seq)
    }

    /// Changes after `since`, one per document (its latest), in order.
    pub fn changes_since(&self, since: Sequence) -> Vec<ChangeEvent> {
        let inner = self.inner.read();
        let mut latest: BTreeMap<&str, &ChangeEvent> = BTreeMap::new();
        for change in inner.log.iter().filter(|c| c.sequence > since) {
            latest.insert(change.id.as_str(), change);
        }
        let mut changes: Vec<ChangeEvent> = latest.into_values().cloned().collect();
        changes.sort_by_key(|c| c.sequence);
        changes
    }

    /// Request counts so far.
    pub fn requests(&self) -> RequestCounts {
        RequestCounts {
            documents: self.counters.documents.load(Ordering::SeqCst),
            attachments: self.counters.attachments.load(Ordering::SeqCst),
            heads: self.counters.heads.load(Ordering::SeqCst),
            puts: self.counters.puts.load(Ordering::SeqCst),
            deletes: self.counters.deletes.load(Ordering::SeqCst),
        }
    }

    /// Every attachment fetched, as `id/filename`.
    pub fn attachment_requests(&self) -> Vec<String> {
        self.attachment_requests.read().clone()
    }

    fn render(stored: &Stored, options: FetchOptions) -> Option<Document> {
        let leaf = stored.winner()?;
        let mut doc = leaf.body.clone();
        doc.rev = Some(leaf.rev.clone());

        if options.revs {
            let ids: Vec<&str> = leaf.history.iter().map(|r| rev_hash(r)).collect();
            doc.revisions = Some(json!({ "start": leaf.generation(), "ids": ids }));
        }
        if !stored.attachments.is_empty() {
            doc.attachments = Some(
                stored
                    .attachments
                    .iter()
                    .map(|(name, (meta, _))| (name.clone(), meta.clone()))
                    .collect(),
            );
        }
        Some(doc)
    }

    fn new_edit(inner: &mut Inner, doc: &Document) -> SkimResult<String> {
        let current = inner.docs.get(&doc.id).and_then(Stored::winner).cloned();
        let parent = match (&current, &doc.rev) {
            (None, None) => None,
            (Some(winner), Some(rev)) if &winner.rev == rev => Some(winner.clone()),
            _ => return Err(SkimError::Conflict { id: doc.id.clone() }),
        };

        let generation = parent.as_ref().map_or(0, Leaf::generation) + 1;
        let rev = inner.next_rev(generation);
        let mut history = vec![rev.clone()];
        if let Some(parent) = &parent {
            history.extend(parent.history.iter().cloned());
        }

        let stored = inner.docs.entry(doc.id.clone()).or_default();
        if let Some(parent) = &parent {
            stored.leaves.retain(|leaf| leaf.rev != parent.rev);
        }
        // attachments not listed in the written document are dropped
        let listed = doc.attachments.clone().unwrap_or_default();
        stored.attachments.retain(|name, _| listed.contains_key(name));

        let mut body = doc.clone();
        body.rev = None;
        body.revisions = None;
        body.attachments = None;
        stored.leaves.push(Leaf {
            rev: rev.clone(),
            history,
            body,
        });
        inner.record(&doc.id, false);
        Ok(rev)
    }

    fn replicate(inner: &mut Inner, doc: &Document) -> SkimResult<String> {
        let rev = doc
            .rev
            .clone()
            .ok_or_else(|| SkimError::BadResponse(format!("{}: replicated write without _rev", doc.id)))?;
        let history = revision_history(doc).unwrap_or_else(|| vec![rev.clone()]);

        let stored = inner.docs.entry(doc.id.clone()).or_default();
        let known = stored
            .leaves
            .iter()
            .any(|leaf| leaf.rev == rev || leaf.history.contains(&rev));
        if known {
            return Ok(rev);
        }

        // the new revision replaces a leaf it descends from, otherwise it
        // becomes a conflicting leaf
        stored.leaves.retain(|leaf| !history.contains(&leaf.rev));

        let mut body = doc.clone();
        body.rev = None;
        body.revisions = None;
        body.attachments = None;
        stored.leaves.push(Leaf {
            rev: rev.clone(),
            history,
            body,
        });
        inner.record(&doc.id, false);
        Ok(rev)
    }
}

#[async_trait]
impl CouchDatabase for MemoryDatabase {
    fn url(&self) -> &str {
        &self.url
    }

    async fn get_document(&self, id: &str, options: FetchOptions) -> SkimResult<Option<Document>> {
        self.counters.documents.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.read();
        if inner.failing_fetches.contains(id) {
            return Err(SkimError::Http {
                method: "GET".into(),
                url: format!("{}/{id}", self.url),
                status: 500,
            });
        }
        Ok(inner.docs.get(id).and_then(|stored| Self::render(stored, options)))
    }

    async fn get_attachment(&self, id: &str, filename: &str) -> SkimResult<Bytes> {
        self.counters.attachments.fetch_add(1, Ordering::SeqCst);
        self.attachment_requests.write().push(format!("{id}/{filename}"));
        let inner = self.inner.read();
        inner
            .docs
            .get(id)
            .and_then(|stored| stored.attachments.get(filename))
            .map(|(_, data)| data.clone())
            .ok_or_else(|| SkimError::NotFound(format!("{id}/{filename}")))
    }

    async fn head_revision(&self, id: &str) -> SkimResult<Option<String>> {
        self.counters.heads.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.read();
        Ok(inner
            .docs
            .get(id)
            .and_then(Stored::winner)
            .map(|leaf| leaf.rev.clone()))
    }

    async fn put_document(&self, doc: &Document, mode: WriteMode) -> SkimResult<String> {
        self.counters.puts.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.write();
        if inner.inject_conflicts > 0 {
            inner.inject_conflicts -= 1;
            return Err(SkimError::Conflict { id: doc.id.clone() });
        }
        match mode {
            WriteMode::NewEdit => Self::new_edit(&mut inner, doc),
            WriteMode::Replicate => Self::replicate(&mut inner, doc),
        }
    }

    async fn delete_revision(&self, id: &str, rev: &str) -> SkimResult<bool> {
        self.counters.deletes.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.write();
        let Some(stored) = inner.docs.get_mut(id) else {
            return Ok(false);
        };
        let before = stored.leaves.len();
        stored.leaves.retain(|leaf| leaf.rev != rev);
        if stored.leaves.len() == before {
            return Err(SkimError::Conflict { id: id.to_string() });
        }

        let gone = stored.leaves.is_empty();
        if gone {
            inner.docs.remove(id);
        }
        inner.record(id, gone);
        Ok(true)
    }
}

/// Follows a [`MemoryDatabase`] change log.
///
/// The stream ends once the log has nothing after the last delivered
/// sequence, so a run over it terminates when the database is quiescent.
#[derive(Debug)]
pub struct MemoryChanges {
    db: Arc<MemoryDatabase>,
    since: Sequence,
    buffer: VecDeque<ChangeEvent>,
}

impl MemoryChanges {
    /// Creates a follower for `db`.
    pub fn new(db: Arc<MemoryDatabase>) -> Self {
        Self {
            db,
            since: Sequence::ZERO,
            buffer: VecDeque::new(),
        }
    }
}

#[async_trait]
impl ChangeSource for MemoryChanges {
    async fn connect(&mut self, since: Sequence) -> SkimResult<()> {
        self.since = since;
        self.buffer.clear();
        Ok(())
    }

    async fn next_change(&mut self) -> Option<SkimResult<ChangeEvent>> {
        if self.buffer.is_empty() {
            self.buffer.extend(self.db.changes_since(self.since));
        }
        let change = self.buffer.pop_front()?;
        self.since = change.sequence;
        Some(Ok(change))
    }

    async fn disconnect(&mut self) -> SkimResult<()> {
        self.buffer.clear();
        Ok(())
    }
}
