//! Push/pull synchronization
//!
//! A transfer is a multipart stream of stored object files. Versions travel
//! oldest first; each version part is followed by the trees and blobs that
//! changed relative to its predecessor, in depth-first tree order. Both sides
//! apply the same elision rules, so the receiver always knows which object
//! must come next.
//!
//! Pull stages everything in an [`OverlayStore`] and only promotes it (and
//! moves the branch) once the whole stream has been verified.

use crate::branch::Branches;
use crate::error::{Error, Result};
use crate::hash::ObjectHash;
use crate::multipart::{self, MultipartReader, MultipartWriter, Part};
use crate::object::{EntryKind, Parents, Tree, Version, decompress_blob};
use crate::store::{DiskStore, MAX_TREE_DEPTH, ObjectStore, OverlayStore};
use std::collections::HashSet;
use std::io::{Read, Write};
use std::time::Instant;

pub const VERSION_CONTENT_TYPE: &str = "application/x-gud-version";
pub const TREE_CONTENT_TYPE: &str = "application/x-gud-tree";
pub const BLOB_CONTENT_TYPE: &str = "application/x-gud-blob";

/// Statistics from a transfer operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferStats {
    pub versions: u64,
    pub trees: u64,
    pub blobs: u64,
    /// Body bytes on the wire.
    pub bytes: u64,
    /// Objects received that the destination already had.
    pub objects_skipped: u64,
    pub duration_ms: u64,
}

impl TransferStats {
    pub fn objects(&self) -> u64 {
        self.versions + self.trees + self.blobs
    }

    /// Format a human-readable summary.
    pub fn summary(&self) -> String {
        format!(
            "Transferred {} versions, {} trees, {} blobs ({} skipped), {} bytes in {}ms",
            self.versions,
            self.trees,
            self.blobs,
            self.objects_skipped,
            self.bytes,
            self.duration_ms,
        )
    }

    fn count(&mut self, content_type: &str, len: usize) {
        match content_type {
            VERSION_CONTENT_TYPE => self.versions += 1,
            TREE_CONTENT_TYPE => self.trees += 1,
            _ => self.blobs += 1,
        }
        self.bytes += len as u64;
    }
}

/// Result of a push
#[derive(Debug, Clone)]
pub struct Push {
    pub boundary: String,
    /// Content type to announce the stream with
    pub content_type: String,
    pub stats: TransferStats,
}

/// Result of a pull
#[derive(Debug, Clone)]
pub struct PullOutcome {
    /// Branch tip after the pull; `None` when nothing was received into a
    /// branch that does not exist yet
    pub tip: Option<ObjectHash>,
    pub stats: TransferStats,
}

// ==================== Push ====================

/// Stream the history of `branch` that follows `start` to `out`.
pub fn push<S, W>(
    store: &S,
    branches: &Branches,
    branch: &str,
    out: W,
    start: Option<ObjectHash>,
) -> Result<Push>
where
    S: ObjectStore,
    W: Write,
{
    let started = Instant::now();
    let tip = branches.load(branch)?;
    let versions = versions_after(store, tip, start)?;

    let mut sender = Sender {
        store,
        writer: MultipartWriter::new(out),
        trees: HashSet::new(),
        blobs: HashSet::new(),
        stats: TransferStats::default(),
    };
    for hash in &versions {
        sender.send_version(hash)?;
    }

    let boundary = sender.writer.boundary().to_string();
    let content_type = sender.writer.content_type();
    let mut stats = sender.stats;
    sender.writer.finish()?;
    stats.duration_ms = started.elapsed().as_millis() as u64;
    tracing::info!("push {}: {}", branch, stats.summary());
    Ok(Push {
        boundary,
        content_type,
        stats,
    })
}

/// Versions reachable from `tip` but not from `start`, parents first and the
/// first-parent chain before the merged side.
fn versions_after<S: ObjectStore>(
    store: &S,
    tip: ObjectHash,
    start: Option<ObjectHash>,
) -> Result<Vec<ObjectHash>> {
    let mut known = HashSet::new();
    if let Some(start) = start {
        let mut stack = vec![start];
        while let Some(hash) = stack.pop() {
            if !known.insert(hash) {
                continue;
            }
            let version = store.load_version(&hash)?;
            stack.extend(version.prev());
            stack.extend(version.merged());
        }
    }

    // iterative post-order walk
    let mut order = Vec::new();
    let mut visited = HashSet::new();
    let mut stack = vec![(tip, false)];
    while let Some((hash, expanded)) = stack.pop() {
        if expanded {
            order.push(hash);
            continue;
        }
        if known.contains(&hash) || !visited.insert(hash) {
            continue;
        }
        let version = store.load_version(&hash)?;
        stack.push((hash, true));
        // pushed in reverse so prev is walked first
        if let Some(merged) = version.merged() {
            stack.push((merged, false));
        }
        if let Some(prev) = version.prev() {
            stack.push((prev, false));
        }
    }
    Ok(order)
}

struct Sender<'a, S, W: Write> {
    store: &'a S,
    writer: MultipartWriter<W>,
    /// Trees and blobs already in the stream, kept apart so a hash is only
    /// ever elided as the kind it was sent as
    trees: HashSet<ObjectHash>,
    blobs: HashSet<ObjectHash>,
    stats: TransferStats,
}

impl<S: ObjectStore, W: Write> Sender<'_, S, W> {
    fn send(&mut self, hash: &ObjectHash, content_type: &str) -> Result<()> {
        let body = self.store.read_raw(hash)?;
        let disposition = format!("attachment; filename=\"{}\"", hash);
        self.writer.write_part(
            &[
                ("Content-Disposition", disposition.as_str()),
                ("Content-Type", content_type),
            ],
            &body,
        )?;
        self.stats.count(content_type, body.len());
        Ok(())
    }

    fn send_version(&mut self, hash: &ObjectHash) -> Result<()> {
        let version = self.store.load_version(hash)?;
        tracing::debug!("push version {}", hash);
        self.send(hash, VERSION_CONTENT_TYPE)?;
        let prev_tree = match version.prev() {
            Some(prev) => Some(self.store.load_version(&prev)?.tree),
            None => None,
        };
        self.send_tree(&version.tree, prev_tree.as_ref(), 0)
    }

    fn send_tree(
        &mut self,
        hash: &ObjectHash,
        prev: Option<&ObjectHash>,
        depth: usize,
    ) -> Result<()> {
        if prev == Some(hash) || self.trees.contains(hash) {
            return Ok(());
        }
        if depth > MAX_TREE_DEPTH {
            return Err(Error::corrupt(hash, "tree nesting too deep"));
        }
        let tree = self.store.load_tree(hash)?;
        self.send(hash, TREE_CONTENT_TYPE)?;
        self.trees.insert(*hash);

        let prev_tree = match prev {
            Some(prev) => self.store.load_tree(prev)?,
            None => Tree::empty(),
        };
        for entry in tree.iter() {
            let old = prev_tree.get(&entry.name);
            if old == Some(entry) {
                continue;
            }
            match entry.kind {
                EntryKind::Blob => {
                    if self.blobs.insert(entry.hash) {
                        self.send(&entry.hash, BLOB_CONTENT_TYPE)?;
                    }
                }
                EntryKind::Tree => {
                    let old_subtree = old.filter(|o| o.is_tree()).map(|o| o.hash);
                    self.send_tree(&entry.hash, old_subtree.as_ref(), depth + 1)?;
                }
            }
        }
        Ok(())
    }
}

// ==================== Pull ====================

/// Verify a pushed stream and append it to `branch`.
///
/// Nothing in the store or the branch changes unless the whole stream is valid.
pub fn pull<R: Read>(
    store: &DiskStore,
    branches: &Branches,
    branch: &str,
    input: R,
    content_type: &str,
    author: Option<&str>,
) -> Result<PullOutcome> {
    let started = Instant::now();
    let old_tip = branches.get(branch)?;
    let mut receiver = Receiver {
        reader: MultipartReader::from_content_type(input, content_type)?,
        store: OverlayStore::new(store)?,
        old_tip,
        author,
        versions: Vec::new(),
        trees: HashSet::new(),
        blobs: HashSet::new(),
        saw_first: false,
        stats: TransferStats::default(),
    };

    while let Some(part) = receiver.reader.next_part()? {
        let (hash, version) = receiver.receive_version(part)?;
        let prev_tree = match version.prev() {
            Some(prev) => Some(receiver.store.load_version(&prev)?.tree),
            None => None,
        };
        receiver.receive_tree(&version.tree, prev_tree.as_ref(), 0)?;
        receiver.versions.push(hash);
    }

    let Some(&new_tip) = receiver.versions.last() else {
        tracing::debug!("pull {}: nothing new", branch);
        return Ok(PullOutcome {
            tip: old_tip,
            stats: receiver.stats,
        });
    };
    receiver.check_lineage(new_tip)?;

    let Receiver {
        store: staged,
        mut stats,
        ..
    } = receiver;
    staged.promote()?;
    branches.write(branch, &new_tip)?;

    stats.duration_ms = started.elapsed().as_millis() as u64;
    tracing::info!("pull {} -> {}: {}", branch, new_tip, stats.summary());
    Ok(PullOutcome {
        tip: Some(new_tip),
        stats,
    })
}

struct Receiver<'a, R: Read> {
    reader: MultipartReader<R>,
    store: OverlayStore<'a>,
    old_tip: Option<ObjectHash>,
    author: Option<&'a str>,
    /// Versions in the order received
    versions: Vec<ObjectHash>,
    /// Trees and blobs received, by kind
    trees: HashSet<ObjectHash>,
    blobs: HashSet<ObjectHash>,
    saw_first: bool,
    stats: TransferStats,
}

impl<R: Read> Receiver<'_, R> {
    /// Check name, type and content of a part, then stage it
    fn accept(&mut self, part: &Part, expected_type: &str) -> Result<ObjectHash> {
        let name = part
            .filename()
            .ok_or_else(|| Error::transfer("part has no file name"))?;
        let hash = ObjectHash::from_hex(name)
            .map_err(|_| Error::transfer(format!("part name {:?} is not a hash", name)))?;
        let content_type = multipart::media_type(part.content_type().unwrap_or_default());
        if content_type != expected_type {
            return Err(Error::transfer(format!(
                "{} has content type {:?}, expected {}",
                hash, content_type, expected_type
            )));
        }

        let content_hash = if expected_type == BLOB_CONTENT_TYPE {
            let data = decompress_blob(&part.body)
                .map_err(|e| Error::transfer(format!("blob {}: {}", hash, e)))?;
            ObjectHash::of(&data)
        } else {
            ObjectHash::of(&part.body)
        };
        if content_hash != hash {
            return Err(Error::transfer(format!(
                "content of {} hashes to {}",
                hash, content_hash
            )));
        }

        if !self.store.write_raw(&hash, &part.body)? && !self.store.is_staged(&hash) {
            self.stats.objects_skipped += 1;
        }
        self.stats.count(expected_type, part.body.len());
        Ok(hash)
    }

    /// A version reachable by the destination or received earlier
    fn known_version(&self, hash: &ObjectHash, role: &str) -> Result<Version> {
        if !self.store.contains(hash) {
            return Err(Error::transfer(format!("{} version {} is unknown", role, hash)));
        }
        self.store
            .load_version(hash)
            .map_err(|e| Error::transfer(format!("{} {} is not a version: {}", role, hash, e)))
    }

    fn receive_version(&mut self, part: Part) -> Result<(ObjectHash, Version)> {
        if let Some(name) = part.filename() {
            let duplicate = ObjectHash::from_hex(name)
                .map(|h| self.store.contains(&h))
                .unwrap_or(false);
            if duplicate {
                return Err(Error::transfer(format!("duplicate version {}", name)));
            }
        }
        let version = Version::from_bytes(&part.body)
            .map_err(|e| Error::transfer(format!("undecodable version: {}", e)))?;

        if let Some(author) = self.author {
            if version.author != author {
                return Err(Error::transfer(format!(
                    "version by {:?} but only {:?} may push",
                    version.author, author
                )));
            }
        }

        match version.parents {
            Parents::First => {
                if self.old_tip.is_some() || self.saw_first {
                    return Err(Error::transfer("unexpected first version"));
                }
                self.saw_first = true;
            }
            Parents::Continuation { prev } | Parents::Merge { prev, .. } => {
                let prev_version = self.known_version(&prev, "previous")?;
                if version.time <= prev_version.time {
                    return Err(Error::transfer(format!(
                        "version is not later than its predecessor {}",
                        prev
                    )));
                }
            }
        }
        if let Some(merged) = version.merged() {
            let merged_version = self.known_version(&merged, "merged")?;
            if merged_version.time >= version.time {
                return Err(Error::transfer(format!(
                    "merged version {} is not earlier than the merge",
                    merged
                )));
            }
        }

        let hash = self.accept(&part, VERSION_CONTENT_TYPE)?;
        tracing::debug!("pull version {}", hash);
        Ok((hash, version))
    }

    fn next_part(&mut self, expected: &ObjectHash) -> Result<Part> {
        let part = self
            .reader
            .next_part()?
            .ok_or_else(|| Error::transfer(format!("stream ended before {}", expected)))?;
        if part.filename() != Some(expected.to_hex().as_str()) {
            return Err(Error::transfer(format!(
                "expected {}, got {:?}",
                expected,
                part.filename()
            )));
        }
        Ok(part)
    }

    fn receive_tree(
        &mut self,
        hash: &ObjectHash,
        prev: Option<&ObjectHash>,
        depth: usize,
    ) -> Result<()> {
        if prev == Some(hash) || self.trees.contains(hash) {
            return Ok(());
        }
        if depth > MAX_TREE_DEPTH {
            return Err(Error::transfer(format!("tree {} nested too deep", hash)));
        }
        let part = self.next_part(hash)?;
        let tree = Tree::from_bytes(&part.body)
            .map_err(|e| Error::transfer(format!("tree {}: {}", hash, e)))?;
        self.accept(&part, TREE_CONTENT_TYPE)?;
        self.trees.insert(*hash);

        let prev_tree = match prev {
            Some(prev) => self
                .store
                .load_tree(prev)
                .map_err(|e| Error::transfer(format!("previous tree {}: {}", prev, e)))?,
            None => Tree::empty(),
        };
        for entry in tree.iter() {
            let old = prev_tree.get(&entry.name);
            if old == Some(entry) {
                continue;
            }
            match entry.kind {
                EntryKind::Blob => {
                    if !self.blobs.contains(&entry.hash) {
                        let part = self.next_part(&entry.hash)?;
                        self.accept(&part, BLOB_CONTENT_TYPE)?;
                        self.blobs.insert(entry.hash);
                    }
                }
                EntryKind::Tree => {
                    let old_subtree = old.filter(|o| o.is_tree()).map(|o| o.hash);
                    self.receive_tree(&entry.hash, old_subtree.as_ref(), depth + 1)?;
                }
            }
        }
        Ok(())
    }

    /// The new tip must continue the old one along its first-parent chain,
    /// and every received version must belong to the new tip's history.
    fn check_lineage(&self, new_tip: ObjectHash) -> Result<()> {
        let received: HashSet<ObjectHash> = self.versions.iter().copied().collect();

        let mut hash = new_tip;
        let root = loop {
            if !received.contains(&hash) {
                break Some(hash);
            }
            match self.store.load_version(&hash)?.prev() {
                Some(prev) => hash = prev,
                None => break None,
            }
        };
        if root != self.old_tip {
            return Err(Error::transfer(match self.old_tip {
                Some(tip) => format!("pushed history does not continue {}", tip),
                None => "pushed history does not start a new branch".to_string(),
            }));
        }

        let mut reachable = HashSet::new();
        let mut stack = vec![new_tip];
        while let Some(hash) = stack.pop() {
            if !received.contains(&hash) || !reachable.insert(hash) {
                continue;
            }
            let version = self.store.load_version(&hash)?;
            stack.extend(version.prev());
            stack.extend(version.merged());
        }
        if reachable.len() != received.len() {
            return Err(Error::transfer(
                "stream carries versions outside the pushed history",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::TreeEntry;
    use chrono::{Duration, TimeZone, Utc};
    use std::path::Path;
    use tempfile::TempDir;

    struct Repo {
        _tmp: TempDir,
        store: DiskStore,
        branches: Branches,
    }

    impl Repo {
        fn new() -> Self {
            let tmp = TempDir::new().unwrap();
            let gud = tmp.path().join(".gud");
            let store = DiskStore::open(gud.join("objects")).unwrap();
            let branches = Branches::init(&gud).unwrap();
            Self {
                _tmp: tmp,
                store,
                branches,
            }
        }

        fn gud_dir(&self) -> &Path {
            self.store.root().parent().unwrap()
        }

        /// Save a version holding a single file `f` with the given content
        fn commit(&self, content: &str, parents: Parents, minutes: i64) -> ObjectHash {
            let blob = self.store.put_blob(content.as_bytes()).unwrap();
            let tree = self
                .store
                .put_tree(vec![TreeEntry::new("f", blob, EntryKind::Blob)])
                .unwrap();
            let time = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes);
            self.store
                .put_version(&Version::new(content, "alice", time, tree, parents))
                .unwrap()
        }
    }

    fn transfer(from: &Repo, start: Option<ObjectHash>) -> (Vec<u8>, Push) {
        let mut out = Vec::new();
        let result = push(&from.store, &from.branches, "master", &mut out, start).unwrap();
        (out, result)
    }

    /// Write stored objects as a transfer in the given order, bypassing push
    fn forge(store: &DiskStore, parts: &[(ObjectHash, &str)]) -> (Vec<u8>, String) {
        let mut writer = MultipartWriter::new(Vec::new());
        for (hash, content_type) in parts {
            let disposition = format!("attachment; filename=\"{}\"", hash);
            writer
                .write_part(
                    &[
                        ("Content-Disposition", disposition.as_str()),
                        ("Content-Type", *content_type),
                    ],
                    &store.read_raw(hash).unwrap(),
                )
                .unwrap();
        }
        let content_type = writer.content_type();
        (writer.finish().unwrap(), content_type)
    }

    #[test]
    fn test_push_then_pull_into_empty_store() {
        let src = Repo::new();
        let a = src.commit("a", Parents::First, 0);
        let b = src.commit("b", Parents::Continuation { prev: a }, 1);
        src.branches.write("master", &b).unwrap();

        let (bytes, push) = transfer(&src, None);
        assert_eq!(push.stats.versions, 2);
        assert_eq!(push.stats.blobs, 2);

        let dst = Repo::new();
        let outcome = pull(
            &dst.store,
            &dst.branches,
            "master",
            bytes.as_slice(),
            &push.content_type,
            None,
        )
        .unwrap();
        assert_eq!(outcome.tip, Some(b));
        assert_eq!(dst.branches.load("master").unwrap(), b);
        assert_eq!(dst.store.list().unwrap(), src.store.list().unwrap());
        // the staging directory is gone
        let leftovers: Vec<_> = std::fs::read_dir(dst.gud_dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".staging-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_unchanged_subtrees_are_elided() {
        let src = Repo::new();
        let a = src.commit("a", Parents::First, 0);
        // same tree as `a`, so only the version part travels
        let tree = src.store.load_version(&a).unwrap().tree;
        let time = src.store.load_version(&a).unwrap().time + Duration::seconds(1);
        let b = src
            .store
            .put_version(&Version::new("again", "alice", time, tree, Parents::Continuation { prev: a }))
            .unwrap();
        src.branches.write("master", &b).unwrap();

        let (_, push) = transfer(&src, Some(a));
        assert_eq!(push.stats.versions, 1);
        assert_eq!(push.stats.trees, 0);
        assert_eq!(push.stats.blobs, 0);
    }

    #[test]
    fn test_merge_history_transfers() {
        let src = Repo::new();
        let a = src.commit("a", Parents::First, 0);
        let side = src.commit("side", Parents::Continuation { prev: a }, 1);
        let main = src.commit("main", Parents::Continuation { prev: a }, 2);
        let merge = src.commit(
            "merge",
            Parents::Merge {
                prev: main,
                merged: side,
            },
            3,
        );
        src.branches.write("master", &merge).unwrap();

        let dst = Repo::new();
        let (bytes, push) = transfer(&src, None);
        assert_eq!(push.stats.versions, 4);
        pull(&dst.store, &dst.branches, "master", bytes.as_slice(), &push.content_type, None).unwrap();
        assert_eq!(dst.branches.load("master").unwrap(), merge);
        assert!(dst.store.contains(&side));
    }

    #[test]
    fn test_pull_rejects_stale_start() {
        let src = Repo::new();
        let a = src.commit("a", Parents::First, 0);
        let b = src.commit("b", Parents::Continuation { prev: a }, 1);
        src.branches.write("master", &b).unwrap();

        // receiver already has `a` and `b`
        let dst = Repo::new();
        let (bytes, push) = transfer(&src, None);
        pull(&dst.store, &dst.branches, "master", bytes.as_slice(), &push.content_type, None).unwrap();

        // resending the same history is a duplicate
        let err = pull(&dst.store, &dst.branches, "master", bytes.as_slice(), &push.content_type, None)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransfer(_)));

        // a continuation of `a` instead of `b` does not fit the receiver
        let c = src.commit("c", Parents::Continuation { prev: a }, 2);
        src.branches.write("master", &c).unwrap();
        let (bytes, push) = transfer(&src, Some(a));
        let before = dst.store.list().unwrap();
        let err = pull(&dst.store, &dst.branches, "master", bytes.as_slice(), &push.content_type, None)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransfer(_)));
        assert_eq!(dst.branches.load("master").unwrap(), b);
        assert_eq!(dst.store.list().unwrap(), before);
    }

    #[test]
    fn test_author_filter() {
        let src = Repo::new();
        let a = src.commit("a", Parents::First, 0);
        src.branches.write("master", &a).unwrap();
        let (bytes, push) = transfer(&src, None);

        let dst = Repo::new();
        let err = pull(
            &dst.store,
            &dst.branches,
            "master",
            bytes.as_slice(),
            &push.content_type,
            Some("mallory"),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidTransfer(_)));
        assert!(dst.store.list().unwrap().is_empty());

        pull(
            &dst.store,
            &dst.branches,
            "master",
            bytes.as_slice(),
            &push.content_type,
            Some("alice"),
        )
        .unwrap();
        assert_eq!(dst.branches.load("master").unwrap(), a);
    }

    #[test]
    fn test_pull_rejects_non_multipart() {
        let dst = Repo::new();
        let err = pull(&dst.store, &dst.branches, "master", &b""[..], "application/json", None)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransfer(_)));
    }

    #[test]
    fn test_empty_transfer() {
        let src = Repo::new();
        let a = src.commit("a", Parents::First, 0);
        src.branches.write("master", &a).unwrap();
        let (bytes, push) = transfer(&src, Some(a));
        assert_eq!(push.stats.objects(), 0);

        let dst = Repo::new();
        let outcome =
            pull(&dst.store, &dst.branches, "master", bytes.as_slice(), &push.content_type, None)
                .unwrap();
        assert_eq!(outcome.tip, None);
        assert!(!dst.branches.exists("master"));
    }

    #[test]
    fn test_pull_rejects_blob_named_as_tree() {
        let src = Repo::new();
        let a = src.commit("a", Parents::First, 0);
        let a_version = src.store.load_version(&a).unwrap();
        let blob = src
            .store
            .find_entry(&a_version.tree, "f")
            .unwrap()
            .unwrap()
            .hash;
        // `b` claims the blob as its root tree
        let b = src
            .store
            .put_version(&Version::new(
                "b",
                "alice",
                a_version.time + Duration::minutes(1),
                blob,
                Parents::Continuation { prev: a },
            ))
            .unwrap();
        src.branches.write("master", &b).unwrap();

        let err = push(&src.store, &src.branches, "master", Vec::new(), None).unwrap_err();
        assert!(matches!(err, Error::CorruptStore(_)));

        let history = [
            (a, VERSION_CONTENT_TYPE),
            (a_version.tree, TREE_CONTENT_TYPE),
            (blob, BLOB_CONTENT_TYPE),
            (b, VERSION_CONTENT_TYPE),
        ];
        let dst = Repo::new();

        // the blob already in the stream does not stand in for the tree
        let (bytes, content_type) = forge(&src.store, &history);
        let err = pull(&dst.store, &dst.branches, "master", bytes.as_slice(), &content_type, None)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransfer(_)));
        assert!(!dst.branches.exists("master"));
        assert!(dst.store.list().unwrap().is_empty());

        // nor does resending it typed as a tree
        let mut resent = history.to_vec();
        resent.push((blob, TREE_CONTENT_TYPE));
        let (bytes, content_type) = forge(&src.store, &resent);
        let err = pull(&dst.store, &dst.branches, "master", bytes.as_slice(), &content_type, None)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransfer(_)));
        assert!(!dst.branches.exists("master"));
        assert!(dst.store.list().unwrap().is_empty());
    }
}
