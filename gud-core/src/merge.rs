//! Three-way tree merge
//!
//! Trees are merged entry by entry against their common base. A change made
//! on one side only is taken as is; directories changed on both sides are
//! merged recursively; files changed on both sides are handed to a
//! [`ConflictResolver`].

use crate::error::{Error, Result};
use crate::hash::ObjectHash;
use crate::object::{EntryKind, Tree, TreeEntry};
use crate::store::{MAX_TREE_DEPTH, ObjectStore, join_path};
use std::collections::{BTreeSet, HashSet};

/// A file changed differently on both sides. `None` means the side has no
/// file at this path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobConflict {
    pub path: String,
    pub base: Option<ObjectHash>,
    pub ours: Option<ObjectHash>,
    pub theirs: Option<ObjectHash>,
}

/// Outcome of a resolution attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Use this blob, or drop the file when `None`
    Resolved(Option<ObjectHash>),
    /// Leave it to the user
    Conflict,
}

/// Decides how two-sided file changes are combined
pub trait ConflictResolver {
    fn resolve(&mut self, store: &dyn ObjectStore, conflict: &BlobConflict) -> Result<Resolution>;
}

/// Reports every two-sided change as a conflict
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepConflicts;

impl ConflictResolver for KeepConflicts {
    fn resolve(&mut self, _store: &dyn ObjectStore, _conflict: &BlobConflict) -> Result<Resolution> {
        Ok(Resolution::Conflict)
    }
}

/// A path left unresolved; `hash` is the blob kept in the merged tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeConflict {
    pub path: String,
    pub hash: ObjectHash,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeMerge {
    /// Merged root tree. Unresolved paths hold our side (or theirs when we
    /// have no file there).
    pub tree: ObjectHash,
    pub conflicts: Vec<MergeConflict>,
}

/// Merge `theirs` into `ours` relative to `base`
pub fn merge_trees<S: ObjectStore>(
    store: &S,
    resolver: &mut dyn ConflictResolver,
    base: &ObjectHash,
    ours: &ObjectHash,
    theirs: &ObjectHash,
) -> Result<TreeMerge> {
    let mut merger = Merger {
        store,
        resolver,
        conflicts: Vec::new(),
    };
    let entries = merger.merge_dir(
        "",
        &store.load_tree(base)?,
        &store.load_tree(ours)?,
        &store.load_tree(theirs)?,
        0,
    )?;
    let tree = store.put_tree(entries)?;
    Ok(TreeMerge {
        tree,
        conflicts: merger.conflicts,
    })
}

struct Merger<'a, S> {
    store: &'a S,
    resolver: &'a mut dyn ConflictResolver,
    conflicts: Vec<MergeConflict>,
}

impl<S: ObjectStore> Merger<'_, S> {
    fn merge_dir(
        &mut self,
        dir: &str,
        base: &Tree,
        ours: &Tree,
        theirs: &Tree,
        depth: usize,
    ) -> Result<Vec<TreeEntry>> {
        if depth > MAX_TREE_DEPTH {
            return Err(Error::CorruptStore(format!(
                "tree nesting deeper than {} at {}",
                MAX_TREE_DEPTH, dir
            )));
        }
        let names: BTreeSet<&str> = base
            .iter()
            .chain(ours.iter())
            .chain(theirs.iter())
            .map(|e| e.name.as_str())
            .collect();

        let mut merged = Vec::with_capacity(names.len());
        for name in names {
            let (b, o, t) = (base.get(name), ours.get(name), theirs.get(name));
            let entry = if o == t || t == b {
                o.cloned()
            } else if o == b {
                t.cloned()
            } else {
                self.merge_entry(&join_path(dir, name), name, b, o, t, depth)?
            };
            merged.extend(entry);
        }
        Ok(merged)
    }

    fn subtree(&self, entry: Option<&TreeEntry>) -> Result<Tree> {
        match entry {
            Some(e) if e.is_tree() => self.store.load_tree(&e.hash),
            _ => Ok(Tree::empty()),
        }
    }

    fn merge_entry(
        &mut self,
        path: &str,
        name: &str,
        base: Option<&TreeEntry>,
        ours: Option<&TreeEntry>,
        theirs: Option<&TreeEntry>,
        depth: usize,
    ) -> Result<Option<TreeEntry>> {
        let present: HashSet<EntryKind> = ours.iter().chain(theirs.iter()).map(|e| e.kind).collect();
        if present.len() > 1 {
            return Err(Error::InvalidInput(format!(
                "cannot merge directory and file: {}",
                path
            )));
        }

        if present.contains(&EntryKind::Tree) {
            let (base_tree, our_tree, their_tree) =
                (self.subtree(base)?, self.subtree(ours)?, self.subtree(theirs)?);
            let entries = self.merge_dir(path, &base_tree, &our_tree, &their_tree, depth + 1)?;
            if entries.is_empty() {
                return Ok(None);
            }
            let hash = self.store.put_tree(entries)?;
            return Ok(Some(TreeEntry::new(name, hash, EntryKind::Tree)));
        }

        let blob = |e: Option<&TreeEntry>| e.filter(|e| !e.is_tree()).map(|e| e.hash);
        let conflict = BlobConflict {
            path: path.to_string(),
            base: blob(base),
            ours: blob(ours),
            theirs: blob(theirs),
        };
        match self.resolver.resolve(self.store, &conflict)? {
            Resolution::Resolved(hash) => {
                Ok(hash.map(|h| TreeEntry::new(name, h, EntryKind::Blob)))
            }
            Resolution::Conflict => {
                let kept = ours.or(theirs).cloned();
                if let Some(entry) = &kept {
                    tracing::debug!("merge conflict in {}", path);
                    self.conflicts.push(MergeConflict {
                        path: path.to_string(),
                        hash: entry.hash,
                    });
                }
                Ok(kept)
            }
        }
    }
}

// ==================== History ====================

/// Every version reachable from `hash` through either parent, itself included
pub fn ancestors<S: ObjectStore>(store: &S, hash: ObjectHash) -> Result<HashSet<ObjectHash>> {
    let mut seen = HashSet::new();
    let mut stack = vec![hash];
    while let Some(hash) = stack.pop() {
        if !seen.insert(hash) {
            continue;
        }
        let version = store.load_version(&hash)?;
        stack.extend(version.prev());
        stack.extend(version.merged());
    }
    Ok(seen)
}

/// Latest version on the first-parent chain of `theirs` that `ours` descends from
pub fn find_base<S: ObjectStore>(
    store: &S,
    ours: ObjectHash,
    theirs: ObjectHash,
) -> Result<Option<ObjectHash>> {
    let ours = ancestors(store, ours)?;
    let mut hash = theirs;
    loop {
        if ours.contains(&hash) {
            return Ok(Some(hash));
        }
        match store.load_version(&hash)?.prev() {
            Some(prev) => hash = prev,
            None => return Ok(None),
        }
    }
}
