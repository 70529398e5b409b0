//! Staging index
//!
//! The index lists pending changes relative to the head version's tree,
//! sorted by path. It is stored at `.gud/index` as a bincode record stamped
//! with [`INDEX_FORMAT`]; an index written by another format is rejected.

use crate::branch::write_atomic;
use crate::error::{Error, Result};
use crate::hash::ObjectHash;
use crate::store::ObjectStore;
use crate::worktree;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

/// Format stamp of the index file
pub const INDEX_FORMAT: u32 = 1;

pub const INDEX_FILE: &str = "index";

/// State of a staged path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileState {
    New,
    Modified,
    Removed,
    /// Both sides of a merge changed the file
    Conflict,
}

impl std::fmt::Display for FileState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FileState::New => "new",
            FileState::Modified => "modified",
            FileState::Removed => "removed",
            FileState::Conflict => "conflict",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub path: String,
    pub state: FileState,
    /// Staged blob for New/Modified/Conflict, the tree's blob for Removed
    pub hash: ObjectHash,
    pub size: u64,
    pub mtime: DateTime<Utc>,
    pub ctime: DateTime<Utc>,
}

impl IndexEntry {
    /// Entry for a path that is gone from disk
    pub fn removed(path: impl Into<String>, hash: ObjectHash) -> Self {
        let now = Utc::now();
        Self {
            path: path.into(),
            state: FileState::Removed,
            hash,
            size: 0,
            mtime: now,
            ctime: now,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct IndexFile {
    format: u32,
    entries: Vec<IndexEntry>,
}

/// In-memory index bound to its file
#[derive(Debug, Clone)]
pub struct Index {
    path: PathBuf,
    entries: Vec<IndexEntry>,
}

impl Index {
    /// Write an empty index
    pub fn init(gud_dir: &Path) -> Result<Self> {
        let index = Self {
            path: gud_dir.join(INDEX_FILE),
            entries: Vec::new(),
        };
        index.save()?;
        Ok(index)
    }

    /// Index with no entries that is never written
    pub(crate) fn scratch() -> Self {
        Self {
            path: PathBuf::new(),
            entries: Vec::new(),
        }
    }

    pub fn load(gud_dir: &Path) -> Result<Self> {
        let path = gud_dir.join(INDEX_FILE);
        let data = fs::read(&path)?;
        // The stamp leads the record, so check it before decoding entries
        // whose layout may differ between formats.
        let found: u32 = match data.get(..4) {
            Some(stamp) => bincode::deserialize(stamp)
                .map_err(|e| Error::corrupt("invalid index file", e))?,
            None => return Err(Error::corrupt("invalid index file", "truncated")),
        };
        if found != INDEX_FORMAT {
            return Err(Error::IndexFormat {
                found,
                expected: INDEX_FORMAT,
            });
        }
        let file: IndexFile =
            bincode::deserialize(&data).map_err(|e| Error::corrupt("invalid index file", e))?;
        Ok(Self {
            path,
            entries: file.entries,
        })
    }

    pub fn save(&self) -> Result<()> {
        let file = IndexFile {
            format: INDEX_FORMAT,
            entries: self.entries.clone(),
        };
        let data =
            bincode::serialize(&file).map_err(|e| Error::corrupt("cannot encode index", e))?;
        write_atomic(&self.path, &data)
    }

    /// Entries ordered by path
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<&IndexEntry> {
        self.find(path).ok().map(|i| &self.entries[i])
    }

    fn find(&self, path: &str) -> std::result::Result<usize, usize> {
        self.entries.binary_search_by(|e| e.path.as_str().cmp(path))
    }

    /// Insert or replace the entry for its path
    pub fn stage(&mut self, entry: IndexEntry) {
        match self.find(&entry.path) {
            Ok(i) => self.entries[i] = entry,
            Err(i) => self.entries.insert(i, entry),
        }
    }

    /// Drop the entry for a path
    pub fn unstage(&mut self, path: &str) -> Option<IndexEntry> {
        self.find(path).ok().map(|i| self.entries.remove(i))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn has_conflicts(&self) -> bool {
        self.entries.iter().any(|e| e.state == FileState::Conflict)
    }

    fn paths_under(&self, dir: &str) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .map(|e| e.path.as_str())
            .filter(move |p| worktree::is_under(p, dir))
    }

    /// Stage every change at or below each of `paths` (project-relative).
    ///
    /// Files on disk are written to the store and staged `New` or `Modified`
    /// against `head_tree`; files identical to the tree lose their entry;
    /// tracked files missing from disk are staged `Removed`.
    pub fn add<S: ObjectStore>(
        &mut self,
        root: &Path,
        store: &S,
        head_tree: &ObjectHash,
        paths: &[String],
    ) -> Result<()> {
        for rel in paths {
            let tracked = tracked_under(store, head_tree, rel)?;
            let on_disk = worktree::files_under(root, rel)?;
            let mut candidates: BTreeSet<String> = tracked.keys().cloned().collect();
            candidates.extend(self.paths_under(rel).map(str::to_string));
            let nothing_tracked = candidates.is_empty();
            candidates.extend(on_disk);

            if nothing_tracked && !worktree::abs_path(root, rel).exists() {
                return Err(Error::NotTracked(rel.clone()));
            }

            for path in candidates {
                self.add_one(root, store, &path, tracked.get(&path))?;
            }
        }
        Ok(())
    }

    fn add_one<S: ObjectStore>(
        &mut self,
        root: &Path,
        store: &S,
        path: &str,
        tracked: Option<&ObjectHash>,
    ) -> Result<()> {
        let abs = worktree::abs_path(root, path);
        if !worktree::is_file(root, path) {
            match tracked {
                Some(hash) => self.stage(IndexEntry::removed(path, *hash)),
                None => {
                    self.unstage(path);
                }
            }
            return Ok(());
        }

        let data = fs::read(&abs)?;
        let hash = store.put_blob(&data)?;
        if tracked == Some(&hash) {
            self.unstage(path);
            return Ok(());
        }

        let (size, mtime, ctime) = worktree::file_stat(&fs::metadata(&abs)?);
        let state = if tracked.is_some() {
            FileState::Modified
        } else {
            FileState::New
        };
        tracing::debug!("staged {} {}", state, path);
        self.stage(IndexEntry {
            path: path.to_string(),
            state,
            hash,
            size,
            mtime,
            ctime,
        });
        Ok(())
    }

    /// Mark paths for removal. Untracked staged files are simply unstaged.
    /// The working directory is left alone.
    pub fn remove<S: ObjectStore>(
        &mut self,
        store: &S,
        head_tree: &ObjectHash,
        paths: &[String],
    ) -> Result<()> {
        for rel in paths {
            let tracked = tracked_under(store, head_tree, rel)?;
            let mut candidates: BTreeSet<String> = tracked.keys().cloned().collect();
            candidates.extend(self.paths_under(rel).map(str::to_string));
            if candidates.is_empty() {
                return Err(Error::NotTracked(rel.clone()));
            }
            for path in candidates {
                match tracked.get(&path) {
                    Some(hash) => self.stage(IndexEntry::removed(path, *hash)),
                    None => {
                        self.unstage(&path);
                    }
                }
            }
        }
        Ok(())
    }
}

/// Blobs recorded in `tree` at or below `rel`
fn tracked_under<S: ObjectStore>(
    store: &S,
    tree: &ObjectHash,
    rel: &str,
) -> Result<BTreeMap<String, ObjectHash>> {
    let mut tracked = BTreeMap::new();
    let subtree = if rel.is_empty() {
        *tree
    } else {
        match store.find_entry(tree, rel)? {
            Some(entry) if entry.is_tree() => entry.hash,
            Some(entry) => {
                tracked.insert(rel.to_string(), entry.hash);
                return Ok(tracked);
            }
            None => return Ok(tracked),
        }
    };
    store.walk_blobs(&subtree, rel, |path, entry| {
        tracked.insert(path.to_string(), entry.hash);
        Ok(())
    })?;
    Ok(tracked)
}
