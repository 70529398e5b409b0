//! Project handle
//!
//! A [`Project`] ties the object store, index, branches and configuration of
//! one working directory together.
//!
//! Layout on disk:
//! ```text
//! {root}/
//!   .gud/
//!     objects/{hex}     content-addressed objects
//!     branches/{name}   branch tips
//!     head              current branch or pinned version
//!     index             staged changes
//!     config.toml       project configuration
//! ```

use crate::branch::{Branches, FIRST_BRANCH, Head};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::hash::ObjectHash;
use crate::index::{FileState, Index, IndexEntry};
use crate::merge::{self, ConflictResolver, KeepConflicts};
use crate::object::{EntryKind, Parents, TreeEntry, Version};
use crate::status;
use crate::store::{DiskStore, MAX_TREE_DEPTH, ObjectStore};
use crate::sync::{self, PullOutcome, Push};
use crate::worktree::{self, GUD_DIR};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

/// Message of the version created by [`Project::start`]
pub const INITIAL_MESSAGE: &str = "initial version";

/// What a merge did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The merged history was already contained in the branch
    UpToDate,
    /// The branch moved forward to the merged version
    FastForward(ObjectHash),
    /// A merge version was saved
    Merged(ObjectHash),
}

/// A gud project rooted at a working directory
#[derive(Debug, Clone)]
pub struct Project {
    root: PathBuf,
    gud_dir: PathBuf,
    store: DiskStore,
    branches: Branches,
}

impl Project {
    // ==================== Lifecycle ====================

    /// Create a project with an empty initial version on `master`
    pub fn start(path: impl AsRef<Path>) -> Result<Self> {
        let project = Self::init_layout(path.as_ref())?;
        let config = project.config()?;
        let tree = project.store.put_tree(Vec::new())?;
        let version = Version::new(INITIAL_MESSAGE, config.name, Utc::now(), tree, Parents::First);
        let hash = project.store.put_version(&version)?;
        project.branches.write(FIRST_BRANCH, &hash)?;
        tracing::info!("started project at {:?} ({})", project.root, hash);
        Ok(project)
    }

    /// Create a project with no versions, ready to receive a pull
    pub fn start_headless(path: impl AsRef<Path>) -> Result<Self> {
        let project = Self::init_layout(path.as_ref())?;
        tracing::info!("started headless project at {:?}", project.root);
        Ok(project)
    }

    fn init_layout(path: &Path) -> Result<Self> {
        let root = std::path::absolute(path)?;
        fs::create_dir_all(&root)?;
        let gud_dir = root.join(GUD_DIR);
        match fs::create_dir(&gud_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(Error::InvalidInput(format!(
                    "a project already exists at {}",
                    root.display()
                )));
            }
            Err(e) => return Err(e.into()),
        }

        let store = DiskStore::open(gud_dir.join("objects"))?;
        let branches = Branches::init(&gud_dir)?;
        Index::init(&gud_dir)?;
        Config::for_project(&root).save(&gud_dir)?;
        branches.write_head(&Head::attached(FIRST_BRANCH))?;
        Ok(Self {
            root,
            gud_dir,
            store,
            branches,
        })
    }

    /// Open the project containing `path`, searching parent directories
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let start = std::path::absolute(path.as_ref())?;
        for dir in start.ancestors() {
            let gud_dir = dir.join(GUD_DIR);
            if gud_dir.is_dir() {
                return Ok(Self {
                    root: dir.to_path_buf(),
                    store: DiskStore::open(gud_dir.join("objects"))?,
                    branches: Branches::open(&gud_dir),
                    gud_dir,
                });
            }
        }
        Err(Error::ProjectNotFound(start.display().to_string()))
    }

    pub fn open_or_create(path: impl AsRef<Path>) -> Result<Self> {
        match Self::open(path.as_ref()) {
            Err(Error::ProjectNotFound(_)) => Self::start(path),
            other => other,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store(&self) -> &DiskStore {
        &self.store
    }

    pub fn config(&self) -> Result<Config> {
        Config::load(&self.gud_dir)
    }

    pub fn write_config(&self, config: &Config) -> Result<()> {
        config.save(&self.gud_dir)
    }

    // ==================== Index ====================

    fn relative_paths<P: AsRef<Path>>(&self, paths: &[P]) -> Result<Vec<String>> {
        paths
            .iter()
            .map(|p| worktree::relative_path(&self.root, p.as_ref()))
            .collect()
    }

    /// Stage changes at or below each path
    pub fn add<P: AsRef<Path>>(&self, paths: &[P]) -> Result<()> {
        let paths = self.relative_paths(paths)?;
        let tree = self.head_tree()?;
        let mut index = Index::load(&self.gud_dir)?;
        index.add(&self.root, &self.store, &tree, &paths)?;
        index.save()
    }

    /// Stage every change in the working directory
    pub fn add_all(&self) -> Result<()> {
        self.add(&[&self.root])
    }

    /// Stage the removal of tracked paths and unstage new ones
    pub fn remove<P: AsRef<Path>>(&self, paths: &[P]) -> Result<()> {
        let paths = self.relative_paths(paths)?;
        let tree = self.head_tree()?;
        let mut index = Index::load(&self.gud_dir)?;
        index.remove(&self.store, &tree, &paths)?;
        index.save()
    }

    /// Drop every staged change
    pub fn clear(&self) -> Result<()> {
        let mut index = Index::load(&self.gud_dir)?;
        index.clear();
        index.save()
    }

    /// Staged changes ordered by path
    pub fn list(&self) -> Result<Vec<IndexEntry>> {
        Ok(Index::load(&self.gud_dir)?.entries().to_vec())
    }

    /// Report staged changes to `tracked` and unstaged ones to `untracked`
    pub fn status<T, U>(&self, mut tracked: T, untracked: U) -> Result<()>
    where
        T: FnMut(&str, FileState) -> Result<()>,
        U: FnMut(&str, FileState) -> Result<()>,
    {
        let index = Index::load(&self.gud_dir)?;
        for entry in index.entries() {
            tracked(&entry.path, entry.state)?;
        }
        status::diff_worktree(&self.root, &self.store, &self.head_tree()?, &index, untracked)
    }

    /// Whether anything is staged or changed on disk
    pub fn has_changes(&self) -> Result<bool> {
        let index = Index::load(&self.gud_dir)?;
        if !index.is_empty() {
            return Ok(true);
        }
        let mut changed = false;
        status::diff_worktree(&self.root, &self.store, &self.head_tree()?, &index, |_, _| {
            changed = true;
            Ok(())
        })?;
        Ok(changed)
    }

    fn ensure_clean(&self) -> Result<()> {
        if self.has_changes()? {
            return Err(Error::UncommittedChanges);
        }
        Ok(())
    }

    // ==================== Versions ====================

    /// Save the staged changes as a new version on the current branch
    pub fn save(&self, message: &str) -> Result<ObjectHash> {
        let Head::Attached { branch, merging } = self.branches.load_head()? else {
            return Err(Error::DetachedHead("save"));
        };
        let mut index = Index::load(&self.gud_dir)?;
        if index.has_conflicts() {
            return Err(Error::UnresolvedConflicts);
        }
        if index.is_empty() && merging.is_none() {
            return Err(Error::NothingToSave);
        }

        let prev = self.branches.get(&branch)?;
        let base_tree = match prev {
            Some(prev) => Some(self.store.load_version(&prev)?.tree),
            None => None,
        };
        let mut changes = DirChanges::default();
        for entry in index.entries() {
            changes.insert(entry);
        }
        let entries = changes.apply(&self.store, base_tree.as_ref(), 0)?;
        let tree = self.store.put_tree(entries)?;

        let parents = match (prev, merging) {
            (None, _) => Parents::First,
            (Some(prev), None) => Parents::Continuation { prev },
            (Some(prev), Some(merged)) => Parents::Merge { prev, merged },
        };
        let hash = self.commit(&branch, message, tree, parents)?;

        index.clear();
        index.save()?;
        if merging.is_some() {
            self.branches.write_head(&Head::attached(branch))?;
        }
        Ok(hash)
    }

    /// Write a version after the parents' times and advance the branch
    fn commit(
        &self,
        branch: &str,
        message: &str,
        tree: ObjectHash,
        parents: Parents,
    ) -> Result<ObjectHash> {
        let mut floor: Option<DateTime<Utc>> = None;
        for parent in parents.prev().into_iter().chain(parents.merged()) {
            let time = self.store.load_version(&parent)?.time;
            floor = Some(floor.map_or(time, |f| f.max(time)));
        }
        let now = Utc::now();
        let time = match floor {
            Some(floor) if now <= floor => floor + Duration::microseconds(1),
            _ => now,
        };

        let author = self.config()?.name;
        let version = Version::new(message, author, time, tree, parents);
        let hash = self.store.put_version(&version)?;
        self.branches.write(branch, &hash)?;
        tracing::info!("saved {} on {}: {}", hash, branch, message);
        Ok(hash)
    }

    pub fn head(&self) -> Result<Head> {
        self.branches.load_head()
    }

    pub fn current_hash(&self) -> Result<ObjectHash> {
        self.branches.current_hash()
    }

    pub fn current_version(&self) -> Result<Version> {
        self.store.load_version(&self.current_hash()?)
    }

    /// Branch the head is attached to
    pub fn current_branch(&self) -> Result<Option<String>> {
        Ok(self.branches.load_head()?.branch().map(str::to_string))
    }

    /// Root tree of the head version; empty before anything was saved
    fn head_tree(&self) -> Result<ObjectHash> {
        match self.current_hash() {
            Ok(hash) => Ok(self.store.load_version(&hash)?.tree),
            Err(Error::BranchNotFound(_)) => self.store.put_tree(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// The predecessor of a version, if it has one
    pub fn prev(&self, version: &Version) -> Result<Option<(ObjectHash, Version)>> {
        match version.prev() {
            Some(hash) => Ok(Some((hash, self.store.load_version(&hash)?))),
            None => Ok(None),
        }
    }

    /// Walk the first-parent chain from the head, newest first
    pub fn log<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&ObjectHash, &Version) -> Result<()>,
    {
        let mut next = Some(self.current_hash()?);
        while let Some(hash) = next {
            let version = self.store.load_version(&hash)?;
            f(&hash, &version)?;
            next = version.prev();
        }
        Ok(())
    }

    /// Tip of the branch the head is attached to
    pub fn latest_version(&self) -> Result<Version> {
        let head = self.branches.load_head()?;
        let branch = head
            .branch()
            .ok_or(Error::DetachedHead("find the latest version"))?;
        self.store.load_version(&self.branches.load(branch)?)
    }

    /// Whether `path` names a file in the snapshot of version `hash`
    pub fn has_file(&self, path: &str, hash: ObjectHash) -> Result<bool> {
        let version = self.store.load_version(&hash)?;
        let entry = self.store.find_entry(&version.tree, path)?;
        Ok(entry.is_some_and(|e| !e.is_tree()))
    }

    /// Write the files of version `hash` to `out` as a tar archive
    pub fn tar<W: Write>(&self, out: W, hash: ObjectHash) -> Result<()> {
        let version = self.store.load_version(&hash)?;
        let mtime = version.time.timestamp().max(0) as u64;
        let mut builder = tar::Builder::new(out);
        self.store.walk_blobs(&version.tree, "", |path, entry| {
            let data = self.store.load_blob(&entry.hash)?;
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_mtime(mtime);
            header.set_cksum();
            builder.append_data(&mut header, path, data.as_slice())?;
            Ok(())
        })?;
        builder.finish()?;
        tracing::debug!("archived {}", hash);
        Ok(())
    }

    // ==================== Branches ====================

    /// Create a branch at the current version
    pub fn create_branch(&self, name: &str) -> Result<()> {
        if self.branches.exists(name) {
            return Err(Error::InvalidInput(format!("branch {} already exists", name)));
        }
        let hash = self.current_hash()?;
        self.branches.write(name, &hash)
    }

    pub fn load_branch(&self, name: &str) -> Result<ObjectHash> {
        self.branches.load(name)
    }

    /// Visit branch names in sorted order
    pub fn list_branches<F>(&self, f: F) -> Result<()>
    where
        F: FnMut(&str) -> Result<()>,
    {
        self.branches.list(f)
    }

    /// Point the head at a branch without touching the working directory
    pub fn set_head_attached(&self, branch: &str) -> Result<()> {
        self.branches.load(branch)?;
        self.branches.write_head(&Head::attached(branch))
    }

    /// Pin the head to a version without touching the working directory
    pub fn set_head_detached(&self, hash: ObjectHash) -> Result<()> {
        self.store.load_version(&hash)?;
        self.branches.write_head(&Head::Detached { hash })
    }

    /// Restore the working directory to a version and detach the head there
    pub fn checkout(&self, hash: ObjectHash) -> Result<()> {
        self.ensure_clean()?;
        let version = self.store.load_version(&hash)?;
        self.restore_worktree(&version.tree)?;
        self.branches.write_head(&Head::Detached { hash })
    }

    /// Restore the working directory to a branch and attach the head to it
    pub fn checkout_branch(&self, name: &str) -> Result<()> {
        let hash = self.branches.load(name)?;
        self.ensure_clean()?;
        let version = self.store.load_version(&hash)?;
        self.restore_worktree(&version.tree)?;
        self.branches.write_head(&Head::attached(name))
    }

    /// Make the working directory match `tree`: delete what it lacks first,
    /// then write what differs.
    fn restore_worktree(&self, tree: &ObjectHash) -> Result<()> {
        let mut stale = Vec::new();
        let mut missing = Vec::new();
        status::diff_worktree(&self.root, &self.store, tree, &Index::scratch(), |path, state| {
            match state {
                FileState::New => stale.push(path.to_string()),
                FileState::Removed | FileState::Modified => missing.push(path.to_string()),
                FileState::Conflict => {}
            }
            Ok(())
        })?;

        for path in &stale {
            worktree::remove_file(&self.root, path)?;
        }
        for path in &missing {
            let entry = self
                .store
                .find_entry(tree, path)?
                .ok_or_else(|| Error::corrupt(tree, format!("{} vanished from tree", path)))?;
            worktree::write_file(&self.root, path, &self.store.load_blob(&entry.hash)?)?;
        }
        tracing::debug!(
            "restored working directory: {} deleted, {} written",
            stale.len(),
            missing.len()
        );
        Ok(())
    }

    // ==================== Merge ====================

    pub fn merge_branch(&self, name: &str) -> Result<MergeOutcome> {
        self.merge_branch_with(name, &mut KeepConflicts)
    }

    pub fn merge_branch_with(
        &self,
        name: &str,
        resolver: &mut dyn ConflictResolver,
    ) -> Result<MergeOutcome> {
        let hash = self.branches.load(name)?;
        self.merge(hash, name, resolver)
    }

    pub fn merge_hash(&self, hash: ObjectHash) -> Result<MergeOutcome> {
        self.merge_hash_with(hash, &mut KeepConflicts)
    }

    pub fn merge_hash_with(
        &self,
        hash: ObjectHash,
        resolver: &mut dyn ConflictResolver,
    ) -> Result<MergeOutcome> {
        let version = self.store.load_version(&hash)?;
        self.merge(hash, &format!("\"{}\"", version.message), resolver)
    }

    fn merge(
        &self,
        theirs: ObjectHash,
        name: &str,
        resolver: &mut dyn ConflictResolver,
    ) -> Result<MergeOutcome> {
        let Head::Attached { branch, merging } = self.branches.load_head()? else {
            return Err(Error::DetachedHead("merge"));
        };
        if merging.is_some() {
            return Err(Error::UnresolvedConflicts);
        }
        self.ensure_clean()?;

        let ours = self.branches.load(&branch)?;
        if merge::ancestors(&self.store, ours)?.contains(&theirs) {
            return Ok(MergeOutcome::UpToDate);
        }
        let their_version = self.store.load_version(&theirs)?;
        if merge::ancestors(&self.store, theirs)?.contains(&ours) {
            self.restore_worktree(&their_version.tree)?;
            self.branches.write(&branch, &theirs)?;
            tracing::info!("fast-forwarded {} to {}", branch, theirs);
            return Ok(MergeOutcome::FastForward(theirs));
        }

        let base = merge::find_base(&self.store, ours, theirs)?
            .ok_or_else(|| Error::InvalidInput(format!("{} shares no history with {}", name, branch)))?;
        let our_tree = self.store.load_version(&ours)?.tree;
        let base_tree = self.store.load_version(&base)?.tree;
        let merged = merge::merge_trees(&self.store, resolver, &base_tree, &our_tree, &their_version.tree)?;
        self.restore_worktree(&merged.tree)?;

        if merged.conflicts.is_empty() {
            let message = format!("merged {} into {}", name, branch);
            let hash = self.commit(&branch, &message, merged.tree, Parents::Merge { prev: ours, merged: theirs })?;
            return Ok(MergeOutcome::Merged(hash));
        }

        // Stage the clean part of the merge, then mark what is left
        let mut index = Index::load(&self.gud_dir)?;
        index.add(&self.root, &self.store, &our_tree, &[String::new()])?;
        for conflict in &merged.conflicts {
            let abs = worktree::abs_path(&self.root, &conflict.path);
            let (size, mtime, ctime) = worktree::file_stat(&fs::metadata(&abs)?);
            index.stage(IndexEntry {
                path: conflict.path.clone(),
                state: FileState::Conflict,
                hash: conflict.hash,
                size,
                mtime,
                ctime,
            });
        }
        index.save()?;
        self.branches.write_head(&Head::Attached {
            branch,
            merging: Some(theirs),
        })?;
        let paths: Vec<String> = merged.conflicts.into_iter().map(|c| c.path).collect();
        tracing::warn!("merge of {} stopped on {} conflict(s)", name, paths.len());
        Err(Error::MergeConflicts(paths))
    }

    // ==================== Sync ====================

    /// Write the history of `branch` after `start` as a multipart stream
    pub fn push_branch<W: Write>(
        &self,
        out: W,
        branch: &str,
        start: Option<ObjectHash>,
    ) -> Result<Push> {
        sync::push(&self.store, &self.branches, branch, out, start)
    }

    /// Apply a pushed stream to `branch`
    pub fn pull_branch<R: Read>(
        &self,
        branch: &str,
        input: R,
        content_type: &str,
    ) -> Result<PullOutcome> {
        self.pull_branch_from(branch, input, content_type, None)
    }

    /// Apply a pushed stream, accepting only versions by `author` when given
    pub fn pull_branch_from<R: Read>(
        &self,
        branch: &str,
        input: R,
        content_type: &str,
        author: Option<&str>,
    ) -> Result<PullOutcome> {
        sync::pull(&self.store, &self.branches, branch, input, content_type, author)
    }
}

/// Staged changes grouped by directory
#[derive(Default)]
struct DirChanges<'a> {
    files: BTreeMap<&'a str, &'a IndexEntry>,
    dirs: BTreeMap<&'a str, DirChanges<'a>>,
}

impl<'a> DirChanges<'a> {
    fn insert(&mut self, entry: &'a IndexEntry) {
        let mut node = self;
        let mut parts = entry.path.split('/').peekable();
        while let Some(part) = parts.next() {
            if parts.peek().is_none() {
                node.files.insert(part, entry);
            } else {
                node = node.dirs.entry(part).or_default();
            }
        }
    }

    /// Entries of `tree` with these changes applied. Subdirectories go first
    /// so a file can replace a directory that lost all of its content.
    fn apply<S: ObjectStore>(
        &self,
        store: &S,
        tree: Option<&ObjectHash>,
        depth: usize,
    ) -> Result<Vec<TreeEntry>> {
        if depth > MAX_TREE_DEPTH {
            return Err(Error::InvalidInput("staged paths nest too deep".into()));
        }
        let mut entries: BTreeMap<String, TreeEntry> = match tree {
            Some(hash) => store
                .load_tree(hash)?
                .into_entries()
                .into_iter()
                .map(|e| (e.name.clone(), e))
                .collect(),
            None => BTreeMap::new(),
        };

        for (&name, changes) in &self.dirs {
            let existing = entries.get(name).filter(|e| e.is_tree()).map(|e| e.hash);
            let sub = changes.apply(store, existing.as_ref(), depth + 1)?;
            if sub.is_empty() {
                if existing.is_some() {
                    entries.remove(name);
                }
            } else {
                let hash = store.put_tree(sub)?;
                entries.insert(name.to_string(), TreeEntry::new(name, hash, EntryKind::Tree));
            }
        }

        for (&name, entry) in &self.files {
            match entry.state {
                FileState::Removed => {
                    if entries.get(name).is_some_and(|e| !e.is_tree()) {
                        entries.remove(name);
                    }
                }
                FileState::New | FileState::Modified | FileState::Conflict => {
                    entries.insert(
                        name.to_string(),
                        TreeEntry::new(name, entry.hash, EntryKind::Blob),
                    );
                }
            }
        }
        Ok(entries.into_values().collect())
    }
}
