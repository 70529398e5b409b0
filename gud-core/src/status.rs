//! Status and diff engine
//!
//! Compares the working directory against a tree with a sorted merge-join,
//! consulting the index so that staged changes are not reported again. The
//! same walk, run against another version's tree with an empty index, tells
//! checkout which files to delete and which to write.

use crate::error::{Error, Result};
use crate::hash::ObjectHash;
use crate::index::{FileState, Index};
use crate::object::{EntryKind, Tree, TreeEntry};
use crate::store::{MAX_TREE_DEPTH, ObjectStore, join_path};
use crate::worktree::{self, DirItem};
use std::cmp::Ordering;
use std::path::Path;

/// Walk the working directory against `tree`, reporting unstaged changes.
pub fn diff_worktree<S, F>(
    root: &Path,
    store: &S,
    tree: &ObjectHash,
    index: &Index,
    f: F,
) -> Result<()>
where
    S: ObjectStore,
    F: FnMut(&str, FileState) -> Result<()>,
{
    let mut walker = Walker {
        root,
        store,
        index,
        report: f,
    };
    let tree = store.load_tree(tree)?;
    walker.compare_tree("", &tree, 0)
}

struct Walker<'a, S, F> {
    root: &'a Path,
    store: &'a S,
    index: &'a Index,
    report: F,
}

impl<S, F> Walker<'_, S, F>
where
    S: ObjectStore,
    F: FnMut(&str, FileState) -> Result<()>,
{
    fn compare_tree(&mut self, rel: &str, tree: &Tree, depth: usize) -> Result<()> {
        if depth > MAX_TREE_DEPTH {
            return Err(Error::CorruptStore(format!(
                "tree nesting deeper than {} at {}",
                MAX_TREE_DEPTH, rel
            )));
        }
        let items = worktree::list_dir(self.root, rel)?;
        let objs = tree.entries();
        let (mut i, mut j) = (0, 0);

        while i < items.len() || j < objs.len() {
            let order = match (items.get(i), objs.get(j)) {
                (Some(item), Some(obj)) => item.name.as_str().cmp(obj.name.as_str()),
                (Some(_), None) => Ordering::Less,
                _ => Ordering::Greater,
            };
            match order {
                Ordering::Less => {
                    let item = &items[i];
                    i += 1;
                    self.report_new(&join_path(rel, &item.name), item)?;
                }
                Ordering::Greater => {
                    let obj = &objs[j];
                    j += 1;
                    self.report_removed(&join_path(rel, &obj.name), obj)?;
                }
                Ordering::Equal => {
                    let (item, obj) = (&items[i], &objs[j]);
                    i += 1;
                    j += 1;
                    let path = join_path(rel, &item.name);
                    match (obj.kind, item.is_dir) {
                        (EntryKind::Blob, true) => {
                            self.report_removed_file(&path)?;
                            self.report_new_dir(&path)?;
                        }
                        (EntryKind::Tree, false) => {
                            self.report_removed_dir(&path, &obj.hash)?;
                            self.report_new_file(&path)?;
                        }
                        (EntryKind::Tree, true) => {
                            let inner = self.store.load_tree(&obj.hash)?;
                            self.compare_tree(&path, &inner, depth + 1)?;
                        }
                        (EntryKind::Blob, false) => self.compare_file(&path, &obj.hash)?,
                    }
                }
            }
        }
        Ok(())
    }

    fn report_new(&mut self, path: &str, item: &DirItem) -> Result<()> {
        if item.is_dir {
            self.report_new_dir(path)
        } else {
            self.report_new_file(path)
        }
    }

    fn report_removed(&mut self, path: &str, obj: &TreeEntry) -> Result<()> {
        match obj.kind {
            EntryKind::Tree => self.report_removed_dir(path, &obj.hash),
            EntryKind::Blob => self.report_removed_file(path),
        }
    }

    fn report_new_dir(&mut self, path: &str) -> Result<()> {
        for file in worktree::files_under(self.root, path)? {
            self.report_new_file(&file)?;
        }
        Ok(())
    }

    fn report_new_file(&mut self, path: &str) -> Result<()> {
        if let Some(entry) = self.index.get(path) {
            if entry.state != FileState::Removed {
                if worktree::file_hash(self.root, path)? != entry.hash {
                    (self.report)(path, FileState::Modified)?;
                }
                return Ok(());
            }
        }
        (self.report)(path, FileState::New)
    }

    fn report_removed_dir(&mut self, path: &str, hash: &ObjectHash) -> Result<()> {
        let mut removed = Vec::new();
        self.store.walk_blobs(hash, path, |blob_path, _| {
            removed.push(blob_path.to_string());
            Ok(())
        })?;
        for blob_path in removed {
            self.report_removed_file(&blob_path)?;
        }
        Ok(())
    }

    fn report_removed_file(&mut self, path: &str) -> Result<()> {
        match self.index.get(path) {
            Some(entry) if entry.state == FileState::Removed => Ok(()),
            _ => (self.report)(path, FileState::Removed),
        }
    }

    fn compare_file(&mut self, path: &str, tree_hash: &ObjectHash) -> Result<()> {
        let expected = match self.index.get(path) {
            Some(entry) if entry.state == FileState::Removed => {
                // deleted, staged, then recreated
                return (self.report)(path, FileState::New);
            }
            Some(entry) => entry.hash,
            None => *tree_hash,
        };
        if worktree::file_hash(self.root, path)? != expected {
            (self.report)(path, FileState::Modified)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexEntry;
    use crate::store::DiskStore;
    use std::fs;
    use tempfile::TempDir;

    fn setup() -> (TempDir, DiskStore, Index) {
        let tmp = TempDir::new().unwrap();
        let gud = tmp.path().join(worktree::GUD_DIR);
        fs::create_dir(&gud).unwrap();
        let store = DiskStore::open(gud.join("objects")).unwrap();
        let index = Index::init(&gud).unwrap();
        (tmp, store, index)
    }

    fn collect(
        root: &Path,
        store: &DiskStore,
        tree: &ObjectHash,
        index: &Index,
    ) -> Vec<(String, FileState)> {
        let mut changes = Vec::new();
        diff_worktree(root, store, tree, index, |path, state| {
            changes.push((path.to_string(), state));
            Ok(())
        })
        .unwrap();
        changes
    }

    fn change(path: &str, state: FileState) -> (String, FileState) {
        (path.to_string(), state)
    }

    #[test]
    fn test_clean_tree_reports_nothing() {
        let (tmp, store, index) = setup();
        let blob = store.put_blob(b"content").unwrap();
        let sub = store
            .put_tree(vec![TreeEntry::new("f", blob, EntryKind::Blob)])
            .unwrap();
        let tree = store
            .put_tree(vec![
                TreeEntry::new("a.txt", blob, EntryKind::Blob),
                TreeEntry::new("d", sub, EntryKind::Tree),
            ])
            .unwrap();
        worktree::write_file(tmp.path(), "a.txt", b"content").unwrap();
        worktree::write_file(tmp.path(), "d/f", b"content").unwrap();

        assert!(collect(tmp.path(), &store, &tree, &index).is_empty());
    }

    #[test]
    fn test_new_removed_modified() {
        let (tmp, store, index) = setup();
        let one = store.put_blob(b"one").unwrap();
        let sub = store
            .put_tree(vec![TreeEntry::new("x", one, EntryKind::Blob)])
            .unwrap();
        let tree = store
            .put_tree(vec![
                TreeEntry::new("gone", sub, EntryKind::Tree),
                TreeEntry::new("mod.txt", one, EntryKind::Blob),
            ])
            .unwrap();
        worktree::write_file(tmp.path(), "mod.txt", b"two").unwrap();
        worktree::write_file(tmp.path(), "fresh/deep/n.txt", b"n").unwrap();

        assert_eq!(
            collect(tmp.path(), &store, &tree, &index),
            vec![
                change("fresh/deep/n.txt", FileState::New),
                change("gone/x", FileState::Removed),
                change("mod.txt", FileState::Modified),
            ]
        );
    }

    #[test]
    fn test_kind_change() {
        let (tmp, store, index) = setup();
        let blob = store.put_blob(b"b").unwrap();
        let sub = store
            .put_tree(vec![TreeEntry::new("inner", blob, EntryKind::Blob)])
            .unwrap();
        let tree = store
            .put_tree(vec![
                TreeEntry::new("was_dir", sub, EntryKind::Tree),
                TreeEntry::new("was_file", blob, EntryKind::Blob),
            ])
            .unwrap();
        worktree::write_file(tmp.path(), "was_dir", b"now a file").unwrap();
        worktree::write_file(tmp.path(), "was_file/child", b"now a dir").unwrap();

        assert_eq!(
            collect(tmp.path(), &store, &tree, &index),
            vec![
                change("was_dir/inner", FileState::Removed),
                change("was_dir", FileState::New),
                change("was_file", FileState::Removed),
                change("was_file/child", FileState::New),
            ]
        );
    }

    #[test]
    fn test_staged_changes_are_not_repeated() {
        let (tmp, store, mut index) = setup();
        let old = store.put_blob(b"old").unwrap();
        let tree = store
            .put_tree(vec![
                TreeEntry::new("deleted.txt", old, EntryKind::Blob),
                TreeEntry::new("edited.txt", old, EntryKind::Blob),
            ])
            .unwrap();
        worktree::write_file(tmp.path(), "edited.txt", b"new").unwrap();
        worktree::write_file(tmp.path(), "added.txt", b"added").unwrap();
        let root = tmp.path().to_path_buf();
        index
            .add(&root, &store, &tree, &["".to_string()])
            .unwrap();
        assert_eq!(index.len(), 3);
        assert!(collect(&root, &store, &tree, &index).is_empty());

        // edit after staging shows up again
        worktree::write_file(&root, "added.txt", b"edited again").unwrap();
        assert_eq!(
            collect(&root, &store, &tree, &index),
            vec![change("added.txt", FileState::Modified)]
        );
    }

    #[test]
    fn test_recreated_after_staged_removal() {
        let (tmp, store, mut index) = setup();
        let blob = store.put_blob(b"x").unwrap();
        let tree = store
            .put_tree(vec![TreeEntry::new("f", blob, EntryKind::Blob)])
            .unwrap();
        index.stage(IndexEntry::removed("f", blob));
        worktree::write_file(tmp.path(), "f", b"x").unwrap();

        assert_eq!(
            collect(tmp.path(), &store, &tree, &index),
            vec![change("f", FileState::New)]
        );
    }
}
