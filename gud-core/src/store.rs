//! Content-addressed object storage
//!
//! Objects live as individual files under `objects/`, named by the lowercase
//! hex hash of the object. Blobs are stored zlib-compressed; trees and versions
//! are stored in their canonical bincode encoding, so for those the file bytes
//! hash to the file name.
//!
//! Two stores implement [`ObjectStore`]:
//! - [`DiskStore`]: the project's own object directory
//! - [`OverlayStore`]: a scratch directory layered over a read-only base,
//!   used to stage a pull before anything touches the base

use crate::error::{Error, Result};
use crate::hash::ObjectHash;
use crate::object::{
    EntryKind, ObjectKind, Tree, TreeEntry, Version, compress_blob, decompress_blob,
};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Deepest directory nesting any tree walk will follow.
pub const MAX_TREE_DEPTH: usize = 256;

/// A decoded object of any kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Object {
    Blob(Vec<u8>),
    Tree(Tree),
    Version(Version),
}

impl Object {
    pub fn kind(&self) -> ObjectKind {
        match self {
            Object::Blob(_) => ObjectKind::Blob,
            Object::Tree(_) => ObjectKind::Tree,
            Object::Version(_) => ObjectKind::Version,
        }
    }
}

/// Generic object store interface
///
/// Implementors only provide raw file access; the typed operations are shared.
pub trait ObjectStore {
    /// Check if an object exists
    fn contains(&self, hash: &ObjectHash) -> bool;

    /// Read the stored bytes of an object
    fn read_raw(&self, hash: &ObjectHash) -> Result<Vec<u8>>;

    /// Store bytes under a hash. Returns false when the object already existed.
    fn write_raw(&self, hash: &ObjectHash, data: &[u8]) -> Result<bool>;

    /// Store file content as a blob
    fn put_blob(&self, data: &[u8]) -> Result<ObjectHash> {
        let hash = ObjectHash::of(data);
        if !self.contains(&hash) {
            self.write_raw(&hash, &compress_blob(data)?)?;
        }
        Ok(hash)
    }

    /// Store a directory listing. Entries must be sorted and unique.
    fn put_tree(&self, entries: Vec<TreeEntry>) -> Result<ObjectHash> {
        self.put_tree_object(&Tree::new(entries)?)
    }

    fn put_tree_object(&self, tree: &Tree) -> Result<ObjectHash> {
        let data = tree.to_bytes()?;
        let hash = ObjectHash::of(&data);
        self.write_raw(&hash, &data)?;
        Ok(hash)
    }

    fn put_version(&self, version: &Version) -> Result<ObjectHash> {
        let data = version.to_bytes()?;
        let hash = ObjectHash::of(&data);
        self.write_raw(&hash, &data)?;
        Ok(hash)
    }

    /// Load and decompress a blob
    fn load_blob(&self, hash: &ObjectHash) -> Result<Vec<u8>> {
        decompress_blob(&self.read_raw(hash)?)
    }

    /// Load a tree. A stored tree that fails validation means the store is corrupt.
    fn load_tree(&self, hash: &ObjectHash) -> Result<Tree> {
        Tree::from_bytes(&self.read_raw(hash)?).map_err(|e| Error::corrupt(hash, e))
    }

    fn load_version(&self, hash: &ObjectHash) -> Result<Version> {
        Version::from_bytes(&self.read_raw(hash)?)
    }

    /// Load any object given the kind it is expected to be
    fn get(&self, hash: &ObjectHash, kind: ObjectKind) -> Result<Object> {
        Ok(match kind {
            ObjectKind::Blob => Object::Blob(self.load_blob(hash)?),
            ObjectKind::Tree => Object::Tree(self.load_tree(hash)?),
            ObjectKind::Version => Object::Version(self.load_version(hash)?),
        })
    }

    /// Resolve a `/`-separated path inside a tree
    fn find_entry(&self, root: &ObjectHash, path: &str) -> Result<Option<TreeEntry>> {
        let mut tree = self.load_tree(root)?;
        let mut parts = path.split('/').filter(|p| !p.is_empty()).peekable();
        while let Some(part) = parts.next() {
            let Some(entry) = tree.get(part).cloned() else {
                return Ok(None);
            };
            if parts.peek().is_none() {
                return Ok(Some(entry));
            }
            if !entry.is_tree() {
                return Ok(None);
            }
            tree = self.load_tree(&entry.hash)?;
        }
        Ok(None)
    }

    /// Visit every blob below a tree. Blobs of a directory are reported in
    /// tree order before its subdirectories are entered.
    ///
    /// `prefix` is prepended to the reported paths. The walk keeps an explicit
    /// stack of `(path, hash, depth)` and fails on nesting beyond
    /// [`MAX_TREE_DEPTH`].
    fn walk_blobs<F>(&self, tree: &ObjectHash, prefix: &str, mut f: F) -> Result<()>
    where
        Self: Sized,
        F: FnMut(&str, &TreeEntry) -> Result<()>,
    {
        let mut stack = vec![(prefix.to_string(), *tree, 0usize)];
        while let Some((dir, hash, depth)) = stack.pop() {
            if depth > MAX_TREE_DEPTH {
                return Err(Error::corrupt(hash, "tree nesting too deep"));
            }
            let tree = self.load_tree(&hash)?;
            // Push subtrees in reverse so they pop in tree order
            let mut subtrees = Vec::new();
            for entry in tree.iter() {
                let path = join_path(&dir, &entry.name);
                match entry.kind {
                    EntryKind::Blob => f(&path, entry)?,
                    EntryKind::Tree => subtrees.push((path, entry.hash, depth + 1)),
                }
            }
            stack.extend(subtrees.into_iter().rev());
        }
        Ok(())
    }
}

/// Join a relative directory and a name with `/`
pub fn join_path(dir: &str, name: &str) -> String {
    if dir.is_empty() || dir == "." {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

// ==================== Disk store ====================

/// Flat directory of object files
#[derive(Debug, Clone)]
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    /// Open or create an object directory
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn object_path(&self, hash: &ObjectHash) -> PathBuf {
        self.root.join(hash.to_hex())
    }

    /// List every object hash in the store
    pub fn list(&self) -> Result<Vec<ObjectHash>> {
        let mut hashes = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if let Some(hash) = entry
                .file_name()
                .to_str()
                .and_then(|name| ObjectHash::from_hex(name).ok())
            {
                hashes.push(hash);
            }
        }
        hashes.sort();
        Ok(hashes)
    }

    /// Move or copy an object file from another directory into this store.
    fn import_file(&self, hash: &ObjectHash, src: &Path) -> Result<bool> {
        let path = self.object_path(hash);
        if path.exists() {
            return Ok(false);
        }
        let tmp_path = path.with_extension("tmp");
        if fs::rename(src, &tmp_path).is_err() {
            // Different filesystem
            fs::copy(src, &tmp_path)?;
        }
        fs::rename(&tmp_path, &path)?;
        Ok(true)
    }
}

impl ObjectStore for DiskStore {
    fn contains(&self, hash: &ObjectHash) -> bool {
        self.object_path(hash).exists()
    }

    fn read_raw(&self, hash: &ObjectHash) -> Result<Vec<u8>> {
        match fs::read(self.object_path(hash)) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Error::ObjectNotFound(*hash)),
            Err(e) => Err(e.into()),
        }
    }

    fn write_raw(&self, hash: &ObjectHash, data: &[u8]) -> Result<bool> {
        let path = self.object_path(hash);
        if path.exists() {
            return Ok(false); // content-addressed = idempotent
        }
        // Write atomically via temp file
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, data)?;
        fs::rename(&tmp_path, &path)?;
        tracing::trace!("stored object {} ({} bytes)", hash, data.len());
        Ok(true)
    }
}

// ==================== Overlay store ====================

/// Temporary store layered over a read-only base
///
/// Reads fall through to the base; writes of objects the base lacks land in a
/// scratch directory. Nothing reaches the base until [`OverlayStore::promote`].
/// Dropping the overlay discards everything it staged.
pub struct OverlayStore<'a> {
    base: &'a DiskStore,
    upper: DiskStore,
    _scratch: TempDir,
}

impl<'a> OverlayStore<'a> {
    /// Create an overlay whose scratch directory sits next to the base
    pub fn new(base: &'a DiskStore) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(".staging-");
        let scratch = match base.root().parent() {
            Some(parent) => builder.tempdir_in(parent)?,
            None => builder.tempdir()?,
        };
        let upper = DiskStore::open(scratch.path().join("objects"))?;
        Ok(Self {
            base,
            upper,
            _scratch: scratch,
        })
    }

    /// Whether the object was staged by this overlay (rather than inherited)
    pub fn is_staged(&self, hash: &ObjectHash) -> bool {
        self.upper.contains(hash)
    }

    /// Move every staged object into the base store
    pub fn promote(self) -> Result<usize> {
        let mut moved = 0;
        for hash in self.upper.list()? {
            if self.base.import_file(&hash, &self.upper.object_path(&hash))? {
                moved += 1;
            }
        }
        tracing::debug!("promoted {} staged objects into {:?}", moved, self.base.root());
        Ok(moved)
    }
}

impl ObjectStore for OverlayStore<'_> {
    fn contains(&self, hash: &ObjectHash) -> bool {
        self.upper.contains(hash) || self.base.contains(hash)
    }

    fn read_raw(&self, hash: &ObjectHash) -> Result<Vec<u8>> {
        if self.upper.contains(hash) {
            self.upper.read_raw(hash)
        } else {
            self.base.read_raw(hash)
        }
    }

    fn write_raw(&self, hash: &ObjectHash, data: &[u8]) -> Result<bool> {
        if self.base.contains(hash) {
            return Ok(false);
        }
        self.upper.write_raw(hash, data)
    }
}
