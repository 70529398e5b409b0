//! Branch and head pointers
//!
//! Layout on disk:
//! ```text
//! .gud/
//!   branches/{name}   exactly 20 raw hash bytes; `/` in a name nests directories
//!   head              bincode-encoded [`Head`]
//! ```

use crate::error::{Error, Result};
use crate::hash::{HASH_LEN, ObjectHash};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Branch created by a fresh project
pub const FIRST_BRANCH: &str = "master";

const BRANCHES_DIR: &str = "branches";
const HEAD_FILE: &str = "head";

/// What the working directory is based on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Head {
    /// Following a branch. `merging` holds the second parent of an
    /// in-progress merge that is waiting for its conflicts to be solved.
    Attached {
        branch: String,
        merging: Option<ObjectHash>,
    },
    /// Pinned to a version
    Detached { hash: ObjectHash },
}

impl Head {
    pub fn attached(branch: impl Into<String>) -> Self {
        Head::Attached {
            branch: branch.into(),
            merging: None,
        }
    }

    pub fn branch(&self) -> Option<&str> {
        match self {
            Head::Attached { branch, .. } => Some(branch),
            Head::Detached { .. } => None,
        }
    }

    pub fn is_detached(&self) -> bool {
        matches!(self, Head::Detached { .. })
    }
}

/// Branch files and the head file of one project
#[derive(Debug, Clone)]
pub struct Branches {
    gud_dir: PathBuf,
}

impl Branches {
    /// Create the branches directory
    pub fn init(gud_dir: &Path) -> Result<Self> {
        fs::create_dir_all(gud_dir.join(BRANCHES_DIR))?;
        Ok(Self::open(gud_dir))
    }

    pub fn open(gud_dir: &Path) -> Self {
        Self {
            gud_dir: gud_dir.to_path_buf(),
        }
    }

    fn root(&self) -> PathBuf {
        self.gud_dir.join(BRANCHES_DIR)
    }

    fn branch_path(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.root().join(name))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.branch_path(name).map(|p| p.is_file()).unwrap_or(false)
    }

    /// Point a branch at a hash, creating it (and its parent directories) if needed
    pub fn write(&self, name: &str, hash: &ObjectHash) -> Result<()> {
        let path = self.branch_path(name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        write_atomic(&path, hash.as_bytes())?;
        tracing::debug!("branch {} -> {}", name, hash);
        Ok(())
    }

    /// Resolve a branch; a missing branch is `BranchNotFound`
    pub fn load(&self, name: &str) -> Result<ObjectHash> {
        self.get(name)?
            .ok_or_else(|| Error::BranchNotFound(name.to_string()))
    }

    /// Resolve a branch if it exists
    pub fn get(&self, name: &str) -> Result<Option<ObjectHash>> {
        let path = self.branch_path(name)?;
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if data.len() != HASH_LEN {
            return Err(Error::CorruptBranch(format!(
                "{} holds {} bytes, expected {}",
                name,
                data.len(),
                HASH_LEN
            )));
        }
        Ok(ObjectHash::from_slice(&data))
    }

    /// Visit every branch name in sorted order
    pub fn list<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&str) -> Result<()>,
    {
        let mut names = Vec::new();
        collect_names(&self.root(), "", &mut names)?;
        names.sort();
        for name in &names {
            f(name)?;
        }
        Ok(())
    }

    pub fn load_head(&self) -> Result<Head> {
        let data = fs::read(self.gud_dir.join(HEAD_FILE))?;
        bincode::deserialize(&data).map_err(|e| Error::corrupt("invalid head file", e))
    }

    pub fn write_head(&self, head: &Head) -> Result<()> {
        let data = bincode::serialize(head).map_err(|e| Error::corrupt("cannot encode head", e))?;
        write_atomic(&self.gud_dir.join(HEAD_FILE), &data)
    }

    /// Resolve the head to a version hash
    pub fn current_hash(&self) -> Result<ObjectHash> {
        match self.load_head()? {
            Head::Attached { branch, .. } => self.load(&branch),
            Head::Detached { hash } => Ok(hash),
        }
    }
}

/// Branch names are `/`-separated segments; no segment may be empty or start with `.`
fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidInput("branch name cannot be empty".into()));
    }
    let bad_segment = name
        .split('/')
        .any(|seg| seg.is_empty() || seg.starts_with('.') || seg.contains('\\'));
    if bad_segment {
        return Err(Error::InvalidInput(format!("invalid branch name: {}", name)));
    }
    Ok(())
}

fn collect_names(dir: &Path, prefix: &str, names: &mut Vec<String>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        if file_name.starts_with('.') {
            continue;
        }
        let name = if prefix.is_empty() {
            file_name.to_string()
        } else {
            format!("{}/{}", prefix, file_name)
        };
        if entry.file_type()?.is_dir() {
            collect_names(&entry.path(), &name, names)?;
        } else {
            names.push(name);
        }
    }
    Ok(())
}

/// Write a small file via a dot-prefixed sibling and rename it into place
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::InvalidInput(format!("invalid file path {:?}", path)))?;
    let tmp_path = path.with_file_name(format!(".{}.tmp", file_name));
    fs::write(&tmp_path, data)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}
