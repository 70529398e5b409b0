//! Working directory access
//!
//! Paths handed around the engine are project-relative, `/`-separated UTF-8
//! strings with no leading `./`; the empty string names the project root.
//! Symlinks and other special files are not tracked.

use crate::error::{Error, Result};
use crate::hash::ObjectHash;
use chrono::{DateTime, Utc};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Metadata directory at the project root
pub const GUD_DIR: &str = ".gud";

/// A regular file or directory found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DirItem {
    pub name: String,
    pub is_dir: bool,
}

/// Absolute location of a project-relative path
pub(crate) fn abs_path(root: &Path, rel: &str) -> PathBuf {
    if rel.is_empty() {
        root.to_path_buf()
    } else {
        root.join(rel)
    }
}

/// List a directory sorted by name. The metadata directory is hidden at the root.
pub(crate) fn list_dir(root: &Path, rel: &str) -> Result<Vec<DirItem>> {
    let mut items = Vec::new();
    for entry in fs::read_dir(abs_path(root, rel))? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if !file_type.is_dir() && !file_type.is_file() {
            continue;
        }
        let Ok(name) = entry.file_name().into_string() else {
            tracing::warn!("skipping non UTF-8 file name in {:?}", abs_path(root, rel));
            continue;
        };
        if rel.is_empty() && name == GUD_DIR {
            continue;
        }
        items.push(DirItem {
            name,
            is_dir: file_type.is_dir(),
        });
    }
    items.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(items)
}

/// Every file at or below `rel`, in sorted depth-first order.
/// A missing path yields nothing.
pub(crate) fn files_under(root: &Path, rel: &str) -> Result<Vec<String>> {
    let meta = match fs::symlink_metadata(abs_path(root, rel)) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    if meta.is_file() {
        return Ok(vec![rel.to_string()]);
    }
    if !meta.is_dir() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    let mut stack = vec![rel.to_string()];
    while let Some(dir) = stack.pop() {
        let mut subdirs = Vec::new();
        for item in list_dir(root, &dir)? {
            let path = crate::store::join_path(&dir, &item.name);
            if item.is_dir {
                subdirs.push(path);
            } else {
                files.push(path);
            }
        }
        stack.extend(subdirs.into_iter().rev());
    }
    files.sort();
    Ok(files)
}

/// Whether a regular file exists at `rel`
pub(crate) fn is_file(root: &Path, rel: &str) -> bool {
    fs::symlink_metadata(abs_path(root, rel))
        .map(|m| m.is_file())
        .unwrap_or(false)
}

/// Hash of a file's content, as its blob would be named
pub(crate) fn file_hash(root: &Path, rel: &str) -> Result<ObjectHash> {
    Ok(ObjectHash::of(&fs::read(abs_path(root, rel))?))
}

/// Size, modification and change times of a file
pub(crate) fn file_stat(meta: &fs::Metadata) -> (u64, DateTime<Utc>, DateTime<Utc>) {
    let mtime = meta
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());
    (meta.len(), mtime, change_time(meta).unwrap_or(mtime))
}

#[cfg(unix)]
fn change_time(meta: &fs::Metadata) -> Option<DateTime<Utc>> {
    use std::os::unix::fs::MetadataExt;
    DateTime::from_timestamp(meta.ctime(), meta.ctime_nsec() as u32)
}

#[cfg(not(unix))]
fn change_time(meta: &fs::Metadata) -> Option<DateTime<Utc>> {
    meta.created().ok().map(DateTime::<Utc>::from)
}

/// Turn a user supplied path into a project-relative one.
///
/// Relative paths are taken relative to the project root. The result never
/// escapes the root and never points into the metadata directory.
pub fn relative_path(root: &Path, path: &Path) -> Result<String> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    };
    let outside = || Error::OutsideProject(path.display().to_string());
    let rel = joined.strip_prefix(root).map_err(|_| outside())?;

    let mut parts: Vec<&str> = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => parts.push(
                part.to_str()
                    .ok_or_else(|| Error::InvalidInput(format!("non UTF-8 path {:?}", path)))?,
            ),
            Component::CurDir => {}
            Component::ParentDir => {
                if parts.pop().is_none() {
                    return Err(outside());
                }
            }
            Component::RootDir | Component::Prefix(_) => return Err(outside()),
        }
    }
    if parts.first() == Some(&GUD_DIR) {
        return Err(Error::InvalidInput(format!(
            "{} is inside the metadata directory",
            path.display()
        )));
    }
    Ok(parts.join("/"))
}

/// Whether `path` is `dir` itself or lies below it
pub(crate) fn is_under(path: &str, dir: &str) -> bool {
    dir.is_empty()
        || path == dir
        || (path.len() > dir.len() && path.starts_with(dir) && path.as_bytes()[dir.len()] == b'/')
}

/// Write file content, creating parent directories as needed
pub(crate) fn write_file(root: &Path, rel: &str, data: &[u8]) -> Result<()> {
    let path = abs_path(root, rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, data)?;
    Ok(())
}

/// Delete a file and then every directory it leaves empty, up to the root
pub(crate) fn remove_file(root: &Path, rel: &str) -> Result<()> {
    match fs::remove_file(abs_path(root, rel)) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    let mut dir = rel;
    while let Some((parent, _)) = dir.rsplit_once('/') {
        let path = abs_path(root, parent);
        let empty = match fs::read_dir(&path) {
            Ok(mut entries) => entries.next().is_none(),
            Err(_) => false,
        };
        if !empty {
            break;
        }
        fs::remove_dir(&path)?;
        dir = parent;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_relative_path() {
        let root = Path::new("/work/project");
        assert_eq!(relative_path(root, Path::new("a/b.txt")).unwrap(), "a/b.txt");
        assert_eq!(relative_path(root, Path::new("/work/project/a")).unwrap(), "a");
        assert_eq!(relative_path(root, Path::new("./a/../b")).unwrap(), "b");
        assert_eq!(relative_path(root, Path::new(".")).unwrap(), "");
        assert!(matches!(
            relative_path(root, Path::new("../other")),
            Err(Error::OutsideProject(_))
        ));
        assert!(matches!(
            relative_path(root, Path::new("/elsewhere/file")),
            Err(Error::OutsideProject(_))
        ));
        assert!(matches!(
            relative_path(root, Path::new(".gud/head")),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_is_under() {
        assert!(is_under("a/b", ""));
        assert!(is_under("a/b", "a"));
        assert!(is_under("a", "a"));
        assert!(!is_under("ab", "a"));
        assert!(!is_under("a", "a/b"));
    }

    #[test]
    fn test_list_dir_hides_metadata() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join(GUD_DIR)).unwrap();
        fs::create_dir(tmp.path().join("sub")).unwrap();
        fs::write(tmp.path().join("b.txt"), "b").unwrap();
        fs::write(tmp.path().join("a.txt"), "a").unwrap();

        let names: Vec<_> = list_dir(tmp.path(), "")
            .unwrap()
            .into_iter()
            .map(|item| item.name)
            .collect();
        assert_eq!(names, vec!["a.txt", "b.txt", "sub"]);
    }

    #[test]
    fn test_files_under() {
        let tmp = TempDir::new().unwrap();
        write_file(tmp.path(), "d/x/1.txt", b"1").unwrap();
        write_file(tmp.path(), "d/2.txt", b"2").unwrap();
        write_file(tmp.path(), "top.txt", b"t").unwrap();

        assert_eq!(
            files_under(tmp.path(), "").unwrap(),
            vec!["d/2.txt", "d/x/1.txt", "top.txt"]
        );
        assert_eq!(files_under(tmp.path(), "top.txt").unwrap(), vec!["top.txt"]);
        assert!(files_under(tmp.path(), "missing").unwrap().is_empty());
    }

    #[test]
    fn test_remove_file_prunes_empty_dirs() {
        let tmp = TempDir::new().unwrap();
        write_file(tmp.path(), "a/b/c.txt", b"c").unwrap();
        write_file(tmp.path(), "a/keep.txt", b"k").unwrap();

        remove_file(tmp.path(), "a/b/c.txt").unwrap();
        assert!(!tmp.path().join("a/b").exists());
        assert!(tmp.path().join("a/keep.txt").exists());
    }
}
