//! Gud Core Library
//!
//! Core functionality for gud including:
//! - Object model (Blob, Tree, Version) and content hashing
//! - Content-addressed object store on disk, with a staging overlay
//! - Staging index and working-directory status
//! - Branches and the head pointer
//! - Three-way tree merge with pluggable conflict resolution
//! - Multipart push/pull synchronization
//! - The `Project` handle tying it all together

pub mod branch;
pub mod config;
pub mod error;
pub mod hash;
pub mod index;
pub mod merge;
pub mod multipart;
pub mod object;
pub mod project;
pub mod status;
pub mod store;
pub mod sync;
pub mod worktree;

pub use branch::{Branches, FIRST_BRANCH, Head};
pub use config::Config;
pub use error::{Error, Result};
pub use hash::{HASH_LEN, ObjectHash};
pub use index::{FileState, INDEX_FORMAT, Index, IndexEntry};
pub use merge::{BlobConflict, ConflictResolver, KeepConflicts, MergeConflict, Resolution};
pub use object::{EntryKind, ObjectKind, Parents, Tree, TreeEntry, Version};
pub use project::{MergeOutcome, Project};
pub use store::{DiskStore, MAX_TREE_DEPTH, Object, ObjectStore, OverlayStore};
pub use sync::{
    BLOB_CONTENT_TYPE, PullOutcome, Push, TREE_CONTENT_TYPE, TransferStats, VERSION_CONTENT_TYPE,
};
