//! The content-addressed object model: blobs, trees, commit records and
//! snapshots hashed the way git hashes them, so identical file states always
//! produce identical ids no matter how they were ingested.

use std::{
    collections::BTreeMap,
    fmt::{Debug, Display},
    os::unix::prelude::{OsStrExt, PermissionsExt},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use sha1::{Digest, Sha1};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("cannot scan {path}: unsupported file type")]
    UnsupportedFileType { path: PathBuf },
}

/// A 20-byte object id, displayed in hex.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId([u8; 20]);

impl ObjectId {
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl Debug for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ObjectId({})", self)
    }
}

/// Hashes an object payload under its kind header, `<kind> <len>\0<payload>`.
pub fn hash_object(kind: &str, payload: &[u8]) -> ObjectId {
    let mut hasher = Sha1::new();
    hasher.update(kind.as_bytes());
    hasher.update(b" ");
    hasher.update(payload.len().to_string().as_bytes());
    hasher.update(b"\0");
    hasher.update(payload);
    ObjectId(hasher.finalize().into())
}

/// A file's bytes plus their blob id.
#[derive(Debug, Clone)]
pub struct Content {
    pub id: ObjectId,
    pub data: Vec<u8>,
}

impl Content {
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self {
            id: hash_object("blob", &data),
            data,
        }
    }
}

/// A blob that was hashed but whose data is withheld, typically for exceeding
/// the maximum content size.
#[derive(Debug, Clone)]
pub struct SkippedContent {
    pub id: ObjectId,
    pub path: PathBuf,
    pub length: u64,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryMode {
    Normal,
    Executable,
    Symlink,
    Directory,
}

impl EntryMode {
    fn as_bytes(self) -> &'static [u8] {
        match self {
            EntryMode::Normal => b"100644",
            EntryMode::Executable => b"100755",
            EntryMode::Symlink => b"120000",
            EntryMode::Directory => b"40000",
        }
    }

    pub fn is_directory(self) -> bool {
        self == EntryMode::Directory
    }
}

#[derive(Debug, Clone)]
pub struct DirectoryEntry {
    pub mode: EntryMode,
    pub name: Vec<u8>,
    pub target: ObjectId,
}

/// A directory (git tree) with its id.
#[derive(Debug, Clone)]
pub struct Directory {
    pub id: ObjectId,
    pub entries: Vec<DirectoryEntry>,
}

impl Directory {
    /// Builds a directory from its entries, sorting them canonically and
    /// computing the tree id.
    pub fn new(mut entries: Vec<DirectoryEntry>) -> Self {
        // git's tree order compares names as if directories carried a
        // trailing slash.
        entries.sort_by(|a, b| {
            let key = |entry: &DirectoryEntry| {
                let mut name = entry.name.clone();
                if entry.mode.is_directory() {
                    name.push(b'/');
                }
                name
            };
            key(a).cmp(&key(b))
        });

        let mut payload = Vec::new();
        for entry in &entries {
            payload.extend_from_slice(entry.mode.as_bytes());
            payload.push(b' ');
            payload.extend_from_slice(&entry.name);
            payload.push(b'\0');
            payload.extend_from_slice(entry.target.as_bytes());
        }

        Self {
            id: hash_object("tree", &payload),
            entries,
        }
    }
}

/// An author or committer identity, kept as an opaque byte string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Person {
    pub fullname: Vec<u8>,
}

impl Person {
    pub fn from_fullname<B: Into<Vec<u8>>>(fullname: B) -> Self {
        Self {
            fullname: fullname.into(),
        }
    }
}

/// A synthetic commit record.
///
/// The id hashes the git commit manifest: tree, parents, identities with a
/// UTC timestamp, and the message. The type tag and synthetic flag are
/// metadata for the sink, not part of the hash.
#[derive(Debug, Clone)]
pub struct Commit {
    pub id: ObjectId,
    pub tree: ObjectId,
    pub parents: Vec<ObjectId>,
    pub author: Person,
    pub committer: Person,
    pub date: DateTime<Utc>,
    pub message: Vec<u8>,
    pub kind: &'static str,
    pub synthetic: bool,
}

impl Commit {
    pub fn new(
        tree: ObjectId,
        parent: Option<ObjectId>,
        author: Person,
        date: DateTime<Utc>,
        message: Vec<u8>,
    ) -> Self {
        let parents: Vec<ObjectId> = parent.into_iter().collect();

        let mut payload = Vec::new();
        payload.extend_from_slice(format!("tree {}\n", tree).as_bytes());
        for parent in &parents {
            payload.extend_from_slice(format!("parent {}\n", parent).as_bytes());
        }
        for role in &[&b"author"[..], &b"committer"[..]] {
            payload.extend_from_slice(role);
            payload.push(b' ');
            payload.extend_from_slice(&author.fullname);
            payload.extend_from_slice(format!(" {} +0000\n", date.timestamp()).as_bytes());
        }
        payload.push(b'\n');
        payload.extend_from_slice(&message);

        Self {
            id: hash_object("commit", &payload),
            tree,
            parents,
            committer: author.clone(),
            author,
            date,
            message,
            kind: "CVS",
            synthetic: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Revision,
}

impl TargetKind {
    fn as_str(self) -> &'static str {
        match self {
            TargetKind::Revision => "revision",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotBranch {
    pub target_kind: TargetKind,
    pub target: ObjectId,
}

/// A named view of branch heads, hashed over its sorted branch list.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub id: ObjectId,
    pub branches: BTreeMap<Vec<u8>, SnapshotBranch>,
}

impl Snapshot {
    pub fn new(branches: BTreeMap<Vec<u8>, SnapshotBranch>) -> Self {
        let mut payload = Vec::new();
        for (name, branch) in &branches {
            payload.extend_from_slice(branch.target_kind.as_str().as_bytes());
            payload.push(b' ');
            payload.extend_from_slice(name);
            payload.push(b'\0');
            payload.extend_from_slice(branch.target.as_bytes());
        }

        Self {
            id: hash_object("snapshot", &payload),
            branches,
        }
    }
}

/// Everything new that hashing a working tree produced.
#[derive(Debug)]
pub struct ScanResult {
    pub root: ObjectId,
    pub contents: Vec<Content>,
    pub skipped: Vec<SkippedContent>,
    pub directories: Vec<Directory>,
}

/// Hashes a working tree from disk, bottom up.
///
/// Empty directories are kept: a deletion can empty a directory mid-history,
/// and the tree hash has to reflect that state.
pub fn scan_directory(root: &Path, max_content_size: Option<u64>) -> Result<ScanResult, Error> {
    let mut result = ScanResult {
        root: hash_object("tree", b""),
        contents: Vec::new(),
        skipped: Vec::new(),
        directories: Vec::new(),
    };
    let root = scan_into(root, max_content_size, &mut result)?;
    result.root = root;
    Ok(result)
}

fn scan_into(
    dir: &Path,
    max_content_size: Option<u64>,
    result: &mut ScanResult,
) -> Result<ObjectId, Error> {
    let mut entries = Vec::new();

    let mut names: Vec<_> = std::fs::read_dir(dir)?
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .map(|entry| entry.path())
        .collect();
    names.sort();

    for path in names {
        let name = match path.file_name() {
            Some(name) => name.as_bytes().to_vec(),
            None => continue,
        };
        let metadata = std::fs::symlink_metadata(&path)?;
        let file_type = metadata.file_type();

        if file_type.is_dir() {
            let target = scan_into(&path, max_content_size, result)?;
            entries.push(DirectoryEntry {
                mode: EntryMode::Directory,
                name,
                target,
            });
        } else if file_type.is_symlink() {
            let target = std::fs::read_link(&path)?;
            let content = Content::from_bytes(target.as_os_str().as_bytes().to_vec());
            entries.push(DirectoryEntry {
                mode: EntryMode::Symlink,
                name,
                target: content.id,
            });
            result.contents.push(content);
        } else if file_type.is_file() {
            let data = std::fs::read(&path)?;
            let mode = if metadata.permissions().mode() & 0o111 != 0 {
                EntryMode::Executable
            } else {
                EntryMode::Normal
            };

            let content = Content::from_bytes(data);
            entries.push(DirectoryEntry {
                mode,
                name,
                target: content.id,
            });

            match max_content_size {
                Some(max) if (content.data.len() as u64) > max => {
                    log::debug!(
                        "skipping {} ({} bytes over the {} byte limit)",
                        path.display(),
                        content.data.len(),
                        max
                    );
                    result.skipped.push(SkippedContent {
                        id: content.id,
                        path: path.clone(),
                        length: content.data.len() as u64,
                        reason: format!("content exceeds {} bytes", max),
                    });
                }
                _ => result.contents.push(content),
            }
        } else {
            return Err(Error::UnsupportedFileType { path });
        }
    }

    let directory = Directory::new(entries);
    let id = directory.id;
    result.directories.push(directory);
    Ok(id)
}
