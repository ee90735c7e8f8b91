//! Content-deduplicated file index.
//!
//! Build trees of a multi-module application carry many copies of the same
//! archive or class file. The index groups discovered files by bare file name
//! and keeps one entry per distinct byte content, so `commons-io.jar` copied
//! into twelve modules collapses to one version while two genuinely different
//! builds of `Util.class` are both kept.

use memmap2::Mmap;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{IoResultExt, Result};
use crate::scan::{absolute, scan_files};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileKind {
    /// Top-level deployable archive (`.war`).
    ArchiveRoot,
    /// Library archive (`.jar`).
    ArchiveLib,
    Class,
}

impl FileKind {
    pub fn extension(self) -> &'static str {
        match self {
            Self::ArchiveRoot => "war",
            Self::ArchiveLib => "jar",
            Self::Class => "class",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileVersion {
    pub name: String,
    pub directory: PathBuf,
    pub kind: FileKind,
    /// Hex SHA-256 of the file content.
    pub digest: String,
}

impl FileVersion {
    pub fn path(&self) -> PathBuf {
        self.directory.join(&self.name)
    }
}

/// File name to the content-distinct versions found under that name, in
/// discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileIndex {
    entries: BTreeMap<String, Vec<FileVersion>>,
}

impl FileIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexes every file of `kind` under `root`.
    pub fn collect(root: &Path, kind: FileKind) -> Result<Self> {
        let mut index = Self::new();
        index.collect_into(root, kind, &[])?;
        Ok(index)
    }

    /// Adds every file of `kind` under `root` to this index, skipping
    /// directories listed in `skip`. Returns how many new versions were added.
    pub fn collect_into(&mut self, root: &Path, kind: FileKind, skip: &[PathBuf]) -> Result<usize> {
        let root = absolute(root);
        let files = scan_files(&root, kind.extension(), skip)?;
        let mut added = 0usize;
        for path in &files {
            if self.insert(path, kind)? {
                added += 1;
            }
        }
        debug!(
            root = %root.display(),
            kind = kind.extension(),
            scanned = files.len(),
            added,
            "indexed files"
        );
        Ok(added)
    }

    /// Records `path` unless a byte-identical file with the same name is
    /// already indexed. Returns `true` when a new version was added.
    pub fn insert(&mut self, path: &Path, kind: FileKind) -> Result<bool> {
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
            return Ok(false);
        };
        let directory = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let digest = hash_file(path)?;
        let candidate = FileVersion {
            name,
            directory,
            kind,
            digest,
        };
        self.push_version(candidate)
    }

    /// Merges `other` into this index with the same content rule, keeping
    /// this index's versions first.
    pub fn merge(&mut self, other: FileIndex) -> Result<usize> {
        let mut added = 0usize;
        for (_, versions) in other.entries {
            for version in versions {
                if self.push_version(version)? {
                    added += 1;
                }
            }
        }
        Ok(added)
    }

    fn push_version(&mut self, candidate: FileVersion) -> Result<bool> {
        let versions = self.entries.entry(candidate.name.clone()).or_default();
        let candidate_path = candidate.path();
        for existing in versions.iter() {
            if existing.directory == candidate.directory {
                return Ok(false);
            }
            if existing.digest == candidate.digest && same_content(&existing.path(), &candidate_path)? {
                return Ok(false);
            }
        }
        versions.push(candidate);
        Ok(true)
    }

    /// Directories holding a version of `name`, in discovery order.
    pub fn directories(&self, name: &str) -> Vec<&Path> {
        self.entries
            .get(name)
            .map(|v| v.iter().map(|f| f.directory.as_path()).collect())
            .unwrap_or_default()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Every retained version, grouped by name.
    pub fn versions(&self) -> impl Iterator<Item = &FileVersion> {
        self.entries.values().flatten()
    }

    pub fn into_versions(self) -> impl Iterator<Item = FileVersion> {
        self.entries.into_values().flatten()
    }

    /// Number of retained versions.
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).at(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).at(path)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Whole-file byte equality.
pub fn same_content(a: &Path, b: &Path) -> Result<bool> {
    let len_a = std::fs::metadata(a).at(a)?.len();
    let len_b = std::fs::metadata(b).at(b)?.len();
    if len_a != len_b {
        return Ok(false);
    }
    if len_a == 0 {
        return Ok(true);
    }

    let fa = File::open(a).at(a)?;
    let fb = File::open(b).at(b)?;
    // SAFETY: Both files are opened read-only and outlive their mappings.
    let ma = unsafe { Mmap::map(&fa) }.at(a)?;
    let mb = unsafe { Mmap::map(&fb) }.at(b)?;
    Ok(ma[..] == mb[..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(path: &Path, content: &[u8]) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn byte_identical_copies_collapse_to_one_version() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(&root.join("m1/lib/commons.jar"), b"same");
        write(&root.join("m2/lib/commons.jar"), b"same");
        write(&root.join("m3/lib/commons.jar"), b"different");

        let index = FileIndex::collect(root, FileKind::ArchiveLib).unwrap();
        let dirs = index.directories("commons.jar");
        assert_eq!(dirs, vec![root.join("m1/lib"), root.join("m3/lib")]);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn indexing_twice_is_identical() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(&root.join("a/X.class"), b"x1");
        write(&root.join("b/X.class"), b"x2");
        write(&root.join("b/Y.class"), b"y");

        let first = FileIndex::collect(root, FileKind::Class).unwrap();
        let second = FileIndex::collect(root, FileKind::Class).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.names().collect::<Vec<_>>(), vec!["X.class", "Y.class"]);
    }

    #[test]
    fn merge_applies_content_rule_across_indexes() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(&root.join("w1/lib/a.jar"), b"A");
        write(&root.join("w2/lib/a.jar"), b"A");
        write(&root.join("w2/lib/b.jar"), b"B");

        let mut cumulative = FileIndex::collect(&root.join("w1"), FileKind::ArchiveLib).unwrap();
        let second = FileIndex::collect(&root.join("w2"), FileKind::ArchiveLib).unwrap();
        let added = cumulative.merge(second).unwrap();

        assert_eq!(added, 1);
        assert_eq!(cumulative.directories("a.jar"), vec![root.join("w1/lib")]);
        assert_eq!(cumulative.directories("b.jar"), vec![root.join("w2/lib")]);
    }

    #[test]
    fn same_content_compares_whole_files() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        let c = dir.path().join("c");
        let e1 = dir.path().join("e1");
        let e2 = dir.path().join("e2");
        fs::write(&a, b"abcdef").unwrap();
        fs::write(&b, b"abcdef").unwrap();
        fs::write(&c, b"abcdeg").unwrap();
        fs::write(&e1, b"").unwrap();
        fs::write(&e2, b"").unwrap();

        assert!(same_content(&a, &b).unwrap());
        assert!(!same_content(&a, &c).unwrap());
        assert!(same_content(&e1, &e2).unwrap());
    }

    #[test]
    fn unreadable_file_fails_the_pass() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = FileIndex::new();
        let missing = dir.path().join("gone.jar");
        assert!(index.insert(&missing, FileKind::ArchiveLib).is_err());
    }
}
