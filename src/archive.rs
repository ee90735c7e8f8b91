//! Archive extraction and packing.
//!
//! Two backends implement [`Extractor`] and [`Packer`]: [`ZipArchiver`] does
//! the work in-process with the `zip` crate, [`JarTool`] shells out to the
//! JDK `jar` binary. [`unpack`] and [`pack`] wrap either one with the
//! directory-existence idempotency rule and output verification.

use ignore::WalkBuilder;
use memmap2::Mmap;
use std::ffi::OsStr;
use std::fs::File;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tracing::{debug, warn};
use zip::ZipArchive;
use zip::write::{FileOptions, ZipWriter};

use crate::error::{Error, IoResultExt, Result};
use crate::scan::absolute;

pub trait Extractor: Send + Sync {
    /// Extracts the whole of `archive` into the existing directory `target`,
    /// preserving entry paths.
    fn extract(&self, archive: &Path, target: &Path) -> Result<()>;
}

pub trait Packer: Send + Sync {
    /// Writes every file under `dir` into `archive`, with entry paths
    /// relative to `dir`.
    fn pack(&self, dir: &Path, archive: &Path) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnpackOutcome {
    Extracted,
    /// The target directory already existed.
    Skipped,
}

/// Extracts `archive` into `target` unless `target` already exists.
///
/// Extraction goes to a sibling `.partial` directory that is renamed into
/// place on success, so the existence of `target` always means a completed
/// extraction.
pub fn unpack(extractor: &dyn Extractor, archive: &Path, target: &Path) -> Result<UnpackOutcome> {
    if target.exists() {
        debug!(archive = %archive.display(), target = %target.display(), "unpack skipped");
        return Ok(UnpackOutcome::Skipped);
    }

    let partial = sibling_with_suffix(target, ".partial");
    if partial.exists() {
        std::fs::remove_dir_all(&partial).at(&partial)?;
    }
    std::fs::create_dir_all(&partial).at(&partial)?;

    if let Err(err) = extractor.extract(archive, &partial) {
        let _ = std::fs::remove_dir_all(&partial);
        return Err(err);
    }

    if dir_is_empty(&partial)? {
        warn!(archive = %archive.display(), "archive extracted to an empty directory");
    }
    std::fs::rename(&partial, target).at(target)?;
    debug!(archive = %archive.display(), target = %target.display(), "unpacked");
    Ok(UnpackOutcome::Extracted)
}

/// Packs `dir` into `archive`, creating the parent directory first and
/// checking that a non-empty archive came out.
pub fn pack(packer: &dyn Packer, dir: &Path, archive: &Path) -> Result<()> {
    if let Some(parent) = archive.parent() {
        std::fs::create_dir_all(parent).at(parent)?;
    }
    packer.pack(dir, archive)?;

    let len = std::fs::metadata(archive).map(|m| m.len()).unwrap_or(0);
    if len == 0 {
        return Err(Error::PackingFailed {
            dir: dir.to_path_buf(),
            archive: archive.to_path_buf(),
            reason: "output archive is missing or empty".to_string(),
        });
    }
    debug!(dir = %dir.display(), archive = %archive.display(), bytes = len, "packed");
    Ok(())
}

/// In-process backend built on the `zip` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipArchiver;

impl Extractor for ZipArchiver {
    fn extract(&self, archive: &Path, target: &Path) -> Result<()> {
        let failed = |reason: String| Error::ExtractionFailed {
            archive: archive.to_path_buf(),
            reason,
        };
        let file = File::open(archive).at(archive)?;
        // SAFETY: The file is opened read-only and remains valid for the lifetime of the mmap.
        let mmap = unsafe { Mmap::map(&file) }.at(archive)?;
        let mut zip = ZipArchive::new(Cursor::new(&mmap[..]))
            .map_err(|e| failed(format!("cannot read zip structure: {e}")))?;
        zip.extract(target).map_err(|e| failed(e.to_string()))
    }
}

impl Packer for ZipArchiver {
    fn pack(&self, dir: &Path, archive: &Path) -> Result<()> {
        let failed = |reason: String| Error::PackingFailed {
            dir: dir.to_path_buf(),
            archive: archive.to_path_buf(),
            reason,
        };
        let files = list_files(dir)?;
        let out = File::create(archive).at(archive)?;
        let mut zip = ZipWriter::new(out);
        let options = FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        for path in files {
            let Some(entry_name) = entry_name(dir, &path) else {
                continue;
            };
            let content = std::fs::read(&path).at(&path)?;
            zip.start_file(entry_name, options)
                .map_err(|e| failed(e.to_string()))?;
            zip.write_all(&content).at(archive)?;
        }
        zip.finish().map_err(|e| failed(e.to_string()))?;
        Ok(())
    }
}

/// External backend running the JDK `jar` tool.
#[derive(Debug, Clone)]
pub struct JarTool {
    jar_bin: String,
}

impl JarTool {
    pub fn new(jar_bin: impl Into<String>) -> Self {
        Self {
            jar_bin: jar_bin.into(),
        }
    }
}

impl Extractor for JarTool {
    fn extract(&self, archive: &Path, target: &Path) -> Result<()> {
        let archive_abs = absolute(archive);
        let failed = |reason: String| Error::ExtractionFailed {
            archive: archive.to_path_buf(),
            reason,
        };
        let output = tool_command(&self.jar_bin, &[OsStr::new("xf"), archive_abs.as_os_str()], target)
            .map_err(|e| failed(format!("failed to execute {}: {e}", self.jar_bin)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(failed(format!("{} exited with {}: {}", self.jar_bin, output.status, stderr.trim())));
        }
        Ok(())
    }
}

impl Packer for JarTool {
    fn pack(&self, dir: &Path, archive: &Path) -> Result<()> {
        let archive_abs = absolute(archive);
        let failed = |reason: String| Error::PackingFailed {
            dir: dir.to_path_buf(),
            archive: archive.to_path_buf(),
            reason,
        };
        let output = tool_command(
            &self.jar_bin,
            &[OsStr::new("cf"), archive_abs.as_os_str(), OsStr::new(".")],
            dir,
        )
        .map_err(|e| failed(format!("failed to execute {}: {e}", self.jar_bin)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(failed(format!("{} exited with {}: {}", self.jar_bin, output.status, stderr.trim())));
        }
        Ok(())
    }
}

/// Runs an external tool with `cwd` as its working directory.
pub(crate) fn tool_command(bin: &str, args: &[&OsStr], cwd: &Path) -> std::io::Result<Output> {
    #[cfg(windows)]
    {
        let lower = bin.to_ascii_lowercase();
        if lower.ends_with(".cmd") || lower.ends_with(".bat") {
            return Command::new("cmd")
                .arg("/C")
                .arg(bin)
                .args(args)
                .current_dir(cwd)
                .output();
        }
    }

    Command::new(bin).args(args).current_dir(cwd).output()
}

fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let walker = WalkBuilder::new(dir)
        .standard_filters(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .build();
    let mut files = Vec::new();
    for entry in walker {
        let entry = entry?;
        if entry.file_type().is_some_and(|t| t.is_file()) {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Archive entry name of `path` relative to `root`, always `/`-separated.
fn entry_name(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(suffix);
    PathBuf::from(os)
}

fn dir_is_empty(dir: &Path) -> Result<bool> {
    let mut entries = std::fs::read_dir(dir).at(dir)?;
    Ok(entries.next().is_none())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn write_jar(path: &Path, entries: &[(&str, &[u8])]) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let file = File::create(path).unwrap();
        let mut zip = ZipWriter::new(file);
        for (name, content) in entries {
            zip.start_file(*name, FileOptions::default()).unwrap();
            zip.write_all(content).unwrap();
        }
        zip.finish().unwrap();
    }

    fn zip_entries(path: &Path) -> Vec<String> {
        let file = File::open(path).unwrap();
        let mut zip = ZipArchive::new(file).unwrap();
        (0..zip.len())
            .map(|i| zip.by_index(i).unwrap().name().to_string())
            .collect()
    }

    struct CountingExtractor(AtomicUsize);

    impl Extractor for CountingExtractor {
        fn extract(&self, archive: &Path, target: &Path) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            ZipArchiver.extract(archive, target)
        }
    }

    struct BrokenExtractor;

    impl Extractor for BrokenExtractor {
        fn extract(&self, archive: &Path, _target: &Path) -> Result<()> {
            Err(Error::ExtractionFailed {
                archive: archive.to_path_buf(),
                reason: "boom".to_string(),
            })
        }
    }

    #[test]
    fn unpack_extracts_once_per_target() {
        let dir = tempfile::tempdir().unwrap();
        let war = dir.path().join("app.war");
        write_jar(&war, &[("WEB-INF/classes/a/B.class", b"b"), ("index.html", b"<html/>")]);
        let target = dir.path().join("app.UNPACK");
        let extractor = CountingExtractor(AtomicUsize::new(0));

        assert_eq!(unpack(&extractor, &war, &target).unwrap(), UnpackOutcome::Extracted);
        assert_eq!(unpack(&extractor, &war, &target).unwrap(), UnpackOutcome::Skipped);
        assert_eq!(extractor.0.load(Ordering::SeqCst), 1);
        assert_eq!(fs::read(target.join("WEB-INF/classes/a/B.class")).unwrap(), b"b");
    }

    #[test]
    fn failed_unpack_leaves_no_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("broken.UNPACK");
        let err = unpack(&BrokenExtractor, &dir.path().join("x.war"), &target).unwrap_err();
        assert!(matches!(err, Error::ExtractionFailed { .. }));
        assert!(!target.exists());
        assert!(!sibling_with_suffix(&target, ".partial").exists());
    }

    #[test]
    fn zip_extract_rejects_non_archives() {
        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join("bogus.jar");
        fs::write(&bogus, b"not a zip").unwrap();
        let target = dir.path().join("out");
        fs::create_dir_all(&target).unwrap();
        let err = ZipArchiver.extract(&bogus, &target).unwrap_err();
        assert!(matches!(err, Error::ExtractionFailed { .. }));
    }

    #[test]
    fn pack_writes_relative_sorted_entries() {
        let dir = tempfile::tempdir().unwrap();
        let classes = dir.path().join("classes");
        fs::create_dir_all(classes.join("org/example")).unwrap();
        fs::write(classes.join("org/example/B.class"), b"b").unwrap();
        fs::write(classes.join("org/example/A.class"), b"a").unwrap();
        let out = dir.path().join("pack/nested/app.jar");

        pack(&ZipArchiver, &classes, &out).unwrap();
        assert_eq!(
            zip_entries(&out),
            vec!["org/example/A.class".to_string(), "org/example/B.class".to_string()]
        );
    }

    struct SilentPacker;

    impl Packer for SilentPacker {
        fn pack(&self, _dir: &Path, _archive: &Path) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn packer_that_writes_nothing_is_a_packing_failure() {
        let dir = tempfile::tempdir().unwrap();
        let classes = dir.path().join("classes");
        fs::create_dir_all(&classes).unwrap();
        let out = dir.path().join("pack/app.jar");

        let err = pack(&SilentPacker, &classes, &out).unwrap_err();
        assert!(matches!(err, Error::PackingFailed { .. }));
        assert!(out.parent().unwrap().is_dir());
    }

    #[cfg(unix)]
    fn fake_jar(dir: &Path, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("jar");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).unwrap();
        path.to_string_lossy().to_string()
    }

    #[cfg(unix)]
    #[test]
    fn jar_tool_reports_stderr_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let tool = JarTool::new(fake_jar(dir.path(), "echo \"jar exploded\" >&2\nexit 3"));
        let target = dir.path().join("out");
        fs::create_dir_all(&target).unwrap();
        let err = tool.extract(&dir.path().join("a.war"), &target).unwrap_err();
        let msg = err.to_string();
        assert!(matches!(err, Error::ExtractionFailed { .. }));
        assert!(msg.contains("jar exploded"));
    }

    #[cfg(unix)]
    #[test]
    fn jar_tool_packs_and_extracts_relative_to_the_tree() {
        let dir = tempfile::tempdir().unwrap();
        // tar stands in for jar: same "cf out ." / "xf archive" calling convention.
        let tool = JarTool::new(fake_jar(
            dir.path(),
            "case \"$1\" in\n  cf) tar cf \"$2\" . ;;\n  xf) tar xf \"$2\" ;;\n  *) exit 2 ;;\nesac",
        ));
        let classes = dir.path().join("classes");
        fs::create_dir_all(classes.join("org/example")).unwrap();
        fs::write(classes.join("org/example/A.class"), b"a").unwrap();
        let out = dir.path().join("pack/app.jar");

        pack(&tool, &classes, &out).unwrap();
        let target = dir.path().join("app.UNPACK");
        assert_eq!(unpack(&tool, &out, &target).unwrap(), UnpackOutcome::Extracted);
        assert_eq!(fs::read(target.join("org/example/A.class")).unwrap(), b"a");
        assert_eq!(unpack(&tool, &out, &target).unwrap(), UnpackOutcome::Skipped);
    }
}
