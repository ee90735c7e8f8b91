//! The persisted classpath manifest and the pipeline that builds it.
//!
//! For each distinct web archive under the binaries root the builder
//! unpacks it, indexes the library jars it embeds, rebuilds its classes
//! into a canonical package tree and packs that tree into one jar. The
//! result maps every packed root jar to its class tree, plus the flat,
//! content-deduplicated list of library jars.
//!
//! The manifest file is written once, atomically, at the end of a
//! successful build. Its presence is what lets later runs skip the build.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;

use crate::archive::{Extractor, Packer, UnpackOutcome, pack, unpack};
use crate::error::{Error, IoResultExt, Result};
use crate::hierarchy::{CollisionPolicy, HierarchyBuilder, HierarchyReport};
use crate::index::{FileIndex, FileKind, FileVersion};
use crate::naming::NameResolver;
use crate::scan::{absolute, canonical, path_id};

pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Packed root jar to the canonical class tree it was packed from.
    pub roots: BTreeMap<PathBuf, PathBuf>,
    /// Every distinct library jar, sorted.
    pub libraries: Vec<PathBuf>,
}

impl Manifest {
    pub fn path(work_dir: &Path) -> PathBuf {
        work_dir.join(MANIFEST_FILE)
    }

    pub fn exists(work_dir: &Path) -> bool {
        Self::path(work_dir).is_file()
    }

    pub fn load(work_dir: &Path) -> Result<Self> {
        let path = Self::path(work_dir);
        let raw = std::fs::read(&path).at(&path)?;
        serde_json::from_slice(&raw).map_err(|source| Error::Manifest { path, source })
    }

    /// Writes the manifest next to a temporary file and renames it into
    /// place, so readers never see a half-written manifest.
    pub fn save(&self, work_dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(work_dir).at(work_dir)?;
        let path = Self::path(work_dir);
        let mut normalized = self.clone();
        normalized.normalize();
        let json = serde_json::to_string_pretty(&normalized).map_err(|source| Error::Manifest {
            path: path.clone(),
            source,
        })?;

        let tmp = work_dir.join(format!("{MANIFEST_FILE}.tmp"));
        std::fs::write(&tmp, json).at(&tmp)?;
        std::fs::rename(&tmp, &path).at(&path)?;
        Ok(path)
    }

    pub fn normalize(&mut self) {
        self.libraries.sort();
        self.libraries.dedup();
    }

    /// Content hash of the manifest; changes whenever a rebuild changes it.
    pub fn fingerprint(&self) -> String {
        let mut normalized = self.clone();
        normalized.normalize();
        let bytes = serde_json::to_vec(&normalized).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        hex::encode(hasher.finalize())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RootReport {
    pub archive: PathBuf,
    pub packed: PathBuf,
    pub unpack_skipped: bool,
    pub embedded_libraries: usize,
    pub hierarchy: HierarchyReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub binaries_root: PathBuf,
    pub manifest: PathBuf,
    pub roots: Vec<RootReport>,
    pub libraries: usize,
    pub duration_ms: u64,
}

/// Scratch locations for one root archive.
#[derive(Debug, Clone)]
pub struct ScratchDirs {
    pub unpack: PathBuf,
    pub classes: PathBuf,
    pub temp: PathBuf,
    pub packed: PathBuf,
}

impl ScratchDirs {
    /// `<work>/<name>.<id>.{UNPACK,CLASSES,TEMP,PACK}`, with `id` derived
    /// from the archive's absolute path.
    pub fn for_archive(work_dir: &Path, archive: &Path) -> Self {
        let name = archive
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let stem = archive
            .file_stem()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let base = format!("{name}.{}", path_id(&absolute(archive)));
        Self {
            unpack: work_dir.join(format!("{base}.UNPACK")),
            classes: work_dir.join(format!("{base}.CLASSES")),
            temp: work_dir.join(format!("{base}.TEMP")),
            packed: work_dir.join(format!("{base}.PACK")).join(format!("{stem}.jar")),
        }
    }
}

struct RootOutcome {
    report: RootReport,
    libraries: FileIndex,
}

pub struct ManifestBuilder<'a> {
    extractor: &'a dyn Extractor,
    packer: &'a dyn Packer,
    resolver: &'a dyn NameResolver,
    policy: CollisionPolicy,
    jobs: usize,
}

impl<'a> ManifestBuilder<'a> {
    pub fn new(extractor: &'a dyn Extractor, packer: &'a dyn Packer, resolver: &'a dyn NameResolver) -> Self {
        Self {
            extractor,
            packer,
            resolver,
            policy: CollisionPolicy::default(),
            jobs: 0,
        }
    }

    pub fn with_policy(mut self, policy: CollisionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Worker threads for processing root archives; `0` picks the default.
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs;
        self
    }

    /// Builds and persists the manifest for `binaries_root` under `work_dir`.
    pub fn build(&self, binaries_root: &Path, work_dir: &Path) -> Result<(Manifest, BuildReport)> {
        let start = Instant::now();
        std::fs::create_dir_all(work_dir).at(work_dir)?;
        let binaries_root = canonical(binaries_root)?;
        let work_dir = canonical(work_dir)?;
        let skip = [work_dir.clone()];

        let mut wars = FileIndex::new();
        wars.collect_into(&binaries_root, FileKind::ArchiveRoot, &skip)?;
        let wars: Vec<FileVersion> = wars.into_versions().collect();
        info!(root = %binaries_root.display(), archives = wars.len(), "building manifest");

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.jobs)
            .build()
            .map_err(|e| Error::Config(format!("cannot start worker pool: {e}")))?;
        let outcomes: Vec<RootOutcome> = pool.install(|| {
            wars.par_iter()
                .map(|war| self.process_root(&war.path(), &work_dir))
                .collect::<Result<Vec<_>>>()
        })?;

        // Merge in discovery order so the retained copy of a duplicated
        // library does not depend on thread scheduling.
        let mut manifest = Manifest::default();
        let mut libraries = FileIndex::new();
        let mut roots = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            libraries.merge(outcome.libraries)?;
            manifest
                .roots
                .insert(outcome.report.packed.clone(), outcome.report.hierarchy.tree.clone());
            roots.push(outcome.report);
        }
        libraries.collect_into(&binaries_root, FileKind::ArchiveLib, &skip)?;

        manifest.libraries = libraries.versions().map(FileVersion::path).collect();
        manifest.normalize();
        let manifest_path = manifest.save(&work_dir)?;
        info!(
            manifest = %manifest_path.display(),
            roots = manifest.roots.len(),
            libraries = manifest.libraries.len(),
            "manifest saved"
        );

        let report = BuildReport {
            binaries_root,
            manifest: manifest_path,
            roots,
            libraries: manifest.libraries.len(),
            duration_ms: start.elapsed().as_millis() as u64,
        };
        Ok((manifest, report))
    }

    fn process_root(&self, archive: &Path, work_dir: &Path) -> Result<RootOutcome> {
        let dirs = ScratchDirs::for_archive(work_dir, archive);
        info!(archive = %archive.display(), "processing root archive");

        let outcome = unpack(self.extractor, archive, &dirs.unpack)?;
        let libraries = FileIndex::collect(&dirs.unpack, FileKind::ArchiveLib)?;

        let hierarchy = HierarchyBuilder::new(self.resolver)
            .with_policy(self.policy)
            .build(&dirs.unpack, &dirs.classes, &dirs.temp)?;
        let _ = std::fs::remove_dir_all(&dirs.temp);

        pack(self.packer, &dirs.classes, &dirs.packed)?;

        Ok(RootOutcome {
            report: RootReport {
                archive: archive.to_path_buf(),
                packed: dirs.packed,
                unpack_skipped: outcome == UnpackOutcome::Skipped,
                embedded_libraries: libraries.len(),
                hierarchy,
            },
            libraries,
        })
    }
}
