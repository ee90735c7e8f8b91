//! Maps a qualified function name to the archive holding its class.
//!
//! Two tiers: the manifest's root class trees are probed directly, and on a
//! miss the library jars are unpacked one at a time, in manifest order,
//! until one of them contains the class. Unpacked libraries are remembered
//! for the rest of the run, and their scratch directories survive across
//! runs.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info, warn};

use crate::archive::{Extractor, UnpackOutcome, unpack};
use crate::cache::ResolutionCache;
use crate::error::{Error, Result};
use crate::manifest::Manifest;
use crate::naming::QualifiedName;
use crate::scan::path_id;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "archive", rename_all = "kebab-case")]
pub enum Resolution {
    /// Found in a packed root jar's class tree.
    Root(PathBuf),
    Library(PathBuf),
    NotFound,
}

impl Resolution {
    pub fn archive(&self) -> Option<&Path> {
        match self {
            Self::Root(p) | Self::Library(p) => Some(p),
            Self::NotFound => None,
        }
    }
}

/// Derives the owning class of a function specifier.
///
/// Accepts `a.b.C.method`, optionally prefixed with `java::` and followed
/// by a descriptor (`:(I)V` or `(I)V`).
pub fn owning_class(specifier: &str) -> Result<QualifiedName> {
    let malformed = || Error::MalformedSpecifier(specifier.to_string());
    let mut s = specifier.trim();
    if let Some(rest) = s.strip_prefix("java::") {
        s = rest;
    }
    if let Some(end) = s.find([':', '(']) {
        s = &s[..end];
    }
    let (class, member) = s.rsplit_once('.').ok_or_else(malformed)?;
    if class.is_empty() || member.is_empty() {
        return Err(malformed());
    }
    QualifiedName::parse(class).ok_or_else(malformed)
}

/// Library jar to the directory it was unpacked into during this run.
/// `None` marks a jar that failed to unpack, so it is not retried.
#[derive(Debug, Default)]
pub struct UnpackCache {
    dirs: Mutex<HashMap<PathBuf, Option<PathBuf>>>,
    extracted: AtomicUsize,
}

impl UnpackCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the unpacked directory of `library`, extracting it into
    /// `libs_dir` the first time it is asked for.
    pub fn get_or_unpack(&self, extractor: &dyn Extractor, library: &Path, libs_dir: &Path) -> Option<PathBuf> {
        let mut dirs = self.dirs.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(dir) = dirs.get(library) {
            return dir.clone();
        }

        let name = library
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let target = libs_dir.join(format!("{name}.{}.UNPACK", path_id(library)));
        let dir = match unpack(extractor, library, &target) {
            Ok(outcome) => {
                if outcome == UnpackOutcome::Extracted {
                    self.extracted.fetch_add(1, Ordering::Relaxed);
                }
                Some(target)
            }
            Err(err) => {
                warn!(library = %library.display(), error = %err, "library unpack failed; skipping");
                None
            }
        };
        dirs.insert(library.to_path_buf(), dir.clone());
        dir
    }

    /// Libraries actually extracted (not reused) during this run.
    pub fn extracted(&self) -> usize {
        self.extracted.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.dirs.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolvedFunction {
    pub function: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct RootResolver<'a> {
    manifest: &'a Manifest,
    libs_dir: PathBuf,
    extractor: &'a dyn Extractor,
    unpacked: UnpackCache,
    cache: Option<&'a ResolutionCache>,
    fingerprint: String,
}

impl<'a> RootResolver<'a> {
    pub fn new(manifest: &'a Manifest, work_dir: &Path, extractor: &'a dyn Extractor) -> Self {
        Self {
            manifest,
            libs_dir: work_dir.join("libs"),
            extractor,
            unpacked: UnpackCache::new(),
            cache: None,
            fingerprint: manifest.fingerprint(),
        }
    }

    pub fn with_cache(mut self, cache: &'a ResolutionCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn unpack_cache(&self) -> &UnpackCache {
        &self.unpacked
    }

    pub fn resolve(&self, specifier: &str) -> Result<Resolution> {
        let class = owning_class(specifier)?;
        let rel = class.class_file_path();
        let key = format!("{}.class", class.as_str());

        if let Some(cache) = self.cache
            && let Some(hit) = cache.get(&self.fingerprint, &key)?
            && hit.archive().is_some_and(Path::exists)
        {
            debug!(function = specifier, archive = ?hit.archive(), "resolution cache hit");
            return Ok(hit);
        }

        let resolution = self.search(&rel);
        match &resolution {
            Resolution::NotFound => info!(function = specifier, class = %class, "owning class not found"),
            found => info!(function = specifier, archive = ?found.archive(), "resolved"),
        }
        if let Some(cache) = self.cache {
            cache.put(&self.fingerprint, &key, &resolution)?;
        }
        Ok(resolution)
    }

    fn search(&self, rel: &Path) -> Resolution {
        for (jar, tree) in &self.manifest.roots {
            if tree.join(rel).is_file() {
                return Resolution::Root(jar.clone());
            }
        }

        for library in &self.manifest.libraries {
            let Some(dir) = self.unpacked.get_or_unpack(self.extractor, library, &self.libs_dir) else {
                continue;
            };
            if dir.join(rel).is_file() {
                return Resolution::Library(library.clone());
            }
        }
        Resolution::NotFound
    }

    /// Resolves each specifier, recording malformed input and misses
    /// without stopping.
    pub fn resolve_all<S: AsRef<str>>(&self, specifiers: &[S]) -> Vec<ResolvedFunction> {
        specifiers
            .iter()
            .map(|s| {
                let function = s.as_ref().to_string();
                match self.resolve(&function) {
                    Ok(resolution) => ResolvedFunction {
                        function,
                        resolution: Some(resolution),
                        error: None,
                    },
                    Err(err) => {
                        warn!(function = %function, error = %err, "cannot resolve function");
                        ResolvedFunction {
                            function,
                            resolution: None,
                            error: Some(err.to_string()),
                        }
                    }
                }
            })
            .collect()
    }
}
