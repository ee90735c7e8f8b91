//! Canonical class tree construction.
//!
//! Class files inside an unpacked web archive sit wherever the build put
//! them (`WEB-INF/classes`, exploded module output, stray copies). The
//! builder resolves each one's qualified name and lays it out under a tree
//! whose directories are the package path, which is what a classpath
//! consumer expects.
//!
//! Files whose name cannot be resolved are placed by a heuristic: the
//! longest common directory prefix of all resolved files is stripped from
//! their own directory and the remainder is used as the package path.

use serde::Serialize;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{Error, IoResultExt, Result};
use crate::index::{FileIndex, FileKind, FileVersion, same_content};
use crate::naming::{NameResolver, QualifiedName};
use crate::scan::absolute;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CollisionPolicy {
    /// Keep the first file placed at a path and report the rest.
    #[default]
    KeepFirst,
    /// Abort the build on the first collision.
    Fail,
}

/// One indexed class file and the name it resolved to, if any.
#[derive(Debug, Clone)]
pub struct ClassRecord {
    pub source: FileVersion,
    pub qualified: Option<QualifiedName>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Collision {
    pub destination: PathBuf,
    pub kept: PathBuf,
    pub rejected: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HierarchyReport {
    pub tree: PathBuf,
    /// Classes placed by their resolved name.
    pub placed: usize,
    /// Classes placed by the common-prefix heuristic.
    pub fallback: usize,
    /// Byte-identical files that landed on an already occupied path.
    pub duplicates: usize,
    pub collisions: Vec<Collision>,
}

pub struct HierarchyBuilder<'a> {
    resolver: &'a dyn NameResolver,
    policy: CollisionPolicy,
}

impl<'a> HierarchyBuilder<'a> {
    pub fn new(resolver: &'a dyn NameResolver) -> Self {
        Self {
            resolver,
            policy: CollisionPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: CollisionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Builds the canonical tree for every class file under `build_root`
    /// into `output_tree`, using `scratch` for resolver temporaries.
    /// Anything already in `output_tree` is discarded first.
    pub fn build(&self, build_root: &Path, output_tree: &Path, scratch: &Path) -> Result<HierarchyReport> {
        let build_root = absolute(build_root);
        if output_tree.exists() {
            debug!(tree = %output_tree.display(), "clearing previous class tree");
            std::fs::remove_dir_all(output_tree).at(output_tree)?;
        }
        std::fs::create_dir_all(output_tree).at(output_tree)?;
        std::fs::create_dir_all(scratch).at(scratch)?;

        let index = FileIndex::collect(&build_root, FileKind::Class)?;
        let records = self.resolve_all(index, scratch)?;

        let mut report = HierarchyReport {
            tree: output_tree.to_path_buf(),
            ..HierarchyReport::default()
        };
        let mut occupied: HashMap<PathBuf, PathBuf> = HashMap::new();

        let resolved_dirs: Vec<&Path> = records
            .iter()
            .filter(|r| r.qualified.is_some())
            .map(|r| r.source.directory.as_path())
            .collect();
        let prefix = common_prefix(&resolved_dirs).unwrap_or_else(|| build_root.clone());

        for record in &records {
            let source = record.source.path();
            let destination = match &record.qualified {
                Some(name) => output_tree.join(name.class_file_path()),
                None => {
                    let rel = strip_shared_prefix(&record.source.directory, &prefix);
                    let destination = output_tree.join(rel).join(&record.source.name);
                    info!(
                        source = %source.display(),
                        prefix = %prefix.display(),
                        destination = %destination.display(),
                        "placed unresolved class by common prefix"
                    );
                    destination
                }
            };
            if self.place(&source, &destination, &mut occupied, &mut report)? {
                if record.qualified.is_some() {
                    report.placed += 1;
                } else {
                    report.fallback += 1;
                }
            }
        }

        debug!(
            tree = %output_tree.display(),
            placed = report.placed,
            fallback = report.fallback,
            duplicates = report.duplicates,
            collisions = report.collisions.len(),
            "class hierarchy built"
        );
        Ok(report)
    }

    fn resolve_all(&self, index: FileIndex, scratch: &Path) -> Result<Vec<ClassRecord>> {
        let mut records = Vec::with_capacity(index.len());
        for source in index.into_versions() {
            let path = source.path();
            let qualified = match self.resolver.resolve(&path, scratch) {
                Ok(name) => Some(name),
                Err(Error::NameResolutionFailed { reason, .. }) => {
                    warn!(class_file = %path.display(), %reason, "class name resolution failed");
                    None
                }
                Err(err) => return Err(err),
            };
            records.push(ClassRecord { source, qualified });
        }
        // Resolved classes are placed first so they win any path contest
        // against heuristically placed ones.
        records.sort_by_key(|r| r.qualified.is_none());
        Ok(records)
    }

    /// Copies `source` to `destination` unless the path is taken. Returns
    /// `true` when the file was written.
    fn place(
        &self,
        source: &Path,
        destination: &Path,
        occupied: &mut HashMap<PathBuf, PathBuf>,
        report: &mut HierarchyReport,
    ) -> Result<bool> {
        if let Some(kept) = occupied.get(destination) {
            if same_content(kept, source)? {
                report.duplicates += 1;
                return Ok(false);
            }
            let collision = Collision {
                destination: destination.to_path_buf(),
                kept: kept.clone(),
                rejected: source.to_path_buf(),
            };
            if self.policy == CollisionPolicy::Fail {
                return Err(Error::ClassPathCollision {
                    destination: collision.destination,
                    kept: collision.kept,
                    rejected: collision.rejected,
                });
            }
            warn!(
                destination = %destination.display(),
                kept = %kept.display(),
                rejected = %source.display(),
                "class path collision"
            );
            report.collisions.push(collision);
            return Ok(false);
        }

        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent).at(parent)?;
        }
        std::fs::copy(source, destination).at(destination)?;
        occupied.insert(destination.to_path_buf(), source.to_path_buf());
        Ok(true)
    }
}

/// Longest shared leading path, compared component by component.
pub fn common_prefix(paths: &[&Path]) -> Option<PathBuf> {
    let (first, rest) = paths.split_first()?;
    let mut shared: Vec<Component<'_>> = first.components().collect();
    for path in rest {
        let matching = shared
            .iter()
            .zip(path.components())
            .take_while(|(a, b)| **a == *b)
            .count();
        shared.truncate(matching);
    }
    Some(shared.iter().collect())
}

/// `path` without the leading components it shares with `prefix`.
fn strip_shared_prefix(path: &Path, prefix: &Path) -> PathBuf {
    let matching = path
        .components()
        .zip(prefix.components())
        .take_while(|(a, b)| a == b)
        .count();
    path.components().skip(matching).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::synthesize;
    use crate::naming::ClassFileNameResolver;
    use std::fs;

    fn write(path: &Path, content: &[u8]) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn common_prefix_is_component_wise() {
        let a = Path::new("/x/ab/c");
        let b = Path::new("/x/ac/c");
        assert_eq!(common_prefix(&[a, b]), Some(PathBuf::from("/x")));
        assert_eq!(common_prefix(&[a]), Some(PathBuf::from("/x/ab/c")));
        assert_eq!(common_prefix(&[]), None);
    }

    #[test]
    fn fallback_strips_the_resolved_common_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let x = dir.path().join("x");
        write(&x.join("y/A.class"), &synthesize("p/A"));
        write(&x.join("z/B.class"), &synthesize("q/B"));
        write(&x.join("y/w/Broken.class"), b"not a class file");
        let out = dir.path().join("out");

        let report = HierarchyBuilder::new(&ClassFileNameResolver)
            .build(&x, &out, &dir.path().join("tmp"))
            .unwrap();

        assert_eq!(report.placed, 2);
        assert_eq!(report.fallback, 1);
        assert_eq!(fs::read(out.join("y/w/Broken.class")).unwrap(), b"not a class file");
    }

    #[test]
    fn resolved_class_lands_at_package_path_with_same_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("unpacked");
        let bytes = synthesize("a/b/C");
        write(&root.join("WEB-INF/classes/whatever/C.class"), &bytes);
        let out = dir.path().join("out");

        HierarchyBuilder::new(&ClassFileNameResolver)
            .build(&root, &out, &dir.path().join("tmp"))
            .unwrap();

        assert_eq!(fs::read(out.join("a/b/C.class")).unwrap(), bytes);
        let all = crate::scan::scan_files(&out, "class", &[]).unwrap();
        assert_eq!(all, vec![out.join("a/b/C.class")]);
    }

    #[test]
    fn differing_classes_on_one_path_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("unpacked");
        let mut second = synthesize("a/C");
        second.push(0xFF);
        write(&root.join("m1/C.class"), &synthesize("a/C"));
        write(&root.join("m2/C.class"), &second);
        let out = dir.path().join("out");

        let report = HierarchyBuilder::new(&ClassFileNameResolver)
            .build(&root, &out, &dir.path().join("tmp"))
            .unwrap();
        assert_eq!(report.placed, 1);
        assert_eq!(report.collisions.len(), 1);
        assert_eq!(report.collisions[0].destination, out.join("a/C.class"));
        assert_eq!(fs::read(out.join("a/C.class")).unwrap(), synthesize("a/C"));

        let out2 = dir.path().join("out2");
        let err = HierarchyBuilder::new(&ClassFileNameResolver)
            .with_policy(CollisionPolicy::Fail)
            .build(&root, &out2, &dir.path().join("tmp2"))
            .unwrap_err();
        assert!(matches!(err, Error::ClassPathCollision { .. }));
    }

    #[test]
    fn nothing_resolved_falls_back_to_build_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("unpacked");
        write(&root.join("org/x/Odd.class"), b"??");
        let out = dir.path().join("out");

        let report = HierarchyBuilder::new(&ClassFileNameResolver)
            .build(&root, &out, &dir.path().join("tmp"))
            .unwrap();
        assert_eq!(report.fallback, 1);
        assert!(out.join("org/x/Odd.class").exists());
    }

    #[test]
    fn rebuild_drops_classes_left_by_an_earlier_run() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("unpacked");
        write(&root.join("a/Keep.class"), &synthesize("a/Keep"));
        let out = dir.path().join("out");
        write(&out.join("stale/Gone.class"), b"old");

        HierarchyBuilder::new(&ClassFileNameResolver)
            .build(&root, &out, &dir.path().join("tmp"))
            .unwrap();

        let all = crate::scan::scan_files(&out, "class", &[]).unwrap();
        assert_eq!(all, vec![out.join("a/Keep.class")]);
    }
}
