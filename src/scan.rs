use ignore::WalkBuilder;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::error::{IoResultExt, Result};

/// Lists every regular file under `base_path` whose extension is `extension`.
///
/// Hidden files are included and ignore files are not honoured: build output
/// trees routinely live under `target/` or `build/` directories that a
/// `.gitignore` would hide. Entries come back sorted by file name within each
/// directory so repeated walks over an unchanged tree agree. Directories in
/// `skip` are not descended into. Any traversal error aborts the walk.
pub fn scan_files(base_path: &Path, extension: &str, skip: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let skip: Vec<PathBuf> = skip.to_vec();
    let walker = WalkBuilder::new(base_path)
        .hidden(false)
        .ignore(false)
        .parents(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .filter_entry(move |entry| !skip.iter().any(|s| entry.path() == s))
        .build();

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let path = entry.path();
        if path.extension().is_some_and(|e| e == extension) {
            files.push(path.to_path_buf());
        }
    }
    Ok(files)
}

pub fn class_name_to_class_path(class_name: &str) -> String {
    format!("{}.class", class_name.replace('.', "/"))
}

/// Short, stable identifier derived from a path, used to name scratch
/// directories so the same archive always maps to the same location.
pub fn path_id(path: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.to_string_lossy().as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..12].to_string()
}

/// Absolute form of `path` without touching the file system.
pub fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Resolves `..` and symlinks so walker paths and skip entries compare
/// equal. The path must exist.
pub fn canonical(path: &Path) -> Result<PathBuf> {
    std::fs::canonicalize(path).at(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn scan_files_filters_by_extension_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("b")).unwrap();
        fs::create_dir_all(root.join("a")).unwrap();
        fs::write(root.join("b/z.jar"), b"z").unwrap();
        fs::write(root.join("a/y.jar"), b"y").unwrap();
        fs::write(root.join("a/readme.txt"), b"t").unwrap();
        fs::write(root.join(".hidden.jar"), b"h").unwrap();

        let found = scan_files(root, "jar", &[]).unwrap();
        let rel: Vec<_> = found
            .iter()
            .map(|p| p.strip_prefix(root).unwrap().to_path_buf())
            .collect();
        assert_eq!(
            rel,
            vec![
                PathBuf::from(".hidden.jar"),
                PathBuf::from("a/y.jar"),
                PathBuf::from("b/z.jar"),
            ]
        );
    }

    #[test]
    fn scan_files_skips_listed_directories() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("work")).unwrap();
        fs::write(root.join("work/lib.jar"), b"x").unwrap();
        fs::write(root.join("app.jar"), b"x").unwrap();

        let found = scan_files(root, "jar", &[root.join("work")]).unwrap();
        assert_eq!(found, vec![root.join("app.jar")]);
    }

    #[test]
    fn class_name_to_class_path_uses_slashes() {
        assert_eq!(
            class_name_to_class_path("org.example.pkg.A"),
            "org/example/pkg/A.class"
        );
    }

    #[test]
    fn path_id_is_stable_and_short() {
        let a = path_id(Path::new("/bin/app.war"));
        assert_eq!(a, path_id(Path::new("/bin/app.war")));
        assert_ne!(a, path_id(Path::new("/bin/other/app.war")));
        assert_eq!(a.len(), 12);
    }
}
