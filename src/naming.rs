use serde::Serialize;
use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::archive::tool_command;
use crate::classfile::this_class_name;
use crate::error::{Error, IoResultExt, Result};

/// Fully qualified class name in internal form: `org/example/Foo`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct QualifiedName(String);

impl QualifiedName {
    /// Accepts either `org/example/Foo` or `org.example.Foo`.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().replace('.', "/");
        if normalized.is_empty() || normalized.split('/').any(str::is_empty) {
            return None;
        }
        Some(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `org/example` for `org/example/Foo`; `None` for the default package.
    pub fn package(&self) -> Option<&str> {
        self.0.rsplit_once('/').map(|(pkg, _)| pkg)
    }

    pub fn simple_name(&self) -> &str {
        self.0.rsplit_once('/').map_or(self.0.as_str(), |(_, name)| name)
    }

    /// Package directory relative to a class tree root.
    pub fn package_dir(&self) -> PathBuf {
        self.package()
            .map(|pkg| pkg.split('/').collect())
            .unwrap_or_default()
    }

    /// Class file path relative to a class tree root: `org/example/Foo.class`.
    pub fn class_file_path(&self) -> PathBuf {
        self.package_dir().join(format!("{}.class", self.simple_name()))
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub trait NameResolver: Send + Sync {
    /// Determines the qualified name of the class stored in `class_file`.
    ///
    /// `scratch` is a directory the resolver may use for temporary files.
    /// An unidentifiable class is `Error::NameResolutionFailed`; other errors
    /// mean the resolver itself is unusable.
    fn resolve(&self, class_file: &Path, scratch: &Path) -> Result<QualifiedName>;
}

/// Reads `this_class` straight out of the class file.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClassFileNameResolver;

impl NameResolver for ClassFileNameResolver {
    fn resolve(&self, class_file: &Path, _scratch: &Path) -> Result<QualifiedName> {
        let bytes = std::fs::read(class_file).at(class_file)?;
        let failed = |reason: String| Error::NameResolutionFailed {
            class_file: class_file.to_path_buf(),
            reason,
        };
        let raw = this_class_name(&bytes).map_err(|e| failed(e.to_string()))?;
        QualifiedName::parse(&raw).ok_or_else(|| failed(format!("unusable class name {raw:?}")))
    }
}

/// Runs a small Java helper that loads the class under its bare file name and
/// recovers the real name from the loader's "wrong name" complaint. The
/// helper writes the name into a `<Name>.CLASSNAME.txt` sidecar.
#[derive(Debug, Clone)]
pub struct JavaNameResolver {
    java_bin: String,
    helper_classpath: PathBuf,
    helper_main: String,
}

pub const DEFAULT_HELPER_MAIN: &str = "__diffblue_full_class_name_parser__";

impl JavaNameResolver {
    pub fn new(java_bin: impl Into<String>, helper_classpath: PathBuf) -> Self {
        Self {
            java_bin: java_bin.into(),
            helper_classpath,
            helper_main: DEFAULT_HELPER_MAIN.to_string(),
        }
    }

    pub fn with_helper_main(mut self, helper_main: impl Into<String>) -> Self {
        self.helper_main = helper_main.into();
        self
    }
}

impl NameResolver for JavaNameResolver {
    fn resolve(&self, class_file: &Path, scratch: &Path) -> Result<QualifiedName> {
        let failed = |reason: String| Error::NameResolutionFailed {
            class_file: class_file.to_path_buf(),
            reason,
        };
        let (Some(file_name), Some(stem)) = (class_file.file_name(), class_file.file_stem()) else {
            return Err(failed("not a file path".to_string()));
        };
        let stem = stem.to_string_lossy().to_string();

        std::fs::create_dir_all(scratch).at(scratch)?;
        let staged = scratch.join(file_name);
        std::fs::copy(class_file, &staged).at(&staged)?;
        let sidecar_name = format!("{stem}.CLASSNAME.txt");
        let sidecar = scratch.join(&sidecar_name);
        if sidecar.exists() {
            std::fs::remove_file(&sidecar).at(&sidecar)?;
        }

        let classpath = std::env::join_paths([self.helper_classpath.as_os_str(), OsStr::new(".")])
            .map_err(|e| Error::Config(format!("invalid helper classpath: {e}")))?;
        let output = tool_command(
            &self.java_bin,
            &[
                OsStr::new("-cp"),
                classpath.as_os_str(),
                OsStr::new(&self.helper_main),
                OsStr::new(&stem),
                OsStr::new(&sidecar_name),
            ],
            scratch,
        )
        .map_err(|e| {
            Error::Config(format!(
                "failed to execute {} (ensure a JRE/JDK is installed): {e}",
                self.java_bin
            ))
        })?;

        let written = std::fs::read_to_string(&sidecar).unwrap_or_default();
        let _ = std::fs::remove_file(&sidecar);
        let _ = std::fs::remove_file(&staged);

        let name = written.trim();
        if name.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!(class_file = %class_file.display(), stderr = %stderr.trim(), "helper produced no name");
            return Err(failed("helper wrote no class name".to_string()));
        }
        QualifiedName::parse(name).ok_or_else(|| failed(format!("unusable class name {name:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::synthesize;
    use std::fs;

    #[test]
    fn qualified_name_paths() {
        let name = QualifiedName::parse("org.example.Foo").unwrap();
        assert_eq!(name.as_str(), "org/example/Foo");
        assert_eq!(name.package(), Some("org/example"));
        assert_eq!(name.simple_name(), "Foo");
        assert_eq!(name.class_file_path(), PathBuf::from("org/example/Foo.class"));

        let bare = QualifiedName::parse("Foo").unwrap();
        assert_eq!(bare.package(), None);
        assert_eq!(bare.class_file_path(), PathBuf::from("Foo.class"));

        assert!(QualifiedName::parse("").is_none());
        assert!(QualifiedName::parse("a..B").is_none());
    }

    #[test]
    fn class_file_resolver_reads_header() {
        let dir = tempfile::tempdir().unwrap();
        let class = dir.path().join("Foo.class");
        fs::write(&class, synthesize("org/example/Foo")).unwrap();
        let name = ClassFileNameResolver.resolve(&class, dir.path()).unwrap();
        assert_eq!(name.as_str(), "org/example/Foo");
    }

    #[test]
    fn class_file_resolver_fails_on_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let class = dir.path().join("Junk.class");
        fs::write(&class, b"garbage").unwrap();
        let err = ClassFileNameResolver.resolve(&class, dir.path()).unwrap_err();
        assert!(matches!(err, Error::NameResolutionFailed { .. }));
    }

    #[cfg(unix)]
    fn fake_java(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("java");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).unwrap();
        path
    }

    #[cfg(unix)]
    #[test]
    fn java_resolver_reads_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("bin");
        fs::create_dir_all(&bin).unwrap();
        // args: -cp <cp> <main> <stem> <sidecar>
        let java = fake_java(&bin, r#"test -f "$4.class" && echo "com/acme/$4" > "$5""#);
        let class = dir.path().join("Widget.class");
        fs::write(&class, b"cafe").unwrap();
        let scratch = dir.path().join("scratch");

        let resolver = JavaNameResolver::new(java.to_string_lossy().to_string(), bin.clone());
        let name = resolver.resolve(&class, &scratch).unwrap();
        assert_eq!(name.as_str(), "com/acme/Widget");
        assert!(!scratch.join("Widget.CLASSNAME.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn java_resolver_empty_sidecar_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("bin");
        fs::create_dir_all(&bin).unwrap();
        let java = fake_java(&bin, r#"echo "" > "$5""#);
        let class = dir.path().join("Widget.class");
        fs::write(&class, b"cafe").unwrap();

        let resolver = JavaNameResolver::new(java.to_string_lossy().to_string(), bin.clone());
        let err = resolver.resolve(&class, &dir.path().join("scratch")).unwrap_err();
        assert!(matches!(err, Error::NameResolutionFailed { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn java_resolver_runs_the_configured_helper_main() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("bin");
        fs::create_dir_all(&bin).unwrap();
        let java = fake_java(&bin, r#"test "$3" = "NameDumper" && echo "x/$4" > "$5""#);
        let class = dir.path().join("Widget.class");
        fs::write(&class, b"cafe").unwrap();
        let scratch = dir.path().join("scratch");

        let default = JavaNameResolver::new(java.to_string_lossy().to_string(), bin.clone());
        assert!(default.resolve(&class, &scratch).is_err());

        let custom = default.with_helper_main("NameDumper");
        assert_eq!(custom.resolve(&class, &scratch).unwrap().as_str(), "x/Widget");
    }
}
