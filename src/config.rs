use anyhow::{Context, Result};
use serde::Serialize;
use std::env;
use std::path::{Path, PathBuf};

use crate::archive::{Extractor, JarTool, Packer, ZipArchiver};
use crate::cli::{ArchiverKind, Cli, NameResolverKind, OnCollision};
use crate::hierarchy::CollisionPolicy;
use crate::naming::{ClassFileNameResolver, DEFAULT_HELPER_MAIN, JavaNameResolver, NameResolver};
use crate::scan::{absolute, path_id};

pub const WORK_DIR_ENV: &str = "WAR_CLASSPATH_WORK_DIR";
pub const JAR_ENV: &str = "WAR_CLASSPATH_JAR";
pub const JAVA_ENV: &str = "WAR_CLASSPATH_JAVA";

const CACHE_FILE: &str = "resolve.lmdb";

/// Effective configuration after CLI flags, environment and defaults.
#[derive(Debug, Clone, Serialize)]
pub struct Settings {
    pub work_dir: PathBuf,
    pub db_path: PathBuf,
    pub archiver: ArchiverKind,
    pub jar_bin: String,
    pub name_resolver: NameResolverKind,
    pub java_bin: String,
    pub helper_classpath: Option<PathBuf>,
    pub helper_main: String,
    pub jobs: usize,
    pub on_collision: CollisionPolicy,
}

/// The capability implementations selected by [`Settings`].
pub struct Toolchain {
    pub extractor: Box<dyn Extractor>,
    pub packer: Box<dyn Packer>,
    pub resolver: Box<dyn NameResolver>,
}

impl Settings {
    pub fn resolve(cli: &Cli, binaries_root: Option<&Path>) -> Result<Self> {
        let work_dir = resolve_work_dir(cli, binaries_root)?;
        let db_path = cli.db.clone().unwrap_or_else(|| work_dir.join(CACHE_FILE));
        let on_collision = match cli.on_collision {
            Some(OnCollision::Fail) => CollisionPolicy::Fail,
            Some(OnCollision::KeepFirst) | None => CollisionPolicy::KeepFirst,
        };

        Ok(Self {
            work_dir,
            db_path,
            archiver: cli.archiver.unwrap_or_default(),
            jar_bin: env::var(JAR_ENV).unwrap_or_else(|_| "jar".to_string()),
            name_resolver: cli.name_resolver.unwrap_or_default(),
            java_bin: env::var(JAVA_ENV).unwrap_or_else(|_| "java".to_string()),
            helper_classpath: cli.helper_classpath.clone(),
            helper_main: cli
                .helper_main
                .clone()
                .unwrap_or_else(|| DEFAULT_HELPER_MAIN.to_string()),
            jobs: cli.jobs.unwrap_or(0),
            on_collision,
        })
    }

    pub fn toolchain(&self) -> Result<Toolchain> {
        let (extractor, packer): (Box<dyn Extractor>, Box<dyn Packer>) = match self.archiver {
            ArchiverKind::Zip => (Box::new(ZipArchiver), Box::new(ZipArchiver)),
            ArchiverKind::Jar => (
                Box::new(JarTool::new(self.jar_bin.clone())),
                Box::new(JarTool::new(self.jar_bin.clone())),
            ),
        };
        let resolver: Box<dyn NameResolver> = match self.name_resolver {
            NameResolverKind::Classfile => Box::new(ClassFileNameResolver),
            NameResolverKind::Java => {
                let helper = self
                    .helper_classpath
                    .clone()
                    .context("--helper-classpath is required with --name-resolver java")?;
                Box::new(
                    JavaNameResolver::new(self.java_bin.clone(), helper)
                        .with_helper_main(self.helper_main.clone()),
                )
            }
        };
        Ok(Toolchain {
            extractor,
            packer,
            resolver,
        })
    }
}

fn resolve_work_dir(cli: &Cli, binaries_root: Option<&Path>) -> Result<PathBuf> {
    if let Some(p) = cli.work_dir.clone() {
        return Ok(p);
    }

    if let Ok(p) = env::var(WORK_DIR_ENV) {
        return Ok(PathBuf::from(p));
    }

    let root = binaries_root
        .context("no binaries root given; pass --work-dir or set WAR_CLASSPATH_WORK_DIR")?;
    Ok(war_classpath_home()?.join(default_work_dir_name(root)))
}

/// `<root-dir-name>-<id>`: readable, yet distinct for same-named roots.
pub fn default_work_dir_name(binaries_root: &Path) -> String {
    let root = absolute(binaries_root);
    let name = root
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "root".to_string());
    format!("{name}-{}", path_id(&root))
}

fn war_classpath_home() -> Result<PathBuf> {
    let base = dirs::data_local_dir()
        .or_else(dirs::cache_dir)
        .or_else(dirs::home_dir)
        .ok_or_else(|| anyhow::anyhow!("Failed to resolve data directory"))?;
    Ok(base.join("war-classpath"))
}

/// Removes the work directory so the next build starts clean.
pub fn reset_work_dir(work_dir: &Path) -> Result<()> {
    if work_dir.exists() {
        std::fs::remove_dir_all(work_dir)
            .with_context(|| format!("Failed to remove work directory: {}", work_dir.display()))?;
    }
    Ok(())
}
