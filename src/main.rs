use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;
use war_classpath::cache::{ResolutionCache, clear_cache};
use war_classpath::cli::{Cli, Commands, KindArg};
use war_classpath::config::{Settings, Toolchain, reset_work_dir};
use war_classpath::index::{FileIndex, FileKind};
use war_classpath::manifest::{Manifest, ManifestBuilder};
use war_classpath::resolver::{ResolvedFunction, RootResolver};

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command.clone() {
        Commands::Build {
            binaries_root,
            force,
        } => {
            let settings = Settings::resolve(&cli, Some(binaries_root.as_path()))?;
            if force {
                reset_work_dir(&settings.work_dir)?;
            }
            if Manifest::exists(&settings.work_dir) {
                print_json(&BuildSkipped {
                    skipped: true,
                    manifest: Manifest::path(&settings.work_dir),
                })?;
                return Ok(());
            }
            let tools = settings.toolchain()?;
            let (_, report) = builder(&settings, &tools)
                .build(&binaries_root, &settings.work_dir)
                .context("Failed to build manifest")?;
            print_json(&report)?;
        }
        Commands::Resolve {
            binaries_root,
            functions,
            no_cache,
        } => {
            let settings = Settings::resolve(&cli, Some(binaries_root.as_path()))?;
            let tools = settings.toolchain()?;
            let manifest = ensure_manifest(&settings, &tools, &binaries_root)?;
            let cache = if no_cache {
                None
            } else {
                Some(ResolutionCache::open(settings.db_path.clone())?)
            };

            let mut resolver = RootResolver::new(&manifest, &settings.work_dir, tools.extractor.as_ref());
            if let Some(cache) = cache.as_ref() {
                resolver = resolver.with_cache(cache);
            }
            let results = resolver.resolve_all(&functions);
            print_json(&ResolveOutput {
                manifest: Manifest::path(&settings.work_dir),
                libraries_unpacked: resolver.unpack_cache().extracted(),
                results,
            })?;
        }
        Commands::Index { dir, kind } => {
            let kind = match kind {
                KindArg::War => FileKind::ArchiveRoot,
                KindArg::Jar => FileKind::ArchiveLib,
                KindArg::Class => FileKind::Class,
            };
            let index = FileIndex::collect(&dir, kind)
                .with_context(|| format!("Failed to index {}", dir.display()))?;
            print_json(&index)?;
        }
        Commands::Stats { binaries_root } => {
            let settings = Settings::resolve(&cli, binaries_root.as_deref())?;
            let cache = ResolutionCache::open(settings.db_path)?;
            print_json(&cache.stats()?)?;
        }
        Commands::Clear { binaries_root } => {
            let settings = Settings::resolve(&cli, binaries_root.as_deref())?;
            clear_cache(&settings.db_path)?;
        }
        Commands::Config { binaries_root } => {
            let settings = Settings::resolve(&cli, binaries_root.as_deref())?;
            print_json(&settings)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn builder<'a>(settings: &Settings, tools: &'a Toolchain) -> ManifestBuilder<'a> {
    ManifestBuilder::new(
        tools.extractor.as_ref(),
        tools.packer.as_ref(),
        tools.resolver.as_ref(),
    )
    .with_policy(settings.on_collision)
    .with_jobs(settings.jobs)
}

fn ensure_manifest(settings: &Settings, tools: &Toolchain, binaries_root: &Path) -> Result<Manifest> {
    if Manifest::exists(&settings.work_dir) {
        return Manifest::load(&settings.work_dir).context("Failed to load manifest");
    }
    info!(root = %binaries_root.display(), "manifest missing, building it first");
    let (manifest, _) = builder(settings, tools)
        .build(binaries_root, &settings.work_dir)
        .context("Failed to build manifest")?;
    Ok(manifest)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[derive(Debug, Serialize)]
struct BuildSkipped {
    skipped: bool,
    manifest: PathBuf,
}

#[derive(Debug, Serialize)]
struct ResolveOutput {
    manifest: PathBuf,
    libraries_unpacked: usize,
    results: Vec<ResolvedFunction>,
}
