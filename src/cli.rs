use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "war-classpath")]
#[command(version)]
#[command(about = "Build a deduplicated classpath manifest from web application build output and locate the archive defining a function")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Working directory for scratch trees, packed jars and the manifest
    #[arg(long, value_name = "DIR", global = true)]
    pub work_dir: Option<PathBuf>,

    /// Archive backend used to extract and pack archives
    #[arg(long, value_enum, global = true)]
    pub archiver: Option<ArchiverKind>,

    /// How class files are mapped to their qualified names
    #[arg(long, value_enum, global = true)]
    pub name_resolver: Option<NameResolverKind>,

    /// Directory holding the compiled name-resolution helper (java resolver only)
    #[arg(long, value_name = "DIR", global = true)]
    pub helper_classpath: Option<PathBuf>,

    /// Main class of the name-resolution helper (java resolver only)
    #[arg(long, value_name = "CLASS", global = true)]
    pub helper_main: Option<String>,

    /// Worker threads for processing root archives (0 = one per core)
    #[arg(long, value_name = "N", global = true)]
    pub jobs: Option<usize>,

    /// What to do when two different classes map to the same path
    #[arg(long, value_enum, global = true)]
    pub on_collision: Option<OnCollision>,

    /// Persistent resolution cache file
    #[arg(long, value_name = "FILE", global = true)]
    pub db: Option<PathBuf>,

    /// Verbose logging (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Build the manifest for a binaries root unless it already exists
    Build {
        binaries_root: PathBuf,

        /// Discard the work directory and rebuild from scratch
        #[arg(long)]
        force: bool,
    },
    /// Find the archive containing each function's class
    Resolve {
        binaries_root: PathBuf,

        #[arg(required = true, value_name = "FUNCTION")]
        functions: Vec<String>,

        /// Skip the persistent resolution cache
        #[arg(long)]
        no_cache: bool,
    },
    /// Print the content-deduplicated index of a directory
    Index {
        dir: PathBuf,

        #[arg(long, value_enum, default_value_t = KindArg::Jar)]
        kind: KindArg,
    },
    /// Show resolution cache statistics
    Stats { binaries_root: Option<PathBuf> },
    /// Delete the resolution cache
    Clear { binaries_root: Option<PathBuf> },
    /// Print the effective settings
    Config { binaries_root: Option<PathBuf> },
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArchiverKind {
    /// In-process zip implementation
    #[default]
    Zip,
    /// The JDK `jar` tool
    Jar,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum NameResolverKind {
    /// Read the class file header in-process
    #[default]
    Classfile,
    /// Run the Java helper program
    Java,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum OnCollision {
    KeepFirst,
    Fail,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    War,
    Jar,
    Class,
}
