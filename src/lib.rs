//! # war-classpath
//!
//! Prepares the compiled output of a large multi-module Java web application
//! for whole-program analysis: one canonical jar per web archive, a
//! deduplicated set of library jars, and a lookup from a function name to
//! the archive that defines it.
//!
//! ## Architecture
//!
//! - **scan**: Directory walking and path helpers
//! - **index**: Content-deduplicated file index keyed by file name
//! - **archive**: Extract/pack capabilities (in-process zip or the JDK `jar` tool)
//! - **classfile**: Class file header reader
//! - **naming**: Qualified-name resolution for class files
//! - **hierarchy**: Canonical package tree construction with prefix fallback
//! - **manifest**: Manifest model, persistence and the build pipeline
//! - **resolver**: Function-to-archive lookup with on-demand library unpacking
//! - **cache**: Persistent resolution cache (LMDB)
//! - **config**: Effective settings and toolchain selection
//! - **error**: Typed errors

pub mod archive;
pub mod cache;
pub mod classfile;
pub mod cli;
pub mod config;
pub mod error;
pub mod hierarchy;
pub mod index;
pub mod manifest;
pub mod naming;
pub mod resolver;
pub mod scan;

pub use error::{Error, Result};
