//! Persistent cache of function-owner lookups.
//!
//! Uses LMDB (via heed). Entries are keyed by the manifest fingerprint and
//! the class file path, so a rebuilt manifest never serves stale answers,
//! and a repeated run against the same manifest answers from the cache
//! without scanning class trees or unpacking library jars.

use heed::types::Str;
use heed::{Database, Env, EnvFlags, EnvOpenOptions, RoTxn};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::resolver::Resolution;

pub const RESOLVED_DB: &str = "resolved";

const DEFAULT_MAP_SIZE: usize = 256 * 1024 * 1024;
const DEFAULT_MAX_DBS: u32 = 4;

type StrDb = Database<Str, Str>;

#[derive(Debug)]
pub struct ResolutionCache {
    env: Arc<Env>,
    db_path: PathBuf,
    resolved: StrDb,
}

impl ResolutionCache {
    pub fn open(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }

        let env = Arc::new(open_env(&db_path)?);
        let mut wtxn = env.write_txn()?;
        let resolved = env.create_database::<Str, Str>(&mut wtxn, Some(RESOLVED_DB))?;
        wtxn.commit()?;

        Ok(Self {
            env,
            db_path,
            resolved,
        })
    }

    pub fn get(&self, fingerprint: &str, class_path: &str) -> Result<Option<Resolution>> {
        let key = cache_key(fingerprint, class_path);
        let rtxn = self.env.read_txn()?;
        let Some(raw) = self.resolved.get(&rtxn, key.as_str())? else {
            return Ok(None);
        };
        Ok(serde_json::from_str::<Resolution>(raw).ok())
    }

    /// Stores a found resolution; misses are never cached.
    pub fn put(&self, fingerprint: &str, class_path: &str, resolution: &Resolution) -> Result<()> {
        if resolution.archive().is_none() {
            return Ok(());
        }
        let key = cache_key(fingerprint, class_path);
        let payload = serde_json::to_string(resolution).map_err(|e| Error::Cache(e.to_string()))?;
        let mut wtxn = self.env.write_txn()?;
        self.resolved.put(&mut wtxn, key.as_str(), payload.as_str())?;
        wtxn.commit()?;
        Ok(())
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let rtxn = self.env.read_txn()?;
        let resolved_entries = table_len(&self.resolved, &rtxn)?;
        let mut manifests: Vec<String> = Vec::new();
        for item in self.resolved.iter(&rtxn)? {
            let (k, _) = item?;
            if let Some((fingerprint, _)) = k.split_once("::")
                && !manifests.iter().any(|m| m == fingerprint)
            {
                manifests.push(fingerprint.to_string());
            }
        }
        Ok(CacheStats {
            db_path: self.db_path.to_string_lossy().to_string(),
            resolved_entries,
            manifests: manifests.len() as u64,
        })
    }
}

fn cache_key(fingerprint: &str, class_path: &str) -> String {
    format!("{fingerprint}::{class_path}")
}

fn open_env(db_path: &Path) -> Result<Env> {
    let mut options = EnvOpenOptions::new();
    options.map_size(DEFAULT_MAP_SIZE);
    options.max_dbs(DEFAULT_MAX_DBS);
    // SAFETY: We do not use NO_LOCK and keep default LMDB locking guarantees.
    // NO_SUB_DIR keeps the cache a single file at the configured path.
    unsafe {
        options.flags(EnvFlags::NO_SUB_DIR);
        options
            .open(db_path)
            .map_err(|e| Error::Cache(format!("failed to open cache {}: {e}", db_path.display())))
    }
}

fn table_len(db: &StrDb, rtxn: &RoTxn<'_>) -> Result<u64> {
    let mut count = 0u64;
    for item in db.iter(rtxn)? {
        let _ = item?;
        count += 1;
    }
    Ok(count)
}

/// Deletes the cache file and its LMDB lock file.
pub fn clear_cache(db_path: &Path) -> Result<()> {
    for path in [db_path.to_path_buf(), lmdb_lock_path(db_path)] {
        if path.exists() {
            std::fs::remove_file(&path).map_err(|e| Error::io(&path, e))?;
        }
    }
    Ok(())
}

fn lmdb_lock_path(db_path: &Path) -> PathBuf {
    let mut os = db_path.as_os_str().to_os_string();
    os.push("-lock");
    PathBuf::from(os)
}

#[derive(Debug, Serialize)]
pub struct CacheStats {
    pub db_path: String,
    pub resolved_entries: u64,
    pub manifests: u64,
}
