//! Where a store lives on disk and whether a directory holds one.

use anyhow::{anyhow, Context, Result};
use directories::ProjectDirs;
use std::fs;
use std::path::{Path, PathBuf};

/// Both tiers share one redb file.
pub const DB_FILE: &str = "tiers.redb";
pub const META_FILE: &str = "meta.toml";
pub const LOCK_FILE: &str = "LOCK";

/// The files making up one store directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreFiles {
    pub db: PathBuf,
    pub meta: PathBuf,
    pub lock: PathBuf,
}

impl StoreFiles {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            db: dir.join(DB_FILE),
            meta: dir.join(META_FILE),
            lock: dir.join(LOCK_FILE),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.db.is_file() && self.meta.is_file()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreDirState {
    /// Missing (now created) or empty; tables still have to be laid out.
    Fresh,
    /// Holds the tier database and its meta file.
    Existing,
}

fn is_store_name(s: &str) -> bool {
    !s.is_empty() && !s.contains(['/', '\\'])
}

pub fn stores_base_dir() -> Result<PathBuf> {
    let proj = ProjectDirs::from("org", "osmtier", "osmtier")
        .ok_or_else(|| anyhow!("No platform data directory to keep named stores in"))?;
    Ok(proj.data_dir().join("stores"))
}

/// `--db berlin` names a store under the platform data directory; anything
/// with a path separator is a store directory taken as given.
pub fn resolve_db_dir(db: &str) -> Result<PathBuf> {
    if is_store_name(db) {
        Ok(stores_base_dir()?.join(db))
    } else {
        Ok(PathBuf::from(db))
    }
}

/// Classify `dir`, creating it when missing. A non-empty directory without
/// the tier database and meta file is refused so map data is never written
/// into an unrelated directory.
pub fn inspect_store_dir(dir: &Path) -> Result<StoreDirState> {
    if !dir.exists() {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create store directory {}", dir.display()))?;
        return Ok(StoreDirState::Fresh);
    }
    if !dir.is_dir() {
        return Err(anyhow!("Store path {} is not a directory", dir.display()));
    }

    let mut entries = fs::read_dir(dir)
        .with_context(|| format!("Failed to read store directory {}", dir.display()))?;
    if entries.next().transpose()?.is_none() {
        return Ok(StoreDirState::Fresh);
    }

    if StoreFiles::in_dir(dir).is_complete() {
        Ok(StoreDirState::Existing)
    } else {
        Err(anyhow!(
            "{} is not an osmtier store (no {} and {} in it)",
            dir.display(),
            DB_FILE,
            META_FILE
        ))
    }
}
