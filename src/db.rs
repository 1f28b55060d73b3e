use crate::config::StoreConfig;
use crate::dbpath::{self, StoreDirState, StoreFiles, DB_FILE, META_FILE};
use crate::error::Result as StoreResult;
use crate::schema::{self, Tier};
use crate::session::{LockMode, Session, Txn};
use anyhow::{anyhow, Context, Result};
use fs2::FileExt;
use redb::Database;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub struct DbHandle {
    pub db_dir: PathBuf,
    pub db: Database,
    pub config: StoreConfig,
    // Keep the lock file open for the lifetime of DbHandle, so the lock is held.
    _lock_file: File,
}

/// Open an osmtier store directory:
/// - validates directory
/// - initializes if empty (meta + tiers.redb)
/// - acquires exclusive lock
/// - opens redb database and creates every table
pub fn open(db_dir: &Path) -> Result<DbHandle> {
    open_with(db_dir, StoreConfig::default())
}

pub fn open_with(db_dir: &Path, config: StoreConfig) -> Result<DbHandle> {
    let state = dbpath::inspect_store_dir(db_dir)?;
    let files = StoreFiles::in_dir(db_dir);

    // Acquire lock first (prevents two processes initializing concurrently).
    let lock_file = open_and_lock(db_dir, &files)?;

    if state == StoreDirState::Fresh {
        init_db_dir(&files)
            .with_context(|| format!("Failed to initialize store in {}", db_dir.display()))?;
    }

    if !files.is_complete() {
        return Err(anyhow!(
            "Store directory is missing expected files ({} and {})",
            META_FILE,
            DB_FILE
        ));
    }

    let db = Database::create(&files.db)
        .with_context(|| format!("Failed to open redb file {}", files.db.display()))?;

    let handle = DbHandle {
        db_dir: db_dir.to_path_buf(),
        db,
        config,
        _lock_file: lock_file,
    };

    handle.ensure_schema()?;
    tracing::debug!(db_dir = %db_dir.display(), upsert = ?handle.config.upsert, "store opened");

    Ok(handle)
}

impl DbHandle {
    /// Creating an exclusive session opens (and so creates) every table.
    pub fn ensure_schema(&self) -> Result<()> {
        let session = self
            .begin(LockMode::Exclusive)
            .context("Failed to create store tables")?;
        session.commit().context("commit() failed")?;
        Ok(())
    }

    /// Start a transaction. Nothing is committed implicitly: call
    /// `Session::commit`, otherwise a write session is rolled back on drop.
    pub fn begin(&self, mode: LockMode) -> StoreResult<Session> {
        let txn = match mode {
            LockMode::AccessShare => Txn::Read(self.db.begin_read()?),
            LockMode::Exclusive => Txn::Write(self.db.begin_write()?),
        };
        Session::new(txn, mode, self.config.upsert)
    }

    /// Flag the store read-only (or writable again). Write batches check the
    /// flag before touching any table.
    pub fn set_read_only(&self, read_only: bool) -> StoreResult<()> {
        let session = self.begin(LockMode::Exclusive)?;
        session.set_meta(
            Tier::Active,
            schema::KEY_READ_ONLY,
            if read_only { "true" } else { "false" },
        )?;
        session.commit()?;
        tracing::info!(read_only, "store read-only flag updated");
        Ok(())
    }
}

fn open_and_lock(db_dir: &Path, files: &StoreFiles) -> Result<File> {
    let lock_path = &files.lock;
    let f = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(lock_path)
        .with_context(|| format!("Failed to open lock file {}", lock_path.display()))?;

    // Exclusive lock: one process per store.
    f.try_lock_exclusive()
        .with_context(|| format!("Store is locked (in use?): {}", db_dir.display()))?;

    Ok(f)
}

fn init_db_dir(files: &StoreFiles) -> Result<()> {
    if !files.meta.exists() {
        write_meta(&files.meta)?;
    }

    let db_file_path = &files.db;
    if !db_file_path.exists() {
        File::create(db_file_path)
            .with_context(|| format!("Failed to create {}", db_file_path.display()))?;
    }

    let _ = Database::create(db_file_path)
        .with_context(|| format!("Failed to initialize redb at {}", db_file_path.display()))?;

    Ok(())
}

fn write_meta(meta_path: &Path) -> Result<()> {
    let mut f = File::create(meta_path)
        .with_context(|| format!("Failed to create {}", meta_path.display()))?;

    let contents = r#"# osmtier store metadata
format = 1
app = "osmtier"
db_kind = "redb"
tiers = ["static", "active"]
row_format = 1
tile_bits = 16
"#;

    f.write_all(contents.as_bytes())
        .with_context(|| format!("Failed to write {}", meta_path.display()))?;

    f.sync_all()
        .with_context(|| format!("Failed to sync {}", meta_path.display()))?;

    Ok(())
}
