//! Diff replay and bulk loading from JSON-lines files.
//!
//! One object version per line:
//! `{"type":"node","id":1,"version":2,"timestamp":"2024-01-01T00:00:00Z",...}`.
//! Files in a directory are applied in file-name order, each file as one
//! batch. These are blocking maintenance operations: the caller holds an
//! exclusive session for the whole run and commits at the end.

use crate::codec;
use crate::error::Result as StoreResult;
use crate::ids;
use crate::osm::{MetaData, Node, OsmObject, Relation, Tags, Way};
use crate::schema::Tier;
use crate::session::Session;
use crate::store;
use anyhow::{Context, Result};
use indicatif::ProgressBar;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

fn visible_default() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordMeta {
    pub id: i64,
    pub version: u64,
    pub timestamp: String,
    #[serde(default)]
    pub changeset: i64,
    #[serde(default)]
    pub uid: i64,
    #[serde(default)]
    pub user: String,
    #[serde(default = "visible_default")]
    pub visible: bool,
    #[serde(default)]
    pub tags: Tags,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DiffRecord {
    Node {
        #[serde(flatten)]
        meta: RecordMeta,
        lat: f64,
        lon: f64,
    },
    Way {
        #[serde(flatten)]
        meta: RecordMeta,
        #[serde(default)]
        refs: Vec<i64>,
    },
    Relation {
        #[serde(flatten)]
        meta: RecordMeta,
        #[serde(default)]
        member_types: Vec<String>,
        #[serde(default)]
        member_ids: Vec<i64>,
        #[serde(default)]
        member_roles: Vec<String>,
    },
}

impl RecordMeta {
    fn split(self) -> StoreResult<(i64, MetaData, Tags)> {
        let meta = MetaData {
            version: self.version,
            timestamp: codec::parse_timestamp(&self.timestamp)?,
            changeset: self.changeset,
            uid: self.uid,
            username: self.user,
            visible: self.visible,
        };
        Ok((self.id, meta, self.tags))
    }
}

impl DiffRecord {
    pub fn into_object(self) -> StoreResult<OsmObject> {
        Ok(match self {
            DiffRecord::Node { meta, lat, lon } => {
                let (id, meta, tags) = meta.split()?;
                OsmObject::Node(Node { id, meta, tags, lat, lon })
            }
            DiffRecord::Way { meta, refs } => {
                let (id, meta, tags) = meta.split()?;
                OsmObject::Way(Way { id, meta, tags, refs })
            }
            DiffRecord::Relation {
                meta,
                member_types,
                member_ids,
                member_roles,
            } => {
                let (id, meta, tags) = meta.split()?;
                let types: Vec<&str> = member_types.iter().map(String::as_str).collect();
                let roles: Vec<&str> = member_roles.iter().map(String::as_str).collect();
                OsmObject::Relation(Relation::from_parallel(id, meta, tags, &types, &member_ids, &roles)?)
            }
        })
    }
}

#[derive(Debug, Default, Clone)]
pub struct ApplySummary {
    pub files: usize,
    pub objects: usize,
    pub created: usize,
    pub boxes_updated: usize,
}

/// Regular files directly inside `dir`, ordered by file name.
pub fn diff_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.with_context(|| format!("Failed to list {}", dir.display()))?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Parse one file. Blank lines and lines starting with `#` are skipped.
pub fn read_records(path: &Path) -> Result<Vec<OsmObject>> {
    let f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut out = Vec::new();
    for (n, line) in BufReader::new(f).lines().enumerate() {
        let line = line.with_context(|| format!("read {}", path.display()))?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let record: DiffRecord = serde_json::from_str(line)
            .with_context(|| format!("{}:{}: malformed record", path.display(), n + 1))?;
        let obj = record
            .into_object()
            .with_context(|| format!("{}:{}: invalid record", path.display(), n + 1))?;
        out.push(obj);
    }
    Ok(out)
}

/// Apply `files` in the given order, one batch per file, refreshing boxes
/// after each batch.
pub fn apply_files(session: &Session, files: &[PathBuf], tier: Tier, pb: &ProgressBar) -> Result<ApplySummary> {
    let mut summary = ApplySummary::default();
    pb.set_length(files.len() as u64);

    for path in files {
        pb.set_message(
            path.file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
        );
        let objects = read_records(path)?;
        let count = objects.len();
        let (report, refresh) = store::store_and_refresh(session, tier, objects)
            .with_context(|| format!("Failed to apply {}", path.display()))?;

        summary.files += 1;
        summary.objects += count;
        summary.created += report.created.len();
        summary.boxes_updated += refresh.updated;
        tracing::debug!(file = %path.display(), objects = count, "diff applied");
        pb.inc(1);
    }

    pb.finish_and_clear();
    tracing::info!(
        tier = tier.as_str(),
        files = summary.files,
        objects = summary.objects,
        created = summary.created,
        "diff replay finished"
    );
    Ok(summary)
}

pub fn apply_dir(session: &Session, dir: &Path, tier: Tier, pb: &ProgressBar) -> Result<ApplySummary> {
    let files = diff_files(dir)?;
    apply_files(session, &files, tier, pb)
}

/// Load baseline data into the static tier, then bring the counters of both
/// tiers past the loaded ids since nothing maintained them during the load.
pub fn bulk_load(session: &Session, files: &[PathBuf], pb: &ProgressBar) -> Result<ApplySummary> {
    let summary = apply_files(session, files, Tier::Static, pb)?;
    for tier in Tier::ALL {
        ids::refresh_counters(session, tier)
            .with_context(|| format!("Failed to refresh {} id counters", tier.as_str()))?;
        ids::refresh_changeset_counters(session, tier)
            .with_context(|| format!("Failed to refresh {} changeset counters", tier.as_str()))?;
    }
    Ok(summary)
}
