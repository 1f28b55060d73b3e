use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use osmtier::db::{self, DbHandle};
use osmtier::pool::QueryPool;
use osmtier::sink::{FingerprintSink, MapSink, TextSink};
use osmtier::upsert::UpsertStrategy;
use osmtier::{check, dbpath, diff, ids, logging, shapes, stats, store};
use osmtier::{LockMode, MapQuery, ObjectKind, StoreConfig, Tier};
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "osmtier")]
#[command(version, about = "Tiered, versioned map object store")]
struct Cli {
    /// Store name (no slashes) or path to a store directory.
    ///
    /// If it contains no path separators, it is treated as a name and placed under
    /// the default osmtier data directory (platform-specific).
    #[arg(long, default_value = "default")]
    db: String,

    /// Increase logging verbosity (use together with RUST_LOG for fine control).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// How marker rows are inserted: "native" or "probe" (look up, then insert).
    #[arg(long, default_value = "native")]
    upsert: String,

    /// Worker threads for multi-region queries (defaults to CPU count - 1, min 1)
    #[arg(long)]
    workers: Option<usize>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print store location and per-tier table statistics
    DbInfo,

    /// Apply JSON-lines diff files from a directory, in file-name order
    Apply {
        dir: PathBuf,

        /// Target tier
        #[arg(long, default_value = "active")]
        tier: String,

        /// Baseline load into the static tier (refreshes its counters afterwards)
        #[arg(long, default_value_t = false)]
        bulk: bool,
    },

    /// Recompute id counters from the stored objects
    RefreshIds {
        #[arg(long, default_value = "active")]
        tier: String,

        /// Also refresh the changeset and user id counters
        #[arg(long, default_value_t = false)]
        changesets: bool,
    },

    /// Recompute every way and relation bounding box of a tier
    RefreshBoxes {
        #[arg(long, default_value = "active")]
        tier: String,
    },

    /// Rebuild the node tile index of a tier
    Reindex {
        #[arg(long, default_value = "active")]
        tier: String,
    },

    /// Check that way and relation references resolve
    CheckRefs {
        #[arg(long, default_value = "active")]
        tier: String,

        /// Check one relation recursively instead of the whole tier
        #[arg(long)]
        relation: Option<i64>,

        /// Check one way instead of the whole tier
        #[arg(long, conflicts_with = "relation")]
        way: Option<i64>,
    },

    /// Stream everything inside one or more boxes
    Map {
        /// min_lon min_lat max_lon max_lat; repeat for several regions
        #[arg(long, num_args = 4, required = true, allow_negative_numbers = true, action = clap::ArgAction::Append)]
        bbox: Vec<f64>,

        /// Print only a digest of each region's output
        #[arg(long, default_value_t = false)]
        fingerprint: bool,
    },

    /// Flag the store read-only, or writable again with --off
    ReadOnly {
        #[arg(long, default_value_t = false)]
        off: bool,
    },
}

fn main() {
    if let Err(e) = run() {
        eprintln!("{:#}", e);
        std::process::exit(1);
    }
}

fn parse_tier(s: &str) -> Result<Tier> {
    Tier::parse(s).ok_or_else(|| anyhow!("unknown tier {s:?} (expected static or active)"))
}

fn progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    if let Ok(style) = ProgressStyle::with_template("{bar:40} {pos}/{len} {msg}") {
        pb.set_style(style);
    }
    pb
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose)?;

    let db_dir = dbpath::resolve_db_dir(&cli.db)
        .with_context(|| format!("Failed to resolve --db {}", cli.db))?;

    let upsert = UpsertStrategy::parse(&cli.upsert)
        .ok_or_else(|| anyhow!("unknown --upsert {:?} (expected native or probe)", cli.upsert))?;
    let mut config = StoreConfig::default().with_upsert(upsert);
    if let Some(n) = cli.workers {
        config = config.with_query_workers(n);
    }

    let dbh = db::open_with(&db_dir, config)
        .with_context(|| format!("Failed to open store in {}", db_dir.display()))?;

    match cli.cmd {
        Command::DbInfo => {
            println!("Store directory: {}", dbh.db_dir.display());
            println!();
            let session = dbh.begin(LockMode::AccessShare)?;
            stats::print(&stats::compute(&session)?);
            Ok(())
        }

        Command::Apply { dir, tier, bulk } => {
            let session = dbh.begin(LockMode::Exclusive)?;
            let pb = progress_bar();
            let files = diff::diff_files(&dir)?;
            if files.is_empty() {
                return Err(anyhow!("no diff files in {}", dir.display()));
            }
            tracing::info!(dir = %dir.display(), files = files.len(), bulk, "apply starting");

            let summary = if bulk {
                diff::bulk_load(&session, &files, &pb)?
            } else {
                diff::apply_files(&session, &files, parse_tier(&tier)?, &pb)?
            };
            session.commit().context("commit() failed")?;

            println!(
                "Applied {} file(s): {} object(s), {} created, {} box(es) updated",
                summary.files, summary.objects, summary.created, summary.boxes_updated
            );
            Ok(())
        }

        Command::RefreshIds { tier, changesets } => {
            let tier = parse_tier(&tier)?;
            let session = dbh.begin(LockMode::Exclusive)?;
            for (kind, next) in ids::refresh_counters(&session, tier)? {
                println!("{:<9} next id {}", kind.as_str(), next);
            }
            if changesets {
                let (cs, uid) = ids::refresh_changeset_counters(&session, tier)?;
                println!("changeset next id {cs}");
                println!("uid       next id {uid}");
            }
            session.commit().context("commit() failed")?;
            Ok(())
        }

        Command::RefreshBoxes { tier } => {
            let session = dbh.begin(LockMode::Exclusive)?;
            let out = shapes::refresh_all(&session, parse_tier(&tier)?)?;
            session.commit().context("commit() failed")?;
            println!(
                "Ways: {} ({} without box), relations: {} ({} without box), rows updated: {}",
                out.ways.len(),
                out.boxless_ways.len(),
                out.relations.len(),
                out.boxless_relations.len(),
                out.updated
            );
            Ok(())
        }

        Command::Reindex { tier } => {
            let session = dbh.begin(LockMode::Exclusive)?;
            let n = store::rebuild_tile_index(&session, parse_tier(&tier)?)?;
            session.commit().context("commit() failed")?;
            println!("Indexed {n} node(s)");
            Ok(())
        }

        Command::CheckRefs { tier, relation, way } => {
            let tier = parse_tier(&tier)?;
            let session = dbh.begin(LockMode::AccessShare)?;
            let report = match (relation, way) {
                (Some(id), _) => check::check_tree(&session, tier, ObjectKind::Relation, id)?,
                (_, Some(id)) => check::check_tree(&session, tier, ObjectKind::Way, id)?,
                (None, None) => check::check_tier(&session, tier)?,
            };
            for d in &report.dangling {
                println!("{d}");
            }
            for id in &report.truncated {
                println!("relation {id}: nesting too deep, not checked further");
            }
            println!(
                "Checked {} way(s), {} relation(s)",
                report.ways, report.relations
            );
            if !report.dangling.is_empty() {
                return Err(anyhow!("{} dangling reference(s)", report.dangling.len()));
            }
            Ok(())
        }

        Command::Map { bbox, fingerprint } => run_map(&dbh, &bbox, fingerprint),

        Command::ReadOnly { off } => {
            dbh.set_read_only(!off)?;
            println!("Read-only: {}", !off);
            Ok(())
        }
    }
}

fn run_map(dbh: &DbHandle, ords: &[f64], fingerprint: bool) -> Result<()> {
    let queries = ords
        .chunks(4)
        .map(MapQuery::from_ordinates)
        .collect::<osmtier::Result<Vec<_>>>()?;

    if queries.len() == 1 && !fingerprint {
        let session = dbh.begin(LockMode::AccessShare)?;
        let stdout = std::io::stdout();
        let mut sink = TextSink::new(stdout.lock());
        for mut q in queries {
            q.run_to_completion(&session, &mut sink)
                .context("region query failed")?;
        }
        return Ok(());
    }

    let pool = QueryPool::new(dbh);
    if fingerprint {
        let jobs = queries.into_iter().map(|q| (q, FingerprintSink::new())).collect();
        for r in pool.run(jobs)? {
            if let Some(e) = r.error {
                return Err(anyhow!("region {} failed: {e}", r.id));
            }
            println!("{} {}", r.sink.fingerprint(), r.sink.events());
        }
    } else {
        let jobs = queries.into_iter().map(|q| (q, TextSink::new(Vec::new()))).collect();
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        for r in pool.run(jobs)? {
            if let Some(e) = r.error {
                return Err(anyhow!("region {} failed: {e}", r.id));
            }
            let mut sink = r.sink;
            sink.finish()?;
            out.write_all(&sink.into_inner())?;
        }
    }
    Ok(())
}
