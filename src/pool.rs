//! Multiplexes many region queries over a few worker threads.
//!
//! Each worker opens one access-share session and keeps a handful of queries
//! in flight, giving each one `step` per turn. A slow region never holds a
//! thread for its whole run.

use crate::db::DbHandle;
use crate::query::{MapQuery, Progress};
use crate::session::LockMode;
use crate::sink::MapSink;
use anyhow::{anyhow, Result};
use crossbeam_channel as chan;
use std::collections::VecDeque;

/// Queries a worker interleaves at once.
const IN_FLIGHT: usize = 8;

struct RegionJob<S> {
    id: usize,
    query: MapQuery,
    sink: S,
}

#[derive(Debug)]
pub struct RegionResult<S> {
    /// Position of the job in the submitted list.
    pub id: usize,
    pub sink: S,
    pub steps: u64,
    /// Set when the query failed; the sink contents must then be discarded.
    pub error: Option<String>,
}

pub struct QueryPool<'a> {
    db: &'a DbHandle,
    workers: usize,
}

impl<'a> QueryPool<'a> {
    pub fn new(db: &'a DbHandle) -> Self {
        Self::with_workers(db, db.config.query_workers)
    }

    pub fn with_workers(db: &'a DbHandle, workers: usize) -> Self {
        Self {
            db,
            workers: workers.max(1),
        }
    }

    /// Run every query to completion. Results come back in submission order.
    pub fn run<S: MapSink + Send>(&self, jobs: Vec<(MapQuery, S)>) -> Result<Vec<RegionResult<S>>> {
        let total = jobs.len();
        let (job_tx, job_rx) = chan::bounded::<RegionJob<S>>(self.workers * IN_FLIGHT);
        let (res_tx, res_rx) = chan::unbounded::<RegionResult<S>>();
        let db = self.db;

        let mut results = crossbeam_utils::thread::scope(|scope| {
            for worker in 0..self.workers {
                let rx = job_rx.clone();
                let tx = res_tx.clone();
                scope.spawn(move |_| worker_loop(db, worker, rx, tx));
            }
            // Only worker clones remain; res_rx closes once they exit.
            drop(res_tx);
            drop(job_rx);

            for (id, (query, sink)) in jobs.into_iter().enumerate() {
                if job_tx.send(RegionJob { id, query, sink }).is_err() {
                    break;
                }
            }
            drop(job_tx);

            res_rx.iter().collect::<Vec<_>>()
        })
        .map_err(|_| anyhow!("query worker panicked"))?;

        if results.len() != total {
            return Err(anyhow!("query pool lost jobs: {} of {} returned", results.len(), total));
        }
        results.sort_by_key(|r| r.id);

        let failed = results.iter().filter(|r| r.error.is_some()).count();
        tracing::debug!(jobs = total, failed, workers = self.workers, "query pool drained");
        Ok(results)
    }
}

fn worker_loop<S: MapSink>(
    db: &DbHandle,
    worker: usize,
    rx: chan::Receiver<RegionJob<S>>,
    tx: chan::Sender<RegionResult<S>>,
) {
    let session = match db.begin(LockMode::AccessShare) {
        Ok(s) => Some(s),
        Err(e) => {
            tracing::warn!(worker, error = %e, "query worker could not open a session");
            None
        }
    };

    let mut in_flight: VecDeque<RegionJob<S>> = VecDeque::new();
    let mut open = true;

    loop {
        while open && in_flight.len() < IN_FLIGHT {
            if in_flight.is_empty() {
                match rx.recv() {
                    Ok(job) => in_flight.push_back(job),
                    Err(_) => open = false,
                }
            } else {
                match rx.try_recv() {
                    Ok(job) => in_flight.push_back(job),
                    Err(chan::TryRecvError::Empty) => break,
                    Err(chan::TryRecvError::Disconnected) => open = false,
                }
            }
        }

        let Some(mut job) = in_flight.pop_front() else {
            break;
        };

        let step = match &session {
            Some(s) => job.query.step(s, &mut job.sink).map_err(|e| e.to_string()),
            None => Err("no session".to_string()),
        };

        let error = match step {
            Ok(Progress::Pending) => {
                in_flight.push_back(job);
                continue;
            }
            Ok(Progress::Complete) => None,
            Err(e) => Some(e),
        };

        let done = RegionResult {
            id: job.id,
            steps: job.query.steps(),
            sink: job.sink,
            error,
        };
        if tx.send(done).is_err() {
            break;
        }
    }

    tracing::trace!(worker, "query worker finished");
}
