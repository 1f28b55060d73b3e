//! Resumable region query.
//!
//! `MapQuery` answers "everything inside this box, fully resolved" as a fixed
//! sequence of phases. Each `step` does one bounded unit of work (one tile
//! batch or one chunk of `ID_BATCH` ids) so many queries can be interleaved on
//! a small number of threads. The order is: nodes in the box (static tier
//! first, skipping ids the active tier owns), ways using those nodes, the
//! extra nodes those ways need, then relations referencing any known node or
//! way.

use crate::config::ID_BATCH;
use crate::error::{Result, StoreError};
use crate::geom::Bbox;
use crate::osm::{ObjectKind, OsmObject};
use crate::schema::Tier;
use crate::session::{Session, TileCursor};
use crate::sink::MapSink;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Pending,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IdSet {
    RetainedNodes,
    ExtraNodes,
    Ways,
    Relations,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Init,
    StartNodeScan(Tier),
    DrainNodeScan(Tier),
    FindMemberWays(Tier),
    ComputeExtraNodes,
    EmitExtraNodes(Tier),
    ResetForWays,
    EmitWays(Tier),
    FindRelationsByNode(Tier, IdSet),
    FindRelationsByWay(Tier),
    ResetForRelations,
    EmitRelations(Tier),
    Finish,
}

use Tier::{Active, Static};

const PHASES: [Phase; 23] = [
    Phase::Init,
    Phase::StartNodeScan(Static),
    Phase::DrainNodeScan(Static),
    Phase::StartNodeScan(Active),
    Phase::DrainNodeScan(Active),
    Phase::FindMemberWays(Static),
    Phase::FindMemberWays(Active),
    Phase::ComputeExtraNodes,
    Phase::EmitExtraNodes(Static),
    Phase::EmitExtraNodes(Active),
    Phase::ResetForWays,
    Phase::EmitWays(Static),
    Phase::EmitWays(Active),
    Phase::FindRelationsByNode(Static, IdSet::RetainedNodes),
    Phase::FindRelationsByNode(Active, IdSet::RetainedNodes),
    Phase::FindRelationsByNode(Static, IdSet::ExtraNodes),
    Phase::FindRelationsByNode(Active, IdSet::ExtraNodes),
    Phase::FindRelationsByWay(Static),
    Phase::FindRelationsByWay(Active),
    Phase::ResetForRelations,
    Phase::EmitRelations(Static),
    Phase::EmitRelations(Active),
    Phase::Finish,
];

/// Frozen, sorted snapshot of an id set consumed `ID_BATCH` at a time.
#[derive(Debug)]
struct IdCursor {
    ids: Vec<i64>,
    pos: usize,
}

#[derive(Debug)]
pub struct MapQuery {
    bbox: Bbox,
    idx: usize,
    failure: Option<String>,
    tiles: Option<TileCursor>,
    cursor: Option<IdCursor>,
    retained_nodes: BTreeSet<i64>,
    way_member_nodes: BTreeSet<i64>,
    extra_nodes: BTreeSet<i64>,
    retained_ways: BTreeSet<i64>,
    retained_relations: BTreeSet<i64>,
    steps: u64,
    emitted: u64,
}

impl MapQuery {
    /// Rejects inverted, non-finite or out-of-range boxes before a query exists.
    pub fn new(bbox: Bbox) -> Result<Self> {
        let bbox = bbox.validated()?;
        Ok(Self {
            bbox,
            idx: 0,
            failure: None,
            tiles: None,
            cursor: None,
            retained_nodes: BTreeSet::new(),
            way_member_nodes: BTreeSet::new(),
            extra_nodes: BTreeSet::new(),
            retained_ways: BTreeSet::new(),
            retained_relations: BTreeSet::new(),
            steps: 0,
            emitted: 0,
        })
    }

    /// `[min_lon, min_lat, max_lon, max_lat]`; anything else is rejected
    /// before a query exists.
    pub fn from_ordinates(ords: &[f64]) -> Result<Self> {
        Self::new(Bbox::from_ordinates(ords)?)
    }

    pub fn bbox(&self) -> &Bbox {
        &self.bbox
    }

    pub fn is_complete(&self) -> bool {
        self.idx >= PHASES.len()
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Objects handed to the sink so far.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Back to the first phase with every set and cursor released.
    pub fn reset(&mut self) {
        self.idx = 0;
        self.failure = None;
        self.steps = 0;
        self.emitted = 0;
        self.clear_state();
    }

    fn clear_state(&mut self) {
        self.tiles = None;
        self.cursor = None;
        self.retained_nodes.clear();
        self.way_member_nodes.clear();
        self.extra_nodes.clear();
        self.retained_ways.clear();
        self.retained_relations.clear();
    }

    /// Integer form of `step`: 0 while work remains, 1 when complete, -1 once
    /// the query has failed. A failed query stays failed until `reset`, and
    /// whatever was already streamed must be discarded.
    pub fn continue_query<S: MapSink + ?Sized>(&mut self, session: &Session, sink: &mut S) -> i32 {
        match self.step(session, sink) {
            Ok(Progress::Pending) => 0,
            Ok(Progress::Complete) => 1,
            Err(_) => -1,
        }
    }

    pub fn run_to_completion<S: MapSink + ?Sized>(&mut self, session: &Session, sink: &mut S) -> Result<()> {
        while self.step(session, sink)? == Progress::Pending {}
        Ok(())
    }

    /// Advance by one bounded unit of work.
    pub fn step<S: MapSink + ?Sized>(&mut self, session: &Session, sink: &mut S) -> Result<Progress> {
        if let Some(msg) = &self.failure {
            return Err(StoreError::InvalidArgument(format!("query already failed: {msg}")));
        }
        if self.is_complete() {
            return Ok(Progress::Complete);
        }

        self.steps += 1;
        let phase = PHASES[self.idx];
        match self.run_phase(phase, session, sink) {
            Ok(true) => {
                self.idx += 1;
                tracing::trace!(?phase, step = self.steps, "phase done");
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(?phase, error = %e, "region query failed");
                self.failure = Some(e.to_string());
                self.clear_state();
                return Err(e);
            }
        }

        Ok(if self.is_complete() {
            Progress::Complete
        } else {
            Progress::Pending
        })
    }

    /// Returns true once the phase is finished.
    fn run_phase<S: MapSink + ?Sized>(&mut self, phase: Phase, session: &Session, sink: &mut S) -> Result<bool> {
        match phase {
            Phase::Init => {
                sink.store_is_diff(false);
                sink.store_bounds(&self.bbox);
                Ok(true)
            }
            Phase::StartNodeScan(_) => {
                self.tiles = Some(TileCursor::new(&self.bbox));
                Ok(true)
            }
            Phase::DrainNodeScan(tier) => self.drain_nodes(session, sink, tier),
            Phase::FindMemberWays(tier) => self.find_member_ways(session, tier),
            Phase::ComputeExtraNodes => {
                self.extra_nodes = self
                    .way_member_nodes
                    .difference(&self.retained_nodes)
                    .copied()
                    .collect();
                Ok(true)
            }
            Phase::EmitExtraNodes(tier) => self.emit_chunk(session, sink, tier, ObjectKind::Node, IdSet::ExtraNodes),
            Phase::ResetForWays | Phase::ResetForRelations => {
                sink.reset();
                Ok(true)
            }
            Phase::EmitWays(tier) => self.emit_chunk(session, sink, tier, ObjectKind::Way, IdSet::Ways),
            Phase::FindRelationsByNode(tier, set) => self.find_relations(session, tier, ObjectKind::Node, set),
            Phase::FindRelationsByWay(tier) => self.find_relations(session, tier, ObjectKind::Way, IdSet::Ways),
            Phase::EmitRelations(tier) => {
                self.emit_chunk(session, sink, tier, ObjectKind::Relation, IdSet::Relations)
            }
            Phase::Finish => {
                sink.finish()?;
                tracing::debug!(
                    nodes = self.retained_nodes.len() + self.extra_nodes.len(),
                    ways = self.retained_ways.len(),
                    relations = self.retained_relations.len(),
                    steps = self.steps,
                    "region query complete"
                );
                self.clear_state();
                Ok(true)
            }
        }
    }

    fn set(&self, which: IdSet) -> &BTreeSet<i64> {
        match which {
            IdSet::RetainedNodes => &self.retained_nodes,
            IdSet::ExtraNodes => &self.extra_nodes,
            IdSet::Ways => &self.retained_ways,
            IdSet::Relations => &self.retained_relations,
        }
    }

    /// Next chunk of `which`, and whether it is the last one.
    fn take_chunk(&mut self, which: IdSet) -> (Vec<i64>, bool) {
        if self.cursor.is_none() {
            let ids = self.set(which).iter().copied().collect();
            self.cursor = Some(IdCursor { ids, pos: 0 });
        }
        let Some(cur) = self.cursor.as_mut() else {
            return (Vec::new(), true);
        };
        let end = (cur.pos + ID_BATCH).min(cur.ids.len());
        let chunk = cur.ids[cur.pos..end].to_vec();
        cur.pos = end;
        let last = end >= cur.ids.len();
        if last {
            self.cursor = None;
        }
        (chunk, last)
    }

    /// The static tier only answers for ids the active tier has never seen.
    fn owned_by(session: &Session, tier: Tier, kind: ObjectKind, id: i64) -> Result<bool> {
        Ok(tier == Tier::Active || !session.has_id(Tier::Active, kind, id)?)
    }

    fn drain_nodes<S: MapSink + ?Sized>(&mut self, session: &Session, sink: &mut S, tier: Tier) -> Result<bool> {
        let Some(tiles) = self.tiles.as_mut() else {
            return Err(StoreError::Integrity("node scan drained before it was started".into()));
        };
        let ids = session.node_tile_batch(tier, tiles, ID_BATCH)?;
        let exhausted = tiles.is_exhausted();

        for id in ids {
            if self.retained_nodes.contains(&id) || !Self::owned_by(session, tier, ObjectKind::Node, id)? {
                continue;
            }
            let Some(row) = session.current_row(tier, ObjectKind::Node, id)? else {
                continue;
            };
            if let OsmObject::Node(n) = &row.object {
                if self.bbox.contains_point(n.lat, n.lon) {
                    self.retained_nodes.insert(id);
                    sink.store_node(n);
                    self.emitted += 1;
                }
            }
        }

        if exhausted {
            self.tiles = None;
        }
        Ok(exhausted)
    }

    fn find_member_ways(&mut self, session: &Session, tier: Tier) -> Result<bool> {
        let (chunk, last) = self.take_chunk(IdSet::RetainedNodes);
        for node in chunk {
            let candidates = session.way_parents(tier, node)?;
            for way in session.live_parents(tier, ObjectKind::Way, &candidates)? {
                if self.retained_ways.contains(&way) || !Self::owned_by(session, tier, ObjectKind::Way, way)? {
                    continue;
                }
                if let Some(row) = session.current_row(tier, ObjectKind::Way, way)? {
                    if let OsmObject::Way(w) = row.object {
                        self.retained_ways.insert(way);
                        self.way_member_nodes.extend(w.refs);
                    }
                }
            }
        }
        Ok(last)
    }

    fn find_relations(&mut self, session: &Session, tier: Tier, kind: ObjectKind, which: IdSet) -> Result<bool> {
        let (chunk, last) = self.take_chunk(which);
        for id in chunk {
            let candidates = session.relation_parents(tier, kind, id)?;
            for rel in session.live_parents(tier, ObjectKind::Relation, &candidates)? {
                if !self.retained_relations.contains(&rel)
                    && Self::owned_by(session, tier, ObjectKind::Relation, rel)?
                {
                    self.retained_relations.insert(rel);
                }
            }
        }
        Ok(last)
    }

    fn emit_chunk<S: MapSink + ?Sized>(
        &mut self,
        session: &Session,
        sink: &mut S,
        tier: Tier,
        kind: ObjectKind,
        which: IdSet,
    ) -> Result<bool> {
        let (chunk, last) = self.take_chunk(which);
        for id in chunk {
            if !Self::owned_by(session, tier, kind, id)? {
                continue;
            }
            if let Some(row) = session.current_row(tier, kind, id)? {
                sink.store_object(&row.object);
                self.emitted += 1;
            }
        }
        Ok(last)
    }
}
