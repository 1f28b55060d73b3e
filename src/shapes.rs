//! Shape cache: bounding boxes of live ways and relations, kept in step with
//! their member nodes, plus a log of earlier boxes for point-in-time lookups.

use crate::codec;
use crate::config::MAX_RELATION_DEPTH;
use crate::error::{Result, StoreError};
use crate::geom::{Bbox, union_opt};
use crate::osm::{ObjectKind, OsmObject};
use crate::schema::Tier;
use crate::session::Session;
use crate::store::{self, StoreReport};
use std::collections::{BTreeSet, HashSet};

/// A box that was valid for `[start, end)` while `version` was live.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShapeEntry {
    pub version: u64,
    pub start: i64,
    pub end: i64,
    pub bbox: Bbox,
}

impl ShapeEntry {
    /// Value layout: i64 end LE, then the packed box.
    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(40);
        out.extend_from_slice(&self.end.to_le_bytes());
        out.extend_from_slice(&self.bbox.pack());
        out
    }

    pub(crate) fn decode(version: u64, start: i64, bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 40 {
            return Err(StoreError::Integrity(format!(
                "shape log entry has {} bytes, expected 40",
                bytes.len()
            )));
        }
        let mut end = [0u8; 8];
        end.copy_from_slice(&bytes[..8]);
        let bbox = Bbox::unpack(&bytes[8..])
            .ok_or_else(|| StoreError::Integrity("shape log entry: truncated box".into()))?;
        Ok(Self {
            version,
            start,
            end: i64::from_le_bytes(end),
            bbox,
        })
    }

    pub fn covers(&self, t: i64) -> bool {
        self.start <= t && t < self.end
    }
}

#[derive(Debug, Default, Clone)]
pub struct RefreshReport {
    /// Ways whose box was recomputed.
    pub ways: BTreeSet<i64>,
    pub relations: BTreeSet<i64>,
    /// Recomputed to no box at all: no resolvable member geometry.
    pub boxless_ways: Vec<i64>,
    pub boxless_relations: Vec<i64>,
    /// Rows actually rewritten (box differed from the cached one).
    pub updated: usize,
}

/// Refresh every box a stored batch could have changed.
pub fn refresh_after_store(session: &Session, report: &StoreReport) -> Result<RefreshReport> {
    let tier = report.tier;
    let at = report.latest_timestamp;
    let mut out = RefreshReport::default();

    let ways = refresh_way_boxes(session, tier, &report.touched_nodes, &report.touched_ways, at, &mut out)?;
    refresh_relation_boxes(
        session,
        tier,
        &report.touched_nodes,
        &ways,
        &report.touched_relations,
        at,
        &mut out,
    )?;

    tracing::debug!(
        ways = out.ways.len(),
        relations = out.relations.len(),
        updated = out.updated,
        "shape cache refreshed"
    );
    Ok(out)
}

/// Recompute the box of every way that was edited or references a touched
/// node, in either tier. Returns the affected way ids.
pub fn refresh_way_boxes(
    session: &Session,
    tier: Tier,
    touched_nodes: &BTreeSet<i64>,
    touched_ways: &BTreeSet<i64>,
    at: i64,
    out: &mut RefreshReport,
) -> Result<BTreeSet<i64>> {
    let mut affected = touched_ways.clone();
    for &node in touched_nodes {
        for t in Tier::ALL {
            let candidates = session.way_parents(t, node)?;
            affected.extend(session.live_parents(t, ObjectKind::Way, &candidates)?);
        }
    }

    for &id in &affected {
        let Some(row) = store::get_row(session, ObjectKind::Way, id)? else {
            continue;
        };
        let bbox = way_box(session, &row.object)?;
        if bbox.is_none() {
            tracing::warn!(way = id, "way has no resolvable member nodes, box cleared");
            out.boxless_ways.push(id);
        }
        if write_box(session, tier, ObjectKind::Way, id, bbox, at)? {
            out.updated += 1;
        }
        out.ways.insert(id);
    }
    Ok(affected)
}

/// Recompute relation boxes for edited relations and for every relation that
/// (transitively, up to `MAX_RELATION_DEPTH`) contains a touched node, an
/// affected way or an edited relation.
pub fn refresh_relation_boxes(
    session: &Session,
    tier: Tier,
    touched_nodes: &BTreeSet<i64>,
    affected_ways: &BTreeSet<i64>,
    touched_relations: &BTreeSet<i64>,
    at: i64,
    out: &mut RefreshReport,
) -> Result<BTreeSet<i64>> {
    let mut seeds: Vec<(ObjectKind, i64)> = Vec::new();
    seeds.extend(touched_nodes.iter().map(|id| (ObjectKind::Node, *id)));
    seeds.extend(affected_ways.iter().map(|id| (ObjectKind::Way, *id)));
    seeds.extend(touched_relations.iter().map(|id| (ObjectKind::Relation, *id)));

    let mut affected = touched_relations.clone();
    affected.extend(parent_relations(session, &seeds)?);

    for &id in &affected {
        if store::get_row(session, ObjectKind::Relation, id)?.is_none() {
            continue;
        }
        let bbox = relation_box(session, id)?;
        if bbox.is_none() {
            tracing::warn!(relation = id, "relation box unresolved, left without a box");
            out.boxless_relations.push(id);
        }
        if write_box(session, tier, ObjectKind::Relation, id, bbox, at)? {
            out.updated += 1;
        }
        out.relations.insert(id);
    }
    Ok(affected)
}

/// Live relations containing any of `seeds`, followed upwards through parent
/// relations. Stops after `MAX_RELATION_DEPTH` levels.
pub fn parent_relations(session: &Session, seeds: &[(ObjectKind, i64)]) -> Result<BTreeSet<i64>> {
    let mut found = BTreeSet::new();
    let mut frontier: Vec<(ObjectKind, i64)> = seeds.to_vec();

    for depth in 0..MAX_RELATION_DEPTH {
        let mut next = Vec::new();
        for &(kind, id) in &frontier {
            for t in Tier::ALL {
                let candidates = session.relation_parents(t, kind, id)?;
                for rel in session.live_parents(t, ObjectKind::Relation, &candidates)? {
                    if found.insert(rel) {
                        next.push((ObjectKind::Relation, rel));
                    }
                }
            }
        }
        if next.is_empty() {
            return Ok(found);
        }
        if depth + 1 == MAX_RELATION_DEPTH {
            tracing::warn!(pending = next.len(), "relation parent discovery hit depth bound");
        }
        frontier = next;
    }
    Ok(found)
}

fn node_position(session: &Session, id: i64) -> Result<Option<Bbox>> {
    Ok(match store::get_object(session, ObjectKind::Node, id)? {
        Some(OsmObject::Node(n)) => Some(Bbox::point(n.lat, n.lon)),
        _ => None,
    })
}

/// Min/max over the positions of the way's resolvable nodes.
pub fn way_box(session: &Session, way: &OsmObject) -> Result<Option<Bbox>> {
    let OsmObject::Way(w) = way else {
        return Ok(None);
    };
    let mut acc = None;
    let mut seen = HashSet::new();
    for &node in &w.refs {
        if !seen.insert(node) {
            continue;
        }
        if let Some(p) = node_position(session, node)? {
            acc = union_opt(acc, p);
        }
    }
    Ok(acc)
}

/// Union of member boxes, expanding member relations breadth-first. A
/// relation still holding unexpanded relation members after
/// `MAX_RELATION_DEPTH` levels has no box.
pub fn relation_box(session: &Session, id: i64) -> Result<Option<Bbox>> {
    let mut acc: Option<Bbox> = None;
    let mut visited = HashSet::from([id]);
    let mut frontier = vec![id];
    let mut depth = 0;

    while !frontier.is_empty() {
        if depth >= MAX_RELATION_DEPTH {
            return Ok(None);
        }
        let mut next = Vec::new();
        for rel in frontier {
            let Some(OsmObject::Relation(r)) = store::get_object(session, ObjectKind::Relation, rel)? else {
                continue;
            };
            for m in &r.members {
                match m.kind {
                    ObjectKind::Node => {
                        if let Some(p) = node_position(session, m.id)? {
                            acc = union_opt(acc, p);
                        }
                    }
                    ObjectKind::Way => {
                        if let Some(row) = store::get_row(session, ObjectKind::Way, m.id)? {
                            let b = match row.bbox {
                                Some(b) => Some(b),
                                None => way_box(session, &row.object)?,
                            };
                            if let Some(b) = b {
                                acc = union_opt(acc, b);
                            }
                        }
                    }
                    ObjectKind::Relation => {
                        if visited.insert(m.id) {
                            next.push(m.id);
                        }
                    }
                }
            }
        }
        frontier = next;
        depth += 1;
    }
    Ok(acc)
}

/// Store `bbox` on the live row, logging the box it replaces. A static-only
/// row is copied up first when the edit happened in the active tier.
fn write_box(
    session: &Session,
    target: Tier,
    kind: ObjectKind,
    id: i64,
    bbox: Option<Bbox>,
    at: i64,
) -> Result<bool> {
    let tier = if session.has_id(Tier::Active, kind, id)? {
        Tier::Active
    } else if target == Tier::Active {
        if !store::copy_up(session, kind, id)? {
            return Ok(false);
        }
        Tier::Active
    } else {
        Tier::Static
    };

    let Some(mut row) = session.current_row(tier, kind, id)? else {
        return Ok(false);
    };
    if row.bbox == bbox {
        return Ok(false);
    }
    if let Some(prev) = row.bbox {
        log_shape(session, tier, kind, id, row.version(), prev, row.bbox_since, at)?;
    }
    row.bbox = bbox;
    row.bbox_since = at;
    session.put_current(tier, &row)?;
    Ok(true)
}

/// Append the outgoing box with its validity interval `[start, end)`.
/// Empty intervals answer no query and are not logged.
#[allow(clippy::too_many_arguments)]
pub(crate) fn log_shape(
    session: &Session,
    tier: Tier,
    kind: ObjectKind,
    id: i64,
    version: u64,
    bbox: Bbox,
    start: i64,
    end: i64,
) -> Result<()> {
    if start >= end {
        return Ok(());
    }
    session.put_shape(tier, kind, id, &ShapeEntry { version, start, end, bbox })?;
    tracing::trace!(%kind, id, version, start, end, "shape logged");
    Ok(())
}

/// The box `id` had at time `t` in `tier`: the cached box if it was already
/// valid at `t`, otherwise the logged entry covering `t`.
pub fn shape_at(session: &Session, tier: Tier, kind: ObjectKind, id: i64, t: i64) -> Result<Option<Bbox>> {
    if kind == ObjectKind::Node {
        return Err(StoreError::InvalidArgument("nodes have no cached shape".into()));
    }
    if let Some(row) = session.current_row(tier, kind, id)? {
        if let Some(b) = row.bbox {
            if t >= row.bbox_since {
                return Ok(Some(b));
            }
        }
    }
    Ok(session
        .shape_log(tier, kind, id)?
        .into_iter()
        .find(|e| e.covers(t))
        .map(|e| e.bbox))
}

/// Recompute every way and relation box of `tier`. Blocking maintenance
/// operation.
pub fn refresh_all(session: &Session, tier: Tier) -> Result<RefreshReport> {
    let at = codec::now_secs();
    let ways: BTreeSet<i64> = session.current_ids(tier, ObjectKind::Way)?.into_iter().collect();
    let relations: BTreeSet<i64> = session.current_ids(tier, ObjectKind::Relation)?.into_iter().collect();

    let mut out = RefreshReport::default();
    refresh_way_boxes(session, tier, &BTreeSet::new(), &ways, at, &mut out)?;
    // Only the relations themselves: every way was just refreshed.
    refresh_relation_boxes(session, tier, &BTreeSet::new(), &BTreeSet::new(), &relations, at, &mut out)?;

    tracing::info!(
        tier = tier.as_str(),
        ways = out.ways.len(),
        relations = out.relations.len(),
        boxless_ways = out.boxless_ways.len(),
        boxless_relations = out.boxless_relations.len(),
        "boxes recomputed"
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::temp_store;
    use crate::session::LockMode;
    use crate::store::store_and_refresh;
    use crate::store::tests::{deleted, node, relation, way};

    fn cached_box(s: &Session, tier: Tier, kind: ObjectKind, id: i64) -> Option<Bbox> {
        s.current_row(tier, kind, id).unwrap().and_then(|r| r.bbox)
    }

    fn with_time(mut o: OsmObject, ts: i64) -> OsmObject {
        o.meta_mut().timestamp = ts;
        o
    }

    #[test]
    fn way_box_is_min_max_of_members() {
        let (_dir, db) = temp_store();
        let s = db.begin(LockMode::Exclusive).unwrap();
        store_and_refresh(
            &s,
            Tier::Active,
            vec![
                node(1, 1, 1.0, 1.0),
                node(2, 1, 5.0, 3.0),
                node(3, 1, 4.0, -2.0),
                way(10, 1, &[1, 2, 3, 1]),
            ],
        )
        .unwrap();
        assert_eq!(
            cached_box(&s, Tier::Active, ObjectKind::Way, 10),
            Some(Bbox::new(-2.0, 1.0, 3.0, 5.0))
        );
    }

    #[test]
    fn way_without_resolvable_nodes_has_no_box() {
        let (_dir, db) = temp_store();
        let s = db.begin(LockMode::Exclusive).unwrap();
        store_and_refresh(&s, Tier::Active, vec![node(1, 1, 1.0, 1.0), way(10, 1, &[1])]).unwrap();
        assert!(cached_box(&s, Tier::Active, ObjectKind::Way, 10).is_some());

        let (_, refresh) = store_and_refresh(&s, Tier::Active, vec![deleted(node(1, 2, 1.0, 1.0))]).unwrap();
        assert_eq!(refresh.boxless_ways, vec![10]);
        assert_eq!(cached_box(&s, Tier::Active, ObjectKind::Way, 10), None);

        let (_, refresh) = store_and_refresh(&s, Tier::Active, vec![way(11, 1, &[99])]).unwrap();
        assert_eq!(refresh.boxless_ways, vec![11]);
    }

    #[test]
    fn moved_node_updates_parent_and_logs_old_shape() {
        let (_dir, db) = temp_store();
        let s = db.begin(LockMode::Exclusive).unwrap();
        store_and_refresh(
            &s,
            Tier::Active,
            vec![
                with_time(node(1, 1, 0.0, 0.0), 100),
                with_time(node(2, 1, 1.0, 1.0), 100),
                with_time(way(10, 1, &[1, 2]), 100),
            ],
        )
        .unwrap();

        let (_, refresh) =
            store_and_refresh(&s, Tier::Active, vec![with_time(node(2, 2, 2.0, 3.0), 200)]).unwrap();
        assert!(refresh.ways.contains(&10));

        let new_box = Bbox::new(0.0, 0.0, 3.0, 2.0);
        let old_box = Bbox::new(0.0, 0.0, 1.0, 1.0);
        assert_eq!(cached_box(&s, Tier::Active, ObjectKind::Way, 10), Some(new_box));

        let log = s.shape_log(Tier::Active, ObjectKind::Way, 10).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!((log[0].start, log[0].end, log[0].bbox), (100, 200, old_box));

        let at = |t| shape_at(&s, Tier::Active, ObjectKind::Way, 10, t).unwrap();
        assert_eq!(at(50), None);
        assert_eq!(at(150), Some(old_box));
        assert_eq!(at(200), Some(new_box));
        assert!(shape_at(&s, Tier::Active, ObjectKind::Node, 1, 0).is_err());
    }

    #[test]
    fn relation_box_unions_members_and_survives_cycles() {
        let (_dir, db) = temp_store();
        let s = db.begin(LockMode::Exclusive).unwrap();
        store_and_refresh(
            &s,
            Tier::Active,
            vec![
                node(1, 1, 0.0, 0.0),
                node(2, 1, 1.0, 1.0),
                node(3, 1, -3.0, 4.0),
                way(10, 1, &[1, 2]),
                relation(20, 1, &[(ObjectKind::Way, 10), (ObjectKind::Relation, 21)]),
                relation(21, 1, &[(ObjectKind::Node, 3), (ObjectKind::Relation, 20)]),
            ],
        )
        .unwrap();
        let expected = Some(Bbox::new(0.0, -3.0, 4.0, 1.0));
        assert_eq!(cached_box(&s, Tier::Active, ObjectKind::Relation, 20), expected);
        assert_eq!(cached_box(&s, Tier::Active, ObjectKind::Relation, 21), expected);

        // Moving a node inside the way reaches both relations through the way.
        let (_, refresh) = store_and_refresh(&s, Tier::Active, vec![node(2, 2, 2.0, 2.0)]).unwrap();
        assert!(refresh.relations.contains(&20) && refresh.relations.contains(&21));
        assert_eq!(
            cached_box(&s, Tier::Active, ObjectKind::Relation, 20),
            Some(Bbox::new(0.0, -3.0, 4.0, 2.0))
        );
    }

    #[test]
    fn over_deep_relation_nesting_is_boxless() {
        let (_dir, db) = temp_store();
        let s = db.begin(LockMode::Exclusive).unwrap();
        let mut objects = vec![node(1, 1, 1.0, 1.0)];
        // 100 -> 101 -> ... -> 112 -> node 1
        for id in 100..112 {
            objects.push(relation(id, 1, &[(ObjectKind::Relation, id + 1)]));
        }
        objects.push(relation(112, 1, &[(ObjectKind::Node, 1)]));
        store_and_refresh(&s, Tier::Active, objects).unwrap();

        assert_eq!(relation_box(&s, 112).unwrap(), Some(Bbox::point(1.0, 1.0)));
        assert_eq!(relation_box(&s, 104).unwrap(), Some(Bbox::point(1.0, 1.0)));
        assert_eq!(relation_box(&s, 100).unwrap(), None);
        assert_eq!(cached_box(&s, Tier::Active, ObjectKind::Relation, 100), None);
    }

    #[test]
    fn active_node_edit_copies_static_parent_up() {
        let (_dir, db) = temp_store();
        let s = db.begin(LockMode::Exclusive).unwrap();
        store_and_refresh(
            &s,
            Tier::Static,
            vec![node(1, 1, 0.0, 0.0), node(2, 1, 1.0, 1.0), way(10, 1, &[1, 2])],
        )
        .unwrap();
        let static_box = Some(Bbox::new(0.0, 0.0, 1.0, 1.0));
        assert_eq!(cached_box(&s, Tier::Static, ObjectKind::Way, 10), static_box);

        store_and_refresh(&s, Tier::Active, vec![node(2, 2, 2.0, 2.0)]).unwrap();

        assert_eq!(cached_box(&s, Tier::Static, ObjectKind::Way, 10), static_box);
        assert!(s.has_id(Tier::Active, ObjectKind::Way, 10).unwrap());
        assert_eq!(
            cached_box(&s, Tier::Active, ObjectKind::Way, 10),
            Some(Bbox::new(0.0, 0.0, 2.0, 2.0))
        );
    }

    #[test]
    fn refresh_all_fills_missing_boxes() {
        let (_dir, db) = temp_store();
        let s = db.begin(LockMode::Exclusive).unwrap();
        store::store_objects(
            &s,
            Tier::Static,
            vec![node(1, 1, 0.0, 0.0), node(2, 1, 1.0, 1.0), way(10, 1, &[1, 2])],
        )
        .unwrap();
        assert_eq!(cached_box(&s, Tier::Static, ObjectKind::Way, 10), None);
        let out = refresh_all(&s, Tier::Static).unwrap();
        assert_eq!(out.updated, 1);
        assert!(cached_box(&s, Tier::Static, ObjectKind::Way, 10).is_some());
    }
}
