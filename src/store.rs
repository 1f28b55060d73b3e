//! Tiered object store: the per-object upsert that keeps the current table,
//! the history table, the id-presence table and the member index in step.

use crate::error::{Result, StoreError};
use crate::ids;
use crate::osm::{ObjectKind, OsmObject};
use crate::row::ObjectRow;
use crate::schema::Tier;
use crate::session::Session;
use crate::shapes::{self, RefreshReport};
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedId {
    pub kind: ObjectKind,
    pub placeholder: i64,
    pub id: i64,
}

/// What one `store_objects` batch did.
#[derive(Debug, Clone)]
pub struct StoreReport {
    pub tier: Tier,
    pub created: Vec<CreatedId>,
    /// Objects whose live row changed (written, replaced or deleted).
    pub touched_nodes: BTreeSet<i64>,
    pub touched_ways: BTreeSet<i64>,
    pub touched_relations: BTreeSet<i64>,
    pub current_writes: usize,
    pub history_writes: usize,
    pub copied_up: usize,
    /// Newest timestamp among the live changes, used as the shape-log boundary.
    pub latest_timestamp: i64,
}

impl StoreReport {
    pub fn new(tier: Tier) -> Self {
        Self {
            tier,
            created: Vec::new(),
            touched_nodes: BTreeSet::new(),
            touched_ways: BTreeSet::new(),
            touched_relations: BTreeSet::new(),
            current_writes: 0,
            history_writes: 0,
            copied_up: 0,
            latest_timestamp: 0,
        }
    }

    fn touch(&mut self, obj: &OsmObject) {
        let set = match obj.kind() {
            ObjectKind::Node => &mut self.touched_nodes,
            ObjectKind::Way => &mut self.touched_ways,
            ObjectKind::Relation => &mut self.touched_relations,
        };
        set.insert(obj.id());
        self.latest_timestamp = self.latest_timestamp.max(obj.meta().timestamp);
    }

    /// Allocated id for a placeholder, if this batch created it.
    pub fn resolved(&self, kind: ObjectKind, placeholder: i64) -> Option<i64> {
        self.created
            .iter()
            .find(|c| c.kind == kind && c.placeholder == placeholder)
            .map(|c| c.id)
    }
}

/// Write a batch of object versions into `tier`.
///
/// Objects are applied nodes first, then ways, then relations, each in id and
/// version order. Non-positive ids are placeholders: a fresh id is allocated
/// and later references to the placeholder in the same batch are rewritten.
/// Out-of-order versions are accepted and land in history.
///
/// Any error leaves the session half-written; the caller must abort it.
pub fn store_objects(session: &Session, tier: Tier, mut objects: Vec<OsmObject>) -> Result<StoreReport> {
    session.write_txn()?;
    if session.is_store_read_only()? {
        return Err(StoreError::ReadOnly("store is flagged read-only".into()));
    }
    for obj in &objects {
        validate(obj)?;
    }

    objects.sort_by_key(|o| (o.kind(), o.id(), o.version()));

    let mut placeholders: HashMap<(ObjectKind, i64), i64> = HashMap::new();
    let mut report = StoreReport::new(tier);

    for mut obj in objects {
        resolve_references(&mut obj, &placeholders)?;

        if obj.id() <= 0 {
            let key = (obj.kind(), obj.id());
            let id = match placeholders.get(&key) {
                Some(id) => *id,
                None => {
                    let id = fresh_id(session, tier, obj.kind())?;
                    placeholders.insert(key, id);
                    report.created.push(CreatedId {
                        kind: key.0,
                        placeholder: key.1,
                        id,
                    });
                    id
                }
            };
            obj.set_id(id);
        }

        upsert(session, tier, obj, &mut report)?;
    }

    tracing::debug!(
        tier = tier.as_str(),
        created = report.created.len(),
        current = report.current_writes,
        history = report.history_writes,
        copied_up = report.copied_up,
        "batch stored"
    );
    Ok(report)
}

/// Allocate the next id of `kind` that neither tier holds yet. Counters left
/// behind by a bulk load are stepped past instead of reusing baseline ids.
fn fresh_id(session: &Session, tier: Tier, kind: ObjectKind) -> Result<i64> {
    'next: loop {
        let id = ids::allocate_object_id(session, tier, kind)?;
        for t in Tier::ALL {
            if session.has_id(t, kind, id)? {
                tracing::debug!(%kind, id, tier = t.as_str(), "allocated id already taken, skipped");
                continue 'next;
            }
        }
        return Ok(id);
    }
}

/// The write path: store a batch, then bring way and relation boxes up to date.
pub fn store_and_refresh(
    session: &Session,
    tier: Tier,
    objects: Vec<OsmObject>,
) -> Result<(StoreReport, RefreshReport)> {
    let report = store_objects(session, tier, objects)?;
    let refresh = shapes::refresh_after_store(session, &report)?;
    Ok((report, refresh))
}

fn validate(obj: &OsmObject) -> Result<()> {
    if obj.version() == 0 {
        return Err(StoreError::InvalidArgument(format!(
            "{} {}: version must be positive",
            obj.kind(),
            obj.id()
        )));
    }
    if let OsmObject::Node(n) = obj {
        if !(n.lat.is_finite() && n.lon.is_finite())
            || n.lat.abs() > 90.0
            || n.lon.abs() > 180.0
        {
            return Err(StoreError::InvalidArgument(format!(
                "node {}: position ({}, {}) outside WGS84",
                n.id, n.lat, n.lon
            )));
        }
    }
    Ok(())
}

fn resolve_references(obj: &mut OsmObject, placeholders: &HashMap<(ObjectKind, i64), i64>) -> Result<()> {
    let (owner_kind, owner_id) = (obj.kind(), obj.id());
    let dangling = |kind: ObjectKind, r: i64| {
        StoreError::Integrity(format!(
            "{owner_kind} {owner_id} references {kind} {r}, a placeholder never created in this batch"
        ))
    };

    match obj {
        OsmObject::Node(_) => {}
        OsmObject::Way(w) => {
            for r in w.refs.iter_mut().filter(|r| **r <= 0) {
                *r = *placeholders
                    .get(&(ObjectKind::Node, *r))
                    .ok_or_else(|| dangling(ObjectKind::Node, *r))?;
            }
        }
        OsmObject::Relation(rel) => {
            for m in rel.members.iter_mut().filter(|m| m.id <= 0) {
                m.id = *placeholders
                    .get(&(m.kind, m.id))
                    .ok_or_else(|| dangling(m.kind, m.id))?;
            }
        }
    }
    Ok(())
}

fn upsert(session: &Session, tier: Tier, obj: OsmObject, report: &mut StoreReport) -> Result<()> {
    let kind = obj.kind();
    let id = obj.id();

    if tier == Tier::Active && copy_up(session, kind, id)? {
        report.copied_up += 1;
    }

    let current = session.current_row(tier, kind, id)?;
    let current_version = current.as_ref().map(|r| r.version());
    let history_max = session.history_max_version(tier, kind, id)?;
    let incoming = obj.version();

    // Replaying the live version overwrites it in place; anything at or below
    // the newest history version is stale.
    let is_latest = current_version.is_none_or(|v| incoming >= v)
        && history_max.is_none_or(|h| incoming > h);

    write_members(session, tier, &obj)?;
    session.mark_id(tier, kind, id)?;

    if !is_latest {
        if session.history_row(tier, kind, id, incoming)?.is_some() {
            tracing::debug!(%kind, id, version = incoming, "version already recorded, skipped");
        } else {
            session.put_history(tier, &ObjectRow::new(obj))?;
            report.history_writes += 1;
        }
        return Ok(());
    }

    report.touch(&obj);
    session.record_username(obj.meta().uid, &obj.meta().username)?;

    if let Some(cur) = &current {
        if cur.version() < incoming {
            session.put_history(tier, cur)?;
            report.history_writes += 1;
        }
        if let OsmObject::Node(old) = &cur.object {
            session.remove_tile(tier, id, old.lat, old.lon)?;
        }
    }

    if obj.visible() {
        if let OsmObject::Node(n) = &obj {
            session.put_tile(tier, id, n.lat, n.lon)?;
        }
        // The cached box carries over until the shape cache refreshes it.
        let mut row = ObjectRow::new(obj);
        if let Some(cur) = &current {
            row.bbox = cur.bbox;
            row.bbox_since = cur.bbox_since;
        }
        session.put_current(tier, &row)?;
        report.current_writes += 1;
    } else {
        if current.is_some() {
            session.remove_current(tier, kind, id)?;
        }
        session.put_history(tier, &ObjectRow::new(obj))?;
        report.history_writes += 1;
    }

    Ok(())
}

fn write_members(session: &Session, tier: Tier, obj: &OsmObject) -> Result<()> {
    match obj {
        OsmObject::Node(_) => Ok(()),
        OsmObject::Way(w) => session.put_way_members(tier, w),
        OsmObject::Relation(r) => session.put_relation_members(tier, r.id, r.meta.version, &r.members),
    }
}

/// Write a whole live row with its index entries. Used by copy-up and by the
/// shape cache, which never changes versions.
pub(crate) fn write_live_row(session: &Session, tier: Tier, row: &ObjectRow) -> Result<()> {
    let kind = row.object.kind();
    if let OsmObject::Node(n) = &row.object {
        session.put_tile(tier, n.id, n.lat, n.lon)?;
    }
    write_members(session, tier, &row.object)?;
    session.mark_id(tier, kind, row.id())?;
    session.put_current(tier, row)
}

/// Copy the static live row into the active tier the first time the active
/// tier sees `id`. Static tables are never written here.
pub(crate) fn copy_up(session: &Session, kind: ObjectKind, id: i64) -> Result<bool> {
    if session.has_id(Tier::Active, kind, id)? {
        return Ok(false);
    }
    let Some(row) = session.current_row(Tier::Static, kind, id)? else {
        return Ok(false);
    };
    write_live_row(session, Tier::Active, &row)?;
    tracing::trace!(%kind, id, version = row.version(), "copied up from static tier");
    Ok(true)
}

/// Drop and rebuild the node tile index of `tier` from its current table.
/// Blocking maintenance operation.
pub fn rebuild_tile_index(session: &Session, tier: Tier) -> Result<u64> {
    session.clear_tiles(tier)?;
    let mut indexed = 0u64;
    for id in session.current_ids(tier, ObjectKind::Node)? {
        if let Some(OsmObject::Node(n)) = session.current_row(tier, ObjectKind::Node, id)?.map(|r| r.object) {
            session.put_tile(tier, id, n.lat, n.lon)?;
            indexed += 1;
        }
    }
    tracing::info!(tier = tier.as_str(), indexed, "tile index rebuilt");
    Ok(indexed)
}

/// Live object; the active tier wins for any id it holds.
pub fn get_object(session: &Session, kind: ObjectKind, id: i64) -> Result<Option<OsmObject>> {
    Ok(get_row(session, kind, id)?.map(|r| r.object))
}

pub fn get_row(session: &Session, kind: ObjectKind, id: i64) -> Result<Option<ObjectRow>> {
    if session.has_id(Tier::Active, kind, id)? {
        return session.current_row(Tier::Active, kind, id);
    }
    session.current_row(Tier::Static, kind, id)
}

/// A specific version from current or history of either tier.
pub fn get_version(session: &Session, kind: ObjectKind, id: i64, version: u64) -> Result<Option<OsmObject>> {
    for tier in [Tier::Active, Tier::Static] {
        if let Some(row) = session.current_row(tier, kind, id)? {
            if row.version() == version {
                return Ok(Some(row.object));
            }
        }
        if let Some(row) = session.history_row(tier, kind, id, version)? {
            return Ok(Some(row.object));
        }
    }
    Ok(None)
}

/// Every known version of an object, oldest first. Where both tiers hold a
/// version the active tier's copy is returned.
pub fn object_history(session: &Session, kind: ObjectKind, id: i64) -> Result<Vec<OsmObject>> {
    let mut versions: BTreeMap<u64, OsmObject> = BTreeMap::new();
    for tier in [Tier::Static, Tier::Active] {
        for row in session.history_rows(tier, kind, id)? {
            versions.insert(row.version(), row.object);
        }
        if let Some(row) = session.current_row(tier, kind, id)? {
            versions.insert(row.version(), row.object);
        }
    }
    Ok(versions.into_values().collect())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::db::{self, tests::temp_store};
    use crate::osm::{Member, MetaData, Node, Relation, Tags, Way};
    use crate::session::LockMode;
    use crate::upsert::UpsertStrategy;

    pub(crate) fn node(id: i64, version: u64, lat: f64, lon: f64) -> OsmObject {
        OsmObject::Node(Node {
            id,
            meta: MetaData::new(version, 1_000 + version as i64, 1, 1, "tester"),
            tags: Tags::new(),
            lat,
            lon,
        })
    }

    pub(crate) fn way(id: i64, version: u64, refs: &[i64]) -> OsmObject {
        OsmObject::Way(Way {
            id,
            meta: MetaData::new(version, 1_000 + version as i64, 1, 1, "tester"),
            tags: Tags::new(),
            refs: refs.to_vec(),
        })
    }

    pub(crate) fn relation(id: i64, version: u64, members: &[(ObjectKind, i64)]) -> OsmObject {
        OsmObject::Relation(Relation {
            id,
            meta: MetaData::new(version, 1_000 + version as i64, 1, 1, "tester"),
            tags: Tags::new(),
            members: members
                .iter()
                .map(|(kind, id)| Member { kind: *kind, id: *id, role: String::new() })
                .collect(),
        })
    }

    pub(crate) fn deleted(mut o: OsmObject) -> OsmObject {
        o.meta_mut().visible = false;
        o
    }

    fn history_versions(s: &Session, tier: Tier, kind: ObjectKind, id: i64) -> Vec<u64> {
        s.history_rows(tier, kind, id).unwrap().iter().map(|r| r.version()).collect()
    }

    fn assert_monotonic(s: &Session, tier: Tier, kind: ObjectKind, id: i64) {
        if let Some(cur) = s.current_version(tier, kind, id).unwrap() {
            for v in history_versions(s, tier, kind, id) {
                assert!(cur >= v, "current v{cur} older than history v{v}");
            }
        }
    }

    #[test]
    fn out_of_order_versions_land_in_history() {
        let (_dir, db) = temp_store();
        let s = db.begin(LockMode::Exclusive).unwrap();

        store_objects(&s, Tier::Active, vec![node(1, 1, 0.0, 0.0)]).unwrap();
        store_objects(&s, Tier::Active, vec![node(1, 3, 0.0, 0.3)]).unwrap();
        let r = store_objects(&s, Tier::Active, vec![node(1, 2, 0.0, 0.2)]).unwrap();
        assert!(r.touched_nodes.is_empty(), "a stale version changes nothing live");

        assert_eq!(s.current_version(Tier::Active, ObjectKind::Node, 1).unwrap(), Some(3));
        assert_eq!(history_versions(&s, Tier::Active, ObjectKind::Node, 1), vec![1, 2]);
        assert_monotonic(&s, Tier::Active, ObjectKind::Node, 1);
    }

    #[test]
    fn replaying_a_version_is_idempotent() {
        let (_dir, db) = temp_store();
        let s = db.begin(LockMode::Exclusive).unwrap();
        for _ in 0..3 {
            store_objects(&s, Tier::Active, vec![node(1, 1, 0.0, 0.0), node(1, 2, 1.0, 1.0)])
                .unwrap();
        }
        assert_eq!(s.current_version(Tier::Active, ObjectKind::Node, 1).unwrap(), Some(2));
        assert_eq!(history_versions(&s, Tier::Active, ObjectKind::Node, 1), vec![1]);
    }

    #[test]
    fn delete_moves_row_to_history() {
        let (_dir, db) = temp_store();
        let s = db.begin(LockMode::Exclusive).unwrap();
        store_objects(&s, Tier::Active, vec![node(5, 1, 0.0, 0.0)]).unwrap();
        store_objects(&s, Tier::Active, vec![deleted(node(5, 2, 0.0, 0.0))]).unwrap();

        assert!(s.current_row(Tier::Active, ObjectKind::Node, 5).unwrap().is_none());
        let hist = s.history_rows(Tier::Active, ObjectKind::Node, 5).unwrap();
        assert_eq!(hist.len(), 2);
        assert!(hist[0].object.visible());
        assert!(!hist[1].object.visible());
        assert!(s.has_id(Tier::Active, ObjectKind::Node, 5).unwrap());

        // A stale delete never removes a newer live row.
        store_objects(&s, Tier::Active, vec![node(6, 2, 0.0, 0.0)]).unwrap();
        store_objects(&s, Tier::Active, vec![deleted(node(6, 1, 0.0, 0.0))]).unwrap();
        assert_eq!(s.current_version(Tier::Active, ObjectKind::Node, 6).unwrap(), Some(2));
    }

    #[test]
    fn created_at_deleted_still_marks_id() {
        let (_dir, db) = temp_store();
        let s = db.begin(LockMode::Exclusive).unwrap();
        store_objects(&s, Tier::Active, vec![deleted(node(9, 1, 0.0, 0.0))]).unwrap();
        assert!(s.current_row(Tier::Active, ObjectKind::Node, 9).unwrap().is_none());
        assert!(s.has_id(Tier::Active, ObjectKind::Node, 9).unwrap());
    }

    #[test]
    fn placeholders_are_allocated_and_rewritten() {
        let (_dir, db) = temp_store();
        let s = db.begin(LockMode::Exclusive).unwrap();
        s.set_counter(Tier::Active, "node", 500).unwrap();

        let report = store_objects(
            &s,
            Tier::Active,
            vec![
                relation(-1, 1, &[(ObjectKind::Way, -1), (ObjectKind::Node, -2)]),
                way(-1, 1, &[-1, -2, -1]),
                node(-2, 1, 1.0, 1.0),
                node(-1, 1, 2.0, 2.0),
            ],
        )
        .unwrap();

        let n1 = report.resolved(ObjectKind::Node, -1).unwrap();
        let n2 = report.resolved(ObjectKind::Node, -2).unwrap();
        let w = report.resolved(ObjectKind::Way, -1).unwrap();
        let r = report.resolved(ObjectKind::Relation, -1).unwrap();
        assert!(n1 >= 500 && n2 >= 500 && n1 != n2);

        match get_object(&s, ObjectKind::Way, w).unwrap() {
            Some(OsmObject::Way(way)) => assert_eq!(way.refs, vec![n1, n2, n1]),
            other => panic!("unexpected {other:?}"),
        }
        match get_object(&s, ObjectKind::Relation, r).unwrap() {
            Some(OsmObject::Relation(rel)) => {
                assert_eq!(rel.members[0].id, w);
                assert_eq!(rel.members[1].id, n2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn placeholders_never_take_over_baseline_ids() {
        let (_dir, db) = temp_store();
        let s = db.begin(LockMode::Exclusive).unwrap();
        store_objects(&s, Tier::Static, vec![node(1, 1, 0.0, 0.0), node(2, 1, 0.0, 0.0)]).unwrap();

        let report = store_objects(&s, Tier::Active, vec![node(-1, 1, 50.0, 50.0)]).unwrap();
        assert_eq!(report.resolved(ObjectKind::Node, -1), Some(3));
        assert_eq!(report.copied_up, 0);
        assert!(!s.has_id(Tier::Active, ObjectKind::Node, 1).unwrap());
        match get_object(&s, ObjectKind::Node, 1).unwrap() {
            Some(OsmObject::Node(n)) => assert_eq!((n.lat, n.lon), (0.0, 0.0)),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(ids::peek(&s, Tier::Active, "node").unwrap(), 4);
    }

    #[test]
    fn dangling_placeholder_is_an_integrity_fault() {
        let (_dir, db) = temp_store();
        let s = db.begin(LockMode::Exclusive).unwrap();
        let err = store_objects(&s, Tier::Active, vec![node(-1, 1, 0.0, 0.0), way(-1, 1, &[-1, -7])]);
        match err {
            Err(StoreError::Integrity(msg)) => assert!(msg.contains("node -7"), "{msg}"),
            other => panic!("expected integrity fault, got {other:?}"),
        }
    }

    #[test]
    fn bad_input_rejected_before_writing() {
        let (_dir, db) = temp_store();
        let s = db.begin(LockMode::Exclusive).unwrap();
        let err = store_objects(&s, Tier::Active, vec![node(1, 1, 0.0, 0.0), node(2, 0, 0.0, 0.0)]);
        assert!(matches!(err, Err(StoreError::InvalidArgument(_))));
        let err = store_objects(&s, Tier::Active, vec![node(3, 1, 95.0, 0.0)]);
        assert!(matches!(err, Err(StoreError::InvalidArgument(_))));
        assert!(!s.has_id(Tier::Active, ObjectKind::Node, 1).unwrap());
    }

    #[test]
    fn active_edit_copies_static_row_up() {
        let (_dir, db) = temp_store();
        let s = db.begin(LockMode::Exclusive).unwrap();
        store_objects(&s, Tier::Static, vec![node(42, 1, 1.0, 1.0)]).unwrap();

        let r = store_objects(&s, Tier::Active, vec![node(42, 2, 1.5, 1.5)]).unwrap();
        assert_eq!(r.copied_up, 1);

        assert_eq!(s.current_version(Tier::Static, ObjectKind::Node, 42).unwrap(), Some(1));
        assert_eq!(s.current_version(Tier::Active, ObjectKind::Node, 42).unwrap(), Some(2));
        assert_eq!(history_versions(&s, Tier::Active, ObjectKind::Node, 42), vec![1]);

        let versions: Vec<u64> = object_history(&s, ObjectKind::Node, 42)
            .unwrap()
            .iter()
            .map(|o| o.version())
            .collect();
        assert_eq!(versions, vec![1, 2]);
        assert_eq!(get_version(&s, ObjectKind::Node, 42, 1).unwrap().unwrap().version(), 1);
        assert!(get_version(&s, ObjectKind::Node, 42, 3).unwrap().is_none());
    }

    #[test]
    fn member_index_follows_live_version() {
        let (_dir, db) = temp_store();
        let s = db.begin(LockMode::Exclusive).unwrap();
        store_objects(&s, Tier::Active, vec![way(10, 1, &[1, 2])]).unwrap();
        store_objects(&s, Tier::Active, vec![way(10, 2, &[2, 3])]).unwrap();

        let p1 = s.way_parents(Tier::Active, 1).unwrap();
        assert_eq!(p1, vec![(10, 1)]);
        assert!(s.live_parents(Tier::Active, ObjectKind::Way, &p1).unwrap().is_empty());

        let p3 = s.way_parents(Tier::Active, 3).unwrap();
        assert_eq!(s.live_parents(Tier::Active, ObjectKind::Way, &p3).unwrap(), vec![10]);
    }

    #[test]
    fn read_only_store_rejects_batches() {
        let (_dir, db) = temp_store();
        db.set_read_only(true).unwrap();
        let s = db.begin(LockMode::Exclusive).unwrap();
        let err = store_objects(&s, Tier::Active, vec![node(1, 1, 0.0, 0.0)]);
        assert!(matches!(err, Err(StoreError::ReadOnly(_))));
    }

    #[test]
    fn probe_strategy_behaves_like_native() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = StoreConfig::default().with_upsert(UpsertStrategy::ProbeThenInsert);
        let db = db::open_with(&dir.path().join("store"), cfg).unwrap();
        let s = db.begin(LockMode::Exclusive).unwrap();
        for _ in 0..2 {
            store_objects(&s, Tier::Active, vec![node(1, 1, 0.0, 0.0), way(2, 1, &[1, 1])]).unwrap();
        }
        assert_eq!(s.way_parents(Tier::Active, 1).unwrap(), vec![(2, 1)]);
        assert!(s.has_id(Tier::Active, ObjectKind::Way, 2).unwrap());
    }

    #[test]
    fn tile_index_rebuild_matches_incremental_index() {
        use crate::session::TileCursor;
        use crate::geom::Bbox;

        let (_dir, db) = temp_store();
        let s = db.begin(LockMode::Exclusive).unwrap();
        store_objects(
            &s,
            Tier::Active,
            vec![node(1, 1, 0.5, 0.5), node(2, 1, 0.5, 0.6), node(2, 2, 40.0, 40.0), node(3, 1, -40.0, 0.5)],
        )
        .unwrap();

        let in_box = |s: &Session| {
            let mut cur = TileCursor::new(&Bbox::new(0.0, 0.0, 1.0, 1.0));
            let mut ids = s.node_tile_batch(Tier::Active, &mut cur, 100).unwrap();
            ids.sort();
            ids
        };
        assert_eq!(in_box(&s), vec![1]);
        assert_eq!(rebuild_tile_index(&s, Tier::Active).unwrap(), 3);
        assert_eq!(in_box(&s), vec![1]);
    }

    #[test]
    fn usernames_are_recorded() {
        let (_dir, db) = temp_store();
        {
            let s = db.begin(LockMode::Exclusive).unwrap();
            store_objects(&s, Tier::Active, vec![node(1, 1, 0.0, 0.0)]).unwrap();
            s.commit().unwrap();
        }
        let s = db.begin(LockMode::AccessShare).unwrap();
        assert_eq!(s.username(1).unwrap().as_deref(), Some("tester"));
        assert_eq!(s.username(2).unwrap(), None);
    }

    #[test]
    fn stale_versions_keep_the_newer_username() {
        let (_dir, db) = temp_store();
        let s = db.begin(LockMode::Exclusive).unwrap();
        let mut newer = node(1, 2, 0.0, 0.0);
        newer.meta_mut().username = "renamed".into();
        store_objects(&s, Tier::Active, vec![newer]).unwrap();
        store_objects(&s, Tier::Active, vec![node(1, 1, 0.0, 0.0)]).unwrap();

        assert_eq!(history_versions(&s, Tier::Active, ObjectKind::Node, 1), vec![1]);
        assert_eq!(s.username(1).unwrap().as_deref(), Some("renamed"));
    }
}
