//! Reference existence checks for ways and relations.

use crate::config::MAX_RELATION_DEPTH;
use crate::error::Result;
use crate::osm::{ObjectKind, OsmObject};
use crate::schema::Tier;
use crate::session::Session;
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DanglingRef {
    pub owner_kind: ObjectKind,
    pub owner: i64,
    pub kind: ObjectKind,
    pub id: i64,
}

impl fmt::Display for DanglingRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} -> missing {} {}", self.owner_kind, self.owner, self.kind, self.id)
    }
}

#[derive(Debug, Default, Clone)]
pub struct CheckReport {
    pub ways: u64,
    pub relations: u64,
    pub dangling: Vec<DanglingRef>,
    /// Relations whose nesting went past the depth bound.
    pub truncated: Vec<i64>,
}

/// Does `id` resolve to a live object as seen from `tier`? The static tier
/// only sees itself; the active tier overlays the static one.
fn resolves(session: &Session, tier: Tier, kind: ObjectKind, id: i64) -> Result<bool> {
    let view = match tier {
        Tier::Active if session.has_id(Tier::Active, kind, id)? => Tier::Active,
        _ => Tier::Static,
    };
    Ok(session.current_version(view, kind, id)?.is_some())
}

fn live(session: &Session, tier: Tier, kind: ObjectKind, id: i64) -> Result<Option<OsmObject>> {
    let view = match tier {
        Tier::Active if session.has_id(Tier::Active, kind, id)? => Tier::Active,
        _ => Tier::Static,
    };
    Ok(session.current_row(view, kind, id)?.map(|r| r.object))
}

fn direct_refs(obj: &OsmObject) -> Vec<(ObjectKind, i64)> {
    match obj {
        OsmObject::Node(_) => Vec::new(),
        OsmObject::Way(w) => w.refs.iter().map(|r| (ObjectKind::Node, *r)).collect(),
        OsmObject::Relation(r) => r.members.iter().map(|m| (m.kind, m.id)).collect(),
    }
}

/// Check every live way and relation of `tier`, direct references only.
pub fn check_tier(session: &Session, tier: Tier) -> Result<CheckReport> {
    let mut report = CheckReport::default();

    for kind in [ObjectKind::Way, ObjectKind::Relation] {
        for id in session.current_ids(tier, kind)? {
            let Some(row) = session.current_row(tier, kind, id)? else {
                continue;
            };
            match kind {
                ObjectKind::Way => report.ways += 1,
                _ => report.relations += 1,
            }
            for (ref_kind, ref_id) in direct_refs(&row.object) {
                if !resolves(session, tier, ref_kind, ref_id)? {
                    report.dangling.push(DanglingRef { owner_kind: kind, owner: id, kind: ref_kind, id: ref_id });
                }
            }
        }
    }

    for d in &report.dangling {
        tracing::warn!(tier = tier.as_str(), "{d}");
    }
    tracing::info!(
        tier = tier.as_str(),
        ways = report.ways,
        relations = report.relations,
        dangling = report.dangling.len(),
        "reference check finished"
    );
    Ok(report)
}

/// Check one object and everything below it, descending through member
/// relations up to `MAX_RELATION_DEPTH` levels.
pub fn check_tree(session: &Session, tier: Tier, kind: ObjectKind, id: i64) -> Result<CheckReport> {
    let mut report = CheckReport::default();
    let mut visited = HashSet::from([(kind, id)]);
    let mut frontier = vec![(kind, id)];

    for depth in 0..=MAX_RELATION_DEPTH {
        if frontier.is_empty() {
            break;
        }
        let mut next = Vec::new();
        for (owner_kind, owner) in frontier {
            if depth == MAX_RELATION_DEPTH {
                report.truncated.push(owner);
                continue;
            }
            let Some(obj) = live(session, tier, owner_kind, owner)? else {
                continue;
            };
            match owner_kind {
                ObjectKind::Way => report.ways += 1,
                ObjectKind::Relation => report.relations += 1,
                ObjectKind::Node => {}
            }
            for (ref_kind, ref_id) in direct_refs(&obj) {
                if !resolves(session, tier, ref_kind, ref_id)? {
                    report.dangling.push(DanglingRef { owner_kind, owner, kind: ref_kind, id: ref_id });
                } else if ref_kind != ObjectKind::Node && visited.insert((ref_kind, ref_id)) {
                    next.push((ref_kind, ref_id));
                }
            }
        }
        frontier = next;
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::temp_store;
    use crate::session::LockMode;
    use crate::store::store_objects;
    use crate::store::tests::{node, relation, way};

    #[test]
    fn tier_check_reports_missing_members() {
        let (_dir, db) = temp_store();
        let s = db.begin(LockMode::Exclusive).unwrap();
        store_objects(&s, Tier::Static, vec![node(1, 1, 0.0, 0.0), way(10, 1, &[1, 2])]).unwrap();
        store_objects(
            &s,
            Tier::Active,
            vec![node(2, 1, 0.0, 0.0), relation(20, 1, &[(ObjectKind::Way, 10), (ObjectKind::Way, 11)])],
        )
        .unwrap();

        let st = check_tier(&s, Tier::Static).unwrap();
        assert_eq!(
            st.dangling,
            vec![DanglingRef { owner_kind: ObjectKind::Way, owner: 10, kind: ObjectKind::Node, id: 2 }]
        );

        let act = check_tier(&s, Tier::Active).unwrap();
        assert_eq!(act.relations, 1);
        assert_eq!(act.dangling.len(), 1);
        assert_eq!(act.dangling[0].to_string(), "relation 20 -> missing way 11");
    }

    #[test]
    fn tree_check_descends_and_stops_on_cycles() {
        let (_dir, db) = temp_store();
        let s = db.begin(LockMode::Exclusive).unwrap();
        store_objects(
            &s,
            Tier::Active,
            vec![
                node(1, 1, 0.0, 0.0),
                way(10, 1, &[1, 3]),
                relation(20, 1, &[(ObjectKind::Relation, 21)]),
                relation(21, 1, &[(ObjectKind::Way, 10), (ObjectKind::Relation, 20)]),
            ],
        )
        .unwrap();

        let r = check_tree(&s, Tier::Active, ObjectKind::Relation, 20).unwrap();
        assert_eq!(r.relations, 2);
        assert_eq!(r.ways, 1);
        assert_eq!(r.dangling.len(), 1);
        assert_eq!((r.dangling[0].owner, r.dangling[0].id), (10, 3));
        assert!(r.truncated.is_empty());
    }
}
