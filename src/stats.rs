use crate::error::Result;
use crate::ids;
use crate::osm::ObjectKind;
use crate::schema::Tier;
use crate::session::Session;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct KindStats {
    pub current: u64,
    pub history: u64,
    pub ids: u64,
    pub next_id: i64,
}

#[derive(Debug, Clone)]
pub struct TierStats {
    pub tier: Tier,
    pub read_only: bool,
    pub kinds: Vec<(ObjectKind, KindStats)>,
}

pub fn compute(session: &Session) -> Result<Vec<TierStats>> {
    let read_only = session.is_store_read_only()?;
    let mut out = Vec::new();

    for tier in Tier::ALL {
        let mut kinds = Vec::new();
        for kind in ObjectKind::ALL {
            let (current, history, ids) = session.table_sizes(tier, kind)?;
            kinds.push((
                kind,
                KindStats {
                    current,
                    history,
                    ids,
                    next_id: ids::peek(session, tier, kind.as_str())?,
                },
            ));
        }
        out.push(TierStats { tier, read_only, kinds });
    }
    Ok(out)
}

pub fn print(stats: &[TierStats]) {
    if let Some(first) = stats.first() {
        println!("Read-only:                 {}", first.read_only);
        println!();
    }

    for t in stats {
        println!("Tier {}:", t.tier.as_str());
        for (kind, k) in &t.kinds {
            println!(
                "  {:<9} current {:>10}  history {:>10}  ids {:>10}  next id {}",
                kind.as_str(),
                k.current,
                k.history,
                k.ids,
                k.next_id
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::temp_store;
    use crate::session::LockMode;
    use crate::store::store_objects;
    use crate::store::tests::{deleted, node};

    #[test]
    fn counts_follow_the_tables() {
        let (_dir, db) = temp_store();
        let s = db.begin(LockMode::Exclusive).unwrap();
        store_objects(
            &s,
            Tier::Active,
            vec![node(1, 1, 0.0, 0.0), node(1, 2, 0.0, 0.0), deleted(node(2, 1, 0.0, 0.0))],
        )
        .unwrap();

        let stats = compute(&s).unwrap();
        let active = stats.iter().find(|t| t.tier == Tier::Active).unwrap();
        let (_, nodes) = &active.kinds[0];
        assert_eq!((nodes.current, nodes.history, nodes.ids), (1, 2, 2));
        assert_eq!(nodes.next_id, 1);

        let fixed = stats.iter().find(|t| t.tier == Tier::Static).unwrap();
        assert!(fixed.kinds.iter().all(|(_, k)| *k == KindStats { next_id: 1, ..Default::default() }));
    }
}
