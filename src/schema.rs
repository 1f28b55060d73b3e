use redb::{TableDefinition, TableHandle};

use crate::osm::ObjectKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tier {
    /// Bulk-loaded baseline; only written by administrative loads.
    Static,
    /// Live edit overlay; authoritative for every id it holds.
    Active,
}

impl Tier {
    pub const ALL: [Tier; 2] = [Tier::Static, Tier::Active];

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Static => "static",
            Tier::Active => "active",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "static" => Some(Tier::Static),
            "active" => Some(Tier::Active),
            _ => None,
        }
    }
}

pub type RowTable = TableDefinition<'static, i64, &'static [u8]>;
// (id, version) -> row
pub type HistoryTable = TableDefinition<'static, (i64, u64), &'static [u8]>;
pub type IdsTable = TableDefinition<'static, i64, ()>;
// (quadtile, node id)
pub type TileTable = TableDefinition<'static, (u32, i64), ()>;
// (node id, way id, way version, member index)
pub type WayMemberTable = TableDefinition<'static, (i64, i64, u64, u32), ()>;
// (member kind, member id, relation id, relation version, member index)
pub type RelationMemberTable = TableDefinition<'static, (u8, i64, i64, u64, u32), ()>;
// (kind, id, version, valid-from) -> packed valid-until + box
pub type ShapeTable = TableDefinition<'static, (u8, i64, u64, i64), &'static [u8]>;
pub type CounterTable = TableDefinition<'static, &'static str, i64>;
pub type MetaTable = TableDefinition<'static, &'static str, &'static str>;

pub struct TierTables {
    pub history: [HistoryTable; 3],
    pub current: [RowTable; 3],
    pub ids: [IdsTable; 3],
    pub node_tiles: TileTable,
    pub way_members: WayMemberTable,
    pub relation_members: RelationMemberTable,
    pub shapes: ShapeTable,
    pub nextids: CounterTable,
    pub meta: MetaTable,
}

impl TierTables {
    pub fn current(&self, kind: ObjectKind) -> RowTable {
        self.current[kind as usize]
    }

    pub fn history(&self, kind: ObjectKind) -> HistoryTable {
        self.history[kind as usize]
    }

    pub fn ids(&self, kind: ObjectKind) -> IdsTable {
        self.ids[kind as usize]
    }
}

pub static STATIC: TierTables = TierTables {
    history: [
        TableDefinition::new("static_nodes_history"),
        TableDefinition::new("static_ways_history"),
        TableDefinition::new("static_relations_history"),
    ],
    current: [
        TableDefinition::new("static_nodes_current"),
        TableDefinition::new("static_ways_current"),
        TableDefinition::new("static_relations_current"),
    ],
    ids: [
        TableDefinition::new("static_node_ids"),
        TableDefinition::new("static_way_ids"),
        TableDefinition::new("static_relation_ids"),
    ],
    node_tiles: TableDefinition::new("static_node_tiles"),
    way_members: TableDefinition::new("static_way_members"),
    relation_members: TableDefinition::new("static_relation_members"),
    shapes: TableDefinition::new("static_shapes"),
    nextids: TableDefinition::new("static_nextids"),
    meta: TableDefinition::new("static_meta"),
};

pub static ACTIVE: TierTables = TierTables {
    history: [
        TableDefinition::new("active_nodes_history"),
        TableDefinition::new("active_ways_history"),
        TableDefinition::new("active_relations_history"),
    ],
    current: [
        TableDefinition::new("active_nodes_current"),
        TableDefinition::new("active_ways_current"),
        TableDefinition::new("active_relations_current"),
    ],
    ids: [
        TableDefinition::new("active_node_ids"),
        TableDefinition::new("active_way_ids"),
        TableDefinition::new("active_relation_ids"),
    ],
    node_tiles: TableDefinition::new("active_node_tiles"),
    way_members: TableDefinition::new("active_way_members"),
    relation_members: TableDefinition::new("active_relation_members"),
    shapes: TableDefinition::new("active_shapes"),
    nextids: TableDefinition::new("active_nextids"),
    meta: TableDefinition::new("active_meta"),
};

pub const USERNAMES: TableDefinition<i64, &str> = TableDefinition::new("usernames");

pub const KEY_READ_ONLY: &str = "readonly";
pub const KEY_CHANGESET: &str = "changeset";
pub const KEY_UID: &str = "uid";

pub fn tables(tier: Tier) -> &'static TierTables {
    match tier {
        Tier::Static => &STATIC,
        Tier::Active => &ACTIVE,
    }
}

/// Table groups in the order every transaction opens them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TableClass {
    History,
    Current,
    Ids,
    Members,
    Counters,
    Meta,
}

#[derive(Clone, Copy)]
pub enum LockTarget {
    History(HistoryTable),
    Current(RowTable),
    Ids(IdsTable),
    Tiles(TileTable),
    WayMembers(WayMemberTable),
    RelationMembers(RelationMemberTable),
    Shapes(ShapeTable),
    Counters(CounterTable),
    Meta(MetaTable),
    Usernames(TableDefinition<'static, i64, &'static str>),
}

impl LockTarget {
    pub fn class(&self) -> TableClass {
        match self {
            LockTarget::History(_) => TableClass::History,
            LockTarget::Current(_) => TableClass::Current,
            LockTarget::Ids(_) => TableClass::Ids,
            LockTarget::Tiles(_)
            | LockTarget::WayMembers(_)
            | LockTarget::RelationMembers(_)
            | LockTarget::Shapes(_) => TableClass::Members,
            LockTarget::Counters(_) => TableClass::Counters,
            LockTarget::Meta(_) | LockTarget::Usernames(_) => TableClass::Meta,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            LockTarget::History(t) => t.name(),
            LockTarget::Current(t) => t.name(),
            LockTarget::Ids(t) => t.name(),
            LockTarget::Tiles(t) => t.name(),
            LockTarget::WayMembers(t) => t.name(),
            LockTarget::RelationMembers(t) => t.name(),
            LockTarget::Shapes(t) => t.name(),
            LockTarget::Counters(t) => t.name(),
            LockTarget::Meta(t) => t.name(),
            LockTarget::Usernames(t) => t.name(),
        }
    }
}

/// The single global table order. Both tiers are always covered.
pub fn lock_order() -> Vec<LockTarget> {
    let mut out = Vec::new();
    for tier in Tier::ALL {
        for kind in ObjectKind::ALL {
            out.push(LockTarget::History(tables(tier).history(kind)));
        }
    }
    for tier in Tier::ALL {
        for kind in ObjectKind::ALL {
            out.push(LockTarget::Current(tables(tier).current(kind)));
        }
    }
    for tier in Tier::ALL {
        for kind in ObjectKind::ALL {
            out.push(LockTarget::Ids(tables(tier).ids(kind)));
        }
    }
    for tier in Tier::ALL {
        let t = tables(tier);
        out.push(LockTarget::Tiles(t.node_tiles));
        out.push(LockTarget::WayMembers(t.way_members));
        out.push(LockTarget::RelationMembers(t.relation_members));
        out.push(LockTarget::Shapes(t.shapes));
    }
    for tier in Tier::ALL {
        out.push(LockTarget::Counters(tables(tier).nextids));
    }
    for tier in Tier::ALL {
        out.push(LockTarget::Meta(tables(tier).meta));
    }
    out.push(LockTarget::Usernames(USERNAMES));
    out
}
