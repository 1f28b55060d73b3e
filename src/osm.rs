//! Map objects: nodes, ways and relations with their metadata.

use crate::error::{Result, StoreError};
use std::collections::BTreeMap;
use std::fmt;

pub type Tags = BTreeMap<String, String>;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ObjectKind {
    Node = 0,
    Way = 1,
    Relation = 2,
}

impl ObjectKind {
    pub const ALL: [ObjectKind; 3] = [ObjectKind::Node, ObjectKind::Way, ObjectKind::Relation];

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(ObjectKind::Node),
            1 => Some(ObjectKind::Way),
            2 => Some(ObjectKind::Relation),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ObjectKind::Node => "node",
            ObjectKind::Way => "way",
            ObjectKind::Relation => "relation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "node" => Some(ObjectKind::Node),
            "way" => Some(ObjectKind::Way),
            "relation" => Some(ObjectKind::Relation),
            _ => None,
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaData {
    pub version: u64,
    /// Unix seconds.
    pub timestamp: i64,
    pub changeset: i64,
    pub uid: i64,
    pub username: String,
    pub visible: bool,
}

impl MetaData {
    pub fn new(version: u64, timestamp: i64, changeset: i64, uid: i64, username: &str) -> Self {
        Self {
            version,
            timestamp,
            changeset,
            uid,
            username: username.to_string(),
            visible: true,
        }
    }

    pub fn deleted(mut self) -> Self {
        self.visible = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: i64,
    pub meta: MetaData,
    pub tags: Tags,
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Way {
    pub id: i64,
    pub meta: MetaData,
    pub tags: Tags,
    /// Ordered node path. Repeats are legal (closed ways, self-loops).
    pub refs: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub kind: ObjectKind,
    pub id: i64,
    pub role: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Relation {
    pub id: i64,
    pub meta: MetaData,
    pub tags: Tags,
    pub members: Vec<Member>,
}

impl Relation {
    /// Build a relation from the three parallel member arrays used on the wire.
    pub fn from_parallel(
        id: i64,
        meta: MetaData,
        tags: Tags,
        types: &[&str],
        ids: &[i64],
        roles: &[&str],
    ) -> Result<Self> {
        if types.len() != ids.len() || ids.len() != roles.len() {
            return Err(StoreError::InvalidArgument(format!(
                "relation {id}: member arrays differ in length ({} types, {} ids, {} roles)",
                types.len(),
                ids.len(),
                roles.len()
            )));
        }

        let mut members = Vec::with_capacity(ids.len());
        for ((t, mid), role) in types.iter().zip(ids).zip(roles) {
            let kind = ObjectKind::parse(t).ok_or_else(|| {
                StoreError::InvalidArgument(format!("relation {id}: unknown member type {t:?}"))
            })?;
            members.push(Member {
                kind,
                id: *mid,
                role: role.to_string(),
            });
        }

        Ok(Self { id, meta, tags, members })
    }
}

/// Closed sum over the three object variants.
#[derive(Debug, Clone, PartialEq)]
pub enum OsmObject {
    Node(Node),
    Way(Way),
    Relation(Relation),
}

impl OsmObject {
    pub fn kind(&self) -> ObjectKind {
        match self {
            OsmObject::Node(_) => ObjectKind::Node,
            OsmObject::Way(_) => ObjectKind::Way,
            OsmObject::Relation(_) => ObjectKind::Relation,
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            OsmObject::Node(n) => n.id,
            OsmObject::Way(w) => w.id,
            OsmObject::Relation(r) => r.id,
        }
    }

    pub fn set_id(&mut self, id: i64) {
        match self {
            OsmObject::Node(n) => n.id = id,
            OsmObject::Way(w) => w.id = id,
            OsmObject::Relation(r) => r.id = id,
        }
    }

    pub fn meta(&self) -> &MetaData {
        match self {
            OsmObject::Node(n) => &n.meta,
            OsmObject::Way(w) => &w.meta,
            OsmObject::Relation(r) => &r.meta,
        }
    }

    pub fn meta_mut(&mut self) -> &mut MetaData {
        match self {
            OsmObject::Node(n) => &mut n.meta,
            OsmObject::Way(w) => &mut w.meta,
            OsmObject::Relation(r) => &mut r.meta,
        }
    }

    pub fn tags(&self) -> &Tags {
        match self {
            OsmObject::Node(n) => &n.tags,
            OsmObject::Way(w) => &w.tags,
            OsmObject::Relation(r) => &r.tags,
        }
    }

    pub fn version(&self) -> u64 {
        self.meta().version
    }

    pub fn visible(&self) -> bool {
        self.meta().visible
    }
}

impl From<Node> for OsmObject {
    fn from(n: Node) -> Self {
        OsmObject::Node(n)
    }
}

impl From<Way> for OsmObject {
    fn from(w: Way) -> Self {
        OsmObject::Way(w)
    }
}

impl From<Relation> for OsmObject {
    fn from(r: Relation) -> Self {
        OsmObject::Relation(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parallel_arrays_must_match() {
        let meta = MetaData::new(1, 0, 1, 1, "a");
        let err = Relation::from_parallel(1, meta.clone(), Tags::new(), &["way"], &[1, 2], &["", ""]);
        assert!(matches!(err, Err(StoreError::InvalidArgument(_))));

        let rel = Relation::from_parallel(
            1,
            meta,
            Tags::new(),
            &["way", "node"],
            &[10, 20],
            &["outer", ""],
        )
        .unwrap();
        assert_eq!(rel.members.len(), 2);
        assert_eq!(rel.members[0].kind, ObjectKind::Way);
        assert_eq!(rel.members[1].id, 20);
    }

    #[test]
    fn unknown_member_type_rejected() {
        let meta = MetaData::new(1, 0, 1, 1, "a");
        let err = Relation::from_parallel(1, meta, Tags::new(), &["area"], &[1], &[""]);
        assert!(matches!(err, Err(StoreError::InvalidArgument(_))));
    }

    #[test]
    fn kind_roundtrips_through_u8_and_str() {
        for k in ObjectKind::ALL {
            assert_eq!(ObjectKind::from_u8(k.as_u8()), Some(k));
            assert_eq!(ObjectKind::parse(k.as_str()), Some(k));
        }
        assert_eq!(ObjectKind::from_u8(9), None);
    }
}
