use crate::codec;
use crate::error::{Result, StoreError};
use crate::geom::Bbox;
use crate::osm::{MetaData, Node, ObjectKind, OsmObject, Relation, Way};

const ROW_FORMAT: u8 = 1;
const FLAG_VISIBLE: u8 = 1;
const FLAG_BBOX: u8 = 2;
const HEADER_LEN: usize = 43;

/// A stored object version plus its cached envelope.
///
/// The envelope is derived state owned by the shape cache: `bbox_since` is
/// the timestamp from which the cached box has been valid.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectRow {
    pub object: OsmObject,
    pub bbox: Option<Bbox>,
    pub bbox_since: i64,
}

impl ObjectRow {
    pub fn new(object: OsmObject) -> Self {
        Self {
            object,
            bbox: None,
            bbox_since: 0,
        }
    }

    pub fn id(&self) -> i64 {
        self.object.id()
    }

    pub fn version(&self) -> u64 {
        self.object.version()
    }

    /// Encode to the on-disk row layout.
    ///
    /// Format v1:
    /// [0]      u8  format = 1
    /// [1]      u8  object kind
    /// [2]      u8  flags (bit0 = visible, bit1 = has bbox)
    /// [3..11]  i64 id LE
    /// [11..19] u64 version LE
    /// [19..27] i64 timestamp LE
    /// [27..35] i64 changeset LE
    /// [35..43] i64 uid LE
    /// then length-prefixed (u32 LE) strings: username, tags json,
    /// node: f64 lat, f64 lon | way: refs json | relation: members json, roles json,
    /// then if has bbox: 4 x f64 box, i64 bbox_since.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let meta = self.object.meta();
        let mut out = Vec::with_capacity(128);
        out.push(ROW_FORMAT);
        out.push(self.object.kind().as_u8());

        let mut flags = 0u8;
        if meta.visible {
            flags |= FLAG_VISIBLE;
        }
        if self.bbox.is_some() {
            flags |= FLAG_BBOX;
        }
        out.push(flags);

        out.extend_from_slice(&self.object.id().to_le_bytes());
        out.extend_from_slice(&meta.version.to_le_bytes());
        out.extend_from_slice(&meta.timestamp.to_le_bytes());
        out.extend_from_slice(&meta.changeset.to_le_bytes());
        out.extend_from_slice(&meta.uid.to_le_bytes());

        put_str(&mut out, &meta.username);
        put_str(&mut out, &codec::tags_to_json(self.object.tags())?);

        match &self.object {
            OsmObject::Node(n) => {
                out.extend_from_slice(&n.lat.to_le_bytes());
                out.extend_from_slice(&n.lon.to_le_bytes());
            }
            OsmObject::Way(w) => put_str(&mut out, &codec::refs_to_json(&w.refs)?),
            OsmObject::Relation(r) => {
                let (members, roles) = codec::members_to_json(&r.members)?;
                put_str(&mut out, &members);
                put_str(&mut out, &roles);
            }
        }

        if let Some(b) = &self.bbox {
            out.extend_from_slice(&b.pack());
            out.extend_from_slice(&self.bbox_since.to_le_bytes());
        }

        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(StoreError::Integrity(format!("row too short: {} bytes", bytes.len())));
        }
        match bytes[0] {
            ROW_FORMAT => Self::decode_v1(bytes),
            v => Err(StoreError::Integrity(format!("unknown row format: {v}"))),
        }
    }

    fn decode_v1(bytes: &[u8]) -> Result<Self> {
        let kind = ObjectKind::from_u8(bytes[1])
            .ok_or_else(|| StoreError::Integrity(format!("unknown object kind: {}", bytes[1])))?;
        let flags = bytes[2];

        let mut r = Reader { bytes, pos: 3 };
        let id = r.i64()?;
        let version = r.u64()?;
        let timestamp = r.i64()?;
        let changeset = r.i64()?;
        let uid = r.i64()?;
        let username = r.str()?.to_string();
        let tags = codec::tags_from_json(r.str()?)?;

        let meta = MetaData {
            version,
            timestamp,
            changeset,
            uid,
            username,
            visible: flags & FLAG_VISIBLE != 0,
        };

        let object = match kind {
            ObjectKind::Node => {
                let lat = r.f64()?;
                let lon = r.f64()?;
                OsmObject::Node(Node { id, meta, tags, lat, lon })
            }
            ObjectKind::Way => {
                let refs = codec::refs_from_json(r.str()?)?;
                OsmObject::Way(Way { id, meta, tags, refs })
            }
            ObjectKind::Relation => {
                let members = r.str()?;
                let roles = r.str()?;
                let members = codec::members_from_json(members, roles)
                    .map_err(|e| StoreError::Integrity(format!("relation {id}: {e}")))?;
                OsmObject::Relation(Relation { id, meta, tags, members })
            }
        };

        let (bbox, bbox_since) = if flags & FLAG_BBOX != 0 {
            let b = Bbox::unpack(r.take(32)?)
                .ok_or_else(|| StoreError::Integrity(format!("{kind} {id}: truncated bbox")))?;
            (Some(b), r.i64()?)
        } else {
            (None, 0)
        };

        Ok(Self { object, bbox, bbox_since })
    }
}

/// Version of an encoded row without decoding its columns.
pub fn peek_version(bytes: &[u8]) -> Result<u64> {
    if bytes.len() < HEADER_LEN {
        return Err(StoreError::Integrity(format!("row too short: {} bytes", bytes.len())));
    }
    let mut a = [0u8; 8];
    a.copy_from_slice(&bytes[11..19]);
    Ok(u64::from_le_bytes(a))
}

fn put_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos + n;
        if end > self.bytes.len() {
            return Err(StoreError::Integrity(format!(
                "row truncated: need {} bytes at offset {}, have {}",
                n,
                self.pos,
                self.bytes.len()
            )));
        }
        let s = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(s)
    }

    fn arr8(&mut self) -> Result<[u8; 8]> {
        let mut a = [0u8; 8];
        a.copy_from_slice(self.take(8)?);
        Ok(a)
    }

    fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.arr8()?))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.arr8()?))
    }

    fn f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.arr8()?))
    }

    fn str(&mut self) -> Result<&'a str> {
        let mut len = [0u8; 4];
        len.copy_from_slice(self.take(4)?);
        let raw = self.take(u32::from_le_bytes(len) as usize)?;
        std::str::from_utf8(raw).map_err(|e| StoreError::Integrity(format!("row string: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::osm::{Member, Tags};

    fn meta() -> MetaData {
        MetaData::new(3, 1_600_000_000, 77, 12, "mapper")
    }

    #[test]
    fn relation_row_keeps_members_and_box() {
        let rel = Relation {
            id: 5,
            meta: meta(),
            tags: Tags::from([("type".to_string(), "route".to_string())]),
            members: vec![
                Member { kind: ObjectKind::Way, id: 1, role: "forward".into() },
                Member { kind: ObjectKind::Node, id: 2, role: String::new() },
            ],
        };
        let row = ObjectRow {
            object: rel.into(),
            bbox: Some(Bbox::new(1.0, 2.0, 3.0, 4.0)),
            bbox_since: 99,
        };
        let bytes = row.encode().unwrap();
        assert_eq!(peek_version(&bytes).unwrap(), 3);
        let back = ObjectRow::decode(&bytes).unwrap();
        assert_eq!(back, row);
    }

    #[test]
    fn deleted_node_keeps_visibility_flag() {
        let node = Node { id: -4, meta: meta().deleted(), tags: Tags::new(), lat: 1.5, lon: -2.5 };
        let row = ObjectRow::new(node.into());
        let back = ObjectRow::decode(&row.encode().unwrap()).unwrap();
        assert!(!back.object.visible());
        assert_eq!(back.bbox, None);
    }

    #[test]
    fn truncated_rows_are_integrity_faults() {
        let way = Way { id: 1, meta: meta(), tags: Tags::new(), refs: vec![1, 2, 3] };
        let bytes = ObjectRow::new(way.into()).encode().unwrap();
        let err = ObjectRow::decode(&bytes[..bytes.len() - 2]);
        assert!(matches!(err, Err(StoreError::Integrity(_))));
        assert!(matches!(ObjectRow::decode(&[9u8; 50]), Err(StoreError::Integrity(_))));
    }
}
