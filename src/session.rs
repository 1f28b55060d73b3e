//! Transaction handle shared by every store, shape and query operation.
//!
//! A `Session` wraps one redb transaction. Opening it touches every table in
//! the global lock order (see `schema::lock_order`), so all code paths agree
//! on the order tables are taken in. Read helpers work on either transaction
//! kind; write helpers require an exclusive session.

use crate::error::{Result, StoreError};
use crate::geom::Bbox;
use crate::osm::{Member, ObjectKind, Way};
use crate::row::{self, ObjectRow};
use crate::schema::{self, LockTarget, Tier, USERNAMES, tables};
use crate::shapes::ShapeEntry;
use crate::tile;
use crate::upsert::UpsertStrategy;
use crate::usernames::UsernameCache;
use redb::{
    Key, ReadTransaction, ReadableTable, ReadableTableMetadata, TableDefinition, Value,
    WriteTransaction,
};
use std::cell::RefCell;
use std::ops::Bound;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Read-only; any number of queries may share the session.
    AccessShare,
    /// Read-write; must not be shared between concurrent queries.
    Exclusive,
}

pub(crate) enum Txn {
    Read(ReadTransaction),
    Write(WriteTransaction),
}

/// Open `$def` on whichever transaction the session holds and evaluate
/// `$body` with the table bound to `$t`.
macro_rules! with_table {
    ($session:expr, $def:expr, |$t:ident| $body:expr) => {
        match &$session.txn {
            $crate::session::Txn::Read(tx) => {
                let $t = tx.open_table($def)?;
                let out = $body;
                out
            }
            $crate::session::Txn::Write(tx) => {
                let $t = tx.open_table($def)?;
                let out = $body;
                out
            }
        }
    };
}

/// Keyset cursor over the quadtile ranges covering a box.
#[derive(Debug, Clone)]
pub struct TileCursor {
    ranges: Vec<(u32, u32)>,
    idx: usize,
    after: Option<(u32, i64)>,
}

impl TileCursor {
    pub fn new(bbox: &Bbox) -> Self {
        Self {
            ranges: tile::tile_ranges(bbox),
            idx: 0,
            after: None,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.idx >= self.ranges.len()
    }
}

pub struct Session {
    pub(crate) txn: Txn,
    mode: LockMode,
    upsert: UpsertStrategy,
    usernames: RefCell<UsernameCache>,
}

impl Session {
    pub(crate) fn new(txn: Txn, mode: LockMode, upsert: UpsertStrategy) -> Result<Self> {
        let session = Self {
            txn,
            mode,
            upsert,
            usernames: RefCell::new(UsernameCache::default()),
        };
        session.lock_all()?;
        Ok(session)
    }

    fn lock_all(&self) -> Result<()> {
        for target in schema::lock_order() {
            match target {
                LockTarget::History(d) => self.touch(d)?,
                LockTarget::Current(d) => self.touch(d)?,
                LockTarget::Ids(d) => self.touch(d)?,
                LockTarget::Tiles(d) => self.touch(d)?,
                LockTarget::WayMembers(d) => self.touch(d)?,
                LockTarget::RelationMembers(d) => self.touch(d)?,
                LockTarget::Shapes(d) => self.touch(d)?,
                LockTarget::Counters(d) => self.touch(d)?,
                LockTarget::Meta(d) => self.touch(d)?,
                LockTarget::Usernames(d) => self.touch(d)?,
            }
        }
        tracing::trace!(mode = ?self.mode, "session tables locked");
        Ok(())
    }

    fn touch<K: Key + 'static, V: Value + 'static>(
        &self,
        def: TableDefinition<'static, K, V>,
    ) -> Result<()> {
        with_table!(self, def, |_t| Ok(()))
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    pub fn upsert(&self) -> UpsertStrategy {
        self.upsert
    }

    pub fn commit(self) -> Result<()> {
        match self.txn {
            Txn::Write(tx) => tx.commit()?,
            Txn::Read(_) => {}
        }
        Ok(())
    }

    pub fn abort(self) -> Result<()> {
        match self.txn {
            Txn::Write(tx) => tx.abort()?,
            Txn::Read(_) => {}
        }
        Ok(())
    }

    pub(crate) fn write_txn(&self) -> Result<&WriteTransaction> {
        match &self.txn {
            Txn::Write(tx) => Ok(tx),
            Txn::Read(_) => Err(StoreError::ReadOnly(
                "session was opened in access-share mode".into(),
            )),
        }
    }

    // ---- reads ----

    pub fn current_row(&self, tier: Tier, kind: ObjectKind, id: i64) -> Result<Option<ObjectRow>> {
        with_table!(self, tables(tier).current(kind), |t| {
            match t.get(id)? {
                Some(v) => Ok(Some(ObjectRow::decode(v.value())?)),
                None => Ok(None),
            }
        })
    }

    pub fn current_version(&self, tier: Tier, kind: ObjectKind, id: i64) -> Result<Option<u64>> {
        with_table!(self, tables(tier).current(kind), |t| {
            match t.get(id)? {
                Some(v) => Ok(Some(row::peek_version(v.value())?)),
                None => Ok(None),
            }
        })
    }

    pub fn history_row(
        &self,
        tier: Tier,
        kind: ObjectKind,
        id: i64,
        version: u64,
    ) -> Result<Option<ObjectRow>> {
        with_table!(self, tables(tier).history(kind), |t| {
            match t.get((id, version))? {
                Some(v) => Ok(Some(ObjectRow::decode(v.value())?)),
                None => Ok(None),
            }
        })
    }

    /// All history rows of `id`, oldest version first.
    pub fn history_rows(&self, tier: Tier, kind: ObjectKind, id: i64) -> Result<Vec<ObjectRow>> {
        with_table!(self, tables(tier).history(kind), |t| {
            let mut out = Vec::new();
            for item in t.range((id, 0u64)..=(id, u64::MAX))? {
                let (_, v) = item?;
                out.push(ObjectRow::decode(v.value())?);
            }
            Ok(out)
        })
    }

    pub fn history_max_version(&self, tier: Tier, kind: ObjectKind, id: i64) -> Result<Option<u64>> {
        with_table!(self, tables(tier).history(kind), |t| {
            match t.range((id, 0u64)..=(id, u64::MAX))?.next_back() {
                Some(item) => Ok(Some(item?.0.value().1)),
                None => Ok(None),
            }
        })
    }

    /// True if the tier holds any row (live or history) for `id`.
    pub fn has_id(&self, tier: Tier, kind: ObjectKind, id: i64) -> Result<bool> {
        with_table!(self, tables(tier).ids(kind), |t| Ok(t.get(id)?.is_some()))
    }

    /// Largest id present in either the current or the history table.
    pub fn max_id(&self, tier: Tier, kind: ObjectKind) -> Result<Option<i64>> {
        let t = tables(tier);
        let cur = with_table!(self, t.current(kind), |c| {
            match c.last()? {
                Some((k, _)) => Some(k.value()),
                None => None,
            }
        });
        let hist = with_table!(self, t.history(kind), |h| {
            match h.last()? {
                Some((k, _)) => Some(k.value().0),
                None => None,
            }
        });
        Ok(cur.max(hist))
    }

    /// Ids of every live row, ascending.
    pub fn current_ids(&self, tier: Tier, kind: ObjectKind) -> Result<Vec<i64>> {
        with_table!(self, tables(tier).current(kind), |t| {
            let mut out = Vec::new();
            for item in t.iter()? {
                out.push(item?.0.value());
            }
            Ok(out)
        })
    }

    /// Visit every history row of a tier.
    pub fn scan_history(
        &self,
        tier: Tier,
        kind: ObjectKind,
        mut f: impl FnMut(&ObjectRow),
    ) -> Result<()> {
        with_table!(self, tables(tier).history(kind), |t| {
            for item in t.iter()? {
                let (_, v) = item?;
                f(&ObjectRow::decode(v.value())?);
            }
            Ok(())
        })
    }

    pub fn table_sizes(&self, tier: Tier, kind: ObjectKind) -> Result<(u64, u64, u64)> {
        let t = tables(tier);
        let cur = with_table!(self, t.current(kind), |c| c.len()?);
        let hist = with_table!(self, t.history(kind), |h| h.len()?);
        let ids = with_table!(self, t.ids(kind), |i| i.len()?);
        Ok((cur, hist, ids))
    }

    /// (way id, way version) pairs whose member list contains `node_id`.
    /// Includes superseded versions; callers check liveness.
    pub fn way_parents(&self, tier: Tier, node_id: i64) -> Result<Vec<(i64, u64)>> {
        with_table!(self, tables(tier).way_members, |t| {
            let mut out: Vec<(i64, u64)> = Vec::new();
            let lo = (node_id, i64::MIN, 0u64, 0u32);
            let hi = (node_id, i64::MAX, u64::MAX, u32::MAX);
            for item in t.range(lo..=hi)? {
                let (_, way, version, _) = item?.0.value();
                if out.last() != Some(&(way, version)) {
                    out.push((way, version));
                }
            }
            Ok(out)
        })
    }

    /// (relation id, relation version) pairs with a member `(kind, id)`.
    pub fn relation_parents(
        &self,
        tier: Tier,
        kind: ObjectKind,
        id: i64,
    ) -> Result<Vec<(i64, u64)>> {
        with_table!(self, tables(tier).relation_members, |t| {
            let mut out: Vec<(i64, u64)> = Vec::new();
            let k = kind.as_u8();
            let lo = (k, id, i64::MIN, 0u64, 0u32);
            let hi = (k, id, i64::MAX, u64::MAX, u32::MAX);
            for item in t.range(lo..=hi)? {
                let (_, _, rel, version, _) = item?.0.value();
                if out.last() != Some(&(rel, version)) {
                    out.push((rel, version));
                }
            }
            Ok(out)
        })
    }

    /// Keep only the parents whose member row belongs to the live version.
    pub fn live_parents(
        &self,
        tier: Tier,
        kind: ObjectKind,
        candidates: &[(i64, u64)],
    ) -> Result<Vec<i64>> {
        let mut out = Vec::new();
        for &(id, version) in candidates {
            if self.current_version(tier, kind, id)? == Some(version) && out.last() != Some(&id) {
                out.push(id);
            }
        }
        Ok(out)
    }

    /// Pull up to `limit` node ids from the tile index, advancing `cur`.
    pub fn node_tile_batch(&self, tier: Tier, cur: &mut TileCursor, limit: usize) -> Result<Vec<i64>> {
        with_table!(self, tables(tier).node_tiles, |t| {
            let mut out = Vec::new();
            while out.len() < limit && !cur.is_exhausted() {
                let (lo, hi) = cur.ranges[cur.idx];
                let start: Bound<(u32, i64)> = match cur.after {
                    Some(k) => Bound::Excluded(k),
                    None => Bound::Included((lo, i64::MIN)),
                };
                let end: Bound<(u32, i64)> = Bound::Included((hi, i64::MAX));

                let mut filled = false;
                for item in t.range((start, end))? {
                    let key = item?.0.value();
                    out.push(key.1);
                    cur.after = Some(key);
                    if out.len() >= limit {
                        filled = true;
                        break;
                    }
                }
                if !filled {
                    cur.idx += 1;
                    cur.after = None;
                }
            }
            Ok(out)
        })
    }

    /// Logged boxes of `id`, ordered by version then validity start.
    pub fn shape_log(&self, tier: Tier, kind: ObjectKind, id: i64) -> Result<Vec<ShapeEntry>> {
        with_table!(self, tables(tier).shapes, |t| {
            let k = kind.as_u8();
            let mut out = Vec::new();
            for item in t.range((k, id, 0u64, i64::MIN)..=(k, id, u64::MAX, i64::MAX))? {
                let (key, v) = item?;
                let (_, _, version, start) = key.value();
                out.push(ShapeEntry::decode(version, start, v.value())?);
            }
            Ok(out)
        })
    }

    pub fn counter(&self, tier: Tier, name: &str) -> Result<Option<i64>> {
        with_table!(self, tables(tier).nextids, |t| Ok(t.get(name)?.map(|v| v.value())))
    }

    pub fn meta_value(&self, tier: Tier, key: &str) -> Result<Option<String>> {
        with_table!(self, tables(tier).meta, |t| {
            Ok(t.get(key)?.map(|v| v.value().to_string()))
        })
    }

    pub fn is_store_read_only(&self) -> Result<bool> {
        Ok(self.meta_value(Tier::Active, schema::KEY_READ_ONLY)?.as_deref() == Some("true"))
    }

    pub fn username(&self, uid: i64) -> Result<Option<String>> {
        if let Some(name) = self.usernames.borrow().get(uid) {
            return Ok(Some(name.to_string()));
        }
        let found = with_table!(self, USERNAMES, |t| t.get(uid)?.map(|v| v.value().to_string()));
        if let Some(name) = &found {
            self.usernames.borrow_mut().insert(uid, name);
        }
        Ok(found)
    }

    // ---- writes ----

    pub(crate) fn put_current(&self, tier: Tier, row: &ObjectRow) -> Result<()> {
        let tx = self.write_txn()?;
        let mut t = tx.open_table(tables(tier).current(row.object.kind()))?;
        t.insert(row.id(), row.encode()?.as_slice())?;
        Ok(())
    }

    pub(crate) fn remove_current(&self, tier: Tier, kind: ObjectKind, id: i64) -> Result<()> {
        let tx = self.write_txn()?;
        let mut t = tx.open_table(tables(tier).current(kind))?;
        t.remove(id)?;
        Ok(())
    }

    pub(crate) fn put_history(&self, tier: Tier, row: &ObjectRow) -> Result<()> {
        let tx = self.write_txn()?;
        let mut t = tx.open_table(tables(tier).history(row.object.kind()))?;
        t.insert((row.id(), row.version()), row.encode()?.as_slice())?;
        Ok(())
    }

    pub(crate) fn mark_id(&self, tier: Tier, kind: ObjectKind, id: i64) -> Result<()> {
        let tx = self.write_txn()?;
        let mut t = tx.open_table(tables(tier).ids(kind))?;
        self.upsert.insert_marker(&mut t, id)?;
        Ok(())
    }

    pub(crate) fn put_tile(&self, tier: Tier, id: i64, lat: f64, lon: f64) -> Result<()> {
        let tx = self.write_txn()?;
        let mut t = tx.open_table(tables(tier).node_tiles)?;
        self.upsert.insert_marker(&mut t, (tile::tile_for_point(lat, lon), id))?;
        Ok(())
    }

    pub(crate) fn remove_tile(&self, tier: Tier, id: i64, lat: f64, lon: f64) -> Result<()> {
        let tx = self.write_txn()?;
        let mut t = tx.open_table(tables(tier).node_tiles)?;
        t.remove((tile::tile_for_point(lat, lon), id))?;
        Ok(())
    }

    pub(crate) fn clear_tiles(&self, tier: Tier) -> Result<()> {
        let tx = self.write_txn()?;
        tx.delete_table(tables(tier).node_tiles)?;
        tx.open_table(tables(tier).node_tiles)?;
        Ok(())
    }

    pub(crate) fn put_way_members(&self, tier: Tier, way: &Way) -> Result<()> {
        let tx = self.write_txn()?;
        let mut t = tx.open_table(tables(tier).way_members)?;
        for (i, node) in way.refs.iter().enumerate() {
            self.upsert
                .insert_marker(&mut t, (*node, way.id, way.meta.version, i as u32))?;
        }
        Ok(())
    }

    pub(crate) fn put_relation_members(
        &self,
        tier: Tier,
        id: i64,
        version: u64,
        members: &[Member],
    ) -> Result<()> {
        let tx = self.write_txn()?;
        let mut t = tx.open_table(tables(tier).relation_members)?;
        for (i, m) in members.iter().enumerate() {
            self.upsert
                .insert_marker(&mut t, (m.kind.as_u8(), m.id, id, version, i as u32))?;
        }
        Ok(())
    }

    pub(crate) fn put_shape(&self, tier: Tier, kind: ObjectKind, id: i64, entry: &ShapeEntry) -> Result<()> {
        let tx = self.write_txn()?;
        let mut t = tx.open_table(tables(tier).shapes)?;
        t.insert((kind.as_u8(), id, entry.version, entry.start), entry.encode().as_slice())?;
        Ok(())
    }

    pub(crate) fn set_counter(&self, tier: Tier, name: &str, value: i64) -> Result<()> {
        let tx = self.write_txn()?;
        let mut t = tx.open_table(tables(tier).nextids)?;
        t.insert(name, value)?;
        Ok(())
    }

    pub(crate) fn set_meta(&self, tier: Tier, key: &str, value: &str) -> Result<()> {
        let tx = self.write_txn()?;
        let mut t = tx.open_table(tables(tier).meta)?;
        t.insert(key, value)?;
        Ok(())
    }

    /// Write-through: only touches the table when the cache disagrees.
    pub(crate) fn record_username(&self, uid: i64, name: &str) -> Result<()> {
        if name.is_empty() || self.usernames.borrow().is_known(uid, name) {
            return Ok(());
        }
        let tx = self.write_txn()?;
        {
            let mut t = tx.open_table(USERNAMES)?;
            let stored = t.get(uid)?.map(|v| v.value() == name).unwrap_or(false);
            if !stored {
                t.insert(uid, name)?;
            }
        }
        self.usernames.borrow_mut().insert(uid, name);
        Ok(())
    }
}
