//! Per-tier id counters (`nextids`): object ids plus changeset/user ids.

use crate::error::Result;
use crate::osm::ObjectKind;
use crate::schema::{KEY_CHANGESET, KEY_UID, Tier};
use crate::session::Session;

/// First id handed out by an untouched counter.
const FIRST_ID: i64 = 1;

/// Next unallocated id for `name`; advances the counter when `increment`.
pub fn allocate(session: &Session, tier: Tier, name: &str, increment: bool) -> Result<i64> {
    let next = session.counter(tier, name)?.unwrap_or(FIRST_ID);
    if increment {
        session.set_counter(tier, name, next + 1)?;
        tracing::trace!(tier = tier.as_str(), name, id = next, "id allocated");
    }
    Ok(next)
}

pub fn peek(session: &Session, tier: Tier, name: &str) -> Result<i64> {
    allocate(session, tier, name, false)
}

pub fn allocate_object_id(session: &Session, tier: Tier, kind: ObjectKind) -> Result<i64> {
    allocate(session, tier, kind.as_str(), true)
}

/// Raise `name` to at least `floor`; never lowers it. Returns the new value.
fn raise_counter(session: &Session, tier: Tier, name: &str, floor: i64) -> Result<i64> {
    let existing = session.counter(tier, name)?;
    let next = existing.unwrap_or(FIRST_ID).max(floor);
    if existing != Some(next) {
        session.set_counter(tier, name, next)?;
    }
    Ok(next)
}

/// Recompute every object counter of `tier` as
/// `max(existing, largest id in either tier's current or history table + 1)`.
///
/// Blocking maintenance operation: run it in an exclusive session after bulk
/// imports. Idempotent and monotonic.
pub fn refresh_counters(session: &Session, tier: Tier) -> Result<Vec<(ObjectKind, i64)>> {
    let mut out = Vec::new();
    for kind in ObjectKind::ALL {
        let mut max_id: Option<i64> = None;
        for t in Tier::ALL {
            max_id = max_id.max(session.max_id(t, kind)?);
        }
        let floor = max_id.map(|m| m.saturating_add(1)).unwrap_or(FIRST_ID);
        let next = raise_counter(session, tier, kind.as_str(), floor)?;
        tracing::info!(tier = tier.as_str(), kind = kind.as_str(), next, "id counter refreshed");
        out.push((kind, next));
    }
    Ok(out)
}

/// Same as `refresh_counters` for the changeset and user id counters, taken
/// from the metadata of every stored version.
pub fn refresh_changeset_counters(session: &Session, tier: Tier) -> Result<(i64, i64)> {
    let mut max_changeset = 0i64;
    let mut max_uid = 0i64;

    for t in Tier::ALL {
        for kind in ObjectKind::ALL {
            for id in session.current_ids(t, kind)? {
                if let Some(row) = session.current_row(t, kind, id)? {
                    let m = row.object.meta();
                    max_changeset = max_changeset.max(m.changeset);
                    max_uid = max_uid.max(m.uid);
                }
            }
            session.scan_history(t, kind, |row| {
                let m = row.object.meta();
                max_changeset = max_changeset.max(m.changeset);
                max_uid = max_uid.max(m.uid);
            })?;
        }
    }

    let changeset = raise_counter(session, tier, KEY_CHANGESET, max_changeset.saturating_add(1))?;
    let uid = raise_counter(session, tier, KEY_UID, max_uid.saturating_add(1))?;
    tracing::info!(tier = tier.as_str(), changeset, uid, "changeset/user counters refreshed");
    Ok((changeset, uid))
}
