use redb::{Key, ReadableTable, StorageError, Table};
use std::borrow::Borrow;

/// How marker rows (id presence, member index, tile index) are inserted when
/// they may already exist. Picked once per handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpsertStrategy {
    /// Single conditional insert; an existing key is simply overwritten.
    #[default]
    Native,
    /// Probe for the key first and only insert when it is absent.
    ProbeThenInsert,
}

impl UpsertStrategy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "native" => Some(UpsertStrategy::Native),
            "probe" => Some(UpsertStrategy::ProbeThenInsert),
            _ => None,
        }
    }

    /// Insert `key -> ()` unless present. Returns true if the key was new.
    pub fn insert_marker<'k, K: Key + 'static>(
        &self,
        table: &mut Table<'_, K, ()>,
        key: impl Borrow<K::SelfType<'k>>,
    ) -> Result<bool, StorageError> {
        match self {
            UpsertStrategy::Native => Ok(table.insert(key, ())?.is_none()),
            UpsertStrategy::ProbeThenInsert => {
                let k: &K::SelfType<'k> = key.borrow();
                if table.get(k)?.is_some() {
                    return Ok(false);
                }
                table.insert(key, ())?;
                Ok(true)
            }
        }
    }
}
