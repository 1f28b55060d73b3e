//! Versioned, two-tier map object store with a resumable region query.
//!
//! Objects live in a read-mostly static tier and an active overlay, each with
//! current and history tables. Writes go through [`store::store_and_refresh`];
//! region reads through [`query::MapQuery`], driven step by step or by a
//! [`pool::QueryPool`].

pub mod check;
pub mod codec;
pub mod config;
pub mod db;
pub mod dbpath;
pub mod diff;
pub mod error;
pub mod geom;
pub mod ids;
pub mod logging;
pub mod osm;
pub mod pool;
pub mod query;
pub mod row;
pub mod schema;
pub mod session;
pub mod shapes;
pub mod sink;
pub mod stats;
pub mod store;
pub mod tile;
pub mod upsert;
pub mod usernames;

pub use config::StoreConfig;
pub use db::DbHandle;
pub use error::{Result, StoreError};
pub use geom::Bbox;
pub use osm::{Member, MetaData, Node, ObjectKind, OsmObject, Relation, Tags, Way};
pub use query::{MapQuery, Progress};
pub use schema::Tier;
pub use session::{LockMode, Session};
pub use sink::MapSink;
