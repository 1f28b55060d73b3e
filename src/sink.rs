//! Output sinks fed by the region query.
//!
//! Calls arrive in stream order: `store_is_diff`, `store_bounds`, nodes,
//! `reset`, ways, `reset`, relations, `finish`. A `false` from a `store_*`
//! call means "skipped", not failure.

use crate::codec;
use crate::geom::Bbox;
use crate::osm::{MetaData, Node, ObjectKind, OsmObject, Relation, Tags, Way};
use std::collections::HashSet;
use std::io::{self, Write};

pub trait MapSink {
    fn store_is_diff(&mut self, diff: bool);
    fn store_bounds(&mut self, bbox: &Bbox);
    fn store_node(&mut self, node: &Node) -> bool;
    fn store_way(&mut self, way: &Way) -> bool;
    fn store_relation(&mut self, relation: &Relation) -> bool;
    /// Section break between the node, way and relation streams.
    fn reset(&mut self);
    fn finish(&mut self) -> io::Result<()>;

    fn store_object(&mut self, obj: &OsmObject) -> bool {
        match obj {
            OsmObject::Node(n) => self.store_node(n),
            OsmObject::Way(w) => self.store_way(w),
            OsmObject::Relation(r) => self.store_relation(r),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    IsDiff(bool),
    Bounds(Bbox),
    Node(Node),
    Way(Way),
    Relation(Relation),
    Reset,
    Finish,
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    pub events: Vec<SinkEvent>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids(&self, kind: ObjectKind) -> Vec<i64> {
        self.events
            .iter()
            .filter_map(|e| match (kind, e) {
                (ObjectKind::Node, SinkEvent::Node(n)) => Some(n.id),
                (ObjectKind::Way, SinkEvent::Way(w)) => Some(w.id),
                (ObjectKind::Relation, SinkEvent::Relation(r)) => Some(r.id),
                _ => None,
            })
            .collect()
    }

    pub fn is_finished(&self) -> bool {
        self.events.last() == Some(&SinkEvent::Finish)
    }
}

impl MapSink for CollectingSink {
    fn store_is_diff(&mut self, diff: bool) {
        self.events.push(SinkEvent::IsDiff(diff));
    }

    fn store_bounds(&mut self, bbox: &Bbox) {
        self.events.push(SinkEvent::Bounds(*bbox));
    }

    fn store_node(&mut self, node: &Node) -> bool {
        self.events.push(SinkEvent::Node(node.clone()));
        true
    }

    fn store_way(&mut self, way: &Way) -> bool {
        self.events.push(SinkEvent::Way(way.clone()));
        true
    }

    fn store_relation(&mut self, relation: &Relation) -> bool {
        self.events.push(SinkEvent::Relation(relation.clone()));
        true
    }

    fn reset(&mut self) {
        self.events.push(SinkEvent::Reset);
    }

    fn finish(&mut self) -> io::Result<()> {
        self.events.push(SinkEvent::Finish);
        Ok(())
    }
}

/// One line per event. The first write error is kept and returned by
/// `finish`; later events are dropped.
pub struct TextSink<W: Write> {
    out: W,
    error: Option<io::Error>,
    lines: u64,
}

impl<W: Write> TextSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            error: None,
            lines: 0,
        }
    }

    pub fn lines(&self) -> u64 {
        self.lines
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn line(&mut self, s: &str) -> bool {
        if self.error.is_some() {
            return false;
        }
        match writeln!(self.out, "{s}") {
            Ok(()) => {
                self.lines += 1;
                true
            }
            Err(e) => {
                self.error = Some(e);
                false
            }
        }
    }
}

fn meta_fields(m: &MetaData) -> String {
    format!(
        "v{} {} cs{} uid{} {:?}",
        m.version,
        codec::format_timestamp(m.timestamp),
        m.changeset,
        m.uid,
        m.username
    )
}

fn tags_field(tags: &Tags) -> String {
    codec::tags_to_json(tags).unwrap_or_else(|_| "{}".to_string())
}

impl<W: Write> MapSink for TextSink<W> {
    fn store_is_diff(&mut self, diff: bool) {
        self.line(&format!("diff {diff}"));
    }

    fn store_bounds(&mut self, b: &Bbox) {
        self.line(&format!(
            "bounds {:.7} {:.7} {:.7} {:.7}",
            b.min_lon, b.min_lat, b.max_lon, b.max_lat
        ));
    }

    fn store_node(&mut self, n: &Node) -> bool {
        self.line(&format!(
            "node {} {} lat={:.7} lon={:.7} {}",
            n.id,
            meta_fields(&n.meta),
            n.lat,
            n.lon,
            tags_field(&n.tags)
        ))
    }

    fn store_way(&mut self, w: &Way) -> bool {
        let refs: Vec<String> = w.refs.iter().map(|r| r.to_string()).collect();
        self.line(&format!(
            "way {} {} refs=[{}] {}",
            w.id,
            meta_fields(&w.meta),
            refs.join(","),
            tags_field(&w.tags)
        ))
    }

    fn store_relation(&mut self, r: &Relation) -> bool {
        let members: Vec<String> = r
            .members
            .iter()
            .map(|m| format!("{}{}:{:?}", &m.kind.as_str()[..1], m.id, m.role))
            .collect();
        self.line(&format!(
            "relation {} {} members=[{}] {}",
            r.id,
            meta_fields(&r.meta),
            members.join(","),
            tags_field(&r.tags)
        ))
    }

    fn reset(&mut self) {
        self.line("--");
    }

    fn finish(&mut self) -> io::Result<()> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        self.out.flush()
    }
}

/// Digest of the text rendering of a stream; equal fingerprints mean
/// identical output.
pub struct FingerprintSink {
    text: TextSink<blake3::Hasher>,
}

impl Default for FingerprintSink {
    fn default() -> Self {
        Self::new()
    }
}

impl FingerprintSink {
    pub fn new() -> Self {
        Self {
            text: TextSink::new(blake3::Hasher::new()),
        }
    }

    pub fn events(&self) -> u64 {
        self.text.lines()
    }

    pub fn fingerprint(&self) -> String {
        hex::encode(self.text.out.finalize().as_bytes())
    }
}

impl MapSink for FingerprintSink {
    fn store_is_diff(&mut self, diff: bool) {
        self.text.store_is_diff(diff)
    }
    fn store_bounds(&mut self, bbox: &Bbox) {
        self.text.store_bounds(bbox)
    }
    fn store_node(&mut self, node: &Node) -> bool {
        self.text.store_node(node)
    }
    fn store_way(&mut self, way: &Way) -> bool {
        self.text.store_way(way)
    }
    fn store_relation(&mut self, relation: &Relation) -> bool {
        self.text.store_relation(relation)
    }
    fn reset(&mut self) {
        self.text.reset()
    }
    fn finish(&mut self) -> io::Result<()> {
        self.text.finish()
    }
}

/// Passes each object through once; repeats are skipped with `false`.
pub struct DedupSink<S: MapSink> {
    inner: S,
    seen: HashSet<(ObjectKind, i64)>,
    skipped: u64,
}

impl<S: MapSink> DedupSink<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            seen: HashSet::new(),
            skipped: 0,
        }
    }

    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    fn first_sighting(&mut self, kind: ObjectKind, id: i64) -> bool {
        let fresh = self.seen.insert((kind, id));
        if !fresh {
            self.skipped += 1;
        }
        fresh
    }
}

impl<S: MapSink> MapSink for DedupSink<S> {
    fn store_is_diff(&mut self, diff: bool) {
        self.inner.store_is_diff(diff)
    }

    fn store_bounds(&mut self, bbox: &Bbox) {
        self.inner.store_bounds(bbox)
    }

    fn store_node(&mut self, node: &Node) -> bool {
        self.first_sighting(ObjectKind::Node, node.id) && self.inner.store_node(node)
    }

    fn store_way(&mut self, way: &Way) -> bool {
        self.first_sighting(ObjectKind::Way, way.id) && self.inner.store_way(way)
    }

    fn store_relation(&mut self, relation: &Relation) -> bool {
        self.first_sighting(ObjectKind::Relation, relation.id) && self.inner.store_relation(relation)
    }

    fn reset(&mut self) {
        self.inner.reset()
    }

    fn finish(&mut self) -> io::Result<()> {
        self.inner.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::osm::Member;

    fn meta() -> MetaData {
        MetaData::new(2, 0, 9, 4, "mapper")
    }

    fn sample_node(id: i64) -> Node {
        Node {
            id,
            meta: meta(),
            tags: Tags::from([("amenity".to_string(), "cafe".to_string())]),
            lat: 51.5,
            lon: -0.25,
        }
    }

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::other("disk full"))
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn text_sink_renders_one_line_per_event() {
        let mut sink = TextSink::new(Vec::new());
        sink.store_is_diff(false);
        sink.store_bounds(&Bbox::new(0.0, 0.0, 1.0, 1.0));
        sink.store_node(&sample_node(1));
        sink.reset();
        sink.store_way(&Way { id: 7, meta: meta(), tags: Tags::new(), refs: vec![1, 2] });
        sink.reset();
        sink.store_relation(&Relation {
            id: 3,
            meta: meta(),
            tags: Tags::new(),
            members: vec![Member { kind: ObjectKind::Way, id: 7, role: "outer".into() }],
        });
        sink.finish().unwrap();

        let text = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 7);
        assert_eq!(lines[0], "diff false");
        assert_eq!(
            lines[2],
            r#"node 1 v2 1970-01-01T00:00:00Z cs9 uid4 "mapper" lat=51.5000000 lon=-0.2500000 {"amenity":"cafe"}"#
        );
        assert!(lines[4].contains("refs=[1,2]"));
        assert!(lines[6].contains(r#"members=[w7:"outer"]"#));
    }

    #[test]
    fn text_sink_reports_write_errors_on_finish() {
        let mut sink = TextSink::new(Broken);
        assert!(!sink.store_node(&sample_node(1)));
        assert!(!sink.store_node(&sample_node(2)));
        assert!(sink.finish().is_err());
    }

    #[test]
    fn fingerprints_differ_on_content() {
        let mut a = FingerprintSink::new();
        let mut b = FingerprintSink::new();
        a.store_node(&sample_node(1));
        b.store_node(&sample_node(1));
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
        b.store_node(&sample_node(2));
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(b.events(), 2);
    }

    #[test]
    fn dedup_skips_repeats_per_kind() {
        let mut sink = DedupSink::new(CollectingSink::new());
        assert!(sink.store_node(&sample_node(1)));
        assert!(!sink.store_node(&sample_node(1)));
        assert!(sink.store_way(&Way { id: 1, meta: meta(), tags: Tags::new(), refs: vec![] }));
        sink.reset();
        assert!(!sink.store_object(&OsmObject::Node(sample_node(1))));
        assert_eq!(sink.skipped(), 2);
        let inner = sink.into_inner();
        assert_eq!(inner.ids(ObjectKind::Node), vec![1]);
        assert_eq!(inner.events.len(), 3);
    }
}
