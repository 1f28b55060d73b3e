//! JSON column encodings for tags and member lists, plus timestamp helpers.
//!
//! tags      -> `{"key":"value",...}` (`{}` when empty)
//! way refs  -> `[1,2,3]`
//! members   -> `[["node",1],["way",2]]` with roles in a parallel `["a","b"]`

use crate::error::{Result, StoreError};
use crate::osm::{Member, ObjectKind, Tags};
use chrono::{DateTime, Utc};

pub const EMPTY_TAGS: &str = "{}";

pub fn tags_to_json(tags: &Tags) -> Result<String> {
    if tags.is_empty() {
        return Ok(EMPTY_TAGS.to_string());
    }
    Ok(serde_json::to_string(tags)?)
}

pub fn tags_from_json(s: &str) -> Result<Tags> {
    // Most objects are untagged; skip the parser for them.
    if s == EMPTY_TAGS {
        return Ok(Tags::new());
    }
    Ok(serde_json::from_str(s)?)
}

pub fn refs_to_json(refs: &[i64]) -> Result<String> {
    Ok(serde_json::to_string(refs)?)
}

pub fn refs_from_json(s: &str) -> Result<Vec<i64>> {
    Ok(serde_json::from_str(s)?)
}

/// Encode members as the `(members, roles)` column pair.
pub fn members_to_json(members: &[Member]) -> Result<(String, String)> {
    let pairs: Vec<(&str, i64)> = members.iter().map(|m| (m.kind.as_str(), m.id)).collect();
    let roles: Vec<&str> = members.iter().map(|m| m.role.as_str()).collect();
    Ok((serde_json::to_string(&pairs)?, serde_json::to_string(&roles)?))
}

pub fn members_from_json(members: &str, roles: &str) -> Result<Vec<Member>> {
    let pairs: Vec<(String, i64)> = serde_json::from_str(members)?;
    let roles: Vec<String> = serde_json::from_str(roles)?;

    if pairs.len() != roles.len() {
        return Err(StoreError::Integrity(format!(
            "member column has {} entries but role column has {}",
            pairs.len(),
            roles.len()
        )));
    }

    pairs
        .into_iter()
        .zip(roles)
        .map(|((t, id), role)| {
            let kind = ObjectKind::parse(&t)
                .ok_or_else(|| StoreError::Integrity(format!("unknown member type {t:?}")))?;
            Ok(Member { kind, id, role })
        })
        .collect()
}

pub fn format_timestamp(secs: i64) -> String {
    match DateTime::<Utc>::from_timestamp(secs, 0) {
        Some(dt) => dt.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        None => secs.to_string(),
    }
}

pub fn parse_timestamp(s: &str) -> Result<i64> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.timestamp())
        .map_err(|e| StoreError::InvalidArgument(format!("bad timestamp {s:?}: {e}")))
}

pub fn now_secs() -> i64 {
    Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_tags_take_fast_path() {
        assert_eq!(tags_to_json(&Tags::new()).unwrap(), "{}");
        assert!(tags_from_json("{}").unwrap().is_empty());
        // Whitespace variants still go through the parser and agree.
        assert!(tags_from_json("{ }").unwrap().is_empty());
    }

    #[test]
    fn tags_survive_json() {
        let mut t = Tags::new();
        t.insert("name".into(), "Quai \"Nord\"".into());
        t.insert("highway".into(), "residential".into());
        let s = tags_to_json(&t).unwrap();
        assert_eq!(tags_from_json(&s).unwrap(), t);
    }

    #[test]
    fn member_columns_must_agree() {
        let err = members_from_json(r#"[["way",1],["node",2]]"#, r#"["outer"]"#);
        assert!(matches!(err, Err(StoreError::Integrity(_))));

        let err = members_from_json(r#"[["area",1]]"#, r#"[""]"#);
        assert!(matches!(err, Err(StoreError::Integrity(_))));
    }

    #[test]
    fn members_encode_as_pairs() {
        let members = vec![
            Member { kind: ObjectKind::Way, id: 7, role: "outer".into() },
            Member { kind: ObjectKind::Relation, id: -3, role: String::new() },
        ];
        let (m, r) = members_to_json(&members).unwrap();
        assert_eq!(m, r#"[["way",7],["relation",-3]]"#);
        assert_eq!(r, r#"["outer",""]"#);
        assert_eq!(members_from_json(&m, &r).unwrap(), members);
    }

    #[test]
    fn timestamps() {
        assert_eq!(format_timestamp(0), "1970-01-01T00:00:00Z");
        assert_eq!(parse_timestamp("2020-01-02T03:04:05Z").unwrap(), 1_577_934_245);
        assert!(parse_timestamp("yesterday").is_err());
    }
}
