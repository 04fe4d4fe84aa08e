//! Dotted/indexed paths into a document.
//!
//! `owner.name`, `members.0`, `members[0].handle` and `.` (the value itself)
//! are all valid paths. A purely numeric dotted segment indexes into an
//! array, but is still treated as a key when the value is an object.

use serde::Deserialize;
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct FieldPath {
    raw: String,
    segments: Vec<Segment>,
}

impl FieldPath {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err("field path must not be empty".to_string());
        }
        if trimmed == "." {
            return Ok(Self {
                raw: trimmed.to_string(),
                segments: Vec::new(),
            });
        }

        let mut segments = Vec::new();
        for part in trimmed.split('.') {
            let (name, mut rest) = match part.find('[') {
                Some(pos) => (&part[..pos], &part[pos..]),
                None => (part, ""),
            };
            if name.is_empty() && rest.is_empty() {
                return Err(format!("empty segment in field path '{}'", trimmed));
            }
            if !name.is_empty() {
                segments.push(Segment::Key(name.to_string()));
            }
            while !rest.is_empty() {
                let close = rest
                    .find(']')
                    .ok_or_else(|| format!("unclosed '[' in field path '{}'", trimmed))?;
                let index = rest[1..close]
                    .parse::<usize>()
                    .map_err(|_| format!("invalid index '{}' in field path '{}'", &rest[1..close], trimmed))?;
                segments.push(Segment::Index(index));
                rest = &rest[close + 1..];
                if !rest.is_empty() && !rest.starts_with('[') {
                    return Err(format!("unexpected '{}' in field path '{}'", rest, trimmed));
                }
            }
        }

        Ok(Self {
            raw: trimmed.to_string(),
            segments,
        })
    }

    /// True for `.`, the path that addresses the value itself.
    pub fn is_self(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn lookup<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        let mut current = value;
        for segment in &self.segments {
            current = match (segment, current) {
                (Segment::Key(key), Value::Object(map)) => map.get(key)?,
                (Segment::Key(key), Value::Array(items)) => items.get(key.parse::<usize>().ok()?)?,
                (Segment::Index(i), Value::Array(items)) => items.get(*i)?,
                _ => return None,
            };
        }
        Some(current)
    }
}

impl TryFrom<String> for FieldPath {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        FieldPath::parse(&raw)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(raw: &str) -> FieldPath {
        FieldPath::parse(raw).unwrap()
    }

    #[test]
    fn nested_keys_and_indexes() {
        let doc = json!({
            "owner": { "name": "ada" },
            "members": [{ "handle": "a" }, { "handle": "b" }],
            "grid": [[1, 2], [3, 4]]
        });
        assert_eq!(path("owner.name").lookup(&doc), Some(&json!("ada")));
        assert_eq!(path("members.1.handle").lookup(&doc), Some(&json!("b")));
        assert_eq!(path("members[0].handle").lookup(&doc), Some(&json!("a")));
        assert_eq!(path("grid[1][0]").lookup(&doc), Some(&json!(3)));
        assert_eq!(path(".").lookup(&doc), Some(&doc));
    }

    #[test]
    fn missing_segments_yield_none() {
        let doc = json!({ "owner": { "name": "ada" }, "tags": ["x"] });
        assert_eq!(path("owner.email").lookup(&doc), None);
        assert_eq!(path("tags[3]").lookup(&doc), None);
        assert_eq!(path("owner.name.first").lookup(&doc), None);
    }

    #[test]
    fn numeric_segment_is_a_key_on_objects() {
        let doc = json!({ "scores": { "2019": 7 } });
        assert_eq!(path("scores.2019").lookup(&doc), Some(&json!(7)));
    }

    #[test]
    fn rejects_malformed_paths() {
        assert!(FieldPath::parse("").is_err());
        assert!(FieldPath::parse("a..b").is_err());
        assert!(FieldPath::parse("a[1").is_err());
        assert!(FieldPath::parse("a[x]").is_err());
        assert!(FieldPath::parse("a[1]b").is_err());
    }

    #[test]
    fn self_path() {
        assert!(path(".").is_self());
        assert!(!path("a").is_self());
        assert_eq!(path("members[0].handle").to_string(), "members[0].handle");
    }
}
