//! Field path parsing and resolution
//!
//! Paths address leaves inside an event map using dotted and bracketed
//! segments (`request.headers[0].host`). Resolution renders the addressed
//! leaf as a string together with a found flag; a missing segment yields
//! `("", false)` so the operator table's empty-value rules apply.

use serde_json::{Map, Value as JsonValue};

/// One step of a parsed field path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Named member of an object, or a collecting descent over a sequence
    Key(String),
    /// Bracketed numeric index into a sequence
    Index(usize),
}

/// A pre-parsed field path
///
/// The original path string is retained because the per-event scratch cache
/// is keyed by it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    raw: String,
    segments: Vec<Segment>,
}

impl FieldPath {
    /// Parse a dotted/bracketed path string
    ///
    /// `a.b[2].c` yields `Key(a), Key(b), Index(2), Key(c)`. Malformed
    /// bracket text falls back to a literal key segment so compilation never
    /// fails on a path; an unresolvable path simply never matches.
    pub fn parse(raw: &str) -> Self {
        let mut segments = Vec::new();
        for part in raw.split('.') {
            if part.is_empty() {
                continue;
            }
            let mut rest = part;
            // Leading name before any bracket
            if let Some(open) = rest.find('[') {
                let (name, brackets) = rest.split_at(open);
                if !name.is_empty() {
                    segments.push(Segment::Key(name.to_string()));
                }
                rest = brackets;
                while let Some(stripped) = rest.strip_prefix('[') {
                    match stripped.find(']') {
                        Some(close) => {
                            let inner = &stripped[..close];
                            match inner.parse::<usize>() {
                                Ok(idx) => segments.push(Segment::Index(idx)),
                                Err(_) => segments.push(Segment::Key(inner.to_string())),
                            }
                            rest = &stripped[close + 1..];
                        }
                        None => {
                            segments.push(Segment::Key(stripped.to_string()));
                            rest = "";
                        }
                    }
                }
            } else {
                segments.push(Segment::Key(rest.to_string()));
            }
        }
        Self {
            raw: raw.to_string(),
            segments,
        }
    }

    /// The original path string
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Parsed segments
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Resolve this path against an event map, rendering the leaf
    pub fn resolve(&self, fields: &Map<String, JsonValue>) -> (String, bool) {
        let Some((first, rest)) = self.segments.split_first() else {
            return (String::new(), false);
        };
        let root = match first {
            Segment::Key(k) => fields.get(k.as_str()),
            Segment::Index(i) => fields.get(&i.to_string()),
        };
        let Some(root) = root else {
            return (String::new(), false);
        };
        let mut hits: Vec<&JsonValue> = Vec::new();
        collect(root, rest, &mut hits);
        match hits.len() {
            0 => (String::new(), false),
            1 => (render_leaf(hits[0]), true),
            _ => {
                let arr = JsonValue::Array(hits.into_iter().cloned().collect());
                (render_leaf(&arr), true)
            }
        }
    }

    /// Remove the addressed field from the map; returns whether anything was
    /// removed. Only object/array traversal is supported; a collecting
    /// descent is not a valid deletion target.
    pub fn remove_from(&self, fields: &mut Map<String, JsonValue>) -> bool {
        let Some((last, parents)) = self.segments.split_last() else {
            return false;
        };
        if parents.is_empty() {
            return remove_segment_from_object(fields, last);
        }
        let Segment::Key(first) = &parents[0] else {
            return false;
        };
        let Some(mut current) = fields.get_mut(first.as_str()) else {
            return false;
        };
        for seg in &parents[1..] {
            let next = match (current, seg) {
                (JsonValue::Object(map), Segment::Key(k)) => map.get_mut(k.as_str()),
                (JsonValue::Array(items), Segment::Index(i)) => items.get_mut(*i),
                _ => None,
            };
            match next {
                Some(v) => current = v,
                None => return false,
            }
        }
        match (current, last) {
            (JsonValue::Object(map), seg) => remove_segment_from_object(map, seg),
            (JsonValue::Array(items), Segment::Index(i)) => {
                if *i < items.len() {
                    items.remove(*i);
                    true
                } else {
                    false
                }
            }
            _ => false,
        }
    }
}

fn remove_segment_from_object(map: &mut Map<String, JsonValue>, seg: &Segment) -> bool {
    match seg {
        Segment::Key(k) => map.remove(k.as_str()).is_some(),
        Segment::Index(i) => map.remove(&i.to_string()).is_some(),
    }
}

/// Walk `value` along `segments`, collecting every leaf the path addresses.
///
/// A non-numeric key over a sequence descends into each element and collects;
/// scalar elements that cannot carry the segment are skipped.
fn collect<'a>(value: &'a JsonValue, segments: &[Segment], out: &mut Vec<&'a JsonValue>) {
    let Some((seg, rest)) = segments.split_first() else {
        out.push(value);
        return;
    };
    match value {
        JsonValue::Object(map) => {
            let child = match seg {
                Segment::Key(k) => map.get(k.as_str()),
                Segment::Index(i) => map.get(&i.to_string()),
            };
            if let Some(child) = child {
                collect(child, rest, out);
            }
        }
        JsonValue::Array(items) => match seg {
            Segment::Index(i) => {
                if let Some(child) = items.get(*i) {
                    collect(child, rest, out);
                }
            }
            Segment::Key(k) => {
                if let Ok(i) = k.parse::<usize>() {
                    if let Some(child) = items.get(i) {
                        collect(child, rest, out);
                    }
                } else {
                    for item in items {
                        collect(item, segments, out);
                    }
                }
            }
        },
        _ => {}
    }
}

/// Render a found leaf per the resolver contract: strings verbatim, integers
/// base-10, booleans `true`/`false`, floats in minimal round-trippable form,
/// objects and sequences as canonical JSON. Null renders empty.
pub fn render_leaf(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Null => String::new(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}
