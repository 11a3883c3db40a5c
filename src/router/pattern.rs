use crate::error::{ServerError, ServerResult};
use std::cmp::Ordering;
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Static(String),
    Param(String),
    Wildcard(String),
}

impl Segment {
    /// Per-segment specificity: static > named parameter > wildcard.
    fn rank(&self) -> u8 {
        match self {
            Segment::Static(_) => 3,
            Segment::Param(_) => 2,
            Segment::Wildcard(_) => 1,
        }
    }
}

/// Splits a normalized path into its segments. The root has none.
pub(crate) fn split_path(path: &str) -> impl Iterator<Item = &str> {
    let trimmed = path.trim_matches('/');
    trimmed.split('/').filter(move |_| !trimmed.is_empty())
}

pub(crate) fn normalize_pattern(pattern: &str) -> String {
    crate::http::request::normalize_path(pattern)
}

pub(crate) fn parse_pattern(pattern: &str) -> ServerResult<Vec<Segment>> {
    let invalid = |reason: &str| ServerError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: reason.to_string(),
    };

    let raw: Vec<&str> = split_path(pattern).collect();
    let mut segments = Vec::with_capacity(raw.len());
    let mut names = HashSet::new();

    for (index, part) in raw.iter().enumerate() {
        let segment = if let Some(name) = part.strip_prefix(':') {
            if name.is_empty() {
                return Err(invalid("parameter name is empty"));
            }
            Segment::Param(name.to_string())
        } else if let Some(name) = part.strip_prefix('*') {
            if index + 1 != raw.len() {
                return Err(invalid("wildcard must be the final segment"));
            }
            let name = if name.is_empty() { "*" } else { name };
            Segment::Wildcard(name.to_string())
        } else if part.is_empty() {
            return Err(invalid("empty path segment"));
        } else {
            Segment::Static(part.to_string())
        };

        if let Segment::Param(name) | Segment::Wildcard(name) = &segment {
            if !names.insert(name.clone()) {
                return Err(invalid(&format!("duplicate parameter name '{}'", name)));
            }
        }
        segments.push(segment);
    }

    Ok(segments)
}

/// Whether `segments` matches the already split request path.
pub(crate) fn matches(segments: &[Segment], path: &[&str]) -> bool {
    for (index, segment) in segments.iter().enumerate() {
        match segment {
            Segment::Wildcard(_) => return true,
            Segment::Static(expected) => {
                if path.get(index) != Some(&expected.as_str()) {
                    return false;
                }
            }
            Segment::Param(_) => {
                if path.get(index).is_none() {
                    return false;
                }
            }
        }
    }
    segments.len() == path.len()
}

/// Orders two patterns that both match the same path, most specific first.
///
/// Segments are compared left to right; the first differing class decides. A
/// pattern that ends exactly where the other has a wildcard is the more specific.
pub(crate) fn compare_specificity(a: &[Segment], b: &[Segment]) -> Ordering {
    let len = a.len().max(b.len());
    for index in 0..len {
        let rank_a = a.get(index).map(Segment::rank).unwrap_or(4);
        let rank_b = b.get(index).map(Segment::rank).unwrap_or(4);
        match rank_b.cmp(&rank_a) {
            Ordering::Equal => {
                if rank_a == 1 {
                    break;
                }
            }
            other => return other,
        }
    }
    Ordering::Equal
}

/// Binds parameter values positionally.
pub(crate) fn bind(segments: &[Segment], path: &[&str], params: &mut Vec<(String, String)>) {
    for (index, segment) in segments.iter().enumerate() {
        match segment {
            Segment::Static(_) => {}
            Segment::Param(name) => {
                params.push((name.clone(), decode(path[index])));
            }
            Segment::Wildcard(name) => {
                let rest = path.get(index..).unwrap_or_default().join("/");
                params.push((name.clone(), decode(&rest)));
                return;
            }
        }
    }
}

fn decode(raw: &str) -> String {
    match urlencoding::decode(raw) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => raw.to_string(),
    }
}
