//! # Path Specifications
//!
//! A subscription path may contain placeholders:
//!
//! - `{name}` or `{}` captures exactly one segment.
//! - `{name+}` or `{+}` captures the rest of the path and must come last.
//!
//! Unnamed placeholders are reported as `path1`, `path2`, ... by their
//! position among all placeholders of the path.

use crate::error::SubjectError;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Arg { name: String, greedy: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSpec {
    segments: Vec<Segment>,
    trailing_slash: bool,
}

impl PathSpec {
    /// Parse a subscription path. A single leading `/` is optional.
    pub fn parse(path: &str) -> Result<Self, SubjectError> {
        if path
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || c == '?' || c == '#')
        {
            return Err(SubjectError::InvalidPath(path.to_string()));
        }

        let stripped = path.strip_prefix('/').unwrap_or(path);
        let trailing_slash = path.ends_with('/');
        let body = if trailing_slash {
            stripped.strip_suffix('/').unwrap_or(stripped)
        } else {
            stripped
        };

        let mut segments = Vec::new();
        let mut arg_index = 0;
        if !body.is_empty() {
            for raw in body.split('/') {
                if raw.is_empty() {
                    return Err(SubjectError::InvalidPath(path.to_string()));
                }
                if let Some(pending) = segments.last() {
                    if matches!(pending, Segment::Arg { greedy: true, .. }) {
                        return Err(SubjectError::GreedyNotLast(path.to_string()));
                    }
                }
                if raw.starts_with('{') || raw.ends_with('}') {
                    arg_index += 1;
                    segments.push(parse_placeholder(path, raw, arg_index)?);
                } else if raw.contains('{') || raw.contains('}') {
                    return Err(SubjectError::MalformedPlaceholder {
                        path: path.to_string(),
                        segment: raw.to_string(),
                    });
                } else {
                    segments.push(Segment::Literal(raw.to_string()));
                }
            }
        }
        if trailing_slash && matches!(segments.last(), Some(Segment::Arg { greedy: true, .. })) {
            return Err(SubjectError::GreedyNotLast(path.to_string()));
        }

        Ok(Self {
            segments,
            trailing_slash,
        })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Whether the path ends in `/` and so captures every sub-path.
    pub fn is_prefix(&self) -> bool {
        self.trailing_slash
    }

    /// Whether the path contains any placeholder.
    pub fn has_args(&self) -> bool {
        self.segments.iter().any(|s| matches!(s, Segment::Arg { .. }))
    }

    /// Extract placeholder values from a concrete path that matches this
    /// spec. Segments that do not line up are skipped.
    pub fn extract(&self, concrete: &str) -> BTreeMap<String, String> {
        let mut args = BTreeMap::new();
        if !self.has_args() {
            return args;
        }
        let concrete = concrete.strip_prefix('/').unwrap_or(concrete);
        let parts: Vec<&str> = concrete.split('/').collect();
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Arg {
                    name,
                    greedy: false,
                } => {
                    if let Some(value) = parts.get(i) {
                        args.insert(name.clone(), (*value).to_string());
                    }
                }
                Segment::Arg { name, greedy: true } => {
                    if i < parts.len() {
                        args.insert(name.clone(), parts[i..].join("/"));
                    }
                }
                Segment::Literal(_) => {}
            }
        }
        args
    }
}

fn parse_placeholder(path: &str, raw: &str, index: usize) -> Result<Segment, SubjectError> {
    let malformed = || SubjectError::MalformedPlaceholder {
        path: path.to_string(),
        segment: raw.to_string(),
    };
    let inner = raw
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .ok_or_else(malformed)?;
    let (name, greedy) = match inner.strip_suffix('+') {
        Some(name) => (name, true),
        None => (inner, false),
    };
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(malformed());
    }
    let name = if name.is_empty() {
        format!("path{index}")
    } else {
        name.to_string()
    };
    Ok(Segment::Arg { name, greedy })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_named_and_positional() {
        let spec = PathSpec::parse("/obj/{id}/sub/{+}").unwrap();
        assert!(spec.has_args());
        let args = spec.extract("/obj/123/sub/a/b/c");
        assert_eq!(args.get("id").map(String::as_str), Some("123"));
        assert_eq!(args.get("path2").map(String::as_str), Some("a/b/c"));
    }

    #[test]
    fn test_unnamed_single_segment() {
        let spec = PathSpec::parse("/x/{}/y").unwrap();
        let args = spec.extract("/x/42/y");
        assert_eq!(args.get("path1").map(String::as_str), Some("42"));
    }

    #[test]
    fn test_literal_path_has_no_args() {
        let spec = PathSpec::parse("/dir/").unwrap();
        assert!(!spec.has_args());
        assert!(spec.is_prefix());
        assert!(spec.extract("/dir/anything").is_empty());
    }

    #[test]
    fn test_greedy_must_be_last() {
        assert!(matches!(
            PathSpec::parse("/a/{rest+}/b"),
            Err(SubjectError::GreedyNotLast(_))
        ));
        assert!(matches!(
            PathSpec::parse("/a/{rest+}/"),
            Err(SubjectError::GreedyNotLast(_))
        ));
    }

    #[test]
    fn test_rejects_bad_paths() {
        assert!(PathSpec::parse("/a b").is_err());
        assert!(PathSpec::parse("/a//b").is_err());
        assert!(PathSpec::parse("/a{b}").is_err());
        assert!(PathSpec::parse("/{a-b}").is_err());
        assert!(PathSpec::parse("/q?x=1").is_err());
    }

    #[test]
    fn test_empty_and_root() {
        assert!(PathSpec::parse("").unwrap().segments().is_empty());
        let root = PathSpec::parse("/").unwrap();
        assert!(root.is_prefix());
        assert!(root.segments().is_empty());
    }
}
