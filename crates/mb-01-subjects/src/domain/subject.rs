//! # Subjects
//!
//! Three subject forms share one layout:
//!
//! ```text
//! request       <plane>.<port>.<reversedHost>.|.<encodedPath>[_]
//! subscription  <plane>.<port>.<reversedHost>.|.<encodedPath with * and >>
//! response      <plane>.r.<reversedHost>.<id>
//! ```
//!
//! The `|` token separates the host from the path so that a tail wildcard
//! on a host never bleeds into path matching.

use super::encoding::{encode_segment, reverse_host};
use super::path_spec::{PathSpec, Segment};
use crate::error::SubjectError;

/// Subject a request for `host:port/path` is published on.
///
/// Empty segments encode as `_`, so a path that is empty or ends in `/` is
/// terminated with `_` and `a//b` becomes `a._.b`.
pub fn request_subject(plane: &str, host: &str, port: u16, path: &str) -> String {
    let mut out = prefix(plane, host, port);
    let stripped = path.strip_prefix('/').unwrap_or(path);
    for (i, segment) in stripped.split('/').enumerate() {
        if i > 0 {
            out.push('.');
        }
        if segment.is_empty() {
            out.push('_');
        } else {
            encode_segment(segment, &mut out);
        }
    }
    out
}

/// Subject a subscription for `host:port/path` listens on.
///
/// A path ending in `/` is terminated with `>`; `{name}` and `{}` segments
/// become `*` and a trailing `{name+}` or `{+}` becomes `>`.
pub fn subscription_subject(
    plane: &str,
    host: &str,
    port: u16,
    path: &str,
) -> Result<String, SubjectError> {
    let spec = PathSpec::parse(path)?;
    let mut out = prefix(plane, host, port);
    for (i, segment) in spec.segments().iter().enumerate() {
        if i > 0 {
            out.push('.');
        }
        match segment {
            Segment::Literal(literal) => encode_segment(literal, &mut out),
            Segment::Arg { greedy: true, .. } => out.push('>'),
            Segment::Arg { greedy: false, .. } => out.push('*'),
        }
    }
    if spec.is_prefix() {
        if !spec.segments().is_empty() {
            out.push('.');
        }
        out.push('>');
    } else if spec.segments().is_empty() {
        out.push('_');
    }
    Ok(out)
}

/// Subject on which the connector `id` of `host` receives responses.
pub fn response_subject(plane: &str, host: &str, id: &str) -> String {
    format!(
        "{plane}.r.{}.{}",
        reverse_host(host),
        id.to_ascii_lowercase()
    )
}

/// Host name addressing one specific instance of a host.
pub fn instance_host(id: &str, host: &str) -> String {
    format!("{id}.{host}")
}

fn prefix(plane: &str, host: &str, port: u16) -> String {
    format!("{plane}.{port}.{}.|.", reverse_host(host))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLANE: &str = "microbus";

    #[test]
    fn test_request_subject_forms() {
        assert_eq!(
            request_subject(PLANE, "www.example.com", 443, "/path/file.html"),
            "microbus.443.com.example.www.|.path.file_html"
        );
        assert_eq!(
            request_subject(PLANE, "www.example.com", 443, ""),
            "microbus.443.com.example.www.|._"
        );
        assert_eq!(
            request_subject(PLANE, "www.example.com", 443, "/dir/"),
            "microbus.443.com.example.www.|.dir._"
        );
    }

    #[test]
    fn test_empty_middle_segments_are_valid_tokens() {
        let subject = request_subject(PLANE, "x.example", 443, "/a//b");
        assert_eq!(subject, "microbus.443.example.x.|.a._.b");
        assert!(!subject.contains(".."));
        assert_eq!(
            request_subject(PLANE, "x.example", 443, "//"),
            "microbus.443.example.x.|._._"
        );
        assert!(subscription_subject(PLANE, "x.example", 443, "/a//b").is_err());
    }

    #[test]
    fn test_leading_slash_is_optional() {
        assert_eq!(
            request_subject(PLANE, "h", 80, "/dir/"),
            request_subject(PLANE, "h", 80, "dir/")
        );
        assert_eq!(
            subscription_subject(PLANE, "h", 80, "/dir/").unwrap(),
            subscription_subject(PLANE, "h", 80, "dir/").unwrap()
        );
    }

    #[test]
    fn test_subscription_subject_wildcards() {
        assert_eq!(
            subscription_subject(PLANE, "www.example.com", 443, "/dir/").unwrap(),
            "microbus.443.com.example.www.|.dir.>"
        );
        assert_eq!(
            subscription_subject(PLANE, "h", 443, "/obj/{id}/sub/{+}").unwrap(),
            "microbus.443.h.|.obj.*.sub.>"
        );
        assert_eq!(
            subscription_subject(PLANE, "h", 443, "/").unwrap(),
            "microbus.443.h.|.>"
        );
        assert_eq!(
            subscription_subject(PLANE, "h", 443, "").unwrap(),
            "microbus.443.h.|._"
        );
    }

    #[test]
    fn test_case_insensitive_host_and_distinct_ports() {
        assert_eq!(
            request_subject(PLANE, "WWW.Example.COM", 443, "/x"),
            request_subject(PLANE, "www.example.com", 443, "/x")
        );
        assert_ne!(
            request_subject(PLANE, "h", 443, "/x"),
            request_subject(PLANE, "h", 444, "/x")
        );
        assert_ne!(
            request_subject(PLANE, "a.b", 443, "/c"),
            request_subject(PLANE, "a", 443, "/b/c")
        );
    }

    #[test]
    fn test_response_subject() {
        assert_eq!(
            response_subject(PLANE, "www.example.com", "ABC123"),
            "microbus.r.com.example.www.abc123"
        );
    }

    #[test]
    fn test_instance_host() {
        assert_eq!(
            request_subject(PLANE, &instance_host("x1", "www.example.com"), 443, "/p"),
            "microbus.443.com.example.www.x1.|.p"
        );
    }
}
