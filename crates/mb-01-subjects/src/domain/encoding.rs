//! Token-level encoding of host names and path segments.

use std::fmt::Write;

/// Lowercase a host name and reverse its labels.
///
/// `www.example.com` becomes `com.example.www`, so that a tail wildcard on a
/// domain captures every subdomain.
pub fn reverse_host(host: &str) -> String {
    let lower = host.to_ascii_lowercase();
    let mut labels: Vec<&str> = lower.split('.').collect();
    labels.reverse();
    labels.join(".")
}

/// Encode one path segment into a subject token.
///
/// `.` becomes `_`, ASCII alphanumerics are kept and every other character
/// becomes `%` followed by four lowercase hex digits per UTF-16 unit.
pub fn encode_segment(segment: &str, out: &mut String) {
    for c in segment.chars() {
        match c {
            '.' => out.push('_'),
            c if c.is_ascii_alphanumeric() => out.push(c),
            c => {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    let _ = write!(out, "%{unit:04x}");
                }
            }
        }
    }
}

/// Encode a path for use in a subject, without termination rules.
///
/// One leading `/` is stripped and the remaining `/` separators become `.`.
pub fn encode_path(path: &str) -> String {
    let path = path.strip_prefix('/').unwrap_or(path);
    let mut out = String::with_capacity(path.len() + 8);
    for (i, segment) in path.split('/').enumerate() {
        if i > 0 {
            out.push('.');
        }
        encode_segment(segment, &mut out);
    }
    out
}
