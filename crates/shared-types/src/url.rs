//! # URLs
//!
//! The `https://host:port/path?query` addresses used by subscriptions and
//! requests. Only `http` and `https` are recognised. The authority is
//! validated by [`http::uri::Authority`]; the path is kept verbatim because
//! it doubles as a routing pattern with `{placeholders}`.

use http::uri::Authority;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::fmt;
use thiserror::Error;

/// Everything but RFC 3986 unreserved characters is escaped.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.').remove(b'~');

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UrlError {
    #[error("missing scheme in {0:?}")]
    MissingScheme(String),

    #[error("unsupported scheme {0:?}")]
    UnsupportedScheme(String),

    #[error("missing host in {0:?}")]
    MissingHost(String),

    #[error("invalid port {0:?}")]
    InvalidPort(String),

    #[error("invalid authority {0:?}")]
    InvalidAuthority(String),

    #[error("invalid percent encoding in {0:?}")]
    InvalidEscape(String),
}

/// A parsed `http(s)` URL with the default port filled in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedUrl {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub path: String,
    pub query: String,
}

impl ParsedUrl {
    pub fn parse(raw: &str) -> Result<Self, UrlError> {
        let (scheme, rest) = raw
            .split_once("://")
            .ok_or_else(|| UrlError::MissingScheme(raw.to_string()))?;
        let scheme = scheme.to_ascii_lowercase();
        let default_port = match scheme.as_str() {
            "https" => 443,
            "http" => 80,
            _ => return Err(UrlError::UnsupportedScheme(scheme)),
        };

        let rest = rest.split_once('#').map_or(rest, |(r, _)| r);
        let (rest, query) = rest.split_once('?').unwrap_or((rest, ""));
        let (authority, path) = match rest.find('/') {
            Some(i) => (&rest[..i], &rest[i..]),
            None => (rest, ""),
        };

        if authority.is_empty() || authority.starts_with(':') {
            return Err(UrlError::MissingHost(raw.to_string()));
        }
        let explicit_port = authority
            .rsplit_once(':')
            .filter(|(_, port)| !port.ends_with(']'))
            .map(|(_, port)| {
                port.parse::<u16>()
                    .map_err(|_| UrlError::InvalidPort(port.to_string()))
            })
            .transpose()?;
        let parsed: Authority = authority
            .parse()
            .map_err(|_| UrlError::InvalidAuthority(authority.to_string()))?;
        let port = explicit_port.unwrap_or(default_port);

        Ok(Self {
            scheme,
            host: parsed.host().to_ascii_lowercase(),
            port,
            path: path.to_string(),
            query: query.to_string(),
        })
    }

    /// Decoded query arguments in order of appearance.
    pub fn query_args(&self) -> Vec<(String, String)> {
        form_urlencoded::parse(self.query.as_bytes())
            .into_owned()
            .collect()
    }

    /// First value of a query argument.
    pub fn query_arg(&self, name: &str) -> Option<String> {
        form_urlencoded::parse(self.query.as_bytes())
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }

    /// `host:port/path`, the canonical form used to key subscriptions.
    pub fn canonical(&self) -> String {
        format!("{}:{}{}", self.host, self.port, self.path)
    }
}

impl fmt::Display for ParsedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}{}", self.scheme, self.host, self.port, self.path)?;
        if !self.query.is_empty() {
            write!(f, "?{}", self.query)?;
        }
        Ok(())
    }
}

/// Resolve a relative path against a host.
///
/// Accepted forms: a full `http(s)://` URL, `//host:port/path`, `:port/path`,
/// `/path`, `path` and the empty string.
pub fn join_host_and_path(host: &str, path: &str) -> String {
    if path.is_empty() {
        return format!("https://{host}");
    }
    if path.starts_with(':') {
        return format!("https://{host}{path}");
    }
    if path.starts_with("//") {
        return format!("https:{path}");
    }
    if path.starts_with('/') {
        return format!("https://{host}{path}");
    }
    if path.contains("://") {
        return path.to_string();
    }
    format!("https://{host}/{path}")
}

/// Percent-encode everything but unreserved characters.
pub fn percent_encode(s: &str) -> String {
    utf8_percent_encode(s, COMPONENT).to_string()
}

/// Decode `%XX` escapes. The decoded bytes must be UTF-8.
pub fn percent_decode(s: &str) -> Result<String, UrlError> {
    percent_decode_str(s)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|_| UrlError::InvalidEscape(s.to_string()))
}
