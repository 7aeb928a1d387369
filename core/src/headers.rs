/*
 * headers.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Portinaio, an embeddable HTTP/1.x server library.
 *
 * Portinaio is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Portinaio is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Portinaio.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Request headers: the authoritative ordered `(name, value)` list plus
//! typed views of the recognized fields. Typed parsing is best-effort: a
//! value that does not parse leaves the typed field at its default and the
//! raw pair stays available. For single-valued headers the first valid
//! occurrence wins.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::util::{parse_http_date, parse_q_values, QValue};

/// Connection header tokens, as a flag set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionFlags {
    pub close: bool,
    pub keep_alive: bool,
    pub upgrade: bool,
}

/// Body content type recognized by the body parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyContentType {
    UrlEncoded,
    MultipartFormData,
}

/// One requested byte range; either bound may be absent but not both.
pub type ByteRange = (Option<u64>, Option<u64>);

/// Parsed request headers.
#[derive(Debug, Default)]
pub struct RequestHeaders {
    raw: Vec<(String, String)>,

    pub accept: Vec<QValue<String>>,
    pub accept_charset: Vec<QValue<String>>,
    pub accept_encoding: Vec<QValue<String>>,
    pub accept_language: Vec<QValue<String>>,
    pub connection: ConnectionFlags,
    pub content_length: Option<u64>,
    pub content_type: Option<BodyContentType>,
    pub content_multipart_boundary: Option<String>,
    pub cookie: HashMap<String, String>,
    pub expect_100_continue: bool,
    /// Lowercased, trailing dots trimmed, port split off.
    pub host: Option<String>,
    pub host_port: Option<u16>,
    pub if_modified_since: Option<DateTime<Utc>>,
    pub if_none_match: Option<String>,
    pub range: Vec<ByteRange>,
    pub transfer_encoding_chunked: bool,
    pub user_agent: Option<String>,
    pub x_forwarded_for: Vec<String>,
}

impl RequestHeaders {
    /// Build typed views from the raw ordered list. The list itself is kept
    /// verbatim, preserving case and order.
    pub fn from_raw(raw: Vec<(String, String)>) -> Self {
        let mut h = RequestHeaders {
            raw,
            ..Default::default()
        };
        let pairs: Vec<(String, String)> = h.raw.clone();
        for (name, value) in &pairs {
            h.apply(name, value);
        }
        h
    }

    /// The authoritative ordered list, case and order preserved.
    pub fn raw(&self) -> &[(String, String)] {
        &self.raw
    }

    /// First raw value with the given name, case-insensitive.
    pub fn get_raw(&self, name: &str) -> Option<&str> {
        self.raw
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn apply(&mut self, name: &str, value: &str) {
        if name.eq_ignore_ascii_case("Accept") {
            if self.accept.is_empty() {
                self.accept = parse_q_values(value, |s| Some(s.to_string()));
            }
        } else if name.eq_ignore_ascii_case("Accept-Charset") {
            if self.accept_charset.is_empty() {
                self.accept_charset = parse_q_values(value, |s| Some(s.to_string()));
            }
        } else if name.eq_ignore_ascii_case("Accept-Encoding") {
            if self.accept_encoding.is_empty() {
                self.accept_encoding = parse_q_values(value, |s| Some(s.to_string()));
            }
        } else if name.eq_ignore_ascii_case("Accept-Language") {
            if self.accept_language.is_empty() {
                self.accept_language = parse_q_values(value, |s| Some(s.to_string()));
            }
        } else if name.eq_ignore_ascii_case("Connection") {
            for token in value.split(',') {
                let token = token.trim();
                if token.eq_ignore_ascii_case("close") {
                    self.connection.close = true;
                } else if token.eq_ignore_ascii_case("keep-alive") {
                    self.connection.keep_alive = true;
                } else if token.eq_ignore_ascii_case("upgrade") {
                    self.connection.upgrade = true;
                }
            }
        } else if name.eq_ignore_ascii_case("Content-Length") {
            if self.content_length.is_none() {
                self.content_length = value.trim().parse::<u64>().ok();
            }
        } else if name.eq_ignore_ascii_case("Content-Type") {
            if self.content_type.is_none() {
                self.apply_content_type(value);
            }
        } else if name.eq_ignore_ascii_case("Cookie") {
            parse_cookies(value, &mut self.cookie);
        } else if name.eq_ignore_ascii_case("Expect") {
            if value.trim().eq_ignore_ascii_case("100-continue") {
                self.expect_100_continue = true;
            }
        } else if name.eq_ignore_ascii_case("Host") {
            if self.host.is_none() {
                let (host, port) = split_host_port(value);
                self.host = Some(normalize_host(&host));
                self.host_port = port;
            }
        } else if name.eq_ignore_ascii_case("If-Modified-Since") {
            if self.if_modified_since.is_none() {
                self.if_modified_since = parse_http_date(value);
            }
        } else if name.eq_ignore_ascii_case("If-None-Match") {
            if self.if_none_match.is_none() {
                self.if_none_match = Some(value.trim().to_string());
            }
        } else if name.eq_ignore_ascii_case("Range") {
            if self.range.is_empty() {
                self.range = parse_range(value);
            }
        } else if name.eq_ignore_ascii_case("Transfer-Encoding") {
            if value
                .split(',')
                .any(|t| t.trim().eq_ignore_ascii_case("chunked"))
            {
                self.transfer_encoding_chunked = true;
            }
        } else if name.eq_ignore_ascii_case("User-Agent") {
            if self.user_agent.is_none() {
                self.user_agent = Some(value.to_string());
            }
        } else if name.eq_ignore_ascii_case("X-Forwarded-For") {
            for addr in value.split(',') {
                let addr = addr.trim();
                if !addr.is_empty() {
                    self.x_forwarded_for.push(addr.to_string());
                }
            }
        }
    }

    fn apply_content_type(&mut self, value: &str) {
        let mut parts = value.split(';');
        let media = parts.next().unwrap_or("").trim();
        if media.eq_ignore_ascii_case("application/x-www-form-urlencoded") {
            self.content_type = Some(BodyContentType::UrlEncoded);
        } else if media.eq_ignore_ascii_case("multipart/form-data") {
            let mut boundary = None;
            for param in parts {
                let param = param.trim();
                if let Some(eq) = param.find('=') {
                    let (k, v) = param.split_at(eq);
                    if k.trim().eq_ignore_ascii_case("boundary") {
                        boundary = Some(unquote(v[1..].trim()).to_string());
                    }
                }
            }
            // Multipart without a boundary is unusable; leave untyped.
            if let Some(b) = boundary {
                self.content_type = Some(BodyContentType::MultipartFormData);
                self.content_multipart_boundary = Some(b);
            }
        }
    }

    /// True when the client listed gzip with a nonzero weight.
    pub fn accepts_gzip(&self) -> bool {
        self.accept_encoding
            .iter()
            .any(|q| q.value.eq_ignore_ascii_case("gzip") && q.q > 0.0)
    }
}

/// Lowercase and trim trailing dots.
fn normalize_host(host: &str) -> String {
    host.trim().trim_end_matches('.').to_ascii_lowercase()
}

/// Split an optional `:port` suffix off a Host value.
fn split_host_port(value: &str) -> (String, Option<u16>) {
    let value = value.trim();
    if let Some(colon) = value.rfind(':') {
        // IPv6 literals contain colons; only split when the suffix is a
        // plain number and the value is not a bracketed-literal remainder.
        let (host, port) = value.split_at(colon);
        if !host.contains(':') || host.starts_with('[') {
            if let Ok(p) = port[1..].parse::<u16>() {
                return (host.to_string(), Some(p));
            }
        }
    }
    (value.to_string(), None)
}

/// Parse a Cookie header into the map. Invalid segments are skipped up to
/// the next `;`. First occurrence of a name wins.
fn parse_cookies(value: &str, out: &mut HashMap<String, String>) {
    for segment in value.split(';') {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        let Some(eq) = segment.find('=') else {
            continue;
        };
        let name = segment[..eq].trim();
        if name.is_empty() {
            continue;
        }
        let val = unquote(segment[eq + 1..].trim());
        out.entry(name.to_string()).or_insert_with(|| val.to_string());
    }
}

fn unquote(s: &str) -> &str {
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

/// Parse `Range: bytes=a-b,c-,-d`. Anything not prefixed `bytes=` or with a
/// malformed element yields an empty list.
fn parse_range(value: &str) -> Vec<ByteRange> {
    let Some(list) = value.trim().strip_prefix("bytes=") else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for element in list.split(',') {
        let element = element.trim();
        let Some(dash) = element.find('-') else {
            return Vec::new();
        };
        let (from, to) = element.split_at(dash);
        let to = &to[1..];
        let from = if from.is_empty() {
            None
        } else {
            match from.parse::<u64>() {
                Ok(v) => Some(v),
                Err(_) => return Vec::new(),
            }
        };
        let to = if to.is_empty() {
            None
        } else {
            match to.parse::<u64>() {
                Ok(v) => Some(v),
                Err(_) => return Vec::new(),
            }
        };
        if from.is_none() && to.is_none() {
            return Vec::new();
        }
        out.push((from, to));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(pairs: &[(&str, &str)]) -> RequestHeaders {
        RequestHeaders::from_raw(
            pairs
                .iter()
                .map(|(n, v)| (n.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn raw_list_preserves_case_and_order() {
        let h = build(&[("X-One", "1"), ("x-two", "2"), ("X-One", "3")]);
        assert_eq!(h.raw()[0], ("X-One".to_string(), "1".to_string()));
        assert_eq!(h.raw()[2], ("X-One".to_string(), "3".to_string()));
        assert_eq!(h.get_raw("x-one"), Some("1"));
    }

    #[test]
    fn host_normalized_and_port_split() {
        let h = build(&[("Host", "Example.COM.:8080")]);
        assert_eq!(h.host.as_deref(), Some("example.com"));
        assert_eq!(h.host_port, Some(8080));
    }

    #[test]
    fn first_valid_content_length_wins() {
        let h = build(&[("Content-Length", "12"), ("Content-Length", "99")]);
        assert_eq!(h.content_length, Some(12));
        // Both occurrences stay in the raw list.
        assert_eq!(
            h.raw()
                .iter()
                .filter(|(n, _)| n.eq_ignore_ascii_case("content-length"))
                .count(),
            2
        );
    }

    #[test]
    fn bad_content_length_leaves_default() {
        let h = build(&[("Content-Length", "twelve")]);
        assert_eq!(h.content_length, None);
    }

    #[test]
    fn multipart_boundary_extracted() {
        let h = build(&[(
            "Content-Type",
            "multipart/form-data; boundary=\"xyz 123\"",
        )]);
        assert_eq!(h.content_type, Some(BodyContentType::MultipartFormData));
        assert_eq!(h.content_multipart_boundary.as_deref(), Some("xyz 123"));
    }

    #[test]
    fn connection_flags() {
        let h = build(&[("Connection", "keep-alive, Upgrade")]);
        assert!(h.connection.keep_alive);
        assert!(h.connection.upgrade);
        assert!(!h.connection.close);
    }

    #[test]
    fn range_requires_bytes_prefix() {
        assert!(build(&[("Range", "items=0-5")]).range.is_empty());
        let h = build(&[("Range", "bytes=23459-38274")]);
        assert_eq!(h.range, vec![(Some(23459), Some(38274))]);
        let h = build(&[("Range", "bytes=65-65,67-67")]);
        assert_eq!(h.range, vec![(Some(65), Some(65)), (Some(67), Some(67))]);
        let h = build(&[("Range", "bytes=500-,-200")]);
        assert_eq!(h.range, vec![(Some(500), None), (None, Some(200))]);
    }

    #[test]
    fn malformed_range_element_clears_all() {
        assert!(build(&[("Range", "bytes=1-2,zebra")]).range.is_empty());
    }

    #[test]
    fn cookies_tolerate_garbage() {
        let h = build(&[("Cookie", "a=1; not a cookie; b=\"two\"; =x; a=9")]);
        assert_eq!(h.cookie.get("a").map(String::as_str), Some("1"));
        assert_eq!(h.cookie.get("b").map(String::as_str), Some("two"));
        assert_eq!(h.cookie.len(), 2);
    }

    #[test]
    fn forwarded_for_is_ordered() {
        let h = build(&[
            ("X-Forwarded-For", "10.0.0.1, 10.0.0.2"),
            ("X-Forwarded-For", "10.0.0.3"),
        ]);
        assert_eq!(h.x_forwarded_for, ["10.0.0.1", "10.0.0.2", "10.0.0.3"]);
    }

    #[test]
    fn accept_encoding_gzip() {
        assert!(build(&[("Accept-Encoding", "gzip, deflate")]).accepts_gzip());
        assert!(!build(&[("Accept-Encoding", "gzip;q=0")]).accepts_gzip());
        assert!(!build(&[("Accept-Encoding", "deflate")]).accepts_gzip());
    }

    #[test]
    fn expect_continue() {
        assert!(build(&[("Expect", "100-continue")]).expect_100_continue);
        assert!(!build(&[("Expect", "nothing")]).expect_100_continue);
    }
}
