/*
 * url.rs
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

//! Request URL value type. A URL carries the domain and path split into the
//! part consumed by enclosing resolvers (`parent_domains`, `parent_paths`)
//! and the remainder (`domain`, `path`). Concatenation restores the wire
//! form; `to_full` is a round-trip for any URL built from wire input.
//!
//! The query is kept as the raw `?…` string and only split into pairs on
//! access. Percent-decoding happens on pair access, never on the raw string.

use crate::util::{url_escape, url_unescape};

/// Query component: absent, raw wire text, or already split into pairs.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    None,
    /// Raw query including the leading `?`.
    Raw(String),
    /// Ordered decoded `(key, value)` pairs.
    Parsed(Vec<(String, String)>),
}

/// Immutable URL. Derivation methods return a new value; the backing strings
/// of the original are never modified.
#[derive(Debug, Clone, PartialEq)]
pub struct Url {
    https: bool,
    /// Domain suffixes consumed by enclosing resolvers, in consumption
    /// order. `domain` followed by these, concatenated, is the full host.
    parent_domains: Vec<String>,
    /// Unconsumed domain remainder. Ends with a dot while a suffix below it
    /// remains; empty when a resolver consumed the whole host.
    domain: String,
    /// Path prefixes consumed by enclosing resolvers, each beginning `/`.
    parent_paths: Vec<String>,
    /// Unconsumed path remainder; begins with `/` when non-empty.
    path: String,
    query: Query,
}

impl Url {
    /// Build from wire input: scheme flag, host (already lowercased, no
    /// port), and the origin-form request target.
    pub fn from_wire(https: bool, host: &str, target: &str) -> Self {
        let (path, query) = match target.find('?') {
            Some(i) => (
                target[..i].to_string(),
                Query::Raw(target[i..].to_string()),
            ),
            None => (target.to_string(), Query::None),
        };
        Self {
            https,
            parent_domains: Vec::new(),
            domain: host.to_string(),
            parent_paths: Vec::new(),
            path,
            query,
        }
    }

    /// Build from parts, for tests and synthetic requests.
    pub fn new(https: bool, domain: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            https,
            parent_domains: Vec::new(),
            domain: domain.into(),
            parent_paths: Vec::new(),
            path: path.into(),
            query: Query::None,
        }
    }

    pub fn https(&self) -> bool {
        self.https
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn parent_domains(&self) -> &[String] {
        &self.parent_domains
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn parent_paths(&self) -> &[String] {
        &self.parent_paths
    }

    /// Full host: remainder plus every consumed suffix.
    pub fn full_domain(&self) -> String {
        let mut out = self.domain.clone();
        for p in &self.parent_domains {
            out.push_str(p);
        }
        out
    }

    /// Full path regardless of resolver nesting: consumed prefixes plus
    /// remainder.
    pub fn full_path(&self) -> String {
        let mut out = String::new();
        for p in &self.parent_paths {
            out.push_str(p);
        }
        out.push_str(&self.path);
        out
    }

    /// Raw query string including `?`, or empty. A parsed query is
    /// re-serialized with percent-escaping.
    pub fn query_string(&self) -> String {
        match &self.query {
            Query::None => String::new(),
            Query::Raw(s) => s.clone(),
            Query::Parsed(pairs) => {
                let mut out = String::new();
                for (i, (k, v)) in pairs.iter().enumerate() {
                    out.push(if i == 0 { '?' } else { '&' });
                    out.push_str(&url_escape(k));
                    out.push('=');
                    out.push_str(&url_escape(v));
                }
                out
            }
        }
    }

    /// Decoded `(key, value)` pairs in wire order. Keys and values are both
    /// percent-unescaped; `+` is not treated as space. Pairs with an empty
    /// key are skipped; a second `=` belongs to the value.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        match &self.query {
            Query::None => Vec::new(),
            Query::Parsed(pairs) => pairs.clone(),
            Query::Raw(raw) => parse_query(raw.strip_prefix('?').unwrap_or(raw)),
        }
    }

    /// Wire-form string: scheme, full host, full path, query.
    pub fn to_full(&self) -> String {
        let scheme = if self.https { "https" } else { "http" };
        format!(
            "{}://{}{}{}",
            scheme,
            self.full_domain(),
            self.full_path(),
            self.query_string()
        )
    }

    /// Path and query only (the origin-form request target).
    pub fn to_target(&self) -> String {
        format!("{}{}", self.full_path(), self.query_string())
    }

    /// New URL with the first `cut` bytes of the path moved into the parent
    /// list. Used when a resolver consumes a matched path prefix.
    pub fn with_path_prefix_consumed(&self, cut: usize) -> Url {
        let mut derived = self.clone();
        let prefix = derived.path[..cut].to_string();
        derived.path = derived.path[cut..].to_string();
        derived.parent_paths.push(prefix);
        derived
    }

    /// New URL with everything from byte `cut` of the domain moved into the
    /// parent list. Used when a resolver consumes a matched domain suffix.
    pub fn with_domain_suffix_consumed(&self, cut: usize) -> Url {
        let mut derived = self.clone();
        let suffix = derived.domain[cut..].to_string();
        derived.domain.truncate(cut);
        derived.parent_domains.insert(0, suffix);
        derived
    }

    /// New URL with a different path remainder.
    pub fn with_path(&self, path: impl Into<String>) -> Url {
        let mut derived = self.clone();
        derived.path = path.into();
        derived
    }

    /// New URL with the given raw query (pass `""` to remove).
    pub fn with_query(&self, query: &str) -> Url {
        let mut derived = self.clone();
        derived.query = if query.is_empty() {
            Query::None
        } else if query.starts_with('?') {
            Query::Raw(query.to_string())
        } else {
            Query::Raw(format!("?{}", query))
        };
        derived
    }
}

/// Split a raw query (without `?`) into decoded pairs.
fn parse_query(raw: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for pair in raw.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = match pair.find('=') {
            Some(i) => (&pair[..i], &pair[i + 1..]),
            None => (pair, ""),
        };
        let key = url_unescape(key);
        if key.is_empty() {
            continue;
        }
        out.push((key, url_unescape(value)));
    }
    out
}
