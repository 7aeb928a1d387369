/*
 * request.rs
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

//! The request object handed to handlers: method, version, URL, headers,
//! POST fields and file uploads, client/source addresses, and per-request
//! cleanup callbacks. Constructed by the parser; handlers receive it by
//! mutable reference and must not keep it beyond the call.

use std::fmt;
use std::io::{self, Read};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use crate::headers::RequestHeaders;
use crate::url::Url;

/// HTTP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Head,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Head => "HEAD",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }

    pub fn parse(s: &str) -> Option<Method> {
        match s {
            "GET" => Some(Method::Get),
            "POST" => Some(Method::Post),
            "HEAD" => Some(Method::Head),
            "PUT" => Some(Method::Put),
            "PATCH" => Some(Method::Patch),
            "DELETE" => Some(Method::Delete),
            _ => None,
        }
    }

    /// Methods that carry a request body.
    pub fn has_body(&self) -> bool {
        matches!(self, Method::Post | Method::Put | Method::Patch)
    }
}

/// Protocol version of the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersion {
    Http10,
    Http11,
}

impl HttpVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpVersion::Http10 => "HTTP/1.0",
            HttpVersion::Http11 => "HTTP/1.1",
        }
    }

    pub fn parse(s: &str) -> Option<HttpVersion> {
        match s {
            "HTTP/1.0" => Some(HttpVersion::Http10),
            "HTTP/1.1" => Some(HttpVersion::Http11),
            _ => None,
        }
    }
}

/// Ordered multimap of field name to values. Insertion order of first
/// appearance is preserved; repeated names append to the existing entry.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FieldMap {
    entries: Vec<(String, Vec<String>)>,
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, values)) => values.push(value),
            None => self.entries.push((name, vec![value])),
        }
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
    }

    /// First value for a name.
    pub fn value(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| v.first()).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(n, v)| (n.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Where an upload's bytes currently live. Mutated only by the body parser.
pub enum UploadStorage {
    Memory(Vec<u8>),
    Disk { path: PathBuf, len: u64 },
}

impl fmt::Debug for UploadStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadStorage::Memory(b) => write!(f, "Memory({} bytes)", b.len()),
            UploadStorage::Disk { path, len } => {
                write!(f, "Disk({:?}, {} bytes)", path, len)
            }
        }
    }
}

/// One uploaded file from a multipart/form-data body.
#[derive(Debug)]
pub struct FileUpload {
    pub content_type: Option<String>,
    pub filename: String,
    pub storage: UploadStorage,
}

impl FileUpload {
    pub fn len(&self) -> u64 {
        match &self.storage {
            UploadStorage::Memory(b) => b.len() as u64,
            UploadStorage::Disk { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read the full upload contents, from memory or from the temp file.
    pub fn read_all(&self) -> io::Result<Vec<u8>> {
        match &self.storage {
            UploadStorage::Memory(b) => Ok(b.clone()),
            UploadStorage::Disk { path, .. } => {
                let mut out = Vec::new();
                std::fs::File::open(path)?.read_to_end(&mut out)?;
                Ok(out)
            }
        }
    }

    /// Temp file path, when spilled to disk.
    pub fn disk_path(&self) -> Option<&PathBuf> {
        match &self.storage {
            UploadStorage::Disk { path, .. } => Some(path),
            UploadStorage::Memory(_) => None,
        }
    }
}

/// Deferred per-request cleanup action. Failures are discarded by the
/// connection worker.
pub type CleanupFn = Box<dyn FnOnce() -> io::Result<()> + Send>;

/// A fully parsed request.
pub struct Request {
    method: Method,
    version: HttpVersion,
    url: Url,
    headers: RequestHeaders,
    source_ip: SocketAddr,
    post_fields: FieldMap,
    uploads: Vec<(String, FileUpload)>,
    cleanup: Vec<CleanupFn>,
    /// Decoded query pairs, filled on first `get_fields` access.
    get_cache: Option<FieldMap>,
}

impl Request {
    pub fn new(
        method: Method,
        version: HttpVersion,
        url: Url,
        headers: RequestHeaders,
        source_ip: SocketAddr,
    ) -> Self {
        Self {
            method,
            version,
            url,
            headers,
            source_ip,
            post_fields: FieldMap::new(),
            uploads: Vec::new(),
            cleanup: Vec::new(),
            get_cache: None,
        }
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn version(&self) -> HttpVersion {
        self.version
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &RequestHeaders {
        &self.headers
    }

    /// Peer address of the TCP connection.
    pub fn source_ip(&self) -> SocketAddr {
        self.source_ip
    }

    /// Client address: leftmost X-Forwarded-For entry when present,
    /// otherwise the peer address.
    pub fn client_ip(&self) -> String {
        match self.headers.x_forwarded_for.first() {
            Some(first) => first.clone(),
            None => self.source_ip.ip().to_string(),
        }
    }

    /// Same as `client_ip` but parsed; falls back to the peer when the
    /// forwarded entry is not a literal address.
    pub fn client_addr(&self) -> IpAddr {
        self.headers
            .x_forwarded_for
            .first()
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(|| self.source_ip.ip())
    }

    /// Decoded query-string fields. Parsed from the raw URL on first access.
    pub fn get_fields(&mut self) -> &FieldMap {
        if self.get_cache.is_none() {
            let mut map = FieldMap::new();
            for (k, v) in self.url.query_pairs() {
                map.add(k, v);
            }
            self.get_cache = Some(map);
        }
        self.get_cache.as_ref().unwrap()
    }

    /// Decoded POST body fields (url-encoded or multipart text fields).
    pub fn post_fields(&self) -> &FieldMap {
        &self.post_fields
    }

    /// File uploads by field name.
    pub fn file_uploads(&self) -> impl Iterator<Item = (&str, &FileUpload)> {
        self.uploads.iter().map(|(n, u)| (n.as_str(), u))
    }

    pub fn file_upload(&self, name: &str) -> Option<&FileUpload> {
        self.uploads
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, u)| u)
    }

    /// Register a deferred action to run after the response is written.
    pub fn register_cleanup(&mut self, f: CleanupFn) {
        self.cleanup.push(f);
    }

    /// Filled by the body parser once the body has been consumed.
    pub(crate) fn set_body(&mut self, fields: FieldMap, uploads: Vec<(String, FileUpload)>) {
        self.post_fields = fields;
        self.uploads = uploads;
    }

    /// Swap the URL for hook dispatch, returning the previous one.
    pub(crate) fn replace_url(&mut self, url: Url) -> Url {
        std::mem::replace(&mut self.url, url)
    }

    /// Run all cleanup callbacks in order; individual failures are ignored.
    pub(crate) fn run_cleanup(&mut self) {
        for f in self.cleanup.drain(..) {
            if let Err(e) = f() {
                tracing::debug!("request cleanup failed: {}", e);
            }
        }
    }
}

impl Drop for Request {
    fn drop(&mut self) {
        self.run_cleanup();
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("version", &self.version)
            .field("url", &self.url.to_full())
            .field("source_ip", &self.source_ip)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn request(target: &str, raw_headers: &[(&str, &str)]) -> Request {
        let headers = RequestHeaders::from_raw(
            raw_headers
                .iter()
                .map(|(n, v)| (n.to_string(), v.to_string()))
                .collect(),
        );
        Request::new(
            Method::Get,
            HttpVersion::Http11,
            Url::from_wire(false, "localhost", target),
            headers,
            "127.0.0.1:1234".parse().unwrap(),
        )
    }

    #[test]
    fn field_map_orders_and_groups() {
        let mut m = FieldMap::new();
        m.add("a[]", "1");
        m.add("b", "x");
        m.add("a[]", "2");
        assert_eq!(m.get("a[]").unwrap(), &["1", "2"]);
        let names: Vec<&str> = m.iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["a[]", "b"]);
    }

    #[test]
    fn get_fields_decode_lazily() {
        let mut r = request("/s?x=y&z=%20&zig=%3D%3d", &[]);
        let fields = r.get_fields();
        assert_eq!(fields.get("x").unwrap(), &["y"]);
        assert_eq!(fields.get("z").unwrap(), &[" "]);
        assert_eq!(fields.get("zig").unwrap(), &["=="]);
    }

    #[test]
    fn client_ip_prefers_leftmost_forwarded() {
        let r = request("/", &[("X-Forwarded-For", "10.1.2.3, 10.9.9.9")]);
        assert_eq!(r.client_ip(), "10.1.2.3");
        assert_eq!(r.client_addr(), "10.1.2.3".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn client_ip_falls_back_to_peer() {
        let r = request("/", &[]);
        assert_eq!(r.client_ip(), "127.0.0.1");
    }

    #[test]
    fn cleanup_runs_once_in_order_and_swallows_errors() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut r = request("/", &[]);
        let c1 = counter.clone();
        r.register_cleanup(Box::new(move || {
            c1.fetch_add(1, Ordering::SeqCst);
            Err(io::Error::new(io::ErrorKind::Other, "ignored"))
        }));
        let c2 = counter.clone();
        r.register_cleanup(Box::new(move || {
            c2.fetch_add(10, Ordering::SeqCst);
            Ok(())
        }));
        r.run_cleanup();
        assert_eq!(counter.load(Ordering::SeqCst), 11);
        drop(r);
        assert_eq!(counter.load(Ordering::SeqCst), 11);
    }
}
