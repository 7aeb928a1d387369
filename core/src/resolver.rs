/*
 * resolver.rs
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

//! URL resolution: a sorted set of hooks, each matching on protocol, port,
//! domain suffix, and path prefix. The most specific applicable hook wins;
//! skippable hooks may decline and yield to the next one. The invoked
//! handler sees a request URL whose matched prefix/suffix has moved into the
//! parent lists, so nested resolvers compose.

use std::cmp::Ordering;
use std::error::Error;
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::error::HttpError;
use crate::request::Request;
use crate::response::Response;
use crate::url::Url;

/// Which schemes a hook answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Protocols {
    pub http: bool,
    pub https: bool,
}

impl Protocols {
    pub fn both() -> Self {
        Self {
            http: true,
            https: true,
        }
    }

    pub fn http_only() -> Self {
        Self {
            http: true,
            https: false,
        }
    }

    pub fn https_only() -> Self {
        Self {
            http: false,
            https: true,
        }
    }

    fn matches(&self, https: bool) -> bool {
        if https {
            self.https
        } else {
            self.http
        }
    }
}

/// Handler invoked for a matched hook. Returning `Ok(None)` from a skippable
/// hook passes the request to the next applicable hook.
pub trait HookHandler: Send + Sync {
    fn handle(&self, request: &mut Request) -> Result<Option<Response>, HttpError>;
}

impl<F> HookHandler for F
where
    F: Fn(&mut Request) -> Result<Option<Response>, HttpError> + Send + Sync,
{
    fn handle(&self, request: &mut Request) -> Result<Option<Response>, HttpError> {
        self(request)
    }
}

/// Immutable matcher plus handler.
pub struct Hook {
    port: Option<u16>,
    domain: Option<String>,
    specific_domain: bool,
    path: Option<String>,
    specific_path: bool,
    protocols: Protocols,
    skippable: bool,
    handler: Arc<dyn HookHandler>,
}

impl Hook {
    pub fn new(handler: impl HookHandler + 'static) -> Self {
        Self {
            port: None,
            domain: None,
            specific_domain: false,
            path: None,
            specific_path: false,
            protocols: Protocols::both(),
            skippable: false,
            handler: Arc::new(handler),
        }
    }

    /// Match this path exactly, or any path below it unless
    /// `specific_path` is set.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Only the exact path matches, not sub-paths.
    pub fn specific_path(mut self) -> Self {
        self.specific_path = true;
        self
    }

    /// Match this domain, or any subdomain unless `specific_domain` is set.
    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Only the exact domain matches, not subdomains.
    pub fn specific_domain(mut self) -> Self {
        self.specific_domain = true;
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn protocols(mut self, protocols: Protocols) -> Self {
        self.protocols = protocols;
        self
    }

    /// Allow the handler to decline by returning no response.
    pub fn skippable(mut self) -> Self {
        self.skippable = true;
        self
    }

    /// All matcher fields equal (the handler is not compared).
    fn matcher_eq(&self, other: &Hook) -> bool {
        self.port == other.port
            && self.domain == other.domain
            && self.specific_domain == other.specific_domain
            && self.path == other.path
            && self.specific_path == other.specific_path
            && self.protocols == other.protocols
            && self.skippable == other.skippable
    }

    fn path_len(&self) -> usize {
        self.path.as_deref().map_or(0, str::len)
    }

    fn domain_len(&self) -> usize {
        self.domain.as_deref().map_or(0, str::len)
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook")
            .field("port", &self.port)
            .field("domain", &self.domain)
            .field("specific_domain", &self.specific_domain)
            .field("path", &self.path)
            .field("specific_path", &self.specific_path)
            .field("skippable", &self.skippable)
            .finish_non_exhaustive()
    }
}

/// More specific matchers sort first. Specificity compares, in order: path
/// presence, path length (longer first), specific path, domain presence,
/// domain length, specific domain, port presence.
fn specificity(a: &Hook, b: &Hook) -> Ordering {
    b.path
        .is_some()
        .cmp(&a.path.is_some())
        .then(b.path_len().cmp(&a.path_len()))
        .then(b.specific_path.cmp(&a.specific_path))
        .then(b.domain.is_some().cmp(&a.domain.is_some()))
        .then(b.domain_len().cmp(&a.domain_len()))
        .then(b.specific_domain.cmp(&a.specific_domain))
        .then(b.port.is_some().cmp(&a.port.is_some()))
}

/// Registering a non-skippable hook whose matcher already exists.
#[derive(Debug)]
pub struct DuplicateHook;

impl fmt::Display for DuplicateHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a hook with an identical matcher is already registered")
    }
}

impl Error for DuplicateHook {}

/// Sorted hook list. Insertion is a binary search; since equal specificity
/// does not imply equal matchers, the equal run around the probe is scanned
/// linearly for exact-identity duplicates.
#[derive(Default)]
pub struct HookSet {
    hooks: Vec<Arc<Hook>>,
}

impl HookSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn insert(&mut self, hook: Hook) -> Result<(), DuplicateHook> {
        let idx = match self
            .hooks
            .binary_search_by(|probe| specificity(probe, &hook))
        {
            Ok(idx) => {
                if !hook.skippable {
                    for peer in self.equal_run(idx, &hook) {
                        if !peer.skippable && peer.matcher_eq(&hook) {
                            return Err(DuplicateHook);
                        }
                    }
                }
                idx
            }
            Err(idx) => idx,
        };
        self.hooks.insert(idx, Arc::new(hook));
        Ok(())
    }

    /// Remove the hook with this exact matcher. Returns whether one existed.
    pub fn remove(&mut self, hook: &Hook) -> bool {
        if let Ok(idx) = self
            .hooks
            .binary_search_by(|probe| specificity(probe, hook))
        {
            let (lo, hi) = self.equal_bounds(idx, hook);
            for i in lo..hi {
                if self.hooks[i].matcher_eq(hook) {
                    self.hooks.remove(i);
                    return true;
                }
            }
        }
        false
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Hook>> {
        self.hooks.iter()
    }

    /// Hooks in the specificity-equal run around idx.
    fn equal_run<'a>(&'a self, idx: usize, hook: &'a Hook) -> impl Iterator<Item = &'a Arc<Hook>> {
        let (lo, hi) = self.equal_bounds(idx, hook);
        self.hooks[lo..hi].iter()
    }

    fn equal_bounds(&self, idx: usize, hook: &Hook) -> (usize, usize) {
        let mut lo = idx;
        while lo > 0 && specificity(&self.hooks[lo - 1], hook) == Ordering::Equal {
            lo -= 1;
        }
        let mut hi = idx;
        while hi < self.hooks.len() && specificity(&self.hooks[hi], hook) == Ordering::Equal {
            hi += 1;
        }
        (lo, hi)
    }
}

/// Dispatches requests to the first applicable hook. The list is guarded by
/// a reader-writer lock; dispatch snapshots it under the read lock.
#[derive(Default)]
pub struct UrlResolver {
    hooks: RwLock<HookSet>,
}

impl UrlResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, hook: Hook) -> Result<(), DuplicateHook> {
        self.hooks.write().unwrap().insert(hook)
    }

    pub fn remove(&self, hook: &Hook) -> bool {
        self.hooks.write().unwrap().remove(hook)
    }

    pub fn hook_count(&self) -> usize {
        self.hooks.read().unwrap().len()
    }

    /// Enumerate hooks under the read lock.
    pub fn with_hooks<R>(&self, f: impl FnOnce(&HookSet) -> R) -> R {
        f(&self.hooks.read().unwrap())
    }

    /// Route the request to exactly one hook. A skippable hook returning no
    /// response yields to the next applicable hook; a non-skippable one
    /// doing so is a bug in the handler. No applicable hook at all is a 404.
    pub fn resolve(&self, request: &mut Request) -> Result<Response, HttpError> {
        let https = request.url().https();
        let port = request
            .headers()
            .host_port
            .unwrap_or(if https { 443 } else { 80 });

        let snapshot: Vec<Arc<Hook>> = {
            let set = self.hooks.read().unwrap();
            set.iter().cloned().collect()
        };

        for hook in snapshot {
            if !hook.protocols.matches(https) {
                continue;
            }
            if let Some(p) = hook.port {
                if p != port {
                    continue;
                }
            }
            let Some(domain_cut) = match_domain(&hook, request.url()) else {
                continue;
            };
            let Some(path_cut) = match_path(&hook, request.url()) else {
                continue;
            };

            let mut derived = request.url().clone();
            if hook.domain.is_some() {
                derived = derived.with_domain_suffix_consumed(domain_cut);
            }
            if hook.path.is_some() {
                derived = derived.with_path_prefix_consumed(path_cut);
            }
            let original = request.replace_url(derived);

            match hook.handler.handle(request) {
                Ok(Some(response)) => return Ok(response),
                Ok(None) if hook.skippable => {
                    request.replace_url(original);
                }
                Ok(None) => {
                    return Err(HttpError::status(
                        500,
                        "non-skippable hook produced no response",
                    ));
                }
                Err(e) => return Err(e),
            }
        }
        Err(HttpError::NotFound)
    }
}

/// Byte offset into the URL's domain where the matched suffix begins, or
/// None when the hook does not match. A hook without a domain matches any
/// host without consuming anything.
fn match_domain(hook: &Hook, url: &Url) -> Option<usize> {
    let Some(hook_domain) = hook.domain.as_deref() else {
        return Some(url.domain().len());
    };
    let host = url.domain().trim_end_matches('.');
    if host.eq_ignore_ascii_case(hook_domain) {
        return Some(0);
    }
    if hook.specific_domain {
        return None;
    }
    let suffix_len = hook_domain.len() + 1;
    if host.len() > suffix_len
        && host.is_char_boundary(host.len() - suffix_len)
        && host[host.len() - suffix_len..].eq_ignore_ascii_case(&format!(".{}", hook_domain))
    {
        return Some(host.len() - hook_domain.len());
    }
    None
}

/// Byte length of the matched path prefix, or None. A hook without a path
/// matches any path without consuming anything.
fn match_path(hook: &Hook, url: &Url) -> Option<usize> {
    let Some(hook_path) = hook.path.as_deref() else {
        return Some(0);
    };
    let path = url.path();
    if path == hook_path {
        return Some(hook_path.len());
    }
    if hook.specific_path {
        return None;
    }
    if path.starts_with(hook_path) && path[hook_path.len()..].starts_with('/') {
        return Some(hook_path.len());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::RequestHeaders;
    use crate::request::{HttpVersion, Method};

    fn ok_handler(tag: &'static str) -> impl HookHandler {
        move |_req: &mut Request| Ok(Some(Response::text(tag)))
    }

    fn skip_handler() -> impl HookHandler {
        |_req: &mut Request| Ok(None)
    }

    fn request(host: &str, target: &str) -> Request {
        let headers = RequestHeaders::from_raw(vec![("Host".to_string(), host.to_string())]);
        let url = Url::from_wire(false, headers.host.as_deref().unwrap_or(""), target);
        Request::new(
            Method::Get,
            HttpVersion::Http11,
            url,
            headers,
            "127.0.0.1:9999".parse().unwrap(),
        )
    }

    fn body_text(response: &Response) -> String {
        match &response.content {
            crate::content::Content::Buffered(b) => String::from_utf8_lossy(b).into_owned(),
            other => panic!("unexpected content {:?}", other),
        }
    }

    #[test]
    fn sort_order_prefers_specific() {
        let mut set = HookSet::new();
        set.insert(Hook::new(ok_handler("any"))).unwrap();
        set.insert(Hook::new(ok_handler("path")).path("/a")).unwrap();
        set.insert(Hook::new(ok_handler("long")).path("/a/b")).unwrap();
        set.insert(Hook::new(ok_handler("domain")).domain("example.com"))
            .unwrap();
        let paths: Vec<Option<&str>> = set.iter().map(|h| h.path.as_deref()).collect();
        assert_eq!(paths, [Some("/a/b"), Some("/a"), None, None]);
        // Among path-less hooks the domain one sorts first.
        let domains: Vec<Option<&str>> = set.iter().skip(2).map(|h| h.domain.as_deref()).collect();
        assert_eq!(domains, [Some("example.com"), None]);
    }

    #[test]
    fn duplicate_non_skippable_rejected() {
        let mut set = HookSet::new();
        set.insert(Hook::new(ok_handler("a")).path("/x")).unwrap();
        assert!(set.insert(Hook::new(ok_handler("b")).path("/x")).is_err());
        // Same specificity, different matcher: fine.
        set.insert(Hook::new(ok_handler("c")).path("/y")).unwrap();
        // Skippable twins are allowed.
        set.insert(Hook::new(skip_handler()).path("/x").skippable())
            .unwrap();
        set.insert(Hook::new(skip_handler()).path("/x").skippable())
            .unwrap();
        assert_eq!(set.len(), 4);
    }

    #[test]
    fn remove_by_matcher() {
        let mut set = HookSet::new();
        set.insert(Hook::new(ok_handler("a")).path("/x")).unwrap();
        assert!(set.remove(&Hook::new(ok_handler("other")).path("/x")));
        assert!(!set.remove(&Hook::new(ok_handler("other")).path("/x")));
        assert!(set.is_empty());
    }

    #[test]
    fn resolve_picks_most_specific() {
        let r = UrlResolver::new();
        r.add(Hook::new(ok_handler("root")).path("/")).unwrap();
        r.add(Hook::new(ok_handler("static")).path("/static")).unwrap();
        let mut req = request("localhost", "/static/app.css");
        let resp = r.resolve(&mut req).unwrap();
        assert_eq!(body_text(&resp), "static");
    }

    #[test]
    fn resolve_derives_parent_path() {
        let r = UrlResolver::new();
        r.add(Hook::new(|req: &mut Request| {
            assert_eq!(req.url().path(), "/app.css");
            assert_eq!(req.url().parent_paths(), &["/static".to_string()]);
            assert_eq!(req.url().full_path(), "/static/app.css");
            Ok(Some(Response::text("ok")))
        })
        .path("/static"))
        .unwrap();
        let mut req = request("localhost", "/static/app.css");
        r.resolve(&mut req).unwrap();
    }

    #[test]
    fn specific_path_rejects_subpath() {
        let r = UrlResolver::new();
        r.add(Hook::new(ok_handler("exact")).path("/static").specific_path())
            .unwrap();
        let mut req = request("localhost", "/static/sub");
        assert!(matches!(r.resolve(&mut req), Err(HttpError::NotFound)));
        let mut req = request("localhost", "/static");
        assert!(r.resolve(&mut req).is_ok());
    }

    #[test]
    fn domain_suffix_matching() {
        let r = UrlResolver::new();
        r.add(Hook::new(ok_handler("d")).domain("example.com")).unwrap();
        let mut req = request("www.example.com", "/");
        assert!(r.resolve(&mut req).is_ok());
        let mut req = request("example.com", "/");
        assert!(r.resolve(&mut req).is_ok());
        let mut req = request("badexample.com", "/");
        assert!(matches!(r.resolve(&mut req), Err(HttpError::NotFound)));
    }

    #[test]
    fn specific_domain_rejects_subdomain() {
        let r = UrlResolver::new();
        r.add(
            Hook::new(ok_handler("d"))
                .domain("example.com")
                .specific_domain(),
        )
        .unwrap();
        let mut req = request("www.example.com", "/");
        assert!(matches!(r.resolve(&mut req), Err(HttpError::NotFound)));
    }

    #[test]
    fn skippable_falls_through_and_url_is_restored() {
        let r = UrlResolver::new();
        r.add(Hook::new(skip_handler()).path("/a/b").skippable()).unwrap();
        r.add(Hook::new(|req: &mut Request| {
            // The earlier skippable hook must not leave its consumption.
            assert_eq!(req.url().path(), "/b");
            assert_eq!(req.url().parent_paths(), &["/a".to_string()]);
            Ok(Some(Response::text("second")))
        })
        .path("/a"))
        .unwrap();
        let mut req = request("localhost", "/a/b");
        let resp = r.resolve(&mut req).unwrap();
        assert_eq!(body_text(&resp), "second");
    }

    #[test]
    fn non_skippable_decline_is_internal_error() {
        let r = UrlResolver::new();
        r.add(Hook::new(skip_handler()).path("/x")).unwrap();
        let mut req = request("localhost", "/x");
        match r.resolve(&mut req) {
            Err(HttpError::Status { code: 500, .. }) => {}
            other => panic!("expected internal error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn port_and_protocol_filters() {
        let r = UrlResolver::new();
        r.add(Hook::new(ok_handler("p")).port(8080)).unwrap();
        let mut req = request("localhost:8080", "/");
        assert!(r.resolve(&mut req).is_ok());
        let mut req = request("localhost:9090", "/");
        assert!(matches!(r.resolve(&mut req), Err(HttpError::NotFound)));

        let r2 = UrlResolver::new();
        r2.add(Hook::new(ok_handler("s")).protocols(Protocols::https_only()))
            .unwrap();
        let mut req = request("localhost", "/");
        assert!(matches!(r2.resolve(&mut req), Err(HttpError::NotFound)));
    }

    #[test]
    fn no_hooks_is_not_found() {
        let r = UrlResolver::new();
        let mut req = request("localhost", "/");
        assert!(matches!(r.resolve(&mut req), Err(HttpError::NotFound)));
    }
}
