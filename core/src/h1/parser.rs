/*
 * parser.rs
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

//! HTTP/1.x request push parser: request line and headers. Feed bytes via
//! `receive`; partial data remains in the buffer for the next call. Header
//! folding (obsolete LWS) is not supported.

use bytes::{Buf, BytesMut};

use crate::error::HttpError;
use crate::request::{HttpVersion, Method};

/// Parsed request line and raw headers, ready for typed interpretation.
#[derive(Debug)]
pub struct RequestHead {
    pub method: Method,
    pub target: String,
    pub version: HttpVersion,
    pub raw_headers: Vec<(String, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    /// Before the request line; ignorable blank lines are skipped here.
    RequestLine,
    Headers,
    Complete,
}

/// Push parser for one request head. `reset` before reusing for the next
/// request on a keep-alive connection.
pub struct RequestParser {
    state: ParseState,
    max_header_bytes: usize,
    consumed: usize,
    method: Option<Method>,
    target: String,
    version: Option<HttpVersion>,
    raw_headers: Vec<(String, String)>,
}

impl RequestParser {
    pub fn new(max_header_bytes: usize) -> Self {
        Self {
            state: ParseState::RequestLine,
            max_header_bytes,
            consumed: 0,
            method: None,
            target: String::new(),
            version: None,
            raw_headers: Vec::new(),
        }
    }

    pub fn reset(&mut self) {
        self.state = ParseState::RequestLine;
        self.consumed = 0;
        self.method = None;
        self.target.clear();
        self.version = None;
        self.raw_headers.clear();
    }

    /// True once any request bytes have been consumed; used by the worker to
    /// distinguish an idle close from a truncated request.
    pub fn started(&self) -> bool {
        self.consumed > 0 || self.state != ParseState::RequestLine
    }

    /// Consume as much as possible from buf. Returns the completed head once
    /// the blank line ending the header block has been consumed; the
    /// remainder (body bytes, pipelined requests) stays in buf.
    pub fn receive(&mut self, buf: &mut BytesMut) -> Result<Option<RequestHead>, HttpError> {
        loop {
            match self.state {
                ParseState::RequestLine => {
                    // Skip blank lines before the request line.
                    while buf.starts_with(b"\r\n") {
                        buf.advance(2);
                    }
                    let Some(line_end) = find_crlf(buf) else {
                        self.check_limit(buf.len())?;
                        return Ok(None);
                    };
                    let line = buf.split_to(line_end + 2);
                    self.consumed += line.len();
                    self.check_limit(0)?;
                    let line = std::str::from_utf8(&line[..line_end])
                        .map_err(|_| HttpError::bad_request("request line is not UTF-8"))?;
                    self.parse_request_line(line)?;
                    self.state = ParseState::Headers;
                }
                ParseState::Headers => {
                    let Some(line_end) = find_crlf(buf) else {
                        self.check_limit(buf.len())?;
                        return Ok(None);
                    };
                    let line = buf.split_to(line_end + 2);
                    self.consumed += line.len();
                    self.check_limit(0)?;
                    if line_end == 0 {
                        self.state = ParseState::Complete;
                        return Ok(Some(RequestHead {
                            method: self.method.take().ok_or_else(|| {
                                HttpError::bad_request("missing method")
                            })?,
                            target: std::mem::take(&mut self.target),
                            version: self.version.take().ok_or_else(|| {
                                HttpError::bad_request("missing version")
                            })?,
                            raw_headers: std::mem::take(&mut self.raw_headers),
                        }));
                    }
                    let line = std::str::from_utf8(&line[..line_end])
                        .map_err(|_| HttpError::bad_request("header line is not UTF-8"))?;
                    self.parse_header_line(line)?;
                }
                ParseState::Complete => return Ok(None),
            }
        }
    }

    fn parse_request_line(&mut self, line: &str) -> Result<(), HttpError> {
        let mut parts = line.split(' ');
        let method = parts.next().unwrap_or("");
        let target = parts.next().unwrap_or("");
        let version = parts.next().unwrap_or("");
        if parts.next().is_some() {
            return Err(HttpError::bad_request("malformed request line"));
        }
        self.method = Some(
            Method::parse(method)
                .ok_or_else(|| HttpError::bad_request(format!("unknown method {:?}", method)))?,
        );
        if target.is_empty() || !target.starts_with('/') {
            return Err(HttpError::bad_request("request target must be origin-form"));
        }
        self.target = target.to_string();
        self.version = Some(
            HttpVersion::parse(version)
                .ok_or_else(|| HttpError::bad_request(format!("bad version {:?}", version)))?,
        );
        Ok(())
    }

    fn parse_header_line(&mut self, line: &str) -> Result<(), HttpError> {
        if line.starts_with(' ') || line.starts_with('\t') {
            return Err(HttpError::bad_request("header folding not supported"));
        }
        let colon = line
            .find(':')
            .ok_or_else(|| HttpError::bad_request("header line without colon"))?;
        let name = line[..colon].trim();
        if name.is_empty() {
            return Err(HttpError::bad_request("empty header name"));
        }
        let value = line[colon + 1..].trim();
        self.raw_headers.push((name.to_string(), value.to_string()));
        Ok(())
    }

    fn check_limit(&self, pending: usize) -> Result<(), HttpError> {
        if self.consumed + pending > self.max_header_bytes {
            return Err(HttpError::bad_request("request head too large"));
        }
        Ok(())
    }
}

/// Offset of the first CRLF, or None.
fn find_crlf(buf: &[u8]) -> Option<usize> {
    let mut i = 0;
    while i + 1 < buf.len() {
        if buf[i] == b'\r' && buf[i + 1] == b'\n' {
            return Some(i);
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(parser: &mut RequestParser, bytes: &[u8]) -> Result<Option<RequestHead>, HttpError> {
        let mut buf = BytesMut::from(bytes);
        parser.receive(&mut buf)
    }

    #[test]
    fn simple_get() {
        let mut p = RequestParser::new(64 * 1024);
        let head = feed(&mut p, b"GET /x?a=b HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .unwrap()
            .unwrap();
        assert_eq!(head.method, Method::Get);
        assert_eq!(head.target, "/x?a=b");
        assert_eq!(head.version, HttpVersion::Http11);
        assert_eq!(
            head.raw_headers,
            vec![("Host".to_string(), "localhost".to_string())]
        );
    }

    #[test]
    fn leading_blank_lines_ignored() {
        let mut p = RequestParser::new(64 * 1024);
        let head = feed(&mut p, b"\r\n\r\nGET / HTTP/1.0\r\n\r\n").unwrap().unwrap();
        assert_eq!(head.version, HttpVersion::Http10);
    }

    #[test]
    fn byte_at_a_time() {
        let wire = b"POST /submit HTTP/1.1\r\nHost: h\r\nContent-Length: 0\r\n\r\n";
        let mut p = RequestParser::new(64 * 1024);
        let mut buf = BytesMut::new();
        let mut result = None;
        for &b in wire.iter() {
            buf.extend_from_slice(&[b]);
            if let Some(head) = p.receive(&mut buf).unwrap() {
                result = Some(head);
            }
        }
        let head = result.expect("head should complete");
        assert_eq!(head.method, Method::Post);
        assert_eq!(head.raw_headers.len(), 2);
    }

    #[test]
    fn body_bytes_left_in_buffer() {
        let mut p = RequestParser::new(64 * 1024);
        let mut buf = BytesMut::from(&b"POST / HTTP/1.1\r\nHost: h\r\n\r\nBODY"[..]);
        let head = p.receive(&mut buf).unwrap().unwrap();
        assert_eq!(head.method, Method::Post);
        assert_eq!(&buf[..], b"BODY");
    }

    #[test]
    fn unknown_method_rejected() {
        let mut p = RequestParser::new(64 * 1024);
        assert!(feed(&mut p, b"BREW /pot HTTP/1.1\r\n\r\n").is_err());
    }

    #[test]
    fn bad_version_rejected() {
        let mut p = RequestParser::new(64 * 1024);
        assert!(feed(&mut p, b"GET / HTTP/2.0\r\n\r\n").is_err());
        let mut p = RequestParser::new(64 * 1024);
        assert!(feed(&mut p, b"GET / http/1.1\r\n\r\n").is_err());
    }

    #[test]
    fn extra_request_line_token_rejected() {
        let mut p = RequestParser::new(64 * 1024);
        assert!(feed(&mut p, b"GET / HTTP/1.1 extra\r\n\r\n").is_err());
    }

    #[test]
    fn folded_header_rejected() {
        let mut p = RequestParser::new(64 * 1024);
        assert!(feed(
            &mut p,
            b"GET / HTTP/1.1\r\nX-A: 1\r\n folded\r\n\r\n"
        )
        .is_err());
    }

    #[test]
    fn header_without_colon_rejected() {
        let mut p = RequestParser::new(64 * 1024);
        assert!(feed(&mut p, b"GET / HTTP/1.1\r\nnocolon\r\n\r\n").is_err());
    }

    #[test]
    fn oversized_head_rejected() {
        let mut p = RequestParser::new(32);
        let err = feed(&mut p, b"GET /aaaaaaaaaaaaaaaaaaaaaaaaaaaaa HTTP/1.1\r\n\r\n");
        assert!(err.is_err());
    }

    #[test]
    fn reset_allows_reuse() {
        let mut p = RequestParser::new(64 * 1024);
        feed(&mut p, b"GET / HTTP/1.1\r\n\r\n").unwrap().unwrap();
        p.reset();
        let head = feed(&mut p, b"GET /second HTTP/1.1\r\n\r\n").unwrap().unwrap();
        assert_eq!(head.target, "/second");
    }
}
