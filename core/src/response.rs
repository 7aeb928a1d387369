/*
 * response.rs
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

//! Response object: status code, typed headers, body producer. Created by a
//! handler, consumed by the response writer. Framing headers
//! (Content-Length, Transfer-Encoding, Content-Range, Content-Encoding) are
//! decided by the writer, not stored here.

use chrono::{DateTime, Utc};

use crate::content::Content;

/// Reason phrase for a status code, from a fixed table. Unknown codes get an
/// empty reason.
pub fn reason_phrase(code: u16) -> &'static str {
    match code {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        408 => "Request Timeout",
        409 => "Conflict",
        410 => "Gone",
        411 => "Length Required",
        412 => "Precondition Failed",
        413 => "Payload Too Large",
        414 => "URI Too Long",
        415 => "Unsupported Media Type",
        416 => "Range Not Satisfiable",
        417 => "Expectation Failed",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        505 => "HTTP Version Not Supported",
        _ => "",
    }
}

/// One Set-Cookie header to be emitted.
#[derive(Debug, Clone, Default)]
pub struct SetCookie {
    pub name: String,
    pub value: String,
    pub path: Option<String>,
    pub domain: Option<String>,
    pub expires: Option<DateTime<Utc>>,
    pub http_only: bool,
    pub secure: bool,
}

impl SetCookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            ..Default::default()
        }
    }

    /// Serialize as the header value after `Set-Cookie: `.
    pub fn to_header_value(&self) -> String {
        let mut out = format!("{}={}", self.name, self.value);
        if let Some(p) = &self.path {
            out.push_str("; Path=");
            out.push_str(p);
        }
        if let Some(d) = &self.domain {
            out.push_str("; Domain=");
            out.push_str(d);
        }
        if let Some(e) = self.expires {
            out.push_str("; Expires=");
            out.push_str(&crate::util::format_http_date(e));
        }
        if self.http_only {
            out.push_str("; HttpOnly");
        }
        if self.secure {
            out.push_str("; Secure");
        }
        out
    }
}

/// Typed response headers a handler may set.
#[derive(Debug, Default)]
pub struct ResponseHeaders {
    pub content_type: Option<String>,
    pub location: Option<String>,
    pub set_cookies: Vec<SetCookie>,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub expires: Option<DateTime<Utc>>,
    pub cache_control: Option<String>,
    /// Force `Connection: close` even when keep-alive would apply.
    pub close_connection: bool,
    /// Value for the Upgrade header (used with status 101).
    pub upgrade: Option<String>,
    /// Anything not covered by a typed field, written in order.
    pub additional: Vec<(String, String)>,
}

/// A handler-produced response.
#[derive(Debug)]
pub struct Response {
    pub status: u16,
    pub headers: ResponseHeaders,
    pub content: Content,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: ResponseHeaders::default(),
            content: Content::Empty,
        }
    }

    /// 200 with `text/html; charset=utf-8`.
    pub fn html(body: impl Into<String>) -> Self {
        let mut r = Response::new(200);
        r.headers.content_type = Some("text/html; charset=utf-8".to_string());
        r.content = Content::text(body);
        r
    }

    /// 200 with `text/plain; charset=utf-8`.
    pub fn text(body: impl Into<String>) -> Self {
        let mut r = Response::new(200);
        r.headers.content_type = Some("text/plain; charset=utf-8".to_string());
        r.content = Content::text(body);
        r
    }

    /// 200 with the given content type and bytes.
    pub fn bytes(content_type: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        let mut r = Response::new(200);
        r.headers.content_type = Some(content_type.into());
        r.content = Content::bytes(body);
        r
    }

    /// 302 redirect.
    pub fn redirect(location: impl Into<String>) -> Self {
        let mut r = Response::new(302);
        r.headers.location = Some(location.into());
        r
    }

    /// Minimal HTML error page for the given status. `details` is included
    /// only when the server is configured to output exception information.
    pub fn error_page(status: u16, message: Option<&str>, details: Option<&str>) -> Self {
        let reason = reason_phrase(status);
        let mut body = format!(
            "<!DOCTYPE html>\n<html>\n<head><title>{code} {reason}</title></head>\n\
             <body>\n<h1>{code} {reason}</h1>\n",
            code = status,
            reason = reason,
        );
        if let Some(m) = message {
            body.push_str(&format!("<p>{}</p>\n", html_escape(m)));
        }
        if let Some(d) = details {
            body.push_str(&format!("<pre>{}</pre>\n", html_escape(d)));
        }
        body.push_str("</body>\n</html>\n");
        let mut r = Response::new(status);
        r.headers.content_type = Some("text/html; charset=utf-8".to_string());
        r.headers.close_connection = true;
        r.content = Content::text(body);
        r
    }
}

fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
