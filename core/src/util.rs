/*
 * util.rs
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

//! Shared helpers: RFC 3986 percent-encoding over UTF-8, q-value parsing,
//! RFC 1123 date handling, random temp files.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Escape everything except RFC 3986 unreserved characters.
const URL_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Percent-encode a string (UTF-8 bytes, unreserved characters untouched).
pub fn url_escape(s: &str) -> String {
    utf8_percent_encode(s, URL_ESCAPE).to_string()
}

/// Percent-decode a string. Invalid UTF-8 after decoding is replaced, not
/// rejected. `+` stays `+`; only `%20` decodes to space.
pub fn url_unescape(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}

/// One parsed item of an Accept*-style header.
#[derive(Debug, Clone, PartialEq)]
pub struct QValue<T> {
    pub q: f32,
    pub value: T,
}

/// Parse a comma-separated header with optional `;q=` weights. Result is
/// sorted by descending q; equal weights keep their insertion order. Items
/// with unparseable weights get q=1.0. An optional converter maps the raw
/// item string; items it rejects are dropped.
pub fn parse_q_values<T>(
    value: &str,
    mut convert: impl FnMut(&str) -> Option<T>,
) -> Vec<QValue<T>> {
    let mut out = Vec::new();
    for item in value.split(',') {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        let mut q = 1.0f32;
        let mut name = item;
        if let Some(semi) = item.find(';') {
            name = item[..semi].trim();
            for param in item[semi + 1..].split(';') {
                let param = param.trim();
                if let Some(rest) = param.strip_prefix("q=").or_else(|| param.strip_prefix("Q=")) {
                    if let Ok(v) = rest.trim().parse::<f32>() {
                        if (0.0..=1.0).contains(&v) {
                            q = v;
                        }
                    }
                }
            }
        }
        if let Some(converted) = convert(name) {
            out.push(QValue {
                q,
                value: converted,
            });
        }
    }
    // Stable sort keeps insertion order for equal weights.
    out.sort_by(|a, b| b.q.partial_cmp(&a.q).unwrap_or(std::cmp::Ordering::Equal));
    out
}

/// Format a timestamp as an RFC 1123 HTTP date (`Sun, 06 Nov 1994 08:49:37 GMT`).
pub fn format_http_date(t: DateTime<Utc>) -> String {
    t.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Parse an HTTP date. Accepts RFC 1123, the obsolete RFC 850 form, and
/// asctime, per the usual reception rules.
pub fn parse_http_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    for fmt in [
        "%a, %d %b %Y %H:%M:%S GMT",
        "%A, %d-%b-%y %H:%M:%S GMT",
        "%a %b %e %H:%M:%S %Y",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    None
}

/// Random lowercase hex string of `bytes * 2` characters.
pub fn random_hex(bytes: usize) -> io::Result<String> {
    let mut buf = vec![0u8; bytes];
    getrandom::getrandom(&mut buf)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
    let mut out = String::with_capacity(bytes * 2);
    for b in buf {
        out.push_str(&format!("{:02x}", b));
    }
    Ok(out)
}

/// Create a fresh `<dir>/<32-hex-random>` file and return its path with an
/// open write handle. On Unix the file is created mode 0o600. The directory
/// itself is never created here.
pub fn random_temp_filepath(dir: &Path) -> io::Result<(PathBuf, File)> {
    loop {
        let name = random_hex(16)?;
        let path = dir.join(name);
        let result = open_new(&path);
        match result {
            Ok(f) => return Ok((path, f)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
}

fn open_new(path: &Path) -> io::Result<File> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}
