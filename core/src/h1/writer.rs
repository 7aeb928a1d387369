/*
 * writer.rs
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

//! Response writer. Decides transfer framing (chunked for dynamic bodies,
//! 206 with Content-Range or multipart/byteranges for satisfiable Range
//! requests, plain Content-Length otherwise), gzip content-encoding, and the
//! Connection header, then serializes status line, headers, and body.
//! Partial responses are never gzipped, HEAD never drives the body.

use std::io::Write;

use chrono::Utc;
use flate2::write::GzEncoder;
use flate2::Compression;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt};

use crate::config::GzipMode;
use crate::content::{Content, SeekableSource};
use crate::h1::chunked;
use crate::headers::{ByteRange, ConnectionFlags};
use crate::request::{HttpVersion, Method, Request};
use crate::response::{reason_phrase, Response};
use crate::util::{format_http_date, random_hex};

/// Everything the writer needs to know about the request side.
#[derive(Debug)]
pub struct WriteContext {
    pub method: Method,
    pub version: HttpVersion,
    pub ranges: Vec<ByteRange>,
    pub accepts_gzip: bool,
    pub connection: ConnectionFlags,
}

impl WriteContext {
    pub fn from_request(request: &Request) -> Self {
        Self {
            method: request.method(),
            version: request.version(),
            ranges: request.headers().range.clone(),
            accepts_gzip: request.headers().accepts_gzip(),
            connection: request.headers().connection,
        }
    }

    /// Context for error responses written before a request could be parsed.
    pub fn bare(version: HttpVersion) -> Self {
        Self {
            method: Method::Get,
            version,
            ranges: Vec::new(),
            accepts_gzip: false,
            connection: ConnectionFlags::default(),
        }
    }
}

/// Stream copy buffer size.
const COPY_BUF: usize = 64 * 1024;
/// Largest sample taken for gzip auto-detection.
const GZIP_SAMPLE: usize = 64 * 1024;
/// Statuses that always close the connection.
const CLOSING_STATUSES: [u16; 4] = [400, 404, 411, 500];

enum Plan {
    /// Known-length body, possibly gzip-encoded.
    Full { body: FullBody, gzipped: bool },
    /// One satisfiable range.
    SingleRange {
        body: Vec<u8>,
        from: u64,
        to: u64,
        total: u64,
    },
    /// Several satisfiable ranges as multipart/byteranges.
    MultiRange { body: Vec<u8>, boundary: String },
    /// Chunked (HTTP/1.1) or raw-until-close (HTTP/1.0).
    Dynamic(Box<dyn Iterator<Item = Vec<u8>> + Send>),
}

enum FullBody {
    Bytes(Vec<u8>),
    Stream {
        source: Box<dyn SeekableSource>,
        len: u64,
    },
}

impl FullBody {
    fn len(&self) -> u64 {
        match self {
            FullBody::Bytes(b) => b.len() as u64,
            FullBody::Stream { len, .. } => *len,
        }
    }
}

/// Write a complete response. Returns whether the connection stays open.
pub async fn write_response<W: AsyncWrite + Unpin>(
    w: &mut W,
    ctx: &WriteContext,
    response: Response,
    gzip_mode: GzipMode,
) -> std::io::Result<bool> {
    let Response {
        status,
        headers,
        content,
    } = response;

    let (plan, status) = make_plan(ctx, status, content, gzip_mode).await?;

    let close = decide_close(ctx, status, &plan, headers.close_connection);

    let mut head = String::new();
    head.push_str(&format!(
        "HTTP/1.1 {} {}\r\n",
        status,
        reason_phrase(status)
    ));
    head.push_str(&format!("Date: {}\r\n", format_http_date(Utc::now())));

    match &plan {
        Plan::Full { body, gzipped } => {
            if let Some(ct) = &headers.content_type {
                head.push_str(&format!("Content-Type: {}\r\n", ct));
            }
            head.push_str(&format!("Content-Length: {}\r\n", body.len()));
            if *gzipped {
                head.push_str("Content-Encoding: gzip\r\n");
            } else {
                head.push_str("Accept-Ranges: bytes\r\n");
            }
        }
        Plan::SingleRange {
            body, from, to, total,
        } => {
            if let Some(ct) = &headers.content_type {
                head.push_str(&format!("Content-Type: {}\r\n", ct));
            }
            head.push_str(&format!(
                "Content-Range: bytes {}-{}/{}\r\n",
                from, to, total
            ));
            head.push_str(&format!("Content-Length: {}\r\n", body.len()));
        }
        Plan::MultiRange { body, boundary } => {
            head.push_str(&format!(
                "Content-Type: multipart/byteranges; boundary={}\r\n",
                boundary
            ));
            head.push_str(&format!("Content-Length: {}\r\n", body.len()));
        }
        Plan::Dynamic(_) => {
            if let Some(ct) = &headers.content_type {
                head.push_str(&format!("Content-Type: {}\r\n", ct));
            }
            if ctx.version == HttpVersion::Http11 {
                head.push_str("Transfer-Encoding: chunked\r\n");
            }
        }
    }

    if let Some(l) = &headers.location {
        head.push_str(&format!("Location: {}\r\n", l));
    }
    if let Some(e) = &headers.etag {
        head.push_str(&format!("ETag: {}\r\n", e));
    }
    if let Some(t) = headers.last_modified {
        head.push_str(&format!("Last-Modified: {}\r\n", format_http_date(t)));
    }
    if let Some(t) = headers.expires {
        head.push_str(&format!("Expires: {}\r\n", format_http_date(t)));
    }
    if let Some(c) = &headers.cache_control {
        head.push_str(&format!("Cache-Control: {}\r\n", c));
    }
    for cookie in &headers.set_cookies {
        head.push_str(&format!("Set-Cookie: {}\r\n", cookie.to_header_value()));
    }
    for (name, value) in &headers.additional {
        head.push_str(&format!("{}: {}\r\n", name, value));
    }

    if status == 101 {
        if let Some(proto) = &headers.upgrade {
            head.push_str(&format!("Upgrade: {}\r\n", proto));
        }
        head.push_str("Connection: Upgrade\r\n");
    } else if close {
        head.push_str("Connection: close\r\n");
    } else {
        head.push_str("Connection: keep-alive\r\n");
    }
    head.push_str("\r\n");
    w.write_all(head.as_bytes()).await?;

    if ctx.method != Method::Head && status != 101 {
        write_body(w, plan, ctx.version).await?;
    }
    w.flush().await?;
    Ok(!close && status != 101)
}

async fn write_body<W: AsyncWrite + Unpin>(
    w: &mut W,
    plan: Plan,
    version: HttpVersion,
) -> std::io::Result<()> {
    match plan {
        Plan::Full { body, .. } => write_full(w, body).await,
        Plan::SingleRange { body, .. } | Plan::MultiRange { body, .. } => {
            w.write_all(&body).await
        }
        Plan::Dynamic(mut producer) => {
            if version == HttpVersion::Http11 {
                for chunk in producer.by_ref() {
                    chunked::write_chunk(w, &chunk).await?;
                }
                chunked::write_terminator(w).await
            } else {
                // HTTP/1.0 has no chunked framing; stream raw and close.
                for chunk in producer.by_ref() {
                    w.write_all(&chunk).await?;
                }
                Ok(())
            }
        }
    }
}

async fn write_full<W: AsyncWrite + Unpin>(w: &mut W, body: FullBody) -> std::io::Result<()> {
    match body {
        FullBody::Bytes(b) => w.write_all(&b).await,
        FullBody::Stream { mut source, len } => {
            let mut remaining = len;
            let mut buf = vec![0u8; COPY_BUF];
            while remaining > 0 {
                let want = (remaining as usize).min(buf.len());
                let n = source.read(&mut buf[..want]).await?;
                if n == 0 {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "stream content ended before its declared length",
                    ));
                }
                w.write_all(&buf[..n]).await?;
                remaining -= n as u64;
            }
            Ok(())
        }
    }
}

/// Pick the framing. Returns the plan plus the possibly adjusted status
/// (206 for ranged replies).
async fn make_plan(
    ctx: &WriteContext,
    status: u16,
    content: Content,
    gzip_mode: GzipMode,
) -> std::io::Result<(Plan, u16)> {
    match content {
        Content::Dynamic(producer) => Ok((Plan::Dynamic(producer), status)),
        Content::Empty => Ok((
            Plan::Full {
                body: FullBody::Bytes(Vec::new()),
                gzipped: false,
            },
            status,
        )),
        Content::Buffered(bytes) => {
            let total = bytes.len() as u64;
            if status == 200 {
                if let Some(resolved) = resolve_ranges(&ctx.ranges, total) {
                    return ranged_plan_buffered(bytes, resolved, total);
                }
            }
            let gzipped = should_gzip(ctx, gzip_mode, &gzip_sample_buffered(&bytes));
            let body = if gzipped {
                FullBody::Bytes(gzip_bytes(&bytes)?)
            } else {
                FullBody::Bytes(bytes)
            };
            Ok((Plan::Full { body, gzipped }, status))
        }
        Content::Stream { mut source, len } => {
            if status == 200 {
                if let Some(resolved) = resolve_ranges(&ctx.ranges, len) {
                    return ranged_plan_stream(source, len, resolved).await;
                }
            }
            let sample = gzip_sample_stream(&mut source, len).await?;
            let gzipped = should_gzip(ctx, gzip_mode, &sample);
            if gzipped {
                let mut all = Vec::with_capacity(len as usize);
                source.read_to_end(&mut all).await?;
                Ok((
                    Plan::Full {
                        body: FullBody::Bytes(gzip_bytes(&all)?),
                        gzipped: true,
                    },
                    status,
                ))
            } else {
                Ok((
                    Plan::Full {
                        body: FullBody::Stream { source, len },
                        gzipped: false,
                    },
                    status,
                ))
            }
        }
    }
}

fn ranged_plan_buffered(
    bytes: Vec<u8>,
    resolved: Vec<(u64, u64)>,
    total: u64,
) -> std::io::Result<(Plan, u16)> {
    if resolved.len() == 1 {
        let (from, to) = resolved[0];
        let body = bytes[from as usize..=to as usize].to_vec();
        return Ok((
            Plan::SingleRange {
                body,
                from,
                to,
                total,
            },
            206,
        ));
    }
    let boundary = random_hex(8)?;
    let parts: Vec<((u64, u64), Vec<u8>)> = resolved
        .into_iter()
        .map(|(f, t)| ((f, t), bytes[f as usize..=t as usize].to_vec()))
        .collect();
    let body = build_byteranges_body(&boundary, &parts, total);
    Ok((Plan::MultiRange { body, boundary }, 206))
}

async fn ranged_plan_stream(
    mut source: Box<dyn SeekableSource>,
    total: u64,
    resolved: Vec<(u64, u64)>,
) -> std::io::Result<(Plan, u16)> {
    let mut parts = Vec::with_capacity(resolved.len());
    for (from, to) in resolved {
        source.seek(std::io::SeekFrom::Start(from)).await?;
        let mut data = vec![0u8; (to - from + 1) as usize];
        source.read_exact(&mut data).await?;
        parts.push(((from, to), data));
    }
    if parts.len() == 1 {
        let ((from, to), body) = parts.into_iter().next().unwrap();
        return Ok((
            Plan::SingleRange {
                body,
                from,
                to,
                total,
            },
            206,
        ));
    }
    let boundary = random_hex(8)?;
    let body = build_byteranges_body(&boundary, &parts, total);
    Ok((Plan::MultiRange { body, boundary }, 206))
}

/// Assemble a multipart/byteranges body: each part is the boundary line, a
/// Content-Range header, a blank line, and the slice; the final boundary is
/// dash-terminated.
fn build_byteranges_body(boundary: &str, parts: &[((u64, u64), Vec<u8>)], total: u64) -> Vec<u8> {
    let mut body = Vec::new();
    for ((from, to), data) in parts {
        body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
        body.extend_from_slice(
            format!("Content-Range: bytes {}-{}/{}\r\n\r\n", from, to, total).as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());
    body
}

/// Clamp requested ranges against the body length. Returns None when there
/// are no ranges or any of them is unsatisfiable; the caller then serves the
/// full body.
fn resolve_ranges(ranges: &[ByteRange], len: u64) -> Option<Vec<(u64, u64)>> {
    if ranges.is_empty() || len == 0 {
        return None;
    }
    let mut out = Vec::with_capacity(ranges.len());
    for range in ranges {
        let resolved = match range {
            (Some(from), Some(to)) if from <= to && *from < len => {
                (*from, (*to).min(len - 1))
            }
            (Some(from), None) if *from < len => (*from, len - 1),
            (None, Some(suffix)) if *suffix > 0 => (len.saturating_sub(*suffix), len - 1),
            _ => return None,
        };
        out.push(resolved);
    }
    Some(out)
}

fn decide_close(ctx: &WriteContext, status: u16, plan: &Plan, forced: bool) -> bool {
    if forced || CLOSING_STATUSES.contains(&status) {
        return true;
    }
    if ctx.connection.close {
        return true;
    }
    match ctx.version {
        HttpVersion::Http11 => false,
        // Without chunked framing a dynamic body can only be delimited by
        // closing the connection.
        HttpVersion::Http10 => {
            !ctx.connection.keep_alive || matches!(plan, Plan::Dynamic(_))
        }
    }
}

fn should_gzip(ctx: &WriteContext, mode: GzipMode, sample: &[u8]) -> bool {
    if !ctx.accepts_gzip || sample.is_empty() {
        return false;
    }
    match mode {
        GzipMode::Never => false,
        GzipMode::Always => true,
        GzipMode::AutoDetect => match gzip_bytes(sample) {
            // Worth it when the sample shrinks by at least a tenth.
            Ok(compressed) => compressed.len() * 10 < sample.len() * 9,
            Err(_) => false,
        },
    }
}

/// Middle slice of a buffered body, at most `GZIP_SAMPLE` long.
fn gzip_sample_buffered(bytes: &[u8]) -> Vec<u8> {
    let sample_len = bytes.len().min(GZIP_SAMPLE);
    let start = (bytes.len() - sample_len) / 2;
    bytes[start..start + sample_len].to_vec()
}

/// Middle sample of a stream; the cursor is rewound to the start.
async fn gzip_sample_stream(
    source: &mut Box<dyn SeekableSource>,
    len: u64,
) -> std::io::Result<Vec<u8>> {
    let sample_len = (len as usize).min(GZIP_SAMPLE);
    if sample_len == 0 {
        return Ok(Vec::new());
    }
    let start = (len - sample_len as u64) / 2;
    source.seek(std::io::SeekFrom::Start(start)).await?;
    let mut sample = vec![0u8; sample_len];
    source.read_exact(&mut sample).await?;
    source.seek(std::io::SeekFrom::Start(0)).await?;
    Ok(sample)
}

fn gzip_bytes(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}
