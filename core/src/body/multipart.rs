/*
 * multipart.rs
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

//! multipart/form-data body parser. A double-buffer scanner keeps a window
//! at least one full boundary long; on refill the unconsumed tail moves to
//! the alternate buffer, so the buffers never grow past window size plus one
//! read. `--<boundary>` opens the first part, `\r\n--<boundary>\r\n`
//! separates parts, `\r\n--<boundary>--` terminates. Output is identical for
//! any segmentation of the same byte stream.
//!
//! File uploads accumulate in memory until the combined in-memory size would
//! pass the spill threshold; then the largest in-memory upload strictly
//! larger than the current one (or, failing that, the current one) moves to
//! a temp file under the caller's directory. The parser never creates that
//! directory, only files inside it.

use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;

use crate::error::HttpError;
use crate::request::{FieldMap, FileUpload, UploadStorage};
use crate::util::random_temp_filepath;

/// Longest accepted boundary, in octets.
const MAX_BOUNDARY: usize = 1024;
/// Cap on one part's header block.
const MAX_PART_HEADER: usize = 64 * 1024;

/// Completed parse: text fields plus file uploads in wire order.
#[derive(Debug, Default)]
pub struct ParsedBody {
    pub fields: FieldMap,
    pub uploads: Vec<(String, FileUpload)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    /// Before the first boundary; ignorable CRLFs allowed.
    Preamble,
    PartHeaders,
    PartData,
    Done,
}

enum CurrentPart {
    None,
    Text {
        name: String,
        data: Vec<u8>,
    },
    File(FilePart),
    /// Part without a name; bytes are dropped.
    Discard,
}

struct FilePart {
    name: String,
    filename: String,
    content_type: Option<String>,
    mem: Vec<u8>,
    /// Set once spilled; all further bytes go straight to the file.
    disk: Option<(PathBuf, File, u64)>,
}

/// Push parser. Feed with `receive` in arbitrary segment sizes, then call
/// `close` (also on premature end of stream; the open part is finalized).
pub struct MultipartParser {
    /// `\r\n--<boundary>`, the separator as it appears mid-stream.
    delimiter: Vec<u8>,
    state: ScanState,
    buffers: [Vec<u8>; 2],
    active: usize,
    body: ParsedBody,
    current: CurrentPart,
    /// Sum of all in-memory upload bytes, completed parts included.
    mem_total: usize,
    spill_threshold: usize,
    temp_dir: PathBuf,
}

impl MultipartParser {
    pub fn new(
        boundary: &str,
        temp_dir: impl Into<PathBuf>,
        spill_threshold: usize,
    ) -> Result<Self, HttpError> {
        if boundary.is_empty() || boundary.len() > MAX_BOUNDARY {
            return Err(HttpError::bad_request("invalid multipart boundary length"));
        }
        let mut delimiter = Vec::with_capacity(boundary.len() + 4);
        delimiter.extend_from_slice(b"\r\n--");
        delimiter.extend_from_slice(boundary.as_bytes());
        Ok(Self {
            delimiter,
            state: ScanState::Preamble,
            buffers: [Vec::new(), Vec::new()],
            active: 0,
            body: ParsedBody::default(),
            current: CurrentPart::None,
            mem_total: 0,
            spill_threshold,
            temp_dir: temp_dir.into(),
        })
    }

    /// Bytes currently held in memory for file uploads. Never exceeds the
    /// spill threshold.
    pub fn in_memory_upload_bytes(&self) -> usize {
        self.mem_total
    }

    pub fn receive(&mut self, data: &[u8]) -> Result<(), HttpError> {
        if self.state == ScanState::Done {
            return Ok(());
        }
        self.buffers[self.active].extend_from_slice(data);
        // Move the window out so scan() can mutate part state; the tail is
        // copied into the alternate buffer afterwards.
        let window = std::mem::take(&mut self.buffers[self.active]);
        let mut pos = 0;
        let result = self.scan(&window, &mut pos);
        let alt = 1 - self.active;
        self.buffers[alt].clear();
        self.buffers[alt].extend_from_slice(&window[pos..]);
        self.buffers[self.active] = window;
        self.buffers[self.active].clear();
        self.active = alt;
        result
    }

    /// End of stream. Finalizes a part left open by a truncated body.
    pub fn close(mut self) -> Result<ParsedBody, HttpError> {
        if self.state == ScanState::PartData {
            let window = std::mem::take(&mut self.buffers[self.active]);
            self.emit_data(&window)?;
            self.finalize_part()?;
        }
        self.state = ScanState::Done;
        Ok(self.body)
    }

    fn scan(&mut self, window: &[u8], pos: &mut usize) -> Result<(), HttpError> {
        // First-part opener, without the leading CRLF.
        let opener_len = self.delimiter.len() - 2;
        loop {
            let rest = &window[*pos..];
            match self.state {
                ScanState::Preamble => {
                    if rest.starts_with(b"\r\n") {
                        *pos += 2;
                        continue;
                    }
                    if rest.len() < opener_len + 2 {
                        return Ok(());
                    }
                    if &rest[..opener_len] != &self.delimiter[2..] {
                        return Err(HttpError::bad_request("multipart body must open with boundary"));
                    }
                    match &rest[opener_len..opener_len + 2] {
                        b"\r\n" => {
                            *pos += opener_len + 2;
                            self.state = ScanState::PartHeaders;
                        }
                        b"--" => {
                            *pos += opener_len + 2;
                            self.state = ScanState::Done;
                            return Ok(());
                        }
                        _ => {
                            return Err(HttpError::bad_request(
                                "garbage after opening boundary",
                            ))
                        }
                    }
                }
                ScanState::PartHeaders => {
                    let Some(end) = find_double_crlf(rest) else {
                        if rest.len() > MAX_PART_HEADER {
                            return Err(HttpError::bad_request("part headers too large"));
                        }
                        return Ok(());
                    };
                    self.begin_part(&rest[..end])?;
                    *pos += end + 4;
                    self.state = ScanState::PartData;
                }
                ScanState::PartData => {
                    match find(rest, &self.delimiter) {
                        Some(i) => {
                            // Everything before the candidate is part data.
                            self.emit_data(&rest[..i])?;
                            *pos += i;
                            let after = &window[*pos + self.delimiter.len()..];
                            if after.len() < 2 {
                                return Ok(());
                            }
                            match &after[..2] {
                                b"\r\n" => {
                                    *pos += self.delimiter.len() + 2;
                                    self.finalize_part()?;
                                    self.state = ScanState::PartHeaders;
                                }
                                b"--" => {
                                    *pos += self.delimiter.len() + 2;
                                    self.finalize_part()?;
                                    self.state = ScanState::Done;
                                    return Ok(());
                                }
                                _ => {
                                    // Looked like a boundary but is not one;
                                    // the first byte is plain data. Rescan.
                                    self.emit_data(&window[*pos..*pos + 1])?;
                                    *pos += 1;
                                }
                            }
                        }
                        None => {
                            // Keep a tail that could be a partial delimiter.
                            let keep = self.delimiter.len() + 1;
                            if rest.len() > keep {
                                let emit = rest.len() - keep;
                                self.emit_data(&rest[..emit])?;
                                *pos += emit;
                            }
                            return Ok(());
                        }
                    }
                }
                ScanState::Done => {
                    *pos = window.len();
                    return Ok(());
                }
            }
        }
    }

    /// Parse a part's header block and open the matching part kind.
    fn begin_part(&mut self, raw: &[u8]) -> Result<(), HttpError> {
        let text = std::str::from_utf8(raw)
            .map_err(|_| HttpError::bad_request("part headers are not UTF-8"))?;
        let mut name = None;
        let mut filename = None;
        let mut content_type = None;
        for line in text.split("\r\n") {
            let Some(colon) = line.find(':') else {
                continue;
            };
            let header = line[..colon].trim();
            let value = line[colon + 1..].trim();
            if header.eq_ignore_ascii_case("Content-Disposition") {
                let mut params = value.split(';');
                let disposition = params.next().unwrap_or("").trim();
                if !disposition.eq_ignore_ascii_case("form-data")
                    && !disposition.eq_ignore_ascii_case("file")
                {
                    continue;
                }
                for (k, v) in parse_params(value) {
                    if k.eq_ignore_ascii_case("name") {
                        name = Some(v);
                    } else if k.eq_ignore_ascii_case("filename") {
                        filename = Some(v);
                    }
                }
            } else if header.eq_ignore_ascii_case("Content-Type") {
                content_type = Some(value.to_string());
            }
        }
        self.current = match (name, filename) {
            (Some(name), Some(filename)) => CurrentPart::File(FilePart {
                name,
                filename,
                content_type,
                mem: Vec::new(),
                disk: None,
            }),
            (Some(name), None) => CurrentPart::Text {
                name,
                data: Vec::new(),
            },
            (None, _) => CurrentPart::Discard,
        };
        Ok(())
    }

    fn emit_data(&mut self, data: &[u8]) -> Result<(), HttpError> {
        if data.is_empty() {
            return Ok(());
        }
        if matches!(self.current, CurrentPart::File(_)) {
            return self.append_upload(data).map_err(HttpError::from);
        }
        if let CurrentPart::Text { data: buf, .. } = &mut self.current {
            buf.extend_from_slice(data);
        }
        Ok(())
    }

    /// Append bytes to the current file part, spilling as needed so that
    /// in-memory upload bytes stay at or below the threshold.
    fn append_upload(&mut self, data: &[u8]) -> io::Result<()> {
        loop {
            let CurrentPart::File(part) = &self.current else {
                return Ok(());
            };
            if part.disk.is_some() || self.mem_total + data.len() <= self.spill_threshold {
                break;
            }
            let current_len = part.mem.len();
            match self.largest_spillable(current_len) {
                Some(idx) => self.spill_completed(idx)?,
                None => self.spill_current()?,
            }
        }
        let CurrentPart::File(part) = &mut self.current else {
            return Ok(());
        };
        match &mut part.disk {
            Some((_, file, len)) => {
                file.write_all(data)?;
                *len += data.len() as u64;
            }
            None => {
                part.mem.extend_from_slice(data);
                self.mem_total += data.len();
            }
        }
        Ok(())
    }

    /// Index of the largest completed in-memory upload strictly larger than
    /// the current part.
    fn largest_spillable(&self, current_len: usize) -> Option<usize> {
        let mut best: Option<(usize, usize)> = None;
        for (i, (_, upload)) in self.body.uploads.iter().enumerate() {
            if let UploadStorage::Memory(bytes) = &upload.storage {
                if bytes.len() > current_len && best.map_or(true, |(_, l)| bytes.len() > l) {
                    best = Some((i, bytes.len()));
                }
            }
        }
        best.map(|(i, _)| i)
    }

    fn spill_completed(&mut self, idx: usize) -> io::Result<()> {
        let upload = &mut self.body.uploads[idx].1;
        let UploadStorage::Memory(bytes) = &upload.storage else {
            return Ok(());
        };
        let (path, mut file) = random_temp_filepath(&self.temp_dir)?;
        file.write_all(bytes)?;
        file.flush()?;
        self.mem_total -= bytes.len();
        upload.storage = UploadStorage::Disk {
            path,
            len: bytes.len() as u64,
        };
        Ok(())
    }

    fn spill_current(&mut self) -> io::Result<()> {
        let CurrentPart::File(part) = &mut self.current else {
            return Ok(());
        };
        let (path, mut file) = random_temp_filepath(&self.temp_dir)?;
        file.write_all(&part.mem)?;
        let len = part.mem.len() as u64;
        self.mem_total -= part.mem.len();
        part.mem = Vec::new();
        part.disk = Some((path, file, len));
        Ok(())
    }

    fn finalize_part(&mut self) -> Result<(), HttpError> {
        match std::mem::replace(&mut self.current, CurrentPart::None) {
            CurrentPart::Text { name, data } => {
                self.body
                    .fields
                    .add(name, String::from_utf8_lossy(&data).into_owned());
            }
            CurrentPart::File(part) => {
                let storage = match part.disk {
                    Some((path, mut file, len)) => {
                        file.flush().map_err(HttpError::from)?;
                        UploadStorage::Disk { path, len }
                    }
                    None => UploadStorage::Memory(part.mem),
                };
                self.body.uploads.push((
                    part.name,
                    FileUpload {
                        content_type: part.content_type,
                        filename: part.filename,
                        storage,
                    },
                ));
            }
            CurrentPart::Discard | CurrentPart::None => {}
        }
        Ok(())
    }
}

/// Parse `; name="value"; other=token` parameters, honoring quotes.
fn parse_params(value: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let rest = match value.find(';') {
        Some(i) => &value[i + 1..],
        None => return out,
    };
    let bytes = rest.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        // Skip whitespace and separators.
        while i < bytes.len() && (bytes[i] == b' ' || bytes[i] == b';' || bytes[i] == b'\t') {
            i += 1;
        }
        let key_start = i;
        while i < bytes.len() && bytes[i] != b'=' && bytes[i] != b';' {
            i += 1;
        }
        if i >= bytes.len() || bytes[i] != b'=' {
            continue;
        }
        let key = rest[key_start..i].trim().to_string();
        i += 1;
        let val = if i < bytes.len() && bytes[i] == b'"' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i] != b'"' {
                i += 1;
            }
            let v = rest[start..i].to_string();
            if i < bytes.len() {
                i += 1;
            }
            v
        } else {
            let start = i;
            while i < bytes.len() && bytes[i] != b';' {
                i += 1;
            }
            rest[start..i].trim().to_string()
        };
        if !key.is_empty() {
            out.push((key, val));
        }
    }
    out
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|w| w == needle)
}

fn find_double_crlf(buf: &[u8]) -> Option<usize> {
    find(buf, b"\r\n\r\n")
}
