/*
 * chunked.rs
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

//! Chunked transfer-encoding: push decoder for request bodies and write
//! helpers for response bodies. Wire format per chunk is `HEX CRLF bytes
//! CRLF`; the stream ends with `0 CRLF CRLF`. Trailers are accepted on read
//! and discarded; none are ever written.

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::HttpError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    Size,
    Data,
    DataCrlf,
    Trailer,
    Done,
}

/// Push decoder. Feed wire bytes via `decode`; decoded payload is appended
/// to `out`. Returns true once the terminating chunk and trailers have been
/// consumed; leftover bytes (a pipelined request) stay in the buffer.
pub struct ChunkedDecoder {
    state: DecodeState,
    remaining: u64,
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self {
            state: DecodeState::Size,
            remaining: 0,
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == DecodeState::Done
    }

    pub fn decode(&mut self, buf: &mut BytesMut, out: &mut Vec<u8>) -> Result<bool, HttpError> {
        loop {
            match self.state {
                DecodeState::Size => {
                    let Some(line_end) = find_crlf(buf) else {
                        return Ok(false);
                    };
                    let line = buf.split_to(line_end + 2);
                    let line = std::str::from_utf8(&line[..line_end])
                        .map_err(|_| HttpError::bad_request("chunk size is not UTF-8"))?;
                    // Chunk extensions after ';' are ignored.
                    let hex = line.split(';').next().unwrap_or(line).trim();
                    self.remaining = u64::from_str_radix(hex, 16)
                        .map_err(|_| HttpError::bad_request("invalid chunk size"))?;
                    self.state = if self.remaining == 0 {
                        DecodeState::Trailer
                    } else {
                        DecodeState::Data
                    };
                }
                DecodeState::Data => {
                    if buf.is_empty() {
                        return Ok(false);
                    }
                    let take = (self.remaining as usize).min(buf.len());
                    out.extend_from_slice(&buf[..take]);
                    buf.advance(take);
                    self.remaining -= take as u64;
                    if self.remaining == 0 {
                        self.state = DecodeState::DataCrlf;
                    }
                }
                DecodeState::DataCrlf => {
                    if buf.len() < 2 {
                        return Ok(false);
                    }
                    if &buf[..2] != b"\r\n" {
                        return Err(HttpError::bad_request("chunk data not CRLF-terminated"));
                    }
                    buf.advance(2);
                    self.state = DecodeState::Size;
                }
                DecodeState::Trailer => {
                    let Some(line_end) = find_crlf(buf) else {
                        return Ok(false);
                    };
                    buf.advance(line_end + 2);
                    if line_end == 0 {
                        self.state = DecodeState::Done;
                        return Ok(true);
                    }
                }
                DecodeState::Done => return Ok(true),
            }
        }
    }
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Write one non-empty chunk. Empty input writes nothing; a zero-length
/// chunk on the wire would terminate the stream.
pub async fn write_chunk<W: AsyncWrite + Unpin>(w: &mut W, data: &[u8]) -> std::io::Result<()> {
    if data.is_empty() {
        return Ok(());
    }
    w.write_all(format!("{:x}\r\n", data.len()).as_bytes()).await?;
    w.write_all(data).await?;
    w.write_all(b"\r\n").await?;
    Ok(())
}

/// Write the terminating chunk.
pub async fn write_terminator<W: AsyncWrite + Unpin>(w: &mut W) -> std::io::Result<()> {
    w.write_all(b"0\r\n\r\n").await
}

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

    #[test]
    fn decode_two_chunks() {
        let mut d = ChunkedDecoder::new();
        let mut buf = BytesMut::from(&b"4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\nNEXT"[..]);
        let mut out = Vec::new();
        assert!(d.decode(&mut buf, &mut out).unwrap());
        assert_eq!(out, b"Wikipedia");
        assert_eq!(&buf[..], b"NEXT");
    }

    #[test]
    fn decode_byte_at_a_time() {
        let wire = b"4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n";
        let mut d = ChunkedDecoder::new();
        let mut buf = BytesMut::new();
        let mut out = Vec::new();
        let mut done = false;
        for &b in wire.iter() {
            buf.extend_from_slice(&[b]);
            done = d.decode(&mut buf, &mut out).unwrap();
        }
        assert!(done);
        assert_eq!(out, b"Wikipedia");
    }

    #[test]
    fn decode_ignores_extensions_and_trailers() {
        let mut d = ChunkedDecoder::new();
        let mut buf =
            BytesMut::from(&b"3;ext=1\r\nabc\r\n0\r\nX-Trailer: v\r\n\r\n"[..]);
        let mut out = Vec::new();
        assert!(d.decode(&mut buf, &mut out).unwrap());
        assert_eq!(out, b"abc");
    }

    #[test]
    fn decode_rejects_bad_size() {
        let mut d = ChunkedDecoder::new();
        let mut buf = BytesMut::from(&b"zz\r\n"[..]);
        assert!(d.decode(&mut buf, &mut Vec::new()).is_err());
    }

    #[test]
    fn decode_rejects_missing_crlf_after_data() {
        let mut d = ChunkedDecoder::new();
        let mut buf = BytesMut::from(&b"3\r\nabcXX"[..]);
        assert!(d.decode(&mut buf, &mut Vec::new()).is_err());
    }

    #[tokio::test]
    async fn write_format() {
        let mut out = Vec::new();
        write_chunk(&mut out, b"hello").await.unwrap();
        write_chunk(&mut out, b"").await.unwrap();
        write_chunk(&mut out, &[0u8; 26]).await.unwrap();
        write_terminator(&mut out).await.unwrap();
        let mut expected = Vec::new();
        expected.extend_from_slice(b"5\r\nhello\r\n1a\r\n");
        expected.extend_from_slice(&[0u8; 26]);
        expected.extend_from_slice(b"\r\n0\r\n\r\n");
        assert_eq!(out, expected);
    }

    #[tokio::test]
    async fn roundtrip_payload_equals_concatenated_chunks() {
        let chunks: Vec<Vec<u8>> = vec![b"abc".to_vec(), b"defgh".to_vec(), b"i".to_vec()];
        let mut wire = Vec::new();
        for c in &chunks {
            write_chunk(&mut wire, c).await.unwrap();
        }
        write_terminator(&mut wire).await.unwrap();

        let mut d = ChunkedDecoder::new();
        let mut buf = BytesMut::from(&wire[..]);
        let mut out = Vec::new();
        assert!(d.decode(&mut buf, &mut out).unwrap());
        let joined: Vec<u8> = chunks.concat();
        assert_eq!(out, joined);
    }
}
