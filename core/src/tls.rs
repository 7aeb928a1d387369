/*
 * tls.rs
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

//! TLS collaborator boundary. The server owns neither certificates nor
//! cipher configuration: a `TlsProvider` turns an accepted TCP stream into a
//! plaintext duplex stream. A rustls-backed provider is included, plus an
//! SNI pre-peek that reads exactly the ClientHello and hands back the bytes
//! so the handshake can replay them.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::rustls::ServerConfig as TlsConfig;
use tokio_rustls::TlsAcceptor;

/// Any duplex byte stream the connection worker can own.
pub trait ServerStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> ServerStream for T {}

pub type BoxedStream = Box<dyn ServerStream>;

/// Wraps an accepted socket in TLS and returns the plaintext stream.
pub trait TlsProvider: Send + Sync {
    fn wrap(
        &self,
        stream: TcpStream,
    ) -> Pin<Box<dyn Future<Output = io::Result<BoxedStream>> + Send + '_>>;
}

/// TlsProvider backed by a rustls server config.
pub struct RustlsProvider {
    acceptor: TlsAcceptor,
}

impl RustlsProvider {
    pub fn new(config: Arc<TlsConfig>) -> Self {
        Self {
            acceptor: TlsAcceptor::from(config),
        }
    }
}

impl TlsProvider for RustlsProvider {
    fn wrap(
        &self,
        stream: TcpStream,
    ) -> Pin<Box<dyn Future<Output = io::Result<BoxedStream>> + Send + '_>> {
        let acceptor = self.acceptor.clone();
        Box::pin(async move {
            let tls = acceptor.accept(stream).await?;
            Ok(Box::new(tls) as BoxedStream)
        })
    }
}

/// Read exactly the ClientHello from the stream and extract the SNI host
/// name (extension 0, name type 0). Returns the hostname, if any, together
/// with all bytes read; wrap the stream in a `ReplayStream` so the TLS
/// handshake sees them again.
pub async fn peek_client_hello<S: AsyncRead + Unpin>(
    stream: &mut S,
) -> io::Result<(Option<String>, Vec<u8>)> {
    let mut header = [0u8; 5];
    stream.read_exact(&mut header).await?;
    // TLS record: type 22 (handshake), version, length.
    if header[0] != 22 {
        return Ok((None, header.to_vec()));
    }
    let record_len = u16::from_be_bytes([header[3], header[4]]) as usize;
    let mut record = vec![0u8; record_len];
    stream.read_exact(&mut record).await?;

    let hostname = parse_sni(&record);
    let mut consumed = header.to_vec();
    consumed.extend_from_slice(&record);
    Ok((hostname, consumed))
}

/// Walk a ClientHello handshake message and pull out the server_name
/// extension. Any structural surprise yields None rather than an error.
fn parse_sni(record: &[u8]) -> Option<String> {
    let mut r = Reader::new(record);
    // Handshake header: type 1 (ClientHello) + 3-byte length.
    if r.u8()? != 1 {
        return None;
    }
    r.skip(3)?;
    // legacy_version + random.
    r.skip(2 + 32)?;
    let session_id_len = r.u8()? as usize;
    r.skip(session_id_len)?;
    let cipher_suites_len = r.u16()? as usize;
    r.skip(cipher_suites_len)?;
    let compression_len = r.u8()? as usize;
    r.skip(compression_len)?;
    let extensions_len = r.u16()? as usize;
    let mut ext = Reader::new(r.take(extensions_len)?);
    while !ext.is_empty() {
        let ext_type = ext.u16()?;
        let ext_len = ext.u16()? as usize;
        let body = ext.take(ext_len)?;
        if ext_type != 0 {
            continue;
        }
        let mut names = Reader::new(body);
        let list_len = names.u16()? as usize;
        let mut list = Reader::new(names.take(list_len)?);
        while !list.is_empty() {
            let name_type = list.u8()?;
            let name_len = list.u16()? as usize;
            let name = list.take(name_len)?;
            if name_type == 0 {
                return std::str::from_utf8(name).ok().map(str::to_string);
            }
        }
    }
    None
}

/// Bounds-checked byte cursor.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn u8(&mut self) -> Option<u8> {
        let b = *self.buf.get(self.pos)?;
        self.pos += 1;
        Some(b)
    }

    fn u16(&mut self) -> Option<u16> {
        let hi = self.u8()?;
        let lo = self.u8()?;
        Some(u16::from_be_bytes([hi, lo]))
    }

    fn skip(&mut self, n: usize) -> Option<()> {
        if self.pos + n > self.buf.len() {
            return None;
        }
        self.pos += n;
        Some(())
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return None;
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Some(s)
    }
}

/// Stream that replays previously peeked bytes before reading from the
/// inner stream. Writes pass straight through.
pub struct ReplayStream<S> {
    prefix: Vec<u8>,
    pos: usize,
    inner: S,
}

impl<S> ReplayStream<S> {
    pub fn new(prefix: Vec<u8>, inner: S) -> Self {
        Self {
            prefix,
            pos: 0,
            inner,
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for ReplayStream<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.pos < self.prefix.len() {
            let n = (self.prefix.len() - self.pos).min(buf.remaining());
            let pos = self.pos;
            buf.put_slice(&self.prefix[pos..pos + n]);
            self.pos += n;
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for ReplayStream<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    /// Minimal ClientHello record with the given SNI hostname.
    fn client_hello(host: &str) -> Vec<u8> {
        let name = host.as_bytes();
        let mut sni_entry = vec![0u8];
        sni_entry.extend_from_slice(&(name.len() as u16).to_be_bytes());
        sni_entry.extend_from_slice(name);
        let mut sni_list = (sni_entry.len() as u16).to_be_bytes().to_vec();
        sni_list.extend_from_slice(&sni_entry);
        let mut ext = vec![0u8, 0];
        ext.extend_from_slice(&(sni_list.len() as u16).to_be_bytes());
        ext.extend_from_slice(&sni_list);
        let mut extensions = (ext.len() as u16).to_be_bytes().to_vec();
        extensions.extend_from_slice(&ext);

        let mut hello = Vec::new();
        hello.extend_from_slice(&[3, 3]); // legacy version
        hello.extend_from_slice(&[0u8; 32]); // random
        hello.push(0); // session id
        hello.extend_from_slice(&[0, 2, 0x13, 0x01]); // one cipher suite
        hello.extend_from_slice(&[1, 0]); // null compression
        hello.extend_from_slice(&extensions);

        let mut handshake = vec![1u8];
        handshake.extend_from_slice(&(hello.len() as u32).to_be_bytes()[1..]);
        handshake.extend_from_slice(&hello);

        let mut record = vec![22u8, 3, 1];
        record.extend_from_slice(&(handshake.len() as u16).to_be_bytes());
        record.extend_from_slice(&handshake);
        record
    }

    #[tokio::test]
    async fn peek_extracts_sni_and_preserves_bytes() {
        let wire = client_hello("secure.example.net");
        let (mut a, mut b) = tokio::io::duplex(4096);
        tokio::io::AsyncWriteExt::write_all(&mut a, &wire).await.unwrap();

        let (host, consumed) = peek_client_hello(&mut b).await.unwrap();
        assert_eq!(host.as_deref(), Some("secure.example.net"));
        assert_eq!(consumed, wire);
    }

    #[tokio::test]
    async fn non_handshake_record_yields_no_name() {
        let (mut a, mut b) = tokio::io::duplex(64);
        tokio::io::AsyncWriteExt::write_all(&mut a, b"GET /certainly-not-tls")
            .await
            .unwrap();
        let (host, consumed) = peek_client_hello(&mut b).await.unwrap();
        assert_eq!(host, None);
        assert_eq!(consumed.len(), 5);
    }

    #[tokio::test]
    async fn replay_stream_serves_prefix_first() {
        let (mut a, b) = tokio::io::duplex(64);
        tokio::io::AsyncWriteExt::write_all(&mut a, b" world").await.unwrap();
        drop(a);
        let mut s = ReplayStream::new(b"hello".to_vec(), b);
        let mut out = Vec::new();
        s.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"hello world");
    }
}
