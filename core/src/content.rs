/*
 * content.rs
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

//! Response body producers. Buffered and stream content have a known length
//! and are seekable, so they support `Content-Length` framing and ranged
//! replies. Dynamic content is a lazy chunk iterator of unknown length and
//! forces chunked transfer-encoding.

use std::fmt;
use std::io;
use std::path::Path;

use tokio::io::{AsyncRead, AsyncSeek};

/// Seekable byte source with a length known up front (e.g. `tokio::fs::File`).
pub trait SeekableSource: AsyncRead + AsyncSeek + Send + Unpin {}

impl<T: AsyncRead + AsyncSeek + Send + Unpin> SeekableSource for T {}

/// A response body.
pub enum Content {
    /// No body.
    Empty,
    /// Owned bytes; length known, seekable by slicing.
    Buffered(Vec<u8>),
    /// Byte source with known length, seekable.
    Stream {
        source: Box<dyn SeekableSource>,
        len: u64,
    },
    /// Lazy chunk iterator; unknown length, not seekable.
    Dynamic(Box<dyn Iterator<Item = Vec<u8>> + Send>),
}

impl Content {
    pub fn text(s: impl Into<String>) -> Self {
        Content::Buffered(s.into().into_bytes())
    }

    pub fn bytes(b: impl Into<Vec<u8>>) -> Self {
        Content::Buffered(b.into())
    }

    /// Open a file as stream content. The length is taken from metadata at
    /// open time.
    pub async fn file(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = tokio::fs::File::open(path).await?;
        let len = file.metadata().await?.len();
        Ok(Content::Stream {
            source: Box::new(file),
            len,
        })
    }

    /// Wrap a chunk iterator as dynamic content.
    pub fn dynamic<I>(iter: I) -> Self
    where
        I: Iterator<Item = Vec<u8>> + Send + 'static,
    {
        Content::Dynamic(Box::new(iter))
    }

    /// Known length, or None for dynamic content.
    pub fn len(&self) -> Option<u64> {
        match self {
            Content::Empty => Some(0),
            Content::Buffered(b) => Some(b.len() as u64),
            Content::Stream { len, .. } => Some(*len),
            Content::Dynamic(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, Content::Dynamic(_))
    }
}

impl Default for Content {
    fn default() -> Self {
        Content::Empty
    }
}

impl fmt::Debug for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Content::Empty => write!(f, "Content::Empty"),
            Content::Buffered(b) => write!(f, "Content::Buffered({} bytes)", b.len()),
            Content::Stream { len, .. } => write!(f, "Content::Stream({} bytes)", len),
            Content::Dynamic(_) => write!(f, "Content::Dynamic"),
        }
    }
}
