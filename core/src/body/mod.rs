/*
 * mod.rs
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

//! Request body parsing. The connection worker removes the transfer framing
//! (Content-Length or chunked) and pushes plain body bytes here; dispatch on
//! the declared content type decides how they are interpreted.

pub mod multipart;
pub mod urlencoded;

use std::path::Path;

pub use multipart::{MultipartParser, ParsedBody};
pub use urlencoded::UrlEncodedParser;

use crate::error::HttpError;
use crate::headers::BodyContentType;

/// Push parser for one request body. Unrecognized content types are drained
/// without interpretation; the handler can still see the raw headers.
pub enum BodyParser {
    UrlEncoded(UrlEncodedParser),
    Multipart(MultipartParser),
    Ignore,
}

impl BodyParser {
    /// Pick a parser for the declared content type. Multipart requires the
    /// boundary extracted from the Content-Type header.
    pub fn for_content_type(
        content_type: Option<&BodyContentType>,
        boundary: Option<&str>,
        temp_dir: &Path,
        spill_threshold: usize,
    ) -> Result<Self, HttpError> {
        match content_type {
            Some(BodyContentType::UrlEncoded) => {
                Ok(BodyParser::UrlEncoded(UrlEncodedParser::new()))
            }
            Some(BodyContentType::MultipartFormData) => {
                let boundary = boundary
                    .ok_or_else(|| HttpError::bad_request("multipart without boundary"))?;
                Ok(BodyParser::Multipart(MultipartParser::new(
                    boundary,
                    temp_dir,
                    spill_threshold,
                )?))
            }
            None => Ok(BodyParser::Ignore),
        }
    }

    pub fn receive(&mut self, data: &[u8]) -> Result<(), HttpError> {
        match self {
            BodyParser::UrlEncoded(p) => {
                p.receive(data);
                Ok(())
            }
            BodyParser::Multipart(p) => p.receive(data),
            BodyParser::Ignore => Ok(()),
        }
    }

    pub fn finish(self) -> Result<ParsedBody, HttpError> {
        match self {
            BodyParser::UrlEncoded(p) => Ok(ParsedBody {
                fields: p.finish(),
                uploads: Vec::new(),
            }),
            BodyParser::Multipart(p) => p.close(),
            BodyParser::Ignore => Ok(ParsedBody::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urlencoded_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = BodyParser::for_content_type(
            Some(&BodyContentType::UrlEncoded),
            None,
            dir.path(),
            1024,
        )
        .unwrap();
        p.receive(b"a=1&b=2").unwrap();
        let parsed = p.finish().unwrap();
        assert_eq!(parsed.fields.get("a").unwrap(), &["1"]);
        assert!(parsed.uploads.is_empty());
    }

    #[test]
    fn multipart_requires_boundary() {
        let dir = tempfile::tempdir().unwrap();
        assert!(BodyParser::for_content_type(
            Some(&BodyContentType::MultipartFormData),
            None,
            dir.path(),
            1024,
        )
        .is_err());
    }

    #[test]
    fn unknown_type_drained() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = BodyParser::for_content_type(None, None, dir.path(), 1024).unwrap();
        p.receive(b"opaque bytes").unwrap();
        let parsed = p.finish().unwrap();
        assert!(parsed.fields.is_empty());
    }
}
