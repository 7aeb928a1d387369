/*
 * lib.rs
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

//! Portinaio: an embeddable HTTP/1.0 and HTTP/1.1 server library.
//!
//! A `Server` accepts TCP (optionally TLS) connections, parses each request
//! into a `Request`, routes it through registered `Hook`s (or a custom
//! handler), and writes the handler's `Response` back, honoring keep-alive,
//! chunked transfer-encoding, ranged replies, and gzip. Bodies are parsed
//! for url-encoded and multipart/form-data content, with large file uploads
//! spilled to temp files.

pub mod body;
pub mod config;
pub mod content;
pub mod error;
pub mod h1;
pub mod headers;
pub mod request;
pub mod resolver;
pub mod response;
pub mod server;
pub mod tls;
pub mod url;
pub mod util;

pub use config::{GzipMode, ServerConfig};
pub use content::Content;
pub use error::HttpError;
pub use request::{FieldMap, FileUpload, HttpVersion, Method, Request, UploadStorage};
pub use resolver::{DuplicateHook, Hook, HookHandler, HookSet, Protocols, UrlResolver};
pub use response::{reason_phrase, Response, SetCookie};
pub use server::{ErrorHandler, RequestHandler, Server, Stats};
pub use tls::{peek_client_hello, BoxedStream, ReplayStream, RustlsProvider, ServerStream, TlsProvider};
pub use url::Url;
