/*
 * config.rs
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

//! Server configuration. All options have working defaults; a `Server` can be
//! constructed from `ServerConfig::default()` and only the port changed.

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

/// When to apply gzip content-encoding to responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GzipMode {
    /// Never compress.
    Never,
    /// Compress whenever the client accepts gzip.
    Always,
    /// Compress only when a sample of the body actually shrinks.
    AutoDetect,
}

/// Options recognized by the server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP port to listen on.
    pub port: u16,
    /// Address to bind.
    pub bind_address: IpAddr,
    /// File uploads whose combined in-memory size would exceed this are
    /// spilled to temp files.
    pub store_file_upload_in_file_at_size: usize,
    /// Directory for upload temp files. Must already exist; the server never
    /// creates it.
    pub temp_dir: PathBuf,
    /// Timeout for reading a request once its first byte has arrived.
    pub read_timeout: Duration,
    /// Timeout for an idle keep-alive connection.
    pub keep_alive_timeout: Duration,
    /// Maximum size of the request line plus all headers.
    pub max_header_bytes: usize,
    /// Include exception details in default error pages.
    pub output_exception_information: bool,
    /// gzip policy for response bodies.
    pub use_gzip: GzipMode,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 80,
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            store_file_upload_in_file_at_size: 16 * 1024 * 1024,
            temp_dir: std::env::temp_dir(),
            read_timeout: Duration::from_secs(10),
            keep_alive_timeout: Duration::from_secs(20),
            max_header_bytes: 64 * 1024,
            output_exception_information: false,
            use_gzip: GzipMode::AutoDetect,
        }
    }
}

impl ServerConfig {
    /// Config bound to localhost on the given port. Handy for tests and
    /// embedded use.
    pub fn on_port(port: u16) -> Self {
        Self {
            port,
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = ServerConfig::default();
        assert_eq!(c.store_file_upload_in_file_at_size, 16 * 1024 * 1024);
        assert_eq!(c.read_timeout, Duration::from_secs(10));
        assert_eq!(c.keep_alive_timeout, Duration::from_secs(20));
        assert_eq!(c.max_header_bytes, 64 * 1024);
        assert_eq!(c.use_gzip, GzipMode::AutoDetect);
        assert!(!c.output_exception_information);
    }
}
