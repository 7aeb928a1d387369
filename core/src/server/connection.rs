/*
 * connection.rs
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

//! Per-connection worker. Owns the stream and its read buffer and drives one
//! request at a time: read head, read body, invoke handler, write response,
//! then loop while keep-alive holds. Every failure path ends in either a
//! wire response or a clean close; nothing propagates out of `run`. A brutal
//! shutdown or a peer disconnect mid-response is logged at most once.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::watch;
use tracing::debug;

use crate::body::BodyParser;
use crate::error::HttpError;
use crate::h1::writer::{write_response, WriteContext};
use crate::h1::{ChunkedDecoder, RequestParser};
use crate::headers::RequestHeaders;
use crate::request::{HttpVersion, Request};
use crate::response::Response;
use crate::server::{ServerShared, ShutdownMode};
use crate::tls::BoxedStream;
use crate::url::Url;

enum Flow {
    KeepAlive,
    Close,
}

enum ReadOutcome {
    Data,
    Eof,
    Timeout,
    Aborted,
    Failed(std::io::Error),
}

enum BodyFailure {
    /// Answerable with an error response.
    Http(HttpError),
    /// Stream is unusable; just close.
    Io,
}

pub(crate) struct ConnectionWorker {
    stream: BoxedStream,
    buf: BytesMut,
    peer: SocketAddr,
    secure: bool,
    shared: Arc<ServerShared>,
    shutdown_rx: watch::Receiver<ShutdownMode>,
    io_error_logged: bool,
}

impl ConnectionWorker {
    pub fn new(
        stream: BoxedStream,
        peer: SocketAddr,
        secure: bool,
        shared: Arc<ServerShared>,
    ) -> Self {
        let shutdown_rx = shared.shutdown.subscribe();
        Self {
            stream,
            buf: BytesMut::with_capacity(8 * 1024),
            peer,
            secure,
            shared,
            shutdown_rx,
            io_error_logged: false,
        }
    }

    pub async fn run(mut self) {
        loop {
            match self.serve_one().await {
                Flow::KeepAlive
                    if self.shared.shutdown_mode() == ShutdownMode::Run => {}
                _ => break,
            }
        }
        let _ = self.stream.shutdown().await;
        debug!("connection with {} closed", self.peer);
    }

    async fn serve_one(&mut self) -> Flow {
        // IDLE until the first byte of the next request. Gentle shutdown
        // closes idle connections immediately.
        if self.buf.is_empty() {
            let _keep_alive = Gauge::keep_alive(&self.shared);
            match self
                .read_more(self.shared.config.keep_alive_timeout, true)
                .await
            {
                ReadOutcome::Data => {}
                _ => return Flow::Close,
            }
        }
        let _active = Gauge::active(&self.shared);

        // READING_REQUEST: drive the head parser.
        let mut parser = RequestParser::new(self.shared.config.max_header_bytes);
        let head = loop {
            match parser.receive(&mut self.buf) {
                Ok(Some(head)) => break head,
                Ok(None) => {}
                Err(e) => return self.finish_with_error(HttpVersion::Http11, e).await,
            }
            match self.read_more(self.shared.config.read_timeout, false).await {
                ReadOutcome::Data => {}
                ReadOutcome::Eof | ReadOutcome::Timeout | ReadOutcome::Aborted => {
                    return Flow::Close
                }
                ReadOutcome::Failed(e) => {
                    self.log_io_error(&e);
                    return Flow::Close;
                }
            }
        };

        let version = head.version;
        let headers = RequestHeaders::from_raw(head.raw_headers);
        if version == HttpVersion::Http11 && headers.host.is_none() {
            return self
                .finish_with_error(version, HttpError::bad_request("missing Host header"))
                .await;
        }
        let host = headers.host.clone().unwrap_or_default();
        let url = Url::from_wire(self.secure, &host, &head.target);
        let mut request = Request::new(head.method, version, url, headers, self.peer);

        if head.method.has_body() {
            if let Err(failure) = self.read_body(&mut request).await {
                return match failure {
                    BodyFailure::Http(e) => self.finish_with_error(version, e).await,
                    BodyFailure::Io => Flow::Close,
                };
            }
        }

        // INVOKING_HANDLER
        let response = match self.shared.current_handler().handle(&mut request) {
            Ok(response) => response,
            Err(error) => self.error_response(&mut request, error),
        };

        // WRITING_RESPONSE
        let ctx = WriteContext::from_request(&request);
        let keep = self.write(&ctx, response).await;
        request.run_cleanup();
        if keep {
            Flow::KeepAlive
        } else {
            Flow::Close
        }
    }

    /// Read the request body, feed it through the body parser, and attach
    /// the result to the request together with temp-file cleanups.
    async fn read_body(&mut self, request: &mut Request) -> Result<(), BodyFailure> {
        let (chunked, content_length, expect_continue, content_type, boundary) = {
            let h = request.headers();
            (
                h.transfer_encoding_chunked,
                h.content_length,
                h.expect_100_continue,
                h.content_type.clone(),
                h.content_multipart_boundary.clone(),
            )
        };
        if !chunked && content_length.is_none() {
            return Err(BodyFailure::Http(HttpError::LengthRequired));
        }

        if expect_continue && request.version() == HttpVersion::Http11 {
            if let Err(e) = self.write_continue().await {
                self.log_io_error(&e);
                return Err(BodyFailure::Io);
            }
        }

        let mut parser = BodyParser::for_content_type(
            content_type.as_ref(),
            boundary.as_deref(),
            &self.shared.config.temp_dir,
            self.shared.config.store_file_upload_in_file_at_size,
        )
        .map_err(BodyFailure::Http)?;

        let fed = if chunked {
            self.feed_chunked(&mut parser).await
        } else {
            self.feed_sized(&mut parser, content_length.unwrap_or(0)).await
        };
        if let Err(failure) = fed {
            discard_temp_files(parser);
            return Err(failure);
        }

        let parsed = parser.finish().map_err(BodyFailure::Http)?;
        let temp: Vec<PathBuf> = parsed
            .uploads
            .iter()
            .filter_map(|(_, u)| u.disk_path().cloned())
            .collect();
        request.set_body(parsed.fields, parsed.uploads);
        for path in temp {
            request.register_cleanup(Box::new(move || std::fs::remove_file(&path)));
        }
        Ok(())
    }

    async fn feed_sized(
        &mut self,
        parser: &mut BodyParser,
        len: u64,
    ) -> Result<(), BodyFailure> {
        let mut remaining = len;
        loop {
            if remaining > 0 && !self.buf.is_empty() {
                let take = (remaining.min(self.buf.len() as u64)) as usize;
                let bytes = self.buf.split_to(take);
                parser.receive(&bytes).map_err(BodyFailure::Http)?;
                remaining -= take as u64;
            }
            if remaining == 0 {
                return Ok(());
            }
            match self.read_more(self.shared.config.read_timeout, false).await {
                ReadOutcome::Data => {}
                ReadOutcome::Eof => {
                    return Err(BodyFailure::Http(HttpError::bad_request(
                        "body shorter than Content-Length",
                    )))
                }
                ReadOutcome::Timeout | ReadOutcome::Aborted => return Err(BodyFailure::Io),
                ReadOutcome::Failed(e) => {
                    self.log_io_error(&e);
                    return Err(BodyFailure::Io);
                }
            }
        }
    }

    async fn feed_chunked(&mut self, parser: &mut BodyParser) -> Result<(), BodyFailure> {
        let mut decoder = ChunkedDecoder::new();
        loop {
            let mut decoded = Vec::new();
            let done = decoder
                .decode(&mut self.buf, &mut decoded)
                .map_err(BodyFailure::Http)?;
            if !decoded.is_empty() {
                parser.receive(&decoded).map_err(BodyFailure::Http)?;
            }
            if done {
                return Ok(());
            }
            match self.read_more(self.shared.config.read_timeout, false).await {
                ReadOutcome::Data => {}
                ReadOutcome::Eof => {
                    return Err(BodyFailure::Http(HttpError::bad_request(
                        "chunked body truncated",
                    )))
                }
                ReadOutcome::Timeout | ReadOutcome::Aborted => return Err(BodyFailure::Io),
                ReadOutcome::Failed(e) => {
                    self.log_io_error(&e);
                    return Err(BodyFailure::Io);
                }
            }
        }
    }

    async fn write_continue(&mut self) -> std::io::Result<()> {
        self.stream
            .write_all(b"HTTP/1.1 100 Continue\r\n\r\n")
            .await?;
        self.stream.flush().await
    }

    /// Run the user error handler, falling back to the default page. An
    /// error inside the error handler keeps the original status; a declined
    /// response becomes a 500.
    fn error_response(&self, request: &mut Request, error: HttpError) -> Response {
        if let Some(handler) = self.shared.current_error_handler() {
            match handler.handle(request, &error) {
                Ok(Some(response)) => return response,
                Ok(None) => return self.default_error_page(500, &error),
                Err(second) => {
                    debug!("error handler failed: {}", second);
                    return self.default_error_page(error.status_code(), &error);
                }
            }
        }
        self.default_error_page(error.status_code(), &error)
    }

    fn default_error_page(&self, status: u16, error: &HttpError) -> Response {
        let details = if self.shared.config.output_exception_information {
            Some(error.to_string())
        } else {
            None
        };
        Response::error_page(status, None, details.as_deref())
    }

    /// Write the default page for a request-level error and close.
    async fn finish_with_error(&mut self, version: HttpVersion, error: HttpError) -> Flow {
        let response = self.default_error_page(error.status_code(), &error);
        let ctx = WriteContext::bare(version);
        let _ = self.write(&ctx, response).await;
        Flow::Close
    }

    /// Write a response; swallow stream failures. Returns keep-alive.
    async fn write(&mut self, ctx: &WriteContext, response: Response) -> bool {
        let gzip = self.shared.config.use_gzip;
        let stream = &mut self.stream;
        let rx = &mut self.shutdown_rx;
        let result = tokio::select! {
            r = write_response(stream, ctx, response, gzip) => Some(r),
            _ = wait_shutdown(rx, false) => None,
        };
        match result {
            Some(Ok(keep)) => keep,
            Some(Err(e)) => {
                self.log_io_error(&e);
                false
            }
            None => false,
        }
    }

    /// Read into the buffer, bounded by a timeout and the shutdown signal.
    /// With `gentle_aborts` any shutdown aborts the wait (idle state);
    /// otherwise only a brutal one does.
    async fn read_more(&mut self, limit: Duration, gentle_aborts: bool) -> ReadOutcome {
        let mut tmp = [0u8; 8 * 1024];
        let stream = &mut self.stream;
        let rx = &mut self.shutdown_rx;
        tokio::select! {
            r = tokio::time::timeout(limit, stream.read(&mut tmp)) => match r {
                Err(_) => ReadOutcome::Timeout,
                Ok(Ok(0)) => ReadOutcome::Eof,
                Ok(Ok(n)) => {
                    self.buf.extend_from_slice(&tmp[..n]);
                    ReadOutcome::Data
                }
                Ok(Err(e)) => ReadOutcome::Failed(e),
            },
            _ = wait_shutdown(rx, gentle_aborts) => ReadOutcome::Aborted,
        }
    }

    fn log_io_error(&mut self, e: &std::io::Error) {
        if !self.io_error_logged {
            self.io_error_logged = true;
            debug!("connection with {}: {}", self.peer, e);
        }
    }
}

/// Resolve once the shutdown mode reaches the watched severity.
async fn wait_shutdown(rx: &mut watch::Receiver<ShutdownMode>, gentle_counts: bool) {
    loop {
        let triggered = match *rx.borrow() {
            ShutdownMode::Run => false,
            ShutdownMode::Gentle => gentle_counts,
            ShutdownMode::Brutal => true,
        };
        if triggered {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Delete temp files of a body parse that will not reach the request.
fn discard_temp_files(parser: BodyParser) {
    if let Ok(parsed) = parser.finish() {
        for (_, upload) in parsed.uploads {
            if let Some(path) = upload.disk_path() {
                let _ = std::fs::remove_file(path);
            }
        }
    }
}

/// Counter guard for the stats gauges.
struct Gauge {
    shared: Arc<ServerShared>,
    keep_alive: bool,
}

impl Gauge {
    fn active(shared: &Arc<ServerShared>) -> Self {
        shared.active_handlers.fetch_add(1, Ordering::SeqCst);
        Self {
            shared: shared.clone(),
            keep_alive: false,
        }
    }

    fn keep_alive(shared: &Arc<ServerShared>) -> Self {
        shared.keep_alive_handlers.fetch_add(1, Ordering::SeqCst);
        Self {
            shared: shared.clone(),
            keep_alive: true,
        }
    }
}

impl Drop for Gauge {
    fn drop(&mut self) {
        let counter = if self.keep_alive {
            &self.shared.keep_alive_handlers
        } else {
            &self.shared.active_handlers
        };
        counter.fetch_sub(1, Ordering::SeqCst);
    }
}
