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

//! Server façade: lifecycle (start, gentle or brutal stop), handler and
//! error-handler slots, hook registration, and stats. Dispatch goes to the
//! configured handler, or to the built-in URL resolver when none is set.

pub mod connection;
pub mod listener;

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use tokio::net::TcpListener;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::ServerConfig;
use crate::error::HttpError;
use crate::request::Request;
use crate::resolver::{DuplicateHook, Hook, UrlResolver};
use crate::response::Response;
use crate::tls::TlsProvider;

/// Top-level request handler. Must produce a response; failures are raised
/// as `HttpError` and go through the error-handler path.
pub trait RequestHandler: Send + Sync {
    fn handle(&self, request: &mut Request) -> Result<Response, HttpError>;
}

impl<F> RequestHandler for F
where
    F: Fn(&mut Request) -> Result<Response, HttpError> + Send + Sync,
{
    fn handle(&self, request: &mut Request) -> Result<Response, HttpError> {
        self(request)
    }
}

impl RequestHandler for UrlResolver {
    fn handle(&self, request: &mut Request) -> Result<Response, HttpError> {
        self.resolve(request)
    }
}

/// User error handler. Receives the same request object and the caught
/// error. Returning `Ok(None)` or failing falls back to the default page.
pub trait ErrorHandler: Send + Sync {
    fn handle(
        &self,
        request: &mut Request,
        error: &HttpError,
    ) -> Result<Option<Response>, HttpError>;
}

impl<F> ErrorHandler for F
where
    F: Fn(&mut Request, &HttpError) -> Result<Option<Response>, HttpError> + Send + Sync,
{
    fn handle(
        &self,
        request: &mut Request,
        error: &HttpError,
    ) -> Result<Option<Response>, HttpError> {
        self(request, error)
    }
}

/// Server lifecycle phase, broadcast to workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    Run,
    /// Stop accepting; idle workers close, busy ones finish their request.
    Gentle,
    /// Additionally abandon worker sockets.
    Brutal,
}

/// Snapshot of the request counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub active_handlers: usize,
    pub keep_alive_handlers: usize,
}

/// State shared between the façade, the listener, and connection workers.
pub(crate) struct ServerShared {
    pub config: ServerConfig,
    pub handler: RwLock<Option<Arc<dyn RequestHandler>>>,
    pub error_handler: RwLock<Option<Arc<dyn ErrorHandler>>>,
    pub resolver: Arc<UrlResolver>,
    pub tls: RwLock<Option<Arc<dyn TlsProvider>>>,
    pub active_handlers: AtomicUsize,
    pub keep_alive_handlers: AtomicUsize,
    pub open_connections: AtomicUsize,
    pub shutdown: watch::Sender<ShutdownMode>,
    pub drained: Notify,
}

impl ServerShared {
    pub fn new(config: ServerConfig) -> Arc<Self> {
        let (shutdown, _) = watch::channel(ShutdownMode::Run);
        Arc::new(Self {
            config,
            handler: RwLock::new(None),
            error_handler: RwLock::new(None),
            resolver: Arc::new(UrlResolver::new()),
            tls: RwLock::new(None),
            active_handlers: AtomicUsize::new(0),
            keep_alive_handlers: AtomicUsize::new(0),
            open_connections: AtomicUsize::new(0),
            shutdown,
            drained: Notify::new(),
        })
    }

    /// The configured handler, or the built-in resolver.
    pub fn current_handler(&self) -> Arc<dyn RequestHandler> {
        match self.handler.read().unwrap().clone() {
            Some(h) => h,
            None => self.resolver.clone(),
        }
    }

    pub fn current_error_handler(&self) -> Option<Arc<dyn ErrorHandler>> {
        self.error_handler.read().unwrap().clone()
    }

    pub fn shutdown_mode(&self) -> ShutdownMode {
        *self.shutdown.borrow()
    }

    /// Called by a worker when it exits; wakes `stop` once the last one is
    /// gone.
    pub fn connection_closed(&self) {
        if self.open_connections.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
    }
}

/// An embeddable HTTP/1.0 and HTTP/1.1 server.
pub struct Server {
    shared: Arc<ServerShared>,
    accept_task: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            shared: ServerShared::new(config),
            accept_task: None,
            local_addr: None,
        }
    }

    /// Replace the top-level handler. Without one, requests go to the hook
    /// resolver.
    pub fn set_handler(&self, handler: impl RequestHandler + 'static) {
        *self.shared.handler.write().unwrap() = Some(Arc::new(handler));
    }

    /// Install a user error handler.
    pub fn set_error_handler(&self, handler: impl ErrorHandler + 'static) {
        *self.shared.error_handler.write().unwrap() = Some(Arc::new(handler));
    }

    /// Configure TLS for the listening port.
    pub fn set_tls_provider(&self, provider: Arc<dyn TlsProvider>) {
        *self.shared.tls.write().unwrap() = Some(provider);
    }

    /// Register a hook with the built-in resolver.
    pub fn add_hook(&self, hook: Hook) -> Result<(), DuplicateHook> {
        self.shared.resolver.add(hook)
    }

    /// Remove the hook with this exact matcher.
    pub fn remove_hook(&self, hook: &Hook) -> bool {
        self.shared.resolver.remove(hook)
    }

    pub fn stats(&self) -> Stats {
        Stats {
            active_handlers: self.shared.active_handlers.load(Ordering::SeqCst),
            keep_alive_handlers: self.shared.keep_alive_handlers.load(Ordering::SeqCst),
        }
    }

    /// Bind the listening socket and start accepting.
    pub async fn start(&mut self) -> io::Result<()> {
        let addr = SocketAddr::new(self.shared.config.bind_address, self.shared.config.port);
        let listener = TcpListener::bind(addr).await?;
        self.local_addr = Some(listener.local_addr()?);
        info!("listening on {}", self.local_addr.unwrap());
        let shared = self.shared.clone();
        self.accept_task = Some(tokio::spawn(listener::accept_loop(listener, shared)));
        Ok(())
    }

    /// Bound address, available after `start` (useful with port 0).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Stop the server. Gentle: no new connections, idle connections close,
    /// in-flight requests finish. Brutal: worker sockets are abandoned too.
    /// Resolves once the last worker has returned.
    pub async fn stop(&mut self, brutal: bool) {
        let mode = if brutal {
            ShutdownMode::Brutal
        } else {
            ShutdownMode::Gentle
        };
        let _ = self.shared.shutdown.send(mode);
        if let Some(task) = self.accept_task.take() {
            let _ = task.await;
        }
        loop {
            let notified = self.shared.drained.notified();
            if self.shared.open_connections.load(Ordering::SeqCst) == 0 {
                break;
            }
            notified.await;
        }
        info!("shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_slot_falls_back_to_resolver() {
        let shared = ServerShared::new(ServerConfig::on_port(0));
        // Resolver with no hooks: dispatch yields 404.
        let handler = shared.current_handler();
        let headers = crate::headers::RequestHeaders::from_raw(vec![(
            "Host".to_string(),
            "localhost".to_string(),
        )]);
        let mut req = Request::new(
            crate::request::Method::Get,
            crate::request::HttpVersion::Http11,
            crate::url::Url::from_wire(false, "localhost", "/"),
            headers,
            "127.0.0.1:1".parse().unwrap(),
        );
        assert!(matches!(
            handler.handle(&mut req),
            Err(HttpError::NotFound)
        ));
    }

    #[test]
    fn stats_start_at_zero() {
        let server = Server::new(ServerConfig::on_port(0));
        let stats = server.stats();
        assert_eq!(stats.active_handlers, 0);
        assert_eq!(stats.keep_alive_handlers, 0);
    }
}
