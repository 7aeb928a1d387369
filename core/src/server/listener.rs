/*
 * listener.rs
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

//! Accept loop. Accepted sockets are optionally wrapped by the TLS provider
//! and handed to a connection worker; no HTTP bytes are touched here. The
//! loop exits on the first shutdown signal, dropping the listening socket.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

use crate::server::{ServerShared, ShutdownMode};
use crate::tls::BoxedStream;

pub(crate) async fn accept_loop(listener: TcpListener, shared: Arc<ServerShared>) {
    let mut shutdown_rx = shared.shutdown.subscribe();
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() != ShutdownMode::Run {
                    break;
                }
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((socket, peer)) => spawn_worker(socket, peer, shared.clone()),
                    Err(e) => {
                        // Transient accept errors (e.g. EMFILE) should not
                        // kill the listener.
                        warn!("accept failed: {}", e);
                    }
                }
            }
        }
    }
    debug!("listener closed");
}

fn spawn_worker(socket: TcpStream, peer: SocketAddr, shared: Arc<ServerShared>) {
    shared.open_connections.fetch_add(1, Ordering::SeqCst);
    tokio::spawn(async move {
        let provider = shared.tls.read().unwrap().clone();
        let secure = provider.is_some();
        let stream: BoxedStream = match provider {
            Some(tls) => match tls.wrap(socket).await {
                Ok(s) => s,
                Err(e) => {
                    debug!("TLS handshake with {} failed: {}", peer, e);
                    shared.connection_closed();
                    return;
                }
            },
            None => Box::new(socket),
        };
        super::connection::ConnectionWorker::new(stream, peer, secure, shared.clone())
            .run()
            .await;
        shared.connection_closed();
    });
}
