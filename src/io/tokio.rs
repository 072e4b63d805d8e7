// Copyright 2023 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! Implementation of the Tokio I/O provider.

// NOTE: In this provider, I/O error handling is generally to exit the
// task. The run_with_respawning function acts as a supervisor that will
// respawn the TCP acceptors, possibly after a delay, if they exit with
// an error or a panic.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;

use crate::db::Database;
use crate::engine::Term;
use crate::server::{Request, Server};
use crate::util::decode_text;

use super::{DEFAULT_READ_TIMEOUT, MAX_REQUEST_LEN};

/// A Tokio I/O provider.
///
/// This provider uses asynchronous I/O and runs the server by spawning
/// tasks on a Tokio runtime: one per listening socket, and one per
/// accepted connection. Queries themselves run on Tokio's blocking
/// thread pool, since the engine and the database are synchronous.
///
/// The `TokioIoProvider` supports graceful shutdown. To initiate a
/// graceful shutdown, use the [`TokioShutdownController`] returned by
/// [`TokioIoProvider::start`].
pub struct TokioIoProvider {
    tcp_listeners: Vec<TcpListener>,
    read_timeout: Duration,
}

impl TokioIoProvider {
    /// Creates a new `TokioIoProvider`. This call binds TCP sockets in
    /// preparation, but does not start the server. This function
    /// requires that the Tokio runtime be active.
    pub async fn bind<T>(tcp_addrs: T) -> io::Result<Self>
    where
        T: IntoIterator<Item = SocketAddr>,
    {
        let mut tcp_listeners = Vec::new();
        for addr in tcp_addrs {
            let listener = TcpListener::bind(addr).await?;
            tcp_listeners.push(listener);
        }
        Ok(Self {
            tcp_listeners,
            read_timeout: DEFAULT_READ_TIMEOUT,
        })
    }

    /// Sets how long a client has to send its request line.
    pub fn set_read_timeout(&mut self, read_timeout: Duration) {
        self.read_timeout = read_timeout;
    }

    /// Returns the addresses the provider is bound to.
    pub fn local_addrs(&self) -> io::Result<Vec<SocketAddr>> {
        self.tcp_listeners
            .iter()
            .map(TcpListener::local_addr)
            .collect()
    }

    /// Starts the server on the active Tokio runtime.
    ///
    /// This spawns tasks on the active Tokio runtime and then returns
    /// a [`TokioShutdownController`] that can be used to shut down the
    /// tasks at a later time. (The [`TokioShutdownController`] must be
    /// held as long as the server should be running, since dropping it
    /// will trigger shutdown.)
    pub fn start<D>(self, server: &Arc<Server<D>>) -> TokioShutdownController
    where
        D: Database + 'static,
    {
        let (shutdown_controller, shutdown_handle) = make_shutdown_channels();
        for tcp_listener in self.tcp_listeners {
            let listener = Listener {
                socket: Arc::new(tcp_listener),
                read_timeout: self.read_timeout,
            };
            tokio::spawn(run_with_respawning(
                run_tcp_listener,
                shutdown_handle.clone(),
                server.clone(),
                listener,
            ));
        }
        shutdown_controller
    }
}

/// A listening socket and the settings of its connections.
#[derive(Clone)]
struct Listener {
    socket: Arc<TcpListener>,
    read_timeout: Duration,
}

/// How long to wait between respawns of a task. This is to prevent
/// tasks that crash immediately from using up significant CPU time.
const TASK_RESPAWN_DELAY: Duration = Duration::from_secs(1);

/// Runs a Tokio task, respawning it if it returns an I/O error, is
/// cancelled, or panics.
async fn run_with_respawning<F, G, D, S>(
    f: F,
    mut shutdown: ShutdownHandle,
    server: Arc<Server<D>>,
    socket: S,
) where
    F: Fn(ShutdownHandle, Arc<Server<D>>, S) -> G,
    G: Future<Output = io::Result<()>> + Send + 'static,
    S: Clone,
{
    loop {
        let last_spawn_time = Instant::now();
        match tokio::spawn(f(shutdown.clone(), server.clone(), socket.clone())).await {
            Ok(Ok(())) => return,
            Ok(Err(e)) => log_io_error(e),
            Err(_) => (), // The task panicked or was cancelled.
        }

        // If necessary, wait before respawning, but receive shutdown
        // requests immediately.
        let since_last_spawn = Instant::now().duration_since(last_spawn_time);
        if let Some(duration_to_wait) = TASK_RESPAWN_DELAY.checked_sub(since_last_spawn) {
            tokio::select! {
                _ = shutdown.request_receiver.recv() => return,
                _ = tokio::time::sleep(duration_to_wait) => (),
            }
        }
    }
}

/// The TCP listener/accept loop.
async fn run_tcp_listener<D>(
    mut shutdown: ShutdownHandle,
    server: Arc<Server<D>>,
    listener: Listener,
) -> io::Result<()>
where
    D: Database + 'static,
{
    loop {
        let (client, client_socket_addr) = tokio::select! {
            _ = shutdown.request_receiver.recv() => return Ok(()),
            res = listener.socket.accept() => res?,
        };
        debug!("Accepted a connection from {}.", client_socket_addr);
        let shutdown = shutdown.clone();
        let server = server.clone();
        let read_timeout = listener.read_timeout;
        tokio::spawn(async move {
            if let Err(e) = handle_tcp_connection(shutdown, server, client, read_timeout).await {
                log_io_error(e);
            }
        });
    }
}

/// Handles a TCP connection: reads the request line, writes the
/// answer to each of its terms, and closes the connection.
async fn handle_tcp_connection<D>(
    mut shutdown: ShutdownHandle,
    server: Arc<Server<D>>,
    mut socket: TcpStream,
    read_timeout: Duration,
) -> io::Result<()>
where
    D: Database + 'static,
{
    let (reader, mut writer) = socket.split();
    let mut reader = BufReader::new(reader.take(MAX_REQUEST_LEN));
    let mut line = Vec::new();
    match timeout(read_timeout, reader.read_until(b'\n', &mut line)).await {
        Ok(Ok(0)) => return Ok(()),  // The connection was closed.
        Ok(Ok(_)) => (),
        Ok(Err(e)) => return Err(e), // There was an I/O error.
        Err(_) => return Ok(()),     // The operation timed out.
    }
    let request = Arc::new(Request::parse(&decode_text(&line)));

    if let Some(primer) = server.primer() {
        writer.write_all(primer.as_bytes()).await?;
    }
    let terms: Vec<Term> = request.terms().collect();
    for term in terms {
        // We won't continue to service this connection if we are
        // shutting down.
        if matches!(
            shutdown.request_receiver.try_recv(),
            Err(broadcast::error::TryRecvError::Closed)
        ) {
            break;
        }

        let server = server.clone();
        let request = request.clone();
        let answer = tokio::task::spawn_blocking(move || server.answer(&request, &term)).await;
        match answer {
            Ok(answer) => writer.write_all(answer.as_bytes()).await?,
            Err(e) => {
                error!("Query task failed: {}", e);
                writer.write_all(b"% Internal error\n\n").await?;
            }
        }
    }
    writer.shutdown().await
}

/// Controls the shutdown of a server's Tokio tasks.
///
/// This type is used to shut down the Tokio tasks spawned by
/// [`TokioIoProvider::start`]. Use
/// [`TokioShutdownController::shut_down`] or its blocking variant,
/// [`TokioShutdownController::blocking_shut_down`], to initiate
/// shutdown and wait for its completion. Dropping the controller will
/// also trigger shutdown (but will not wait for it to complete).
#[must_use]
pub struct TokioShutdownController {
    request_sender: broadcast::Sender<()>,
    wait_receiver: mpsc::Receiver<()>,
}

impl TokioShutdownController {
    /// Requests that running server tasks shut down, and then waits for
    /// them to terminate.
    pub async fn shut_down(mut self) {
        drop(self.request_sender);
        let _ = self.wait_receiver.recv().await;
    }

    /// The blocking variant of [`TokioShutdownController::shut_down`].
    pub fn blocking_shut_down(mut self) {
        drop(self.request_sender);
        let _ = self.wait_receiver.blocking_recv();
    }
}

/// A handle held by tasks to interact with the graceful shutdown
/// mechanism.
///
/// This type has two roles:
///
/// 1. It enables tasks to listen for graceful shutdown signals. This
///    is done by waiting for all senders attached to `request_receiver`
///    to close.
/// 2. It prevents graceful shutdown from completing until it is
///    dropped. This is done by holding `wait_sender`. All server tasks,
///    including those answering a connection, therefore own a
///    `ShutdownHandle`.
struct ShutdownHandle {
    request_receiver: broadcast::Receiver<()>,
    #[allow(dead_code)]
    wait_sender: mpsc::Sender<()>,
}

impl Clone for ShutdownHandle {
    fn clone(&self) -> Self {
        // A resubscribed receiver misses values already queued, but no
        // values are ever sent: the signal is all senders being dropped.
        ShutdownHandle {
            request_receiver: self.request_receiver.resubscribe(),
            wait_sender: self.wait_sender.clone(),
        }
    }
}

/// Produces a [`TokioShutdownController`] and an initial
/// [`ShutdownHandle`] connected to it.
fn make_shutdown_channels() -> (TokioShutdownController, ShutdownHandle) {
    let (request_sender, request_receiver) = broadcast::channel(1);
    let (wait_sender, wait_receiver) = mpsc::channel(1);
    let controller = TokioShutdownController {
        request_sender,
        wait_receiver,
    };
    let handle = ShutdownHandle {
        request_receiver,
        wait_sender,
    };
    (controller, handle)
}

/// Logs an I/O error.
fn log_io_error(e: io::Error) {
    error!("I/O error: {e}");
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use lazy_static::lazy_static;
    use regex::Regex;
    use tempfile::TempDir;

    use super::*;
    use crate::engine::tests::make_database;
    use crate::engine::{Engine, EngineConfig};

    lazy_static! {
        static ref PADDING: Regex = Regex::new(r"(?m)^([A-Za-z0-9-]+): +").unwrap();
    }

    async fn serve(
        objects: &[&str],
        read_timeout: Duration,
    ) -> (TempDir, SocketAddr, TokioShutdownController) {
        let (dir, database) = make_database(objects);
        let engine = Engine::new(database, EngineConfig::default()).unwrap();
        let server = Arc::new(Server::new(Arc::new(engine)));
        let mut provider = TokioIoProvider::bind([SocketAddr::from(([127, 0, 0, 1], 0))])
            .await
            .unwrap();
        provider.set_read_timeout(read_timeout);
        let addr = provider.local_addrs().unwrap()[0];
        (dir, addr, provider.start(&server))
    }

    /// Sends a request and returns the response, with the padding
    /// between keys and values collapsed to a single space.
    async fn whois(addr: SocketAddr, request: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        PADDING.replace_all(&response, "$1: ").into_owned()
    }

    const PERSON: &str = "person: John Doe\nnic-hdl: JD1-TEST\nsource: TEST\n";

    #[tokio::test]
    async fn exact_handle_lookup() {
        let (_dir, addr, controller) = serve(&[PERSON], DEFAULT_READ_TIMEOUT).await;
        let response = whois(addr, "JD1-TEST\n").await;
        assert!(response.starts_with("% Information related to 'JD1-TEST'\n\n"));
        assert!(response.contains("person: John Doe\n"));
        assert!(response.contains("source: TEST\n"));
        controller.shut_down().await;
    }

    #[tokio::test]
    async fn longest_prefix_inetnum() {
        let (_dir, addr, controller) = serve(
            &[
                "inetnum: 10.0.0.0/8\nnetname: A\n",
                "inetnum: 10.1.0.0/16\nnetname: B\n",
            ],
            DEFAULT_READ_TIMEOUT,
        )
        .await;
        let response = whois(addr, "10.1.2.3\n").await;
        assert!(response.starts_with("% Information related to '10.1.0.0/16'\n\n"));
        assert!(response.contains("netname: B\n"));
        assert!(!response.contains("netname: A\n"));
        controller.shut_down().await;
    }

    #[tokio::test]
    async fn route_lookup_with_related() {
        let (_dir, addr, controller) = serve(
            &[
                "route: 192.0.2.0/24\norigin: AS64512\nmnt-by: EX-MNT\n",
                "mntner: EX-MNT\nadmin-c: JD1-TEST\n",
                PERSON,
            ],
            DEFAULT_READ_TIMEOUT,
        )
        .await;
        let response = whois(addr, "192.0.2.0/24\n").await;
        let route = response.find("route: 192.0.2.0/24\n").unwrap();
        let mntner = response.find("mntner: EX-MNT\n").unwrap();
        let person = response.find("person: John Doe\n").unwrap();
        assert!(route < mntner && mntner < person);
        assert_eq!(response.matches("% Information related to").count(), 1);
        controller.shut_down().await;
    }

    #[tokio::test]
    async fn as_block_containment() {
        let (_dir, addr, controller) =
            serve(&["as-block: AS64512 - AS65534\n"], DEFAULT_READ_TIMEOUT).await;
        let response = whois(addr, "AS64600\n").await;
        assert!(response.starts_with("% Information related to 'AS64512 - AS65534'\n\n"));
        assert!(response.contains("as-block: AS64512 - AS65534\n"));
        controller.shut_down().await;
    }

    #[tokio::test]
    async fn reverse_domain_augmentation() {
        let (_dir, addr, controller) = serve(
            &[
                "inetnum: 192.0.2.0/24\nnetname: DOC\n",
                "domain: 2.0.192.in-addr.arpa\nnserver: ns.example\n",
            ],
            DEFAULT_READ_TIMEOUT,
        )
        .await;
        let response = whois(addr, "-d 192.0.2.0/24\n").await;
        assert!(response.contains("inetnum: 192.0.2.0/24\n"));
        assert!(response.contains("domain: 2.0.192.in-addr.arpa\nnserver: ns.example\n"));

        let response = whois(addr, "192.0.2.0/24\n").await;
        assert!(!response.contains("domain:"));
        controller.shut_down().await;
    }

    #[tokio::test]
    async fn abuse_contact_via_organisation() {
        let (_dir, addr, controller) = serve(
            &[
                "inetnum: 198.51.100.0/24\norg: ORG-EX1\n",
                "organisation: ORG-EX1\nabuse-c: AB1\n",
                "role: Abuse Desk\nnic-hdl: AB1\nabuse-mailbox: abuse@example.net\n",
            ],
            DEFAULT_READ_TIMEOUT,
        )
        .await;
        let response = whois(addr, "198.51.100.5\n").await;
        assert!(response.starts_with(
            "% Abuse contact for '198.51.100.0/24' is 'abuse@example.net'\n\n\
             % Information related to '198.51.100.0/24'\n\n"
        ));
        controller.shut_down().await;
    }

    #[tokio::test]
    async fn unmatched_terms_and_idle_clients() {
        let (_dir, addr, controller) = serve(&[PERSON], Duration::from_millis(100)).await;
        let response = whois(addr, "-r NOBODY JD1-TEST\n").await;
        assert!(response.starts_with("% No matching objects found\n\n% Information related"));

        // A client that never sends a request is disconnected.
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        assert!(response.is_empty());
        controller.shut_down().await;
    }
}
