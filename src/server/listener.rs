use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::http::connection::Connection;
use crate::net::{
    platform, NetError, NetResult, SocketHandle, Status, TcpStack, TimeoutScope, TlsOverlay,
};
use crate::server::router::Router;

pub const BACKLOG: i32 = 10;

const WAKE_TIMEOUT: Duration = Duration::from_millis(500);

/// Send/receive timeout on accepted clients, so a silent peer cannot stall
/// the accept loop forever.
pub const CLIENT_TIMEOUT_MS: u64 = 30_000;

/// Blocking HTTP server: accepts one connection at a time, serves one
/// request on it and closes it.
pub struct Server {
    stack: TcpStack,
    tls: Option<TlsOverlay>,
    router: Router,
    listener: SocketHandle,
    port: u16,
    running: Arc<AtomicBool>,
}

/// Stops a running [`Server`] from another thread.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    running: Arc<AtomicBool>,
    port: u16,
}

impl ServerHandle {
    /// Clears the running flag and wakes the blocked accept with a
    /// throwaway loopback connection.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, self.port));
        if let Err(e) = TcpStream::connect_timeout(&addr, WAKE_TIMEOUT) {
            debug!(port = self.port, error = %e, "wake-up connection failed");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Server {
    /// Binds `0.0.0.0:port` with address reuse and starts listening.
    /// Port 0 picks an ephemeral port; see [`Server::local_port`].
    pub fn bind(port: u16, router: Router) -> NetResult<Self> {
        platform::init()?;

        let mut stack = TcpStack::new();
        let listener = stack.create()?;
        stack.set_reuse_addr(listener, true)?;
        stack
            .bind(listener, "0.0.0.0", port)
            .inspect_err(|e| error!(port, error = %e, "bind failed"))?;
        stack.listen(listener, BACKLOG)?;

        let port = stack.local_address(listener)?.port;
        info!(port, routes = router.len(), "server bound");

        Ok(Self {
            stack,
            tls: None,
            router,
            listener,
            port,
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Serves every connection over TLS using the given PEM files.
    pub fn with_tls(mut self, cert_path: impl AsRef<Path>, key_path: impl AsRef<Path>) -> NetResult<Self> {
        let mut tls = TlsOverlay::new();
        tls.init(cert_path, key_path)?;
        self.tls = Some(tls);
        Ok(self)
    }

    pub fn local_port(&self) -> u16 {
        self.port
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            running: Arc::clone(&self.running),
            port: self.port,
        }
    }

    /// Sockets still open in the server's stack.
    pub fn open_sockets(&self) -> usize {
        self.stack.len()
    }

    pub fn tls_sessions(&self) -> usize {
        self.tls
            .as_ref()
            .map_or(0, |tls| tls.session_count(&self.stack))
    }

    /// Accept loop. Returns once [`ServerHandle::stop`] is called, after
    /// closing the listener.
    pub fn run(&mut self) -> NetResult<()> {
        if !self.stack.contains(self.listener) {
            return Err(NetError::new(Status::Listen, "server already stopped"));
        }

        info!(port = self.port, tls = self.tls.is_some(), "HTTP server listening");

        while self.running.load(Ordering::SeqCst) {
            let client = match self.stack.accept(self.listener) {
                Ok(client) => client,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            };

            if !self.running.load(Ordering::SeqCst) {
                let _ = self.stack.close(client);
                break;
            }

            self.serve(client);
        }

        if let Some(tls) = self.tls.as_mut() {
            tls.cleanup();
        }
        self.stack.close(self.listener)?;
        platform::cleanup()?;
        info!(port = self.port, "HTTP server stopped");
        Ok(())
    }

    fn serve(&mut self, client: SocketHandle) {
        if let Ok(peer) = self.stack.remote_address(client) {
            debug!(handle = %client, peer = %peer, "accepted connection");
        }

        if let Err(e) = self.stack.set_timeout(client, TimeoutScope::Both, CLIENT_TIMEOUT_MS) {
            warn!(handle = %client, error = %e, "could not set client timeout");
        }

        if let Some(tls) = self.tls.as_mut() {
            if let Err(e) = tls.server_accept(&self.stack, client) {
                warn!(handle = %client, error = %e, "TLS handshake failed");
                let _ = self.stack.close(client);
                return;
            }
        }

        let mut conn = Connection::new(&mut self.stack, self.tls.as_mut(), client, &self.router);
        if let Err(e) = conn.run() {
            warn!(handle = %client, error = %e, "connection error");
        }
        conn.close();
    }
}

/// Binds `port` and serves `router` until stopped.
pub fn start_server(port: u16, router: Router) -> NetResult<()> {
    Server::bind(port, router)?.run()
}
