//! Opt-in TLS on top of [`TcpStack`] handles.
//!
//! TLS state lives in a side table keyed by [`SocketHandle`] so the plain
//! socket API never sees it. The table is the only owner of each session;
//! removing an entry destroys the session.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::sign::CertifiedKey;
use rustls::{ClientConfig, ClientConnection, RootCertStore, ServerConfig, ServerConnection};
use socket2::Socket;
use tracing::{debug, info, warn};

use crate::net::error::{is_peer_closed, NetError, NetResult, Status};
use crate::net::socket::{SocketHandle, TcpStack};

/// Capacity of the socket-to-session table.
pub const MAX_SSL_CONNECTIONS: usize = 256;

/// Server and client configurations built from one certificate chain.
#[derive(Debug, Clone)]
pub struct TlsContext {
    server: Arc<ServerConfig>,
    client: Arc<ClientConfig>,
}

impl TlsContext {
    /// Loads a PEM certificate chain and private key and checks that the
    /// key belongs to the leaf certificate.
    pub fn load(cert_path: &Path, key_path: &Path) -> NetResult<Self> {
        let chain = load_certs(cert_path)?;
        let key = load_key(key_path)?;

        let provider = Arc::new(rustls::crypto::ring::default_provider());

        let signing_key = provider
            .key_provider
            .load_private_key(key.clone_key())
            .map_err(ssl_error)?;
        CertifiedKey::new(chain.clone(), signing_key)
            .keys_match()
            .map_err(|e| {
                NetError::new(
                    Status::Ssl,
                    format!("private key does not match certificate: {e}"),
                )
            })?;

        let server = ServerConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(|e| NetError::new(Status::Setup, e.to_string()))?
            .with_no_client_auth()
            .with_single_cert(chain.clone(), key)
            .map_err(ssl_error)?;

        // Trust the public roots plus our own chain, so a process can open
        // TLS connections to its own listener.
        let mut roots = RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let (trusted, _) = roots.add_parsable_certificates(chain);
        debug!(trusted, "added own certificate chain to client roots");

        let client = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| NetError::new(Status::Setup, e.to_string()))?
            .with_root_certificates(roots)
            .with_no_client_auth();

        Ok(Self {
            server: Arc::new(server),
            client: Arc::new(client),
        })
    }
}

enum Session {
    Client(ClientConnection),
    Server(ServerConnection),
}

macro_rules! with_conn {
    ($session:expr, $conn:ident => $body:expr) => {
        match $session {
            Session::Client($conn) => $body,
            Session::Server($conn) => $body,
        }
    };
}

impl Session {
    fn is_handshaking(&self) -> bool {
        with_conn!(self, conn => conn.is_handshaking())
    }

    fn wants_write(&self) -> bool {
        with_conn!(self, conn => conn.wants_write())
    }

    fn complete_io(&mut self, io: &mut &Socket) -> io::Result<(usize, usize)> {
        with_conn!(self, conn => conn.complete_io(io))
    }

    fn read_tls(&mut self, io: &mut &Socket) -> io::Result<usize> {
        with_conn!(self, conn => conn.read_tls(io))
    }

    fn write_tls(&mut self, io: &mut &Socket) -> io::Result<usize> {
        with_conn!(self, conn => conn.write_tls(io))
    }

    fn process_new_packets(&mut self) -> Result<(), rustls::Error> {
        with_conn!(self, conn => conn.process_new_packets().map(|_| ()))
    }

    fn read_plaintext(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        with_conn!(self, conn => conn.reader().read(buf))
    }

    fn write_plaintext(&mut self, buf: &[u8]) -> io::Result<usize> {
        with_conn!(self, conn => conn.writer().write(buf))
    }

    fn send_close_notify(&mut self) {
        with_conn!(self, conn => conn.send_close_notify())
    }

    fn handshake(&mut self, socket: &Socket) -> io::Result<()> {
        let mut io = socket;
        while self.is_handshaking() {
            self.complete_io(&mut io)?;
        }
        Ok(())
    }

    /// Pushes every queued TLS record to the socket.
    fn flush(&mut self, socket: &Socket) -> io::Result<()> {
        let mut io = socket;
        while self.wants_write() {
            match self.write_tls(&mut io) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

enum ReadOutcome {
    Data(usize),
    Transient,
    Closed,
    Failed(NetError),
}

/// Shared TLS context plus the socket-to-session table.
#[derive(Default)]
pub struct TlsOverlay {
    context: Option<TlsContext>,
    sessions: HashMap<SocketHandle, Session>,
}

impl TlsOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the shared context. Calling it again once a context exists
    /// is a no-op.
    pub fn init(&mut self, cert_path: impl AsRef<Path>, key_path: impl AsRef<Path>) -> NetResult<()> {
        if self.context.is_some() {
            return Ok(());
        }

        let cert_path = cert_path.as_ref();
        let context = TlsContext::load(cert_path, key_path.as_ref()).inspect_err(|e| {
            warn!(cert = %cert_path.display(), error = %e, "TLS context setup failed");
        })?;

        self.context = Some(context);
        self.sessions.clear();
        info!(cert = %cert_path.display(), "TLS context initialized");
        Ok(())
    }

    /// Drops the context and every session still mapped.
    pub fn cleanup(&mut self) {
        self.sessions.clear();
        if self.context.take().is_some() {
            info!("TLS context destroyed");
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.context.is_some()
    }

    /// Whether `handle` is an open socket with a mapped session.
    pub fn is_enabled(&self, stack: &TcpStack, handle: SocketHandle) -> bool {
        stack.contains(handle) && self.sessions.contains_key(&handle)
    }

    /// Sessions whose socket is still open in `stack`.
    pub fn session_count(&self, stack: &TcpStack) -> usize {
        self.sessions
            .keys()
            .filter(|handle| stack.contains(**handle))
            .count()
    }

    /// Destroys the sessions of sockets closed through the plain stack and
    /// returns how many were dropped.
    pub fn prune(&mut self, stack: &TcpStack) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|handle, _| stack.contains(*handle));

        let dropped = before - self.sessions.len();
        if dropped > 0 {
            debug!(dropped, "dropped TLS sessions of closed sockets");
        }
        dropped
    }

    /// Maps a new server-side session to `handle` without handshaking.
    /// The first send or receive drives the handshake.
    pub fn enable(&mut self, stack: &TcpStack, handle: SocketHandle) -> NetResult<()> {
        let config = self.context()?.server.clone();
        stack.socket(handle, Status::Generic)?;
        self.ensure_capacity(stack, handle)?;

        let conn = ServerConnection::new(config).map_err(ssl_error)?;
        self.sessions.insert(handle, Session::Server(conn));
        debug!(handle = %handle, "TLS enabled");
        Ok(())
    }

    /// Server-side handshake on an accepted connection.
    pub fn server_accept(&mut self, stack: &TcpStack, handle: SocketHandle) -> NetResult<()> {
        let config = self.context()?.server.clone();
        let socket = stack.socket(handle, Status::Generic)?;
        self.ensure_capacity(stack, handle)?;

        let mut session = Session::Server(ServerConnection::new(config).map_err(ssl_error)?);
        session
            .handshake(socket)
            .map_err(|e| NetError::from_io(Status::SslHandshake, &e))?;

        self.sessions.insert(handle, session);
        debug!(handle = %handle, "TLS server handshake complete");
        Ok(())
    }

    /// Client-side handshake, sending `sni_host` as Server Name Indication.
    pub fn client_connect(
        &mut self,
        stack: &TcpStack,
        handle: SocketHandle,
        sni_host: &str,
    ) -> NetResult<()> {
        let config = self.context()?.client.clone();
        if sni_host.is_empty() {
            return Err(NetError::new(Status::Resolve, "empty SNI host"));
        }
        let socket = stack.socket(handle, Status::Generic)?;
        self.ensure_capacity(stack, handle)?;

        let server_name = ServerName::try_from(sni_host.to_owned())
            .map_err(|e| NetError::new(Status::Ssl, format!("invalid SNI host {sni_host}: {e}")))?;
        let mut session = Session::Client(
            ClientConnection::new(config, server_name).map_err(ssl_error)?,
        );
        session
            .handshake(socket)
            .map_err(|e| NetError::from_io(Status::SslHandshake, &e))?;

        self.sessions.insert(handle, session);
        debug!(handle = %handle, sni = sni_host, "TLS client handshake complete");
        Ok(())
    }

    /// Encrypts and writes `buf`.
    ///
    /// When the socket cannot take more right now the call returns
    /// `Ok(n)` with the bytes accepted so far; the caller retries with the
    /// rest.
    pub fn send(&mut self, stack: &TcpStack, handle: SocketHandle, buf: &[u8]) -> NetResult<usize> {
        if buf.is_empty() {
            return Err(NetError::new(Status::Send, "empty send buffer"));
        }
        let socket = stack.socket(handle, Status::Send);
        let session = self.session_mut(stack, handle)?;
        let socket = socket?;

        if session.is_handshaking() {
            match session.handshake(socket) {
                Ok(()) => {}
                Err(e) if is_transient(&e) => return Ok(0),
                Err(e) if is_peer_closed(&e) => return Err(NetError::from_io(Status::Close, &e)),
                Err(e) => return Err(NetError::from_io(Status::SslHandshake, &e)),
            }
        }

        let mut sent = 0;
        while sent < buf.len() {
            let n = session
                .write_plaintext(&buf[sent..])
                .map_err(|e| NetError::from_io(Status::Send, &e).with_transferred(sent))?;
            sent += n;

            match session.flush(socket) {
                Ok(()) if n == 0 => return Ok(sent),
                Ok(()) => {}
                Err(e) if is_transient(&e) => return Ok(sent),
                Err(e) if is_peer_closed(&e) || e.kind() == io::ErrorKind::WriteZero => {
                    return Err(NetError::from_io(Status::Close, &e).with_transferred(sent));
                }
                Err(e) => return Err(NetError::from_io(Status::Send, &e).with_transferred(sent)),
            }
        }

        Ok(sent)
    }

    /// One decrypted read.
    ///
    /// `Ok(0)` means no application data was available yet. A clean close
    /// by the peer destroys the session, closes the socket and reports
    /// [`Status::Close`].
    pub fn recv(
        &mut self,
        stack: &mut TcpStack,
        handle: SocketHandle,
        buf: &mut [u8],
    ) -> NetResult<usize> {
        if buf.is_empty() {
            return Err(NetError::new(Status::Recv, "empty receive buffer"));
        }

        let outcome = {
            let socket = stack.socket(handle, Status::Recv);
            let session = self.session_mut(stack, handle)?;
            read_some(session, socket?, buf)
        };

        match outcome {
            ReadOutcome::Data(n) => Ok(n),
            ReadOutcome::Transient => Ok(0),
            ReadOutcome::Closed => {
                self.sessions.remove(&handle);
                let _ = stack.close(handle);
                debug!(handle = %handle, "TLS peer closed connection");
                Err(NetError::new(Status::Close, "TLS connection closed by peer"))
            }
            ReadOutcome::Failed(err) => Err(err),
        }
    }

    /// Sends close-notify, destroys the session and closes the socket.
    /// The socket is closed even when close-notify cannot be delivered.
    pub fn close(&mut self, stack: &mut TcpStack, handle: SocketHandle) -> NetResult<()> {
        let Some(mut session) = self.sessions.remove(&handle) else {
            let _ = stack.close(handle);
            return Err(NetError::new(Status::NoSsl, "no TLS session for socket"));
        };

        if let Ok(socket) = stack.socket(handle, Status::Close) {
            close_notify(&mut session, socket);
        }
        drop(session);

        stack.close(handle)
    }

    /// Like [`TlsOverlay::close`] but leaves the socket open.
    pub fn disable(&mut self, stack: &TcpStack, handle: SocketHandle) -> NetResult<()> {
        let Some(mut session) = self.sessions.remove(&handle) else {
            return Err(NetError::new(Status::NoSsl, "no TLS session for socket"));
        };

        if let Ok(socket) = stack.socket(handle, Status::Close) {
            close_notify(&mut session, socket);
        }
        debug!(handle = %handle, "TLS disabled");
        Ok(())
    }

    fn context(&self) -> NetResult<&TlsContext> {
        self.context
            .as_ref()
            .ok_or_else(|| NetError::new(Status::Setup, "TLS context not initialized"))
    }

    fn ensure_capacity(&mut self, stack: &TcpStack, handle: SocketHandle) -> NetResult<()> {
        self.prune(stack);
        if !self.sessions.contains_key(&handle) && self.sessions.len() >= MAX_SSL_CONNECTIONS {
            return Err(NetError::new(Status::Ssl, "SSL mapping table full"));
        }
        Ok(())
    }

    /// Looks up the session for `handle`, dropping it if the socket was
    /// closed through the plain path.
    fn session_mut(&mut self, stack: &TcpStack, handle: SocketHandle) -> NetResult<&mut Session> {
        if !stack.contains(handle) && self.sessions.remove(&handle).is_some() {
            debug!(handle = %handle, "dropped TLS session of closed socket");
        }
        self.sessions
            .get_mut(&handle)
            .ok_or_else(|| NetError::new(Status::NoSsl, "no TLS session for socket"))
    }
}

fn read_some(session: &mut Session, socket: &Socket, buf: &mut [u8]) -> ReadOutcome {
    if session.is_handshaking() {
        match session.handshake(socket) {
            Ok(()) => {}
            Err(e) if is_transient(&e) => return ReadOutcome::Transient,
            Err(e) if is_peer_closed(&e) => return ReadOutcome::Closed,
            Err(e) => return ReadOutcome::Failed(NetError::from_io(Status::SslHandshake, &e)),
        }
    }

    let mut io = socket;
    loop {
        match session.read_plaintext(buf) {
            Ok(0) => return ReadOutcome::Closed,
            Ok(n) => return ReadOutcome::Data(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return ReadOutcome::Closed,
            Err(e) => return ReadOutcome::Failed(NetError::from_io(Status::Recv, &e)),
        }

        match session.read_tls(&mut io) {
            Ok(0) => return ReadOutcome::Closed,
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if is_transient(&e) => return ReadOutcome::Transient,
            Err(e) => return ReadOutcome::Failed(NetError::from_io(Status::Recv, &e)),
        }

        if let Err(e) = session.process_new_packets() {
            // Deliver the alert rustls queued for the peer.
            let _ = session.flush(socket);
            return ReadOutcome::Failed(NetError::new(Status::Recv, e.to_string()));
        }
        if let Err(e) = session.flush(socket) {
            if !is_transient(&e) {
                return ReadOutcome::Failed(NetError::from_io(Status::Recv, &e));
            }
        }
    }
}

fn close_notify(session: &mut Session, socket: &Socket) {
    session.send_close_notify();
    if let Err(e) = session.flush(socket) {
        debug!(error = %e, "close-notify not delivered");
    }
}

/// Conditions where retrying later can succeed: non-blocking would-block
/// and socket timeouts.
fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

fn load_certs(path: &Path) -> NetResult<Vec<CertificateDer<'static>>> {
    let file = File::open(path).map_err(|e| NetError::from_io(Status::Ssl, &e))?;
    let chain = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| NetError::from_io(Status::Ssl, &e))?;

    if chain.is_empty() {
        return Err(NetError::new(
            Status::Ssl,
            format!("no certificates found in {}", path.display()),
        ));
    }
    Ok(chain)
}

fn load_key(path: &Path) -> NetResult<PrivateKeyDer<'static>> {
    let file = File::open(path).map_err(|e| NetError::from_io(Status::Ssl, &e))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| NetError::from_io(Status::Ssl, &e))?
        .ok_or_else(|| {
            NetError::new(
                Status::Ssl,
                format!("no private key found in {}", path.display()),
            )
        })
}

fn ssl_error(err: rustls::Error) -> NetError {
    NetError::new(Status::Ssl, err.to_string())
}
