//! TCP socket primitives behind opaque handles.
//!
//! A [`TcpStack`] owns every socket it creates and hands out
//! [`SocketHandle`] values. Handles come from a counter and are never
//! reused, so a handle that has been closed stays invalid for the life of
//! the stack even when the OS recycles the file descriptor.

use std::collections::HashMap;
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, Shutdown, SocketAddr, SocketAddrV4};
use std::time::Duration;

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tracing::{debug, trace};

use crate::net::error::{is_peer_closed, NetError, NetResult, Status};

/// Opaque identifier for a socket owned by a [`TcpStack`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketHandle(u64);

impl SocketHandle {
    /// The distinguished handle no socket ever has.
    pub const INVALID: SocketHandle = SocketHandle(0);

    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SocketHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which direction(s) [`TcpStack::shutdown`] closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    Receive,
    Send,
    Both,
}

impl From<ShutdownMode> for Shutdown {
    fn from(mode: ShutdownMode) -> Self {
        match mode {
            ShutdownMode::Receive => Shutdown::Read,
            ShutdownMode::Send => Shutdown::Write,
            ShutdownMode::Both => Shutdown::Both,
        }
    }
}

/// Which operations [`TcpStack::set_timeout`] applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutScope {
    Recv,
    Send,
    Both,
}

impl TimeoutScope {
    fn covers_recv(self) -> bool {
        matches!(self, TimeoutScope::Recv | TimeoutScope::Both)
    }

    fn covers_send(self) -> bool {
        matches!(self, TimeoutScope::Send | TimeoutScope::Both)
    }
}

/// Result of a single non-blocking transfer attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress<T> {
    Ready(T),
    WouldBlock,
}

/// A presentation-form address and port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub address: String,
    pub port: u16,
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self {
            address: addr.ip().to_string(),
            port: addr.port(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.address.contains(':') {
            write!(f, "[{}]:{}", self.address, self.port)
        } else {
            write!(f, "{}:{}", self.address, self.port)
        }
    }
}

/// Kernel round-trip statistics for a connected socket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConnectionQuality {
    pub rtt_ms: f32,
    pub variance_ms: f32,
}

#[derive(Debug)]
struct Entry {
    socket: Socket,
    nonblocking: bool,
}

/// Owner of all sockets created through it.
#[derive(Debug, Default)]
pub struct TcpStack {
    sockets: HashMap<SocketHandle, Entry>,
    last_handle: u64,
}

impl TcpStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of open sockets.
    pub fn len(&self) -> usize {
        self.sockets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sockets.is_empty()
    }

    pub fn contains(&self, handle: SocketHandle) -> bool {
        self.sockets.contains_key(&handle)
    }

    pub fn is_non_blocking(&self, handle: SocketHandle) -> bool {
        self.sockets
            .get(&handle)
            .map(|entry| entry.nonblocking)
            .unwrap_or(false)
    }

    /// Allocates an IPv4 TCP stream socket.
    pub fn create(&mut self) -> NetResult<SocketHandle> {
        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| NetError::from_io(Status::Socket, &e))?;

        let handle = self.insert(socket);
        debug!(handle = %handle, "socket created");
        Ok(handle)
    }

    /// Binds to an IPv4 literal. `""` and `"0.0.0.0"` mean any interface.
    pub fn bind(&mut self, handle: SocketHandle, host: &str, port: u16) -> NetResult<()> {
        let entry = self.entry(handle, Status::Bind)?;

        let ip = if host.is_empty() || host == "0.0.0.0" {
            Ipv4Addr::UNSPECIFIED
        } else {
            host.parse::<Ipv4Addr>().map_err(|_| {
                NetError::new(Status::Resolve, format!("invalid host address {host}"))
            })?
        };

        let addr = SockAddr::from(SocketAddrV4::new(ip, port));
        entry
            .socket
            .bind(&addr)
            .map_err(|e| NetError::from_io(Status::Bind, &e))?;

        debug!(handle = %handle, host = %ip, port, "socket bound");
        Ok(())
    }

    pub fn listen(&mut self, handle: SocketHandle, backlog: i32) -> NetResult<()> {
        let entry = self.entry(handle, Status::Listen)?;
        entry
            .socket
            .listen(backlog)
            .map_err(|e| NetError::from_io(Status::Listen, &e))?;

        debug!(handle = %handle, backlog, "socket listening");
        Ok(())
    }

    /// Dequeues one pending connection.
    ///
    /// A non-blocking listener with nothing pending reports
    /// [`Status::WouldBlock`] immediately.
    pub fn accept(&mut self, handle: SocketHandle) -> NetResult<SocketHandle> {
        let entry = self.entry(handle, Status::Accept)?;

        let (client, peer) = loop {
            match entry.socket.accept() {
                Ok(accepted) => break accepted,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(NetError::from_io_nonblocking(
                        Status::Accept,
                        &e,
                        entry.nonblocking,
                    ));
                }
            }
        };

        // Some platforms let accepted sockets inherit O_NONBLOCK.
        client
            .set_nonblocking(false)
            .map_err(|e| NetError::from_io(Status::Accept, &e))?;

        let client_handle = self.insert(client);
        debug!(
            listener = %handle,
            client = %client_handle,
            peer = ?peer.as_socket(),
            "accepted connection"
        );
        Ok(client_handle)
    }

    /// Active open to an IPv4 literal.
    pub fn connect(&mut self, handle: SocketHandle, host: &str, port: u16) -> NetResult<()> {
        let entry = self.entry(handle, Status::Connect)?;

        if host.is_empty() {
            return Err(NetError::new(Status::Resolve, "empty host"));
        }
        let ip = host
            .parse::<Ipv4Addr>()
            .map_err(|_| NetError::new(Status::Resolve, format!("invalid server address {host}")))?;

        let addr = SockAddr::from(SocketAddrV4::new(ip, port));
        entry
            .socket
            .connect(&addr)
            .map_err(|e| NetError::from_io_nonblocking(Status::Connect, &e, entry.nonblocking))?;

        debug!(handle = %handle, host, port, "connected");
        Ok(())
    }

    /// Writes all of `buf`, looping over short writes.
    ///
    /// On failure the error's `transferred` field holds the bytes already
    /// sent. A peer that went away is reported as [`Status::Close`].
    pub fn send(&self, handle: SocketHandle, buf: &[u8]) -> NetResult<usize> {
        let entry = self.entry(handle, Status::Send)?;
        if buf.is_empty() {
            return Err(NetError::new(Status::Send, "empty send buffer"));
        }

        let mut socket = &entry.socket;
        let mut sent = 0;
        while sent < buf.len() {
            match socket.write(&buf[sent..]) {
                Ok(0) => {
                    return Err(NetError::new(Status::Close, "connection closed by peer")
                        .with_transferred(sent));
                }
                Ok(n) => sent += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if is_peer_closed(&e) => {
                    return Err(NetError::from_io(Status::Close, &e).with_transferred(sent));
                }
                Err(e) => {
                    return Err(
                        NetError::from_io_nonblocking(Status::Send, &e, entry.nonblocking)
                            .with_transferred(sent),
                    );
                }
            }
        }

        trace!(handle = %handle, bytes = sent, "sent");
        Ok(sent)
    }

    /// Performs one read. Short reads are success; zero bytes from the OS
    /// means the peer closed and is reported as [`Status::Close`].
    pub fn recv(&self, handle: SocketHandle, buf: &mut [u8]) -> NetResult<usize> {
        let entry = self.entry(handle, Status::Recv)?;
        if buf.is_empty() {
            return Err(NetError::new(Status::Recv, "empty receive buffer"));
        }

        let mut socket = &entry.socket;
        loop {
            match socket.read(buf) {
                Ok(0) => return Err(NetError::new(Status::Close, "connection closed by peer")),
                Ok(n) => {
                    trace!(handle = %handle, bytes = n, "received");
                    return Ok(n);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(NetError::from_io_nonblocking(Status::Recv, &e, entry.nonblocking));
                }
            }
        }
    }

    /// Releases the socket. The handle is invalid afterwards.
    pub fn close(&mut self, handle: SocketHandle) -> NetResult<()> {
        match self.sockets.remove(&handle) {
            Some(entry) => {
                drop(entry.socket);
                debug!(handle = %handle, "socket closed");
                Ok(())
            }
            None => Err(invalid_handle(Status::Close)),
        }
    }

    pub fn shutdown(&self, handle: SocketHandle, mode: ShutdownMode) -> NetResult<()> {
        let entry = self.entry(handle, Status::Generic)?;
        entry
            .socket
            .shutdown(mode.into())
            .map_err(|e| NetError::from_io(Status::Generic, &e))?;

        debug!(handle = %handle, ?mode, "socket shut down");
        Ok(())
    }

    /// Applies a send and/or receive timeout. Zero clears it.
    pub fn set_timeout(
        &self,
        handle: SocketHandle,
        scope: TimeoutScope,
        milliseconds: u64,
    ) -> NetResult<()> {
        let entry = self.entry(handle, Status::Generic)?;
        let timeout = (milliseconds > 0).then(|| Duration::from_millis(milliseconds));

        if scope.covers_recv() {
            entry
                .socket
                .set_read_timeout(timeout)
                .map_err(|e| NetError::from_io(Status::Generic, &e))?;
        }
        if scope.covers_send() {
            entry
                .socket
                .set_write_timeout(timeout)
                .map_err(|e| NetError::from_io(Status::Generic, &e))?;
        }

        debug!(handle = %handle, ?scope, milliseconds, "timeout set");
        Ok(())
    }

    pub fn set_non_blocking(&mut self, handle: SocketHandle, enable: bool) -> NetResult<()> {
        let entry = self
            .sockets
            .get_mut(&handle)
            .ok_or_else(|| invalid_handle(Status::Generic))?;
        entry
            .socket
            .set_nonblocking(enable)
            .map_err(|e| NetError::from_io(Status::Generic, &e))?;
        entry.nonblocking = enable;

        debug!(handle = %handle, enable, "non-blocking mode changed");
        Ok(())
    }

    pub fn set_reuse_addr(&self, handle: SocketHandle, enabled: bool) -> NetResult<()> {
        let entry = self.entry(handle, Status::Generic)?;
        entry
            .socket
            .set_reuse_address(enabled)
            .map_err(|e| NetError::from_io(Status::Generic, &e))
    }

    pub fn local_address(&self, handle: SocketHandle) -> NetResult<Endpoint> {
        let entry = self.entry(handle, Status::Generic)?;
        let addr = entry
            .socket
            .local_addr()
            .map_err(|e| NetError::from_io(Status::Generic, &e))?;
        to_endpoint(&addr)
    }

    pub fn remote_address(&self, handle: SocketHandle) -> NetResult<Endpoint> {
        let entry = self.entry(handle, Status::Generic)?;
        let addr = entry
            .socket
            .peer_addr()
            .map_err(|e| NetError::from_io(Status::Generic, &e))?;
        to_endpoint(&addr)
    }

    pub fn peer_name(&self, handle: SocketHandle) -> NetResult<Endpoint> {
        self.remote_address(handle)
    }

    pub fn sock_name(&self, handle: SocketHandle) -> NetResult<Endpoint> {
        self.local_address(handle)
    }

    /// One send attempt for event-loop callers on non-blocking handles.
    pub fn async_send(&self, handle: SocketHandle, buf: &[u8]) -> NetResult<Progress<usize>> {
        let entry = self.entry(handle, Status::Send)?;
        let mut socket = &entry.socket;
        match socket.write(buf) {
            Ok(n) => Ok(Progress::Ready(n)),
            Err(e) if entry.nonblocking && e.kind() == io::ErrorKind::WouldBlock => {
                Ok(Progress::WouldBlock)
            }
            Err(e) if is_peer_closed(&e) => Err(NetError::from_io(Status::Close, &e)),
            Err(e) => Err(NetError::from_io(Status::Send, &e)),
        }
    }

    /// One receive attempt for event-loop callers on non-blocking handles.
    pub fn async_recv(&self, handle: SocketHandle, buf: &mut [u8]) -> NetResult<Progress<usize>> {
        let entry = self.entry(handle, Status::Recv)?;
        let mut socket = &entry.socket;
        match socket.read(buf) {
            Ok(0) if !buf.is_empty() => {
                Err(NetError::new(Status::Close, "connection closed by peer"))
            }
            Ok(n) => Ok(Progress::Ready(n)),
            Err(e) if entry.nonblocking && e.kind() == io::ErrorKind::WouldBlock => {
                Ok(Progress::WouldBlock)
            }
            Err(e) => Err(NetError::from_io(Status::Recv, &e)),
        }
    }

    /// Smoothed RTT and RTT variance from the kernel, in milliseconds.
    #[cfg(target_os = "linux")]
    pub fn connection_quality(&self, handle: SocketHandle) -> NetResult<ConnectionQuality> {
        use std::os::fd::AsRawFd;

        let entry = self.entry(handle, Status::Generic)?;
        let fd = entry.socket.as_raw_fd();

        // SAFETY: tcp_info is plain old data; all-zero is a valid value.
        let mut info: libc::tcp_info = unsafe { std::mem::zeroed() };
        let mut len = std::mem::size_of::<libc::tcp_info>() as libc::socklen_t;

        // SAFETY: fd is an open socket owned by `entry`, and `info`/`len`
        // describe a writable buffer of the size the kernel is told.
        let rc = unsafe {
            libc::getsockopt(
                fd,
                libc::IPPROTO_TCP,
                libc::TCP_INFO,
                (&mut info as *mut libc::tcp_info).cast(),
                &mut len,
            )
        };
        if rc != 0 {
            return Err(NetError::from_io(
                Status::Generic,
                &io::Error::last_os_error(),
            ));
        }

        Ok(ConnectionQuality {
            rtt_ms: info.tcpi_rtt as f32 / 1000.0,
            variance_ms: info.tcpi_rttvar as f32 / 1000.0,
        })
    }

    #[cfg(not(target_os = "linux"))]
    pub fn connection_quality(&self, _handle: SocketHandle) -> NetResult<ConnectionQuality> {
        Err(NetError::new(
            Status::Unsupported,
            "TCP statistics are not exposed on this platform",
        ))
    }

    pub(crate) fn socket(&self, handle: SocketHandle, status: Status) -> NetResult<&Socket> {
        self.entry(handle, status).map(|entry| &entry.socket)
    }

    fn entry(&self, handle: SocketHandle, status: Status) -> NetResult<&Entry> {
        self.sockets
            .get(&handle)
            .ok_or_else(|| invalid_handle(status))
    }

    fn insert(&mut self, socket: Socket) -> SocketHandle {
        self.last_handle += 1;
        let handle = SocketHandle(self.last_handle);
        self.sockets.insert(
            handle,
            Entry {
                socket,
                nonblocking: false,
            },
        );
        handle
    }
}

fn invalid_handle(status: Status) -> NetError {
    NetError::new(status, "invalid socket handle")
}

fn to_endpoint(addr: &SockAddr) -> NetResult<Endpoint> {
    addr.as_socket()
        .map(Endpoint::from)
        .ok_or_else(|| NetError::new(Status::Generic, "unknown socket family"))
}
