use std::fmt;
use std::io;

/// Outcome codes shared by every socket and TLS operation.
///
/// The set is closed. `Success` exists so callers that log or count
/// outcomes have a value for the happy path; a [`NetError`] never
/// carries it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Success,
    /// Socket creation failed
    Socket,
    /// Binding to a local address failed
    Bind,
    /// Marking the socket passive failed
    Listen,
    /// Dequeuing a pending connection failed
    Accept,
    /// Active open failed
    Connect,
    Send,
    Recv,
    /// Closing failed, or the peer closed the connection
    Close,
    /// Library or context setup failed
    Setup,
    /// Address literal invalid or hostname lookup failed
    Resolve,
    Generic,
    Ssl,
    SslHandshake,
    /// No TLS session is mapped to the handle
    NoSsl,
    Unsupported,
    WouldBlock,
    /// Gave up after retrying without progress
    TryAgain,
}

impl Status {
    /// Short stable name, suitable for structured log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Success => "success",
            Status::Socket => "socket",
            Status::Bind => "bind",
            Status::Listen => "listen",
            Status::Accept => "accept",
            Status::Connect => "connect",
            Status::Send => "send",
            Status::Recv => "recv",
            Status::Close => "close",
            Status::Setup => "setup",
            Status::Resolve => "resolve",
            Status::Generic => "generic",
            Status::Ssl => "ssl",
            Status::SslHandshake => "ssl_handshake",
            Status::NoSsl => "no_ssl",
            Status::Unsupported => "unsupported",
            Status::WouldBlock => "would_block",
            Status::TryAgain => "try_again",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type NetResult<T> = Result<T, NetError>;

/// A failed operation: the portable status, the OS error number when
/// one was involved, and a human-readable message.
///
/// `transferred` records how many bytes made it across before a send
/// or receive loop failed part-way.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{status}: {message}")]
pub struct NetError {
    pub status: Status,
    pub sys_errno: Option<i32>,
    pub message: String,
    pub transferred: usize,
}

impl NetError {
    pub fn new(status: Status, message: impl Into<String>) -> Self {
        Self {
            status,
            sys_errno: None,
            message: message.into(),
            transferred: 0,
        }
    }

    /// Wraps an I/O error, keeping its OS error number and text.
    ///
    /// Would-block conditions are reported under `status` here; callers
    /// that know the handle is non-blocking use [`NetError::from_io_nonblocking`].
    pub fn from_io(status: Status, err: &io::Error) -> Self {
        Self {
            status,
            sys_errno: err.raw_os_error(),
            message: err.to_string(),
            transferred: 0,
        }
    }

    /// Like [`NetError::from_io`], but maps every would-block flavour of
    /// the OS error to [`Status::WouldBlock`] when `nonblocking` is set.
    pub fn from_io_nonblocking(status: Status, err: &io::Error, nonblocking: bool) -> Self {
        if nonblocking && is_would_block(err) {
            Self::from_io(Status::WouldBlock, err)
        } else {
            Self::from_io(status, err)
        }
    }

    pub fn with_transferred(mut self, transferred: usize) -> Self {
        self.transferred = transferred;
        self
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn is_would_block(&self) -> bool {
        self.status == Status::WouldBlock
    }
}

/// Captures the calling thread's last OS error.
///
/// On Windows this is the last Winsock error, elsewhere `errno`.
pub fn last_error() -> NetError {
    let err = io::Error::last_os_error();
    let status = if is_would_block(&err) {
        Status::WouldBlock
    } else {
        Status::Generic
    };
    NetError::from_io(status, &err)
}

pub(crate) fn is_would_block(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
}

/// Errors that mean the peer went away rather than a local failure.
pub(crate) fn is_peer_closed(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::UnexpectedEof
    )
}
