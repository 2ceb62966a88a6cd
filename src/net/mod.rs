//! Portable TCP transport with optional TLS.
//!
//! - **`error`**: status codes and the OS error detail carried by failures
//! - **`platform`**: networking stack startup/teardown, address helpers
//! - **`socket`**: socket primitives behind never-reused handles
//! - **`tls`**: TLS sessions mapped onto socket handles
//!
//! # Example
//!
//! ```no_run
//! use netcore::net::{TcpStack, TimeoutScope};
//!
//! # fn main() -> netcore::net::NetResult<()> {
//! let mut stack = TcpStack::new();
//! let client = stack.create()?;
//! stack.set_timeout(client, TimeoutScope::Both, 5_000)?;
//! stack.connect(client, "127.0.0.1", 8080)?;
//! stack.send(client, b"GET / HTTP/1.1\r\n\r\n")?;
//!
//! let mut buf = [0u8; 4096];
//! let n = stack.recv(client, &mut buf)?;
//! println!("{}", String::from_utf8_lossy(&buf[..n]));
//! stack.close(client)?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod platform;
pub mod socket;
pub mod tls;

pub use error::{last_error, NetError, NetResult, Status};
pub use platform::{address_kind, is_valid_address, resolve_hostname, AddressKind};
pub use socket::{
    ConnectionQuality, Endpoint, Progress, ShutdownMode, SocketHandle, TcpStack, TimeoutScope,
};
pub use tls::{TlsContext, TlsOverlay, MAX_SSL_CONNECTIONS};
