//! Route table and the blocking accept loop.

pub mod listener;
pub mod router;

pub use listener::{start_server, Server, ServerHandle};
pub use router::{match_route, Router, RouterError};
