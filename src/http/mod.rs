//! Minimal HTTP/1.1 layer.
//!
//! One request per connection: the server reads a single buffer, parses it,
//! dispatches to a route handler, writes the response and closes.
//!
//! - **`connection`**: per-connection state machine over the transport
//! - **`parser`**: parses a buffered request into a [`request::Request`]
//! - **`request`**: request representation and accessors
//! - **`response`**: response construction used by handlers
//! - **`writer`**: serializes responses to wire bytes
//!
//! # Connection State Machine
//!
//! ```text
//!        ┌─────────────┐
//!        │   Reading   │ ← single read of up to 4096 bytes
//!        └──────┬──────┘
//!               │ bytes received          (nothing read → Closed)
//!               ▼
//!        ┌──────────────────┐
//!        │   Processing     │ ← route dispatch
//!        └──────┬───────────┘             (parse failure → 400)
//!               │ response ready
//!               ▼
//!        ┌──────────────────┐
//!        │    Writing       │ ← full response written
//!        └──────┬───────────┘
//!               ▼
//!             Closed
//! ```

pub mod connection;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;

/// Largest request accepted, in bytes.
pub const READ_BUFFER_SIZE: usize = 4096;

/// Header limit, shared by requests and responses.
pub const MAX_HEADERS: usize = 100;

pub const MAX_QUERY_PARAMS: usize = 50;
