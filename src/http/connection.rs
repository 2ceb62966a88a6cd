use tracing::{debug, info, warn};

use crate::http::parser::parse_http_request;
use crate::http::request::Request;
use crate::http::response::Response;
use crate::http::writer::ResponseWriter;
use crate::http::READ_BUFFER_SIZE;
use crate::net::{
    NetError, NetResult, ShutdownMode, SocketHandle, Status, TcpStack, TimeoutScope, TlsOverlay,
};
use crate::server::router::Router;

/// Consecutive zero-progress writes tolerated before giving up.
const MAX_WRITE_STALLS: u32 = 3;

/// How long unread client input is drained after the response.
const LINGER_MS: u64 = 200;
const MAX_DRAIN_BYTES: usize = 64 * 1024;

/// One accepted client, served a single request-response exchange.
///
/// Traffic goes through the TLS overlay when it holds a session for the
/// handle, and through the plain stack otherwise.
pub struct Connection<'a> {
    stack: &'a mut TcpStack,
    tls: Option<&'a mut TlsOverlay>,
    handle: SocketHandle,
    router: &'a Router,
    buffer: Vec<u8>,
    state: ConnectionState,
}

#[derive(Debug)]
enum ConnectionState {
    Reading,
    Processing(Request),
    Writing(ResponseWriter),
    Closed,
}

impl<'a> Connection<'a> {
    pub fn new(
        stack: &'a mut TcpStack,
        tls: Option<&'a mut TlsOverlay>,
        handle: SocketHandle,
        router: &'a Router,
    ) -> Self {
        Self {
            stack,
            tls,
            handle,
            router,
            // One spare byte to tell an oversized request from a full one.
            buffer: vec![0; READ_BUFFER_SIZE + 1],
            state: ConnectionState::Reading,
        }
    }

    pub fn run(&mut self) -> NetResult<()> {
        loop {
            self.state = match std::mem::replace(&mut self.state, ConnectionState::Closed) {
                ConnectionState::Reading => match self.read_request() {
                    Some(n) => match parse_http_request(&self.buffer[..n]) {
                        Ok(req) => ConnectionState::Processing(req),
                        Err(e) => {
                            warn!(handle = %self.handle, error = %e, "rejecting malformed request");
                            ConnectionState::Writing(ResponseWriter::new(&Response::bad_request()))
                        }
                    },
                    None => ConnectionState::Closed,
                },

                ConnectionState::Processing(mut req) => {
                    let response = self.router.dispatch(&mut req);
                    info!(
                        method = req.method.as_str(),
                        path = %req.path,
                        status = response.status_code,
                        "request handled"
                    );
                    ConnectionState::Writing(ResponseWriter::new(&response))
                }

                ConnectionState::Writing(mut writer) => {
                    self.write_response(&mut writer)?;
                    ConnectionState::Closed
                }

                ConnectionState::Closed => break,
            };
        }

        Ok(())
    }

    /// Single read of up to one buffer. `None` means nothing usable
    /// arrived and no response should be written.
    fn read_request(&mut self) -> Option<usize> {
        let result = match self.tls.as_deref_mut() {
            Some(tls) if tls.is_enabled(self.stack, self.handle) => {
                tls.recv(self.stack, self.handle, &mut self.buffer)
            }
            _ => self.stack.recv(self.handle, &mut self.buffer),
        };

        match result {
            Ok(0) => {
                debug!(handle = %self.handle, "no request data");
                None
            }
            Ok(n) => Some(n),
            Err(e) => {
                debug!(handle = %self.handle, error = %e, "read failed");
                None
            }
        }
    }

    fn write_response(&mut self, writer: &mut ResponseWriter) -> NetResult<()> {
        let mut stalls = 0;

        while !writer.is_done() {
            let n = match self.tls.as_deref_mut() {
                Some(tls) if tls.is_enabled(self.stack, self.handle) => {
                    tls.send(self.stack, self.handle, writer.remaining())?
                }
                _ => self.stack.send(self.handle, writer.remaining())?,
            };

            if n == 0 {
                stalls += 1;
                if stalls == MAX_WRITE_STALLS {
                    let sent = writer.len() - writer.remaining().len();
                    return Err(NetError::new(Status::TryAgain, "response write stalled")
                        .with_transferred(sent));
                }
                continue;
            }

            stalls = 0;
            writer.advance(n);
        }

        Ok(())
    }

    /// Ends the TLS session if there is one and closes the socket.
    ///
    /// The send side is shut down and leftover input is drained first, so
    /// the client reads the response up to a clean end of stream.
    pub fn close(self) {
        if let Some(tls) = self.tls {
            if tls.is_enabled(self.stack, self.handle) {
                if let Err(e) = tls.disable(self.stack, self.handle) {
                    debug!(handle = %self.handle, error = %e, "TLS session already gone");
                }
            }
        }

        linger(self.stack, self.handle);

        if let Err(e) = self.stack.close(self.handle) {
            debug!(handle = %self.handle, error = %e, "connection already closed");
        }
    }
}

fn linger(stack: &TcpStack, handle: SocketHandle) {
    if stack.shutdown(handle, ShutdownMode::Send).is_err() {
        return;
    }
    if let Err(e) = stack.set_timeout(handle, TimeoutScope::Recv, LINGER_MS) {
        debug!(handle = %handle, error = %e, "skipping drain");
        return;
    }

    let mut scratch = [0u8; 1024];
    let mut drained = 0;
    while drained < MAX_DRAIN_BYTES {
        match stack.recv(handle, &mut scratch) {
            Ok(n) => drained += n,
            Err(_) => break,
        }
    }

    if drained > 0 {
        debug!(handle = %handle, bytes = drained, "discarded unread input");
    }
}
