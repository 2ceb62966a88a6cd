use std::path::PathBuf;
use std::thread;

use netcore::net::{MAX_SSL_CONNECTIONS, Status, TcpStack, TimeoutScope, TlsOverlay};
use tempfile::TempDir;

struct Identity {
    _dir: TempDir,
    cert: PathBuf,
    key: PathBuf,
}

fn identity() -> Identity {
    let dir = tempfile::tempdir().unwrap();
    let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();

    let cert = dir.path().join("cert.pem");
    let key = dir.path().join("key.pem");
    std::fs::write(&cert, generated.cert.pem()).unwrap();
    std::fs::write(&key, generated.key_pair.serialize_pem()).unwrap();

    Identity { _dir: dir, cert, key }
}

fn initialized(id: &Identity) -> TlsOverlay {
    let mut tls = TlsOverlay::new();
    tls.init(&id.cert, &id.key).unwrap();
    tls
}

#[test]
fn test_init_missing_files() {
    let mut tls = TlsOverlay::new();
    let err = tls.init("/nonexistent/cert.pem", "/nonexistent/key.pem").unwrap_err();

    assert_eq!(err.status(), Status::Ssl);
    assert!(!tls.is_initialized());
}

#[test]
fn test_init_rejects_mismatched_key() {
    let a = identity();
    let b = identity();

    let mut tls = TlsOverlay::new();
    assert_eq!(tls.init(&a.cert, &b.key).unwrap_err().status(), Status::Ssl);
}

#[test]
fn test_init_rejects_empty_cert_file() {
    let id = identity();
    let empty = id._dir.path().join("empty.pem");
    std::fs::write(&empty, "").unwrap();

    let mut tls = TlsOverlay::new();
    assert_eq!(tls.init(&empty, &id.key).unwrap_err().status(), Status::Ssl);
}

#[test]
fn test_init_is_idempotent_and_cleanup_resets() {
    let id = identity();
    let mut tls = initialized(&id);

    tls.init("/nonexistent/cert.pem", "/nonexistent/key.pem").unwrap();
    assert!(tls.is_initialized());

    tls.cleanup();
    assert!(!tls.is_initialized());
}

#[test]
fn test_enable_requires_context() {
    let mut stack = TcpStack::new();
    let handle = stack.create().unwrap();
    let mut tls = TlsOverlay::new();

    assert_eq!(tls.enable(&stack, handle).unwrap_err().status(), Status::Setup);
}

#[test]
fn test_enable_then_close_removes_mapping() {
    let id = identity();
    let mut tls = initialized(&id);
    let mut stack = TcpStack::new();
    let handle = stack.create().unwrap();

    tls.enable(&stack, handle).unwrap();
    assert!(tls.is_enabled(&stack, handle));
    assert_eq!(tls.session_count(&stack), 1);

    tls.close(&mut stack, handle).unwrap();
    assert!(!tls.is_enabled(&stack, handle));
    assert_eq!(tls.session_count(&stack), 0);
    assert!(!stack.contains(handle));
}

#[test]
fn test_close_without_session_still_closes_socket() {
    let id = identity();
    let mut tls = initialized(&id);
    let mut stack = TcpStack::new();
    let handle = stack.create().unwrap();

    assert_eq!(tls.close(&mut stack, handle).unwrap_err().status(), Status::NoSsl);
    assert!(!stack.contains(handle));
}

#[test]
fn test_plain_close_prunes_session() {
    let id = identity();
    let mut tls = initialized(&id);
    let mut stack = TcpStack::new();
    let handle = stack.create().unwrap();
    tls.enable(&stack, handle).unwrap();

    stack.close(handle).unwrap();
    assert!(!tls.is_enabled(&stack, handle));
    assert_eq!(tls.session_count(&stack), 0);
    assert_eq!(tls.send(&stack, handle, b"x").unwrap_err().status(), Status::NoSsl);
}

#[test]
fn test_plain_closes_do_not_exhaust_session_table() {
    let id = identity();
    let mut tls = initialized(&id);
    let mut stack = TcpStack::new();

    for _ in 0..MAX_SSL_CONNECTIONS + 10 {
        let handle = stack.create().unwrap();
        tls.enable(&stack, handle).unwrap();
        stack.close(handle).unwrap();
    }
    assert!(stack.is_empty());
    assert_eq!(tls.session_count(&stack), 0);

    let fresh = stack.create().unwrap();
    tls.enable(&stack, fresh).unwrap();
    assert!(tls.is_enabled(&stack, fresh));
    assert_eq!(tls.session_count(&stack), 1);
}

#[test]
fn test_prune_drops_only_closed_sockets() {
    let id = identity();
    let mut tls = initialized(&id);
    let mut stack = TcpStack::new();
    let kept = stack.create().unwrap();
    let closed = stack.create().unwrap();
    tls.enable(&stack, kept).unwrap();
    tls.enable(&stack, closed).unwrap();

    stack.close(closed).unwrap();
    assert_eq!(tls.prune(&stack), 1);
    assert_eq!(tls.prune(&stack), 0);
    assert!(tls.is_enabled(&stack, kept));
}

#[test]
fn test_disable_keeps_socket_open() {
    let id = identity();
    let mut tls = initialized(&id);
    let mut stack = TcpStack::new();
    let handle = stack.create().unwrap();
    tls.enable(&stack, handle).unwrap();

    tls.disable(&stack, handle).unwrap();
    assert!(!tls.is_enabled(&stack, handle));
    assert!(stack.contains(handle));
    assert_eq!(tls.disable(&stack, handle).unwrap_err().status(), Status::NoSsl);
}

#[test]
fn test_enable_on_unknown_handle() {
    let id = identity();
    let mut tls = initialized(&id);
    let mut stack = TcpStack::new();
    let handle = stack.create().unwrap();
    stack.close(handle).unwrap();

    assert!(tls.enable(&stack, handle).is_err());
    assert_eq!(tls.session_count(&stack), 0);
}

#[test]
fn test_client_connect_needs_sni() {
    let id = identity();
    let mut tls = initialized(&id);
    let mut stack = TcpStack::new();
    let handle = stack.create().unwrap();

    assert_eq!(
        tls.client_connect(&stack, handle, "").unwrap_err().status(),
        Status::Resolve
    );
}

#[test]
fn test_session_table_capacity() {
    let id = identity();
    let mut tls = initialized(&id);
    let mut stack = TcpStack::new();

    for _ in 0..MAX_SSL_CONNECTIONS {
        let handle = stack.create().unwrap();
        tls.enable(&stack, handle).unwrap();
    }

    let extra = stack.create().unwrap();
    assert_eq!(tls.enable(&stack, extra).unwrap_err().status(), Status::Ssl);
    assert_eq!(tls.session_count(&stack), MAX_SSL_CONNECTIONS);
}

#[test]
fn test_loopback_handshake_and_echo() {
    let id = identity();

    let mut server_stack = TcpStack::new();
    let listener = server_stack.create().unwrap();
    server_stack.bind(listener, "127.0.0.1", 0).unwrap();
    server_stack.listen(listener, 10).unwrap();
    let port = server_stack.local_address(listener).unwrap().port;

    let mut server_tls = initialized(&id);
    let server = thread::spawn(move || {
        let conn = server_stack.accept(listener).unwrap();
        server_stack.set_timeout(conn, TimeoutScope::Both, 5_000).unwrap();
        server_tls.server_accept(&server_stack, conn).unwrap();

        let mut buf = [0u8; 64];
        let n = server_tls.recv(&mut server_stack, conn, &mut buf).unwrap();
        let sent = server_tls.send(&server_stack, conn, &buf[..n]).unwrap();
        assert_eq!(sent, n);

        server_tls.close(&mut server_stack, conn).unwrap();
        server_stack.close(listener).unwrap();
        (server_tls.session_count(&server_stack), server_stack.len())
    });

    let mut stack = TcpStack::new();
    let mut tls = initialized(&id);
    let client = stack.create().unwrap();
    stack.set_timeout(client, TimeoutScope::Both, 5_000).unwrap();
    stack.connect(client, "127.0.0.1", port).unwrap();
    tls.client_connect(&stack, client, "localhost").unwrap();
    assert!(tls.is_enabled(&stack, client));

    assert_eq!(tls.send(&stack, client, b"hello tls").unwrap(), 9);

    let mut buf = [0u8; 64];
    let mut n = 0;
    while n == 0 {
        n = tls.recv(&mut stack, client, &mut buf).unwrap();
    }
    assert_eq!(&buf[..n], b"hello tls");

    let (sessions, sockets) = server.join().unwrap();
    assert_eq!(sessions, 0);
    assert_eq!(sockets, 0);

    let _ = tls.close(&mut stack, client);
    assert_eq!(tls.session_count(&stack), 0);
    assert!(stack.is_empty());
}

#[test]
fn test_handshake_with_untrusted_name_fails() {
    let id = identity();

    let mut server_stack = TcpStack::new();
    let listener = server_stack.create().unwrap();
    server_stack.bind(listener, "127.0.0.1", 0).unwrap();
    server_stack.listen(listener, 10).unwrap();
    let port = server_stack.local_address(listener).unwrap().port;

    let mut server_tls = initialized(&id);
    let server = thread::spawn(move || {
        let conn = server_stack.accept(listener).unwrap();
        server_stack.set_timeout(conn, TimeoutScope::Both, 5_000).unwrap();
        server_tls.server_accept(&server_stack, conn).unwrap_err().status()
    });

    let mut stack = TcpStack::new();
    let mut tls = initialized(&id);
    let client = stack.create().unwrap();
    stack.set_timeout(client, TimeoutScope::Both, 5_000).unwrap();
    stack.connect(client, "127.0.0.1", port).unwrap();

    let err = tls.client_connect(&stack, client, "example.invalid").unwrap_err();
    assert_eq!(err.status(), Status::SslHandshake);
    assert!(!tls.is_enabled(&stack, client));
    stack.close(client).unwrap();

    assert_eq!(server.join().unwrap(), Status::SslHandshake);
}
