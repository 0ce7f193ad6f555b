use std::collections::HashMap;
use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;

use mio::{Interest, Poll, Token};
use server_proxy::config::{RouteConfig, ServerConfig};
use server_proxy::http::HttpConnection;

/// Builds a connected client/server TCP pair and wraps the server side in an
/// `HttpConnection` already registered with a fresh `Poll`, mirroring what
/// `Server::accept_loop` does for a freshly accepted client.
fn accepted_connection(
    config: ServerConfig,
) -> (
    TcpStream,
    Poll,
    HttpConnection,
    Token,
    usize,
    HashMap<Token, Token>,
) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let client = TcpStream::connect(addr).unwrap();
    client.set_nonblocking(true).unwrap();
    let (server_std, _) = listener.accept().unwrap();
    server_std.set_nonblocking(true).unwrap();

    let poll = Poll::new().unwrap();
    let mut mio_stream = mio::net::TcpStream::from_std(server_std);
    let token = Token(0);
    poll.registry()
        .register(&mut mio_stream, token, Interest::READABLE)
        .unwrap();

    let conn = HttpConnection::new(mio_stream, vec![Arc::new(config)]);
    (client, poll, conn, token, 1, HashMap::new())
}

fn test_config(root: &str) -> ServerConfig {
    ServerConfig {
        default_server: true,
        root: root.to_string(),
        routes: vec![RouteConfig {
            path: "/".to_string(),
            methods: vec![
                "GET".to_string(),
                "POST".to_string(),
                "DELETE".to_string(),
            ],
            root: root.to_string(),
            ..Default::default()
        }],
        ..Default::default()
    }
}

fn response_status_line(write_buffer: &[u8]) -> String {
    let text = String::from_utf8_lossy(write_buffer);
    text.lines().next().unwrap_or_default().to_string()
}

#[test]
fn test_get_existing_file_returns_200() {
    let dir = std::env::temp_dir().join(format!("http_tests_get_{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("index.html"), b"hello").unwrap();

    let (mut client, poll, mut conn, token, mut next_token, mut cgi_to_client) =
        accepted_connection(test_config(dir.to_str().unwrap()));

    client
        .write_all(b"GET /index.html HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .unwrap();

    HttpConnection::handle_read_phase(&mut conn, &poll, token, &mut next_token, &mut cgi_to_client)
        .unwrap();

    assert!(response_status_line(&conn.write_buffer).contains("200"));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_missing_file_returns_404() {
    let dir = std::env::temp_dir().join(format!("http_tests_404_{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();

    let (mut client, poll, mut conn, token, mut next_token, mut cgi_to_client) =
        accepted_connection(test_config(dir.to_str().unwrap()));

    client
        .write_all(b"GET /nope.html HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .unwrap();

    HttpConnection::handle_read_phase(&mut conn, &poll, token, &mut next_token, &mut cgi_to_client)
        .unwrap();

    assert!(response_status_line(&conn.write_buffer).contains("404"));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_malformed_request_line_returns_400() {
    let (mut client, poll, mut conn, token, mut next_token, mut cgi_to_client) =
        accepted_connection(test_config("./www"));

    client.write_all(b"GET\r\n\r\n").unwrap();

    HttpConnection::handle_read_phase(&mut conn, &poll, token, &mut next_token, &mut cgi_to_client)
        .unwrap();

    assert!(response_status_line(&conn.write_buffer).contains("400"));
    assert!(conn.closed);
}

#[test]
fn test_unsupported_method_returns_501() {
    let (mut client, poll, mut conn, token, mut next_token, mut cgi_to_client) =
        accepted_connection(test_config("./www"));

    client
        .write_all(b"PATCH / HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .unwrap();

    HttpConnection::handle_read_phase(&mut conn, &poll, token, &mut next_token, &mut cgi_to_client)
        .unwrap();

    assert!(response_status_line(&conn.write_buffer).contains("501"));
}

#[test]
fn test_overlong_uri_returns_414() {
    let (mut client, poll, mut conn, token, mut next_token, mut cgi_to_client) =
        accepted_connection(test_config("./www"));

    let long_path = "a".repeat(9000);
    let request = format!("GET /{} HTTP/1.1\r\nHost: localhost\r\n\r\n", long_path);
    client.write_all(request.as_bytes()).unwrap();

    HttpConnection::handle_read_phase(&mut conn, &poll, token, &mut next_token, &mut cgi_to_client)
        .unwrap();

    assert!(response_status_line(&conn.write_buffer).contains("414"));
}

#[test]
fn test_unexpected_eof_mid_headers_returns_400() {
    let (mut client, poll, mut conn, token, mut next_token, mut cgi_to_client) =
        accepted_connection(test_config("./www"));

    // Half a header section, then the client goes away: no blank line ever
    // arrives, so the parser never reaches HeadersDone.
    client
        .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n")
        .unwrap();
    client.shutdown(std::net::Shutdown::Write).unwrap();

    HttpConnection::handle_read_phase(&mut conn, &poll, token, &mut next_token, &mut cgi_to_client)
        .unwrap();

    assert!(response_status_line(&conn.write_buffer).contains("400"));
    assert!(conn.closed);
}

#[test]
fn test_clean_close_with_no_bytes_produces_no_response() {
    let (client, poll, mut conn, token, mut next_token, mut cgi_to_client) =
        accepted_connection(test_config("./www"));

    drop(client);

    HttpConnection::handle_read_phase(&mut conn, &poll, token, &mut next_token, &mut cgi_to_client)
        .unwrap();

    assert!(conn.write_buffer.is_empty());
    assert!(conn.closed);
}
