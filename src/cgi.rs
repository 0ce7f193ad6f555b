use crate::prelude::*;

/// Parses the CGI header block (the bytes preceding the header/body
/// separator) and returns the status code plus the remaining headers, or
/// `None` if no `Status:` line was present. Per spec.md 4.I a missing
/// `Status:` line is a malformed response the caller must map to 500,
/// rather than silently defaulting to 200.
pub fn parse_cgi_headers(bytes: &[u8]) -> Option<(u16, Vec<(String, String)>)> {
    let mut status = None;
    let mut headers = Vec::new();
    let content = String::from_utf8_lossy(bytes);

    for line in content.lines() {
        if let Some((key, val)) = line.split_once(':') {
            let key = key.trim().to_lowercase();
            let val = val.trim().to_string();

            if key == "status" {
                status = val.split_whitespace().next().and_then(|s| s.parse().ok());
            } else {
                headers.push((key, val));
            }
        }
    }
    status.map(|s| (s, headers))
}

/// Builds the final HTTP response from a CGI child's complete, buffered
/// stdout, per spec.md 4.I: split at the first header/body separator,
/// require a `Status:` line, and recompute `Content-Length` from the real
/// body length rather than trusting (or leaving stale) any length the
/// script itself may have declared. Returns `None` if the output has no
/// separator or no `Status:` line; the caller converts that to a 500.
pub fn cgi_response(output: &[u8]) -> Option<HttpResponse> {
    let (sep_start, sep_len) = find_subsequence(output, b"\r\n\r\n", 0)
        .map(|p| (p, 4))
        .or_else(|| find_subsequence(output, b"\n\n", 0).map(|p| (p, 2)))?;

    let (status, cgi_headers) = parse_cgi_headers(&output[..sep_start])?;
    let body = &output[sep_start + sep_len..];

    let mut res = HttpResponse::new(status, &HttpResponse::status_text(status));
    for (k, v) in cgi_headers {
        res.set_header(&k, &v);
    }
    // Authoritative length, computed last so it can never be shadowed by a
    // stale default or a script-declared value that doesn't match the body
    // actually buffered.
    res.set_header("content-length", &body.len().to_string());
    res.body = body.to_vec();

    Some(res)
}

pub fn handle_cgi_event(
    poll: &Poll,
    event: &Event,
    cgi_token: Token,
    client_token: Token,
    conn: &mut HttpConnection,
    cgi_to_client: &mut HashMap<Token, Token>,
) -> Result<()> {
    if let ActiveAction::Cgi {
        out_stream,
        in_stream,
        child,
        output,
        reaped,
        ..
    } = &mut conn.action
    {
        // SCRIPT -> SERVER (Stdout): drained into `output` only. Nothing is
        // written to `conn.write_buffer` or the client socket here — that
        // only happens once `try_complete_cgi`'s both-conditions gate
        // passes below.
        if event.is_readable() && Some(cgi_token) == conn.cgi_out_token {
            let mut buf = [0u8; 4096];
            loop {
                match out_stream.read(&mut buf) {
                    Ok(0) => {
                        conn.cgi_out_token = None;
                        break;
                    }
                    Ok(n) => {
                        trace!("read {} bytes from CGI stdout", n);
                        output.extend_from_slice(&buf[..n]);
                    }
                    Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
                    Err(_) => {
                        conn.cgi_out_token = None;
                        break;
                    }
                }
            }
        }

        // SERVER -> SCRIPT (Stdin)
        if event.is_writable() && Some(cgi_token) == conn.cgi_in_token {
            if !conn.cgi_buffer.is_empty() {
                if let Some(pipe) = in_stream {
                    match pipe.write(&conn.cgi_buffer) {
                        Ok(n) => {
                            conn.cgi_buffer.drain(..n);

                            if conn.body_remaining == 0 && conn.cgi_buffer.is_empty() {
                                conn.cgi_in_token = None;
                                trace!("CGI stdin pipe closed (EOF sent)");
                            }
                        }
                        Err(e) if e.kind() != ErrorKind::WouldBlock => {}
                        Err(_) => conn.closed = true,
                    }
                }
            }
        }

        // Fallback reap: a SIGCHLD-driven reap (see `server::Server::reap_children`)
        // normally sets `reaped` first, but poll a non-blocking try_wait here too in
        // case this pipe is the only thing still driving the event loop for this child.
        if !*reaped {
            match child.try_wait() {
                Ok(Some(status)) => {
                    if status.code().unwrap_or(-1) != 0 {
                        warn!("CGI child exited with status {:?}", status.code());
                    }
                    *reaped = true;
                }
                Ok(None) => {}
                Err(_) => conn.closed = true,
            }
        }
    }

    try_complete_cgi(poll, client_token, conn, cgi_to_client);
    Ok(())
}

/// Called by `server::Server::reap_children` once `waitpid` has confirmed
/// this connection's CGI child has exited. Marks it reaped and, if stdout
/// EOF was already observed, completes the teardown immediately.
pub fn mark_cgi_reaped(
    poll: &Poll,
    client_token: Token,
    conn: &mut HttpConnection,
    cgi_to_client: &mut HashMap<Token, Token>,
) {
    if let ActiveAction::Cgi { reaped, .. } = &mut conn.action {
        *reaped = true;
    }
    try_complete_cgi(poll, client_token, conn, cgi_to_client);
}

/// Tears down a CGI action once both halves of the completion condition hold:
/// stdout EOF has been observed (`cgi_out_token` cleared, above) and the child
/// has been reaped (`reaped` set here or by `server::Server::reap_children`).
/// Either can land first; this runs after every CGI event and is a no-op
/// until both are true. Only once both hold is a response built (spec.md
/// 4.I) and handed to the client socket's writer (spec.md 4.K item 2).
fn try_complete_cgi(
    poll: &Poll,
    client_token: Token,
    conn: &mut HttpConnection,
    cgi_to_client: &mut HashMap<Token, Token>,
) {
    let done = conn.cgi_out_token.is_none()
        && matches!(&conn.action, ActiveAction::Cgi { reaped, .. } if *reaped);
    if !done {
        return;
    }

    if let ActiveAction::Cgi { in_stream, .. } = &mut conn.action {
        if conn.body_remaining == 0 && conn.cgi_buffer.is_empty() {
            if let Some(pipe) = in_stream.take() {
                drop(pipe);
                conn.cgi_in_token = None;
            }
        }
    }

    let response = match &conn.action {
        ActiveAction::Cgi { output, .. } => {
            cgi_response(output).unwrap_or_else(|| handle_error(HTTP_INTERNAL_SERVER_ERROR, conn.s_cfg.as_ref()))
        }
        _ => return,
    };

    conn.write_buffer.extend_from_slice(&response.to_bytes());
    let _ = poll.registry().reregister(
        &mut conn.stream,
        client_token,
        Interest::READABLE | Interest::WRITABLE,
    );

    cleanup_cgi(cgi_to_client, conn);
    conn.action = ActiveAction::None;
}

pub fn build_cgi_env(conn: &mut HttpConnection) -> HashMap<String, String> {
    let req = &conn.request;
    let mut envs = HashMap::new();

    envs.insert("GATEWAY_INTERFACE".to_string(), "CGI/1.1".to_string());
    envs.insert("SERVER_PROTOCOL".to_string(), "HTTP/1.1".to_string());
    envs.insert("REQUEST_METHOD".to_string(), req.method.to_string());
    // envs.insert("QUERY_STRING".to_string(), req.query_string.clone());
    envs.insert("PATH_INFO".to_string(), req.url.clone());
    envs.insert("SCRIPT_NAME".to_string(), req.url.clone());

    envs.insert("SERVER_NAME".to_string(), "01-SERVER".to_string());
    if let Ok(addr) = conn.stream.peer_addr() {
        envs.insert("REMOTE_ADDR".to_string(), addr.ip().to_string());
        envs.insert("REMOTE_PORT".to_string(), addr.port().to_string());
    }

    if let Some(ct) = req.headers.get("content-type") {
        envs.insert("CONTENT_TYPE".to_string(), ct.clone());
    }
    if let Some(cl) = req.headers.get("content-length") {
        envs.insert("CONTENT_LENGTH".to_string(), cl.clone());
    }

    for (k, v) in req.headers.iter().chain(&req.trailers) {
        let env_key = format!("HTTP_{}", k.to_uppercase().replace('-', "_"));
        envs.insert(env_key, v.clone());
    }

    envs
}

pub fn cleanup_cgi(cgi_to_client: &mut HashMap<Token, Token>, conn: &mut HttpConnection) {
    if let Some(t) = conn.cgi_out_token.take() {
        cgi_to_client.remove(&t);
    }
    if let Some(t) = conn.cgi_in_token.take() {
        cgi_to_client.remove(&t);
    }
}

/// Wall-clock CGI timeout (spec.md 4.H): kills the child and yields a clean
/// 504. Since nothing is ever written to the client before `try_complete_cgi`
/// observes completion, there is no partially-delivered response to
/// reconcile here — any buffered-but-unsent CGI output is simply discarded.
/// `child.wait()` is a short blocking reap since the SIGKILL just sent makes
/// the exit immediate; this is the one deliberate exception to "never block"
/// in the reactor, bounded by the kernel's own SIGKILL delivery latency.
pub fn force_cgi_timeout(conn: &mut HttpConnection, cgi_to_client: &mut HashMap<Token, Token>) {
    if let ActiveAction::Cgi { ref mut child, .. } = conn.action {
        let _ = child.kill();
        let _ = child.wait();

        let response = HttpResponse::new(GATEWAY_TIMEOUT, &HttpResponse::status_text(GATEWAY_TIMEOUT));
        conn.write_buffer.extend_from_slice(&response.to_bytes());

        conn.cgi_in_token = None;
        conn.cgi_out_token = None;
        conn.cgi_buffer.clear();
        conn.closed = true;

        cleanup_cgi(cgi_to_client, conn);
        conn.action = ActiveAction::None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cgi_response_computes_content_length_from_body() {
        let output = b"Status: 201 Created\r\nContent-Type: text/plain\r\n\r\nok";
        let res = cgi_response(output).expect("well-formed CGI output");
        assert_eq!(res.status_code, 201);
        assert_eq!(res.status_text, "Created");
        assert_eq!(
            res.headers.get("content-length").map(String::as_str),
            Some("2")
        );
        assert_eq!(
            res.headers.get("content-type").map(String::as_str),
            Some("text/plain")
        );
        assert_eq!(res.body, b"ok");
    }

    #[test]
    fn cgi_response_recomputes_over_a_wrong_script_supplied_length() {
        let output = b"Status: 200 OK\r\nContent-Length: 999\r\n\r\nhello";
        let res = cgi_response(output).expect("well-formed CGI output");
        assert_eq!(
            res.headers.get("content-length").map(String::as_str),
            Some("5")
        );
    }

    #[test]
    fn missing_status_line_is_malformed() {
        let output = b"Content-Type: text/plain\r\n\r\nok";
        assert!(cgi_response(output).is_none());
    }

    #[test]
    fn missing_header_terminator_is_malformed() {
        let output = b"Status: 200 OK\r\nContent-Type: text/plain";
        assert!(cgi_response(output).is_none());
    }

    #[test]
    fn wire_bytes_include_recomputed_content_length() {
        let output = b"Status: 201 Created\r\nContent-Type: text/plain\r\n\r\nok";
        let res = cgi_response(output).expect("well-formed CGI output");
        let bytes = res.to_bytes();
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.starts_with("HTTP/1.1 201 Created\r\n"));
        assert!(text.contains("Content-Length: 2\r\n"));
        assert!(text.ends_with("\r\n\r\nok"));
    }
}
