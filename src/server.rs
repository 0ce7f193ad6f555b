use crate::prelude::*;
use mio::unix::SourceFd;
use nix::fcntl::OFlag;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{pipe2, read, Pid};
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicI32, Ordering};

/// Write end of the SIGCHLD self-pipe, stashed here because the handler is a
/// bare `extern "C" fn` with no captures. Set once in `Server::new` and never
/// touched again from the reactor thread's perspective.
static SIGCHLD_PIPE_WRITE: AtomicI32 = AtomicI32::new(-1);

/// Async-signal-safe: writes one byte and returns. No allocation, no map
/// access, matches spec.md 5's ban on doing anything else in this handler.
extern "C" fn handle_sigchld(_signum: std::os::raw::c_int) {
    let fd = SIGCHLD_PIPE_WRITE.load(Ordering::Relaxed);
    if fd >= 0 {
        let _ = nix::unistd::write(fd, &[1]);
    }
}

pub struct Server {
    pub connections: HashMap<Token, HttpConnection>,
    pub cgi_to_client: HashMap<Token, Token>,
    pub zombie_purgatory: Vec<std::process::Child>,
    listeners: HashMap<Token, (TcpListener, Vec<Arc<ServerConfig>>)>,
    next_token: usize,
    sigchld_read_fd: RawFd,
    sigchld_token: Token,
}

impl Server {
    /// Binds one listener per distinct configured port, installs the SIGCHLD
    /// self-pipe (see `reap_children`), and registers everything with `poll`.
    /// Token 0 is reserved for the self-pipe; listener tokens follow.
    pub fn new(config: AppConfig, poll: &Poll) -> Result<Self> {
        let servers = validate_configs(config.servers);
        if servers.is_empty() {
            return Err("no valid server configuration after validation".into());
        }

        let mut by_port: HashMap<u16, Vec<Arc<ServerConfig>>> = HashMap::new();
        for cfg in servers {
            let cfg = Arc::new(cfg);
            for port in &cfg.ports {
                by_port.entry(*port).or_default().push(Arc::clone(&cfg));
            }
        }

        let (read_fd, write_fd) = pipe2(OFlag::O_NONBLOCK)?;
        SIGCHLD_PIPE_WRITE.store(write_fd, Ordering::Relaxed);

        let sig_action = SigAction::new(
            SigHandler::Handler(handle_sigchld),
            SaFlags::SA_RESTART | SaFlags::SA_NOCLDSTOP,
            SigSet::empty(),
        );
        unsafe { sigaction(Signal::SIGCHLD, &sig_action)? };

        let sigchld_token = Token(0);
        poll.registry()
            .register(&mut SourceFd(&read_fd), sigchld_token, Interest::READABLE)?;

        let mut next_token = 1usize;
        let mut listeners = HashMap::new();
        for (port, cfgs) in by_port {
            let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;
            let mut listener = TcpListener::bind(addr)?;
            let token = Token(next_token);
            next_token += 1;
            poll.registry()
                .register(&mut listener, token, Interest::READABLE)?;
            info!("listening on 0.0.0.0:{}", port);
            listeners.insert(token, (listener, cfgs));
        }

        Ok(Self {
            connections: HashMap::new(),
            cgi_to_client: HashMap::new(),
            zombie_purgatory: Vec::new(),
            listeners,
            next_token,
            sigchld_read_fd: read_fd,
            sigchld_token,
        })
    }

    pub fn run(&mut self, mut poll: Poll) -> Result<()> {
        let mut events = Events::with_capacity(1024);
        loop {
            match poll.poll(&mut events, Some(Duration::from_millis(250))) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }

            for event in events.iter() {
                let token = event.token();

                if token == self.sigchld_token {
                    self.reap_children(&poll);
                    continue;
                }

                if self.listeners.contains_key(&token) {
                    self.accept_loop(&poll, token)?;
                    continue;
                }

                if let Some(&client_token) = self.cgi_to_client.get(&token) {
                    self.handle_cgi_ready(&poll, token, client_token, event)?;
                    continue;
                }

                self.handle_client_ready(&poll, token, event)?;
            }

            timeouts::process(self, &poll);
            self.reap_zombie_purgatory();
        }
    }

    fn accept_loop(&mut self, poll: &Poll, listener_token: Token) -> Result<()> {
        let Some((listener, cfgs)) = self.listeners.get_mut(&listener_token) else {
            return Ok(());
        };

        loop {
            match listener.accept() {
                Ok((mut stream, addr)) => {
                    let token = Token(self.next_token);
                    self.next_token += 1;
                    poll.registry()
                        .register(&mut stream, token, Interest::READABLE)?;
                    info!("accepted connection {:?} from {}", token, addr);
                    self.connections
                        .insert(token, HttpConnection::new(stream, cfgs.clone()));
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!("accept failed: {}", e);
                    break;
                }
            }
        }
        Ok(())
    }

    fn handle_client_ready(&mut self, poll: &Poll, token: Token, event: &Event) -> Result<()> {
        let Some(conn) = self.connections.get_mut(&token) else {
            return Ok(());
        };
        conn.touch();

        if event.is_readable() {
            HttpConnection::handle_read_phase(conn, poll, token, &mut self.next_token, &mut self.cgi_to_client)?;
        }
        if !conn.closed && event.is_writable() {
            HttpConnection::handle_write_phase(conn, poll, token, &mut self.next_token, &mut self.cgi_to_client)?;
        }

        if conn.should_close() {
            let _ = poll.registry().deregister(&mut conn.stream);
            HttpConnection::terminate_connection(self, token);
        }
        Ok(())
    }

    fn handle_cgi_ready(
        &mut self,
        poll: &Poll,
        cgi_token: Token,
        client_token: Token,
        event: &Event,
    ) -> Result<()> {
        let Some(conn) = self.connections.get_mut(&client_token) else {
            return Ok(());
        };
        handle_cgi_event(poll, event, cgi_token, client_token, conn, &mut self.cgi_to_client)?;

        if conn.should_close() {
            let _ = poll.registry().deregister(&mut conn.stream);
            HttpConnection::terminate_connection(self, client_token);
        }
        Ok(())
    }

    /// Drains the self-pipe, then reaps every exited child with `waitpid(-1,
    /// WNOHANG)` in a loop (spec.md 4.H / 10.7), marking the matching
    /// connection's CGI action reaped regardless of which order stdout-EOF
    /// and this reap land in.
    fn reap_children(&mut self, poll: &Poll) {
        let mut buf = [0u8; 256];
        loop {
            match read(self.sigchld_read_fd, &mut buf) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(_) => break, // EAGAIN or nothing left to drain
            }
        }

        loop {
            match waitpid(None, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::Exited(pid, code)) => self.mark_reaped(poll, pid, code),
                Ok(WaitStatus::Signaled(pid, sig, _)) => self.mark_reaped(poll, pid, 128 + sig as i32),
                Ok(WaitStatus::StillAlive) => break,
                Ok(_) => {}
                Err(_) => break, // ECHILD: nothing left to reap
            }
        }
    }

    fn mark_reaped(&mut self, poll: &Poll, pid: Pid, exit_code: i32) {
        if exit_code != 0 {
            warn!("CGI child {} exited with status {}", pid.as_raw(), exit_code);
        }

        for (token, conn) in self.connections.iter_mut() {
            let matches_pid = matches!(&conn.action, ActiveAction::Cgi { child, .. } if child.id() as i32 == pid.as_raw());
            if matches_pid {
                mark_cgi_reaped(poll, *token, conn, &mut self.cgi_to_client);
                return;
            }
        }

        // Connection already torn down; if the child was parked in purgatory
        // to avoid a zombie, this reap is what frees it.
        self.zombie_purgatory
            .retain(|child| child.id() as i32 != pid.as_raw());
    }

    fn reap_zombie_purgatory(&mut self) {
        self.zombie_purgatory
            .retain_mut(|child| !matches!(child.try_wait(), Ok(Some(_))));
    }
}
