//! The Connection Registry and its event loop. One `mio::Poll` watches the
//! plaintext listener, the optional TLS listener, every active client
//! socket, every active CGI pipe, and the signal source; `Server` owns
//! every `Connection` and `CgiBridge` outright.

use crate::cgi::{CgiBridge, CgiRead};
use crate::config::Config;
use crate::connection::{CgiRequest, ConnState, Connection, Transport};
use crate::error::{LisoError, Result};
use crate::http::{Disposition, HttpResponse};
use crate::tls;
use liso_log::{errors, info, trace, warn};
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token};
use signal_hook::consts::{SIGCHLD, SIGINT, SIGPIPE};
use signal_hook::low_level;
use signal_hook_mio::v1_1::Signals;
use std::collections::{BTreeSet, HashMap};
use std::io::{ErrorKind, Write};
use std::net::SocketAddr;
use std::process::Child;
use std::sync::Arc;
use std::time::Duration;

const PLAIN_LISTENER: Token = Token(0);
const TLS_LISTENER: Token = Token(1);
const SIGNALS: Token = Token(2);
const FIRST_DYNAMIC_TOKEN: usize = 3;

/// Hard cap on simultaneously active client connections — the registry is
/// a fixed-capacity table. Exceeding it gets a 503 rather than a slot.
const MAX_CONNECTIONS: usize = 1024;

/// Readiness-multiplexing timeout: the loop wakes at least this often even
/// when nothing is ready, to sweep the zombie list and observe the signal
/// flag.
const POLL_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Server {
    poll: Poll,
    config: Arc<Config>,
    tls_config: Option<Arc<rustls::ServerConfig>>,
    plain_listener: TcpListener,
    tls_listener: Option<TcpListener>,
    signals: Signals,
    connections: HashMap<Token, Connection>,
    cgi_bridges: HashMap<Token, CgiBridge>,
    /// CGI children whose bridge already tore down but that hadn't exited
    /// yet; swept opportunistically so the loop never blocks on `wait()`
    /// while still reaping every terminated child eventually.
    zombies: Vec<Child>,
    next_token: usize,
}

impl Server {
    /// Binds the plaintext (and, if configured, TLS) listeners, builds the
    /// TLS server config, and wires up signal handling. Everything here is
    /// process-fatal on failure, same as any other startup problem.
    pub fn bind(config: Config) -> Result<Self> {
        let mut poll = Poll::new()?;

        let http_addr: SocketAddr = format!("0.0.0.0:{}", config.http_port).parse()?;
        let mut plain_listener = TcpListener::bind(http_addr)?;
        poll.registry()
            .register(&mut plain_listener, PLAIN_LISTENER, Interest::READABLE)?;

        let (tls_listener, tls_config) = match &config.tls {
            Some(tls_cfg) => {
                let https_addr: SocketAddr = format!("0.0.0.0:{}", tls_cfg.https_port).parse()?;
                let mut listener = TcpListener::bind(https_addr)?;
                poll.registry()
                    .register(&mut listener, TLS_LISTENER, Interest::READABLE)?;
                let server_config =
                    tls::build_server_config(&tls_cfg.certificate_file, &tls_cfg.private_key_file)?;
                (Some(listener), Some(server_config))
            }
            None => (None, None),
        };

        // SIGPIPE ignored: a write to a half-closed socket becomes an
        // ordinary EPIPE instead of killing the process.
        unsafe {
            low_level::register(SIGPIPE, || {})
                .map_err(|e| LisoError::from(format!("ignoring SIGPIPE: {e}")))?;
        }
        let mut signals = Signals::new([SIGINT, SIGCHLD])
            .map_err(|e| LisoError::from(format!("installing signal handlers: {e}")))?;
        poll.registry()
            .register(&mut signals, SIGNALS, Interest::READABLE)?;

        Ok(Self {
            poll,
            config: Arc::new(config),
            tls_config,
            plain_listener,
            tls_listener,
            signals,
            connections: HashMap::new(),
            cgi_bridges: HashMap::new(),
            zombies: Vec::new(),
            next_token: FIRST_DYNAMIC_TOKEN,
        })
    }

    pub fn local_http_addr(&self) -> std::io::Result<SocketAddr> {
        self.plain_listener.local_addr()
    }

    /// Runs the event loop until `SIGINT` requests an orderly shutdown or
    /// a listener-level error occurs, in which case it's logged and the
    /// server exits with failure.
    pub fn run(&mut self) -> Result<()> {
        let mut events = Events::with_capacity(1024);
        loop {
            match self.poll.poll(&mut events, Some(POLL_TIMEOUT)) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    errors!("poll failed: {}", e);
                    return Err(e.into());
                }
            }

            if events.is_empty() {
                self.housekeeping();
                continue;
            }

            let mut plain_ready = false;
            let mut tls_ready = false;
            let mut signals_ready = false;
            let mut ready_tokens: BTreeSet<Token> = BTreeSet::new();

            for event in events.iter() {
                match event.token() {
                    PLAIN_LISTENER => plain_ready = true,
                    TLS_LISTENER => tls_ready = true,
                    SIGNALS => signals_ready = true,
                    token => {
                        ready_tokens.insert(token);
                    }
                }
            }

            if signals_ready && self.handle_signals() {
                return Ok(());
            }
            if plain_ready {
                self.accept_loop(false);
            }
            if tls_ready {
                self.accept_loop(true);
            }

            // Ascending token order: a CGI pipe and its client socket are
            // never registered at the same time (the client socket is
            // deregistered for the duration of CgiForwarding), so a single
            // ascending pass over every ready token is enough to guarantee
            // an in-flight CGI response completes before new input from
            // the same client is parsed.
            for token in ready_tokens {
                if self.cgi_bridges.contains_key(&token) {
                    self.service_cgi(token);
                } else if self.connections.contains_key(&token) {
                    self.service_client(token);
                }
            }

            self.housekeeping();
        }
    }

    fn accept_loop(&mut self, is_tls: bool) {
        loop {
            let accepted = if is_tls {
                self.tls_listener.as_ref().expect("tls listener bound").accept()
            } else {
                self.plain_listener.accept()
            };

            let (stream, peer_addr) = match accepted {
                Ok(pair) => pair,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    errors!("accept failed: {}", e);
                    break;
                }
            };

            let transport = if is_tls {
                let tls_config = self.tls_config.clone().expect("tls config present");
                match tls::accept_tls(stream, tls_config) {
                    Ok(tls_stream) => Transport::Tls(Box::new(tls_stream)),
                    Err(e) => {
                        errors!("TLS handshake with {}: {}", peer_addr, e);
                        continue;
                    }
                }
            } else {
                Transport::Plain(stream)
            };

            if self.connections.len() >= MAX_CONNECTIONS {
                self.reject_with_503(transport, peer_addr);
                continue;
            }

            self.register_connection(transport, peer_addr);
        }
    }

    /// The handshake (for TLS) always completes before this is reached, so
    /// a full registry still writes the 503 through an established TLS
    /// session instead of raw HTTP bytes into a socket the client expects
    /// a ServerHello from.
    fn reject_with_503(&mut self, mut transport: Transport, peer_addr: SocketAddr) {
        warn!("registry full, rejecting {} with 503", peer_addr);
        let response = HttpResponse::build_error(503);
        let _ = transport.write_all(&response.to_bytes());
    }

    fn register_connection(&mut self, mut transport: Transport, peer_addr: SocketAddr) {
        let token = self.next_token();
        if let Err(e) = self
            .poll
            .registry()
            .register(transport.registerable(), token, Interest::READABLE)
        {
            errors!("registering {}: {}", peer_addr, e);
            return;
        }
        trace!("accepted {} as {:?}", peer_addr, token);
        self.connections
            .insert(token, Connection::new(transport, peer_addr));
    }

    fn service_client(&mut self, token: Token) {
        let www_folder = self.config.www_folder.clone();
        let cgi_path = self.config.cgi_path.clone();
        let cgi_request = {
            let conn = self.connections.get_mut(&token).expect("ready token is tracked");
            match conn.on_readable(&www_folder, &cgi_path) {
                Ok(request) => request,
                Err(e) => {
                    errors!("connection {:?}: {}", token, e);
                    None
                }
            }
        };

        if let Some(request) = cgi_request {
            self.dispatch_cgi(token, request);
        }

        self.close_if_done(token);
    }

    fn dispatch_cgi(&mut self, client_token: Token, request: CgiRequest) {
        let peer_addr = match self.connections.get(&client_token) {
            Some(conn) => conn.peer_addr,
            None => return,
        };
        let disposition = request.request.disposition;

        let bridge_token = self.next_token();
        match CgiBridge::spawn(
            &self.config.cgi_path,
            &request.request,
            &request.body,
            peer_addr,
            client_token,
        ) {
            Ok(mut bridge) => {
                if let Err(e) =
                    self.poll
                        .registry()
                        .register(&mut bridge.stdout, bridge_token, Interest::READABLE)
                {
                    errors!("registering CGI pipe: {}", e);
                    if let Some(status) = bridge.try_reap() {
                        trace!("CGI child exited early: {:?}", status);
                    } else {
                        self.zombies.push(bridge.into_child());
                    }
                    if let Some(conn) = self.connections.get_mut(&client_token) {
                        conn.state = ConnState::Closed;
                    }
                    return;
                }

                if let Some(conn) = self.connections.get_mut(&client_token) {
                    let _ = self.poll.registry().deregister(conn.transport.registerable());
                    conn.begin_cgi_forwarding(bridge_token, disposition);
                }
                self.cgi_bridges.insert(bridge_token, bridge);
            }
            Err(e) => {
                errors!("spawning CGI child: {}", e);
                if let Some(conn) = self.connections.get_mut(&client_token) {
                    conn.write_buf
                        .extend_from_slice(&HttpResponse::build_error(500).to_bytes());
                    let _ = conn.flush_write_buf();
                    conn.state = ConnState::Closed;
                }
            }
        }
    }

    fn service_cgi(&mut self, bridge_token: Token) {
        let mut scratch = [0u8; 4096];
        let mut eof = false;
        let client_token = match self.cgi_bridges.get(&bridge_token) {
            Some(bridge) => bridge.client_token,
            None => return,
        };

        loop {
            let outcome = match self.cgi_bridges.get_mut(&bridge_token) {
                Some(bridge) => bridge.read_chunk(&mut scratch),
                None => return,
            };
            match outcome {
                Ok(CgiRead::Data(n)) => {
                    if let Some(conn) = self.connections.get_mut(&client_token) {
                        conn.forward_cgi_bytes(&scratch[..n]);
                    }
                }
                Ok(CgiRead::WouldBlock) => break,
                Ok(CgiRead::Eof) => {
                    eof = true;
                    break;
                }
                Err(e) => {
                    errors!("CGI pipe read error: {}", e);
                    eof = true;
                    break;
                }
            }
        }

        if eof {
            self.teardown_cgi(bridge_token, client_token);
        }
    }

    fn teardown_cgi(&mut self, bridge_token: Token, client_token: Token) {
        if let Some(mut bridge) = self.cgi_bridges.remove(&bridge_token) {
            let _ = self.poll.registry().deregister(&mut bridge.stdout);
            if bridge.try_reap().is_none() {
                self.zombies.push(bridge.into_child());
            }
        }

        let disposition = match self.connections.get_mut(&client_token) {
            Some(conn) => conn.end_cgi_forwarding(),
            None => return,
        };

        if disposition == Disposition::Close {
            self.close_connection(client_token);
            return;
        }

        let reregistered = {
            let conn = self.connections.get_mut(&client_token).expect("just looked up");
            self.poll
                .registry()
                .register(conn.transport.registerable(), client_token, Interest::READABLE)
                .is_ok()
        };
        if !reregistered {
            self.close_connection(client_token);
            return;
        }

        // Pipelining: anything that arrived while the CGI child was
        // forwarding should be answered immediately.
        let www_folder = self.config.www_folder.clone();
        let cgi_path = self.config.cgi_path.clone();
        let next_cgi = self
            .connections
            .get_mut(&client_token)
            .and_then(|conn| conn.resume_pipeline(&www_folder, &cgi_path).ok().flatten());
        if let Some(request) = next_cgi {
            self.dispatch_cgi(client_token, request);
        }

        self.close_if_done(client_token);
    }

    fn close_if_done(&mut self, token: Token) {
        let should_close = self
            .connections
            .get(&token)
            .map(|c| c.should_close())
            .unwrap_or(false);
        if should_close {
            self.close_connection(token);
        }
    }

    fn close_connection(&mut self, token: Token) {
        if let Some(mut conn) = self.connections.remove(&token) {
            let _ = self.poll.registry().deregister(conn.transport.registerable());
            trace!("closed {} ({:?})", conn.peer_addr, token);
        }
    }

    /// Sweeps the zombie list non-blockingly, reaping any CGI child that
    /// has since exited.
    fn housekeeping(&mut self) {
        self.zombies
            .retain_mut(|child| !matches!(child.try_wait(), Ok(Some(_))));
    }

    /// Returns `true` if shutdown was requested.
    fn handle_signals(&mut self) -> bool {
        let mut shutdown = false;
        for signal in self.signals.pending() {
            match signal {
                SIGINT => shutdown = true,
                SIGCHLD => self.housekeeping(),
                _ => {}
            }
        }
        if shutdown {
            info!("SIGINT received, shutting down");
        }
        shutdown
    }

    fn next_token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        token
    }
}
