//! The per-client Connection and its HTTP/1.1 state machine. A Connection
//! owns its transport, its bounded request buffer, and whatever response
//! bytes are queued for the client; the CGI bridge that may be forwarding
//! bytes into it is owned separately by the registry (`crate::server`),
//! which is also what enforces that a bridge tears down before its parent
//! connection does.

use crate::cgi::targets_cgi_script;
use crate::error::Result;
use crate::http::{Disposition, HttpRequest, HttpResponse, Method, ParseError, RequestBuffer, try_parse};
use crate::static_service::serve_static;
use crate::tls::ServerTlsStream;
use mio::Token;
use mio::net::TcpStream;
use std::io::{self, ErrorKind, Read, Write};
use std::net::SocketAddr;
use std::path::Path;

/// Either a raw socket or a TLS-wrapped session over the same socket. The
/// TLS session owns the underlying `mio::net::TcpStream` directly (see
/// `tls::accept_tls`); `registerable` reaches into it for `Poll`
/// registration without copying the handle.
pub enum Transport {
    Plain(TcpStream),
    Tls(Box<ServerTlsStream>),
}

impl Transport {
    pub fn registerable(&mut self) -> &mut TcpStream {
        match self {
            Transport::Plain(stream) => stream,
            Transport::Tls(stream) => stream.get_mut(),
        }
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        match self {
            Transport::Plain(stream) => stream.peer_addr(),
            Transport::Tls(stream) => stream.get_ref().peer_addr(),
        }
    }
}

impl Read for Transport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Transport::Plain(stream) => stream.read(buf),
            Transport::Tls(stream) => stream.read(buf),
        }
    }
}

impl Write for Transport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Transport::Plain(stream) => stream.write(buf),
            Transport::Tls(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Transport::Plain(stream) => stream.flush(),
            Transport::Tls(stream) => stream.flush(),
        }
    }
}

/// Per-connection finite state, driving which way the event loop registers
/// interest. `CgiForwarding` carries the bridge's token so teardown can
/// find it; while forwarding, the client socket is left unregistered — no
/// new client bytes are parsed until forwarding completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Active,
    CgiForwarding { bridge: Token, disposition: Disposition },
    Closed,
}

/// One accepted client. `request_buf` is the bounded 8192-byte request
/// buffer; `write_buf` is the owned response staging area, a plain
/// `Vec<u8>` rather than a fixed-size array, since nothing about the
/// response path needs a hard cap the way the request path does.
pub struct Connection {
    pub transport: Transport,
    pub peer_addr: SocketAddr,
    pub request_buf: RequestBuffer,
    pub write_buf: Vec<u8>,
    pub state: ConnState,
}

/// A fully-arrived POST ready for CGI dispatch: the parsed request (for
/// building the child's environment) plus its body, already drained from
/// the request buffer.
pub struct CgiRequest {
    pub request: HttpRequest,
    pub body: Vec<u8>,
}

impl Connection {
    pub fn new(transport: Transport, peer_addr: SocketAddr) -> Self {
        Self {
            transport,
            peer_addr,
            request_buf: RequestBuffer::new(),
            write_buf: Vec::new(),
            state: ConnState::Active,
        }
    }

    /// Writes `write_buf` to the client in one best-effort attempt. Kernel
    /// send buffers are assumed adequate for the response sizes this
    /// server produces; a short write is treated as a fatal transport
    /// error rather than something to re-arm for writability, so the
    /// function either drains the whole buffer or reports failure (and
    /// the caller closes the connection).
    pub fn flush_write_buf(&mut self) -> bool {
        if self.write_buf.is_empty() {
            return true;
        }
        match self.transport.write(&self.write_buf) {
            Ok(n) if n == self.write_buf.len() => {
                self.write_buf.clear();
                true
            }
            _ => false,
        }
    }

    fn queue_error(&mut self, code: u16) {
        self.write_buf
            .extend_from_slice(&HttpResponse::build_error(code).to_bytes());
        if !self.flush_write_buf() {
            self.write_buf.clear();
        }
        self.state = ConnState::Closed;
    }

    /// Drains whatever is currently available on the socket into the
    /// request buffer, then runs the parse -> service loop over it.
    /// Returns the target/body of a POST the moment
    /// one needs a CGI child; the caller owns spawning (it needs the
    /// registry, which a bare Connection cannot reach). EOF, a hard I/O
    /// error, or buffer overflow all leave the connection `Closed` for the
    /// caller to tear down; none of those is reported as an `Err` since
    /// they are ordinary per-connection outcomes, not process failures.
    pub fn on_readable(&mut self, document_root: &Path, cgi_path: &Path) -> Result<Option<CgiRequest>> {
        let mut scratch = [0u8; 4096];
        loop {
            match self.transport.read(&mut scratch) {
                Ok(0) => {
                    self.state = ConnState::Closed;
                    return Ok(None);
                }
                Ok(n) => {
                    if self.request_buf.append(&scratch[..n]).is_err() {
                        self.queue_error(400);
                        return Ok(None);
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(_) => {
                    self.state = ConnState::Closed;
                    return Ok(None);
                }
            }
        }

        self.drive(document_root, cgi_path)
    }

    /// Resumes the pipelining loop after a CGI dispatch has finished
    /// forwarding and the connection has returned to `Active` — answers
    /// any requests already sitting in the buffer before waiting for a
    /// fresh readability event.
    pub fn resume_pipeline(&mut self, document_root: &Path, cgi_path: &Path) -> Result<Option<CgiRequest>> {
        self.drive(document_root, cgi_path)
    }

    fn drive(&mut self, document_root: &Path, cgi_path: &Path) -> Result<Option<CgiRequest>> {
        loop {
            match try_parse(self.request_buf.as_slice()) {
                Err(ParseError::Incomplete) => return Ok(None),
                Err(e) => {
                    self.queue_error(e.status_code());
                    return Ok(None);
                }
                Ok((request, consumed)) => {
                    if request.method == Method::POST {
                        let body_needed = request.content_length.unwrap_or(0);
                        let available = self.request_buf.len().saturating_sub(consumed);
                        if available < body_needed {
                            // Body hasn't fully arrived; wait for more
                            // bytes without consuming anything.
                            return Ok(None);
                        }
                        let targets_cgi = targets_cgi_script(cgi_path, &request.target);
                        let mut drained = self.request_buf.drain_front(consumed + body_needed);
                        let body = drained.split_off(consumed);

                        if targets_cgi {
                            return Ok(Some(CgiRequest { request, body }));
                        }

                        // A POST to anything other than the configured CGI
                        // route never reaches a child: bare 200, no body,
                        // just the three baseline headers.
                        let response = HttpResponse::build_bare_ok(request.disposition);
                        self.write_buf.extend_from_slice(&response.to_bytes());
                        if !self.flush_write_buf() {
                            self.state = ConnState::Closed;
                            return Ok(None);
                        }
                        if request.disposition == Disposition::Close {
                            self.state = ConnState::Closed;
                            return Ok(None);
                        }
                        if self.request_buf.is_empty() {
                            return Ok(None);
                        }
                        continue;
                    }

                    self.request_buf.compact();
                    let response = serve_static(
                        document_root,
                        &request.target,
                        request.method != Method::HEAD,
                        request.disposition,
                    );
                    self.write_buf.extend_from_slice(&response.to_bytes());
                    if !self.flush_write_buf() {
                        self.state = ConnState::Closed;
                        return Ok(None);
                    }
                    if request.disposition == Disposition::Close {
                        self.state = ConnState::Closed;
                        return Ok(None);
                    }
                    // Pipelining: loop again immediately if more bytes are
                    // already buffered, instead of waiting for another
                    // readability event.
                    if self.request_buf.is_empty() {
                        return Ok(None);
                    }
                }
            }
        }
    }

    pub fn should_close(&self) -> bool {
        self.state == ConnState::Closed
    }

    /// Parks the connection in `CgiForwarding` — no new client reads are
    /// parsed until forwarding completes — once the registry has spawned
    /// a child and registered its stdout under `bridge`. The client's own
    /// disposition is remembered here since the bridge itself never looks
    /// at it — only what happens after the child's bytes are done matters.
    pub fn begin_cgi_forwarding(&mut self, bridge: Token, disposition: Disposition) {
        self.state = ConnState::CgiForwarding { bridge, disposition };
    }

    /// Appends bytes read off a CGI child's stdout to the client's write
    /// buffer and flushes them immediately, matching the synchronous,
    /// short-write-is-fatal write discipline used everywhere else on this
    /// connection.
    pub fn forward_cgi_bytes(&mut self, bytes: &[u8]) {
        if self.state == ConnState::Closed {
            return;
        }
        self.write_buf.extend_from_slice(bytes);
        if !self.flush_write_buf() {
            self.state = ConnState::Closed;
        }
    }

    /// Called once the bridge has reported child EOF: returns the
    /// connection to `Active` or `Closed` per the disposition recorded at
    /// dispatch time. Returns the disposition so the caller can decide
    /// whether to resume pipelining.
    pub fn end_cgi_forwarding(&mut self) -> Disposition {
        let disposition = match self.state {
            ConnState::CgiForwarding { disposition, .. } => disposition,
            _ => Disposition::Close,
        };
        self.state = if disposition == Disposition::Close {
            ConnState::Closed
        } else {
            ConnState::Active
        };
        disposition
    }
}
