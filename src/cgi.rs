//! CGI dispatch. A POST request's body is fully buffered by the connection
//! before dispatch, so the whole thing is written to the child's stdin
//! synchronously and stdin is dropped to signal EOF; only the child's
//! stdout needs a pollable, non-blocking registration. The child is
//! expected to write a fully formed HTTP response to its stdout; the
//! bridge never parses it, only forwards it.

use crate::error::{LisoError, Result};
use crate::http::HttpRequest;
use mio::Token;
use mio::unix::pipe;
use std::collections::HashMap;
use std::io::{self, ErrorKind, Read, Write};
use std::net::SocketAddr;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};

/// Whether `target` (query string stripped) names the single configured
/// CGI script, addressed by that script's file name — a script at
/// `<cgi_path>/cgi-bin.sh` is reached as `/cgi-bin.sh`. A POST to any other
/// target never spawns a child; it gets the bare 200 the response builder
/// already has a constructor for.
pub fn targets_cgi_script(cgi_path: &Path, target: &str) -> bool {
    let path_only = target.split('?').next().unwrap_or(target);
    match cgi_path.file_name().and_then(|n| n.to_str()) {
        Some(name) => path_only.trim_start_matches('/') == name,
        None => false,
    }
}

/// Outcome of one non-blocking read off a CGI child's stdout.
pub enum CgiRead {
    Data(usize),
    WouldBlock,
    Eof,
}

/// A spawned CGI child forwarding its stdout to the client that triggered
/// it. `client_token` is filled in by the caller once the
/// bridge itself has been assigned a token, so the event loop can route
/// bytes back to the right Connection without the bridge needing to know
/// about the registry.
pub struct CgiBridge {
    child: Child,
    pub stdout: pipe::Receiver,
    pub client_token: Token,
}

impl CgiBridge {
    /// Spawns `cgi_path` with a CGI/1.1 environment built from `request`
    /// and writes `body` to its stdin before dropping it; the worker
    /// receives request metadata entirely through its process environment.
    pub fn spawn(
        cgi_path: &Path,
        request: &HttpRequest,
        body: &[u8],
        peer_addr: SocketAddr,
        client_token: Token,
    ) -> Result<Self> {
        let mut child = Command::new(cgi_path)
            .envs(build_env(request, peer_addr, body.len()))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            // Bounded by MAX_REQUEST_SIZE (8192 bytes), well under a pipe's
            // kernel buffer, so this cannot block the event loop.
            let _ = stdin.write_all(body);
            // `stdin` drops here, closing the write end and sending EOF.
        }

        let stdout = child
            .stdout
            .take()
            .expect("stdout was configured as piped");
        let stdout = pipe::Receiver::try_from(stdout)
            .map_err(|e| LisoError::from(format!("registering CGI stdout: {e}")))?;

        Ok(Self {
            child,
            stdout,
            client_token,
        })
    }

    /// Reads one chunk off the child's stdout into `scratch`.
    pub fn read_chunk(&mut self, scratch: &mut [u8]) -> io::Result<CgiRead> {
        match self.stdout.read(scratch) {
            Ok(0) => Ok(CgiRead::Eof),
            Ok(n) => Ok(CgiRead::Data(n)),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(CgiRead::WouldBlock),
            Err(e) => Err(e),
        }
    }

    /// Non-blocking reap. `Some` means the child had already exited;
    /// `None` means the caller should park the child in the zombie
    /// purgatory to sweep later rather than block waiting for it.
    pub fn try_reap(&mut self) -> Option<ExitStatus> {
        self.child.try_wait().ok().flatten()
    }

    /// Consumes the bridge, handing back the child process for the
    /// registry's zombie sweep. The stdout pipe is dropped here.
    pub fn into_child(self) -> Child {
        self.child
    }
}

/// Builds the CGI/1.1 environment for `request`, following the usual CGI
/// metavariable set: request line and headers become
/// `REQUEST_METHOD`/`SCRIPT_NAME`/`QUERY_STRING`/`HTTP_*`, the connection's
/// peer address becomes `REMOTE_ADDR`/`REMOTE_PORT`.
fn build_env(
    request: &HttpRequest,
    peer_addr: SocketAddr,
    content_length: usize,
) -> HashMap<String, String> {
    let mut env = HashMap::new();
    env.insert("GATEWAY_INTERFACE".to_string(), "CGI/1.1".to_string());
    env.insert("SERVER_PROTOCOL".to_string(), "HTTP/1.1".to_string());
    env.insert(
        "SERVER_SOFTWARE".to_string(),
        crate::http::SERVER_NAME.to_string(),
    );
    env.insert("REQUEST_METHOD".to_string(), request.method.to_string());

    let (path, query) = match request.target.split_once('?') {
        Some((p, q)) => (p.to_string(), q.to_string()),
        None => (request.target.clone(), String::new()),
    };
    env.insert("SCRIPT_NAME".to_string(), path.clone());
    env.insert("PATH_INFO".to_string(), path);
    env.insert("QUERY_STRING".to_string(), query);
    env.insert("CONTENT_LENGTH".to_string(), content_length.to_string());

    if let Some(ct) = request.headers.get("content-type") {
        env.insert("CONTENT_TYPE".to_string(), ct.clone());
    }
    env.insert("REMOTE_ADDR".to_string(), peer_addr.ip().to_string());
    env.insert("REMOTE_PORT".to_string(), peer_addr.port().to_string());

    for (key, value) in &request.headers {
        if key == "content-type" || key == "content-length" {
            continue;
        }
        let env_key = format!("HTTP_{}", key.to_ascii_uppercase().replace('-', "_"));
        env.insert(env_key, value.clone());
    }

    env
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_script_by_file_name() {
        let cgi_path = Path::new("/srv/cgi-bin/cgi-bin.sh");
        assert!(targets_cgi_script(cgi_path, "/cgi-bin.sh"));
        assert!(targets_cgi_script(cgi_path, "/cgi-bin.sh?a=1"));
    }

    #[test]
    fn does_not_match_other_targets() {
        let cgi_path = Path::new("/srv/cgi-bin/cgi-bin.sh");
        assert!(!targets_cgi_script(cgi_path, "/submit"));
        assert!(!targets_cgi_script(cgi_path, "/"));
    }
}
