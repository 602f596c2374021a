use crate::error::{LisoError, Result};
use mio::net::TcpStream as MioTcpStream;
use rustls::pki_types::PrivateKeyDer;
use rustls::{ServerConfig, ServerConnection, StreamOwned};
use std::fs::File;
use std::io::BufReader;
use std::net::TcpStream as StdTcpStream;
use std::os::fd::{FromRawFd, IntoRawFd};
use std::path::Path;
use std::sync::Arc;

/// A TLS session bound to its own `mio::net::TcpStream`, exactly as
/// `accept_tls` returns it. Named so `connection::Transport` doesn't have to
/// spell out the `StreamOwned` generics.
pub type ServerTlsStream = StreamOwned<ServerConnection, MioTcpStream>;

/// Builds the process-wide TLS server configuration from the configured
/// key and certificate files. Done once at startup; failures here are
/// process-fatal, like any other config problem.
pub fn build_server_config(cert_path: &Path, key_path: &Path) -> Result<Arc<ServerConfig>> {
    let cert_file = File::open(cert_path)?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(cert_file))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| LisoError::from(format!("reading certificate file: {e}")))?;

    let key_file = File::open(key_path)?;
    let mut keys = rustls_pemfile::pkcs8_private_keys(&mut BufReader::new(key_file))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| LisoError::from(format!("reading private key file: {e}")))?;
    let key = keys
        .pop()
        .ok_or_else(|| LisoError::from("no PKCS#8 private key found in key file"))?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, PrivateKeyDer::Pkcs8(key))
        .map_err(|e| LisoError::from(e.to_string()))?;

    Ok(Arc::new(config))
}

/// Wraps a freshly accepted socket in a TLS session, completing the
/// handshake inline: the socket is dropped to blocking mode for the
/// handshake only — `rustls`'s sync `ServerConnection` has no
/// non-blocking handshake primitive — then returned to non-blocking for
/// normal event-loop operation.
pub fn accept_tls(stream: MioTcpStream, config: Arc<ServerConfig>) -> Result<ServerTlsStream> {
    let raw_fd = stream.into_raw_fd();
    let mut io = unsafe { StdTcpStream::from_raw_fd(raw_fd) };
    io.set_nonblocking(false)?;

    let mut conn = ServerConnection::new(config).map_err(|e| LisoError::from(e.to_string()))?;
    while conn.is_handshaking() {
        conn.complete_io(&mut io)?;
    }

    io.set_nonblocking(true)?;
    let mio_stream = MioTcpStream::from_std(io);
    Ok(StreamOwned::new(conn, mio_stream))
}
