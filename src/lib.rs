//! Liso: a single-process, multi-client HTTP/1.1 server. `server::Server`
//! is the event loop and connection registry; `connection::Connection` is
//! the per-client request/response state machine it drives.

pub mod cgi;
pub mod config;
pub mod connection;
pub mod error;
pub mod http;
pub mod server;
pub mod static_service;
pub mod tls;
