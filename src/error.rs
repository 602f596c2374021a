use core::fmt;
use std::{
    error::Error,
    fmt::{Debug, Display, Formatter},
};

/// Top-level error for anything that should abort the process: a bad
/// invocation, a socket that refuses to bind, a logger that refuses to
/// open. Per-connection protocol failures never become a `LisoError` —
/// see `http::ParseError` for those.
pub struct LisoError(pub Box<dyn Error>);

impl Debug for LisoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "\r\x1b[K{}", self)
    }
}

impl Display for LisoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\x1b[31mERROR\x1b[0m: {}", self.0)
    }
}

impl Error for LisoError {}

#[derive(Debug)]
pub struct Generic(pub String);

impl Display for Generic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Error for Generic {}

impl From<std::io::Error> for LisoError {
    fn from(e: std::io::Error) -> Self {
        LisoError(Box::new(e))
    }
}

impl From<std::net::AddrParseError> for LisoError {
    fn from(e: std::net::AddrParseError) -> Self {
        LisoError(Box::new(e))
    }
}

impl From<String> for LisoError {
    fn from(s: String) -> Self {
        LisoError(Box::new(Generic(s)))
    }
}

impl From<&str> for LisoError {
    fn from(s: &str) -> Self {
        LisoError(Box::new(Generic(s.to_string())))
    }
}

pub type Result<T> = std::result::Result<T, LisoError>;
