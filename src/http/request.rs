use super::buffer::find_subsequence;
use std::collections::HashMap;
use std::fmt;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
const CRLF: &[u8] = b"\r\n";

/// The three methods this server understands. Anything else is a 501, not
/// a parse failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    GET,
    HEAD,
    POST,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Method::GET => "GET",
            Method::HEAD => "HEAD",
            Method::POST => "POST",
        };
        write!(f, "{}", s)
    }
}

/// What the connection should do once this request's response has been
/// written, decided from the `Connection` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    KeepAlive,
    Close,
}

/// Every way request-line or header parsing can fail, each carrying its own
/// response status. `Incomplete` is not a failure at all — it means keep
/// reading and is never turned into a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    Incomplete,
    BadRequest,
    NotImplemented,
    VersionNotSupported,
    InternalError,
    LengthRequired,
}

impl ParseError {
    pub fn status_code(self) -> u16 {
        match self {
            ParseError::BadRequest => 400,
            ParseError::LengthRequired => 411,
            ParseError::InternalError => 500,
            ParseError::NotImplemented => 501,
            ParseError::VersionNotSupported => 505,
            ParseError::Incomplete => unreachable!("Incomplete never reaches a response"),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ParseError::Incomplete => "incomplete request",
            ParseError::BadRequest => "bad request",
            ParseError::NotImplemented => "not implemented",
            ParseError::VersionNotSupported => "HTTP version not supported",
            ParseError::InternalError => "internal error",
            ParseError::LengthRequired => "length required",
        };
        write!(f, "{}", s)
    }
}

impl std::error::Error for ParseError {}

/// A fully parsed request. Built only once the whole header block has
/// arrived — there is no partial/in-progress `HttpRequest` the way the
/// buffer has a partial state; parsing either produces one of these whole
/// or reports `Incomplete`.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub target: String,
    pub version: String,
    pub headers: HashMap<String, String>,
    pub content_length: Option<usize>,
    pub disposition: Disposition,
}

/// Tries to parse one request out of the front of `buf`. Per the zero-
/// progress guarantee, nothing is inspected until a full `\r\n\r\n`
/// terminated header block is present — a single-byte trickle never
/// starts tokenizing a request line. On success, returns the parsed
/// request plus the number of header-block bytes it consumed (the caller
/// still owns streaming any request body separately).
pub fn try_parse(buf: &[u8]) -> Result<(HttpRequest, usize), ParseError> {
    let header_end = match find_subsequence(buf, HEADER_TERMINATOR) {
        Some(idx) => idx,
        None => return Err(ParseError::Incomplete),
    };
    // `header_end` is the offset of the start of the `\r\n\r\n` run; include
    // one of those CRLFs so `header_block` ends in the real terminator of
    // its last line (the last header, or the request line itself when
    // there are no headers) instead of truncating it away.
    let header_block = &buf[..header_end + CRLF.len()];

    let (method, target, version, headers_start) = parse_request_line(header_block)?;
    let headers = parse_headers(header_block, headers_start)?;

    let disposition = if contains_exact(header_block, b"Connection: close\r\n") {
        Disposition::Close
    } else {
        Disposition::KeepAlive
    };

    let content_length = match method {
        Method::POST => Some(parse_content_length(&headers)?),
        _ => None,
    };

    Ok((
        HttpRequest {
            method,
            target,
            version,
            headers,
            content_length,
            disposition,
        },
        header_end + HEADER_TERMINATOR.len(),
    ))
}

fn parse_request_line(header_block: &[u8]) -> Result<(Method, String, String, usize), ParseError> {
    let line_end = find_subsequence(header_block, CRLF).ok_or(ParseError::InternalError)?;
    let line = std::str::from_utf8(&header_block[..line_end]).map_err(|_| ParseError::BadRequest)?;

    let tokens: Vec<&str> = line.split(' ').filter(|t| !t.is_empty()).collect();
    if tokens.len() != 3 {
        return Err(ParseError::BadRequest);
    }

    let target = tokens[1];

    let method = match tokens[0] {
        "GET" => Method::GET,
        "HEAD" => Method::HEAD,
        "POST" => Method::POST,
        _ => return Err(ParseError::NotImplemented),
    };

    if tokens[2] != "HTTP/1.1" {
        return Err(ParseError::VersionNotSupported);
    }

    Ok((method, target.to_string(), tokens[2].to_string(), line_end + CRLF.len()))
}

fn parse_headers(
    header_block: &[u8],
    headers_start: usize,
) -> Result<HashMap<String, String>, ParseError> {
    let mut headers = HashMap::new();
    let mut cursor = headers_start;

    while cursor < header_block.len() {
        let rest = &header_block[cursor..];
        let line_end = find_subsequence(rest, CRLF).ok_or(ParseError::InternalError)?;
        let line = std::str::from_utf8(&rest[..line_end]).map_err(|_| ParseError::BadRequest)?;
        cursor += line_end + CRLF.len();

        if line.is_empty() {
            break;
        }

        let sep = line.find(':').ok_or(ParseError::BadRequest)?;
        let key = line[..sep].trim().to_ascii_lowercase();
        let value = line[sep + 1..].trim().to_string();
        if key.is_empty() {
            return Err(ParseError::BadRequest);
        }
        headers.insert(key, value);
    }

    Ok(headers)
}

fn parse_content_length(headers: &HashMap<String, String>) -> Result<usize, ParseError> {
    let raw = headers
        .get("content-length")
        .ok_or(ParseError::LengthRequired)?;

    let mut tokens = raw.split_whitespace();
    let value = tokens.next().ok_or(ParseError::LengthRequired)?;
    if tokens.next().is_some() {
        return Err(ParseError::BadRequest);
    }
    if value.starts_with('-') {
        return Err(ParseError::LengthRequired);
    }
    value.parse::<usize>().map_err(|_| ParseError::LengthRequired)
}

fn contains_exact(haystack: &[u8], needle: &[u8]) -> bool {
    find_subsequence(haystack, needle).is_some()
}

/// The fixed five-extension MIME table; there is no dynamic MIME discovery.
/// Extension is whatever follows the final `.`; a target with no `.` or an
/// unrecognized extension gets no `Content-Type` at all.
pub fn classify_mime(target: &str) -> Option<&'static str> {
    let ext = target.rsplit('.').next()?;
    if ext == target {
        return None;
    }
    match ext {
        "html" => Some("text/html"),
        "css" => Some("text/css"),
        "png" => Some("image/png"),
        "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}
