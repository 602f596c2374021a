use super::request::Disposition;
use std::time::SystemTime;

pub const SERVER_NAME: &str = "Liso/1.0";

/// An outgoing HTTP response. Headers are kept in an insertion-ordered
/// `Vec` rather than a `HashMap` — the wire order (status line, Date,
/// Server, Connection, Content-Type?, Content-Length, Last-Modified) is a
/// hard invariant a `HashMap` cannot preserve.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status_code: u16,
    pub reason: &'static str,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    fn new(status_code: u16, reason: &'static str) -> Self {
        Self {
            status_code,
            reason,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    fn push(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    /// Serializes the status line, headers in insertion order, the blank
    /// line, then the body (empty for HEAD and for error responses with no
    /// body set).
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = format!("HTTP/1.1 {} {}\r\n", self.status_code, self.reason).into_bytes();
        for (name, value) in &self.headers {
            out.extend_from_slice(format!("{}: {}\r\n", name, value).as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }

    /// Builds the success response for static GET/HEAD. `body` is `None`
    /// for HEAD, which gets identical headers with no bytes following the
    /// blank line.
    pub fn build_static(
        disposition: Disposition,
        content_type: Option<&'static str>,
        content_length: usize,
        last_modified: SystemTime,
        body: Option<Vec<u8>>,
    ) -> Self {
        let mut res = Self::new(200, "OK");
        res.push("Date", httpdate::fmt_http_date(SystemTime::now()));
        res.push("Server", SERVER_NAME);
        res.push("Connection", disposition_str(disposition));
        if let Some(ct) = content_type {
            res.push("Content-Type", ct);
        }
        res.push("Content-Length", content_length.to_string());
        res.push("Last-Modified", httpdate::fmt_http_date(last_modified));
        if let Some(body) = body {
            res.body = body;
        }
        res
    }

    /// A bare 200 with only the three baseline headers — the non-CGI POST
    /// success case: no body, just Date/Server/Connection/Content-Length.
    pub fn build_bare_ok(disposition: Disposition) -> Self {
        let mut res = Self::new(200, "OK");
        res.push("Date", httpdate::fmt_http_date(SystemTime::now()));
        res.push("Server", SERVER_NAME);
        res.push("Connection", disposition_str(disposition));
        res.push("Content-Length", "0");
        res
    }

    /// Builds an error response: `Content-Type: text/html`, `Server`,
    /// `Connection: close` unconditionally, `Content-Length`, a minimal
    /// HTML body. The connection is always closed after an error response
    /// regardless of the request's disposition.
    pub fn build_error(code: u16) -> Self {
        let reason = reason_phrase(code);
        let body = format!(
            "<html><body><h1>{} {}</h1></body></html>",
            code, reason
        )
        .into_bytes();

        let mut res = Self::new(code, reason);
        res.push("Content-Type", "text/html");
        res.push("Server", SERVER_NAME);
        res.push("Connection", "close");
        res.push("Content-Length", body.len().to_string());
        res.body = body;
        res
    }
}

fn disposition_str(disposition: Disposition) -> &'static str {
    match disposition {
        Disposition::KeepAlive => "keep-alive",
        Disposition::Close => "close",
    }
}

fn reason_phrase(code: u16) -> &'static str {
    match code {
        400 => "Bad Request",
        404 => "Not Found",
        411 => "Length Required",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        503 => "Service Unavailable",
        505 => "HTTP Version Not Supported",
        _ => "Error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_header_order_is_date_server_connection_type_length_modified() {
        let res = HttpResponse::build_static(
            Disposition::KeepAlive,
            Some("text/html"),
            2,
            SystemTime::UNIX_EPOCH,
            Some(b"hi".to_vec()),
        );
        let names: Vec<&str> = res.headers.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "Date",
                "Server",
                "Connection",
                "Content-Type",
                "Content-Length",
                "Last-Modified",
            ]
        );
    }

    #[test]
    fn static_without_mime_omits_content_type() {
        let res = HttpResponse::build_static(
            Disposition::KeepAlive,
            None,
            0,
            SystemTime::UNIX_EPOCH,
            None,
        );
        assert!(res.headers.iter().all(|(k, _)| k != "Content-Type"));
    }

    #[test]
    fn error_response_always_closes() {
        let res = HttpResponse::build_error(404);
        assert_eq!(res.status_code, 404);
        assert_eq!(res.reason, "Not Found");
        assert!(
            res.headers
                .iter()
                .any(|(k, v)| k == "Connection" && v == "close")
        );
    }

    #[test]
    fn to_bytes_ends_headers_with_blank_line() {
        let res = HttpResponse::build_bare_ok(Disposition::Close);
        let bytes = res.to_bytes();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("\r\n\r\n"));
    }
}
