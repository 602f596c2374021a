/// Maximum number of bytes a connection's request buffer may hold before
/// the request is rejected as oversized. This cap is the server's sole
/// form of backpressure against a client.
pub const MAX_REQUEST_SIZE: usize = 8192;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

#[derive(Debug, PartialEq, Eq)]
pub struct Overflow;

/// The bounded per-connection request buffer. Re-architected from the
/// source's fixed `char request[8192]` + `end_idx` pair as a length-bounded
/// `Vec<u8>`: pushing past the cap is rejected up front instead of being
/// checked after the fact, and draining consumed bytes off the front
/// shrinks the buffer directly rather than needing a separate zero-fill
/// pass over a fixed array.
#[derive(Debug, Default)]
pub struct RequestBuffer {
    data: Vec<u8>,
}

impl RequestBuffer {
    pub fn new() -> Self {
        Self {
            data: Vec::with_capacity(MAX_REQUEST_SIZE),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Appends `bytes` to the buffer. Fails with `Overflow` (and makes no
    /// mutation) if doing so would exceed `MAX_REQUEST_SIZE`; the caller
    /// must then close the connection with a 400-class error.
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), Overflow> {
        if self.data.len() + bytes.len() > MAX_REQUEST_SIZE {
            return Err(Overflow);
        }
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    /// Returns the offset of the start of the first `\r\n\r\n`, or `None`
    /// if no full header block has arrived yet.
    pub fn find_header_end(&self) -> Option<usize> {
        find_subsequence(&self.data, HEADER_TERMINATOR)
    }

    /// Drops the first `n` bytes, shifting any trailing bytes down to
    /// offset 0. Used while a body is streamed to a CGI child: bytes are
    /// consumed from the front as they are forwarded, so by the time the
    /// request completes nothing is left to compact.
    pub fn drain_front(&mut self, n: usize) -> Vec<u8> {
        let n = n.min(self.data.len());
        self.data.drain(..n).collect()
    }

    /// Called once a header-only request (GET/HEAD, or an error response)
    /// has been fully served: locates the end of that request's header
    /// block and shifts any already-arrived pipelined bytes down to offset
    /// 0. If the block fills the buffer exactly, it is left empty. Returns
    /// the new length, i.e. the byte count of whatever pipelined request is
    /// already waiting. A no-op if no terminator is present (defensive;
    /// callers only invoke this once a full header block was observed).
    pub fn compact(&mut self) -> usize {
        match self.find_header_end() {
            Some(header_end) => {
                self.drain_front(header_end + HEADER_TERMINATOR.len());
                self.data.len()
            }
            None => self.data.len(),
        }
    }
}

pub fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incomplete_request_has_no_header_end() {
        let mut buf = RequestBuffer::new();
        buf.append(b"GET / HTTP/1.1\r\nHost: x\r\n").unwrap();
        assert_eq!(buf.find_header_end(), None);
    }

    #[test]
    fn finds_header_terminator() {
        let mut buf = RequestBuffer::new();
        buf.append(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(buf.find_header_end(), Some(14));
    }

    #[test]
    fn append_rejects_overflow() {
        let mut buf = RequestBuffer::new();
        buf.append(&vec![b'a'; MAX_REQUEST_SIZE]).unwrap();
        assert_eq!(buf.append(b"x"), Err(Overflow));
        assert_eq!(buf.len(), MAX_REQUEST_SIZE);
    }

    #[test]
    fn compact_preserves_pipelined_bytes() {
        let mut buf = RequestBuffer::new();
        buf.append(b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n")
            .unwrap();
        let remaining = buf.compact();
        assert_eq!(remaining, b"GET /b HTTP/1.1\r\n\r\n".len());
        assert_eq!(buf.as_slice(), b"GET /b HTTP/1.1\r\n\r\n");
    }

    #[test]
    fn compact_clears_buffer_when_request_fills_it_exactly() {
        let mut buf = RequestBuffer::new();
        buf.append(b"GET /a HTTP/1.1\r\n\r\n").unwrap();
        let remaining = buf.compact();
        assert_eq!(remaining, 0);
        assert!(buf.is_empty());
    }

    #[test]
    fn compact_is_idempotent_on_partial_next_request() {
        let mut buf = RequestBuffer::new();
        buf.append(b"GET /a HTTP/1.1\r\n\r\nGET /par").unwrap();
        let remaining = buf.compact();
        assert_eq!(remaining, b"GET /par".len());
        let before = buf.as_slice().to_vec();
        // A second compact (no new terminator yet) must not mutate further.
        buf.compact();
        assert_eq!(buf.as_slice(), before.as_slice());
    }
}
