/// HTTPS GET surface shared by the manifest fetcher and the firmware downloader
///
/// The firmware implements these traits over `EspHttpConnection`; tests use
/// in-memory streams.
use std::fmt;

pub const HTTP_OK: u16 = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connection or TLS setup failed before a status line arrived
    Connect(String),
    /// Reading the body failed part way through
    Io(String),
    /// Body exceeded the caller's limit
    TooLarge(usize),
    /// Server answered with something other than 200
    Status(u16),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Connect(msg) => write!(f, "connection failed: {}", msg),
            TransportError::Io(msg) => write!(f, "read failed: {}", msg),
            TransportError::TooLarge(limit) => write!(f, "body larger than {} bytes", limit),
            TransportError::Status(code) => write!(f, "HTTP {}", code),
        }
    }
}

impl std::error::Error for TransportError {}

/// An open response: status line and headers received, body not yet read
pub trait HttpStream {
    fn status(&self) -> u16;

    /// Value of the `Content-Length` header, if present and numeric
    fn content_length(&self) -> Option<u64>;

    /// Read the next body bytes; `Ok(0)` marks the end of the body
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;
}

pub trait HttpsClient {
    type Stream: HttpStream;

    fn get(&mut self, url: &str, headers: &[(&str, &str)]) -> Result<Self::Stream, TransportError>;
}

/// `Authorization` header value for the token scheme the firmware host expects
pub fn authorization_value(token: &str) -> String {
    format!("token {}", token)
}

/// Read a whole (small) body into memory, failing once it grows past `limit`
pub fn read_body<S: HttpStream>(stream: &mut S, limit: usize) -> Result<Vec<u8>, TransportError> {
    let mut body = Vec::new();
    let mut buf = [0u8; 512];
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Ok(body);
        }
        if body.len() + n > limit {
            return Err(TransportError::TooLarge(limit));
        }
        body.extend_from_slice(&buf[..n]);
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    struct SliceStream<'a> {
        data: &'a [u8],
        pos: usize,
    }

    impl HttpStream for SliceStream<'_> {
        fn status(&self) -> u16 {
            HTTP_OK
        }

        fn content_length(&self) -> Option<u64> {
            Some(self.data.len() as u64)
        }

        fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
            let n = buf.len().min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    #[test]
    fn test_authorization_value() {
        assert_eq!(authorization_value("abc123"), "token abc123");
    }

    #[test]
    fn test_read_body_collects_all_chunks() {
        let data = vec![7u8; 1300];
        let mut stream = SliceStream { data: &data, pos: 0 };
        assert_eq!(read_body(&mut stream, 4096).unwrap(), data);
    }

    #[test]
    fn test_read_body_enforces_limit() {
        let data = vec![1u8; 2048];
        let mut stream = SliceStream { data: &data, pos: 0 };
        assert_eq!(read_body(&mut stream, 1024), Err(TransportError::TooLarge(1024)));
    }
}
