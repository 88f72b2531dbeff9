// packages/intercept/src/interception/raw_message.rs
//! Raw HTTP/1.1 message parsing and `Host` rewriting
//!
//! Works on bytes rather than decoded text so that binary bodies survive a
//! rewrite untouched. A message is a header block, the first `\r\n\r\n`, and
//! an optional body.

use crate::utils::errors::{InterceptError, Result};
use bytes::{BufMut, Bytes, BytesMut};

/// Line delimiter inside the header block
pub const CRLF: &[u8] = b"\r\n";

/// Blank line terminating the header block
pub const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

const HOST_PREFIX: &[u8] = b"host:";

/// Position of the first header terminator, if any
pub fn find_boundary(buf: &[u8]) -> Option<usize> {
    buf.windows(HEADER_TERMINATOR.len())
        .position(|window| window == HEADER_TERMINATOR)
}

/// Whether a header line is a `Host:` line (case-insensitive)
pub fn is_host_line(line: &[u8]) -> bool {
    line.len() >= HOST_PREFIX.len() && line[..HOST_PREFIX.len()].eq_ignore_ascii_case(HOST_PREFIX)
}

/// Split a header block into its `\r\n`-delimited lines
pub fn split_lines(block: &[u8]) -> impl Iterator<Item = &[u8]> {
    let mut rest = Some(block);
    std::iter::from_fn(move || {
        let current = rest?;
        match current
            .windows(CRLF.len())
            .position(|window| window == CRLF)
        {
            Some(idx) => {
                rest = Some(&current[idx + CRLF.len()..]);
                Some(&current[..idx])
            }
            None => {
                rest = None;
                Some(current)
            }
        }
    })
}

/// Value of the first header named `name` in a header block
pub fn header_value<'a>(block: &'a [u8], name: &str) -> Option<&'a str> {
    split_lines(block).skip(1).find_map(|line| {
        let colon = line.iter().position(|&b| b == b':')?;
        if !line[..colon].eq_ignore_ascii_case(name.as_bytes()) {
            return None;
        }
        std::str::from_utf8(&line[colon + 1..]).ok().map(str::trim)
    })
}

/// Declared `Content-Length` of a header block
pub fn content_length(block: &[u8]) -> Option<usize> {
    header_value(block, "content-length")?.parse().ok()
}

/// One complete HTTP/1.1 request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRequest {
    bytes: Bytes,

    /// Offset of the header terminator
    boundary: usize,
}

impl RawRequest {
    /// Parse a buffer, failing if it has no header terminator
    pub fn parse(bytes: impl Into<Bytes>) -> Result<Self> {
        let bytes = bytes.into();
        let boundary = find_boundary(&bytes).ok_or_else(|| {
            InterceptError::MalformedRequest(format!(
                "no header terminator in {} byte message",
                bytes.len()
            ))
        })?;

        Ok(Self { bytes, boundary })
    }

    /// Header block without the terminating blank line
    pub fn header_block(&self) -> &[u8] {
        &self.bytes[..self.boundary]
    }

    pub fn body(&self) -> &[u8] {
        &self.bytes[self.boundary + HEADER_TERMINATOR.len()..]
    }

    pub fn header_lines(&self) -> impl Iterator<Item = &[u8]> {
        split_lines(self.header_block())
    }

    pub fn request_line(&self) -> Option<&str> {
        self.header_lines()
            .next()
            .and_then(|line| std::str::from_utf8(line).ok())
    }

    /// First header named `name`
    pub fn header(&self, name: &str) -> Option<&str> {
        header_value(self.header_block(), name)
    }

    pub fn host(&self) -> Option<&str> {
        self.header("host")
    }

    pub fn content_length(&self) -> Option<usize> {
        content_length(self.header_block())
    }

    /// Copy of this request with every `Host:` line replaced.
    ///
    /// A request without a `Host:` line comes back unchanged; no line is
    /// injected.
    pub fn with_host(&self, new_host: &str) -> RawRequest {
        let replacement = format!("Host: {}", new_host);
        let body = self.body();

        let mut out = BytesMut::with_capacity(self.bytes.len() + replacement.len());
        for (index, line) in self.header_lines().enumerate() {
            if index > 0 {
                out.put_slice(CRLF);
            }
            if is_host_line(line) {
                out.put_slice(replacement.as_bytes());
            } else {
                out.put_slice(line);
            }
        }
        let boundary = out.len();
        out.put_slice(HEADER_TERMINATOR);
        out.put_slice(body);

        RawRequest {
            bytes: out.freeze(),
            boundary,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }
}

/// Rewrite every `Host:` line of a raw request to `Host: {new_host}`
pub fn rewrite_host(request: &[u8], new_host: &str) -> Result<Bytes> {
    let request = RawRequest::parse(Bytes::copy_from_slice(request))?;
    Ok(request.with_host(new_host).into_bytes())
}
