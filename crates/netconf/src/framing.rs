//! Message framing over the ssh byte stream (RFC 6242)
//!
//! Both peers start with end-of-message framing for the hello. When both
//! advertise base:1.1 every later message uses chunked framing.

use crate::error::{Error, Result};

/// End-of-message delimiter used by base:1.0
pub const END_OF_MESSAGE: &str = "]]>]]>";

/// Largest chunk size RFC 6242 allows
const MAX_CHUNK_SIZE: usize = 4_294_967_295;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    EndOfMessage,
    Chunked,
}

impl Framing {
    /// Frame one message for the wire
    pub fn encode(self, message: &str) -> Vec<u8> {
        match self {
            Self::EndOfMessage => format!("{message}{END_OF_MESSAGE}").into_bytes(),
            Self::Chunked => format!("\n#{}\n{message}\n##\n", message.len()).into_bytes(),
        }
    }
}

/// Incremental decoder for a framed byte stream
#[derive(Debug)]
pub struct Decoder {
    framing: Framing,
    buf: Vec<u8>,
}

impl Decoder {
    pub fn new(framing: Framing) -> Self {
        Self {
            framing,
            buf: Vec::new(),
        }
    }

    /// Switch framing; applies to bytes not yet decoded
    pub fn set_framing(&mut self, framing: Framing) {
        self.framing = framing;
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Next complete message, or `None` until more bytes arrive
    pub fn next_message(&mut self) -> Result<Option<String>> {
        match self.framing {
            Framing::EndOfMessage => Ok(self.next_delimited()),
            Framing::Chunked => self.next_chunked(),
        }
    }

    fn next_delimited(&mut self) -> Option<String> {
        let delimiter = END_OF_MESSAGE.as_bytes();
        let end = self
            .buf
            .windows(delimiter.len())
            .position(|w| w == delimiter)?;

        let message = String::from_utf8_lossy(&self.buf[..end]).trim().to_string();
        self.buf.drain(..end + delimiter.len());
        Some(message)
    }

    fn next_chunked(&mut self) -> Result<Option<String>> {
        let mut pos = 0;
        let mut body = Vec::new();

        loop {
            // Whitespace before a chunk header is tolerated, including the
            // newline that starts every header
            while pos < self.buf.len() && self.buf[pos].is_ascii_whitespace() {
                pos += 1;
            }
            let rest = &self.buf[pos..];
            if rest.is_empty() {
                return Ok(None);
            }
            if rest[0] != b'#' {
                return Err(Error::Framing(format!(
                    "expected chunk header, found byte 0x{:02x}",
                    rest[0]
                )));
            }
            if rest.len() < 2 {
                return Ok(None);
            }

            if rest[1] == b'#' {
                match rest.get(2) {
                    None => return Ok(None),
                    Some(b'\n') => {
                        pos += 3;
                        break;
                    }
                    Some(_) => {
                        return Err(Error::Framing("malformed end-of-chunks marker".into()));
                    }
                }
            }

            let Some(newline) = rest[1..].iter().position(|&b| b == b'\n') else {
                if rest.len() > 12 {
                    return Err(Error::Framing("chunk size too long".into()));
                }
                return Ok(None);
            };
            let digits = &rest[1..=newline];
            let size = std::str::from_utf8(digits)
                .ok()
                .and_then(|s| s.parse::<usize>().ok())
                .filter(|&n| n > 0 && n <= MAX_CHUNK_SIZE)
                .ok_or_else(|| {
                    Error::Framing(format!(
                        "invalid chunk size '{}'",
                        String::from_utf8_lossy(digits)
                    ))
                })?;

            let start = newline + 2;
            if rest.len() < start + size {
                return Ok(None);
            }
            body.extend_from_slice(&rest[start..start + size]);
            pos += start + size;
        }

        self.buf.drain(..pos);
        Ok(Some(String::from_utf8_lossy(&body).trim().to_string()))
    }
}
