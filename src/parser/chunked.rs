//! Incremental parser for `Transfer-Encoding: chunked` bodies.
//!
//! The sub-parser carries its state across reads: a chunk size line may be
//! split between two TCP segments, and chunk data may arrive one byte at a
//! time. Each call consumes what it can and reports whether the final
//! zero-size chunk (and any trailers) have been seen.

use crate::parser::error::Error;
use crate::parser::headers::find_crlf;

/// Largest single chunk the parser accepts.
pub const MAX_CHUNK_SIZE: u64 = 10 * 1024 * 1024;

/// Bound on the chunk size line, including any `;` extensions.
pub const MAX_CHUNK_SIZE_LINE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    /// Expecting `SIZE[;extensions]\r\n`.
    Size,
    /// Copying chunk payload bytes.
    Data,
    /// Expecting the CRLF that closes a chunk's payload.
    DataCrlf,
    /// After the zero-size chunk: either an immediate CRLF or trailer
    /// fields terminated by a blank line.
    Trailer,
    Done,
}

/// Chunked-body sub-parser. State must be preserved across calls.
#[derive(Debug)]
pub struct ChunkParser {
    state: ChunkState,
    chunk_size: usize,
    chunk_read: usize,
    total_body: u64,
}

impl Default for ChunkParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkParser {
    pub fn new() -> Self {
        Self {
            state: ChunkState::Size,
            chunk_size: 0,
            chunk_read: 0,
            total_body: 0,
        }
    }

    /// Consumes chunked-body bytes from `data`, appending payload to `body`.
    ///
    /// Returns `(consumed, done)`. `done` is true once the terminating
    /// zero-size chunk and its trailer region have been fully consumed.
    /// `max_body` bounds the cumulative payload across all chunks.
    pub fn parse(
        &mut self,
        data: &[u8],
        body: &mut Vec<u8>,
        max_body: u64,
    ) -> Result<(usize, bool), Error> {
        let mut consumed = 0;

        while consumed < data.len() {
            match self.state {
                ChunkState::Size => {
                    let n = self.parse_size_line(&data[consumed..])?;
                    if n == 0 {
                        // Need more data.
                        return Ok((consumed, false));
                    }
                    consumed += n;

                    if self.chunk_size == 0 {
                        self.state = ChunkState::Trailer;
                    } else {
                        self.state = ChunkState::Data;
                        self.chunk_read = 0;
                    }
                }

                ChunkState::Data => {
                    let remaining = self.chunk_size - self.chunk_read;
                    let available = data.len() - consumed;
                    let to_read = remaining.min(available);

                    if self.total_body + to_read as u64 > max_body {
                        return Err(Error::BodyTooLarge);
                    }

                    body.extend_from_slice(&data[consumed..consumed + to_read]);
                    consumed += to_read;
                    self.chunk_read += to_read;
                    self.total_body += to_read as u64;

                    if self.chunk_read == self.chunk_size {
                        self.state = ChunkState::DataCrlf;
                    } else {
                        return Ok((consumed, false));
                    }
                }

                ChunkState::DataCrlf => {
                    if data.len() - consumed < 2 {
                        return Ok((consumed, false));
                    }
                    if data[consumed] != b'\r' || data[consumed + 1] != b'\n' {
                        return Err(Error::InvalidChunkFormat(
                            "missing CRLF after chunk data".to_string(),
                        ));
                    }
                    consumed += 2;
                    self.state = ChunkState::Size;
                }

                ChunkState::Trailer => {
                    let rest = &data[consumed..];
                    if rest.len() < 2 {
                        return Ok((consumed, false));
                    }

                    // No trailer fields: the body ends right here.
                    if rest[0] == b'\r' && rest[1] == b'\n' {
                        consumed += 2;
                        self.state = ChunkState::Done;
                        return Ok((consumed, true));
                    }

                    let Some(idx) = find_double_crlf(rest) else {
                        if rest.len() > MAX_CHUNK_SIZE_LINE {
                            return Err(Error::InvalidChunkFormat(
                                "trailer headers too large".to_string(),
                            ));
                        }
                        return Ok((consumed, false));
                    };

                    let trailers = &rest[..idx];
                    if trailers.contains(&0) {
                        return Err(Error::InvalidChunkFormat(
                            "null byte in trailer headers".to_string(),
                        ));
                    }

                    consumed += idx + 4;
                    self.state = ChunkState::Done;
                    return Ok((consumed, true));
                }

                ChunkState::Done => return Ok((consumed, true)),
            }
        }

        Ok((consumed, self.state == ChunkState::Done))
    }

    /// Parses `SIZE[;extensions]\r\n`. Returns bytes consumed, or 0 when a
    /// full line is not yet buffered.
    fn parse_size_line(&mut self, data: &[u8]) -> Result<usize, Error> {
        let search = &data[..data.len().min(MAX_CHUNK_SIZE_LINE)];

        let Some(idx) = find_crlf(search) else {
            if data.len() >= MAX_CHUNK_SIZE_LINE {
                return Err(Error::InvalidChunkFormat(
                    "chunk size line too long".to_string(),
                ));
            }
            return Ok(0);
        };

        let line = &data[..idx];

        // Extensions after ';' are ignored but must not smuggle control bytes.
        let (size_part, extension) = match line.iter().position(|&b| b == b';') {
            Some(semi) => (&line[..semi], Some(&line[semi + 1..])),
            None => (line, None),
        };

        if let Some(ext) = extension {
            if ext.iter().any(|&b| b == 0 || b == b'\r' || b == b'\n') {
                return Err(Error::InvalidChunkFormat(
                    "invalid characters in chunk extension".to_string(),
                ));
            }
        }

        let size_hex = std::str::from_utf8(size_part)
            .map_err(|_| Error::InvalidChunkSize(String::from_utf8_lossy(size_part).into_owned()))?
            .trim();

        let size = u64::from_str_radix(size_hex, 16)
            .map_err(|_| Error::InvalidChunkSize(size_hex.to_string()))?;

        if size > MAX_CHUNK_SIZE {
            return Err(Error::ChunkTooLarge);
        }

        self.chunk_size = size as usize;
        Ok(idx + 2)
    }
}

fn find_double_crlf(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|window| window == b"\r\n\r\n")
}
