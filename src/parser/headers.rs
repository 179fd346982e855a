//! Case-insensitive, multi-valued HTTP header store.
//!
//! Names are stored lower-cased; lookups accept any case. The store also
//! tracks the protocol-critical headers (`Host`, `Content-Length`,
//! `Transfer-Encoding`) as they are parsed so the request parser and the
//! connection loop can make framing decisions without re-scanning the map.

use std::collections::HashMap;

use crate::parser::error::Error;

/// Upper bound on the number of header lines in one request.
pub const MAX_HEADER_LINES: usize = 100;

/// Tracking state for protocol-critical headers, updated as lines arrive.
#[derive(Debug, Clone, Default)]
struct Tracking {
    seen_host: bool,
    seen_content_length: bool,
    content_length: u64,
    seen_transfer_encoding: bool,
    is_chunked: bool,
    header_count: usize,
    total_bytes: usize,
}

/// A mapping from lower-cased field name to an ordered sequence of values.
///
/// Insertion order of names is preserved, so serializing the store writes
/// header lines in the order they were added.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    entries: HashMap<String, Vec<String>>,
    order: Vec<String>,
    tracking: Tracking,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the first value for `key`, if present. Case-insensitive.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(&key.to_ascii_lowercase())
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Returns all values for `key` in insertion order. Case-insensitive.
    pub fn get_all(&self, key: &str) -> &[String] {
        self.entries
            .get(&key.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// True if at least one value is stored under `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(&key.to_ascii_lowercase())
    }

    /// Replaces all values for `key` with `value`.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into().to_ascii_lowercase();
        if !self.entries.contains_key(&key) {
            self.order.push(key.clone());
        }
        self.entries.insert(key, vec![value.into()]);
    }

    /// Appends `value` under `key`, keeping existing values.
    ///
    /// This bypasses the per-header validation the parser applies; it is
    /// meant for building outbound header sets.
    pub fn add(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into().to_ascii_lowercase();
        if !self.entries.contains_key(&key) {
            self.order.push(key.clone());
        }
        self.entries.entry(key).or_default().push(value.into());
    }

    /// Removes `key` and all its values.
    pub fn remove(&mut self, key: &str) {
        let key = key.to_ascii_lowercase();
        if self.entries.remove(&key).is_some() {
            self.order.retain(|name| name != &key);
        }
    }

    /// Iterates `(name, value)` pairs: names in insertion order, values in
    /// insertion order within a name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.order.iter().flat_map(move |name| {
            self.entries
                .get(name)
                .into_iter()
                .flatten()
                .map(move |value| (name.as_str(), value.as_str()))
        })
    }

    /// Number of distinct header names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True if a parsed `Transfer-Encoding` header carried the `chunked`
    /// token.
    pub fn is_chunked(&self) -> bool {
        self.tracking.is_chunked
    }

    /// The parsed `Content-Length` value, or `None` if the header was not
    /// present.
    pub fn content_length(&self) -> Option<u64> {
        self.tracking
            .seen_content_length
            .then_some(self.tracking.content_length)
    }

    /// Cumulative bytes across all parsed header lines.
    pub fn total_bytes(&self) -> usize {
        self.tracking.total_bytes
    }

    /// Consumes header lines from `data`.
    ///
    /// Returns `(consumed, done)`: how many bytes were used and whether the
    /// blank-line terminator was reached. When no full line is buffered the
    /// call returns with `done == false` and the caller supplies more data.
    ///
    /// `max_bytes` bounds the cumulative size of all field lines.
    pub fn parse(&mut self, data: &[u8], max_bytes: usize) -> Result<(usize, bool), Error> {
        let mut consumed = 0;

        loop {
            let rest = &data[consumed..];
            let Some(idx) = find_crlf(rest) else {
                // Need more data.
                return Ok((consumed, false));
            };

            if idx == 0 {
                // Empty line terminates the header section.
                consumed += 2;
                self.validate_final()?;
                return Ok((consumed, true));
            }

            if self.tracking.header_count >= MAX_HEADER_LINES {
                return Err(Error::TooManyHeaders);
            }

            let line = &rest[..idx];
            self.tracking.total_bytes += line.len();
            if self.tracking.total_bytes > max_bytes {
                return Err(Error::HeadersTooLarge);
            }

            // Obsolete line folding is refused, not unfolded.
            if line[0] == b' ' || line[0] == b'\t' {
                return Err(Error::ObsoleteLineFolding);
            }

            let (name, value) = parse_field_line(line)?;
            self.add_validated(&name, value)?;

            self.tracking.header_count += 1;
            consumed += idx + 2;
        }
    }

    /// Applies the per-header rules for protocol-critical fields, storing
    /// the line if it survives.
    fn add_validated(&mut self, name: &str, value: String) -> Result<(), Error> {
        let name = name.to_ascii_lowercase();

        match name.as_str() {
            "host" => {
                if self.tracking.seen_host {
                    return Err(Error::DuplicateHost);
                }
                self.tracking.seen_host = true;
                self.set(name, value);
            }
            "content-length" => {
                let cl: u64 = value
                    .parse()
                    .map_err(|_| Error::InvalidContentLength(value.clone()))?;

                if self.tracking.seen_content_length {
                    if self.tracking.content_length != cl {
                        return Err(Error::ConflictingContentLength);
                    }
                    // Identical repeat: tolerated, not stored again.
                    return Ok(());
                }

                self.tracking.seen_content_length = true;
                self.tracking.content_length = cl;
                self.set(name, value);
            }
            "transfer-encoding" => {
                if self.tracking.seen_transfer_encoding {
                    return Err(Error::DuplicateTransferEncoding);
                }
                self.tracking.seen_transfer_encoding = true;

                if value.trim().eq_ignore_ascii_case("chunked") {
                    self.tracking.is_chunked = true;
                }
                self.set(name, value);
            }
            _ => self.add(name, value),
        }

        Ok(())
    }

    fn validate_final(&self) -> Result<(), Error> {
        if self.tracking.is_chunked && self.tracking.seen_content_length {
            return Err(Error::BothChunkedAndLength);
        }
        Ok(())
    }
}

/// Splits a raw field line into a validated name and a trimmed value.
fn parse_field_line(line: &[u8]) -> Result<(String, String), Error> {
    let colon = line
        .iter()
        .position(|&b| b == b':')
        .ok_or(Error::MalformedHeader)?;

    let name = &line[..colon];
    let value = &line[colon + 1..];

    if name.is_empty() {
        return Err(Error::MalformedHeader);
    }
    if name.iter().any(|&b| b == b' ' || b == b'\t') {
        return Err(Error::MalformedHeader);
    }
    for &b in name {
        if !is_token_byte(b) {
            return Err(Error::InvalidHeaderChar(b as char));
        }
    }

    for &b in value {
        if b == 0 || b == b'\r' || b == b'\n' {
            return Err(Error::InvalidHeaderChar(b as char));
        }
    }

    let name = std::str::from_utf8(name).map_err(|_| Error::MalformedHeader)?;
    let value = std::str::from_utf8(value).map_err(|_| Error::MalformedHeader)?;
    let value = value.trim_matches([' ', '\t']);

    Ok((name.to_string(), value.to_string()))
}

/// RFC 7230 token characters, legal in header field names.
fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric()
        || matches!(
            b,
            b'!' | b'#'
                | b'$'
                | b'%'
                | b'&'
                | b'\''
                | b'*'
                | b'+'
                | b'-'
                | b'.'
                | b'^'
                | b'_'
                | b'`'
                | b'|'
                | b'~'
        )
}

/// Position of the first CRLF in `data`, if any.
pub(crate) fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(2).position(|pair| pair == b"\r\n")
}
