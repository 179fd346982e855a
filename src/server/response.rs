//! HTTP response serialization.
//!
//! [`ResponseWriter`] enforces the wire ordering of a response as a phase
//! machine: status line, then headers, then exactly one body (fixed-length
//! or chunked). Out-of-order calls are errors and produce no output. The
//! connection loop consults the writer afterwards to learn what was
//! actually sent.

use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::parser::Headers;
use crate::server::error::Error;

/// HTTP status codes with their standard reason phrases.
///
/// Codes outside the recognized set are carried by [`StatusCode::Other`]
/// and serialized with the reason phrase `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Continue,
    SwitchingProtocols,
    Ok,
    Created,
    Accepted,
    NoContent,
    PartialContent,
    MovedPermanently,
    Found,
    SeeOther,
    NotModified,
    TemporaryRedirect,
    PermanentRedirect,
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    MethodNotAllowed,
    NotAcceptable,
    RequestTimeout,
    Conflict,
    PreconditionFailed,
    PayloadTooLarge,
    UriTooLong,
    UnsupportedMediaType,
    RangeNotSatisfiable,
    ExpectationFailed,
    TooManyRequests,
    InternalServerError,
    NotImplemented,
    BadGateway,
    ServiceUnavailable,
    GatewayTimeout,
    HttpVersionNotSupported,
    /// Any code the engine does not know by name.
    Other(u16),
}

impl StatusCode {
    pub fn from_u16(code: u16) -> Self {
        match code {
            100 => StatusCode::Continue,
            101 => StatusCode::SwitchingProtocols,
            200 => StatusCode::Ok,
            201 => StatusCode::Created,
            202 => StatusCode::Accepted,
            204 => StatusCode::NoContent,
            206 => StatusCode::PartialContent,
            301 => StatusCode::MovedPermanently,
            302 => StatusCode::Found,
            303 => StatusCode::SeeOther,
            304 => StatusCode::NotModified,
            307 => StatusCode::TemporaryRedirect,
            308 => StatusCode::PermanentRedirect,
            400 => StatusCode::BadRequest,
            401 => StatusCode::Unauthorized,
            403 => StatusCode::Forbidden,
            404 => StatusCode::NotFound,
            405 => StatusCode::MethodNotAllowed,
            406 => StatusCode::NotAcceptable,
            408 => StatusCode::RequestTimeout,
            409 => StatusCode::Conflict,
            412 => StatusCode::PreconditionFailed,
            413 => StatusCode::PayloadTooLarge,
            414 => StatusCode::UriTooLong,
            415 => StatusCode::UnsupportedMediaType,
            416 => StatusCode::RangeNotSatisfiable,
            417 => StatusCode::ExpectationFailed,
            429 => StatusCode::TooManyRequests,
            500 => StatusCode::InternalServerError,
            501 => StatusCode::NotImplemented,
            502 => StatusCode::BadGateway,
            503 => StatusCode::ServiceUnavailable,
            504 => StatusCode::GatewayTimeout,
            505 => StatusCode::HttpVersionNotSupported,
            other => StatusCode::Other(other),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            StatusCode::Continue => 100,
            StatusCode::SwitchingProtocols => 101,
            StatusCode::Ok => 200,
            StatusCode::Created => 201,
            StatusCode::Accepted => 202,
            StatusCode::NoContent => 204,
            StatusCode::PartialContent => 206,
            StatusCode::MovedPermanently => 301,
            StatusCode::Found => 302,
            StatusCode::SeeOther => 303,
            StatusCode::NotModified => 304,
            StatusCode::TemporaryRedirect => 307,
            StatusCode::PermanentRedirect => 308,
            StatusCode::BadRequest => 400,
            StatusCode::Unauthorized => 401,
            StatusCode::Forbidden => 403,
            StatusCode::NotFound => 404,
            StatusCode::MethodNotAllowed => 405,
            StatusCode::NotAcceptable => 406,
            StatusCode::RequestTimeout => 408,
            StatusCode::Conflict => 409,
            StatusCode::PreconditionFailed => 412,
            StatusCode::PayloadTooLarge => 413,
            StatusCode::UriTooLong => 414,
            StatusCode::UnsupportedMediaType => 415,
            StatusCode::RangeNotSatisfiable => 416,
            StatusCode::ExpectationFailed => 417,
            StatusCode::TooManyRequests => 429,
            StatusCode::InternalServerError => 500,
            StatusCode::NotImplemented => 501,
            StatusCode::BadGateway => 502,
            StatusCode::ServiceUnavailable => 503,
            StatusCode::GatewayTimeout => 504,
            StatusCode::HttpVersionNotSupported => 505,
            StatusCode::Other(code) => *code,
        }
    }

    /// Get the reason phrase for this status code.
    pub fn reason_phrase(&self) -> &'static str {
        match self {
            StatusCode::Continue => "Continue",
            StatusCode::SwitchingProtocols => "Switching Protocols",
            StatusCode::Ok => "OK",
            StatusCode::Created => "Created",
            StatusCode::Accepted => "Accepted",
            StatusCode::NoContent => "No Content",
            StatusCode::PartialContent => "Partial Content",
            StatusCode::MovedPermanently => "Moved Permanently",
            StatusCode::Found => "Found",
            StatusCode::SeeOther => "See Other",
            StatusCode::NotModified => "Not Modified",
            StatusCode::TemporaryRedirect => "Temporary Redirect",
            StatusCode::PermanentRedirect => "Permanent Redirect",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::Unauthorized => "Unauthorized",
            StatusCode::Forbidden => "Forbidden",
            StatusCode::NotFound => "Not Found",
            StatusCode::MethodNotAllowed => "Method Not Allowed",
            StatusCode::NotAcceptable => "Not Acceptable",
            StatusCode::RequestTimeout => "Request Timeout",
            StatusCode::Conflict => "Conflict",
            StatusCode::PreconditionFailed => "Precondition Failed",
            StatusCode::PayloadTooLarge => "Payload Too Large",
            StatusCode::UriTooLong => "URI Too Long",
            StatusCode::UnsupportedMediaType => "Unsupported Media Type",
            StatusCode::RangeNotSatisfiable => "Range Not Satisfiable",
            StatusCode::ExpectationFailed => "Expectation Failed",
            StatusCode::TooManyRequests => "Too Many Requests",
            StatusCode::InternalServerError => "Internal Server Error",
            StatusCode::NotImplemented => "Not Implemented",
            StatusCode::BadGateway => "Bad Gateway",
            StatusCode::ServiceUnavailable => "Service Unavailable",
            StatusCode::GatewayTimeout => "Gateway Timeout",
            StatusCode::HttpVersionNotSupported => "HTTP Version Not Supported",
            StatusCode::Other(_) => "Unknown",
        }
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.as_u16())
    }

    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.as_u16())
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.reason_phrase())
    }
}

/// Write phases, in mandatory order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Start,
    StatusWritten,
    HeadersWritten,
    BodyWritten,
}

/// What the connection loop needs to know about a finished response.
#[derive(Debug, Clone, Copy)]
pub struct ResponseSummary {
    pub status_code: Option<StatusCode>,
    pub has_content_length: bool,
    pub is_chunked: bool,
    pub had_error: bool,
    pub declared_close: bool,
    /// True once any response byte reached the transport.
    pub wrote_anything: bool,
}

/// Phase-enforced serializer for one HTTP response.
#[derive(Debug)]
pub struct ResponseWriter<W> {
    writer: W,
    phase: Phase,
    status_code: Option<StatusCode>,
    content_length: Option<u64>,
    is_chunked: bool,
    chunked_finished: bool,
    had_error: bool,
    declared_close: bool,
    head: bool,
    staged: Headers,
}

impl<W: AsyncWrite + Unpin> ResponseWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            phase: Phase::Start,
            status_code: None,
            content_length: None,
            is_chunked: false,
            chunked_finished: false,
            had_error: false,
            declared_close: false,
            head: false,
            staged: Headers::new(),
        }
    }

    /// Mark this response as answering a HEAD request: body bytes are
    /// discarded while the phase machine still advances.
    pub fn suppress_body(&mut self) {
        self.head = true;
    }

    /// Stage a header to be merged into the response when headers are
    /// written, overriding any same-named header from the handler.
    pub fn stage_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.staged.set(name, value);
    }

    /// Emit the status line. Valid only before anything else was written.
    pub async fn write_status_line(&mut self, code: StatusCode) -> Result<(), Error> {
        if self.phase != Phase::Start {
            self.had_error = true;
            return Err(Error::ResponseState("status line already written"));
        }

        let line = format!("HTTP/1.1 {} {}\r\n", code.as_u16(), code.reason_phrase());
        self.sink(line.as_bytes()).await?;

        self.status_code = Some(code);
        self.phase = Phase::StatusWritten;
        Ok(())
    }

    /// Emit the header section and the blank line that ends it.
    ///
    /// Staged headers override same-named handler headers. The writer
    /// inspects the merged set to learn the response framing.
    pub async fn write_headers(&mut self, headers: &Headers) -> Result<(), Error> {
        if self.phase != Phase::StatusWritten {
            self.had_error = true;
            return Err(Error::ResponseState("must write status line before headers"));
        }

        let staged: Vec<(String, String)> = self
            .staged
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();

        let mut merged = headers.clone();
        for (name, _) in &staged {
            merged.remove(name);
        }
        for (name, value) in &staged {
            merged.add(name.clone(), value.clone());
        }

        if let Some(cl) = merged.get("content-length") {
            if let Ok(length) = cl.parse::<u64>() {
                self.content_length = Some(length);
            }
        }
        if let Some(te) = merged.get("transfer-encoding") {
            if te.trim().eq_ignore_ascii_case("chunked") {
                self.is_chunked = true;
            }
        }
        if merged.get_all("connection").iter().any(|value| {
            value
                .split(',')
                .any(|token| token.trim().eq_ignore_ascii_case("close"))
        }) {
            self.declared_close = true;
        }

        let mut section = String::new();
        for (name, value) in merged.iter() {
            section.push_str(name);
            section.push_str(": ");
            section.push_str(value);
            section.push_str("\r\n");
        }
        section.push_str("\r\n");
        self.sink(section.as_bytes()).await?;

        self.phase = Phase::HeadersWritten;
        Ok(())
    }

    /// Emit a complete fixed-length (or empty) body.
    pub async fn write_body(&mut self, data: &[u8]) -> Result<(), Error> {
        if self.phase != Phase::HeadersWritten {
            self.had_error = true;
            return Err(Error::ResponseState("must write headers before body"));
        }

        if !data.is_empty() && !self.head {
            self.sink(data).await?;
        }

        self.phase = Phase::BodyWritten;
        Ok(())
    }

    /// Emit one chunk of a chunked body. Empty chunks are no-ops; the
    /// zero-size terminator comes from [`finish_chunked`].
    ///
    /// [`finish_chunked`]: ResponseWriter::finish_chunked
    pub async fn write_chunk(&mut self, data: &[u8]) -> Result<(), Error> {
        if self.phase != Phase::HeadersWritten && self.phase != Phase::BodyWritten {
            self.had_error = true;
            return Err(Error::ResponseState("must write headers before chunks"));
        }
        if self.chunked_finished {
            self.had_error = true;
            return Err(Error::ResponseState("chunked body already finished"));
        }

        if data.is_empty() {
            return Ok(());
        }

        if !self.head {
            let framed = format!("{:x}\r\n", data.len());
            self.sink(framed.as_bytes()).await?;
            self.sink(data).await?;
            self.sink(b"\r\n").await?;
        }

        self.phase = Phase::BodyWritten;
        Ok(())
    }

    /// Terminate a chunked body with the zero-size chunk.
    pub async fn finish_chunked(&mut self) -> Result<(), Error> {
        if self.phase != Phase::HeadersWritten && self.phase != Phase::BodyWritten {
            self.had_error = true;
            return Err(Error::ResponseState("must write headers before finishing chunks"));
        }
        if self.chunked_finished {
            self.had_error = true;
            return Err(Error::ResponseState("chunked body already finished"));
        }

        if !self.head {
            self.sink(b"0\r\n\r\n").await?;
        }

        self.chunked_finished = true;
        self.phase = Phase::BodyWritten;
        Ok(())
    }

    /// Terminate a chunked body with the zero-size chunk followed by
    /// trailer fields. An alternative to [`finish_chunked`], not a
    /// follow-up to it.
    ///
    /// [`finish_chunked`]: ResponseWriter::finish_chunked
    pub async fn write_trailers(&mut self, trailers: &Headers) -> Result<(), Error> {
        if self.phase != Phase::BodyWritten {
            self.had_error = true;
            return Err(Error::ResponseState("must write body before trailers"));
        }
        if !self.is_chunked || self.chunked_finished {
            self.had_error = true;
            return Err(Error::ResponseState("trailers require an unfinished chunked body"));
        }

        if !self.head {
            let mut section = String::from("0\r\n");
            for (name, value) in trailers.iter() {
                section.push_str(name);
                section.push_str(": ");
                section.push_str(value);
                section.push_str("\r\n");
            }
            section.push_str("\r\n");
            self.sink(section.as_bytes()).await?;
        }

        self.chunked_finished = true;
        Ok(())
    }

    /// Emit an interim `100 Continue` response. Out-of-band: legal only
    /// before the status line, and does not advance the phase machine.
    pub async fn write_continue(&mut self) -> Result<(), Error> {
        if self.phase != Phase::Start {
            self.had_error = true;
            return Err(Error::ResponseState("100 Continue after response started"));
        }
        self.sink(b"HTTP/1.1 100 Continue\r\n\r\n").await?;
        self.flush().await
    }

    pub async fn flush(&mut self) -> Result<(), Error> {
        if let Err(e) = self.writer.flush().await {
            self.had_error = true;
            return Err(e.into());
        }
        Ok(())
    }

    async fn sink(&mut self, bytes: &[u8]) -> Result<(), Error> {
        if let Err(e) = self.writer.write_all(bytes).await {
            self.had_error = true;
            return Err(e.into());
        }
        Ok(())
    }

    // Convenience wrappers: complete status + headers + body sequences.

    /// Send a plain-text response.
    pub async fn text(&mut self, code: StatusCode, body: &str) -> Result<(), Error> {
        self.send_fixed(code, "text/plain; charset=utf-8", body.as_bytes())
            .await
    }

    /// Send an HTML response.
    pub async fn html(&mut self, code: StatusCode, body: &str) -> Result<(), Error> {
        self.send_fixed(code, "text/html; charset=utf-8", body.as_bytes())
            .await
    }

    /// Serialize `value` to JSON and send it.
    pub async fn json<T: Serialize>(&mut self, code: StatusCode, value: &T) -> Result<(), Error> {
        let body = serde_json::to_vec(value)?;
        self.send_fixed(code, "application/json", &body).await
    }

    /// Send a standard error response body for `code`.
    pub async fn error(&mut self, code: StatusCode, message: &str) -> Result<(), Error> {
        let message = if message.is_empty() {
            code.reason_phrase()
        } else {
            message
        };
        let body = format!("Error {}: {}\r\n", code.as_u16(), message);
        self.send_fixed(code, "text/plain; charset=utf-8", body.as_bytes())
            .await
    }

    /// Send a redirect to `location`.
    pub async fn redirect(&mut self, code: StatusCode, location: &str) -> Result<(), Error> {
        self.write_status_line(code).await?;
        let mut headers = Headers::new();
        headers.set("location", location);
        headers.set("content-length", "0");
        self.write_headers(&headers).await?;
        self.write_body(&[]).await
    }

    /// Send `204 No Content`.
    pub async fn no_content(&mut self) -> Result<(), Error> {
        self.write_status_line(StatusCode::NoContent).await?;
        self.write_headers(&Headers::new()).await?;
        self.write_body(&[]).await
    }

    async fn send_fixed(
        &mut self,
        code: StatusCode,
        content_type: &str,
        body: &[u8],
    ) -> Result<(), Error> {
        self.write_status_line(code).await?;

        let mut headers = Headers::new();
        headers.set("content-type", content_type);
        headers.set("content-length", body.len().to_string());
        self.write_headers(&headers).await?;

        self.write_body(body).await
    }

    // Observability for the connection loop.

    /// The status code recorded by `write_status_line`, if any.
    pub fn status_code(&self) -> Option<StatusCode> {
        self.status_code
    }

    pub fn has_content_length(&self) -> bool {
        self.content_length.is_some()
    }

    pub fn is_chunked(&self) -> bool {
        self.is_chunked
    }

    pub fn had_error(&self) -> bool {
        self.had_error
    }

    /// True if the outbound headers declared `Connection: close`.
    pub fn declared_close(&self) -> bool {
        self.declared_close
    }

    pub fn summary(&self) -> ResponseSummary {
        ResponseSummary {
            status_code: self.status_code,
            has_content_length: self.content_length.is_some(),
            is_chunked: self.is_chunked,
            had_error: self.had_error,
            declared_close: self.declared_close,
            wrote_anything: self.phase != Phase::Start,
        }
    }
}
