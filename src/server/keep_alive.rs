//! Connection reuse policy.
//!
//! The single source of truth for whether a connection survives the
//! request it just served. The connection loop never decides on its own.

use crate::parser::HttpRequest;
use crate::server::response::ResponseSummary;

/// Decide whether the connection must close after this exchange.
///
/// Rules are evaluated in order; the first match wins:
/// 1. server shutting down,
/// 2. the writer hit an error,
/// 3. the response declared `Connection: close`,
/// 4. HTTP/1.0 without an explicit `keep-alive`,
/// 5. HTTP/1.1 with an explicit `close`,
/// 6. a response whose end the peer cannot determine (no Content-Length,
///    not chunked),
/// 7. otherwise: reuse.
pub fn should_close(
    request: &HttpRequest,
    response: &ResponseSummary,
    shutting_down: bool,
) -> bool {
    if shutting_down {
        return true;
    }

    if response.had_error {
        return true;
    }

    if response.declared_close {
        return true;
    }

    if request.is_http10() {
        return !request.wants_keep_alive();
    }

    if request.wants_close() {
        return true;
    }

    if !response.has_content_length && !response.is_chunked {
        return true;
    }

    false
}
