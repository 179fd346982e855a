//! Tests for the HTTP server implementation.

#[cfg(test)]
mod server_tests {
    use std::collections::VecDeque;
    use std::io;
    use std::pin::Pin;
    use std::sync::atomic::AtomicBool;
    use std::sync::{Arc, Mutex};
    use std::task::{Context as TaskContext, Poll};
    use std::time::Duration;

    use serde::Serialize;
    use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

    use crate::parser::{parse_request, Headers};
    use crate::server::{
        serve_connection, should_close, ConnOutcome, Context, DynWriter, Error, Handler,
        HandlerFuture, HttpServer, Metrics, ResponseSummary, ResponseWriter, ServerConfig,
        StatusCode,
    };

    // Mock TcpStream for testing: reads come from scripted segments,
    // writes land in a shared buffer the test can inspect afterwards.
    struct MockTcpStream {
        read_data: VecDeque<Vec<u8>>,
        write_data: Arc<Mutex<Vec<u8>>>,
    }

    impl MockTcpStream {
        fn new(read_data: Vec<u8>) -> Self {
            Self::segmented(vec![read_data])
        }

        fn segmented(segments: Vec<Vec<u8>>) -> Self {
            Self {
                read_data: segments.into(),
                write_data: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn written(&self) -> Arc<Mutex<Vec<u8>>> {
            self.write_data.clone()
        }
    }

    impl AsyncRead for MockTcpStream {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut TaskContext<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            let this = self.get_mut();
            if let Some(mut segment) = this.read_data.pop_front() {
                let n = segment.len().min(buf.remaining());
                buf.put_slice(&segment[..n]);
                if n < segment.len() {
                    let rest = segment.split_off(n);
                    this.read_data.push_front(rest);
                }
            }
            Poll::Ready(Ok(()))
        }
    }

    impl AsyncWrite for MockTcpStream {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut TaskContext<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            let this = self.get_mut();
            this.write_data.lock().unwrap().extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: Pin<&mut Self>,
            _cx: &mut TaskContext<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    fn written_string(written: &Arc<Mutex<Vec<u8>>>) -> String {
        String::from_utf8_lossy(&written.lock().unwrap()).into_owned()
    }

    // Test handlers.

    struct TextHandler;

    impl Handler for TextHandler {
        fn serve<'a>(&'a self, ctx: &'a mut Context<'_, '_>) -> HandlerFuture<'a> {
            Box::pin(async move { ctx.text(StatusCode::Ok, "Test response").await })
        }
    }

    struct EchoHandler;

    impl Handler for EchoHandler {
        fn serve<'a>(&'a self, ctx: &'a mut Context<'_, '_>) -> HandlerFuture<'a> {
            Box::pin(async move {
                let body = ctx.body_str().into_owned();
                ctx.text(StatusCode::Ok, &body).await
            })
        }
    }

    struct FailingHandler;

    impl Handler for FailingHandler {
        fn serve<'a>(&'a self, _ctx: &'a mut Context<'_, '_>) -> HandlerFuture<'a> {
            Box::pin(async { Err(Error::Handler("handler exploded".to_string())) })
        }
    }

    struct HijackHandler;

    impl Handler for HijackHandler {
        fn serve<'a>(&'a self, ctx: &'a mut Context<'_, '_>) -> HandlerFuture<'a> {
            Box::pin(async move {
                ctx.response()
                    .write_status_line(StatusCode::SwitchingProtocols)
                    .await?;
                ctx.response().write_headers(&Headers::new()).await?;
                ctx.response().write_body(&[]).await?;
                ctx.hijack()?;
                Ok(())
            })
        }
    }

    // Response writer.

    #[tokio::test]
    async fn test_writer_basic_response() {
        let mut out: Vec<u8> = Vec::new();
        let mut writer = ResponseWriter::new(&mut out);

        let mut headers = Headers::new();
        headers.set("content-type", "text/plain");
        headers.set("content-length", "5");

        writer.write_status_line(StatusCode::Ok).await.unwrap();
        writer.write_headers(&headers).await.unwrap();
        writer.write_body(b"Hello").await.unwrap();

        assert_eq!(writer.status_code(), Some(StatusCode::Ok));
        assert!(writer.has_content_length());
        assert!(!writer.is_chunked());
        drop(writer);

        assert_eq!(
            out,
            b"HTTP/1.1 200 OK\r\ncontent-type: text/plain\r\ncontent-length: 5\r\n\r\nHello"
        );
    }

    #[tokio::test]
    async fn test_writer_preserves_header_order() {
        let mut out: Vec<u8> = Vec::new();
        let mut writer = ResponseWriter::new(&mut out);

        let mut headers = Headers::new();
        headers.set("b-second", "2");
        headers.set("a-first", "1");
        headers.add("set-cookie", "x=1");
        headers.add("set-cookie", "y=2");

        writer.write_status_line(StatusCode::Ok).await.unwrap();
        writer.write_headers(&headers).await.unwrap();
        drop(writer);

        let text = String::from_utf8(out).unwrap();
        let b = text.find("b-second").unwrap();
        let a = text.find("a-first").unwrap();
        let x = text.find("x=1").unwrap();
        let y = text.find("y=2").unwrap();
        assert!(b < a, "insertion order must be preserved");
        assert!(x < y, "multi-value order must be preserved");
    }

    #[tokio::test]
    async fn test_writer_phase_discipline() {
        let mut out: Vec<u8> = Vec::new();
        let mut writer = ResponseWriter::new(&mut out);

        // Headers before status line.
        let result = writer.write_headers(&Headers::new()).await;
        assert!(matches!(result, Err(Error::ResponseState(_))));
        assert!(writer.had_error());
        drop(writer);
        assert!(out.is_empty(), "a rejected call must produce no output");

        // Body before headers.
        let mut out: Vec<u8> = Vec::new();
        let mut writer = ResponseWriter::new(&mut out);
        writer.write_status_line(StatusCode::Ok).await.unwrap();
        let result = writer.write_body(b"x").await;
        assert!(matches!(result, Err(Error::ResponseState(_))));

        // Body twice.
        let mut out: Vec<u8> = Vec::new();
        let mut writer = ResponseWriter::new(&mut out);
        writer.write_status_line(StatusCode::Ok).await.unwrap();
        writer.write_headers(&Headers::new()).await.unwrap();
        writer.write_body(b"x").await.unwrap();
        let result = writer.write_body(b"y").await;
        assert!(matches!(result, Err(Error::ResponseState(_))));

        // Status line twice.
        let mut out: Vec<u8> = Vec::new();
        let mut writer = ResponseWriter::new(&mut out);
        writer.write_status_line(StatusCode::Ok).await.unwrap();
        let result = writer.write_status_line(StatusCode::NotFound).await;
        assert!(matches!(result, Err(Error::ResponseState(_))));
    }

    #[tokio::test]
    async fn test_writer_chunked_body() {
        let mut out: Vec<u8> = Vec::new();
        let mut writer = ResponseWriter::new(&mut out);

        let mut headers = Headers::new();
        headers.set("transfer-encoding", "chunked");

        writer.write_status_line(StatusCode::Ok).await.unwrap();
        writer.write_headers(&headers).await.unwrap();
        assert!(writer.is_chunked());

        writer.write_chunk(b"Hello").await.unwrap();
        writer.write_chunk(b"").await.unwrap(); // no-op, never emitted
        writer.write_chunk(b", World").await.unwrap();
        writer.finish_chunked().await.unwrap();

        let result = writer.write_chunk(b"late").await;
        assert!(matches!(result, Err(Error::ResponseState(_))));
        drop(writer);

        let text = String::from_utf8(out).unwrap();
        assert!(text.ends_with("5\r\nHello\r\n7\r\n, World\r\n0\r\n\r\n"));
    }

    #[tokio::test]
    async fn test_writer_trailers_terminate_chunked_stream() {
        let mut out: Vec<u8> = Vec::new();
        let mut writer = ResponseWriter::new(&mut out);

        let mut headers = Headers::new();
        headers.set("transfer-encoding", "chunked");

        writer.write_status_line(StatusCode::Ok).await.unwrap();
        writer.write_headers(&headers).await.unwrap();
        writer.write_chunk(b"Hello").await.unwrap();

        let mut trailers = Headers::new();
        trailers.set("x-checksum", "abc123");
        writer.write_trailers(&trailers).await.unwrap();
        drop(writer);

        let text = String::from_utf8(out).unwrap();
        assert!(text.ends_with("5\r\nHello\r\n0\r\nx-checksum: abc123\r\n\r\n"));
    }

    #[tokio::test]
    async fn test_write_continue_is_out_of_band() {
        let mut out: Vec<u8> = Vec::new();
        let mut writer = ResponseWriter::new(&mut out);

        writer.write_continue().await.unwrap();
        // The phase machine is untouched: a full response still works.
        writer.write_status_line(StatusCode::Ok).await.unwrap();
        writer.write_headers(&Headers::new()).await.unwrap();
        writer.write_body(&[]).await.unwrap();
        drop(writer);

        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200 OK\r\n"));
    }

    #[tokio::test]
    async fn test_head_response_suppresses_body() {
        let mut out: Vec<u8> = Vec::new();
        let mut writer = ResponseWriter::new(&mut out);
        writer.suppress_body();

        writer.text(StatusCode::Ok, "Test response").await.unwrap();
        assert!(writer.has_content_length());
        drop(writer);

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("content-length: 13"));
        assert!(text.ends_with("\r\n\r\n"), "no body bytes after headers");
        assert!(!text.contains("Test response"));
    }

    #[tokio::test]
    async fn test_unknown_status_code_reason() {
        assert_eq!(StatusCode::from_u16(599), StatusCode::Other(599));
        assert_eq!(StatusCode::Other(599).reason_phrase(), "Unknown");

        let mut out: Vec<u8> = Vec::new();
        let mut writer = ResponseWriter::new(&mut out);
        writer
            .write_status_line(StatusCode::Other(599))
            .await
            .unwrap();
        drop(writer);
        assert_eq!(out, b"HTTP/1.1 599 Unknown\r\n");
    }

    #[tokio::test]
    async fn test_staged_header_overrides_handler_header() {
        let mut out: Vec<u8> = Vec::new();
        let mut writer = ResponseWriter::new(&mut out);
        writer.stage_header("connection", "close");

        let mut headers = Headers::new();
        headers.set("connection", "keep-alive");
        headers.set("content-length", "0");

        writer.write_status_line(StatusCode::Ok).await.unwrap();
        writer.write_headers(&headers).await.unwrap();
        writer.write_body(&[]).await.unwrap();

        assert!(writer.declared_close());
        drop(writer);

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("connection: close"));
        assert!(!text.contains("keep-alive"));
    }

    #[derive(Serialize)]
    struct TestPayload {
        name: &'static str,
    }

    #[tokio::test]
    async fn test_json_convenience() {
        let mut out: Vec<u8> = Vec::new();
        let mut writer = ResponseWriter::new(&mut out);
        writer
            .json(StatusCode::Created, &TestPayload { name: "wire" })
            .await
            .unwrap();
        drop(writer);

        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 201 Created\r\n"));
        assert!(text.contains("content-type: application/json"));
        assert!(text.ends_with(r#"{"name":"wire"}"#));
    }

    #[tokio::test]
    async fn test_redirect_convenience() {
        let mut out: Vec<u8> = Vec::new();
        let mut writer = ResponseWriter::new(&mut out);
        writer
            .redirect(StatusCode::MovedPermanently, "/new-home")
            .await
            .unwrap();
        drop(writer);

        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 301 Moved Permanently\r\n"));
        assert!(text.contains("location: /new-home"));
        assert!(text.contains("content-length: 0"));
    }

    // Parse-serialize round trip: a request built from components and
    // serialized by hand is recovered exactly by the parser.

    #[test]
    fn test_request_round_trip() {
        let pairs = [
            ("Host", "example.com"),
            ("Accept", "*/*"),
            ("X-Tag", "one"),
            ("X-Tag", "two"),
        ];
        let body = b"round trip body";

        let mut raw = String::from("POST /round-trip HTTP/1.1\r\n");
        for (name, value) in pairs {
            raw.push_str(&format!("{name}: {value}\r\n"));
        }
        raw.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));
        let mut raw = raw.into_bytes();
        raw.extend_from_slice(body);

        let request = parse_request(&raw).unwrap();
        assert_eq!(request.path, "/round-trip");
        assert_eq!(request.body, body);

        let mut recovered: Vec<(String, String)> = request
            .headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut expected: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.to_string()))
            .collect();
        expected.push(("content-length".to_string(), body.len().to_string()));
        recovered.sort();
        expected.sort();
        assert_eq!(recovered, expected);
    }

    // Keep-alive policy.

    fn response_summary(
        has_content_length: bool,
        is_chunked: bool,
        had_error: bool,
        declared_close: bool,
    ) -> ResponseSummary {
        ResponseSummary {
            status_code: Some(StatusCode::Ok),
            has_content_length,
            is_chunked,
            had_error,
            declared_close,
            wrote_anything: true,
        }
    }

    #[test]
    fn test_keep_alive_policy() {
        let http11 = parse_request(b"GET / HTTP/1.1\r\nHost: a\r\n\r\n").unwrap();
        let http11_close =
            parse_request(b"GET / HTTP/1.1\r\nHost: a\r\nConnection: close\r\n\r\n").unwrap();
        let http10 = parse_request(b"GET / HTTP/1.0\r\n\r\n").unwrap();
        let http10_keep =
            parse_request(b"GET / HTTP/1.0\r\nConnection: keep-alive\r\n\r\n").unwrap();

        let framed = response_summary(true, false, false, false);

        // Shutdown wins over everything.
        assert!(should_close(&http11, &framed, true));
        // Writer error forces close.
        assert!(should_close(
            &http11,
            &response_summary(true, false, true, false),
            false
        ));
        // Response declared close.
        assert!(should_close(
            &http11,
            &response_summary(true, false, false, true),
            false
        ));
        // HTTP/1.0 closes unless keep-alive was requested.
        assert!(should_close(&http10, &framed, false));
        assert!(!should_close(&http10_keep, &framed, false));
        // HTTP/1.1 closes on request.
        assert!(should_close(&http11_close, &framed, false));
        // Unframed responses cannot be reused.
        assert!(should_close(
            &http11,
            &response_summary(false, false, false, false),
            false
        ));
        // Chunked framing is enough.
        assert!(!should_close(
            &http11,
            &response_summary(false, true, false, false),
            false
        ));
        // The ordinary case reuses.
        assert!(!should_close(&http11, &framed, false));
    }

    // Metrics.

    #[test]
    fn test_metrics_recording() {
        let metrics = Metrics::new();
        metrics.record_request(200, Duration::from_millis(10));
        metrics.record_request(404, Duration::from_millis(20));
        metrics.record_request(500, Duration::from_millis(30));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.requests_total, 3);
        assert_eq!(snapshot.errors_4xx, 1);
        assert_eq!(snapshot.errors_5xx, 1);
        assert_eq!(snapshot.errors_total, 1);
        assert_eq!(snapshot.average_latency, Duration::from_millis(20));

        metrics.connection_opened();
        assert_eq!(metrics.active_connections(), 1);
        metrics.connection_closed();
        assert_eq!(metrics.active_connections(), 0);
    }

    // Connection loop.

    #[tokio::test]
    async fn test_serve_single_request() {
        let stream =
            MockTcpStream::new(b"GET /test HTTP/1.1\r\nHost: localhost\r\n\r\n".to_vec());
        let written = stream.written();
        let config = ServerConfig::default();
        let metrics = Metrics::new();
        let shutting_down = AtomicBool::new(false);

        let outcome =
            serve_connection(stream, None, &TextHandler, &config, &metrics, &shutting_down).await;

        assert!(matches!(outcome, ConnOutcome::Closed));
        let text = written_string(&written);
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Test response"));
        assert_eq!(metrics.requests_total(), 1);
    }

    #[tokio::test]
    async fn test_keep_alive_serves_pipelined_requests() {
        // Both requests arrive in a single segment; the loop must not lose
        // the second one.
        let stream = MockTcpStream::new(
            b"GET /one HTTP/1.1\r\nHost: a\r\n\r\nPOST /two HTTP/1.1\r\nHost: a\r\nContent-Length: 5\r\n\r\nhello"
                .to_vec(),
        );
        let written = stream.written();
        let config = ServerConfig::default();
        let metrics = Metrics::new();
        let shutting_down = AtomicBool::new(false);

        let outcome =
            serve_connection(stream, None, &EchoHandler, &config, &metrics, &shutting_down).await;

        assert!(matches!(outcome, ConnOutcome::Closed));
        let text = written_string(&written);
        assert_eq!(text.matches("HTTP/1.1 200 OK").count(), 2);
        assert!(text.contains("hello"));
        assert_eq!(metrics.requests_total(), 2);
    }

    #[tokio::test]
    async fn test_malformed_request_gets_400() {
        let stream = MockTcpStream::new(b"NOTAMETHOD / HTTP/1.1\r\nHost: a\r\n\r\n".to_vec());
        let written = stream.written();
        let config = ServerConfig::default();
        let metrics = Metrics::new();
        let shutting_down = AtomicBool::new(false);

        serve_connection(stream, None, &TextHandler, &config, &metrics, &shutting_down).await;

        let text = written_string(&written);
        assert!(text.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(text.contains("connection: close"));
    }

    #[tokio::test]
    async fn test_oversized_body_gets_413() {
        let stream = MockTcpStream::new(
            b"POST / HTTP/1.1\r\nHost: a\r\nContent-Length: 100\r\n\r\n".to_vec(),
        );
        let written = stream.written();
        let config = ServerConfig {
            max_request_body_size: 10,
            ..ServerConfig::default()
        };
        let metrics = Metrics::new();
        let shutting_down = AtomicBool::new(false);

        serve_connection(stream, None, &TextHandler, &config, &metrics, &shutting_down).await;

        let text = written_string(&written);
        assert!(text.starts_with("HTTP/1.1 413 Payload Too Large\r\n"));
    }

    #[tokio::test]
    async fn test_expect_continue_answered_before_handler() {
        let stream = MockTcpStream::new(
            b"POST / HTTP/1.1\r\nHost: a\r\nExpect: 100-continue\r\nContent-Length: 5\r\n\r\nhello"
                .to_vec(),
        );
        let written = stream.written();
        let config = ServerConfig::default();
        let metrics = Metrics::new();
        let shutting_down = AtomicBool::new(false);

        serve_connection(stream, None, &EchoHandler, &config, &metrics, &shutting_down).await;

        let text = written_string(&written);
        let interim = text.find("HTTP/1.1 100 Continue\r\n\r\n").unwrap();
        let final_response = text.find("HTTP/1.1 200 OK").unwrap();
        assert!(interim < final_response);
    }

    #[tokio::test]
    async fn test_shutdown_stamps_connection_close_and_stops() {
        let stream = MockTcpStream::new(
            b"GET /one HTTP/1.1\r\nHost: a\r\n\r\nGET /two HTTP/1.1\r\nHost: a\r\n\r\n".to_vec(),
        );
        let written = stream.written();
        let config = ServerConfig::default();
        let metrics = Metrics::new();
        let shutting_down = AtomicBool::new(true);

        serve_connection(stream, None, &TextHandler, &config, &metrics, &shutting_down).await;

        let text = written_string(&written);
        assert!(text.contains("connection: close"));
        // The loop exits after the in-flight response; the second request
        // goes unanswered.
        assert_eq!(text.matches("HTTP/1.1 200 OK").count(), 1);
    }

    #[tokio::test]
    async fn test_request_cap_closes_connection() {
        let stream = MockTcpStream::new(
            b"GET /one HTTP/1.1\r\nHost: a\r\n\r\nGET /two HTTP/1.1\r\nHost: a\r\n\r\n".to_vec(),
        );
        let written = stream.written();
        let config = ServerConfig {
            max_requests_per_conn: 1,
            ..ServerConfig::default()
        };
        let metrics = Metrics::new();
        let shutting_down = AtomicBool::new(false);

        serve_connection(stream, None, &TextHandler, &config, &metrics, &shutting_down).await;

        let text = written_string(&written);
        assert_eq!(text.matches("HTTP/1.1 200 OK").count(), 1);
    }

    #[tokio::test]
    async fn test_handler_fault_becomes_500() {
        let stream = MockTcpStream::new(b"GET / HTTP/1.1\r\nHost: a\r\n\r\n".to_vec());
        let written = stream.written();
        let config = ServerConfig::default();
        let metrics = Metrics::new();
        let shutting_down = AtomicBool::new(false);

        let outcome = serve_connection(
            stream,
            None,
            &FailingHandler,
            &config,
            &metrics,
            &shutting_down,
        )
        .await;

        assert!(matches!(outcome, ConnOutcome::Closed));
        let text = written_string(&written);
        assert!(text.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
    }

    #[tokio::test]
    async fn test_head_request_gets_headers_only() {
        let stream = MockTcpStream::new(b"HEAD /test HTTP/1.1\r\nHost: a\r\n\r\n".to_vec());
        let written = stream.written();
        let config = ServerConfig::default();
        let metrics = Metrics::new();
        let shutting_down = AtomicBool::new(false);

        serve_connection(stream, None, &TextHandler, &config, &metrics, &shutting_down).await;

        let text = written_string(&written);
        assert!(text.contains("content-length: 13"));
        assert!(!text.contains("Test response"));
    }

    /// A stream that serves its scripted segments and then stalls forever,
    /// so deadline handling can be observed.
    struct StalledStream {
        read_data: VecDeque<Vec<u8>>,
        write_data: Arc<Mutex<Vec<u8>>>,
    }

    impl StalledStream {
        fn new(segments: Vec<Vec<u8>>) -> Self {
            Self {
                read_data: segments.into(),
                write_data: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl AsyncRead for StalledStream {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut TaskContext<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            let this = self.get_mut();
            match this.read_data.pop_front() {
                Some(segment) => {
                    buf.put_slice(&segment);
                    Poll::Ready(Ok(()))
                }
                // Never wakes again; only a deadline gets us out.
                None => Poll::Pending,
            }
        }
    }

    impl AsyncWrite for StalledStream {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut TaskContext<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            let this = self.get_mut();
            this.write_data.lock().unwrap().extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: Pin<&mut Self>,
            _cx: &mut TaskContext<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_idle_timeout_closes_silently() {
        let stream = StalledStream::new(vec![]);
        let written = stream.write_data.clone();
        let config = ServerConfig {
            read_timeout: Duration::from_millis(50),
            ..ServerConfig::default()
        };
        let metrics = Metrics::new();
        let shutting_down = AtomicBool::new(false);

        let outcome =
            serve_connection(stream, None, &TextHandler, &config, &metrics, &shutting_down).await;

        assert!(matches!(outcome, ConnOutcome::Closed));
        assert!(written.lock().unwrap().is_empty(), "idle timeout is silent");
    }

    #[tokio::test]
    async fn test_mid_request_timeout_gets_408() {
        // Half a request line, then silence.
        let stream = StalledStream::new(vec![b"GET /slow HT".to_vec()]);
        let written = stream.write_data.clone();
        let config = ServerConfig {
            read_timeout: Duration::from_millis(50),
            ..ServerConfig::default()
        };
        let metrics = Metrics::new();
        let shutting_down = AtomicBool::new(false);

        serve_connection(stream, None, &TextHandler, &config, &metrics, &shutting_down).await;

        let text = written_string(&written);
        assert!(text.starts_with("HTTP/1.1 408 Request Timeout\r\n"));
    }

    /// A sink whose writes always fail.
    struct BrokenSink;

    impl AsyncWrite for BrokenSink {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut TaskContext<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::Error::from(io::ErrorKind::BrokenPipe)))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: Pin<&mut Self>,
            _cx: &mut TaskContext<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_writer_records_io_error() {
        let mut sink = BrokenSink;
        let mut writer = ResponseWriter::new(&mut sink);

        let result = writer.write_status_line(StatusCode::Ok).await;
        assert!(matches!(result, Err(Error::Io(_))));
        assert!(writer.had_error());

        // A failed writer is never reused, whatever the request said.
        let request = parse_request(b"GET / HTTP/1.1\r\nHost: a\r\n\r\n").unwrap();
        assert!(should_close(&request, &writer.summary(), false));
    }

    #[tokio::test]
    async fn test_no_content_convenience() {
        let mut out: Vec<u8> = Vec::new();
        let mut writer = ResponseWriter::new(&mut out);
        writer.no_content().await.unwrap();
        drop(writer);

        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "HTTP/1.1 204 No Content\r\n\r\n");
    }

    #[tokio::test]
    async fn test_context_helpers() {
        let request = parse_request(
            b"GET /search?q=rust&page=2 HTTP/1.1\r\nHost: a\r\nX-Forwarded-For: 10.0.0.1, 10.0.0.2\r\nX-Request-ID: abc-123\r\n\r\n",
        )
        .unwrap();

        let mut sink: Vec<u8> = Vec::new();
        let mut writer = ResponseWriter::new((&mut sink) as DynWriter<'_>);
        let ctx = Context::new(&request, &mut writer, None);

        assert_eq!(ctx.path(), "/search?q=rust&page=2");
        assert_eq!(ctx.query("q"), Some("rust"));
        assert_eq!(ctx.query("page"), Some("2"));
        assert_eq!(ctx.query("missing"), None);
        assert_eq!(ctx.client_ip().as_deref(), Some("10.0.0.1"));
        assert_eq!(ctx.request_id(), "abc-123");
        assert!(!ctx.is_websocket_upgrade());
        assert!(!ctx.is_hijacked());
    }

    #[tokio::test]
    async fn test_context_generates_request_id() {
        let request = parse_request(b"GET / HTTP/1.1\r\nHost: a\r\n\r\n").unwrap();
        let mut sink: Vec<u8> = Vec::new();
        let mut writer = ResponseWriter::new((&mut sink) as DynWriter<'_>);
        let ctx = Context::new(&request, &mut writer, None);

        assert!(ctx.request_id().starts_with("req-"));
    }

    #[test]
    fn test_server_config_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.read_timeout, Duration::from_secs(15));
        assert_eq!(config.write_timeout, Duration::from_secs(15));
        assert_eq!(config.idle_timeout, Duration::from_secs(60));
        assert_eq!(config.request_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.max_header_bytes, 1 << 20);
        assert_eq!(config.max_request_body_size, 10 << 20);
        assert_eq!(config.max_requests_per_conn, 1000);
        assert_eq!(config.max_conns, 10_000);
    }

    #[tokio::test]
    async fn test_shutdown_handle_raises_flag() {
        let server = HttpServer::new(ServerConfig::default(), TextHandler);
        let handle = server.shutdown_handle();
        assert!(!handle.is_shutting_down());
        handle.signal();
        assert!(handle.is_shutting_down());
        assert_eq!(server.metrics().requests_total(), 0);
    }

    #[tokio::test]
    async fn test_hijack_yields_transport() {
        let stream = MockTcpStream::new(
            b"GET /upgrade HTTP/1.1\r\nHost: a\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\n"
                .to_vec(),
        );
        let written = stream.written();
        let config = ServerConfig::default();
        let metrics = Metrics::new();
        let shutting_down = AtomicBool::new(false);

        let outcome = serve_connection(
            stream,
            None,
            &HijackHandler,
            &config,
            &metrics,
            &shutting_down,
        )
        .await;

        assert!(matches!(outcome, ConnOutcome::Hijacked(_)));
        let text = written_string(&written);
        assert!(text.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
    }
}
