use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use tokio::io::{AsyncWriteExt, BufReader, DuplexStream};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::source::{LineSource, ReaderSource, SourceError};

/// Grace period for in-flight requests when the listener stops
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(100);

const PIPE_CAPACITY: usize = 64 * 1024;

#[derive(Clone)]
struct PushState {
    /// Write half of the line pipe; `None` once the stream has ended
    writer: Arc<Mutex<Option<DuplexStream>>>,
    follow: bool,
    shutdown: CancellationToken,
}

/// Line source fed by POST bodies sent to a local listener
pub struct HttpSource {
    name: String,
    addr: SocketAddr,
    lines: ReaderSource<BufReader<DuplexStream>>,
    shutdown: CancellationToken,
    server: Option<JoinHandle<()>>,
}

impl HttpSource {
    /// Bind `addr` and start serving.
    ///
    /// Without `follow` the first complete body ends the stream.
    pub async fn bind(addr: &str, follow: bool) -> Result<Self, SourceError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| SourceError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        let local = listener.local_addr()?;

        let (reader, writer) = tokio::io::duplex(PIPE_CAPACITY);
        let shutdown = CancellationToken::new();
        let state = PushState {
            writer: Arc::new(Mutex::new(Some(writer))),
            follow,
            shutdown: shutdown.clone(),
        };

        let app = Router::new().fallback(push).with_state(state.clone());
        let signal = shutdown.clone();
        let server = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move { signal.cancelled().await })
                .await;
            if let Err(e) = served {
                error!(addr = %local, error = %e, "http listener failed");
            }
            state.writer.lock().await.take();
            debug!(addr = %local, "http listener stopped");
        });

        info!(addr = %local, follow, "listening for pushed logs");

        Ok(Self {
            name: format!("http/{}", local),
            addr: local,
            lines: ReaderSource::new(format!("http/{}", local), BufReader::new(reader)),
            shutdown,
            server: Some(server),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }
}

async fn push(State(state): State<PushState>, method: Method, body: Body) -> Response {
    if method != Method::POST {
        return (
            StatusCode::METHOD_NOT_ALLOWED,
            format!("method {:?} not allowed, use \"POST\"", method.as_str()),
        )
            .into_response();
    }

    let mut guard = state.writer.lock().await;
    let Some(writer) = guard.as_mut() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "stream closed").into_response();
    };

    let mut chunks = body.into_data_stream();
    let mut terminated = true;
    while let Some(chunk) = chunks.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                return (StatusCode::INTERNAL_SERVER_ERROR, format!("unexpected error: {}", e))
                    .into_response();
            }
        };
        if chunk.is_empty() {
            continue;
        }
        if let Err(e) = writer.write_all(&chunk).await {
            return (StatusCode::INTERNAL_SERVER_ERROR, format!("unexpected error: {}", e))
                .into_response();
        }
        terminated = chunk.ends_with(b"\n");
    }

    // bodies never share a line
    if !terminated {
        if let Err(e) = writer.write_all(b"\n").await {
            return (StatusCode::INTERNAL_SERVER_ERROR, format!("unexpected error: {}", e))
                .into_response();
        }
    }

    if !state.follow {
        guard.take();
        state.shutdown.cancel();
    }

    (StatusCode::OK, "OK").into_response()
}

#[async_trait]
impl LineSource for HttpSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn next_line(&mut self) -> Result<Option<Vec<u8>>, SourceError> {
        self.lines.next_line().await
    }

    async fn close(&mut self) -> Result<(), SourceError> {
        self.shutdown.cancel();

        if let Some(mut server) = self.server.take() {
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut server).await.is_err() {
                warn!(addr = %self.addr, "http listener did not stop in time, aborting");
                server.abort();
            }
        }

        self.lines.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpStream;

    async fn request(addr: SocketAddr, method: &str, body: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!(
            "{} / HTTP/1.1\r\nHost: localhost\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            method,
            body.len(),
            body
        );
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    async fn next(source: &mut HttpSource) -> Option<Vec<u8>> {
        tokio::time::timeout(Duration::from_secs(2), source.next_line())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_body_lines_then_eof_without_follow() {
        let mut source = HttpSource::bind("127.0.0.1:0", false).await.unwrap();
        let addr = source.local_addr();

        let response = request(addr, "POST", "{\"msg\":\"a\"}\n{\"msg\":\"b\"}").await;
        assert!(response.starts_with("HTTP/1.1 200"), "{}", response);

        assert_eq!(next(&mut source).await, Some(br#"{"msg":"a"}"#.to_vec()));
        assert_eq!(next(&mut source).await, Some(br#"{"msg":"b"}"#.to_vec()));
        assert_eq!(next(&mut source).await, None);

        source.close().await.unwrap();
        source.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_other_methods() {
        let mut source = HttpSource::bind("127.0.0.1:0", true).await.unwrap();
        let addr = source.local_addr();

        let response = request(addr, "GET", "").await;
        assert!(response.starts_with("HTTP/1.1 405"), "{}", response);
        assert!(response.contains("use \"POST\""));

        source.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_follow_accepts_many_bodies() {
        let mut source = HttpSource::bind("127.0.0.1:0", true).await.unwrap();
        let addr = source.local_addr();

        request(addr, "POST", "one\n").await;
        request(addr, "POST", "two").await;
        request(addr, "POST", "three\n").await;

        assert_eq!(next(&mut source).await, Some(b"one".to_vec()));
        assert_eq!(next(&mut source).await, Some(b"two".to_vec()));
        assert_eq!(next(&mut source).await, Some(b"three".to_vec()));

        let closed = tokio::time::timeout(Duration::from_secs(1), source.close()).await;
        assert!(closed.is_ok());
    }

    #[tokio::test]
    async fn test_bind_error() {
        let first = HttpSource::bind("127.0.0.1:0", true).await.unwrap();
        let taken = first.local_addr().to_string();
        let second = HttpSource::bind(&taken, true).await;
        assert!(matches!(second, Err(SourceError::Bind { .. })));
    }
}
