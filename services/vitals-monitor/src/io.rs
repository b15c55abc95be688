//! I/O traits and implementations
//!
//! `HttpClient` covers the request/response side of the backend and
//! `StreamConnector`/`MessageStream` cover the push stream. Both are
//! mockable so the connection state machine and the poller can be tested
//! without a network.
//!
//! The default implementations use reqwest and tokio-tungstenite.

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::error::{MonitorError, Result};

/// HTTP response from a request
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

// ============================================================================
// HttpClient trait and implementations
// ============================================================================

/// Abstraction over HTTP client for dependency injection
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait HttpClient: Send + Sync {
    /// Send a GET request to the given URL
    async fn get(&self, url: &str) -> Result<HttpResponse>;
}

/// Production HTTP client using reqwest
#[derive(Default)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn get(&self, url: &str) -> Result<HttpResponse> {
        debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| MonitorError::Http(format!("GET {} failed: {}", url, e)))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| MonitorError::Http(format!("Reading response body: {}", e)))?;

        debug!("GET {} -> {} ({} bytes)", url, status, body.len());
        Ok(HttpResponse { status, body })
    }
}

// ============================================================================
// MessageStream trait and implementations
// ============================================================================

/// An open push stream delivering one JSON document per message
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait MessageStream: Send {
    /// Wait for the next message
    ///
    /// Returns `Ok(Some(text))` for a data message, `Ok(None)` once the
    /// peer has closed the stream, or an error if the transport failed.
    async fn next_message(&mut self) -> Result<Option<String>>;

    /// Close the stream from our side
    async fn close(&mut self) -> Result<()>;
}

/// WebSocket implementation of MessageStream
pub struct WebSocketMessageStream {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WebSocketMessageStream {
    pub fn new(inner: WebSocketStream<MaybeTlsStream<TcpStream>>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl MessageStream for WebSocketMessageStream {
    async fn next_message(&mut self) -> Result<Option<String>> {
        loop {
            match self.inner.next().await {
                None => return Ok(None),
                Some(Err(e)) => {
                    return Err(MonitorError::Connection(format!("Read error: {}", e)));
                }
                Some(Ok(Message::Text(text))) => return Ok(Some(text.as_str().to_owned())),
                Some(Ok(Message::Binary(data))) => {
                    // Left for the JSON parser to reject if it is not UTF-8 JSON
                    return Ok(Some(String::from_utf8_lossy(&data).into_owned()));
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!("Close frame received: {:?}", frame);
                    return Ok(None);
                }
                // ping/pong are answered by tungstenite
                Some(Ok(_)) => continue,
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.inner
            .close(None)
            .await
            .map_err(|e| MonitorError::Connection(format!("Close failed: {}", e)))
    }
}

// ============================================================================
// StreamConnector trait and implementations
// ============================================================================

/// Opens push streams
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait StreamConnector: Send + Sync {
    /// Open a stream to the given URL
    async fn connect(&self, url: &str) -> Result<Box<dyn MessageStream>>;
}

/// WebSocket implementation of StreamConnector
#[derive(Default, Clone)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StreamConnector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn MessageStream>> {
        debug!("Opening WebSocket to {}", url);
        let (stream, response) = connect_async(url)
            .await
            .map_err(|e| MonitorError::Connection(format!("Failed to connect to {}: {}", url, e)))?;

        debug!("WebSocket handshake with {} -> {}", url, response.status());
        Ok(Box::new(WebSocketMessageStream::new(stream)))
    }
}
