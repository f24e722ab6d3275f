//! # Provider
//!
//! Concrete transports: HTTP over `reqwest` for fleet snapshots and
//! WebSockets over `tokio-tungstenite` for realtime channels.

use anyhow::{Context, Result};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use http::{Request, Response};
use realtime::{HttpRequest, Socket, SocketConnector};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

#[derive(Clone, Debug, Default)]
pub struct Provider {
    client: reqwest::Client,
}

impl Provider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a preconfigured HTTP client (timeouts, proxies, default headers).
    #[must_use]
    pub const fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl HttpRequest for Provider {
    async fn fetch(&self, request: Request<Bytes>) -> Result<Response<Bytes>> {
        let uri = request.uri().to_string();
        let request = reqwest::Request::try_from(request)
            .with_context(|| format!("converting request for {uri}"))?;

        let response =
            self.client.execute(request).await.with_context(|| format!("requesting {uri}"))?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.with_context(|| format!("reading body from {uri}"))?;

        let mut builder = Response::builder().status(status);
        if let Some(target) = builder.headers_mut() {
            *target = headers;
        }
        builder.body(body).context("building response")
    }
}

impl SocketConnector for Provider {
    type Socket = WebSocket;

    async fn connect(&self, url: &str) -> Result<WebSocket> {
        let (stream, response) = tokio_tungstenite::connect_async(url)
            .await
            .with_context(|| format!("connecting to {url}"))?;
        debug!(url, status = %response.status(), "websocket connected");
        Ok(WebSocket { stream })
    }
}

/// A connected WebSocket carrying JSON text frames.
pub struct WebSocket {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Socket for WebSocket {
    async fn send(&mut self, text: String) -> Result<()> {
        self.stream.send(Message::Text(text.into())).await.context("writing websocket frame")
    }

    async fn recv(&mut self) -> Option<Result<String>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => return Some(Ok(text)),
                    Err(err) => {
                        warn!(
                            monotonic_counter.channel_parse_errors = 1,
                            error = %err,
                            "dropping binary frame that is not UTF-8"
                        );
                    }
                },
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "websocket closed by peer");
                    return None;
                }
                // tungstenite answers pings itself
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
                Err(err) => return Some(Err(err).context("reading websocket frame")),
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.stream.close(None).await.context("closing websocket")
    }
}
