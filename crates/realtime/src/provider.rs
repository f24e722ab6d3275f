//! # Provider
//!
//! Provider defines the transport interfaces the tracking crates consume.
//! Hosts supply concrete implementations; tests supply mocks.

use anyhow::Result;
use bytes::Bytes;
use http::{Request, Response};

/// The `HttpRequest` trait defines the behavior for fetching data from a source.
pub trait HttpRequest: Send + Sync {
    /// Make outbound HTTP request.
    fn fetch(&self, request: Request<Bytes>) -> impl Future<Output = Result<Response<Bytes>>> + Send;
}

/// The `SocketConnector` trait opens bidirectional text streams.
pub trait SocketConnector: Send + Sync + 'static {
    /// The connected stream type.
    type Socket: Socket;

    /// Open a stream to `url`. An error is treated the same as an immediate close.
    fn connect(&self, url: &str) -> impl Future<Output = Result<Self::Socket>> + Send;
}

/// A connected bidirectional text stream.
pub trait Socket: Send + 'static {
    /// Write one text frame.
    fn send(&mut self, text: String) -> impl Future<Output = Result<()>> + Send;

    /// Wait for the next inbound text frame. `None` once the peer has closed
    /// the stream. Must be cancel safe.
    fn recv(&mut self) -> impl Future<Output = Option<Result<String>>> + Send;

    /// Close the stream from this side.
    fn close(&mut self) -> impl Future<Output = Result<()>> + Send;
}
