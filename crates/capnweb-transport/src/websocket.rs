//! A WebSocket-backed transport. One text frame per wire message in both
//! directions; binary frames are rejected as malformed rather than
//! silently decoded.
//!
//! Works over any `tokio-tungstenite` stream (plain TCP, TLS, or an
//! already-upgraded server-side connection), so the same type serves
//! both client dial-out and server accept-side use.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use capnweb_core::{Transport, TransportError};

/// A transport over any already-established `tokio-tungstenite` stream.
/// Generic over the underlying I/O so the same glue serves a client dial
/// (`MaybeTlsStream<TcpStream>`) and a server accept (a raw `TcpStream` or
/// whatever the HTTP server handed back after the upgrade).
pub struct WebSocketTransport<S> {
    writer: Mutex<SplitSink<WebSocketStream<S>, WsMessage>>,
    reader: Mutex<SplitStream<WebSocketStream<S>>>,
    closed: AtomicBool,
}

impl<S> WebSocketTransport<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(stream: WebSocketStream<S>) -> Arc<Self> {
        let (writer, reader) = stream.split();
        Arc::new(Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
            closed: AtomicBool::new(false),
        })
    }
}

impl WebSocketTransport<MaybeTlsStream<tokio::net::TcpStream>> {
    /// Dial out to a `ws://` or `wss://` endpoint.
    pub async fn connect(url: &str) -> Result<Arc<Self>, TransportError> {
        let (stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TransportError::Io(format!("ws connect: {e}")))?;
        Ok(Self::new(stream))
    }
}

#[async_trait]
impl<S> Transport for WebSocketTransport<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + Sync + 'static,
{
    async fn send_frame(&self, frame: String) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let mut w = self.writer.lock().await;
        w.send(WsMessage::Text(frame))
            .await
            .map_err(|e| TransportError::Io(format!("ws send: {e}")))
    }

    async fn recv_frame(&self) -> Result<String, TransportError> {
        loop {
            if self.is_closed() {
                return Err(TransportError::Closed);
            }
            let mut r = self.reader.lock().await;
            match r.next().await {
                Some(Ok(WsMessage::Text(t))) => return Ok(t),
                Some(Ok(WsMessage::Binary(_))) => {
                    return Err(TransportError::Io("unexpected binary ws frame".into()))
                }
                Some(Ok(WsMessage::Close(_))) | None => {
                    self.closed.store(true, Ordering::Release);
                    return Err(TransportError::Closed);
                }
                Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_))) => {
                    // tungstenite answers pings itself; keep polling for a
                    // real frame.
                    continue;
                }
                Some(Err(e)) => {
                    self.closed.store(true, Ordering::Release);
                    return Err(TransportError::Io(format!("ws read: {e}")));
                }
            }
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

pub type DialedWebSocketTransport = WebSocketTransport<MaybeTlsStream<tokio::net::TcpStream>>;

#[cfg(test)]
mod tests {
    use super::*;

    // Connect/recv require a live socket; exercised by the conformance
    // suite against a real listener. Here we only check the type builds
    // against a generic stream without requiring network I/O.
    #[allow(dead_code)]
    fn assert_transport_bound<S>()
    where
        WebSocketTransport<S>: Transport,
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + Sync + 'static,
    {
    }

    #[test]
    fn transport_bound_holds_for_tcp() {
        assert_transport_bound::<tokio::net::TcpStream>();
    }
}
