//! The HTTP batch transport: one POST request body carries every frame
//! the client sends, newline-delimited; one response body carries every
//! frame the server sends back. There is no persistent connection, so
//! unlike [`crate::mem::MemTransport`] or
//! [`crate::websocket::WebSocketTransport`] a batch transport's two ends
//! are not symmetric — [`HttpBatchClient`] drives the POST, while
//! [`HttpBatchServer`] wraps an already-received request body and
//! accumulates the lines of the response.
//!
//! A session still only ever calls `send_frame`/`recv_frame`/`close` —
//! the request/response shape is fully hidden behind those four methods.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use capnweb_core::{Transport, TransportError};

/// Client side of an HTTP batch exchange: buffers outgoing frames until
/// the first `recv_frame` call, at which point it issues the POST and
/// replays the response body one line at a time.
pub struct HttpBatchClient {
    client: reqwest::Client,
    url: String,
    outgoing: Mutex<Vec<String>>,
    incoming: Mutex<Option<std::vec::IntoIter<String>>>,
    closed: AtomicBool,
}

impl HttpBatchClient {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            client,
            url: url.into(),
            outgoing: Mutex::new(Vec::new()),
            incoming: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    async fn run_batch(&self) -> Result<(), TransportError> {
        let body = self.outgoing.lock().await.join("\n");
        let resp = self
            .client
            .post(&self.url)
            .header("content-type", "application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(|e| TransportError::Io(format!("batch post: {e}")))?;
        if !resp.status().is_success() {
            return Err(TransportError::Io(format!(
                "batch post: server returned {}",
                resp.status()
            )));
        }
        let text = resp
            .text()
            .await
            .map_err(|e| TransportError::Io(format!("batch body: {e}")))?;
        let lines: Vec<String> = text
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string)
            .collect();
        *self.incoming.lock().await = Some(lines.into_iter());
        Ok(())
    }
}

#[async_trait]
impl Transport for HttpBatchClient {
    async fn send_frame(&self, frame: String) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.outgoing.lock().await.push(frame);
        Ok(())
    }

    async fn recv_frame(&self) -> Result<String, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let mut guard = self.incoming.lock().await;
        if guard.is_none() {
            drop(guard);
            self.run_batch().await?;
            guard = self.incoming.lock().await;
        }
        match guard.as_mut().and_then(Iterator::next) {
            Some(line) => Ok(line),
            None => {
                self.closed.store(true, Ordering::Release);
                Err(TransportError::Closed)
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

/// Server side of a batch exchange: constructed from the already-read
/// request body, handed to the session to drive the push/resolve
/// handshake, then drained for the response body once the session has
/// no more pending work.
pub struct HttpBatchServer {
    incoming: Mutex<std::vec::IntoIter<String>>,
    outgoing: Mutex<Vec<String>>,
    closed: AtomicBool,
}

impl HttpBatchServer {
    pub fn new(request_body: &str) -> Arc<Self> {
        let lines: Vec<String> = request_body
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string)
            .collect();
        Arc::new(Self {
            incoming: Mutex::new(lines.into_iter()),
            outgoing: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Collect the accumulated response body. Call once the session has
    /// finished processing (after `RpcSession::drain`).
    pub async fn take_response_body(&self) -> String {
        self.outgoing.lock().await.join("\n")
    }
}

#[async_trait]
impl Transport for HttpBatchServer {
    async fn send_frame(&self, frame: String) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.outgoing.lock().await.push(frame);
        Ok(())
    }

    async fn recv_frame(&self) -> Result<String, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let mut guard = self.incoming.lock().await;
        match guard.next() {
            Some(line) => Ok(line),
            None => {
                self.closed.store(true, Ordering::Release);
                Err(TransportError::Closed)
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

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn server_replays_request_lines_then_closes() {
        let server = HttpBatchServer::new("[\"push\",0,[\"pipeline\",0,[\"square\"],[[5]]]]\n[\"pull\",1]");
        let first = server.recv_frame().await.unwrap();
        assert!(first.starts_with("[\"push\""));
        let second = server.recv_frame().await.unwrap();
        assert!(second.starts_with("[\"pull\""));
        assert!(matches!(
            server.recv_frame().await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn server_accumulates_response_body() {
        let server = HttpBatchServer::new("");
        server.send_frame("[\"resolve\",1,25]".into()).await.unwrap();
        server.send_frame("[\"resolve\",2,36]".into()).await.unwrap();
        assert_eq!(
            server.take_response_body().await,
            "[\"resolve\",1,25]\n[\"resolve\",2,36]"
        );
    }
}
