//! An in-process transport pairing two queues. Used pervasively by the
//! test suite and the `capnweb-testkit` crate to exercise a full session
//! without a real socket.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use capnweb_core::{Transport, TransportError};

const CHANNEL_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct MemTransport {
    inner: Arc<InProcInner>,
}

struct InProcInner {
    tx: mpsc::Sender<String>,
    rx: Mutex<mpsc::Receiver<String>>,
    closed: AtomicBool,
}

impl MemTransport {
    /// Build two ends of an in-process channel, joined to each other.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::channel(CHANNEL_CAPACITY);
        let (tx_b, rx_b) = mpsc::channel(CHANNEL_CAPACITY);

        let a = Arc::new(InProcInner {
            tx: tx_b,
            rx: Mutex::new(rx_a),
            closed: AtomicBool::new(false),
        });
        let b = Arc::new(InProcInner {
            tx: tx_a,
            rx: Mutex::new(rx_b),
            closed: AtomicBool::new(false),
        });

        (Self { inner: a }, Self { inner: b })
    }

    fn is_closed_inner(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Transport for MemTransport {
    async fn send_frame(&self, frame: String) -> Result<(), TransportError> {
        if self.is_closed_inner() {
            return Err(TransportError::Closed);
        }
        self.inner
            .tx
            .send(frame)
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn recv_frame(&self) -> Result<String, TransportError> {
        if self.is_closed_inner() {
            return Err(TransportError::Closed);
        }
        let mut rx = self.inner.rx.lock().await;
        rx.recv().await.ok_or(TransportError::Closed)
    }

    fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
    }

    fn is_closed(&self) -> bool {
        self.is_closed_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_flow_both_ways() {
        let (a, b) = MemTransport::pair();
        a.send_frame("hello".into()).await.unwrap();
        assert_eq!(b.recv_frame().await.unwrap(), "hello");
        b.send_frame("world".into()).await.unwrap();
        assert_eq!(a.recv_frame().await.unwrap(), "world");
    }

    #[tokio::test]
    async fn closing_fails_further_sends() {
        let (a, _b) = MemTransport::pair();
        a.close();
        assert!(a.is_closed());
        assert!(matches!(
            a.send_frame("x".into()).await,
            Err(TransportError::Closed)
        ));
    }
}
