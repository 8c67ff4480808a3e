//! In-process duplex transport over tokio mpsc channels.
//!
//! Connects two connections inside one process, and lets tests play the raw
//! remote side of a connection byte by byte.

use tokio::sync::mpsc;
use tokio::sync::Mutex;

use crate::transport;
use crate::transport::Transport;

/// One end of an in-memory duplex link.
///
/// Messages written on one end are read on the other. Dropping an end closes
/// the link: the other end's reads and writes fail with `Error::Closed`.
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl ChannelTransport {
    /// Creates a transport from separate tx and rx channels.
    pub fn new(
        tx: mpsc::UnboundedSender<Vec<u8>>,
        rx: mpsc::UnboundedReceiver<Vec<u8>>,
    ) -> Self {
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// Creates a pair of transports connected to each other.
    ///
    /// Messages sent on `a` are received by `b` and vice versa.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();

        (Self::new(tx_a, rx_b), Self::new(tx_b, rx_a))
    }
}

#[async_trait::async_trait]
impl Transport for ChannelTransport {
    async fn read_message(&self) -> transport::Result<Vec<u8>> {
        let mut rx = self.rx.lock().await;
        rx.recv().await.ok_or(transport::Error::Closed)
    }

    async fn write_message(&self, payload: &[u8]) -> transport::Result<()> {
        self.tx
            .send(payload.to_vec())
            .map_err(|_| transport::Error::Closed)
    }
}
