//! The single outbound frame sink (§4.E).
//!
//! Every stream handle and every facade operation funnels its outbound
//! frames through one `FrameSender`. A bounded `tokio::sync::mpsc` channel
//! gives us per-stream FIFO for free (a single queue is stricter than the
//! spec requires, which only asks for a global FIFO) and natural
//! backpressure: `send` suspends the producer when the queue is full.

use tokio::sync::mpsc;

use crate::error::{RequesterError, Result};
use crate::frame::Frame;

/// Default bound on the outbound frame queue.
pub const DEFAULT_SENDER_CAPACITY: usize = 256;

/// Producer handle for the outbound frame channel. Cheaply cloneable; every
/// stream and the facade itself hold a clone.
#[derive(Clone)]
pub struct FrameSender {
    tx: mpsc::Sender<Frame>,
}

impl FrameSender {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Enqueue a frame, suspending if the queue is full.
    ///
    /// Callers that need this suspension to be cancellable race it against
    /// their own cancellation token with `tokio::select!` rather than have
    /// cancellation baked in here, since not every enqueue is cancellable
    /// (e.g. the CANCEL frame itself must always go out).
    pub async fn enqueue(&self, frame: Frame) -> Result<()> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| RequesterError::SenderClosed)
    }

    /// Non-blocking enqueue, for call sites that cannot `.await` (e.g.
    /// `Drop` impls). Fails silently on a full queue rather than suspending.
    pub fn try_enqueue(&self, frame: Frame) -> Result<()> {
        self.tx.try_send(frame).map_err(|_| RequesterError::SenderClosed)
    }
}
