//! Dispatch queue (design §4.5): an in-process bounded channel carrying
//! claimed events from the claim engine to the worker pool. The channel's
//! bound is the backpressure mechanism — `enqueue` blocks when full, so the
//! claim engine never drops a claimed row.

use bday_schemas::Event;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
#[error("dispatch queue is closed (no workers remain)")]
pub struct DispatchClosed;

#[derive(Clone)]
pub struct Dispatcher {
    sender: mpsc::Sender<Event>,
}

impl Dispatcher {
    /// `capacity` bounds how many claimed-but-not-yet-picked-up events may
    /// sit in the channel before `enqueue` blocks.
    pub fn channel(capacity: usize) -> (Dispatcher, mpsc::Receiver<Event>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Dispatcher { sender }, receiver)
    }

    /// Blocks until there is room, then enqueues `event`. Never drops.
    pub async fn enqueue(&self, event: Event) -> Result<(), DispatchClosed> {
        self.sender.send(event).await.map_err(|_| DispatchClosed)
    }
}
