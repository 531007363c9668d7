//! In-process event bus backed by a tokio broadcast channel.

use std::future::Future;

use tokio::sync::broadcast;

use blinksim_domain::error::BlinkError;
use blinksim_domain::event::DeviceRecord;

use crate::ports::EventPublisher;

/// In-process event bus using a tokio [`broadcast`] channel.
///
/// Publishing succeeds even when there are no active subscribers
/// (the record is simply dropped).
pub struct InProcessEventBus {
    sender: broadcast::Sender<DeviceRecord>,
}

impl InProcessEventBus {
    /// Create a new event bus with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to records on this bus.
    ///
    /// Returns a receiver that will get all records published *after*
    /// the subscription is created.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceRecord> {
        self.sender.subscribe()
    }
}

impl EventPublisher for InProcessEventBus {
    fn publish(&self, record: DeviceRecord) -> impl Future<Output = Result<(), BlinkError>> + Send {
        // send only fails without receivers, which is not an error here
        let _ = self.sender.send(record);
        async { Ok(()) }
    }
}
