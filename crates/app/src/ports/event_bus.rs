//! Event bus port — publish/subscribe for device records.

use std::future::Future;

use blinksim_domain::error::BlinkError;
use blinksim_domain::event::DeviceRecord;

/// Publishes device records to interested subscribers.
pub trait EventPublisher {
    /// Publish a record to all current subscribers.
    fn publish(&self, record: DeviceRecord) -> impl Future<Output = Result<(), BlinkError>> + Send;
}

impl<T: EventPublisher + Send + Sync> EventPublisher for std::sync::Arc<T> {
    fn publish(&self, record: DeviceRecord) -> impl Future<Output = Result<(), BlinkError>> + Send {
        (**self).publish(record)
    }
}
