//! Per-kind observer registry for device records.

use std::collections::HashMap;

use blinksim_domain::event::{DeviceRecord, EventKind};

type Observer = Box<dyn FnMut(&DeviceRecord) + Send>;

/// Maps an [`EventKind`] to its subscribers, called synchronously in
/// registration order.
#[derive(Default)]
pub struct EventEmitter {
    observers: HashMap<EventKind, Vec<Observer>>,
}

impl EventEmitter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, kind: EventKind, observer: impl FnMut(&DeviceRecord) + Send + 'static) {
        self.observers.entry(kind).or_default().push(Box::new(observer));
    }

    pub fn emit(&mut self, record: &DeviceRecord) {
        if let Some(observers) = self.observers.get_mut(&record.event.kind()) {
            for observer in observers {
                observer(record);
            }
        }
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: HashMap<_, _> = self
            .observers
            .iter()
            .map(|(kind, observers)| (kind, observers.len()))
            .collect();
        f.debug_struct("EventEmitter").field("observers", &counts).finish()
    }
}
