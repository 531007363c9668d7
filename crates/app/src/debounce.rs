//! Neighbor topology debouncer.
//!
//! Raw neighbor-appeared / neighbor-disappeared notifications are buffered
//! per direction. Every notification restarts its direction's window; when a
//! window elapses quietly the buffer is compared against the confirmed
//! neighbor set and a single coalesced [`TopologyEvent`] batch is produced.
//!
//! A neighbor that appears and disappears again inside an open window
//! cancels out: the opposite buffer drops it.

use std::collections::BTreeSet;
use std::time::Duration;

use blinksim_domain::id::DeviceId;
use tokio::time::Instant;

/// A settled topology change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyEvent {
    /// Neighbors that were not confirmed before, in arrival order.
    Joined(Vec<DeviceId>),
    /// Confirmed neighbors that went away, in departure order.
    Left(Vec<DeviceId>),
    /// The departure emptied the neighbor set; carries the same neighbors as
    /// the preceding [`TopologyEvent::Left`].
    Isolated(Vec<DeviceId>),
}

#[derive(Debug, Default)]
struct Window {
    buffer: Vec<DeviceId>,
    flush_at: Option<Instant>,
}

impl Window {
    fn push(&mut self, neighbor: DeviceId, flush_at: Instant) {
        if !self.buffer.contains(&neighbor) {
            self.buffer.push(neighbor);
        }
        self.flush_at = Some(flush_at);
    }

    fn cancel(&mut self, neighbor: DeviceId) {
        self.buffer.retain(|candidate| *candidate != neighbor);
        if self.buffer.is_empty() {
            self.flush_at = None;
        }
    }

    fn due(&self, now: Instant) -> Option<Instant> {
        self.flush_at.filter(|at| *at <= now)
    }

    fn take(&mut self) -> Vec<DeviceId> {
        self.flush_at = None;
        std::mem::take(&mut self.buffer)
    }
}

/// Per-device neighbor debouncer.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    confirmed: BTreeSet<DeviceId>,
    joining: Window,
    leaving: Window,
}

impl Debouncer {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            confirmed: BTreeSet::new(),
            joining: Window::default(),
            leaving: Window::default(),
        }
    }

    /// Neighbors whose arrival has been confirmed by a flush.
    #[must_use]
    pub fn confirmed(&self) -> &BTreeSet<DeviceId> {
        &self.confirmed
    }

    /// Whether `neighbor` is waiting in the join buffer.
    #[must_use]
    pub fn is_joining(&self, neighbor: DeviceId) -> bool {
        self.joining.buffer.contains(&neighbor)
    }

    pub fn neighbor_added(&mut self, neighbor: DeviceId, now: Instant) {
        self.leaving.cancel(neighbor);
        self.joining.push(neighbor, now + self.window);
        tracing::debug!(%neighbor, pending = self.joining.buffer.len(), "neighbor appeared");
    }

    pub fn neighbor_removed(&mut self, neighbor: DeviceId, now: Instant) {
        self.joining.cancel(neighbor);
        self.leaving.push(neighbor, now + self.window);
        tracing::debug!(%neighbor, pending = self.leaving.buffer.len(), "neighbor disappeared");
    }

    /// When the next window closes.
    #[must_use]
    pub fn next_flush(&self) -> Option<Instant> {
        match (self.joining.flush_at, self.leaving.flush_at) {
            (Some(join), Some(leave)) => Some(join.min(leave)),
            (join, leave) => join.or(leave),
        }
    }

    /// Close the earliest window due at `now`.
    ///
    /// Returns the instant the window closed at and the events it produced,
    /// which may be empty when nothing actually changed. When both windows
    /// close at the same instant, departures flush first.
    pub fn flush_due(&mut self, now: Instant) -> Option<(Instant, Vec<TopologyEvent>)> {
        let join = self.joining.due(now);
        let leave = self.leaving.due(now);
        match (join, leave) {
            (Some(join), Some(leave)) if join < leave => Some((join, self.flush_joining())),
            (_, Some(leave)) => Some((leave, self.flush_leaving())),
            (Some(join), None) => Some((join, self.flush_joining())),
            (None, None) => None,
        }
    }

    /// Drop both buffers without emitting anything.
    pub fn reset_pending(&mut self) {
        self.joining.take();
        self.leaving.take();
    }

    fn flush_joining(&mut self) -> Vec<TopologyEvent> {
        let added: Vec<DeviceId> = self
            .joining
            .take()
            .into_iter()
            .filter(|neighbor| !self.confirmed.contains(neighbor))
            .collect();
        if added.is_empty() {
            return Vec::new();
        }
        self.confirmed.extend(added.iter().copied());
        tracing::debug!(count = added.len(), total = self.confirmed.len(), "neighbors joined");
        vec![TopologyEvent::Joined(added)]
    }

    fn flush_leaving(&mut self) -> Vec<TopologyEvent> {
        let removed: Vec<DeviceId> = self
            .leaving
            .take()
            .into_iter()
            .filter(|neighbor| self.confirmed.contains(neighbor))
            .collect();
        if removed.is_empty() {
            return Vec::new();
        }
        let isolated = removed.len() == self.confirmed.len();
        for neighbor in &removed {
            self.confirmed.remove(neighbor);
        }
        tracing::debug!(count = removed.len(), isolated, "neighbors left");
        if isolated {
            vec![
                TopologyEvent::Left(removed.clone()),
                TopologyEvent::Isolated(removed),
            ]
        } else {
            vec![TopologyEvent::Left(removed)]
        }
    }
}
