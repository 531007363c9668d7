//! Click classifier — turns raw button presses into click kinds.

use std::time::Duration;

use blinksim_domain::input::Click;
use tokio::time::Instant;

/// Counts short presses until a quiet period closes the sequence.
#[derive(Debug)]
pub struct ClickClassifier {
    window: Duration,
    long_press: Duration,
    count: u32,
    deadline: Option<Instant>,
}

impl ClickClassifier {
    #[must_use]
    pub fn new(window: Duration, long_press: Duration) -> Self {
        Self {
            window,
            long_press,
            count: 0,
            deadline: None,
        }
    }

    /// Feed one press. A long press is classified immediately and discards
    /// any short presses still being counted.
    pub fn press(&mut self, held: Duration, now: Instant) -> Option<Click> {
        if held > self.long_press {
            self.reset();
            return Some(Click::long());
        }
        self.count = self.count.saturating_add(1);
        self.deadline = Some(now + self.window);
        None
    }

    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Close the sequence if its quiet period has elapsed.
    pub fn take_due(&mut self, now: Instant) -> Option<(Instant, Click)> {
        let deadline = self.deadline.filter(|at| *at <= now)?;
        let click = Click::from_count(self.count);
        self.reset();
        click.map(|click| (deadline, click))
    }

    pub fn reset(&mut self) {
        self.count = 0;
        self.deadline = None;
    }
}
