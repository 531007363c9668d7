//! Timer/threshold scheduler — a countdown value with callbacks at fixed
//! points of the countdown.
//!
//! A [`Timer`] holds a value (milliseconds) that counts down in real time
//! from the moment it was last written, stopping at zero. Thresholds are
//! kept ordered by time, highest first, and each one owns at most one
//! pending alarm. Every write re-derives the alarms: thresholds the write
//! jumped past are returned for immediate (catch-up) execution, the others
//! are rescheduled relative to the new value.
//!
//! The timer never runs callbacks itself. Callers receive callback handles
//! (from [`Timer::set`], [`Timer::at`] and [`Timer::take_due`]) and execute
//! them, which keeps the scheduler free of any borrow on the device.

use std::time::Duration;

use blinksim_domain::program::TimerPolicy;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Alarm {
    Idle,
    /// Fires at the given instant.
    Waiting(Instant),
    /// Pending, but the countdown stops at zero before reaching it; only a
    /// write can cross it.
    Parked,
}

impl Alarm {
    fn is_pending(self) -> bool {
        !matches!(self, Self::Idle)
    }
}

#[derive(Debug, Clone)]
struct Threshold<C> {
    time: i64,
    callback: C,
    alarm: Alarm,
}

/// A countdown timer with time thresholds.
#[derive(Debug, Clone)]
pub struct Timer<C> {
    value: i64,
    set_at: Instant,
    started: bool,
    policy: TimerPolicy,
    /// Ordered by `time`, descending.
    thresholds: Vec<Threshold<C>>,
}

impl<C: Copy> Timer<C> {
    /// Create a stopped timer at value 0.
    #[must_use]
    pub fn new(policy: TimerPolicy, now: Instant) -> Self {
        Self {
            value: 0,
            set_at: now,
            started: false,
            policy,
            thresholds: Vec::new(),
        }
    }

    #[must_use]
    pub fn policy(&self) -> TimerPolicy {
        self.policy
    }

    /// Current value of the countdown.
    ///
    /// A positive value decreases by one per elapsed millisecond and holds
    /// at zero; zero or negative values are held as written.
    #[must_use]
    pub fn value(&self, now: Instant) -> i64 {
        if self.value <= 0 {
            return self.value;
        }
        let elapsed = i64::try_from(now.saturating_duration_since(self.set_at).as_millis())
            .unwrap_or(i64::MAX);
        self.value.saturating_sub(elapsed).max(0)
    }

    /// Write a new value and re-derive every threshold's alarm.
    ///
    /// Returns the callbacks of pending thresholds that the write jumped
    /// past (empty when the policy disables bypassed callbacks), highest
    /// threshold first.
    pub fn set(&mut self, value: i64, now: Instant) -> Vec<C> {
        self.value = value;
        self.set_at = now;
        self.started = true;

        let mut bypassed = Vec::new();
        for index in 0..self.thresholds.len() {
            let time = self.thresholds[index].time;
            let alarm = if self.thresholds[index].alarm.is_pending() {
                if value < time {
                    if self.policy.run_bypassed {
                        bypassed.push(self.thresholds[index].callback);
                    }
                    Alarm::Idle
                } else {
                    self.arm(time)
                }
            } else if value > time {
                self.arm(time)
            } else {
                Alarm::Idle
            };
            self.thresholds[index].alarm = alarm;
        }
        bypassed
    }

    /// Register a threshold, keeping the list ordered by descending time.
    ///
    /// If the countdown is above `time` an alarm is scheduled for the
    /// remaining duration, which is zero when the started countdown sits
    /// exactly on `time`. If the timer has started and is already past
    /// `time`, the callback is returned for immediate execution when the
    /// policy runs newly expired callbacks.
    pub fn at(&mut self, time: i64, callback: C, now: Instant) -> Option<C> {
        let position = self
            .thresholds
            .iter()
            .position(|threshold| threshold.time < time)
            .unwrap_or(self.thresholds.len());

        let current = self.value(now);
        let (alarm, expired) = if current > time {
            let alarm = if time >= 0 {
                Alarm::Waiting(now + millis(current - time))
            } else {
                Alarm::Parked
            };
            (alarm, None)
        } else if self.started && current == time {
            (Alarm::Waiting(now), None)
        } else if self.started && current < time && self.policy.run_new_expired {
            (Alarm::Idle, Some(callback))
        } else {
            (Alarm::Idle, None)
        };

        self.thresholds.insert(
            position,
            Threshold {
                time,
                callback,
                alarm,
            },
        );
        expired
    }

    /// Instant of the earliest scheduled alarm.
    #[must_use]
    pub fn next_alarm(&self) -> Option<Instant> {
        self.thresholds
            .iter()
            .filter_map(|threshold| match threshold.alarm {
                Alarm::Waiting(at) => Some(at),
                Alarm::Idle | Alarm::Parked => None,
            })
            .min()
    }

    /// Pop the earliest alarm due at `now`, returning its callback.
    ///
    /// On ties the highest threshold wins.
    pub fn take_due(&mut self, now: Instant) -> Option<C> {
        let mut earliest: Option<(usize, Instant)> = None;
        for (index, threshold) in self.thresholds.iter().enumerate() {
            if let Alarm::Waiting(at) = threshold.alarm {
                if at <= now && earliest.is_none_or(|(_, best)| at < best) {
                    earliest = Some((index, at));
                }
            }
        }
        let (index, _) = earliest?;
        self.thresholds[index].alarm = Alarm::Idle;
        Some(self.thresholds[index].callback)
    }

    /// Number of thresholds currently holding a pending alarm.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.thresholds
            .iter()
            .filter(|threshold| threshold.alarm.is_pending())
            .count()
    }

    /// Threshold times, in evaluation order.
    #[must_use]
    pub fn threshold_times(&self) -> Vec<i64> {
        self.thresholds.iter().map(|threshold| threshold.time).collect()
    }

    /// Cancel every alarm and drop every threshold.
    pub fn clear(&mut self) {
        self.thresholds.clear();
    }

    fn arm(&self, time: i64) -> Alarm {
        match self.value.cmp(&time) {
            std::cmp::Ordering::Less => Alarm::Idle,
            std::cmp::Ordering::Equal => Alarm::Waiting(self.set_at),
            std::cmp::Ordering::Greater if time >= 0 => {
                Alarm::Waiting(self.set_at + millis(self.value - time))
            }
            std::cmp::Ordering::Greater => Alarm::Parked,
        }
    }
}

fn millis(amount: i64) -> Duration {
    Duration::from_millis(u64::try_from(amount).unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECOND: i64 = 1000;

    fn ms(amount: u64) -> Duration {
        Duration::from_millis(amount)
    }

    fn countdown(now: Instant) -> Timer<&'static str> {
        let mut timer = Timer::new(TimerPolicy::default(), now);
        assert!(timer.at(0, "expired", now).is_none());
        assert!(timer.at(30 * SECOND, "thirty", now).is_none());
        assert!(timer.at(10 * SECOND, "ten", now).is_none());
        timer
    }

    fn drain(timer: &mut Timer<&'static str>, now: Instant) -> Vec<&'static str> {
        std::iter::from_fn(|| timer.take_due(now)).collect()
    }

    #[test]
    fn should_keep_thresholds_in_descending_order() {
        let now = Instant::now();
        let mut timer = countdown(now);
        timer.at(20 * SECOND, "twenty", now);
        timer.at(-5, "below", now);
        assert_eq!(
            timer.threshold_times(),
            vec![30 * SECOND, 20 * SECOND, 10 * SECOND, 0, -5]
        );
    }

    #[test]
    fn should_not_schedule_anything_before_first_write() {
        let now = Instant::now();
        let timer = countdown(now);
        assert_eq!(timer.pending(), 0);
        assert_eq!(timer.next_alarm(), None);
        assert_eq!(timer.value(now + ms(5000)), 0);
    }

    #[test]
    fn should_count_down_and_stop_at_zero() {
        let now = Instant::now();
        let mut timer: Timer<()> = Timer::new(TimerPolicy::default(), now);
        timer.set(60 * SECOND, now);
        assert_eq!(timer.value(now + ms(1500)), 58_500);
        assert_eq!(timer.value(now + ms(90_000)), 0);
    }

    #[test]
    fn should_hold_negative_values() {
        let now = Instant::now();
        let mut timer: Timer<()> = Timer::new(TimerPolicy::default(), now);
        timer.set(-1, now);
        assert_eq!(timer.value(now + ms(1000)), -1);
    }

    #[test]
    fn should_schedule_alarms_relative_to_written_value() {
        let now = Instant::now();
        let mut timer = countdown(now);
        assert!(timer.set(60 * SECOND, now).is_empty());
        assert_eq!(timer.pending(), 3);
        assert_eq!(timer.next_alarm(), Some(now + ms(30_000)));
    }

    #[test]
    fn should_fire_thresholds_as_countdown_passes_them() {
        let now = Instant::now();
        let mut timer = countdown(now);
        timer.set(60 * SECOND, now);

        assert!(drain(&mut timer, now + ms(29_999)).is_empty());
        assert_eq!(drain(&mut timer, now + ms(30_000)), vec!["thirty"]);
        assert_eq!(drain(&mut timer, now + ms(50_000)), vec!["ten"]);
        assert_eq!(drain(&mut timer, now + ms(60_000)), vec!["expired"]);
        assert_eq!(timer.pending(), 0);
    }

    #[test]
    fn should_fire_all_overdue_thresholds_highest_first() {
        let now = Instant::now();
        let mut timer = countdown(now);
        timer.set(60 * SECOND, now);
        assert_eq!(
            drain(&mut timer, now + ms(120_000)),
            vec!["thirty", "ten", "expired"]
        );
    }

    #[test]
    fn should_run_bypassed_thresholds_when_value_jumps_below_them() {
        let now = Instant::now();
        let mut timer = countdown(now);
        timer.set(60 * SECOND, now);

        let later = now + ms(1000);
        let bypassed = timer.set(5 * SECOND, later);
        assert_eq!(bypassed, vec!["thirty", "ten"]);
        assert_eq!(timer.pending(), 1);
        assert_eq!(timer.next_alarm(), Some(later + ms(5000)));
        assert_eq!(drain(&mut timer, later + ms(5000)), vec!["expired"]);
    }

    #[test]
    fn should_fire_every_pending_threshold_when_set_below_zero() {
        let now = Instant::now();
        let mut timer = countdown(now);
        timer.set(60 * SECOND, now);
        let bypassed = timer.set(-1, now + ms(10));
        assert_eq!(bypassed, vec!["thirty", "ten", "expired"]);
        assert_eq!(timer.pending(), 0);
    }

    #[test]
    fn should_not_refire_thresholds_that_already_fired() {
        let now = Instant::now();
        let mut timer = countdown(now);
        timer.set(60 * SECOND, now);
        assert_eq!(drain(&mut timer, now + ms(30_000)), vec!["thirty"]);
        let bypassed = timer.set(-1, now + ms(30_001));
        assert_eq!(bypassed, vec!["ten", "expired"]);
    }

    #[test]
    fn should_skip_bypassed_callbacks_when_policy_disables_them() {
        let now = Instant::now();
        let policy = TimerPolicy {
            run_bypassed: false,
            run_new_expired: false,
        };
        let mut timer = Timer::new(policy, now);
        timer.at(30 * SECOND, "thirty", now);
        timer.set(60 * SECOND, now);
        assert!(timer.set(SECOND, now).is_empty());
        assert_eq!(timer.pending(), 0);
    }

    #[test]
    fn should_rearm_thresholds_when_value_is_pushed_back_up() {
        let now = Instant::now();
        let mut timer = countdown(now);
        timer.set(60 * SECOND, now);
        assert_eq!(drain(&mut timer, now + ms(30_000)), vec!["thirty"]);

        let later = now + ms(30_000);
        assert!(timer.set(45 * SECOND, later).is_empty());
        assert_eq!(timer.pending(), 3);
        assert_eq!(timer.next_alarm(), Some(later + ms(15_000)));
    }

    #[test]
    fn should_reschedule_pending_alarm_when_value_extended() {
        let now = Instant::now();
        let mut timer = countdown(now);
        timer.set(20 * SECOND, now);
        assert_eq!(timer.next_alarm(), Some(now + ms(10_000)));

        let later = now + ms(5000);
        timer.set(25 * SECOND, later);
        assert_eq!(timer.next_alarm(), Some(later + ms(15_000)));
    }

    #[test]
    fn should_fire_immediately_when_written_exactly_at_threshold() {
        let now = Instant::now();
        let mut timer = countdown(now);
        timer.set(60 * SECOND, now);
        let bypassed = timer.set(10 * SECOND, now);
        assert_eq!(bypassed, vec!["thirty"]);
        assert_eq!(drain(&mut timer, now), vec!["ten"]);
    }

    #[test]
    fn should_schedule_late_threshold_like_declared_one() {
        let now = Instant::now();
        let mut timer: Timer<&'static str> = Timer::new(TimerPolicy::default(), now);
        timer.set(60 * SECOND, now);

        let later = now + ms(10_000);
        assert!(timer.at(30 * SECOND, "late", later).is_none());
        assert_eq!(timer.next_alarm(), Some(now + ms(30_000)));
    }

    #[test]
    fn should_fire_late_threshold_registered_at_current_value() {
        let now = Instant::now();
        let mut timer: Timer<&'static str> = Timer::new(TimerPolicy::default(), now);
        timer.set(10 * SECOND, now);

        assert!(timer.at(10 * SECOND, "exact", now).is_none());
        assert_eq!(timer.pending(), 1);
        assert_eq!(timer.next_alarm(), Some(now));
        assert_eq!(drain(&mut timer, now + ms(60_000)), vec!["exact"]);
    }

    #[test]
    fn should_fire_threshold_registered_once_countdown_reached_zero() {
        let now = Instant::now();
        let mut timer: Timer<&'static str> = Timer::new(TimerPolicy::default(), now);
        timer.set(SECOND, now);

        let later = now + ms(5000);
        assert!(timer.at(0, "expired", later).is_none());
        assert_eq!(drain(&mut timer, later), vec!["expired"]);
    }

    #[test]
    fn should_run_new_expired_threshold_immediately_when_policy_allows() {
        let now = Instant::now();
        let policy = TimerPolicy {
            run_bypassed: true,
            run_new_expired: true,
        };
        let mut timer = Timer::new(policy, now);
        timer.set(5 * SECOND, now);
        assert_eq!(timer.at(30 * SECOND, "late", now), Some("late"));
        assert_eq!(timer.pending(), 0);
    }

    #[test]
    fn should_not_run_expired_threshold_before_timer_started() {
        let now = Instant::now();
        let policy = TimerPolicy {
            run_bypassed: true,
            run_new_expired: true,
        };
        let mut timer = Timer::new(policy, now);
        assert_eq!(timer.at(30 * SECOND, "early", now), None);
    }

    #[test]
    fn should_leave_expired_threshold_idle_when_policy_disallows() {
        let now = Instant::now();
        let mut timer = Timer::new(TimerPolicy::default(), now);
        timer.set(5 * SECOND, now);
        assert_eq!(timer.at(30 * SECOND, "late", now), None);
        assert_eq!(timer.pending(), 0);
    }

    #[test]
    fn should_reach_negative_thresholds_only_through_writes() {
        let now = Instant::now();
        let mut timer = Timer::new(TimerPolicy::default(), now);
        timer.at(-10, "deep", now);
        timer.set(SECOND, now);
        assert_eq!(timer.pending(), 1);
        assert_eq!(timer.next_alarm(), None);
        assert!(drain(&mut timer, now + ms(5000)).is_empty());
        assert_eq!(timer.set(-20, now + ms(5000)), vec!["deep"]);
    }

    #[test]
    fn should_cancel_everything_when_cleared() {
        let now = Instant::now();
        let mut timer = countdown(now);
        timer.set(60 * SECOND, now);
        timer.clear();
        assert_eq!(timer.pending(), 0);
        assert_eq!(timer.next_alarm(), None);
    }
}
