//! The countdown to the next post.

/// Result of advancing the countdown by one second.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Seconds remaining after this tick.
    Counting(u32),
    /// The countdown had already reached zero. The owner decides when to re-arm.
    Expired,
}

/// A one-second-resolution countdown.
///
/// The timer never re-arms itself and never persists anything; the
/// scheduler owns both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountdownTimer {
    time_left: u32,
    /// Length in seconds of the period the timer was last armed with.
    period: u32,
}

impl CountdownTimer {
    /// A freshly armed timer.
    pub fn new(delay_minutes: u32) -> Self {
        let period = minutes_to_secs(delay_minutes);
        Self {
            time_left: period,
            period,
        }
    }

    /// Resume from a persisted countdown.
    ///
    /// The persisted value is adopted as is, even when it is longer than the
    /// configured delay. The period stretches to cover it until the next
    /// re-arm.
    pub fn restore(persisted: Option<u32>, delay_minutes: u32) -> Self {
        let mut timer = Self::new(delay_minutes);
        if let Some(secs) = persisted {
            timer.time_left = secs;
            timer.period = timer.period.max(secs);
        }
        timer
    }

    /// Apply a new delay.
    ///
    /// Before anything has been posted the countdown restarts at the new
    /// period. Afterwards the running countdown is left alone and the new
    /// delay takes effect at the next re-arm. Returns whether `time_left`
    /// changed.
    pub fn reconfigure(&mut self, delay_minutes: u32, has_posted: bool) -> bool {
        if has_posted {
            return false;
        }
        let before = self.time_left;
        self.rearm(delay_minutes);
        before != self.time_left
    }

    /// Advance by one second.
    pub fn tick(&mut self) -> Tick {
        if self.time_left == 0 {
            return Tick::Expired;
        }
        self.time_left -= 1;
        Tick::Counting(self.time_left)
    }

    /// Start a new full period.
    pub fn rearm(&mut self, delay_minutes: u32) {
        self.period = minutes_to_secs(delay_minutes);
        self.time_left = self.period;
    }

    /// Seconds until the next post.
    pub fn time_left(&self) -> u32 {
        self.time_left
    }

    /// Length of the current period in seconds.
    pub fn period(&self) -> u32 {
        self.period
    }
}

fn minutes_to_secs(minutes: u32) -> u32 {
    minutes.saturating_mul(60)
}

/// Format seconds as `m:ss`.
pub fn format_countdown(secs: u32) -> String {
    format!("{}:{:02}", secs / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn test_new_timer_is_full() {
        let timer = CountdownTimer::new(5);
        assert_eq!(timer.time_left(), 300);
        assert_eq!(timer.period(), 300);
    }

    #[test]
    fn test_restore_uses_persisted_value() {
        assert_eq!(CountdownTimer::restore(Some(42), 5).time_left(), 42);
        assert_eq!(CountdownTimer::restore(None, 5).time_left(), 300);
        assert_eq!(CountdownTimer::restore(Some(0), 5).time_left(), 0);
    }

    #[test]
    fn test_restore_keeps_value_longer_than_delay() {
        let mut timer = CountdownTimer::restore(Some(900), 5);
        assert_eq!(timer.time_left(), 900);
        assert_eq!(timer.period(), 900);

        timer.rearm(5);
        assert_eq!(timer.time_left(), 300);
        assert_eq!(timer.period(), 300);
    }

    #[test]
    fn test_reconfigure_before_first_post() {
        let mut timer = CountdownTimer::new(5);
        assert!(timer.reconfigure(10, false));
        assert_eq!(timer.time_left(), 600);
        assert!(!timer.reconfigure(10, false));
    }

    #[test]
    fn test_reconfigure_after_posting_waits_for_rearm() {
        let mut timer = CountdownTimer::new(5);
        timer.tick();
        timer.tick();
        assert!(!timer.reconfigure(2, true));
        assert_eq!(timer.time_left(), 298);
        assert_eq!(timer.period(), 300);

        timer.rearm(2);
        assert_eq!(timer.time_left(), 120);
    }

    #[test]
    fn test_tick_counts_down_then_expires() {
        let mut timer = CountdownTimer::restore(Some(2), 1);
        assert_eq!(timer.tick(), Tick::Counting(1));
        assert_eq!(timer.tick(), Tick::Counting(0));
        assert_eq!(timer.tick(), Tick::Expired);
        assert_eq!(timer.tick(), Tick::Expired);
        assert_eq!(timer.time_left(), 0);
    }

    #[test]
    fn test_zero_delay() {
        let mut timer = CountdownTimer::new(0);
        assert_eq!(timer.time_left(), 0);
        assert_eq!(timer.tick(), Tick::Expired);
    }

    #[test]
    fn test_format_countdown() {
        assert_eq!(format_countdown(299), "4:59");
        assert_eq!(format_countdown(60), "1:00");
        assert_eq!(format_countdown(5), "0:05");
        assert_eq!(format_countdown(3600), "60:00");
    }

    proptest! {
        #[test]
        fn prop_restore_adopts_persisted(persisted in proptest::option::of(0u32..100_000), delay in 0u32..1_000) {
            let timer = CountdownTimer::restore(persisted, delay);
            prop_assert_eq!(timer.time_left(), persisted.unwrap_or(delay * 60));
            prop_assert!(timer.time_left() <= timer.period());
        }

        #[test]
        fn prop_ticks_never_increase(start in 0u32..600, ticks in 0usize..700) {
            let mut timer = CountdownTimer::restore(Some(start), 10);
            let mut last = timer.time_left();
            for _ in 0..ticks {
                timer.tick();
                prop_assert!(timer.time_left() <= last);
                last = timer.time_left();
            }
            prop_assert_eq!(timer.time_left(), start.saturating_sub(ticks as u32));
        }
    }
}
