// ===================== clock.rs =====================
//! Fixed-rate tick generation.
//!
//! The sampler spins on a monotonic clock instead of sleeping: a sleep on
//! FreeRTOS rounds up to the next 1 ms tick, far coarser than one sample
//! period at 16 kHz (62.5 µs). Nothing else runs while recording, so the
//! spinning costs nothing but power.

use std::{
    cell::Cell,
    time::{Duration, Instant},
};

pub trait Clock {
    /// Monotonic time since an arbitrary, fixed origin.
    fn now(&self) -> Duration;

    /// Coarse wait, used between cycles only.
    fn delay(&self, d: Duration);
}

/// `std::time::Instant` based clock; backed by `esp_timer` on ESP-IDF.
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn delay(&self, d: Duration) {
        std::thread::sleep(d);
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Duration {
        (**self).now()
    }

    fn delay(&self, d: Duration) {
        (**self).delay(d)
    }
}

/// Virtual time: each `now()` advances by `step`, `delay()` jumps ahead.
/// Lets the sampling cadence be checked without waiting in real time.
pub struct VirtualClock {
    now: Cell<Duration>,
    step: Duration,
}

impl VirtualClock {
    pub fn new(step: Duration) -> Self {
        Self { now: Cell::new(Duration::ZERO), step }
    }

    pub fn elapsed(&self) -> Duration {
        self.now.get()
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> Duration {
        let t = self.now.get();
        self.now.set(t + self.step);
        t
    }

    fn delay(&self, d: Duration) {
        self.now.set(self.now.get() + d);
    }
}

/// Deadline of sample `index` counted from `start`. Computed from the index
/// rather than by adding a rounded period, so rates that do not divide 1 s
/// (22 050, 44 100 Hz) do not drift.
pub fn sample_deadline(start: Duration, index: u32, rate_hz: u32) -> Duration {
    start + Duration::from_nanos(u64::from(index) * 1_000_000_000 / u64::from(rate_hz.max(1)))
}

pub struct SamplingClock<C> {
    clock: C,
    late_ticks: u32,
}

impl<C: Clock> SamplingClock<C> {
    pub fn new(clock: C) -> Self {
        Self { clock, late_ticks: 0 }
    }

    /// First deadline of a session: "now".
    pub fn start(&mut self) -> Duration {
        self.late_ticks = 0;
        self.clock.now()
    }

    /// Spins until `previous_deadline` is reached, then returns the next one.
    pub fn next_tick(&mut self, previous_deadline: Duration, period: Duration) -> Duration {
        self.wait_until(previous_deadline, period);
        previous_deadline + period
    }

    /// Spins until `deadline`. Arriving more than `period` late counts as a
    /// late tick.
    pub fn wait_until(&mut self, deadline: Duration, period: Duration) {
        let mut now = self.clock.now();
        if now > deadline + period {
            self.late_ticks += 1;
        }
        while now < deadline {
            core::hint::spin_loop();
            now = self.clock.now();
        }
    }

    /// Ticks reached more than a full period after their deadline.
    pub fn late_ticks(&self) -> u32 {
        self.late_ticks
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_are_evenly_spaced() {
        let vc = VirtualClock::new(Duration::from_micros(1));
        let mut sc = SamplingClock::new(&vc);
        let period = Duration::from_nanos(62_500);

        let mut deadline = sc.start();
        let first = deadline;
        for i in 1..=1_000u32 {
            deadline = sc.next_tick(deadline, period);
            assert_eq!(deadline, first + period * i);
        }
        // the last wait ended at the deadline of tick 999, within one clock step
        let end = vc.elapsed();
        assert!(end >= first + period * 999);
        assert!(end <= first + period * 999 + Duration::from_micros(2));
        assert_eq!(sc.late_ticks(), 0);
    }

    #[test]
    fn deadlines_do_not_drift_at_44100() {
        let start = Duration::from_millis(3);
        assert_eq!(sample_deadline(start, 44_100, 44_100), start + Duration::from_secs(1));
        assert_eq!(sample_deadline(start, 22_050 * 7, 22_050), start + Duration::from_secs(7));
        // the rounded period alone would finish early
        let period = Duration::from_nanos(1_000_000_000 / 44_100);
        assert!(period * 44_100 < Duration::from_secs(1));

        let vc = VirtualClock::new(Duration::from_micros(1));
        let mut sc = SamplingClock::new(&vc);
        let first = sc.start();
        for i in 0..=44_100u32 {
            sc.wait_until(sample_deadline(first, i, 44_100), period);
        }
        assert!(vc.elapsed() >= first + Duration::from_secs(1));
        assert_eq!(sc.late_ticks(), 0);
    }

    #[test]
    fn overdue_deadline_returns_immediately_and_counts_late() {
        let vc = VirtualClock::new(Duration::from_millis(1));
        let mut sc = SamplingClock::new(&vc);
        vc.delay(Duration::from_secs(1));

        let next = sc.next_tick(Duration::ZERO, Duration::from_micros(100));
        assert_eq!(next, Duration::from_micros(100));
        assert_eq!(sc.late_ticks(), 1);
    }

    #[test]
    fn monotonic_clock_spins_past_deadline() {
        let clk = MonotonicClock::new();
        let mut sc = SamplingClock::new(&clk);
        let start = sc.start();
        let d = sc.next_tick(start + Duration::from_micros(200), Duration::from_micros(200));
        assert!(clk.now() >= start + Duration::from_micros(200));
        assert_eq!(d, start + Duration::from_micros(400));
    }
}
