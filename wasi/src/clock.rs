//! Clock sources for `clock_*` syscalls and poll deadlines.
//!
//! The shim has no ambient notion of time; whoever embeds it decides what
//! a nanosecond is. The default source is a deterministic counter that
//! advances a little on every reading, which keeps guests that spin on
//! `clock_time_get` or poll timeouts making progress without any host
//! clock at all.

use crate::abi::ClockId;

/// Supplies readings for the WASI clocks, in nanoseconds.
pub trait ClockSource: Send {
    /// Current reading of the given clock.
    fn now(&mut self, id: ClockId) -> u64;

    /// Resolution reported by `clock_res_get`.
    fn resolution(&self, _id: ClockId) -> u64 {
        1_000
    }
}

/// Deterministic clock: every reading advances the counter.
pub struct TickClock {
    /// Realtime base, nanoseconds since the epoch.
    base: u64,
    /// Monotonic counter, nanoseconds.
    counter: u64,
}

impl TickClock {
    /// Advance per reading: 1ms keeps timeouts short but observable.
    const STEP: u64 = 1_000_000;

    pub fn new() -> Self {
        TickClock {
            base: 1_700_000_000_000_000_000,
            counter: 1_000_000_000,
        }
    }
}

impl Default for TickClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockSource for TickClock {
    fn now(&mut self, id: ClockId) -> u64 {
        self.counter += Self::STEP;
        match id {
            ClockId::Realtime => self.base + self.counter,
            ClockId::Monotonic | ClockId::ProcessCputime | ClockId::ThreadCputime => self.counter,
        }
    }
}

// ─── Tests ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_readings_increase() {
        let mut clock = TickClock::new();
        let a = clock.now(ClockId::Monotonic);
        let b = clock.now(ClockId::Monotonic);
        assert!(a > 0);
        assert!(b > a);
    }

    #[test]
    fn realtime_is_offset_from_the_same_counter() {
        let mut clock = TickClock::new();
        let mono = clock.now(ClockId::Monotonic);
        let real = clock.now(ClockId::Realtime);
        assert!(real > mono);
        assert!(real > 1_700_000_000_000_000_000);
    }
}
