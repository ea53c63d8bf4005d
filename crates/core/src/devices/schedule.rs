//! Absolute-cycle pin transition queue.

use std::collections::VecDeque;

use crate::gpio::{Gpio, Pin};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Transition {
    at: u64,
    pin: Pin,
    high: bool,
}

/// Pin transitions to play back as simulated time passes.
///
/// Entries are kept in time order; each is applied once, stamped with its
/// own cycle rather than the cycle at which `play` happened to run.
#[derive(Debug, Clone, Default)]
pub struct PulseSchedule {
    queue: VecDeque<Transition>,
}

impl PulseSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Cycle of the last queued transition.
    pub fn end(&self) -> Option<u64> {
        self.queue.back().map(|t| t.at)
    }

    pub fn push(&mut self, at: u64, pin: Pin, high: bool) {
        let pos = self.queue.iter().rposition(|t| t.at <= at).map_or(0, |i| i + 1);
        self.queue.insert(pos, Transition { at, pin, high });
    }

    /// Apply every transition due at or before `now`.
    pub fn play(&mut self, gpio: &mut Gpio, now: u64) {
        while let Some(t) = self.queue.front().copied() {
            if t.at > now {
                break;
            }
            self.queue.pop_front();
            gpio.drive(t.pin, t.high, t.at);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::Port;

    #[test]
    fn test_plays_in_time_order() {
        let pin = Pin::new(Port::D, 4);
        let mut g = Gpio::new();
        let mut s = PulseSchedule::new();
        s.push(200, pin, false);
        s.push(100, pin, true);
        s.push(300, pin, true);
        assert_eq!(s.end(), Some(300));
        s.play(&mut g, 150);
        assert!(g.level(pin));
        assert_eq!(s.len(), 2);
        s.play(&mut g, 250);
        assert!(!g.level(pin));
        // The falling edge is stamped at 200, not 250
        assert_eq!(g.pulse_width(pin), Some(100));
        s.play(&mut g, 1000);
        assert!(s.is_empty());
    }
}
