//! Input stream loss and rate accounting
//!
//! Every input report carries a 6-bit counter. Gaps between consecutive
//! counters estimate how many reports never reached us. The reader thread owns
//! the optional [`LossAccountant`] and always feeds [`StreamCounters`], so the
//! stats task can read and reset the totals without touching the reader.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

/// Counter modulus (6 bits)
pub const SEQUENCE_MODULUS: u16 = 64;

/// Events seen, reports lost and reports dropped since the last reset
#[derive(Debug, Default)]
pub struct StreamCounters {
    events: AtomicU64,
    lost: AtomicU64,
    dropped: AtomicU64,
}

impl StreamCounters {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record(&self, gap: u8) {
        self.events.fetch_add(1, Ordering::Relaxed);
        if gap > 0 {
            self.lost.fetch_add(gap as u64, Ordering::Relaxed);
        }
    }

    /// Count a report that could not be decoded
    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Read events and lost without resetting them
    pub fn peek(&self) -> (u64, u64) {
        (
            self.events.load(Ordering::Relaxed),
            self.lost.load(Ordering::Relaxed),
        )
    }

    /// Read and zero all counters for a reporting interval of `interval`
    pub fn take(&self, interval: Duration) -> StatsSnapshot {
        StatsSnapshot {
            events: self.events.swap(0, Ordering::Relaxed),
            lost: self.lost.swap(0, Ordering::Relaxed),
            dropped: self.dropped.swap(0, Ordering::Relaxed),
            interval,
        }
    }
}

/// Throughput over one reporting interval
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsSnapshot {
    pub events: u64,
    pub lost: u64,
    pub dropped: u64,
    pub interval: Duration,
}

impl StatsSnapshot {
    pub fn rate_hz(&self) -> f64 {
        let secs = self.interval.as_secs_f64();
        if secs > 0.0 {
            self.events as f64 / secs
        } else {
            0.0
        }
    }

    /// Mean time between reports in milliseconds
    pub fn mean_interval_ms(&self) -> Option<f64> {
        if self.events == 0 {
            return None;
        }
        Some(self.interval.as_secs_f64() * 1000.0 / self.events as f64)
    }

    pub fn loss_percent(&self) -> f64 {
        let total = self.events + self.lost;
        if total == 0 {
            0.0
        } else {
            100.0 * self.lost as f64 / total as f64
        }
    }
}

/// Outcome of one counter observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceStep {
    pub gap: u8,
    pub repeated: bool,
}

/// Per-stream counter tracker
#[derive(Debug, Default)]
pub struct LossAccountant {
    last: Option<u8>,
}

impl LossAccountant {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for a report carrying `counter`.
    ///
    /// The first report only establishes the baseline. A counter equal to the
    /// previous one contributes no loss and is logged.
    pub fn observe(&mut self, counter: u8) -> SequenceStep {
        let counter = counter & 0x3F;
        let step = match self.last {
            None => SequenceStep {
                gap: 0,
                repeated: false,
            },
            Some(last) => Self::gap(last, counter),
        };
        if step.repeated {
            warn!("Repeated report counter {}", counter);
        }
        self.last = Some(counter);
        step
    }

    fn gap(last: u8, counter: u8) -> SequenceStep {
        let (last, counter) = (last as u16, counter as u16);
        if counter > last {
            SequenceStep {
                gap: (counter - last - 1) as u8,
                repeated: false,
            }
        } else if counter < last {
            SequenceStep {
                gap: (counter + SEQUENCE_MODULUS - last - 1) as u8,
                repeated: false,
            }
        } else {
            SequenceStep {
                gap: 0,
                repeated: true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(sequence: &[u8]) -> (u64, u64) {
        let counters = StreamCounters::new();
        let mut acct = LossAccountant::new();
        for &c in sequence {
            counters.record(acct.observe(c).gap);
        }
        counters.peek()
    }

    #[test]
    fn test_gap_in_sequence() {
        assert_eq!(run(&[0, 1, 2, 5]), (4, 2));
    }

    #[test]
    fn test_wraparound() {
        assert_eq!(run(&[62, 63, 1]), (3, 1));
        assert_eq!(run(&[63, 0]), (2, 0));
    }

    #[test]
    fn test_repeated_counter() {
        let mut acct = LossAccountant::new();
        acct.observe(7);
        let step = acct.observe(7);
        assert!(step.repeated);
        assert_eq!(step.gap, 0);
    }

    #[test]
    fn test_first_report_is_baseline() {
        let mut acct = LossAccountant::new();
        assert_eq!(
            acct.observe(40),
            SequenceStep {
                gap: 0,
                repeated: false
            }
        );
        assert_eq!(acct.observe(42).gap, 1);
    }

    #[test]
    fn test_take_resets() {
        let counters = StreamCounters::new();
        counters.record(0);
        counters.record(3);
        counters.record_dropped();
        let snap = counters.take(Duration::from_secs(10));
        assert_eq!(snap.events, 2);
        assert_eq!(snap.lost, 3);
        assert_eq!(snap.dropped, 1);
        assert_eq!(counters.peek(), (0, 0));
        assert_eq!(counters.take(Duration::from_secs(10)).dropped, 0);
    }

    #[test]
    fn test_snapshot_rates() {
        let snap = StatsSnapshot {
            events: 750,
            lost: 250,
            dropped: 0,
            interval: Duration::from_secs(10),
        };
        assert!((snap.rate_hz() - 75.0).abs() < 1e-9);
        assert!((snap.loss_percent() - 25.0).abs() < 1e-9);
        assert!((snap.mean_interval_ms().unwrap() - 13.333).abs() < 0.01);

        let idle = StatsSnapshot {
            events: 0,
            lost: 0,
            dropped: 0,
            interval: Duration::from_secs(10),
        };
        assert_eq!(idle.loss_percent(), 0.0);
        assert_eq!(idle.mean_interval_ms(), None);
    }
}
