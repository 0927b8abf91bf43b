//! Broadcast-rate estimation.
//!
//! Each decode pushes a timestamp into a per-message FIFO; timestamps older
//! than the five-second window are popped, and the rate estimate is the
//! queue length divided by the window. This is a running approximation, not
//! a true rate: it reads low for the first five seconds after start and
//! smears bursty traffic across the window.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(5);

/// Sliding-window message-rate estimator, keyed by message name.
#[derive(Debug, Default)]
pub struct FrequencyEstimator {
    seen: HashMap<String, VecDeque<Instant>>,
}

impl FrequencyEstimator {
    pub fn new() -> Self {
        FrequencyEstimator::default()
    }

    /// Records a decode of `name` happening now and returns the updated
    /// rate estimate in messages per second.
    pub fn record(&mut self, name: &str) -> f64 {
        self.record_at(name, Instant::now())
    }

    /// Clock-injectable form of [`record`](Self::record), used by tests.
    pub fn record_at(&mut self, name: &str, now: Instant) -> f64 {
        let queue = self
            .seen
            .entry(name.to_string())
            .or_insert_with(VecDeque::new);
        queue.push_back(now);
        Self::prune(queue, now);
        queue.len() as f64 / WINDOW.as_secs() as f64
    }

    /// The current rate estimate for `name` without recording an event, so
    /// the estimate decays toward zero once traffic stops.
    pub fn rate(&mut self, name: &str) -> f64 {
        self.rate_at(name, Instant::now())
    }

    /// Clock-injectable form of [`rate`](Self::rate).
    pub fn rate_at(&mut self, name: &str, now: Instant) -> f64 {
        match self.seen.get_mut(name) {
            Some(queue) => {
                Self::prune(queue, now);
                queue.len() as f64 / WINDOW.as_secs() as f64
            }
            None => 0.0,
        }
    }

    fn prune(queue: &mut VecDeque<Instant>, now: Instant) {
        while let Some(&front) = queue.front() {
            if now.saturating_duration_since(front) > WINDOW {
                queue.pop_front();
            } else {
                break;
            }
        }
    }
}
