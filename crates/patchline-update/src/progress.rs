//! Progress pacing helpers shared by the download and unpack stages

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Rate limiter for progress events
#[derive(Debug)]
pub struct Throttle {
    interval: Duration,
    last: Option<Instant>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// Returns true and records `now` if an event may be emitted. The first
    /// call always passes.
    pub fn ready(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

/// Transfer rate over a sliding time window
#[derive(Debug)]
pub struct SpeedMeter {
    window: Duration,
    samples: VecDeque<(Instant, u64)>,
}

impl SpeedMeter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            samples: VecDeque::new(),
        }
    }

    /// Record the running byte total at `now` and return bytes per second
    /// across the window
    pub fn record(&mut self, now: Instant, total_bytes: u64) -> u64 {
        self.samples.push_back((now, total_bytes));

        while self.samples.len() > 2 {
            match self.samples.get(1) {
                Some((at, _)) if now.saturating_duration_since(*at) >= self.window => {
                    self.samples.pop_front();
                }
                _ => break,
            }
        }

        let Some(&(oldest_at, oldest_bytes)) = self.samples.front() else {
            return 0;
        };
        let elapsed = now.saturating_duration_since(oldest_at).as_secs_f64();
        if elapsed <= f64::EPSILON {
            return 0;
        }

        (total_bytes.saturating_sub(oldest_bytes) as f64 / elapsed) as u64
    }
}

/// Percentage of `done` over `total`, clamped to [0, 100]
pub fn percentage(done: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    ((done as f64 / total as f64) * 100.0).clamp(0.0, 100.0)
}

/// Convert bytes to a human-readable size
pub fn human_readable_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}
