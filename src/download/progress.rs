// ReelBot - Self-hosted media acquisition service
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Progress normalization, stagnation detection and queue wait estimates

use std::time::Duration;
use tokio::time::Instant;

/// Smallest progress movement (percentage points) that counts as forward progress
pub const PROGRESS_EPSILON: f64 = 0.1;

/// How long a download may sit without forward progress before it is failed
pub const STAGNATION_LIMIT: Duration = Duration::from_secs(30 * 60);

/// Clamp a reported percentage into 0.0 - 100.0
pub fn clamp_progress(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 100.0)
}

/// Tracks how long progress has been flat
///
/// Each value is compared with the one reported just before it. A step
/// smaller than `PROGRESS_EPSILON` starts the stall clock (if it is not
/// already running); a larger step clears it.
#[derive(Debug, Clone)]
pub struct StagnationTracker {
    limit: Duration,
    previous: f64,
    stalled_since: Option<Instant>,
}

impl StagnationTracker {
    pub fn new(limit: Duration) -> Self {
        Self {
            limit,
            previous: 0.0,
            stalled_since: None,
        }
    }

    /// Record a progress value
    ///
    /// Returns how long the download has been stalled once that exceeds the limit.
    pub fn observe(&mut self, progress: f64, now: Instant) -> Option<Duration> {
        let delta = progress - self.previous;
        self.previous = progress;

        if delta >= PROGRESS_EPSILON {
            self.stalled_since = None;
            return None;
        }

        match self.stalled_since {
            None => {
                self.stalled_since = Some(now);
                None
            }
            Some(since) => {
                let stalled_for = now.saturating_duration_since(since);
                (stalled_for > self.limit).then_some(stalled_for)
            }
        }
    }

    /// Forget any running stall (an episode finished)
    pub fn reset(&mut self) {
        self.stalled_since = None;
    }

    pub fn is_stalled(&self) -> bool {
        self.stalled_since.is_some()
    }
}

impl Default for StagnationTracker {
    fn default() -> Self {
        Self::new(STAGNATION_LIMIT)
    }
}

/// Estimated wait for a queued download
///
/// `position × average ÷ max_concurrent`
pub fn estimated_wait(position: usize, average: Duration, max_concurrent: usize) -> Duration {
    if position == 0 || max_concurrent == 0 {
        return Duration::ZERO;
    }
    average.saturating_mul(position as u32) / max_concurrent as u32
}

/// Human-readable queue wait (e.g., "~20 min", "~1 h 30 min")
pub fn estimated_wait_text(position: usize, average: Duration, max_concurrent: usize) -> String {
    if position == 0 {
        return "Starting soon".to_string();
    }

    let minutes = estimated_wait(position, average, max_concurrent).as_secs() / 60;
    if minutes < 1 {
        "Starting soon".to_string()
    } else if minutes < 60 {
        format!("~{} min", minutes)
    } else {
        let hours = minutes / 60;
        let rest = minutes % 60;
        if rest == 0 {
            format!("~{} h", hours)
        } else {
            format!("~{} h {} min", hours, rest)
        }
    }
}
