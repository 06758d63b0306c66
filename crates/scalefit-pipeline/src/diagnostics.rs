//! Sweep diagnostics: timing and counts for one parameter search.
//!
//! The core crate never reads a wall clock itself. Callers pass a
//! [`Clock`]; the CLI uses one backed by `std::time::Instant`, tests use
//! [`NullClock`].
//!
//! Durations are serialized as fractional seconds (`f64`) for JSON
//! compatibility, since `std::time::Duration` does not implement serde
//! traits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Source of timestamps for diagnostics.
pub trait Clock {
    /// Opaque point in time.
    type Instant;

    /// Current time.
    fn now(&self) -> Self::Instant;

    /// Time elapsed since `since`.
    fn elapsed(&self, since: &Self::Instant) -> Duration;
}

/// A clock that never advances. Every duration is zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullClock;

impl Clock for NullClock {
    type Instant = ();

    fn now(&self) {}

    fn elapsed(&self, _since: &()) -> Duration {
        Duration::ZERO
    }
}

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs)
            .map_err(|_| serde::de::Error::custom("duration seconds must be finite and non-negative"))
    }
}

/// Diagnostics collected over one sweep.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SweepDiagnostics {
    /// Backend the sweep rendered on.
    pub backend: String,
    /// Grid points rendered and scored.
    pub evaluated: u64,
    /// Passes in each render (2–4).
    pub passes_per_point: usize,
    /// Wall-clock duration of the whole sweep.
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// Time spent in `resample` across all points.
    #[serde(with = "duration_serde")]
    pub render_duration: Duration,
    /// Time spent reading back and scoring across all points.
    #[serde(with = "duration_serde")]
    pub compare_duration: Duration,
}

impl SweepDiagnostics {
    /// Mean time per grid point, or zero if nothing was evaluated.
    #[must_use]
    pub fn mean_point_duration(&self) -> Duration {
        u32::try_from(self.evaluated)
            .ok()
            .filter(|&n| n > 0)
            .map_or(Duration::ZERO, |n| self.total_duration / n)
    }

    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let total_ms = duration_ms(self.total_duration);
        let pct = |d: Duration| {
            if total_ms > 0.0 {
                duration_ms(d) / total_ms * 100.0
            } else {
                0.0
            }
        };

        let mut lines = Vec::new();
        lines.push(format!("Sweep Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Backend: {}  |  Points: {}  |  Passes/point: {}",
            self.backend, self.evaluated, self.passes_per_point,
        ));
        lines.push(format!("Total duration: {total_ms:.3}ms"));
        lines.push(String::new());
        lines.push(format!("{:<24} {:>10} {:>10}", "Phase", "Duration", "% Total"));
        lines.push("-".repeat(48));
        for (name, d) in [("Render", self.render_duration), ("Compare", self.compare_duration)] {
            lines.push(format!("{name:<24} {:>8.3}ms {:>9.1}%", duration_ms(d), pct(d)));
        }
        lines.push(format!(
            "{:<24} {:>8.3}ms",
            "Mean per point",
            duration_ms(self.mean_point_duration()),
        ));
        lines.join("\n")
    }
}

fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}
