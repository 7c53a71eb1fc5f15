use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Fraction of the current chunk that has been sent, clamped to `[0, 1]`.
pub fn chunk_fraction(sent: u64, chunk_len: u64) -> f64 {
    if chunk_len == 0 {
        return 1.0;
    }
    (sent as f64 / chunk_len as f64).clamp(0.0, 1.0)
}

/// Overall upload fraction: `(completed + current) / total`, clamped to `[0, 1]`.
pub fn overall_fraction(completed_chunks: u32, current_fraction: f64, total_chunks: u32) -> f64 {
    if total_chunks == 0 {
        return 1.0;
    }
    ((f64::from(completed_chunks) + current_fraction) / f64::from(total_chunks)).clamp(0.0, 1.0)
}

// ---------------------------------------------------------------------------
// SpeedCalculator
// ---------------------------------------------------------------------------

/// Transfer rate over a trailing time window.
///
/// Keeps `(instant, cumulative bytes)` points and divides the bytes moved
/// between the oldest and newest point by the time between them.
pub struct SpeedCalculator {
    inner: Mutex<Meter>,
}

struct Meter {
    window: Duration,
    total: u64,
    points: VecDeque<(Instant, u64)>,
}

impl Default for SpeedCalculator {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl SpeedCalculator {
    pub fn new(window: Duration) -> Self {
        Self {
            inner: Mutex::new(Meter {
                window,
                total: 0,
                points: VecDeque::new(),
            }),
        }
    }

    /// Records `bytes` more transferred as of now.
    pub fn add_sample(&self, bytes: u64) {
        self.add_sample_at(bytes, Instant::now());
    }

    fn add_sample_at(&self, bytes: u64, at: Instant) {
        let Ok(mut m) = self.inner.lock() else {
            return;
        };
        m.total = m.total.saturating_add(bytes);
        let total = m.total;
        m.points.push_back((at, total));

        // Keep one point at or before the window start as the baseline.
        let window = m.window;
        while m
            .points
            .get(1)
            .is_some_and(|&(t, _)| at.saturating_duration_since(t) >= window)
        {
            m.points.pop_front();
        }
    }

    /// Bytes per second across the window; 0.0 until two points exist.
    pub fn bytes_per_second(&self) -> f64 {
        let Ok(m) = self.inner.lock() else {
            return 0.0;
        };
        let (Some(&(t0, b0)), Some(&(t1, b1))) = (m.points.front(), m.points.back()) else {
            return 0.0;
        };
        let elapsed = t1.saturating_duration_since(t0);
        if elapsed.is_zero() {
            return 0.0;
        }
        (b1 - b0) as f64 / elapsed.as_secs_f64()
    }

    /// Time to move `remaining_bytes` at the current rate, `None` while the rate is zero.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let speed = self.bytes_per_second();
        if speed <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining_bytes as f64 / speed))
    }
}
