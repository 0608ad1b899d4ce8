use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Ring capacity for progress samples.
const MAX_SAMPLES: usize = 100;
/// Samples older than this leave the ring.
const MAX_SAMPLE_AGE: Duration = Duration::from_secs(60 * 60);
/// Trend analysis looks at this much recent history.
const TREND_WINDOW: Duration = Duration::from_secs(300);

/// Exponential smoothing weight on the previous estimate.
const EMA_ALPHA: f64 = 0.7;

/// Remaining-time estimator for one task.
///
/// Linear extrapolation of progress over elapsed time, exponentially
/// smoothed, then scaled by a stage factor (early runs underestimate,
/// late runs hit the finalization tail) and a trend factor comparing the
/// first and second half of a five-minute window. Bounded to
/// `[1, 10 * elapsed]` seconds.
#[derive(Debug)]
pub struct EtaEstimator {
    started: Instant,
    ema_remaining: Option<f64>,
    samples: VecDeque<(Instant, f64)>,
}

impl EtaEstimator {
    pub fn new(started: Instant) -> Self {
        Self {
            started,
            ema_remaining: None,
            samples: VecDeque::new(),
        }
    }

    /// Record a progress sample (0..=100) and produce the current estimate
    /// in seconds. `None` until there is measurable progress.
    pub fn observe(&mut self, progress: f64, now: Instant) -> Option<u64> {
        self.samples.push_back((now, progress));
        while self.samples.len() > MAX_SAMPLES {
            self.samples.pop_front();
        }
        while let Some(&(t, _)) = self.samples.front() {
            if now.duration_since(t) > MAX_SAMPLE_AGE {
                self.samples.pop_front();
            } else {
                break;
            }
        }

        if progress <= 0.0 || progress >= 100.0 {
            return None;
        }
        let elapsed = now.duration_since(self.started).as_secs_f64();
        if elapsed <= 0.0 {
            return None;
        }

        let raw = elapsed * (100.0 - progress) / progress;
        let smoothed = match self.ema_remaining {
            Some(prev) => EMA_ALPHA * prev + (1.0 - EMA_ALPHA) * raw,
            None => raw,
        };
        self.ema_remaining = Some(smoothed);

        let stage_factor = if progress < 25.0 {
            1.2
        } else if progress < 75.0 {
            1.0
        } else {
            1.3
        };

        let estimate = smoothed * stage_factor * self.trend_factor(now);
        let bounded = estimate.clamp(1.0, 10.0 * elapsed);
        Some(bounded.round() as u64)
    }

    /// 0.8 when the recent window is accelerating, 1.25 when decelerating.
    fn trend_factor(&self, now: Instant) -> f64 {
        let window: Vec<&(Instant, f64)> = self
            .samples
            .iter()
            .filter(|(t, _)| now.duration_since(*t) <= TREND_WINDOW)
            .collect();
        if window.len() < 4 {
            return 1.0;
        }

        let mid = window.len() / 2;
        let rate = |slice: &[&(Instant, f64)]| -> Option<f64> {
            let (t0, p0) = *slice.first()?;
            let (t1, p1) = *slice.last()?;
            let dt = t1.duration_since(*t0).as_secs_f64();
            if dt <= 0.0 {
                return None;
            }
            Some((p1 - p0) / dt)
        };

        match (rate(&window[..mid]), rate(&window[mid..])) {
            (Some(first), Some(second)) if first > 0.0 => {
                if second > first * 1.05 {
                    0.8
                } else if second < first * 0.95 {
                    1.25
                } else {
                    1.0
                }
            }
            _ => 1.0,
        }
    }
}
