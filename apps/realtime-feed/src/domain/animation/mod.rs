//! Display Value Animation
//!
//! Ease-out-expo interpolation of a displayed scalar toward a target.
//! Time is passed in explicitly so the animator is a pure state machine;
//! the async frame driver lives in `application::services::animation`.

use std::time::{Duration, Instant};

/// Default animation duration.
pub const DEFAULT_DURATION: Duration = Duration::from_millis(800);

/// `1 - 2^(-10p)` for `p < 1`, exactly `1` at `p >= 1`, `0` at `p <= 0`.
#[must_use]
pub fn ease_out_expo(progress: f64) -> f64 {
    if progress >= 1.0 {
        1.0
    } else if progress <= 0.0 {
        0.0
    } else {
        1.0 - 2f64.powf(-10.0 * progress)
    }
}

/// One in-flight interpolation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnimationTask {
    /// Start value.
    pub from: f64,
    /// Target value.
    pub to: f64,
    /// Start instant.
    pub started_at: Instant,
    /// Total duration.
    pub duration: Duration,
}

impl AnimationTask {
    /// Linear progress in `[0, 1]` at `now`.
    #[must_use]
    pub fn progress(&self, now: Instant) -> f64 {
        if self.duration.is_zero() {
            return 1.0;
        }
        let elapsed = now.saturating_duration_since(self.started_at);
        (elapsed.as_secs_f64() / self.duration.as_secs_f64()).min(1.0)
    }

    /// Interpolated value at `now`; exactly `to` once finished.
    #[must_use]
    pub fn value_at(&self, now: Instant) -> f64 {
        let progress = self.progress(now);
        if progress >= 1.0 {
            return self.to;
        }
        (self.to - self.from).mul_add(ease_out_expo(progress), self.from)
    }

    /// Whether the task has reached its target at `now`.
    #[must_use]
    pub fn is_finished(&self, now: Instant) -> bool {
        self.progress(now) >= 1.0
    }
}

/// Animates one displayed scalar.
///
/// At most one task is owned at a time; starting a new one replaces it.
#[derive(Debug, Clone)]
pub struct ValueAnimator {
    current: f64,
    duration: Duration,
    task: Option<AnimationTask>,
}

impl ValueAnimator {
    /// Create an idle animator showing `initial`.
    #[must_use]
    pub const fn new(initial: f64, duration: Duration) -> Self {
        Self {
            current: initial,
            duration,
            task: None,
        }
    }

    /// Start an explicit `from -> to` animation lasting `duration` at `now`.
    pub const fn animate(&mut self, from: f64, to: f64, duration: Duration, now: Instant) {
        self.current = from;
        self.task = Some(AnimationTask {
            from,
            to,
            started_at: now,
            duration,
        });
    }

    /// Re-target toward `to` over the default duration, starting from the
    /// value displayed at `now`.
    pub fn animate_to(&mut self, to: f64, now: Instant) {
        self.animate_to_over(to, self.duration, now);
    }

    /// Re-target toward `to` over `duration`, starting from the value
    /// displayed at `now`.
    pub fn animate_to_over(&mut self, to: f64, duration: Duration, now: Instant) {
        let from = self.value_at(now);
        self.animate(from, to, duration, now);
    }

    /// Default duration for re-targeting.
    #[must_use]
    pub const fn duration(&self) -> Duration {
        self.duration
    }

    /// Value displayed at `now`, without advancing state.
    #[must_use]
    pub fn value_at(&self, now: Instant) -> f64 {
        self.task.map_or(self.current, |task| task.value_at(now))
    }

    /// Advance to `now`.
    ///
    /// Returns the value to display, or `None` when idle. The frame that
    /// reaches the end returns exactly the target and retires the task.
    pub fn sample(&mut self, now: Instant) -> Option<f64> {
        let task = self.task?;
        let value = task.value_at(now);
        self.current = value;
        if task.is_finished(now) {
            self.task = None;
        }
        Some(value)
    }

    /// Last sampled value.
    #[must_use]
    pub const fn current(&self) -> f64 {
        self.current
    }

    /// Running task, if any.
    #[must_use]
    pub const fn task(&self) -> Option<&AnimationTask> {
        self.task.as_ref()
    }

    /// Whether a task is running.
    #[must_use]
    pub const fn is_animating(&self) -> bool {
        self.task.is_some()
    }

    /// Drop the running task, keeping the last sampled value.
    pub const fn cancel(&mut self) {
        self.task = None;
    }
}

impl Default for ValueAnimator {
    fn default() -> Self {
        Self::new(0.0, DEFAULT_DURATION)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    const FRAME: Duration = Duration::from_millis(16);

    #[test]
    fn easing_endpoints() {
        assert_eq!(ease_out_expo(0.0), 0.0);
        assert_eq!(ease_out_expo(1.0), 1.0);
        assert_eq!(ease_out_expo(2.0), 1.0);
        assert!((ease_out_expo(0.5) - (1.0 - 2f64.powi(-5))).abs() < 1e-12);
    }

    #[test]
    fn animation_ends_exactly_at_target_and_increases() {
        let start = Instant::now();
        let mut animator = ValueAnimator::default();
        animator.animate(0.0, 100.0, DEFAULT_DURATION, start);

        let mut values = vec![];
        let mut now = start;
        while let Some(v) = animator.sample(now) {
            values.push(v);
            now += FRAME;
        }

        assert_eq!(*values.last().unwrap(), 100.0);
        assert!(values.windows(2).all(|w| w[1] >= w[0]));
        assert!(!animator.is_animating());
        assert_eq!(animator.sample(now), None);
    }

    #[test]
    fn retarget_starts_from_interpolated_value() {
        let start = Instant::now();
        let mut animator = ValueAnimator::default();
        animator.animate(0.0, 100.0, DEFAULT_DURATION, start);

        let midpoint = start + Duration::from_millis(400);
        let expected = 100.0 * (1.0 - 2f64.powi(-5));
        animator.animate_to(200.0, midpoint);

        let task = animator.task().unwrap();
        assert!((task.from - expected).abs() < 1e-9);
        assert_eq!(task.to, 200.0);
        assert_eq!(task.started_at, midpoint);
        assert_eq!(animator.value_at(midpoint + DEFAULT_DURATION), 200.0);
    }

    #[test]
    fn per_call_duration_overrides_default() {
        let start = Instant::now();
        let mut animator = ValueAnimator::default();

        animator.animate(0.0, 10.0, Duration::from_millis(200), start);
        assert_eq!(animator.value_at(start + Duration::from_millis(200)), 10.0);

        animator.animate_to_over(50.0, Duration::from_secs(2), start + Duration::from_millis(200));
        let task = animator.task().unwrap();
        assert_eq!(task.from, 10.0);
        assert_eq!(task.duration, Duration::from_secs(2));
        assert!(animator.value_at(start + Duration::from_secs(1)) < 50.0);
        assert_eq!(animator.duration(), DEFAULT_DURATION);
    }

    #[test]
    fn zero_duration_jumps_to_target() {
        let now = Instant::now();
        let mut animator = ValueAnimator::new(5.0, Duration::ZERO);
        animator.animate_to(9.0, now);

        assert_eq!(animator.sample(now), Some(9.0));
        assert!(!animator.is_animating());
    }

    #[test]
    fn idle_animator_reports_current() {
        let animator = ValueAnimator::new(42.0, DEFAULT_DURATION);
        assert_eq!(animator.value_at(Instant::now()), 42.0);
        assert!(animator.task().is_none());
    }

    #[test]
    fn cancel_keeps_last_sample() {
        let start = Instant::now();
        let mut animator = ValueAnimator::default();
        animator.animate(0.0, 100.0, DEFAULT_DURATION, start);
        let v = animator.sample(start + Duration::from_millis(100)).unwrap();

        animator.cancel();

        assert_eq!(animator.current(), v);
        assert_eq!(animator.sample(start + DEFAULT_DURATION), None);
    }

    proptest! {
        #[test]
        fn samples_stay_between_endpoints(from in -1e6f64..1e6, to in -1e6f64..1e6, ms in 0u64..1000) {
            let start = Instant::now();
            let task = AnimationTask { from, to, started_at: start, duration: DEFAULT_DURATION };
            let v = task.value_at(start + Duration::from_millis(ms));
            let (lo, hi) = if from <= to { (from, to) } else { (to, from) };
            prop_assert!(v >= lo - 1e-6 && v <= hi + 1e-6);
        }
    }
}
