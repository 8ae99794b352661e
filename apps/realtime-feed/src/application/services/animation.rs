//! Animated Display Value
//!
//! Runs a [`ValueAnimator`] on its own task, sampling it once per frame and
//! publishing each displayed value through a watch channel. New targets
//! re-target the running animation from the value on screen.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::domain::animation::{DEFAULT_DURATION, ValueAnimator};

/// Default frame interval (~60 fps).
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// Animation timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnimationConfig {
    /// Length of one animation.
    pub duration: Duration,
    /// Time between sampled frames.
    pub frame_interval: Duration,
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            duration: DEFAULT_DURATION,
            frame_interval: DEFAULT_FRAME_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Retarget {
    to: f64,
    duration: Option<Duration>,
}

/// Handle to an animated scalar. Dropping it stops the frame task.
#[derive(Debug)]
pub struct AnimatedValue {
    targets: mpsc::UnboundedSender<Retarget>,
    values: watch::Receiver<f64>,
    cancel: CancellationToken,
}

impl AnimatedValue {
    /// Spawn the frame task showing `initial`.
    ///
    /// Must be called within a Tokio runtime.
    #[must_use]
    pub fn spawn(initial: f64, config: AnimationConfig) -> Self {
        let (targets, target_rx) = mpsc::unbounded_channel();
        let (value_tx, values) = watch::channel(initial);
        let cancel = CancellationToken::new();

        let animator = ValueAnimator::new(initial, config.duration);
        tokio::spawn(drive(
            animator,
            target_rx,
            value_tx,
            config.frame_interval,
            cancel.clone(),
        ));

        Self {
            targets,
            values,
            cancel,
        }
    }

    /// Animate toward `to` from the value currently displayed.
    ///
    /// Returns `false` once the frame task has stopped.
    pub fn set_target(&self, to: f64) -> bool {
        self.targets.send(Retarget { to, duration: None }).is_ok()
    }

    /// Animate toward `to` over `duration` instead of the configured one.
    ///
    /// Returns `false` once the frame task has stopped.
    pub fn set_target_over(&self, to: f64, duration: Duration) -> bool {
        self.targets
            .send(Retarget {
                to,
                duration: Some(duration),
            })
            .is_ok()
    }

    /// Value currently displayed.
    #[must_use]
    pub fn value(&self) -> f64 {
        *self.values.borrow()
    }

    /// Independent receiver of displayed values.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<f64> {
        self.values.clone()
    }

    /// Wait for the next displayed frame.
    ///
    /// Returns `None` once the frame task has stopped.
    pub async fn changed(&mut self) -> Option<f64> {
        self.values.changed().await.ok()?;
        let value = *self.values.borrow_and_update();
        Some(value)
    }

    /// Stop the frame task; the last displayed value stays readable.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for AnimatedValue {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn drive(
    mut animator: ValueAnimator,
    mut targets: mpsc::UnboundedReceiver<Retarget>,
    values: watch::Sender<f64>,
    frame_interval: Duration,
    cancel: CancellationToken,
) {
    let mut frames = tokio::time::interval(frame_interval.max(Duration::from_millis(1)));
    frames.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            target = targets.recv() => {
                let Some(Retarget { to, duration }) = target else { return };
                let duration = duration.unwrap_or_else(|| animator.duration());
                animator.animate_to_over(to, duration, Instant::now().into_std());
            }
            _ = frames.tick(), if animator.is_animating() => {
                if let Some(value) = animator.sample(Instant::now().into_std()) {
                    values.send_replace(value);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn settles_exactly_on_target() {
        let value = AnimatedValue::spawn(0.0, AnimationConfig::default());
        assert!(value.set_target(100.0));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(value.value(), 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn frames_increase_monotonically() {
        let mut value = AnimatedValue::spawn(0.0, AnimationConfig::default());
        value.set_target(100.0);

        let mut frames = Vec::new();
        while let Some(frame) = value.changed().await {
            frames.push(frame);
            if frame == 100.0 {
                break;
            }
        }

        assert!(frames.len() > 10);
        assert!(frames.windows(2).all(|w| w[1] >= w[0]));
        assert_eq!(frames.last().copied(), Some(100.0));
    }

    #[tokio::test(start_paused = true)]
    async fn retarget_starts_from_displayed_value() {
        let value = AnimatedValue::spawn(0.0, AnimationConfig::default());
        value.set_target(100.0);
        tokio::time::sleep(Duration::from_millis(400)).await;
        let midway = value.value();
        assert!(midway > 90.0 && midway < 100.0);

        value.set_target(0.0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(value.value() < midway);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(value.value(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn per_target_duration_is_honoured() {
        let value = AnimatedValue::spawn(0.0, AnimationConfig::default());
        assert!(value.set_target_over(100.0, Duration::from_secs(4)));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(value.value() < 100.0);

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(value.value(), 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_value_ignores_targets() {
        let value = AnimatedValue::spawn(5.0, AnimationConfig::default());
        value.stop();
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert!(!value.set_target(10.0));
        assert_eq!(value.value(), 5.0);
    }
}
