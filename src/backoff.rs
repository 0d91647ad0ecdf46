use std::time::Duration;

use rand::Rng;

use crate::config::ReconnectConfig;

const FACTOR: u32 = 2;

/// Exponential reconnection delay with symmetric jitter, compatible with the
/// Socket.IO client's schedule.
#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    jitter: f64,
    attempts: u32,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration, jitter: f64) -> Self {
        Backoff {
            min,
            max,
            jitter: jitter.clamp(0.0, 1.0),
            attempts: 0,
        }
    }

    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self::new(
            Duration::from_millis(config.delay_ms),
            Duration::from_millis(config.delay_max_ms),
            config.randomization_factor,
        )
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn next_delay(&mut self) -> Duration {
        let sample = rand::thread_rng().gen::<f64>();
        self.next_delay_with(sample)
    }

    /// `sample` must be in `[0, 1)`; it picks both the size and the sign of
    /// the jitter.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn next_delay_with(&mut self, sample: f64) -> Duration {
        let exponent = self.attempts.min(20);
        self.attempts = self.attempts.saturating_add(1);

        let base = self.min.as_millis() as f64 * f64::from(FACTOR.pow(exponent));
        let mut ms = base;
        if self.jitter > 0.0 {
            let deviation = (sample * self.jitter * base).floor();
            if ((sample * 10.0).floor() as u64) & 1 == 0 {
                ms -= deviation;
            } else {
                ms += deviation;
            }
        }
        let capped = ms.min(self.max.as_millis() as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }
}
