//! Randomized delays used to humanize timing between actions.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::trace;

use crate::io::clock::Clock;
use crate::io::config::{JitterConfig, JitterMode};

/// Delay generator. Gaussian samples are clamped to `[min, max]`; a `max`
/// below `min` is raised to `min`.
#[derive(Debug, Clone)]
pub struct Jitter {
    mode: JitterMode,
    min_ms: u64,
    max_ms: u64,
    mean_ms: f64,
    std_dev_ms: f64,
    rng: StdRng,
}

impl Jitter {
    pub fn from_config(cfg: &JitterConfig) -> Self {
        let rng = match cfg.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            mode: cfg.mode,
            min_ms: cfg.min_ms,
            max_ms: cfg.max_ms.max(cfg.min_ms),
            mean_ms: cfg.mean_ms as f64,
            std_dev_ms: cfg.std_dev_ms as f64,
            rng,
        }
    }

    /// No delay at all.
    pub fn none() -> Self {
        Self::from_config(&JitterConfig {
            mode: JitterMode::None,
            seed: Some(0),
            ..JitterConfig::default()
        })
    }

    pub fn uniform(min: Duration, max: Duration, seed: u64) -> Self {
        Self::from_config(&JitterConfig {
            mode: JitterMode::Uniform,
            min_ms: min.as_millis() as u64,
            max_ms: max.as_millis() as u64,
            seed: Some(seed),
            ..JitterConfig::default()
        })
    }

    pub fn next_delay(&mut self) -> Duration {
        let ms = match self.mode {
            JitterMode::None => 0,
            JitterMode::Uniform => self.rng.gen_range(self.min_ms..=self.max_ms),
            JitterMode::Gaussian => self.gaussian_ms(),
        };
        Duration::from_millis(ms)
    }

    /// Sleep for one sampled delay and return it.
    pub fn pause(&mut self, clock: &dyn Clock) -> Duration {
        let delay = self.next_delay();
        trace!(delay_ms = delay.as_millis() as u64, "jitter pause");
        clock.sleep(delay);
        delay
    }

    // Box-Muller transform over two uniform samples.
    fn gaussian_ms(&mut self) -> u64 {
        let u1: f64 = self.rng.gen_range(f64::EPSILON..1.0);
        let u2: f64 = self.rng.gen_range(0.0..1.0);
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        let sample = self.mean_ms + z * self.std_dev_ms;
        sample.round().clamp(self.min_ms as f64, self.max_ms as f64) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_never_delays() {
        let mut jitter = Jitter::none();
        for _ in 0..10 {
            assert_eq!(jitter.next_delay(), Duration::ZERO);
        }
    }

    #[test]
    fn uniform_stays_within_bounds_and_is_seeded() {
        let min = Duration::from_millis(40);
        let max = Duration::from_millis(90);
        let mut a = Jitter::uniform(min, max, 42);
        let mut b = Jitter::uniform(min, max, 42);
        for _ in 0..200 {
            let delay = a.next_delay();
            assert!(delay >= min && delay <= max, "{delay:?} out of range");
            assert_eq!(delay, b.next_delay());
        }
    }

    #[test]
    fn inverted_bounds_collapse_to_min() {
        let min = Duration::from_millis(90);
        let mut jitter = Jitter::uniform(min, Duration::from_millis(40), 3);
        for _ in 0..20 {
            assert_eq!(jitter.next_delay(), min);
        }
    }

    #[test]
    fn gaussian_is_clamped() {
        let mut jitter = Jitter::from_config(&JitterConfig {
            mode: JitterMode::Gaussian,
            min_ms: 100,
            max_ms: 120,
            mean_ms: 110,
            std_dev_ms: 500,
            seed: Some(7),
        });
        for _ in 0..200 {
            let ms = jitter.next_delay().as_millis();
            assert!((100..=120).contains(&ms), "{ms} out of range");
        }
    }
}
