//! Stochastic sampling primitives used by the [`crate::services::simulator`].
//!
//! Abstracted behind a [`Random`] trait so service tests can swap in a seeded
//! or scripted implementation instead of depending on process-global entropy.

use rand::seq::SliceRandom;
use rand::Rng;
use statrs::distribution::{ContinuousCDF, Normal};

pub trait Random: Send + Sync {
    /// Uniform sample in `[low, high)`.
    fn uniform(&self, low: f64, high: f64) -> f64;

    /// Gaussian sample with the given mean and standard deviation.
    fn gaussian(&self, mean: f64, std_dev: f64) -> f64;

    /// Sample from a normal distribution truncated to `[0, max]`, via
    /// rejection sampling, then clamp as a final safety net — mirroring the
    /// original delay sampler's `max(0.0, min(delay, delay_max))` guard.
    fn truncated_normal(&self, mean: f64, std_dev: f64, max: f64) -> f64;

    /// Choose up to `count` distinct items from `items` without replacement.
    /// Returns all of `items` if `count >= items.len()`. Takes `&[String]`
    /// rather than a generic slice so the trait stays object-safe — this is
    /// the only shape [`crate::services::simulator`] ever needs it for.
    fn sample_without_replacement(&self, items: &[String], count: usize) -> Vec<String>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRandom;

impl Random for SystemRandom {
    fn uniform(&self, low: f64, high: f64) -> f64 {
        let mut rng = rand::thread_rng();
        rng.gen_range(low..high)
    }

    fn gaussian(&self, mean: f64, std_dev: f64) -> f64 {
        if std_dev <= 0.0 {
            return mean;
        }
        let normal = Normal::new(mean, std_dev).expect("valid normal parameters");
        let mut rng = rand::thread_rng();
        sample_normal(&normal, &mut rng)
    }

    fn truncated_normal(&self, mean: f64, std_dev: f64, max: f64) -> f64 {
        if std_dev <= 0.0 {
            return mean.clamp(0.0, max);
        }
        let normal = Normal::new(mean, std_dev).expect("valid normal parameters");
        let mut rng = rand::thread_rng();
        const MAX_ATTEMPTS: u32 = 64;
        for _ in 0..MAX_ATTEMPTS {
            let candidate = sample_normal(&normal, &mut rng);
            if (0.0..=max).contains(&candidate) {
                return candidate;
            }
        }
        // Rejection sampling failed to land in bounds (degenerate parameters);
        // fall back to the same clamp the original sampler used as a safety net.
        sample_normal(&normal, &mut rng).clamp(0.0, max)
    }

    fn sample_without_replacement(&self, items: &[String], count: usize) -> Vec<String> {
        let mut rng = rand::thread_rng();
        let mut picked: Vec<String> = items.to_vec();
        picked.shuffle(&mut rng);
        picked.truncate(count.min(picked.len()));
        picked
    }
}

fn sample_normal(normal: &Normal, rng: &mut impl Rng) -> f64 {
    // Inverse-CDF sampling: draw u ~ Uniform(0,1), return F^-1(u). `statrs`'s
    // Normal doesn't expose a `sample` without the `rand` trait bound
    // mismatch across crate versions, so we invert the CDF directly.
    let u: f64 = rng.gen_range(1e-12..(1.0 - 1e-12));
    normal.inverse_cdf(u)
}
