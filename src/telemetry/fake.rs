//! Fake temperature readings for running without a sensor attached.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Possible changes per sample and their weights (out of 100).
const CHANGES: [(f64, u32); 4] = [(0.0, 80), (0.1, 8), (0.2, 4), (-0.1, 8)];

/// Random walk between `min` and `max`. It moves in its current direction
/// and turns around once it reaches a bound.
#[derive(Debug, Clone)]
pub struct FakeTemperature<R = StdRng> {
    rng: R,
    current: f64,
    min: f64,
    max: f64,
    trending_up: bool,
}

impl FakeTemperature<StdRng> {
    /// Starts at 20.0 and stays around 20.0..=25.0.
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy(), 20.0, 20.0, 25.0)
    }
}

impl Default for FakeTemperature<StdRng> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Rng> FakeTemperature<R> {
    pub fn with_rng(rng: R, start: f64, min: f64, max: f64) -> Self {
        FakeTemperature {
            rng,
            current: start,
            min,
            max,
            trending_up: true,
        }
    }
}

/// Applies the change picked by `roll` (0..100) and returns the new value
/// and direction.
fn step(current: f64, trending_up: bool, roll: u32, min: f64, max: f64) -> (f64, bool) {
    let mut threshold = 0;
    let mut change = 0.0;
    for (candidate, weight) in CHANGES {
        threshold += weight;
        if roll < threshold {
            change = candidate;
            break;
        }
    }

    let next = if trending_up {
        current + change
    } else {
        current - change
    };
    let next = (next * 1000.0).round() / 1000.0;

    let trending_up = if next <= min {
        true
    } else if next >= max {
        false
    } else {
        trending_up
    };
    (next, trending_up)
}

impl<R: Rng> Iterator for FakeTemperature<R> {
    type Item = f64;

    fn next(&mut self) -> Option<f64> {
        let roll = self.rng.gen_range(0..100);
        let (next, trending_up) = step(self.current, self.trending_up, roll, self.min, self.max);
        self.current = next;
        self.trending_up = trending_up;
        Some(next)
    }
}

#[cfg(test)]
#[path = "fake_tests.rs"]
mod tests;
