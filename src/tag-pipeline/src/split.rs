use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::error::{Error, Result};

/// Seed used when the config does not pin one, so splits are reproducible.
pub const DEFAULT_SPLIT_SEED: u64 = 42;

/// Named dataset partitions and the share of images each one receives.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitPlan {
    names: Vec<String>,
    fractions: Vec<f64>,
    seed: u64,
}

impl SplitPlan {
    pub fn new(names: Vec<String>, fractions: Vec<f64>, seed: u64) -> Result<Self> {
        if names.is_empty() {
            return Err(Error::InvalidSplit("no split names given".to_owned()));
        }
        if names.len() != fractions.len() {
            return Err(Error::InvalidSplit(format!(
                "{} split names but {} fractions",
                names.len(),
                fractions.len()
            )));
        }
        for (i, name) in names.iter().enumerate() {
            if names[..i].contains(name) {
                return Err(Error::InvalidSplit(format!("split '{}' listed twice", name)));
            }
        }
        if fractions.iter().any(|f| !f.is_finite() || *f <= 0.0) {
            return Err(Error::InvalidSplit(
                "every split fraction must be positive".to_owned(),
            ));
        }
        let total: f64 = fractions.iter().sum();
        if (total - 1.0).abs() > 1e-6 {
            return Err(Error::InvalidSplit(format!(
                "split fractions sum to {}, expected 1",
                total
            )));
        }

        Ok(SplitPlan {
            names,
            fractions,
            seed,
        })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn fractions(&self) -> &[f64] {
        &self.fractions
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Indices where each split after the first begins, for `len` items.
    pub fn boundaries(&self, len: usize) -> Vec<usize> {
        let mut cumulative = 0.0;
        let mut bounds = Vec::with_capacity(self.fractions.len().saturating_sub(1));

        for fraction in &self.fractions[..self.fractions.len() - 1] {
            cumulative += fraction;
            let idx = (cumulative * len as f64).round() as usize;
            bounds.push(idx.min(len));
        }

        bounds
    }

    /// Shuffle `items` with the plan's seed and cut them into the named
    /// splits, in plan order.
    pub fn partition<T>(&self, mut items: Vec<T>) -> Vec<(String, Vec<T>)> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        items.shuffle(&mut rng);

        let bounds = self.boundaries(items.len());
        let mut parts = Vec::with_capacity(self.names.len());
        let mut rest = items;
        let mut taken = 0;

        for (name, bound) in self.names.iter().zip(bounds) {
            let tail = rest.split_off(bound.saturating_sub(taken).min(rest.len()));
            taken += rest.len();
            parts.push((name.clone(), rest));
            rest = tail;
        }
        if let Some(last) = self.names.last() {
            parts.push((last.clone(), rest));
        }

        parts
    }
}
