//! Policies that substitute the requested scene with another one while training.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;

/// An endless stream of indices. Each pass visits every index once in a random order, then the
/// pool is reshuffled.
#[derive(Clone, Debug)]
pub struct IndexPool {
    indices: Vec<usize>,
    remaining: Vec<usize>,
    reshuffles: usize,
}

impl IndexPool {
    pub fn new(indices: Vec<usize>) -> Self {
        Self {
            indices,
            remaining: Vec::new(),
            reshuffles: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Only None if the pool has no indices at all.
    pub fn draw(&mut self, rng: &mut StdRng) -> Option<usize> {
        if self.remaining.is_empty() {
            if self.indices.is_empty() {
                return None;
            }
            self.remaining = self.indices.clone();
            self.remaining.shuffle(rng);
            self.reshuffles += 1;
        }
        self.remaining.pop()
    }

    /// How many passes have started.
    pub fn reshuffles(&self) -> usize {
        self.reshuffles
    }
}

/// Caps the number of straight scenes in every batch-sized run of accesses. Once the quota of
/// straight scenes is reached, the rest of the run is filled with curved ones.
pub struct ClassBalancer {
    batch_size: usize,
    straight_quota: usize,
    straight: IndexPool,
    curved: IndexPool,
    accesses: usize,
    straight_in_batch: usize,
}

impl ClassBalancer {
    /// `fraction` is the maximum share of straight scenes per batch.
    pub fn new(fraction: f64, batch_size: usize, straight: Vec<usize>, curved: Vec<usize>) -> Self {
        if straight.is_empty() || curved.is_empty() {
            warn!(
                "Class balance has {} straight and {} curved scenes; the empty class can't be sampled",
                straight.len(),
                curved.len()
            );
        }
        Self {
            batch_size,
            straight_quota: (fraction * batch_size as f64).floor() as usize,
            straight: IndexPool::new(straight),
            curved: IndexPool::new(curved),
            accesses: 0,
            straight_in_batch: 0,
        }
    }

    /// Returns the scene to use instead of the requested one.
    pub fn resample(&mut self, requested: usize, curved: bool, rng: &mut StdRng) -> usize {
        if self.accesses % self.batch_size == 0 {
            self.straight_in_batch = 0;
        }
        self.accesses += 1;

        let want_straight = !curved && self.straight_in_batch < self.straight_quota;
        let (first, second) = if want_straight {
            (&mut self.straight, &mut self.curved)
        } else {
            (&mut self.curved, &mut self.straight)
        };
        if let Some(idx) = first.draw(rng) {
            if want_straight {
                self.straight_in_batch += 1;
            }
            return idx;
        }
        // Only one class exists, so no balance is possible
        let substitute = second.draw(rng).unwrap_or(requested);
        if !want_straight && self.curved.is_empty() {
            self.straight_in_batch += 1;
        }
        substitute
    }

    pub fn straight_pool(&self) -> &IndexPool {
        &self.straight
    }

    pub fn curved_pool(&self) -> &IndexPool {
        &self.curved
    }
}

/// Whether a scene came from the requested index or was substituted by hard mining.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Provenance {
    Standard,
    HardMining,
}

/// With some probability, swaps the requested scene for one of the hardest scenes. At most
/// `(1 - probability) * batch_size` scenes of each batch-sized run are standard.
pub struct HardMiner {
    probability: f64,
    batch_size: usize,
    standard_quota: usize,
    hardest: Vec<usize>,
    accesses: usize,
    standard_in_batch: usize,
}

impl HardMiner {
    pub fn new(probability: f64, batch_size: usize, hardest: Vec<usize>) -> Self {
        Self {
            probability,
            batch_size,
            standard_quota: ((1.0 - probability) * batch_size as f64).floor() as usize,
            hardest,
            accesses: 0,
            standard_in_batch: 0,
        }
    }

    pub fn hardest(&self) -> &[usize] {
        &self.hardest
    }

    pub fn resample(&mut self, requested: usize, rng: &mut StdRng) -> (usize, Provenance) {
        if self.accesses % self.batch_size == 0 {
            self.standard_in_batch = 0;
        }
        self.accesses += 1;

        let standard = !self.hardest.is_empty()
            && !rng.random_bool(self.probability)
            && self.standard_in_batch < self.standard_quota;
        if standard || self.hardest.is_empty() {
            self.standard_in_batch += 1;
            return (requested, Provenance::Standard);
        }
        let idx = self.hardest[rng.random_range(0..self.hardest.len())];
        (idx, Provenance::HardMining)
    }
}
