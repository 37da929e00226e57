//! Batch iteration over a dataset.

use anyhow::Result;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::debug::BatchInspector;
use crate::{collate, Batch, TrajectoryDataset};

/// Walks the scenes of a dataset in `batch_size` runs, collating each run. One pass is one epoch;
/// call `reset` to start another.
pub struct BatchIter<'a> {
    dataset: &'a mut TrajectoryDataset,
    indices: Vec<usize>,
    cursor: usize,
    rng: StdRng,
    inspector: Option<Box<dyn BatchInspector + 'a>>,
}

impl<'a> BatchIter<'a> {
    pub fn new(dataset: &'a mut TrajectoryDataset) -> Self {
        let rng = match dataset.config().seed {
            // Distinct from the dataset's own stream
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(1)),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        let mut iter = Self {
            indices: (0..dataset.len()).collect(),
            dataset,
            cursor: 0,
            rng,
            inspector: None,
        };
        iter.reset();
        iter
    }

    /// Every batch is passed to the inspector after collation.
    pub fn with_inspector(mut self, inspector: Box<dyn BatchInspector + 'a>) -> Self {
        self.inspector = Some(inspector);
        self
    }

    /// Starts a new epoch, reshuffling if configured.
    pub fn reset(&mut self) {
        self.cursor = 0;
        if self.dataset.config().shuffle {
            self.indices.shuffle(&mut self.rng);
        }
    }

    pub fn num_batches(&self) -> usize {
        let batch_size = self.dataset.config().batch_size;
        (self.indices.len() + batch_size - 1) / batch_size
    }

    pub fn next_batch(&mut self) -> Result<Option<Batch>> {
        if self.cursor >= self.indices.len() {
            return Ok(None);
        }
        let end = (self.cursor + self.dataset.config().batch_size).min(self.indices.len());
        let mut items = Vec::with_capacity(end - self.cursor);
        for idx in self.indices[self.cursor..end].to_vec() {
            items.push(self.dataset.get(idx)?);
        }
        self.cursor = end;

        let batch = collate(items, self.dataset.config(), &mut self.rng)?;
        if let Some(ref mut inspector) = self.inspector {
            inspector.inspect(&batch)?;
        }
        Ok(Some(batch))
    }
}

impl Iterator for BatchIter<'_> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_batch().transpose()
    }
}
