use anyhow::{bail, Result};
use tracing::debug;

use super::{check_index, DatasetRef, LazyMapDataset};
use crate::record::Record;

/// Interleaves several datasets so that each contributes in proportion to
/// its weight.
///
/// Selection is deterministic: the `k`-th draw of a dataset with weight `w`
/// is scheduled at time `(k + 0.5) / w`, and the mix visits draws in time
/// order, ties going to the lower index. Weights are normalized to their sum;
/// zero-weight datasets are never selected.
///
/// With `stop_on_empty_dataset`, the mix ends where the first dataset runs
/// out, so no record repeats. Otherwise exhausted datasets wrap around and
/// the mix has as many elements as all inputs together.
///
/// Positions are resolved on demand, so building a mix over very large
/// inputs costs nothing.
pub struct MixedDataset {
    parents: Vec<DatasetRef>,
    schedule: Schedule,
    len: usize,
}

impl MixedDataset {
    pub fn new(parents: Vec<DatasetRef>, proportions: &[f64], stop_on_empty_dataset: bool) -> Self {
        assert_eq!(
            parents.len(),
            proportions.len(),
            "Number of datasets must match number of proportions"
        );

        let weights = normalize(proportions);
        let sizes: Vec<usize> = parents.iter().map(|p| p.len()).collect();
        let schedule = Schedule::new(weights, sizes);
        let len = schedule.len(stop_on_empty_dataset);

        debug!(
            num_datasets = parents.len(),
            len,
            stop_on_empty_dataset,
            "Created mixed dataset"
        );

        Self {
            parents,
            schedule,
            len,
        }
    }

    /// Which dataset, and which element of it, sits at `index`.
    pub fn source_of(&self, index: usize) -> Option<(usize, usize)> {
        if index >= self.len {
            return None;
        }
        let (dataset, draw) = self.schedule.locate(index)?;
        Some((dataset, draw % self.schedule.sizes[dataset]))
    }
}

impl LazyMapDataset for MixedDataset {
    fn len(&self) -> usize {
        self.len
    }

    fn get(&self, index: usize) -> Result<Option<Record>> {
        check_index(index, self.len)?;
        let Some((dataset, sample)) = self.source_of(index) else {
            bail!("no dataset is scheduled at mixed index {index}");
        };
        self.parents[dataset].get(sample)
    }
}

fn normalize(weights: &[f64]) -> Vec<f64> {
    let sum: f64 = weights.iter().sum();
    if sum <= 0.0 {
        return vec![0.0; weights.len()];
    }
    weights.iter().map(|w| w / sum).collect()
}

/// Draw order of a weighted mix. Draws are ordered by `(time, dataset)`.
struct Schedule {
    weights: Vec<f64>,
    sizes: Vec<usize>,
    selectable: Vec<usize>,
}

impl Schedule {
    fn new(weights: Vec<f64>, sizes: Vec<usize>) -> Self {
        let selectable = weights
            .iter()
            .zip(&sizes)
            .enumerate()
            .filter(|(_, (&w, &size))| w > 0.0 && size > 0)
            .map(|(i, _)| i)
            .collect();
        Self {
            weights,
            sizes,
            selectable,
        }
    }

    fn len(&self, stop_on_empty_dataset: bool) -> usize {
        if !stop_on_empty_dataset {
            return self
                .selectable
                .iter()
                .fold(0usize, |total, &i| total.saturating_add(self.sizes[i]));
        }

        // a weighted dataset that is empty from the start ends the mix at once
        let starts_exhausted = self
            .weights
            .iter()
            .zip(&self.sizes)
            .any(|(&w, &size)| w > 0.0 && size == 0);
        if starts_exhausted {
            return 0;
        }

        // the mix ends at the first draw past the end of its dataset
        self.selectable
            .iter()
            .map(|&i| self.rank(i, self.sizes[i]))
            .min()
            .unwrap_or(0)
    }

    fn time(&self, dataset: usize, draw: usize) -> f64 {
        (draw as f64 + 0.5) / self.weights[dataset]
    }

    /// Number of draws of `dataset` ordered before `(time, other)`.
    fn draws_before(&self, dataset: usize, time: f64, other: usize) -> usize {
        let before = |draw: usize| {
            let t = self.time(dataset, draw);
            t < time || (t == time && dataset < other)
        };
        // `as` saturates, so a huge estimate clamps to usize::MAX
        let mut count = (time * self.weights[dataset] - 0.5).max(0.0).floor() as usize;
        while count > 0 && !before(count - 1) {
            count -= 1;
        }
        while count < usize::MAX && before(count) {
            count += 1;
        }
        count
    }

    /// Position of the `draw`-th draw of `dataset` in the mix.
    fn rank(&self, dataset: usize, draw: usize) -> usize {
        let time = self.time(dataset, draw);
        self.selectable
            .iter()
            .filter(|&&other| other != dataset)
            .fold(draw, |total, &other| {
                total.saturating_add(self.draws_before(other, time, dataset))
            })
    }

    /// The `(dataset, draw)` pair at `position`.
    fn locate(&self, position: usize) -> Option<(usize, usize)> {
        self.selectable.iter().find_map(|&dataset| {
            // first draw ranked past `position`; rank(draw) >= draw bounds it
            let (mut lo, mut hi) = (0usize, position.saturating_add(1));
            while lo < hi {
                let mid = lo + (hi - lo) / 2;
                if self.rank(dataset, mid) > position {
                    hi = mid;
                } else {
                    lo = mid + 1;
                }
            }
            let draw = lo.checked_sub(1)?;
            (self.rank(dataset, draw) == position).then_some((dataset, draw))
        })
    }
}
