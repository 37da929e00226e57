use anyhow::Result;
use ndarray::{s, ArrayView2, ArrayView3};
use serde::{Deserialize, Serialize};

/// Displacement errors over a set of forecasts. ADE is meaned over every step of every
/// trajectory, FDE over trajectories. The linear and non-linear variants are 0 when no
/// trajectory of that kind was seen.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub ade: f64,
    pub fde: f64,
    pub ade_l: f64,
    pub fde_l: f64,
    pub ade_nl: f64,
    pub fde_nl: f64,
    pub l2_loss_abs: f64,
    pub l2_loss_rel: f64,
    pub num_trajectories: usize,
}

impl Metrics {
    pub fn entries(&self) -> Vec<(&'static str, f64)> {
        vec![
            ("ade", self.ade),
            ("fde", self.fde),
            ("ade_l", self.ade_l),
            ("fde_l", self.fde_l),
            ("ade_nl", self.ade_nl),
            ("fde_nl", self.fde_nl),
            ("l2_loss_abs", self.l2_loss_abs),
            ("l2_loss_rel", self.l2_loss_rel),
        ]
    }
}

/// Sum of the Euclidean distance at every step of two `[T, 2]` tracks.
pub fn displacement_error(pred: ArrayView2<f32>, gt: ArrayView2<f32>) -> f64 {
    pred.outer_iter()
        .zip(gt.outer_iter())
        .map(|(p, g)| distance(p[0], p[1], g[0], g[1]))
        .sum()
}

/// Distance between the last steps of two `[T, 2]` tracks.
pub fn final_displacement_error(pred: ArrayView2<f32>, gt: ArrayView2<f32>) -> f64 {
    let steps = pred.nrows();
    if steps == 0 {
        return 0.0;
    }
    distance(
        pred[[steps - 1, 0]],
        pred[[steps - 1, 1]],
        gt[[steps - 1, 0]],
        gt[[steps - 1, 1]],
    )
}

fn distance(x1: f32, y1: f32, x2: f32, y2: f32) -> f64 {
    (x1 as f64 - x2 as f64).hypot(y1 as f64 - y2 as f64)
}

/// The mode of `[K, T, 2]` closest to `gt` by summed displacement. Returns the mode, its summed
/// displacement, and its final displacement.
pub fn best_of_k(modes: ArrayView3<f32>, gt: ArrayView2<f32>) -> Result<(usize, f64, f64)> {
    let (k, steps, _) = modes.dim();
    if gt.dim() != (steps, 2) {
        bail!("Ground truth is {:?}, but modes have {steps} steps", gt.dim());
    }
    let mut best: Option<(usize, f64, f64)> = None;
    for mode in 0..k {
        let track = modes.slice(s![mode, .., ..]);
        let ade = displacement_error(track, gt);
        if best.map(|(_, x, _)| ade < x).unwrap_or(true) {
            best = Some((mode, ade, final_displacement_error(track, gt)));
        }
    }
    best.ok_or_else(|| anyhow!("No modes to choose from"))
}

/// Running sums for `Metrics`.
#[derive(Clone, Debug, Default)]
pub struct MetricsAccumulator {
    ade: f64,
    fde: f64,
    ade_l: f64,
    fde_l: f64,
    ade_nl: f64,
    fde_nl: f64,
    total: usize,
    total_l: usize,
    total_nl: usize,
    l2_abs: f64,
    l2_rel: f64,
    mask_entries: usize,
}

impl MetricsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// One trajectory's summed displacement and final displacement.
    pub fn add_trajectory(&mut self, ade_sum: f64, fde: f64, non_linear: bool) {
        self.ade += ade_sum;
        self.fde += fde;
        self.total += 1;
        if non_linear {
            self.ade_nl += ade_sum;
            self.fde_nl += fde;
            self.total_nl += 1;
        } else {
            self.ade_l += ade_sum;
            self.fde_l += fde;
            self.total_l += 1;
        }
    }

    /// Masked squared errors, and how many mask entries they cover.
    pub fn add_l2(&mut self, abs: f64, rel: f64, mask_entries: usize) {
        self.l2_abs += abs;
        self.l2_rel += rel;
        self.mask_entries += mask_entries;
    }

    pub fn num_trajectories(&self) -> usize {
        self.total
    }

    pub fn finish(&self, pred_len: usize) -> Metrics {
        let per_step = |sum: f64, n: usize| {
            if n == 0 || pred_len == 0 {
                0.0
            } else {
                sum / (n * pred_len) as f64
            }
        };
        let per_traj = |sum: f64, n: usize| if n == 0 { 0.0 } else { sum / n as f64 };
        Metrics {
            ade: per_step(self.ade, self.total),
            fde: per_traj(self.fde, self.total),
            ade_l: per_step(self.ade_l, self.total_l),
            fde_l: per_traj(self.fde_l, self.total_l),
            ade_nl: per_step(self.ade_nl, self.total_nl),
            fde_nl: per_traj(self.fde_nl, self.total_nl),
            l2_loss_abs: per_traj(self.l2_abs, self.mask_entries),
            l2_loss_rel: per_traj(self.l2_rel, self.mask_entries),
            num_trajectories: self.total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array3};

    #[test]
    fn displacement() {
        let gt = array![[0.0, 0.0], [0.0, 1.0], [0.0, 2.0]];
        let pred = array![[0.0, 0.0], [3.0, 5.0], [0.0, 5.0]];
        assert_eq!(displacement_error(pred.view(), gt.view()), 8.0);
        assert_eq!(final_displacement_error(pred.view(), gt.view()), 3.0);
    }

    #[test]
    fn picks_closest_mode() {
        let gt = array![[1.0, 0.0], [2.0, 0.0]];
        let mut modes = Array3::zeros((3, 2, 2));
        modes.slice_mut(s![1, .., ..]).assign(&gt);
        modes[[2, 1, 0]] = 2.0;
        let (mode, ade, fde) = best_of_k(modes.view(), gt.view()).unwrap();
        assert_eq!((mode, ade, fde), (1, 0.0, 0.0));

        assert!(best_of_k(Array3::zeros((0, 2, 2)).view(), gt.view()).is_err());
    }

    #[test]
    fn averaging() {
        let mut acc = MetricsAccumulator::new();
        acc.add_trajectory(6.0, 4.0, false);
        acc.add_trajectory(12.0, 2.0, false);
        let m = acc.finish(3);
        assert_eq!(m.ade, 3.0);
        assert_eq!(m.fde, 3.0);
        assert_eq!(m.ade_l, 3.0);
        // Nothing curved yet
        assert_eq!(m.ade_nl, 0.0);
        assert_eq!(m.fde_nl, 0.0);

        acc.add_trajectory(30.0, 12.0, true);
        acc.add_l2(9.0, 3.0, 6);
        let m = acc.finish(3);
        assert_eq!(m.ade, 48.0 / 9.0);
        assert_eq!(m.fde, 6.0);
        assert_eq!(m.ade_nl, 10.0);
        assert_eq!(m.fde_nl, 12.0);
        assert_eq!(m.l2_loss_abs, 1.5);
        assert_eq!(m.l2_loss_rel, 0.5);
        assert_eq!(m.num_trajectories, 3);
    }
}
