use std::f64::consts::FRAC_PI_2;

use anyhow::Result;
use ndarray::{s, Array2, Array3, ArrayViewMut3, Axis};
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::context::to_local;
use crate::{NoiseConfig, SceneItem};

/// One scene with its centerlines in the local frame, ready to be augmented.
#[derive(Clone, Debug, PartialEq)]
pub struct LocalScene {
    /// `[agents, obs_len, 2]`
    pub obs: Array3<f32>,
    /// `[agents, future_len, 2]`
    pub pred: Array3<f32>,
    pub obs_rel: Array3<f32>,
    pub pred_rel: Array3<f32>,
    pub map_origin: [f64; 2],
    /// `[max_centerlines, points_per_centerline, 2]`
    pub candidates: Array3<f32>,
    /// `[points_per_centerline, 2]`
    pub oracle: Array2<f32>,
}

impl LocalScene {
    pub fn from_item(item: &SceneItem) -> Self {
        let oracle_global = item.oracle_centerline.view().insert_axis(Axis(0));
        Self {
            obs: item.obs.clone(),
            pred: item.pred.clone(),
            obs_rel: item.obs_rel.clone(),
            pred_rel: item.pred_rel.clone(),
            map_origin: item.map_origin,
            candidates: to_local(item.candidate_centerlines.view(), item.map_origin),
            oracle: to_local(oracle_global, item.map_origin)
                .index_axis_move(Axis(0), 0),
        }
    }

    /// Flips a coin per agent, and adds gaussian noise to every observed position of the chosen
    /// ones. The relative tracks follow, including the first future step. Returns how many agents
    /// were perturbed.
    pub fn add_noise(&mut self, cfg: &NoiseConfig, rng: &mut StdRng) -> Result<usize> {
        let normal = Normal::new(cfg.mean, cfg.std)
            .map_err(|err| anyhow!("bad noise distribution: {err}"))?;
        let mut perturbed = 0;
        for mut agent in self.obs.axis_iter_mut(Axis(0)) {
            if !rng.random_bool(cfg.prob) {
                continue;
            }
            perturbed += 1;
            for x in agent.iter_mut() {
                *x += normal.sample(rng) as f32;
            }
        }
        self.recompute_rel();
        Ok(perturbed)
    }

    /// Rotates every position, the map origin, and the centerlines. Points are row vectors
    /// multiplied by `R(yaw)`, so a positive yaw turns them clockwise.
    pub fn rotate(&mut self, yaw: f64) {
        let (sin, cos) = yaw.sin_cos();
        rotate_points(self.obs.view_mut(), sin, cos);
        rotate_points(self.pred.view_mut(), sin, cos);
        rotate_points(self.candidates.view_mut(), sin, cos);
        rotate_points(self.oracle.view_mut().insert_axis(Axis(0)), sin, cos);
        let [x, y] = self.map_origin;
        self.map_origin = [x * cos + y * sin, -x * sin + y * cos];
        self.recompute_rel();
    }

    /// Rotates the scene so a heading of `orientation` points along +Y. Returns the yaw applied.
    pub fn align_to_y_axis(&mut self, orientation: f64) -> f64 {
        let yaw = alignment_yaw(orientation);
        self.rotate(yaw);
        yaw
    }

    /// Recomputes the relative tracks from the absolute ones. The future continues from the last
    /// observed position.
    pub fn recompute_rel(&mut self) {
        self.obs_rel = relative(&self.obs, None);
        let obs_len = self.obs.dim().1;
        if obs_len > 0 {
            let last = self.obs.slice(s![.., obs_len - 1, ..]).to_owned();
            self.pred_rel = relative(&self.pred, Some(last));
        } else {
            self.pred_rel = relative(&self.pred, None);
        }
    }
}

pub fn alignment_yaw(orientation: f64) -> f64 {
    -(FRAC_PI_2 - orientation)
}

fn rotate_points(mut pts: ArrayViewMut3<f32>, sin: f64, cos: f64) {
    for mut line in pts.axis_iter_mut(Axis(0)) {
        for mut pt in line.axis_iter_mut(Axis(0)) {
            let x = pt[0] as f64;
            let y = pt[1] as f64;
            pt[0] = (x * cos + y * sin) as f32;
            pt[1] = (-x * sin + y * cos) as f32;
        }
    }
}

/// First-order differences along time. The first step is zero, unless a previous position is
/// given for every agent.
fn relative(abs: &Array3<f32>, previous: Option<Array2<f32>>) -> Array3<f32> {
    let (agents, steps, _) = abs.dim();
    let mut rel = Array3::zeros((agents, steps, 2));
    for a in 0..agents {
        for t in 0..steps {
            for d in 0..2 {
                rel[[a, t, d]] = if t > 0 {
                    abs[[a, t, d]] - abs[[a, t - 1, d]]
                } else if let Some(ref prev) = previous {
                    abs[[a, t, d]] - prev[[a, d]]
                } else {
                    0.0
                };
            }
        }
    }
    rel
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;

    fn scene() -> LocalScene {
        let mut obs = Array3::zeros((2, 3, 2));
        let mut pred = Array3::zeros((2, 2, 2));
        for a in 0..2 {
            for t in 0..3 {
                obs[[a, t, 0]] = t as f32 + a as f32;
                obs[[a, t, 1]] = 0.5 * t as f32;
            }
            for t in 0..2 {
                pred[[a, t, 0]] = 3.0 + t as f32 + a as f32;
                pred[[a, t, 1]] = 1.5 + 0.5 * t as f32;
            }
        }
        let mut candidates = Array3::zeros((2, 3, 2));
        candidates[[0, 0, 0]] = 1.0;
        candidates[[0, 1, 0]] = 2.0;
        candidates[[0, 2, 1]] = 4.0;
        let mut scene = LocalScene {
            obs,
            pred,
            obs_rel: Array3::zeros((2, 3, 2)),
            pred_rel: Array3::zeros((2, 2, 2)),
            map_origin: [2500.0, -130.0],
            oracle: candidates.index_axis(Axis(0), 0).to_owned(),
            candidates,
        };
        scene.recompute_rel();
        scene
    }

    fn assert_close(a: &Array3<f32>, b: &Array3<f32>, tolerance: f32) {
        assert_eq!(a.dim(), b.dim());
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < tolerance, "{x} vs {y}");
        }
    }

    #[test]
    fn rotation_round_trip() {
        let original = scene();
        let mut rotated = original.clone();
        rotated.rotate(0.7);
        assert!((rotated.obs[[1, 2, 1]] - original.obs[[1, 2, 1]]).abs() > 0.1);
        rotated.rotate(-0.7);

        assert_close(&rotated.obs, &original.obs, 1e-5);
        assert_close(&rotated.pred, &original.pred, 1e-5);
        assert_close(&rotated.candidates, &original.candidates, 1e-5);
        assert!((rotated.map_origin[0] - original.map_origin[0]).abs() < 1e-6);
        assert!((rotated.map_origin[1] - original.map_origin[1]).abs() < 1e-6);
        // Padding stays exactly zero
        assert_eq!(rotated.candidates[[1, 2, 0]], 0.0);
    }

    #[test]
    fn alignment_points_north() {
        let mut scene = scene();
        let orientation = (0.5f64).atan2(1.0);
        scene.align_to_y_axis(orientation);
        let dx = scene.obs[[0, 2, 0]] - scene.obs[[0, 1, 0]];
        let dy = scene.obs[[0, 2, 1]] - scene.obs[[0, 1, 1]];
        assert!(dx.abs() < 1e-5);
        assert!(dy > 0.0);
        assert_eq!(scene.obs_rel[[0, 0, 0]], 0.0);
        assert!((scene.obs_rel[[0, 2, 1]] - dy).abs() < 1e-6);
    }

    #[test]
    fn noise_recomputes_rel() {
        let mut scene = scene();
        let before = scene.obs.clone();
        let mut rng = StdRng::seed_from_u64(1);
        let cfg = NoiseConfig {
            prob: 1.0,
            ..Default::default()
        };
        assert_eq!(scene.add_noise(&cfg, &mut rng).unwrap(), 2);
        assert!(scene.obs != before);
        assert_eq!(scene.obs_rel[[1, 0, 1]], 0.0);
        let expected = scene.obs[[1, 2, 1]] - scene.obs[[1, 1, 1]];
        assert_eq!(scene.obs_rel[[1, 2, 1]], expected);
        // The future starts from the noisy last observation
        for a in 0..2 {
            for d in 0..2 {
                assert_eq!(scene.pred_rel[[a, 0, d]], scene.pred[[a, 0, d]] - scene.obs[[a, 2, d]]);
                assert_eq!(scene.pred_rel[[a, 1, d]], scene.pred[[a, 1, d]] - scene.pred[[a, 0, d]]);
            }
        }

        let none = NoiseConfig {
            prob: 0.0,
            ..Default::default()
        };
        let mut quiet = self::scene();
        assert_eq!(quiet.add_noise(&none, &mut rng).unwrap(), 0);
        assert_eq!(quiet, self::scene());
    }
}
