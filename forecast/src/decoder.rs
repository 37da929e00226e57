use anyhow::Result;
use ndarray::{s, Array2, Array3, Array4, ArrayView2};

use dataset::Batch;

/// How far a scene's confidences may sum away from 1.
pub const CONFIDENCE_TOLERANCE: f64 = 1e-5;

/// K candidate futures for the reference agent of every scene in a batch.
#[derive(Clone, Debug, PartialEq)]
pub struct Prediction {
    /// `[scenes, K, pred_len, 2]` relative displacements
    pub modes: Array4<f32>,
    /// `[scenes, K]`
    pub confidences: Array2<f32>,
}

impl Prediction {
    pub fn num_scenes(&self) -> usize {
        self.modes.dim().0
    }

    pub fn num_modes(&self) -> usize {
        self.modes.dim().1
    }

    pub fn pred_len(&self) -> usize {
        self.modes.dim().2
    }

    /// Checks shapes and that every scene's confidences form a distribution. Never renormalizes;
    /// a bad distribution means the decoder is broken.
    pub fn validate(&self) -> Result<()> {
        let (scenes, k, _, coords) = self.modes.dim();
        if coords != 2 {
            bail!("Modes have {coords} coordinates per step, not 2");
        }
        if k == 0 {
            bail!("Prediction has no modes");
        }
        if self.confidences.dim() != (scenes, k) {
            bail!(
                "Confidences are {:?}, but modes need ({scenes}, {k})",
                self.confidences.dim()
            );
        }
        validate_confidences(self.confidences.view())
    }

    /// Every mode of one scene as positions, accumulated from `start`. `[K, pred_len, 2]`
    pub fn abs_modes(&self, scene: usize, start: [f32; 2]) -> Array3<f32> {
        let (_, k, pred_len, _) = self.modes.dim();
        let mut out = Array3::zeros((k, pred_len, 2));
        for mode in 0..k {
            out.slice_mut(s![mode, .., ..]).assign(&relative_to_abs(
                self.modes.slice(s![scene, mode, .., ..]),
                start,
            ));
        }
        out
    }
}

/// Each row of `[scenes, K]` must be finite, non-negative, and sum to 1.
pub fn validate_confidences(confidences: ArrayView2<f32>) -> Result<()> {
    for (scene, row) in confidences.outer_iter().enumerate() {
        if let Some(c) = row.iter().find(|c| !c.is_finite() || **c < 0.0) {
            bail!("Scene {scene} has confidence {c}");
        }
        let sum: f64 = row.iter().map(|c| *c as f64).sum();
        if (sum - 1.0).abs() > CONFIDENCE_TOLERANCE {
            bail!("Confidences of scene {scene} sum to {sum}, not 1: {row}");
        }
    }
    Ok(())
}

/// Turns `[T, 2]` displacements into positions, starting from `start`.
pub fn relative_to_abs(rel: ArrayView2<f32>, start: [f32; 2]) -> Array2<f32> {
    let mut out = Array2::zeros(rel.raw_dim());
    let mut pos = start;
    for (t, step) in rel.outer_iter().enumerate() {
        pos[0] += step[0];
        pos[1] += step[1];
        out[[t, 0]] = pos[0];
        out[[t, 1]] = pos[1];
    }
    out
}

/// Anything that forecasts multi-modal futures from a batch.
pub trait MultiModalDecoder {
    /// `agent_rows` has one row per scene of the batch, naming the agent to forecast.
    fn predict(&self, batch: &Batch, agent_rows: &[usize]) -> Result<Prediction>;
}

/// Extends the last observed displacement of each agent, fanned out over a range of headings.
#[derive(Clone, Debug)]
pub struct ConstantVelocity {
    pub num_modes: usize,
    pub pred_len: usize,
    /// Radians between the leftmost and rightmost mode
    pub spread: f64,
}

impl ConstantVelocity {
    pub fn new(num_modes: usize, pred_len: usize) -> Self {
        Self {
            num_modes,
            pred_len,
            spread: std::f64::consts::FRAC_PI_4,
        }
    }

    fn yaw_offset(&self, mode: usize) -> f64 {
        if self.num_modes <= 1 {
            return 0.0;
        }
        -self.spread / 2.0 + self.spread * (mode as f64) / ((self.num_modes - 1) as f64)
    }
}

impl MultiModalDecoder for ConstantVelocity {
    fn predict(&self, batch: &Batch, agent_rows: &[usize]) -> Result<Prediction> {
        if self.num_modes == 0 {
            bail!("ConstantVelocity needs at least one mode");
        }
        if agent_rows.len() != batch.num_scenes() {
            bail!(
                "Got {} agent rows for {} scenes",
                agent_rows.len(),
                batch.num_scenes()
            );
        }
        let obs_len = batch.obs_len();
        if obs_len == 0 {
            bail!("Can't extrapolate without observations");
        }

        let scenes = agent_rows.len();
        let mut modes = Array4::zeros((scenes, self.num_modes, self.pred_len, 2));
        for (scene, row) in agent_rows.iter().enumerate() {
            if *row >= batch.num_agents() {
                bail!("Scene {scene} points at agent row {row} of {}", batch.num_agents());
            }
            let dx = batch.obs_traj_rel[[obs_len - 1, *row, 0]] as f64;
            let dy = batch.obs_traj_rel[[obs_len - 1, *row, 1]] as f64;
            for mode in 0..self.num_modes {
                let (sin, cos) = self.yaw_offset(mode).sin_cos();
                let step = [(dx * cos - dy * sin) as f32, (dx * sin + dy * cos) as f32];
                for t in 0..self.pred_len {
                    modes[[scene, mode, t, 0]] = step[0];
                    modes[[scene, mode, t, 1]] = step[1];
                }
            }
        }
        let confidences = Array2::from_elem((scenes, self.num_modes), 1.0 / self.num_modes as f32);
        Ok(Prediction { modes, confidences })
    }
}
