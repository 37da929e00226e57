use std::str::FromStr;

use anyhow::Result;
use ndarray::{s, Array1, ArrayView, ArrayView1, ArrayView2, ArrayView3, ArrayView4, Dimension};
use serde::{Deserialize, Serialize};

use crate::decoder::validate_confidences;
use crate::Prediction;

/// How `l2_loss` reduces the per-agent errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum L2Mode {
    Sum,
    /// Divided by the number of mask entries
    Average,
    /// One summed error per agent
    Raw,
}

#[derive(Clone, Debug, PartialEq)]
pub enum L2Loss {
    Scalar(f32),
    PerAgent(Array1<f32>),
}

impl L2Loss {
    pub fn total(&self) -> f32 {
        match self {
            L2Loss::Scalar(x) => *x,
            L2Loss::PerAgent(per_agent) => per_agent.sum(),
        }
    }
}

/// Squared error over `[T, agents, 2]` tracks, masked by `loss_mask` `[agents, T]`.
pub fn l2_loss(
    pred: ArrayView3<f32>,
    gt: ArrayView3<f32>,
    loss_mask: ArrayView2<f32>,
    mode: L2Mode,
) -> Result<L2Loss> {
    if pred.dim() != gt.dim() {
        bail!("Prediction is {:?}, but ground truth is {:?}", pred.dim(), gt.dim());
    }
    let (steps, agents, _) = pred.dim();
    if loss_mask.dim() != (agents, steps) {
        bail!(
            "Loss mask is {:?}, but tracks need ({agents}, {steps})",
            loss_mask.dim()
        );
    }

    let per_agent = Array1::from_iter((0..agents).map(|agent| {
        masked_squared_error(
            pred.slice(s![.., agent, ..]),
            gt.slice(s![.., agent, ..]),
            loss_mask.row(agent),
        )
    }));
    Ok(match mode {
        L2Mode::Sum => L2Loss::Scalar(per_agent.sum()),
        L2Mode::Average => L2Loss::Scalar(per_agent.sum() / loss_mask.len().max(1) as f32),
        L2Mode::Raw => L2Loss::PerAgent(per_agent),
    })
}

/// One agent's `[T, 2]` tracks
fn masked_squared_error(
    pred: ArrayView2<f32>,
    gt: ArrayView2<f32>,
    mask: ArrayView1<f32>,
) -> f32 {
    let mut total = 0.0;
    for ((p, g), m) in pred.outer_iter().zip(gt.outer_iter()).zip(mask.iter()) {
        let dx = p[0] - g[0];
        let dy = p[1] - g[1];
        total += m * (dx * dx + dy * dy);
    }
    total
}

/// Mean of squared differences.
pub fn mse<D: Dimension>(pred: ArrayView<f32, D>, gt: ArrayView<f32, D>) -> Result<f32> {
    if pred.shape() != gt.shape() {
        bail!("Can't compare {:?} with {:?}", pred.shape(), gt.shape());
    }
    if pred.is_empty() {
        return Ok(0.0);
    }
    let total: f32 = pred
        .iter()
        .zip(gt.iter())
        .map(|(p, g)| (p - g) * (p - g))
        .sum();
    Ok(total / pred.len() as f32)
}

/// Negative log-likelihood of `gt` `[scenes, T, 2]` under the mixture of `modes`
/// `[scenes, K, T, 2]` weighted by `confidences` `[scenes, K]`, each mode a unit Gaussian per
/// step. Steps with zero `avails` `[scenes, T]` are ignored. Averaged over scenes.
pub fn neg_multi_log_likelihood(
    gt: ArrayView3<f32>,
    modes: ArrayView4<f32>,
    confidences: ArrayView2<f32>,
    avails: ArrayView2<f32>,
) -> Result<f32> {
    let (scenes, k, steps, _) = modes.dim();
    if gt.dim() != (scenes, steps, 2) {
        bail!(
            "Ground truth is {:?}, but modes need ({scenes}, {steps}, 2)",
            gt.dim()
        );
    }
    if confidences.dim() != (scenes, k) || avails.dim() != (scenes, steps) {
        bail!(
            "Confidences {:?} or availabilities {:?} don't match {scenes} scenes, {k} modes, {steps} steps",
            confidences.dim(),
            avails.dim()
        );
    }
    validate_confidences(confidences)?;
    if scenes == 0 {
        return Ok(0.0);
    }

    let mut total = 0.0;
    for scene in 0..scenes {
        let log_likelihoods: Vec<f64> = (0..k)
            .map(|mode| {
                let error = masked_squared_error(
                    modes.slice(s![scene, mode, .., ..]),
                    gt.slice(s![scene, .., ..]),
                    avails.row(scene),
                ) as f64;
                (confidences[[scene, mode]] as f64).ln() - 0.5 * error
            })
            .collect();
        total -= log_sum_exp(&log_likelihoods);
    }
    Ok((total / scenes as f64) as f32)
}

fn log_sum_exp(xs: &[f64]) -> f64 {
    let max = xs.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return max;
    }
    max + xs.iter().map(|x| (x - max).exp()).sum::<f64>().ln()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LossType {
    Mse,
    Nll,
    MseNll,
}

impl FromStr for LossType {
    type Err = anyhow::Error;

    fn from_str(x: &str) -> Result<Self> {
        match x {
            "mse" => Ok(LossType::Mse),
            "nll" => Ok(LossType::Nll),
            "mse+nll" => Ok(LossType::MseNll),
            _ => bail!("Unknown loss type {x}, expected mse, nll, or mse+nll"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LossWeights {
    pub ade: f32,
    pub fde: f32,
    pub nll: f32,
}

impl Default for LossWeights {
    fn default() -> Self {
        Self {
            ade: 1.0,
            fde: 2.5,
            nll: 1.5,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LossBreakdown {
    pub ade: f32,
    pub fde: f32,
    pub nll: f32,
    pub total: f32,
}

/// Scores a prediction against future displacements `gt_rel` `[scenes, pred_len, 2]`. Every term
/// compares displacements, only at steps where `avails` `[scenes, pred_len]` is set. The
/// squared-error terms use the best mode of each scene.
pub fn forecast_loss(
    loss_type: LossType,
    weights: &LossWeights,
    prediction: &Prediction,
    gt_rel: ArrayView3<f32>,
    avails: ArrayView2<f32>,
) -> Result<LossBreakdown> {
    prediction.validate()?;
    let (scenes, k, steps, _) = prediction.modes.dim();
    if gt_rel.dim() != (scenes, steps, 2) {
        bail!(
            "Ground truth is {:?}, but the prediction needs ({scenes}, {steps}, 2)",
            gt_rel.dim()
        );
    }
    if avails.dim() != (scenes, steps) {
        bail!(
            "Availabilities are {:?}, but the prediction needs ({scenes}, {steps})",
            avails.dim()
        );
    }
    if steps == 0 {
        bail!("Can't score a prediction with no future steps");
    }

    let last = steps - 1;
    let (mut ade_sum, mut fde_sum) = (0.0, 0.0);
    for scene in 0..scenes {
        let gt = gt_rel.slice(s![scene, .., ..]);
        let mask = avails.row(scene);
        let mut best = 0;
        let mut best_error = f32::INFINITY;
        for mode in 0..k {
            let error =
                masked_squared_error(prediction.modes.slice(s![scene, mode, .., ..]), gt, mask);
            if error < best_error {
                best_error = error;
                best = mode;
            }
        }
        ade_sum += best_error;
        fde_sum += masked_squared_error(
            prediction.modes.slice(s![scene, best, last..steps, ..]),
            gt_rel.slice(s![scene, last..steps, ..]),
            avails.slice(s![scene, last..steps]),
        );
    }
    // Mean over the available coordinates
    let per_entry = |sum: f32, steps_available: f32| {
        if steps_available == 0.0 {
            0.0
        } else {
            sum / (2.0 * steps_available)
        }
    };
    let ade = per_entry(ade_sum, avails.sum());
    let fde = per_entry(fde_sum, avails.column(last).sum());
    let nll = neg_multi_log_likelihood(
        gt_rel,
        prediction.modes.view(),
        prediction.confidences.view(),
        avails,
    )?;
    let total = match loss_type {
        LossType::Mse => weights.ade * ade + weights.fde * fde,
        LossType::Nll => nll,
        LossType::MseNll => weights.ade * ade + weights.fde * fde + weights.nll * nll,
    };
    Ok(LossBreakdown {
        ade,
        fde,
        nll,
        total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2, Array3, Array4};

    #[test]
    fn l2_modes() {
        // 2 steps, 2 agents
        let gt = Array3::zeros((2, 2, 2));
        let mut pred = Array3::zeros((2, 2, 2));
        pred[[0, 0, 0]] = 1.0;
        pred[[1, 0, 1]] = 2.0;
        pred[[1, 1, 0]] = 3.0;
        let mut mask = Array2::ones((2, 2));
        // The second agent's error falls outside the mask
        mask[[1, 1]] = 0.0;

        let sum = l2_loss(pred.view(), gt.view(), mask.view(), L2Mode::Sum).unwrap();
        assert_eq!(sum, L2Loss::Scalar(5.0));
        let avg = l2_loss(pred.view(), gt.view(), mask.view(), L2Mode::Average).unwrap();
        assert_eq!(avg, L2Loss::Scalar(1.25));
        let raw = l2_loss(pred.view(), gt.view(), mask.view(), L2Mode::Raw).unwrap();
        assert_eq!(raw, L2Loss::PerAgent(array![5.0, 0.0]));
        assert_eq!(raw.total(), 5.0);

        assert!(l2_loss(pred.view(), gt.view(), mask.t(), L2Mode::Sum).is_ok());
        assert!(l2_loss(pred.view(), gt.view(), Array2::ones((3, 2)).view(), L2Mode::Sum).is_err());
    }

    #[test]
    fn nll_of_confident_exact_mode() {
        let gt = Array3::from_elem((1, 4, 2), 1.0);
        let mut modes = Array4::zeros((1, 2, 4, 2));
        modes.slice_mut(s![0, 0, .., ..]).fill(1.0);
        let avails = Array2::ones((1, 4));

        let nll = neg_multi_log_likelihood(
            gt.view(),
            modes.view(),
            array![[1.0, 0.0]].view(),
            avails.view(),
        )
        .unwrap();
        assert!(nll.abs() < 1e-6);

        // Splitting confidence costs ln 2 when the other mode is hopeless
        modes.slice_mut(s![0, 1, .., ..]).fill(100.0);
        let nll = neg_multi_log_likelihood(
            gt.view(),
            modes.view(),
            array![[0.5, 0.5]].view(),
            avails.view(),
        )
        .unwrap();
        assert!((nll - std::f32::consts::LN_2).abs() < 1e-5);
    }

    #[test]
    fn nll_rejects_bad_confidences() {
        let gt = Array3::zeros((1, 2, 2));
        let modes = Array4::zeros((1, 2, 2, 2));
        let avails = Array2::ones((1, 2));
        assert!(neg_multi_log_likelihood(
            gt.view(),
            modes.view(),
            array![[0.6, 0.6]].view(),
            avails.view()
        )
        .is_err());
    }

    #[test]
    fn hybrid_weights() {
        // One scene, one mode, off by 1 in x on the first displacement only
        let mut modes = Array4::zeros((1, 1, 3, 2));
        modes[[0, 0, 0, 0]] = 1.0;
        let prediction = Prediction {
            modes,
            confidences: array![[1.0]],
        };
        let gt_rel = Array3::zeros((1, 3, 2));
        let avails = Array2::ones((1, 3));
        let weights = LossWeights::default();

        let mse = forecast_loss(LossType::Mse, &weights, &prediction, gt_rel.view(), avails.view())
            .unwrap();
        // Comparing positions would carry the first error to every step. Displacements only
        // differ once, meaned over 6 entries, and the final step is exact.
        assert!((mse.ade - 1.0 / 6.0).abs() < 1e-6);
        assert_eq!(mse.fde, 0.0);
        assert!((mse.nll - 0.5).abs() < 1e-6);
        assert!((mse.total - 1.0 / 6.0).abs() < 1e-6);

        let nll = forecast_loss(LossType::Nll, &weights, &prediction, gt_rel.view(), avails.view())
            .unwrap();
        assert_eq!(nll.total, nll.nll);

        let hybrid = forecast_loss(
            LossType::MseNll,
            &weights,
            &prediction,
            gt_rel.view(),
            avails.view(),
        )
        .unwrap();
        assert!((hybrid.total - (1.0 / 6.0 + 1.5 * 0.5)).abs() < 1e-5);
    }

    #[test]
    fn unavailable_steps_cost_nothing() {
        // Two modes. The confident one is only wrong at the last step, by 3 in y.
        let mut modes = Array4::zeros((1, 2, 3, 2));
        modes[[0, 0, 2, 1]] = 3.0;
        modes.slice_mut(s![0, 1, .., ..]).fill(50.0);
        let prediction = Prediction {
            modes,
            confidences: array![[1.0, 0.0]],
        };
        let gt_rel = Array3::zeros((1, 3, 2));
        let weights = LossWeights::default();

        let all = Array2::ones((1, 3));
        let loss = forecast_loss(LossType::MseNll, &weights, &prediction, gt_rel.view(), all.view())
            .unwrap();
        assert!((loss.ade - 1.5).abs() < 1e-6);
        assert!((loss.fde - 4.5).abs() < 1e-6);
        assert!((loss.nll - 4.5).abs() < 1e-5);

        let partial = array![[1.0, 1.0, 0.0]];
        let loss = forecast_loss(
            LossType::MseNll,
            &weights,
            &prediction,
            gt_rel.view(),
            partial.view(),
        )
        .unwrap();
        assert_eq!(loss.ade, 0.0);
        assert_eq!(loss.fde, 0.0);
        assert!(loss.nll.abs() < 1e-6);
        assert!(loss.total.abs() < 1e-5);

        assert!(forecast_loss(
            LossType::Mse,
            &weights,
            &prediction,
            gt_rel.view(),
            Array2::ones((1, 2)).view()
        )
        .is_err());
    }

    #[test]
    fn parse_loss_type() {
        assert_eq!("mse+nll".parse::<LossType>().unwrap(), LossType::MseNll);
        assert!("l1".parse::<LossType>().is_err());
    }
}
