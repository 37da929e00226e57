use abstutil::Timer;
use anyhow::Result;
use ndarray::{s, Array3, Axis};
use serde::{Deserialize, Serialize};

use argoverse::FileID;
use dataset::{Batch, BatchIter};

use crate::losses::{l2_loss, L2Mode};
use crate::metrics::{best_of_k, Metrics, MetricsAccumulator};
use crate::MultiModalDecoder;

/// The best-of-K error of one scene.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SceneError {
    /// Position of the scene in the dataset
    pub index: usize,
    pub seq_id: FileID,
    pub ade: f64,
    pub fde: f64,
}

pub struct Evaluation {
    pub metrics: Metrics,
    pub scenes: Vec<SceneError>,
}

/// Forecasts the AGENT of every scene in the batch and scores the closest mode.
pub fn evaluate_batch(
    decoder: &dyn MultiModalDecoder,
    batch: &Batch,
    acc: &mut MetricsAccumulator,
    scenes: &mut Vec<SceneError>,
) -> Result<()> {
    let (obs_len, pred_len) = (batch.obs_len(), batch.pred_len());
    if pred_len == 0 {
        bail!("Batch has no future to score against");
    }
    if obs_len == 0 {
        bail!("Batch has no observations");
    }
    let rows = batch.reference_rows();
    let prediction = decoder.predict(batch, &rows)?;
    prediction.validate()?;
    if prediction.num_scenes() != rows.len() || prediction.pred_len() != pred_len {
        bail!(
            "Decoder predicted {} scenes of {} steps, but the batch has {} of {pred_len}",
            prediction.num_scenes(),
            prediction.pred_len(),
            rows.len()
        );
    }

    let mut best_abs = Array3::zeros((pred_len, rows.len(), 2));
    let mut best_rel = Array3::zeros((pred_len, rows.len(), 2));
    for (scene, row) in rows.iter().cloned().enumerate() {
        let start = [
            batch.obs_traj[[obs_len - 1, row, 0]],
            batch.obs_traj[[obs_len - 1, row, 1]],
        ];
        let modes = prediction.abs_modes(scene, start);
        let (best, ade_sum, fde) =
            best_of_k(modes.view(), batch.pred_traj_gt.slice(s![.., row, ..]))?;
        acc.add_trajectory(ade_sum, fde, batch.non_linear[row] > 0.5);
        best_abs
            .slice_mut(s![.., scene, ..])
            .assign(&modes.slice(s![best, .., ..]));
        best_rel
            .slice_mut(s![.., scene, ..])
            .assign(&prediction.modes.slice(s![scene, best, .., ..]));

        scenes.push(SceneError {
            index: batch.scene_index[scene],
            seq_id: batch.seq_id[scene],
            ade: ade_sum / pred_len as f64,
            fde,
        });
    }

    let agent_mask = batch.loss_mask.select(Axis(0), &rows);
    let mask = agent_mask.slice(s![.., obs_len..]);
    let abs = l2_loss(
        best_abs.view(),
        batch.pred_traj_gt.select(Axis(1), &rows).view(),
        mask,
        L2Mode::Sum,
    )?;
    let rel = l2_loss(
        best_rel.view(),
        batch.pred_traj_gt_rel.select(Axis(1), &rows).view(),
        mask,
        L2Mode::Sum,
    )?;
    acc.add_l2(abs.total() as f64, rel.total() as f64, mask.len());
    Ok(())
}

/// Runs one full pass over the batches.
pub fn evaluate(
    decoder: &dyn MultiModalDecoder,
    batches: &mut BatchIter,
    timer: &mut Timer,
) -> Result<Evaluation> {
    let mut acc = MetricsAccumulator::new();
    let mut scenes = Vec::new();
    let mut pred_len = 0;

    batches.reset();
    timer.start_iter("evaluate batches", batches.num_batches());
    while let Some(batch) = batches.next_batch()? {
        timer.next();
        pred_len = batch.pred_len();
        evaluate_batch(decoder, &batch, &mut acc, &mut scenes)?;
    }
    if scenes.is_empty() {
        bail!("Nothing to evaluate");
    }

    let metrics = acc.finish(pred_len);
    info!(
        "ADE {:.3}, FDE {:.3} over {} scenes (non-linear ADE {:.3})",
        metrics.ade, metrics.fde, metrics.num_trajectories, metrics.ade_nl
    );
    Ok(Evaluation { metrics, scenes })
}
