//! The boundary between the dataset and a forecasting model: what a multi-modal decoder must
//! produce, how it's scored and trained against, and how training progress is kept.

#[macro_use]
extern crate anyhow;
#[macro_use]
extern crate log;

mod checkpoint;
mod decoder;
mod evaluate;
pub mod losses;
pub mod metrics;
mod ranking;

pub use checkpoint::{Checkpoint, Counters, Improvement};
pub use decoder::{
    relative_to_abs, validate_confidences, ConstantVelocity, MultiModalDecoder, Prediction,
    CONFIDENCE_TOLERANCE,
};
pub use evaluate::{evaluate, evaluate_batch, Evaluation, SceneError};
pub use losses::{forecast_loss, LossBreakdown, LossType, LossWeights};
pub use metrics::{Metrics, MetricsAccumulator};
pub use ranking::{save_ranking, write_ranking};
