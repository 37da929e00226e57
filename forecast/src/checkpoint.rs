use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::{LossBreakdown, Metrics};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Counters {
    /// Iterations
    pub t: usize,
    pub epoch: usize,
}

/// Training progress, with the model and optimizer state when there is one.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub counters: Counters,
    pub losses: BTreeMap<String, Vec<f64>>,
    pub losses_ts: Vec<usize>,
    pub metrics_train: BTreeMap<String, Vec<f64>>,
    pub metrics_val: BTreeMap<String, Vec<f64>>,
    pub sample_ts: Vec<usize>,
    /// The iteration with the lowest validation ADE so far
    pub best_t: Option<usize>,
    /// Likewise for non-linear ADE
    pub best_t_nl: Option<usize>,
    pub weights: Option<Vec<f32>>,
    pub optimizer: Option<Vec<f32>>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Improvement {
    pub ade: bool,
    pub ade_nl: bool,
}

impl Improvement {
    pub fn any(self) -> bool {
        self.ade || self.ade_nl
    }
}

impl Checkpoint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_losses(&mut self, losses: &LossBreakdown) {
        for (key, value) in [
            ("ade", losses.ade),
            ("fde", losses.fde),
            ("nll", losses.nll),
            ("total", losses.total),
        ] {
            self.losses
                .entry(key.to_string())
                .or_default()
                .push(value as f64);
        }
        self.losses_ts.push(self.counters.t);
    }

    /// Appends both sets of metrics at the current iteration. A validation ADE no worse than
    /// every earlier one moves `best_t` here; the same goes for non-linear ADE and `best_t_nl`.
    pub fn record_metrics(&mut self, train: &Metrics, val: &Metrics) -> Improvement {
        let improvement = Improvement {
            ade: is_best(self.metrics_val.get("ade"), val.ade),
            ade_nl: is_best(self.metrics_val.get("ade_nl"), val.ade_nl),
        };
        for (key, value) in train.entries() {
            self.metrics_train
                .entry(key.to_string())
                .or_default()
                .push(value);
        }
        for (key, value) in val.entries() {
            self.metrics_val
                .entry(key.to_string())
                .or_default()
                .push(value);
        }
        self.sample_ts.push(self.counters.t);

        if improvement.ade {
            self.best_t = Some(self.counters.t);
        }
        if improvement.ade_nl {
            self.best_t_nl = Some(self.counters.t);
        }
        improvement
    }

    pub fn without_model(&self) -> Self {
        Self {
            weights: None,
            optimizer: None,
            ..self.clone()
        }
    }

    /// Writes `<name>_with_model.json` and `<name>_no_model.json` to `dir`.
    pub fn save<P: AsRef<Path>>(&self, dir: P, name: &str) -> Result<(PathBuf, PathBuf)> {
        let dir = dir.as_ref();
        fs_err::create_dir_all(dir)?;
        let with_model = dir.join(format!("{name}_with_model.json"));
        fs_err::write(&with_model, serde_json::to_string_pretty(self)?)?;
        let no_model = dir.join(format!("{name}_no_model.json"));
        fs_err::write(&no_model, serde_json::to_string_pretty(&self.without_model())?)?;
        info!(
            "Saved checkpoint at iteration {} to {}",
            self.counters.t,
            with_model.display()
        );
        Ok((with_model, no_model))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs_err::read_to_string(path)?;
        serde_json::from_str(&contents).map_err(|err| anyhow!("{}: {err}", path.display()))
    }
}

fn is_best(history: Option<&Vec<f64>>, value: f64) -> bool {
    match history {
        Some(history) => history.iter().all(|x| value <= *x),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(ade: f64, ade_nl: f64) -> Metrics {
        Metrics {
            ade,
            ade_nl,
            ..Default::default()
        }
    }

    #[test]
    fn tracks_best_iterations() {
        let mut ckpt = Checkpoint::new();
        let train = metrics(1.0, 1.0);

        ckpt.counters.t = 100;
        assert!(ckpt.record_metrics(&train, &metrics(2.0, 3.0)).any());
        ckpt.counters.t = 200;
        let better = ckpt.record_metrics(&train, &metrics(1.5, 3.5));
        assert_eq!(
            better,
            Improvement {
                ade: true,
                ade_nl: false
            }
        );
        ckpt.counters.t = 300;
        assert!(!ckpt.record_metrics(&train, &metrics(1.6, 3.1)).any());

        assert_eq!(ckpt.best_t, Some(200));
        assert_eq!(ckpt.best_t_nl, Some(100));
        assert_eq!(ckpt.metrics_val["ade"], vec![2.0, 1.5, 1.6]);
        assert_eq!(ckpt.sample_ts, vec![100, 200, 300]);
    }

    #[test]
    fn saved_twice() {
        let dir = tempfile::tempdir().unwrap();
        let mut ckpt = Checkpoint::new();
        ckpt.counters = Counters { t: 42, epoch: 3 };
        ckpt.record_losses(&LossBreakdown {
            ade: 1.0,
            fde: 2.0,
            nll: 0.5,
            total: 6.75,
        });
        ckpt.weights = Some(vec![0.1, 0.2]);
        ckpt.optimizer = Some(vec![0.3]);

        let (with_model, no_model) = ckpt.save(dir.path(), "checkpoint").unwrap();
        assert!(with_model.ends_with("checkpoint_with_model.json"));
        assert_eq!(Checkpoint::load(&with_model).unwrap(), ckpt);

        let light = Checkpoint::load(&no_model).unwrap();
        assert_eq!(light.weights, None);
        assert_eq!(light.optimizer, None);
        assert_eq!(light.counters, ckpt.counters);
        assert_eq!(light.losses["total"], vec![6.75]);
    }
}
