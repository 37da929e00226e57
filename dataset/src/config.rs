use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Val,
    /// Only the observed part of each scene is available
    Test,
}

impl Split {
    pub fn name(self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Val => "val",
            Split::Test => "test",
        }
    }
}

impl std::str::FromStr for Split {
    type Err = anyhow::Error;

    fn from_str(x: &str) -> Result<Self> {
        match x {
            "train" => Ok(Split::Train),
            "val" => Ok(Split::Val),
            "test" => Ok(Split::Test),
            _ => bail!("Unknown split {x}"),
        }
    }
}

/// What map information accompanies each scene in a batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhysicalContext {
    Dummy,
    /// An occupancy raster of the candidate centerlines around the scene origin
    Visual,
    /// The final point of each candidate centerline
    Goals,
    PlausibleCenterlines,
    /// Only the most plausible centerline
    Oracle,
}

impl std::str::FromStr for PhysicalContext {
    type Err = anyhow::Error;

    fn from_str(x: &str) -> Result<Self> {
        match x {
            "dummy" | "social" => Ok(PhysicalContext::Dummy),
            "visual" => Ok(PhysicalContext::Visual),
            "goals" => Ok(PhysicalContext::Goals),
            "plausible_centerlines" => Ok(PhysicalContext::PlausibleCenterlines),
            "oracle" => Ok(PhysicalContext::Oracle),
            _ => bail!("Unknown physical context {x}"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseConfig {
    /// Probability each agent gets noise added to its observed positions.
    pub prob: f64,
    pub mean: f64,
    pub std: f64,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            prob: 0.8,
            mean: 0.0,
            std: 0.25,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LinearityConfig {
    /// Points further than this from the fitted line (in meters) are outliers.
    pub residual_threshold: f64,
    /// A trajectory with a larger fraction of outliers is non-linear.
    pub max_outlier_fraction: f64,
    pub max_trials: usize,
    pub seed: u64,
}

impl Default for LinearityConfig {
    fn default() -> Self {
        Self {
            residual_threshold: 2.0,
            max_outlier_fraction: 0.1,
            max_trials: 100,
            seed: 0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RasterConfig {
    /// The raster covers [-dist_around, dist_around] meters on both axes.
    pub dist_around: f64,
    pub pixels: usize,
}

impl Default for RasterConfig {
    fn default() -> Self {
        Self {
            dist_around: 40.0,
            pixels: 64,
        }
    }
}

/// Everything that controls how one split is windowed, cached, sampled and collated. Built once
/// and passed to every stage.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// Contains one directory per split, each with `data/` (or `data.zip`) holding the logs
    pub root: PathBuf,
    pub obs_len: usize,
    pub pred_len: usize,
    pub split: Split,
    pub split_percentage: f64,
    pub start_from_percentage: f64,
    pub batch_size: usize,
    pub shuffle: bool,
    /// Maximum fraction of straight scenes per batch
    pub class_balance: Option<f64>,
    /// 1-based index of the AGENT observation used as the scene origin
    pub obs_origin: usize,
    pub data_augmentation: bool,
    pub apply_rotation: bool,
    pub physical_context: PhysicalContext,
    /// Fraction of the val split to move into train
    pub extra_data_train: Option<f64>,
    /// Probability of substituting a scene with one of the hardest scenes
    pub hard_mining: Option<f64>,
    pub hard_mining_ranking: Option<PathBuf>,
    pub percentage_hardest: f64,
    /// Build the cache from raw logs if it doesn't exist yet
    pub preprocess_data: bool,
    pub save_data: bool,
    pub seed: Option<u64>,
    pub noise: NoiseConfig,
    pub linearity: LinearityConfig,
    pub max_centerlines: usize,
    pub points_per_centerline: usize,
    pub raster: RasterConfig,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data/datasets/argoverse/motion-forecasting"),
            obs_len: 20,
            pred_len: 30,
            split: Split::Train,
            split_percentage: 0.1,
            start_from_percentage: 0.0,
            batch_size: 16,
            shuffle: true,
            class_balance: None,
            obs_origin: 1,
            data_augmentation: false,
            apply_rotation: false,
            physical_context: PhysicalContext::Dummy,
            extra_data_train: None,
            hard_mining: None,
            hard_mining_ranking: None,
            percentage_hardest: 0.05,
            preprocess_data: false,
            save_data: false,
            seed: None,
            noise: NoiseConfig::default(),
            linearity: LinearityConfig::default(),
            max_centerlines: 6,
            points_per_centerline: 40,
            raster: RasterConfig::default(),
        }
    }
}

impl DatasetConfig {
    /// Reads a TOML file. Missing fields keep their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs_err::read_to_string(path)?;
        let cfg: Self =
            toml::from_str(&raw).map_err(|err| anyhow!("{}: {err}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.obs_len < 2 {
            bail!("obs_len must be at least 2 to know a heading, not {}", self.obs_len);
        }
        if self.pred_len == 0 {
            bail!("pred_len must be positive");
        }
        if self.obs_origin == 0 || self.obs_origin > self.obs_len {
            bail!(
                "obs_origin {} must be within the {} observations",
                self.obs_origin,
                self.obs_len
            );
        }
        if self.batch_size == 0 {
            bail!("batch_size must be positive");
        }
        for (name, value) in [
            ("split_percentage", Some(self.split_percentage)),
            ("start_from_percentage", Some(self.start_from_percentage)),
            ("percentage_hardest", Some(self.percentage_hardest)),
            ("class_balance", self.class_balance),
            ("extra_data_train", self.extra_data_train),
            ("hard_mining", self.hard_mining),
            ("noise.prob", Some(self.noise.prob)),
            ("linearity.max_outlier_fraction", Some(self.linearity.max_outlier_fraction)),
        ] {
            if let Some(x) = value {
                if !(0.0..=1.0).contains(&x) {
                    bail!("{name} must be in [0, 1], not {x}");
                }
            }
        }
        if self.noise.std < 0.0 {
            bail!("noise.std can't be negative");
        }
        if self.linearity.residual_threshold <= 0.0 || self.linearity.max_trials == 0 {
            bail!("linearity needs a positive residual_threshold and max_trials");
        }
        // Both policies substitute accesses within the same per-batch run
        if self.class_balance.is_some() && self.hard_mining.is_some() {
            bail!("class_balance and hard_mining can't be combined");
        }
        if self.hard_mining.is_some() {
            if self.hard_mining_ranking.is_none() {
                bail!("hard_mining needs hard_mining_ranking");
            }
            // Ranking indices refer to rows of the full split
            if self.split_percentage != 1.0 {
                bail!("hard_mining needs split_percentage = 1.0");
            }
        }
        if self.max_centerlines == 0 || self.points_per_centerline < 2 {
            bail!("Need at least one centerline with two points");
        }
        if self.raster.pixels == 0 || self.raster.dist_around <= 0.0 {
            bail!("raster needs positive pixels and dist_around");
        }
        Ok(())
    }

    pub fn seq_len(&self) -> usize {
        self.obs_len + self.pred_len
    }

    /// How many timesteps each retained track must have in this split.
    pub fn window_len(&self) -> usize {
        if self.split == Split::Test {
            self.obs_len
        } else {
            self.seq_len()
        }
    }

    /// Future timesteps actually present in this split.
    pub fn future_len(&self) -> usize {
        self.window_len() - self.obs_len
    }

    /// A copy of this config describing another split.
    pub fn for_split(&self, split: Split) -> Self {
        Self {
            split,
            ..self.clone()
        }
    }

    /// The directory or zip archive holding the raw logs of this split.
    pub fn logs_path(&self) -> PathBuf {
        let dir = self.root.join(self.split.name()).join("data");
        if dir.is_dir() {
            return dir;
        }
        let archive = self.root.join(self.split.name()).join("data.zip");
        if archive.exists() {
            return archive;
        }
        dir
    }

    pub fn centerlines_dir(&self) -> PathBuf {
        self.root.join(self.split.name()).join("centerlines")
    }

    /// Caches are keyed purely by split name and split percentage.
    pub fn cache_dir(&self) -> PathBuf {
        self.root.join(self.split.name()).join(format!(
            "data_processed_{}_percent",
            // Truncated, so 15.5% shares a cache with 15%
            (self.split_percentage * 100.0) as usize
        ))
    }

    /// True if resampling and augmentation apply.
    pub fn is_training(&self) -> bool {
        self.split == Split::Train
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml() {
        let cfg: DatasetConfig = toml::from_str(
            r#"
root = "/tmp/argo"
split = "val"
split_percentage = 1.0
physical_context = "plausible_centerlines"

[noise]
std = 0.5
"#,
        )
        .unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.split, Split::Val);
        assert_eq!(cfg.obs_len, 20);
        assert_eq!(cfg.noise.std, 0.5);
        assert_eq!(cfg.noise.prob, 0.8);
        assert_eq!(cfg.physical_context, PhysicalContext::PlausibleCenterlines);
        assert_eq!(
            cfg.cache_dir(),
            PathBuf::from("/tmp/argo/val/data_processed_100_percent")
        );
        assert_eq!(cfg.window_len(), 50);
        assert_eq!(cfg.for_split(Split::Test).window_len(), 20);
    }

    #[test]
    fn cache_dir_truncates_percentage() {
        let cfg = DatasetConfig {
            root: PathBuf::from("/tmp/argo"),
            split_percentage: 0.155,
            ..Default::default()
        };
        assert_eq!(
            cfg.cache_dir(),
            PathBuf::from("/tmp/argo/train/data_processed_15_percent")
        );
        let cfg = DatasetConfig {
            split_percentage: 0.05,
            ..cfg
        };
        assert!(cfg.cache_dir().ends_with("data_processed_5_percent"));
    }

    #[test]
    fn conflicting_policies() {
        let cfg = DatasetConfig {
            class_balance: Some(0.7),
            hard_mining: Some(0.2),
            hard_mining_ranking: Some(PathBuf::from("ranking.csv")),
            split_percentage: 1.0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = DatasetConfig {
            hard_mining: Some(0.2),
            split_percentage: 1.0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = DatasetConfig {
            obs_origin: 21,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }
}
