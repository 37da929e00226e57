use abstutil::Timer;
use anyhow::Result;
use ndarray::{s, Array1, Array2, Array3};
use rand::rngs::StdRng;
use rand::SeedableRng;

use argoverse::{load_hardest, City, FileID, ObjectID, ObjectType};

use crate::sampler::{ClassBalancer, HardMiner, Provenance};
use crate::{cache, DatasetConfig, Norm, ProcessedData, Split};

/// Everything about one scene, as handed to the collator.
#[derive(Clone, Debug)]
pub struct SceneItem {
    /// The scene actually returned, which may differ from the requested one
    pub scene: usize,
    pub provenance: Provenance,
    /// `[agents, obs_len, 2]`
    pub obs: Array3<f32>,
    /// `[agents, future_len, 2]`; empty for the test split
    pub pred: Array3<f32>,
    pub obs_rel: Array3<f32>,
    pub pred_rel: Array3<f32>,
    pub non_linear: Array1<f32>,
    pub loss_mask: Array2<f32>,
    pub id_frame: Array3<f64>,
    pub object_class: Vec<ObjectType>,
    pub object_id: Vec<ObjectID>,
    pub city: City,
    pub map_origin: [f64; 2],
    pub seq_id: FileID,
    pub norm: Norm,
    pub orientation: f64,
    /// `[points_per_centerline, 2]`, global frame
    pub oracle_centerline: Array2<f64>,
    /// `[max_centerlines, points_per_centerline, 2]`, global frame
    pub candidate_centerlines: Array3<f64>,
}

impl SceneItem {
    pub fn num_agents(&self) -> usize {
        self.obs.dim().0
    }

    /// The AGENT's row within this scene.
    pub fn reference_row(&self) -> Option<usize> {
        self.object_class
            .iter()
            .position(|c| *c == ObjectType::Agent)
    }
}

/// One split of processed scenes, plus the policies that resample them during training.
pub struct TrajectoryDataset {
    cfg: DatasetConfig,
    data: ProcessedData,
    rng: StdRng,
    class_balance: Option<ClassBalancer>,
    hard_mining: Option<HardMiner>,
}

impl TrajectoryDataset {
    /// Loads the split from its cache, building the cache from raw logs first if requested.
    pub fn new(cfg: DatasetConfig, timer: &mut Timer) -> Result<Self> {
        cfg.validate()?;
        let mut data = load_or_build(&cfg, timer)?;

        if let Some(fraction) = cfg.extra_data_train {
            if cfg.hard_mining.is_none() && cfg.split != Split::Test {
                data = merge_extra_data(&cfg, data, fraction, timer)?;
            }
        }

        let mut hard_mining = None;
        if let Some(probability) = cfg.hard_mining {
            let path = cfg
                .hard_mining_ranking
                .clone()
                .ok_or_else(|| anyhow!("hard_mining needs hard_mining_ranking"))?;
            if !path.exists() {
                bail!("Hard mining ranking {} doesn't exist", path.display());
            }
            let hardest = load_hardest(&path, cfg.percentage_hardest)?;
            if let Some(bad) = hardest.iter().find(|idx| **idx >= data.num_scenes()) {
                bail!(
                    "{} refers to scene {bad}, but there are only {}",
                    path.display(),
                    data.num_scenes()
                );
            }
            hard_mining = Some(HardMiner::new(probability, cfg.batch_size, hardest));
        }

        Self::assemble(cfg, data, hard_mining)
    }

    /// Wraps already processed data, skipping the cache entirely.
    pub fn from_processed(cfg: DatasetConfig, data: ProcessedData) -> Result<Self> {
        cfg.validate()?;
        if cfg.hard_mining.is_some() {
            bail!("Hard mining needs a ranking file; use TrajectoryDataset::new");
        }
        Self::assemble(cfg, data, None)
    }

    fn assemble(
        cfg: DatasetConfig,
        data: ProcessedData,
        hard_mining: Option<HardMiner>,
    ) -> Result<Self> {
        if data.track_len() != cfg.window_len() {
            bail!(
                "Tracks have {} timesteps, but the {} split needs {}",
                data.track_len(),
                cfg.split.name(),
                cfg.window_len()
            );
        }
        let rng = match cfg.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };

        // Merged data would mix labels from two splits
        let class_balance = match cfg.class_balance {
            Some(fraction) if cfg.extra_data_train.is_none() => {
                let (straight, curved) = data.scenes_by_linearity();
                info!(
                    "Class balance over {} straight and {} curved scenes",
                    straight.len(),
                    curved.len()
                );
                Some(ClassBalancer::new(fraction, cfg.batch_size, straight, curved))
            }
            _ => None,
        };

        Ok(Self {
            cfg,
            data,
            rng,
            class_balance,
            hard_mining,
        })
    }

    pub fn config(&self) -> &DatasetConfig {
        &self.cfg
    }

    pub fn data(&self) -> &ProcessedData {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.num_scenes()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hardest_scenes(&self) -> Option<&[usize]> {
        self.hard_mining.as_ref().map(|m| m.hardest())
    }

    /// Retrieves a scene, possibly substituting it with another one when training with class
    /// balance or hard mining.
    pub fn get(&mut self, index: usize) -> Result<SceneItem> {
        if index >= self.len() {
            bail!("Scene {index} requested, but there are only {}", self.len());
        }
        let mut scene = index;
        let mut provenance = Provenance::Standard;
        if self.cfg.is_training() {
            if let Some(ref mut balancer) = self.class_balance {
                let curved = self
                    .data
                    .reference_row(index)
                    .map(|row| self.data.non_linear[row] > 0.5)
                    .unwrap_or(false);
                scene = balancer.resample(index, curved, &mut self.rng);
            }
            if let Some(ref mut miner) = self.hard_mining {
                let (idx, p) = miner.resample(scene, &mut self.rng);
                scene = idx;
                provenance = p;
            }
        }
        let mut item = self.scene(scene)?;
        item.provenance = provenance;
        Ok(item)
    }

    /// Retrieves exactly the requested scene, without resampling.
    pub fn scene(&self, scene: usize) -> Result<SceneItem> {
        if scene >= self.len() {
            bail!("Scene {scene} requested, but there are only {}", self.len());
        }
        let rows = self.data.scene_range(scene);
        let obs_len = self.cfg.obs_len;
        let d = &self.data;
        let item = SceneItem {
            scene,
            provenance: Provenance::Standard,
            obs: d.abs.slice(s![rows.clone(), ..obs_len, ..]).to_owned(),
            pred: d.abs.slice(s![rows.clone(), obs_len.., ..]).to_owned(),
            obs_rel: d.rel.slice(s![rows.clone(), ..obs_len, ..]).to_owned(),
            pred_rel: d.rel.slice(s![rows.clone(), obs_len.., ..]).to_owned(),
            non_linear: d.non_linear.slice(s![rows.clone()]).to_owned(),
            loss_mask: d.loss_mask.slice(s![rows.clone(), ..]).to_owned(),
            id_frame: d.id_frame.slice(s![rows.clone(), .., ..]).to_owned(),
            object_class: d.object_class[rows.clone()].to_vec(),
            object_id: d.object_id[rows].to_vec(),
            city: d.city[scene],
            map_origin: [d.map_origin[[scene, 0]], d.map_origin[[scene, 1]]],
            seq_id: d.seq_id[scene],
            norm: d.norm,
            orientation: d.orientation[scene],
            oracle_centerline: d.oracle_centerline.slice(s![scene, .., ..]).to_owned(),
            candidate_centerlines: d
                .candidate_centerlines
                .slice(s![scene, .., .., ..])
                .to_owned(),
        };
        if item.num_agents() < crate::aggregate::MIN_AGENTS_PER_SCENE {
            bail!("Scene {scene} only has {} agents", item.num_agents());
        }
        Ok(item)
    }
}

fn load_or_build(cfg: &DatasetConfig, timer: &mut Timer) -> Result<ProcessedData> {
    if cfg.preprocess_data && !cache::exists(cfg) {
        timer.start(format!("preprocess the {} split", cfg.split.name()));
        let data = ProcessedData::build(cfg, timer)?;
        timer.stop(format!("preprocess the {} split", cfg.split.name()));
        if cfg.save_data {
            cache::save(&data, cfg)?;
        }
        return Ok(data);
    }
    if !cache::exists(cfg) {
        bail!(
            "No cache at {}; set preprocess_data to build it",
            cfg.cache_dir().display()
        );
    }
    cache::load(cfg, timer)
}

/// Moves part of the val split into train. Train gets the first `fraction` of the val scenes
/// appended, while val keeps the rest.
fn merge_extra_data(
    cfg: &DatasetConfig,
    data: ProcessedData,
    fraction: f64,
    timer: &mut Timer,
) -> Result<ProcessedData> {
    let val_cfg = cfg.for_split(Split::Val);
    let val = if cfg.split == Split::Val {
        data.clone()
    } else {
        load_or_build(&val_cfg, timer)?
    };
    let n = val.num_scenes();
    match cfg.split {
        Split::Train => {
            let take = (fraction * n as f64).floor() as usize;
            info!("Adding {take} of {n} val scenes to train");
            if take == 0 {
                return Ok(data);
            }
            data.concat(&val.slice_scenes(0..take)?)
        }
        Split::Val => {
            let skip = ((fraction * n as f64).ceil() as usize).min(n);
            info!("Keeping the last {} of {n} val scenes", n - skip);
            if skip == n {
                bail!("extra_data_train {fraction} leaves no val scenes");
            }
            val.slice_scenes(skip..n)
        }
        Split::Test => Ok(data),
    }
}
