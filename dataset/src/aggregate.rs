use std::ops::Range;
use std::path::Path;

use abstutil::{prettyprint_usize, Timer};
use anyhow::Result;
use geom::PolyLine;
use ndarray::{concatenate, s, Array1, Array2, Array3, Array4, Axis};
use serde::{Deserialize, Serialize};

use argoverse::{apply_percentage, load_centerlines, City, FileID, LogSource, ObjectID, ObjectType};

use crate::context::pack_centerlines;
use crate::window::{process_window, SceneWindow};
use crate::DatasetConfig;

/// Every scene needs at least the AV and the AGENT.
pub const MIN_AGENTS_PER_SCENE: usize = 2;

/// Bounds over every coordinate of the aggregated tracks. Computed once when the data is built.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Norm {
    pub abs_min: f32,
    pub abs_max: f32,
    pub rel_min: f32,
    pub rel_max: f32,
}

/// A retained window, plus everything derived from it that gets aggregated.
pub struct ProcessedScene {
    pub window: SceneWindow,
    pub orientation: f64,
    /// `[max_centerlines, points_per_centerline, 2]`, global frame
    pub centerlines: Array3<f64>,
}

/// All retained scenes of a split, flattened so each agent is one row. Per-scene arrays are
/// indexed by scene, and `scene_range` maps a scene to its agent rows.
#[derive(Clone, Debug, PartialEq)]
pub struct ProcessedData {
    /// `[agents, T, 2]`
    pub abs: Array3<f32>,
    /// `[agents, T, 2]`
    pub rel: Array3<f32>,
    /// `[agents, T]`
    pub loss_mask: Array2<f32>,
    /// `[agents]`, 1.0 for non-linear. Always 0 in the test split.
    pub non_linear: Array1<f32>,
    /// `[scenes]`
    pub num_agents: Vec<usize>,
    /// `[agents, T, 3]` holding the timestamp, object ID, and file ID of every observation
    pub id_frame: Array3<f64>,
    pub object_class: Vec<ObjectType>,
    pub object_id: Vec<ObjectID>,
    pub city: Vec<City>,
    /// `[scenes, 2]`
    pub map_origin: Array2<f64>,
    pub seq_id: Vec<FileID>,
    pub norm: Norm,
    /// `[scenes]`, radians
    pub orientation: Array1<f64>,
    /// `[scenes, points_per_centerline, 2]`, global frame
    pub oracle_centerline: Array3<f64>,
    /// `[scenes, max_centerlines, points_per_centerline, 2]`, global frame
    pub candidate_centerlines: Array4<f64>,

    pub(crate) offsets: Vec<usize>,
}

impl ProcessedData {
    /// Flattens retained scenes. The caller guarantees every scene is usable.
    pub fn from_scenes(scenes: Vec<ProcessedScene>, cfg: &DatasetConfig) -> Result<Self> {
        if scenes.is_empty() {
            bail!("No scenes to aggregate");
        }
        let track_len = cfg.window_len();
        let total_agents: usize = scenes.iter().map(|s| s.window.agents.len()).sum();
        let num_scenes = scenes.len();

        let mut abs = Array3::zeros((total_agents, track_len, 2));
        let mut rel = Array3::zeros((total_agents, track_len, 2));
        let mut loss_mask = Array2::zeros((total_agents, track_len));
        let mut non_linear = Array1::zeros(total_agents);
        let mut id_frame = Array3::zeros((total_agents, track_len, 3));
        let mut object_class = Vec::with_capacity(total_agents);
        let mut object_id = Vec::with_capacity(total_agents);
        let mut num_agents = Vec::with_capacity(num_scenes);
        let mut city = Vec::with_capacity(num_scenes);
        let mut map_origin = Array2::zeros((num_scenes, 2));
        let mut seq_id = Vec::with_capacity(num_scenes);
        let mut orientation = Array1::zeros(num_scenes);
        let mut candidate_centerlines = Array4::zeros((
            num_scenes,
            cfg.max_centerlines,
            cfg.points_per_centerline,
            2,
        ));

        let mut row = 0;
        for (scene_idx, scene) in scenes.into_iter().enumerate() {
            let window = scene.window;
            if !window.is_usable(MIN_AGENTS_PER_SCENE) {
                bail!("Scene {} isn't usable", window.file_id);
            }
            for agent in &window.agents {
                if agent.abs.len() != track_len {
                    bail!(
                        "Scene {} has a track of length {}, not {track_len}",
                        window.file_id,
                        agent.abs.len()
                    );
                }
                for t in 0..track_len {
                    abs[[row, t, 0]] = agent.abs[t][0] as f32;
                    abs[[row, t, 1]] = agent.abs[t][1] as f32;
                    rel[[row, t, 0]] = agent.rel[t][0] as f32;
                    rel[[row, t, 1]] = agent.rel[t][1] as f32;
                    loss_mask[[row, t]] = if agent.mask[t] { 1.0 } else { 0.0 };
                    id_frame[[row, t, 0]] = agent.timestamps[t];
                    id_frame[[row, t, 1]] = agent.object.0 as f64;
                    id_frame[[row, t, 2]] = window.file_id.0 as f64;
                }
                non_linear[row] = if agent.non_linear == Some(true) {
                    1.0
                } else {
                    0.0
                };
                object_class.push(agent.class);
                object_id.push(agent.object);
                row += 1;
            }
            num_agents.push(window.agents.len());
            city.push(window.city);
            map_origin[[scene_idx, 0]] = window.map_origin[0];
            map_origin[[scene_idx, 1]] = window.map_origin[1];
            seq_id.push(window.file_id);
            orientation[scene_idx] = scene.orientation;
            if scene.centerlines.dim() != (cfg.max_centerlines, cfg.points_per_centerline, 2) {
                bail!("Scene {} has misshapen centerlines", window.file_id);
            }
            candidate_centerlines
                .slice_mut(s![scene_idx, .., .., ..])
                .assign(&scene.centerlines);
        }

        let oracle_centerline = candidate_centerlines.slice(s![.., 0, .., ..]).to_owned();
        let norm = Norm {
            abs_min: abs.iter().cloned().fold(f32::INFINITY, f32::min),
            abs_max: abs.iter().cloned().fold(f32::NEG_INFINITY, f32::max),
            rel_min: rel.iter().cloned().fold(f32::INFINITY, f32::min),
            rel_max: rel.iter().cloned().fold(f32::NEG_INFINITY, f32::max),
        };

        let mut data = Self {
            abs,
            rel,
            loss_mask,
            non_linear,
            num_agents,
            id_frame,
            object_class,
            object_id,
            city,
            map_origin,
            seq_id,
            norm,
            orientation,
            oracle_centerline,
            candidate_centerlines,
            offsets: Vec::new(),
        };
        data.validate()?;
        Ok(data)
    }

    /// Checks every array agrees on the number of scenes, agents, and timesteps, then rebuilds
    /// the scene offsets. Must be called after assembling the fields by hand.
    pub fn validate(&mut self) -> Result<()> {
        let scenes = self.num_agents.len();
        let agents: usize = self.num_agents.iter().sum();
        let (abs_agents, track_len, abs_dims) = self.abs.dim();
        if abs_agents != agents || abs_dims != 2 {
            bail!(
                "abs has shape {:?}, but there are {agents} agents",
                self.abs.dim()
            );
        }
        if self.rel.dim() != self.abs.dim() {
            bail!("rel has shape {:?}, abs {:?}", self.rel.dim(), self.abs.dim());
        }
        if self.loss_mask.dim() != (agents, track_len) {
            bail!("loss_mask has shape {:?}", self.loss_mask.dim());
        }
        if self.id_frame.dim() != (agents, track_len, 3) {
            bail!("id_frame has shape {:?}", self.id_frame.dim());
        }
        for (name, len) in [
            ("non_linear", self.non_linear.len()),
            ("object_class", self.object_class.len()),
            ("object_id", self.object_id.len()),
        ] {
            if len != agents {
                bail!("{name} has {len} entries, but there are {agents} agents");
            }
        }
        for (name, len) in [
            ("city", self.city.len()),
            ("map_origin", self.map_origin.nrows()),
            ("seq_id", self.seq_id.len()),
            ("orientation", self.orientation.len()),
            ("oracle_centerline", self.oracle_centerline.dim().0),
            ("candidate_centerlines", self.candidate_centerlines.dim().0),
        ] {
            if len != scenes {
                bail!("{name} has {len} entries, but there are {scenes} scenes");
            }
        }
        let (_, _, points, _) = self.candidate_centerlines.dim();
        if self.oracle_centerline.dim().1 != points {
            bail!("oracle and candidate centerlines disagree on points per centerline");
        }
        if self.num_agents.iter().any(|n| *n < MIN_AGENTS_PER_SCENE) {
            bail!("Some scene has fewer than {MIN_AGENTS_PER_SCENE} agents");
        }

        self.offsets = Vec::with_capacity(scenes + 1);
        self.offsets.push(0);
        for n in &self.num_agents {
            let last = self.offsets[self.offsets.len() - 1];
            self.offsets.push(last + n);
        }
        Ok(())
    }

    pub fn num_scenes(&self) -> usize {
        self.num_agents.len()
    }

    pub fn total_agents(&self) -> usize {
        self.abs.dim().0
    }

    pub fn track_len(&self) -> usize {
        self.abs.dim().1
    }

    /// The agent rows of one scene.
    pub fn scene_range(&self, scene: usize) -> Range<usize> {
        self.offsets[scene]..self.offsets[scene + 1]
    }

    pub fn seq_start_end(&self) -> Vec<(usize, usize)> {
        (0..self.num_scenes())
            .map(|idx| {
                let r = self.scene_range(idx);
                (r.start, r.end)
            })
            .collect()
    }

    /// The row of the AGENT within its scene's range.
    pub fn reference_row(&self, scene: usize) -> Option<usize> {
        self.scene_range(scene)
            .find(|row| self.object_class[*row] == ObjectType::Agent)
    }

    /// Partitions scenes by whether their AGENT follows a straight or curved path.
    pub fn scenes_by_linearity(&self) -> (Vec<usize>, Vec<usize>) {
        let mut straight = Vec::new();
        let mut curved = Vec::new();
        for scene in 0..self.num_scenes() {
            match self.reference_row(scene) {
                Some(row) if self.non_linear[row] > 0.5 => curved.push(scene),
                _ => straight.push(scene),
            }
        }
        (straight, curved)
    }

    /// A copy holding only some scenes. The normalization bounds are kept as-is.
    pub fn slice_scenes(&self, scenes: Range<usize>) -> Result<Self> {
        if scenes.start > scenes.end || scenes.end > self.num_scenes() {
            bail!(
                "Can't slice scenes {:?} out of {}",
                scenes,
                self.num_scenes()
            );
        }
        let rows = self.offsets[scenes.start]..self.offsets[scenes.end];
        let mut data = Self {
            abs: self.abs.slice(s![rows.clone(), .., ..]).to_owned(),
            rel: self.rel.slice(s![rows.clone(), .., ..]).to_owned(),
            loss_mask: self.loss_mask.slice(s![rows.clone(), ..]).to_owned(),
            non_linear: self.non_linear.slice(s![rows.clone()]).to_owned(),
            num_agents: self.num_agents[scenes.clone()].to_vec(),
            id_frame: self.id_frame.slice(s![rows.clone(), .., ..]).to_owned(),
            object_class: self.object_class[rows.clone()].to_vec(),
            object_id: self.object_id[rows].to_vec(),
            city: self.city[scenes.clone()].to_vec(),
            map_origin: self.map_origin.slice(s![scenes.clone(), ..]).to_owned(),
            seq_id: self.seq_id[scenes.clone()].to_vec(),
            norm: self.norm,
            orientation: self.orientation.slice(s![scenes.clone()]).to_owned(),
            oracle_centerline: self
                .oracle_centerline
                .slice(s![scenes.clone(), .., ..])
                .to_owned(),
            candidate_centerlines: self
                .candidate_centerlines
                .slice(s![scenes, .., .., ..])
                .to_owned(),
            offsets: Vec::new(),
        };
        data.validate()?;
        Ok(data)
    }

    /// Appends another split's scenes. This split's normalization bounds win.
    pub fn concat(&self, other: &Self) -> Result<Self> {
        if self.track_len() != other.track_len() {
            bail!(
                "Can't merge tracks of length {} and {}",
                self.track_len(),
                other.track_len()
            );
        }
        let mut data = Self {
            abs: concatenate(Axis(0), &[self.abs.view(), other.abs.view()])?,
            rel: concatenate(Axis(0), &[self.rel.view(), other.rel.view()])?,
            loss_mask: concatenate(Axis(0), &[self.loss_mask.view(), other.loss_mask.view()])?,
            non_linear: concatenate(Axis(0), &[self.non_linear.view(), other.non_linear.view()])?,
            num_agents: [self.num_agents.clone(), other.num_agents.clone()].concat(),
            id_frame: concatenate(Axis(0), &[self.id_frame.view(), other.id_frame.view()])?,
            object_class: [self.object_class.clone(), other.object_class.clone()].concat(),
            object_id: [self.object_id.clone(), other.object_id.clone()].concat(),
            city: [self.city.clone(), other.city.clone()].concat(),
            map_origin: concatenate(Axis(0), &[self.map_origin.view(), other.map_origin.view()])?,
            seq_id: [self.seq_id.clone(), other.seq_id.clone()].concat(),
            norm: self.norm,
            orientation: concatenate(
                Axis(0),
                &[self.orientation.view(), other.orientation.view()],
            )?,
            oracle_centerline: concatenate(
                Axis(0),
                &[self.oracle_centerline.view(), other.oracle_centerline.view()],
            )?,
            candidate_centerlines: concatenate(
                Axis(0),
                &[
                    self.candidate_centerlines.view(),
                    other.candidate_centerlines.view(),
                ],
            )?,
            offsets: Vec::new(),
        };
        data.validate()?;
        Ok(data)
    }

    /// Windows every selected log of the split and aggregates the usable scenes.
    pub fn build(cfg: &DatasetConfig, timer: &mut Timer) -> Result<Self> {
        let mut source = LogSource::open(cfg.logs_path())?;
        let file_ids = apply_percentage(
            source.list_file_ids()?,
            cfg.split_percentage,
            cfg.start_from_percentage,
        )?;
        let centerlines_dir = cfg.centerlines_dir();

        let mut scenes = Vec::new();
        let mut no_origin = 0;
        let mut too_few_agents = 0;
        timer.start_iter("window scenes", file_ids.len());
        for file_id in file_ids {
            timer.next();
            let log = source.read_scene(file_id)?;
            let window = match process_window(&log, 0, cfg) {
                Some(w) => w,
                None => {
                    no_origin += 1;
                    continue;
                }
            };
            if !window.is_usable(MIN_AGENTS_PER_SCENE) {
                too_few_agents += 1;
                continue;
            }
            let orientation = match window.reference_orientation(cfg.obs_len) {
                Some(x) => x,
                None => {
                    too_few_agents += 1;
                    continue;
                }
            };
            let centerlines = read_centerlines(&centerlines_dir, file_id)?;
            scenes.push(ProcessedScene {
                centerlines: pack_centerlines(&centerlines, cfg),
                window,
                orientation,
            });
        }

        info!(
            "Retained {} scenes from the {} split. {} had no AGENT at the origin, {} had too few agents",
            prettyprint_usize(scenes.len()),
            cfg.split.name(),
            prettyprint_usize(no_origin),
            prettyprint_usize(too_few_agents)
        );
        if scenes.is_empty() {
            bail!(
                "No usable scenes in {} for the {} split",
                cfg.logs_path().display(),
                cfg.split.name()
            );
        }
        Self::from_scenes(scenes, cfg)
    }
}

/// Centerlines are optional; a scene without a file just gets padding.
fn read_centerlines(dir: &Path, file_id: FileID) -> Result<Vec<PolyLine>> {
    let path = dir.join(format!("{file_id}.csv"));
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = fs_err::File::open(&path)?;
    load_centerlines(file).map_err(|err| anyhow!("{}: {err}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::AgentTrack;

    fn track(object: usize, class: ObjectType, start: [f64; 2], non_linear: bool) -> AgentTrack {
        let abs: Vec<[f64; 2]> = (0..4)
            .map(|t| [start[0] + t as f64, start[1]])
            .collect();
        AgentTrack {
            object: ObjectID(object),
            class,
            rel: crate::window::relative_displacements(&abs),
            abs,
            mask: vec![true; 4],
            timestamps: vec![0.0, 0.1, 0.2, 0.3],
            non_linear: Some(non_linear),
        }
    }

    fn scene(id: u64, agents: Vec<AgentTrack>, cfg: &DatasetConfig) -> ProcessedScene {
        ProcessedScene {
            window: SceneWindow {
                file_id: FileID(id),
                city: City::Miami,
                map_origin: [id as f64, 0.0],
                agents,
            },
            orientation: 0.0,
            centerlines: Array3::zeros((cfg.max_centerlines, cfg.points_per_centerline, 2)),
        }
    }

    fn cfg() -> DatasetConfig {
        DatasetConfig {
            obs_len: 2,
            pred_len: 2,
            max_centerlines: 2,
            points_per_centerline: 3,
            ..Default::default()
        }
    }

    fn data() -> ProcessedData {
        let cfg = cfg();
        ProcessedData::from_scenes(
            vec![
                scene(
                    10,
                    vec![
                        track(0, ObjectType::AV, [0.0, 0.0], false),
                        track(1, ObjectType::Agent, [-5.0, 2.0], true),
                    ],
                    &cfg,
                ),
                scene(
                    20,
                    vec![
                        track(0, ObjectType::Agent, [1.0, 1.0], false),
                        track(1, ObjectType::AV, [3.0, 3.0], false),
                        track(2, ObjectType::Other, [7.0, -1.0], true),
                    ],
                    &cfg,
                ),
            ],
            &cfg,
        )
        .unwrap()
    }

    #[test]
    fn flatten() {
        let data = data();
        assert_eq!(data.num_scenes(), 2);
        assert_eq!(data.total_agents(), 5);
        assert_eq!(data.seq_start_end(), vec![(0, 2), (2, 5)]);
        assert_eq!(data.reference_row(1), Some(2));
        assert_eq!(data.scenes_by_linearity(), (vec![1], vec![0]));
        assert_eq!(data.norm.abs_min, -5.0);
        assert_eq!(data.norm.abs_max, 10.0);
        assert_eq!(data.norm.rel_min, 0.0);
        assert_eq!(data.norm.rel_max, 1.0);
        assert_eq!(data.id_frame[[4, 3, 2]], 20.0);
        assert_eq!(data.id_frame[[4, 0, 1]], 2.0);
    }

    #[test]
    fn slice_and_concat() {
        let data = data();
        let first = data.slice_scenes(0..1).unwrap();
        let second = data.slice_scenes(1..2).unwrap();
        assert_eq!(first.total_agents(), 2);
        assert_eq!(second.seq_id, vec![FileID(20)]);
        assert_eq!(second.norm, data.norm);

        let merged = first.concat(&second).unwrap();
        assert_eq!(merged, data);
        assert!(data.slice_scenes(1..3).is_err());
    }

    #[test]
    fn unusable_scene() {
        let cfg = cfg();
        let lonely = scene(1, vec![track(0, ObjectType::Agent, [0.0, 0.0], false)], &cfg);
        assert!(ProcessedData::from_scenes(vec![lonely], &cfg).is_err());
        assert!(ProcessedData::from_scenes(Vec::new(), &cfg).is_err());
    }
}
