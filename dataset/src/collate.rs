use anyhow::Result;
use ndarray::{s, Array1, Array2, Array3, Array4};
use rand::rngs::StdRng;

use argoverse::{City, FileID, ObjectID, ObjectType};

use crate::augment::LocalScene;
use crate::context::{goal_points, rasterize};
use crate::sampler::Provenance;
use crate::{DatasetConfig, Norm, PhysicalContext, SceneItem};

/// Map information for every scene of a batch, in each scene's local frame.
#[derive(Clone, Debug, PartialEq)]
pub enum PhysicalContextTensor {
    None,
    /// `[scenes, 1, pixels, pixels]`
    Raster(Array4<f32>),
    /// `[scenes, max_centerlines, 2]`
    Goals(Array3<f32>),
    /// `[scenes, max_centerlines, points_per_centerline, 2]`
    Centerlines(Array4<f32>),
    /// `[scenes, points_per_centerline, 2]`
    Oracle(Array3<f32>),
}

/// Several scenes merged together. Tracks are time-major, `[T, agents, 2]`, with the agents of
/// each scene contiguous.
#[derive(Clone, Debug)]
pub struct Batch {
    pub obs_traj: Array3<f32>,
    pub pred_traj_gt: Array3<f32>,
    pub obs_traj_rel: Array3<f32>,
    pub pred_traj_gt_rel: Array3<f32>,
    /// `[agents]`
    pub non_linear: Array1<f32>,
    /// `[agents, T]`
    pub loss_mask: Array2<f32>,
    /// The agent rows `[start, end)` of every scene
    pub seq_start_end: Vec<(usize, usize)>,
    pub object_class: Vec<ObjectType>,
    pub object_id: Vec<ObjectID>,
    pub city: Vec<City>,
    /// `[scenes, 2]`
    pub map_origin: Array2<f64>,
    pub seq_id: Vec<FileID>,
    pub norm: Norm,
    pub orientation: Array1<f64>,
    pub physical_context: PhysicalContextTensor,
    pub provenance: Vec<Provenance>,
    /// Which scene of the dataset each scene of the batch is
    pub scene_index: Vec<usize>,
}

impl Batch {
    pub fn num_scenes(&self) -> usize {
        self.seq_start_end.len()
    }

    pub fn num_agents(&self) -> usize {
        self.obs_traj.dim().1
    }

    pub fn obs_len(&self) -> usize {
        self.obs_traj.dim().0
    }

    pub fn pred_len(&self) -> usize {
        self.pred_traj_gt.dim().0
    }

    /// The absolute row of every scene's AGENT.
    pub fn reference_rows(&self) -> Vec<usize> {
        self.seq_start_end
            .iter()
            .map(|(start, end)| {
                (*start..*end)
                    .find(|row| self.object_class[*row] == ObjectType::Agent)
                    .unwrap_or(*start)
            })
            .collect()
    }
}

/// Merges scenes into a batch, applying augmentation and attaching physical context. Noise is
/// only added while training.
pub fn collate(items: Vec<SceneItem>, cfg: &DatasetConfig, rng: &mut StdRng) -> Result<Batch> {
    if items.is_empty() {
        bail!("Can't collate an empty batch");
    }
    let obs_len = cfg.obs_len;
    let future_len = cfg.future_len();
    let num_scenes = items.len();
    let total_agents: usize = items.iter().map(|i| i.num_agents()).sum();

    let mut obs_traj = Array3::zeros((obs_len, total_agents, 2));
    let mut pred_traj_gt = Array3::zeros((future_len, total_agents, 2));
    let mut obs_traj_rel = Array3::zeros((obs_len, total_agents, 2));
    let mut pred_traj_gt_rel = Array3::zeros((future_len, total_agents, 2));
    let mut non_linear = Array1::zeros(total_agents);
    let mut loss_mask = Array2::zeros((total_agents, obs_len + future_len));
    let mut map_origin = Array2::zeros((num_scenes, 2));
    let mut orientation = Array1::zeros(num_scenes);
    let mut seq_start_end = Vec::with_capacity(num_scenes);
    let mut object_class = Vec::with_capacity(total_agents);
    let mut object_id = Vec::with_capacity(total_agents);
    let mut city = Vec::with_capacity(num_scenes);
    let mut seq_id = Vec::with_capacity(num_scenes);
    let mut provenance = Vec::with_capacity(num_scenes);
    let mut scene_index = Vec::with_capacity(num_scenes);
    let mut scenes = Vec::with_capacity(num_scenes);
    let norm = items[0].norm;

    let mut row = 0;
    for (idx, item) in items.into_iter().enumerate() {
        if item.reference_row().is_none() {
            bail!("Scene {} has no AGENT", item.seq_id);
        }
        if item.obs.dim().1 != obs_len || item.pred.dim().1 != future_len {
            bail!(
                "Scene {} has {} observed and {} future steps, not {obs_len} and {future_len}",
                item.seq_id,
                item.obs.dim().1,
                item.pred.dim().1
            );
        }

        let mut local = LocalScene::from_item(&item);
        if cfg.data_augmentation && cfg.is_training() {
            local.add_noise(&cfg.noise, rng)?;
        }
        if cfg.apply_rotation {
            local.align_to_y_axis(item.orientation);
        }

        let n = item.num_agents();
        let rows = row..row + n;
        for (dst, src) in [
            (&mut obs_traj, &local.obs),
            (&mut pred_traj_gt, &local.pred),
            (&mut obs_traj_rel, &local.obs_rel),
            (&mut pred_traj_gt_rel, &local.pred_rel),
        ] {
            // Agent-major to time-major
            let src = src.view().permuted_axes([1, 0, 2]);
            dst.slice_mut(s![.., rows.clone(), ..]).assign(&src);
        }
        non_linear.slice_mut(s![rows.clone()]).assign(&item.non_linear);
        loss_mask
            .slice_mut(s![rows.clone(), ..])
            .assign(&item.loss_mask);

        seq_start_end.push((rows.start, rows.end));
        object_class.extend(item.object_class.iter().cloned());
        object_id.extend(item.object_id.iter().cloned());
        city.push(item.city);
        seq_id.push(item.seq_id);
        provenance.push(item.provenance);
        scene_index.push(item.scene);
        map_origin[[idx, 0]] = local.map_origin[0];
        map_origin[[idx, 1]] = local.map_origin[1];
        orientation[idx] = item.orientation;
        scenes.push(local);
        row += n;
    }

    let physical_context = physical_context(&scenes, cfg);
    Ok(Batch {
        obs_traj,
        pred_traj_gt,
        obs_traj_rel,
        pred_traj_gt_rel,
        non_linear,
        loss_mask,
        seq_start_end,
        object_class,
        object_id,
        city,
        map_origin,
        seq_id,
        norm,
        orientation,
        physical_context,
        provenance,
        scene_index,
    })
}

fn physical_context(scenes: &[LocalScene], cfg: &DatasetConfig) -> PhysicalContextTensor {
    let n = scenes.len();
    let (lines, points) = (cfg.max_centerlines, cfg.points_per_centerline);
    match cfg.physical_context {
        PhysicalContext::Dummy => PhysicalContextTensor::None,
        PhysicalContext::Visual => {
            let pixels = cfg.raster.pixels;
            let mut raster = Array4::zeros((n, 1, pixels, pixels));
            for (idx, scene) in scenes.iter().enumerate() {
                raster
                    .slice_mut(s![idx, 0, .., ..])
                    .assign(&rasterize(scene.candidates.view(), &cfg.raster));
            }
            PhysicalContextTensor::Raster(raster)
        }
        PhysicalContext::Goals => {
            let mut goals = Array3::zeros((n, lines, 2));
            for (idx, scene) in scenes.iter().enumerate() {
                goals
                    .slice_mut(s![idx, .., ..])
                    .assign(&goal_points(scene.candidates.view()));
            }
            PhysicalContextTensor::Goals(goals)
        }
        PhysicalContext::PlausibleCenterlines => {
            let mut centerlines = Array4::zeros((n, lines, points, 2));
            for (idx, scene) in scenes.iter().enumerate() {
                centerlines
                    .slice_mut(s![idx, .., .., ..])
                    .assign(&scene.candidates);
            }
            PhysicalContextTensor::Centerlines(centerlines)
        }
        PhysicalContext::Oracle => {
            let mut oracle = Array3::zeros((n, points, 2));
            for (idx, scene) in scenes.iter().enumerate() {
                oracle.slice_mut(s![idx, .., ..]).assign(&scene.oracle);
            }
            PhysicalContextTensor::Oracle(oracle)
        }
    }
}
