//! The on-disk cache of a processed split. Each field of `ProcessedData` lives in its own binary
//! file, and a JSON manifest describes what was written.

use std::path::Path;

use abstutil::Timer;
use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{DatasetConfig, ProcessedData};

/// Every persisted field. Loading fails if any of them is missing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheField {
    Abs,
    Rel,
    LossMask,
    NonLinear,
    NumAgents,
    IdFrame,
    ObjectClass,
    ObjectId,
    City,
    MapOrigin,
    SeqId,
    Norm,
    Orientation,
    OracleCenterline,
    CandidateCenterlines,
}

impl CacheField {
    pub fn all() -> Vec<CacheField> {
        vec![
            CacheField::Abs,
            CacheField::Rel,
            CacheField::LossMask,
            CacheField::NonLinear,
            CacheField::NumAgents,
            CacheField::IdFrame,
            CacheField::ObjectClass,
            CacheField::ObjectId,
            CacheField::City,
            CacheField::MapOrigin,
            CacheField::SeqId,
            CacheField::Norm,
            CacheField::Orientation,
            CacheField::OracleCenterline,
            CacheField::CandidateCenterlines,
        ]
    }

    pub fn name(self) -> &'static str {
        match self {
            CacheField::Abs => "abs",
            CacheField::Rel => "rel",
            CacheField::LossMask => "loss_mask",
            CacheField::NonLinear => "non_linear",
            CacheField::NumAgents => "num_agents",
            CacheField::IdFrame => "id_frame",
            CacheField::ObjectClass => "object_class",
            CacheField::ObjectId => "object_id",
            CacheField::City => "city",
            CacheField::MapOrigin => "map_origin",
            CacheField::SeqId => "seq_id",
            CacheField::Norm => "norm",
            CacheField::Orientation => "orientation",
            CacheField::OracleCenterline => "oracle_centerline",
            CacheField::CandidateCenterlines => "candidate_centerlines",
        }
    }

    pub fn file_name(self) -> String {
        format!("{}.bin", self.name())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub fields: Vec<String>,
    pub split: String,
    pub split_percentage: f64,
    pub num_scenes: usize,
    pub num_agents: usize,
    pub obs_len: usize,
    pub track_len: usize,
    pub max_centerlines: usize,
    pub points_per_centerline: usize,
}

const MANIFEST: &str = "manifest.json";

/// True if a cache for this split and percentage has been written.
pub fn exists(cfg: &DatasetConfig) -> bool {
    cfg.cache_dir().join(MANIFEST).exists()
}

pub fn save(data: &ProcessedData, cfg: &DatasetConfig) -> Result<()> {
    let dir = cfg.cache_dir();
    fs_err::create_dir_all(&dir)?;
    for field in CacheField::all() {
        let path = field_path(&dir, field);
        match field {
            CacheField::Abs => abstio::write_binary(path, &data.abs),
            CacheField::Rel => abstio::write_binary(path, &data.rel),
            CacheField::LossMask => abstio::write_binary(path, &data.loss_mask),
            CacheField::NonLinear => abstio::write_binary(path, &data.non_linear),
            CacheField::NumAgents => abstio::write_binary(path, &data.num_agents),
            CacheField::IdFrame => abstio::write_binary(path, &data.id_frame),
            CacheField::ObjectClass => abstio::write_binary(path, &data.object_class),
            CacheField::ObjectId => abstio::write_binary(path, &data.object_id),
            CacheField::City => abstio::write_binary(path, &data.city),
            CacheField::MapOrigin => abstio::write_binary(path, &data.map_origin),
            CacheField::SeqId => abstio::write_binary(path, &data.seq_id),
            CacheField::Norm => abstio::write_binary(path, &data.norm),
            CacheField::Orientation => abstio::write_binary(path, &data.orientation),
            CacheField::OracleCenterline => abstio::write_binary(path, &data.oracle_centerline),
            CacheField::CandidateCenterlines => {
                abstio::write_binary(path, &data.candidate_centerlines)
            }
        }
    }

    let manifest = Manifest {
        fields: CacheField::all()
            .into_iter()
            .map(|f| f.name().to_string())
            .collect(),
        split: cfg.split.name().to_string(),
        split_percentage: cfg.split_percentage,
        num_scenes: data.num_scenes(),
        num_agents: data.total_agents(),
        obs_len: cfg.obs_len,
        track_len: data.track_len(),
        max_centerlines: cfg.max_centerlines,
        points_per_centerline: cfg.points_per_centerline,
    };
    // Written last, so a partially written cache has no manifest
    fs_err::write(dir.join(MANIFEST), serde_json::to_string_pretty(&manifest)?)?;
    info!("Cached {} scenes in {}", data.num_scenes(), dir.display());
    Ok(())
}

/// Loads a cache, failing if any field is missing, corrupt, or disagrees with the config.
pub fn load(cfg: &DatasetConfig, timer: &mut Timer) -> Result<ProcessedData> {
    let dir = cfg.cache_dir();
    let manifest_path = dir.join(MANIFEST);
    let manifest: Manifest = serde_json::from_str(&fs_err::read_to_string(&manifest_path)?)
        .map_err(|err| anyhow!("{}: {err}", manifest_path.display()))?;

    if manifest.obs_len != cfg.obs_len || manifest.track_len != cfg.window_len() {
        bail!(
            "{} holds tracks with obs_len {} and length {}, but the config needs {} and {}",
            dir.display(),
            manifest.obs_len,
            manifest.track_len,
            cfg.obs_len,
            cfg.window_len()
        );
    }
    for field in CacheField::all() {
        if !manifest.fields.iter().any(|f| f == field.name()) {
            bail!("{} doesn't list {}", manifest_path.display(), field.name());
        }
        if !Path::new(&field_path(&dir, field)).exists() {
            bail!("{} is missing {}", dir.display(), field.file_name());
        }
    }

    timer.start(format!("load cache from {}", dir.display()));
    let mut data = ProcessedData {
        abs: read(&dir, CacheField::Abs, timer)?,
        rel: read(&dir, CacheField::Rel, timer)?,
        loss_mask: read(&dir, CacheField::LossMask, timer)?,
        non_linear: read(&dir, CacheField::NonLinear, timer)?,
        num_agents: read(&dir, CacheField::NumAgents, timer)?,
        id_frame: read(&dir, CacheField::IdFrame, timer)?,
        object_class: read(&dir, CacheField::ObjectClass, timer)?,
        object_id: read(&dir, CacheField::ObjectId, timer)?,
        city: read(&dir, CacheField::City, timer)?,
        map_origin: read(&dir, CacheField::MapOrigin, timer)?,
        seq_id: read(&dir, CacheField::SeqId, timer)?,
        norm: read(&dir, CacheField::Norm, timer)?,
        orientation: read(&dir, CacheField::Orientation, timer)?,
        oracle_centerline: read(&dir, CacheField::OracleCenterline, timer)?,
        candidate_centerlines: read(&dir, CacheField::CandidateCenterlines, timer)?,
        offsets: Vec::new(),
    };
    timer.stop(format!("load cache from {}", dir.display()));

    data.validate()
        .map_err(|err| anyhow!("{}: {err}", dir.display()))?;
    if data.num_scenes() != manifest.num_scenes || data.total_agents() != manifest.num_agents {
        bail!(
            "{} should have {} scenes and {} agents, but has {} and {}",
            dir.display(),
            manifest.num_scenes,
            manifest.num_agents,
            data.num_scenes(),
            data.total_agents()
        );
    }
    let (_, lines, points, _) = data.candidate_centerlines.dim();
    if lines != cfg.max_centerlines || points != cfg.points_per_centerline {
        bail!(
            "{} has {lines} centerlines of {points} points, but the config needs {} of {}",
            dir.display(),
            cfg.max_centerlines,
            cfg.points_per_centerline
        );
    }
    Ok(data)
}

fn field_path(dir: &Path, field: CacheField) -> String {
    dir.join(field.file_name()).display().to_string()
}

fn read<T: DeserializeOwned>(dir: &Path, field: CacheField, timer: &mut Timer) -> Result<T> {
    let path = field_path(dir, field);
    abstio::maybe_read_binary::<T>(path.clone(), timer).map_err(|err| anyhow!("{path}: {err}"))
}
