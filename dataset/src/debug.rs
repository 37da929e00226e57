use std::path::PathBuf;

use anyhow::Result;
use geojson::{Feature, FeatureCollection, GeoJson, Geometry, Value};
use ndarray::{s, ArrayView2};

use crate::{Batch, PhysicalContextTensor};

/// Looks at every batch produced by a `BatchIter`. Only invoked when one is attached.
pub trait BatchInspector {
    fn inspect(&mut self, batch: &Batch) -> Result<()>;
}

/// Writes one GeoJSON file per scene, with the observed and future track of every agent and the
/// scene's centerlines. Coordinates are in the local frame, after any augmentation.
pub struct GeoJsonDump {
    dir: PathBuf,
    written: usize,
}

impl GeoJsonDump {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Result<Self> {
        let dir = dir.into();
        fs_err::create_dir_all(&dir)?;
        Ok(Self { dir, written: 0 })
    }

    pub fn written(&self) -> usize {
        self.written
    }
}

impl BatchInspector for GeoJsonDump {
    fn inspect(&mut self, batch: &Batch) -> Result<()> {
        for (scene, (start, end)) in batch.seq_start_end.iter().enumerate() {
            let mut features = Vec::new();
            for row in *start..*end {
                for (kind, track) in [
                    ("observed", batch.obs_traj.slice(s![.., row, ..])),
                    ("future", batch.pred_traj_gt.slice(s![.., row, ..])),
                ] {
                    if let Some(mut feature) = linestring(track) {
                        feature.set_property("type", kind);
                        feature.set_property("object_class", format!("{:?}", batch.object_class[row]));
                        feature.set_property("object_id", batch.object_id[row].0);
                        features.push(feature);
                    }
                }
            }

            match &batch.physical_context {
                PhysicalContextTensor::Centerlines(lines) => {
                    for idx in 0..lines.dim().1 {
                        if let Some(mut feature) = linestring(lines.slice(s![scene, idx, .., ..])) {
                            feature.set_property("type", "centerline");
                            features.push(feature);
                        }
                    }
                }
                PhysicalContextTensor::Oracle(lines) => {
                    if let Some(mut feature) = linestring(lines.slice(s![scene, .., ..])) {
                        feature.set_property("type", "oracle_centerline");
                        features.push(feature);
                    }
                }
                PhysicalContextTensor::Goals(goals) => {
                    for idx in 0..goals.dim().1 {
                        let (x, y) = (goals[[scene, idx, 0]], goals[[scene, idx, 1]]);
                        if x == 0.0 && y == 0.0 {
                            continue;
                        }
                        let mut feature = feature(Value::Point(vec![x as f64, y as f64]));
                        feature.set_property("type", "goal");
                        features.push(feature);
                    }
                }
                PhysicalContextTensor::None | PhysicalContextTensor::Raster(_) => {}
            }

            let gj = GeoJson::FeatureCollection(FeatureCollection {
                features,
                bbox: None,
                foreign_members: None,
            });
            let path = self
                .dir
                .join(format!("scene_{}.geojson", batch.seq_id[scene]));
            fs_err::write(&path, serde_json::to_string_pretty(&gj)?)?;
            self.written += 1;
        }
        debug!(
            "Dumped {} scenes to {}",
            batch.num_scenes(),
            self.dir.display()
        );
        Ok(())
    }
}

fn feature(value: Value) -> Feature {
    Feature {
        bbox: None,
        geometry: Some(Geometry::new(value)),
        id: None,
        properties: None,
        foreign_members: None,
    }
}

/// Skips padding points. None if fewer than two points remain.
fn linestring(pts: ArrayView2<f32>) -> Option<Feature> {
    let coords: Vec<Vec<f64>> = pts
        .outer_iter()
        .filter(|pt| !(pt[0] == 0.0 && pt[1] == 0.0))
        .map(|pt| vec![pt[0] as f64, pt[1] as f64])
        .collect();
    if coords.len() < 2 {
        return None;
    }
    Some(feature(Value::LineString(coords)))
}
