//! Turns raw Argoverse logs into fixed-length multi-agent scenes, caches them, and serves them
//! as batches for training trajectory forecasters.

#[macro_use]
extern crate anyhow;
#[macro_use]
extern crate log;

mod aggregate;
pub mod augment;
pub mod cache;
mod collate;
mod config;
pub mod context;
mod dataset;
pub mod debug;
pub mod linearity;
mod loader;
pub mod sampler;
pub mod window;

pub use aggregate::{Norm, ProcessedData, ProcessedScene, MIN_AGENTS_PER_SCENE};
pub use collate::{collate, Batch, PhysicalContextTensor};
pub use config::{
    DatasetConfig, LinearityConfig, NoiseConfig, PhysicalContext, RasterConfig, Split,
};
pub use dataset::{SceneItem, TrajectoryDataset};
pub use debug::{BatchInspector, GeoJsonDump};
pub use loader::BatchIter;
pub use sampler::Provenance;
