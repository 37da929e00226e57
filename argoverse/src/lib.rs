//! Reading raw Argoverse motion-forecasting logs: one CSV per scene, each row an observation of a
//! tracked object at some timestamp.

#[macro_use]
extern crate anyhow;
#[macro_use]
extern crate log;

mod centerlines;
mod ids;
mod ranking;
mod records;
mod source;

pub use centerlines::load_centerlines;
pub use ids::{orig, CheapID, FileID, IDMapping, ObjectID};
pub use ranking::{load_hardest, load_ranking, SUMMARY_ROWS};
pub use records::{City, ObjectType, RawRecord, SceneLog};
pub use source::{apply_percentage, get_zip_file, LogSource};
