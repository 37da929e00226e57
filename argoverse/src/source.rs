use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::Result;
use zip::ZipArchive;

use crate::{FileID, SceneLog};

/// Where the raw scene logs of one split live: either a directory of `<file_id>.csv` files, or
/// a zip archive holding them under a `data/` prefix.
pub enum LogSource {
    Dir(PathBuf),
    Zip(ZipArchive<fs_err::File>),
}

impl LogSource {
    /// Zip archives are detected by extension; anything else must be a directory.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.extension().map(|ext| ext == "zip").unwrap_or(false) {
            let archive = ZipArchive::new(fs_err::File::open(path)?)
                .map_err(|err| anyhow!("{}: {err}", path.display()))?;
            return Ok(LogSource::Zip(archive));
        }
        if !path.is_dir() {
            bail!("{} isn't a directory of scene logs", path.display());
        }
        Ok(LogSource::Dir(path.to_path_buf()))
    }

    /// All scene files, sorted numerically.
    pub fn list_file_ids(&mut self) -> Result<Vec<FileID>> {
        let mut ids = Vec::new();
        match self {
            LogSource::Dir(dir) => {
                for entry in fs_err::read_dir(dir.as_path())? {
                    let entry = entry?;
                    if let Some(name) = entry.file_name().to_str() {
                        if let Some(id) = parse_file_id(name) {
                            ids.push(id);
                        }
                    }
                }
            }
            LogSource::Zip(archive) => {
                for name in archive.file_names() {
                    if let Some(name) = name.strip_prefix("data/") {
                        if let Some(id) = parse_file_id(name) {
                            ids.push(id);
                        }
                    }
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    pub fn read_scene(&mut self, file_id: FileID) -> Result<SceneLog> {
        match self {
            LogSource::Dir(dir) => {
                let path = dir.join(format!("{file_id}.csv"));
                let file = fs_err::File::open(&path)?;
                SceneLog::load(file_id, std::io::BufReader::new(file))
                    .map_err(|err| anyhow!("{}: {err}", path.display()))
            }
            LogSource::Zip(archive) => {
                let path = format!("data/{file_id}.csv");
                let mut raw = String::new();
                get_zip_file(archive, &path)?.read_to_string(&mut raw)?;
                SceneLog::load(file_id, raw.as_bytes()).map_err(|err| anyhow!("{path}: {err}"))
            }
        }
    }
}

fn parse_file_id(name: &str) -> Option<FileID> {
    name.strip_suffix(".csv")?.parse::<u64>().ok().map(FileID)
}

/// Keeps a contiguous fraction of the sorted file list. `start_from_percentage` picks where the
/// slice begins, `split_percentage` how much of the whole list it covers.
pub fn apply_percentage(
    file_ids: Vec<FileID>,
    split_percentage: f64,
    start_from_percentage: f64,
) -> Result<Vec<FileID>> {
    if !(0.0..=1.0).contains(&split_percentage) || !(0.0..=1.0).contains(&start_from_percentage)
    {
        bail!(
            "Percentages must be in [0, 1], got split {split_percentage}, start {start_from_percentage}"
        );
    }
    let n = file_ids.len();
    let start = ((start_from_percentage * n as f64).floor() as usize).min(n);
    let end = (start + (split_percentage * n as f64).floor() as usize).min(n);
    Ok(file_ids[start..end].to_vec())
}

// Adds the path in the error message
pub fn get_zip_file<'a, R: std::io::Read + std::io::Seek>(
    archive: &'a mut ZipArchive<R>,
    path: &str,
) -> Result<zip::read::ZipFile<'a>> {
    archive
        .by_name(path)
        .map_err(|err| anyhow!("{path}: {err}"))
}
