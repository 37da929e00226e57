use std::io::Write;
use std::path::Path;

use anyhow::Result;

use crate::SceneError;

/// Writes scenes from easiest to hardest as a whitespace table, `Index SeqID ADE FDE`, followed
/// by `mean` and `max` rows. This is the file hard mining reads back.
pub fn write_ranking<W: Write>(scenes: &[SceneError], writer: W) -> Result<()> {
    if scenes.is_empty() {
        bail!("No scenes to rank");
    }
    let mut sorted: Vec<&SceneError> = scenes.iter().collect();
    sorted.sort_by(|a, b| a.ade.total_cmp(&b.ade));

    let mut writer = csv::WriterBuilder::new()
        .delimiter(b' ')
        .from_writer(writer);
    writer.write_record(["Index", "SeqID", "ADE", "FDE"])?;
    for scene in &sorted {
        writer.write_record([
            scene.index.to_string(),
            scene.seq_id.to_string(),
            format!("{:.6}", scene.ade),
            format!("{:.6}", scene.fde),
        ])?;
    }

    let n = sorted.len() as f64;
    let mean_ade = sorted.iter().map(|s| s.ade).sum::<f64>() / n;
    let mean_fde = sorted.iter().map(|s| s.fde).sum::<f64>() / n;
    let max_ade = sorted.iter().map(|s| s.ade).fold(f64::NEG_INFINITY, f64::max);
    let max_fde = sorted.iter().map(|s| s.fde).fold(f64::NEG_INFINITY, f64::max);
    for (name, ade, fde) in [("mean", mean_ade, mean_fde), ("max", max_ade, max_fde)] {
        writer.write_record([
            name.to_string(),
            "-".to_string(),
            format!("{:.6}", ade),
            format!("{:.6}", fde),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

pub fn save_ranking<P: AsRef<Path>>(scenes: &[SceneError], path: P) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs_err::create_dir_all(parent)?;
    }
    write_ranking(scenes, fs_err::File::create(path)?)
        .map_err(|err| anyhow!("{}: {err}", path.display()))?;
    info!("Ranked {} scenes in {}", scenes.len(), path.display());
    Ok(())
}
