use std::path::Path;

use anyhow::Result;

/// Number of trailing summary rows (mean, max) following the per-scene rows of a ranking file.
pub const SUMMARY_ROWS: usize = 2;

/// Reads a whitespace-delimited error ranking, sorted from easiest to hardest scene, and returns
/// the `Index` column of the per-scene rows. Indices are 0-based rows into the scene list.
pub fn load_ranking<R: std::io::Read>(mut reader: R) -> Result<Vec<usize>> {
    // Columns may be separated by any run of spaces or tabs
    let mut raw = String::new();
    reader.read_to_string(&mut raw)?;
    let mut normalized = String::new();
    for line in raw.lines().filter(|line| !line.trim().is_empty()) {
        normalized.push_str(&line.split_whitespace().collect::<Vec<_>>().join(" "));
        normalized.push('\n');
    }

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b' ')
        .from_reader(normalized.as_bytes());
    let column = match reader.headers()?.iter().position(|h| h == "Index") {
        Some(x) => x,
        None => bail!("Ranking file has no Index column"),
    };

    let mut rows = Vec::new();
    for rec in reader.records() {
        let rec = rec?;
        match rec.get(column) {
            Some(x) => rows.push(x.to_string()),
            None => bail!("Ranking row {:?} is missing the Index column", rec),
        }
    }
    if rows.len() < SUMMARY_ROWS {
        bail!("Ranking file has {} rows, not even the summary", rows.len());
    }
    rows.truncate(rows.len() - SUMMARY_ROWS);

    let mut indices = Vec::new();
    for x in rows {
        indices.push(
            x.parse::<usize>()
                .map_err(|err| anyhow!("Bad Index {x} in ranking file: {err}"))?,
        );
    }
    Ok(indices)
}

/// The hardest `percentage_hardest` fraction of the ranking. If that rounds down to nothing, the
/// whole ranking is used.
pub fn load_hardest<P: AsRef<Path>>(path: P, percentage_hardest: f64) -> Result<Vec<usize>> {
    let path = path.as_ref();
    let ranking = load_ranking(fs_err::File::open(path)?)
        .map_err(|err| anyhow!("{}: {err}", path.display()))?;
    let keep = (percentage_hardest * ranking.len() as f64).floor() as usize;
    if ranking.is_empty() {
        bail!("{}: no ranked scenes to mine", path.display());
    }
    if keep == 0 {
        warn!(
            "{}: {percentage_hardest} of {} ranked scenes is nothing, so mining from all of them",
            path.display(),
            ranking.len()
        );
        return Ok(ranking);
    }
    info!(
        "Hard mining from the worst {keep} of {} scenes in {}",
        ranking.len(),
        path.display()
    );
    Ok(ranking[ranking.len() - keep..].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    const RANKING: &str = "Index SeqID ADE FDE
3 40 0.5 1.0
0 12 0.8 1.5
2 31 1.2 2.5
1 20 4.0 9.0
mean - 1.6 3.5
max - 4.0 9.0
";

    #[test]
    fn skips_summary_rows() {
        assert_eq!(load_ranking(RANKING.as_bytes()).unwrap(), vec![3, 0, 2, 1]);
    }

    #[test]
    fn tabs_and_aligned_columns() {
        let tabs = RANKING.replace(' ', "\t");
        assert_eq!(load_ranking(tabs.as_bytes()).unwrap(), vec![3, 0, 2, 1]);

        let aligned = "Index  SeqID   ADE    FDE
    3     40  0.5    1.0
   12      8  0.8    1.5
 mean      -  0.65   1.25
  max      -  0.8    1.5
";
        assert_eq!(load_ranking(aligned.as_bytes()).unwrap(), vec![3, 12]);
    }

    #[test]
    fn tiny_fraction_mines_everything() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ranking.txt");
        fs_err::write(&path, RANKING).unwrap();
        assert_eq!(load_hardest(&path, 0.05).unwrap(), vec![3, 0, 2, 1]);
        assert_eq!(load_hardest(&path, 0.5).unwrap(), vec![2, 1]);
    }

    #[test]
    fn needs_index_column() {
        let bad = "Seq ADE\n1 0.5\nmean 0.5\nmax 0.5\n";
        assert!(load_ranking(bad.as_bytes()).is_err());
    }
}
