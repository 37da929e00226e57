use anyhow::Result;

use argoverse::{load_hardest, load_ranking, FileID};
use forecast::{save_ranking, write_ranking, SceneError};

fn scene(index: usize, seq_id: u64, ade: f64, fde: f64) -> SceneError {
    SceneError {
        index,
        seq_id: FileID(seq_id),
        ade,
        fde,
    }
}

#[test]
fn hard_mining_reads_what_evaluation_writes() -> Result<()> {
    let scenes = vec![
        scene(0, 12, 0.8, 1.5),
        scene(1, 20, 4.0, 9.0),
        scene(2, 31, 1.2, 2.5),
        scene(3, 40, 0.5, 1.0),
    ];

    let mut out = Vec::new();
    write_ranking(&scenes, &mut out)?;
    let text = String::from_utf8(out)?;
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "Index SeqID ADE FDE");
    assert_eq!(lines[1], "3 40 0.500000 1.000000");
    assert_eq!(lines[5], "mean - 1.625000 3.500000");
    assert_eq!(lines[6], "max - 4.000000 9.000000");

    assert_eq!(load_ranking(text.as_bytes())?, vec![3, 0, 2, 1]);

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("ranking").join("val_ranking.txt");
    save_ranking(&scenes, &path)?;
    assert_eq!(load_hardest(&path, 0.5)?, vec![2, 1]);
    Ok(())
}

#[test]
fn nothing_to_rank() {
    assert!(write_ranking(&[], Vec::new()).is_err());
}
