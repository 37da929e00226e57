use std::fs;
use std::io::Write;

use argoverse::{apply_percentage, City, FileID, LogSource, ObjectType};

const SCENE: &str = "TIMESTAMP,TRACK_ID,OBJECT_TYPE,X,Y,CITY_NAME
0.0,av,AV,100.0,50.0,MIA
0.0,agent,AGENT,110.0,50.0,MIA
0.1,av,AV,101.0,50.0,MIA
0.1,agent,AGENT,111.0,50.0,MIA
";

#[test]
fn directory_source() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    for id in [12, 3, 7] {
        fs::write(tmp.path().join(format!("{id}.csv")), SCENE)?;
    }
    fs::write(tmp.path().join("README.md"), "not a scene")?;

    let mut source = LogSource::open(tmp.path())?;
    let ids = source.list_file_ids()?;
    assert_eq!(ids, vec![FileID(3), FileID(7), FileID(12)]);

    let scene = source.read_scene(FileID(7))?;
    assert_eq!(scene.city, City::Miami);
    assert_eq!(scene.records.len(), 4);
    assert_eq!(scene.track_ids.len(), 2);
    assert!(scene
        .records
        .iter()
        .any(|r| r.object_type == ObjectType::Agent && r.pos == [111.0, 50.0]));

    assert!(source.read_scene(FileID(99)).is_err());
    assert_eq!(apply_percentage(ids, 0.34, 0.0)?, vec![FileID(3)]);
    Ok(())
}

#[test]
fn zip_source() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("val.zip");
    {
        let mut zip = zip::ZipWriter::new(fs::File::create(&path)?);
        let options = zip::write::FileOptions::default();
        for id in [2, 1] {
            zip.start_file(format!("data/{id}.csv"), options)?;
            zip.write_all(SCENE.as_bytes())?;
        }
        zip.start_file("other/5.csv", options)?;
        zip.write_all(SCENE.as_bytes())?;
        zip.finish()?;
    }

    let mut source = LogSource::open(&path)?;
    assert_eq!(source.list_file_ids()?, vec![FileID(1), FileID(2)]);
    let scene = source.read_scene(FileID(2))?;
    assert_eq!(scene.frames(), vec![0.0, 0.1]);
    Ok(())
}

#[test]
fn missing_directory() {
    assert!(LogSource::open("/definitely/not/here").is_err());
}
