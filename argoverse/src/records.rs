use anyhow::Result;
use serde::Deserialize;
use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::{orig, FileID, IDMapping, ObjectID};

/// The role of an object in a scene. The numeric values are the class ids stored in the cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum ObjectType {
    /// The vehicle recording the scene
    AV = 0,
    /// The object of interest that should be forecast
    Agent = 1,
    Other = 2,
}

impl ObjectType {
    pub fn parse(x: &str) -> Result<Self> {
        match x {
            "AV" => Ok(ObjectType::AV),
            "AGENT" => Ok(ObjectType::Agent),
            "OTHER" => Ok(ObjectType::Other),
            _ => bail!("Unknown OBJECT_TYPE {x}"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum City {
    Pittsburgh = 0,
    Miami = 1,
}

impl City {
    pub fn parse(x: &str) -> Result<Self> {
        match x {
            "PIT" => Ok(City::Pittsburgh),
            "MIA" => Ok(City::Miami),
            _ => bail!("Unknown CITY_NAME {x}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RawRecord {
    pub timestamp: f64,
    pub object: ObjectID,
    pub object_type: ObjectType,
    /// Global map frame
    pub pos: [f64; 2],
}

/// Every record of one scene file, in the order they were logged.
pub struct SceneLog {
    pub file_id: FileID,
    pub city: City,
    pub records: Vec<RawRecord>,
    pub track_ids: IDMapping<orig::TrackID, ObjectID>,
}

impl SceneLog {
    pub fn load<R: std::io::Read>(file_id: FileID, reader: R) -> Result<Self> {
        let mut track_ids = IDMapping::new();
        let mut records = Vec::new();
        let mut city = None;
        for rec in csv::Reader::from_reader(reader).deserialize() {
            let rec: Record = rec?;
            let rec_city = City::parse(&rec.city_name)?;
            match city {
                None => {
                    city = Some(rec_city);
                }
                Some(c) if c != rec_city => {
                    bail!("Scene {file_id} mixes cities {:?} and {:?}", c, rec_city);
                }
                _ => {}
            }
            records.push(RawRecord {
                timestamp: rec.timestamp,
                object: track_ids.insert_idempotent(&rec.track_id),
                object_type: ObjectType::parse(&rec.object_type)?,
                pos: [rec.x, rec.y],
            });
        }
        let city = match city {
            Some(c) => c,
            None => bail!("Scene {file_id} has no records"),
        };
        // Stable, so records sharing a timestamp keep their logged order
        records.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        debug!(
            "Scene {file_id}: {} records of {} tracks",
            records.len(),
            track_ids.len()
        );
        Ok(Self {
            file_id,
            city,
            records,
            track_ids,
        })
    }

    /// The sorted, unique timestamps of this scene.
    pub fn frames(&self) -> Vec<f64> {
        let mut frames: Vec<f64> = self.records.iter().map(|r| r.timestamp).collect();
        frames.dedup();
        frames
    }
}

#[derive(Deserialize)]
struct Record {
    #[serde(rename = "TIMESTAMP")]
    timestamp: f64,
    #[serde(rename = "TRACK_ID")]
    track_id: orig::TrackID,
    #[serde(rename = "OBJECT_TYPE")]
    object_type: String,
    #[serde(rename = "X")]
    x: f64,
    #[serde(rename = "Y")]
    y: f64,
    #[serde(rename = "CITY_NAME")]
    city_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOG: &str = "TIMESTAMP,TRACK_ID,OBJECT_TYPE,X,Y,CITY_NAME
315969629.1,av,AV,10.0,5.0,PIT
315969629.0,agent,AGENT,1.0,2.0,PIT
315969629.0,av,AV,9.0,5.0,PIT
315969629.1,agent,AGENT,1.5,2.0,PIT
";

    #[test]
    fn parse_and_sort() {
        let scene = SceneLog::load(FileID(3), LOG.as_bytes()).unwrap();
        assert_eq!(scene.city, City::Pittsburgh);
        assert_eq!(scene.frames(), vec![315969629.0, 315969629.1]);
        assert_eq!(scene.records[0].object_type, ObjectType::Agent);
        assert_eq!(scene.records[1].object_type, ObjectType::AV);
        // IDs follow the logged order, not the sorted order
        assert_eq!(scene.records[1].object, ObjectID(0));
        assert_eq!(scene.records[0].object, ObjectID(1));
    }

    #[test]
    fn reject_bad_input() {
        let mixed = "TIMESTAMP,TRACK_ID,OBJECT_TYPE,X,Y,CITY_NAME
0.0,a,AV,0.0,0.0,PIT
0.1,a,AV,0.0,0.0,MIA
";
        assert!(SceneLog::load(FileID(0), mixed.as_bytes()).is_err());

        let empty = "TIMESTAMP,TRACK_ID,OBJECT_TYPE,X,Y,CITY_NAME\n";
        assert!(SceneLog::load(FileID(0), empty.as_bytes()).is_err());

        let bad_type = "TIMESTAMP,TRACK_ID,OBJECT_TYPE,X,Y,CITY_NAME
0.0,a,BUS,0.0,0.0,PIT
";
        assert!(SceneLog::load(FileID(0), bad_type.as_bytes()).is_err());
    }
}
