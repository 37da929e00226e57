use std::collections::BTreeMap;

use anyhow::Result;
use geom::{Distance, PolyLine, Pt2D};
use serde::Deserialize;

/// Candidate lane centerlines for one scene, in the global map frame. The first one is the most
/// plausible (the oracle).
pub fn load_centerlines<R: std::io::Read>(reader: R) -> Result<Vec<PolyLine>> {
    // Preserve the order centerlines first appear in, but allow their points to interleave
    let mut order = Vec::new();
    let mut points: BTreeMap<usize, Vec<Pt2D>> = BTreeMap::new();
    for rec in csv::Reader::from_reader(reader).deserialize() {
        let rec: Record = rec?;
        if !rec.x.is_finite() || !rec.y.is_finite() {
            bail!("Centerline {} has a non-finite point", rec.centerline);
        }
        if !points.contains_key(&rec.centerline) {
            order.push(rec.centerline);
        }
        points
            .entry(rec.centerline)
            .or_insert_with(Vec::new)
            .push(Pt2D::new(rec.x, rec.y));
    }

    let mut result = Vec::new();
    for id in order {
        let pts = points.remove(&id).unwrap_or_default();
        let pts = Pt2D::approx_dedupe(pts, Distance::meters(0.1));
        match PolyLine::new(pts) {
            Ok(pl) => result.push(pl),
            Err(err) => warn!("Skipping centerline {id}: {err}"),
        }
    }
    Ok(result)
}

#[derive(Deserialize)]
struct Record {
    #[serde(rename = "CENTERLINE")]
    centerline: usize,
    #[serde(rename = "X")]
    x: f64,
    #[serde(rename = "Y")]
    y: f64,
}
