use std::collections::BTreeMap;

use argoverse::{City, FileID, ObjectID, ObjectType, RawRecord, SceneLog};

use crate::{linearity, DatasetConfig, Split};

/// One object that was observed at every timestep of a window.
#[derive(Clone, Debug)]
pub struct AgentTrack {
    pub object: ObjectID,
    pub class: ObjectType,
    /// Relative to the scene's map origin
    pub abs: Vec<[f64; 2]>,
    /// Displacement from the previous timestep; the first is zero
    pub rel: Vec<[f64; 2]>,
    pub mask: Vec<bool>,
    pub timestamps: Vec<f64>,
    /// None for the test split, which lacks the future
    pub non_linear: Option<bool>,
}

/// Every object fully observed inside one window of a scene.
#[derive(Clone, Debug)]
pub struct SceneWindow {
    pub file_id: FileID,
    pub city: City,
    /// Global position of the AGENT at the observation origin
    pub map_origin: [f64; 2],
    /// Ordered by object ID
    pub agents: Vec<AgentTrack>,
}

impl SceneWindow {
    /// The row of the single AGENT, if it's been retained.
    pub fn reference_row(&self) -> Option<usize> {
        let mut rows = self
            .agents
            .iter()
            .enumerate()
            .filter(|(_, a)| a.class == ObjectType::Agent)
            .map(|(idx, _)| idx);
        let row = rows.next()?;
        if rows.next().is_some() {
            return None;
        }
        Some(row)
    }

    /// Heading of the AGENT over its last two observed positions, in radians.
    pub fn reference_orientation(&self, obs_len: usize) -> Option<f64> {
        let agent = &self.agents[self.reference_row()?];
        if obs_len < 2 || agent.abs.len() < obs_len {
            return None;
        }
        let from = agent.abs[obs_len - 2];
        let to = agent.abs[obs_len - 1];
        Some((to[1] - from[1]).atan2(to[0] - from[0]))
    }

    /// Scenes need the AV and the AGENT at minimum.
    pub fn is_usable(&self, min_objs: usize) -> bool {
        self.agents.len() >= min_objs && self.reference_row().is_some()
    }
}

/// Extracts the tracks of every object present for the whole window beginning at frame `start`.
/// Returns None if the AGENT has no observation at the configured origin.
pub fn process_window(scene: &SceneLog, start: usize, cfg: &DatasetConfig) -> Option<SceneWindow> {
    let frames = scene.frames();
    if start >= frames.len() {
        return None;
    }
    let end = (start + cfg.window_len()).min(frames.len());
    let window = &frames[start..end];
    let frame_index = |t: f64| window.iter().position(|f| *f == t);

    let in_window: Vec<&RawRecord> = scene
        .records
        .iter()
        .filter(|r| r.timestamp >= window[0] && r.timestamp <= window[window.len() - 1])
        .collect();

    let map_origin = match in_window
        .iter()
        .filter(|r| r.object_type == ObjectType::Agent)
        .nth(cfg.obs_origin - 1)
    {
        Some(r) => r.pos,
        None => {
            debug!(
                "Scene {} has no AGENT observation {} in its window",
                scene.file_id, cfg.obs_origin
            );
            return None;
        }
    };

    let mut per_object: BTreeMap<ObjectID, Vec<&RawRecord>> = BTreeMap::new();
    for rec in in_window {
        per_object
            .entry(rec.object)
            .or_insert_with(Vec::new)
            .push(rec);
    }

    let track_len = cfg.window_len();
    let mut agents = Vec::new();
    for (object, mut recs) in per_object {
        if recs.len() != track_len {
            continue;
        }
        recs.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        // One record per frame, with no gaps
        let front = match frame_index(recs[0].timestamp) {
            Some(x) => x,
            None => continue,
        };
        if !recs
            .iter()
            .enumerate()
            .all(|(i, r)| frame_index(r.timestamp) == Some(front + i))
        {
            continue;
        }

        let abs: Vec<[f64; 2]> = recs
            .iter()
            .map(|r| [r.pos[0] - map_origin[0], r.pos[1] - map_origin[1]])
            .collect();
        let rel = relative_displacements(&abs);
        let non_linear = if cfg.split == Split::Test {
            None
        } else {
            Some(linearity::is_non_linear(&abs, &cfg.linearity))
        };
        agents.push(AgentTrack {
            object,
            class: recs[0].object_type,
            rel,
            mask: vec![true; track_len],
            timestamps: recs.iter().map(|r| r.timestamp).collect(),
            non_linear,
            abs,
        });
    }

    Some(SceneWindow {
        file_id: scene.file_id,
        city: scene.city,
        map_origin,
        agents,
    })
}

/// First-order differences, with a zero first step.
pub fn relative_displacements(abs: &[[f64; 2]]) -> Vec<[f64; 2]> {
    let mut rel = Vec::with_capacity(abs.len());
    if abs.is_empty() {
        return rel;
    }
    rel.push([0.0, 0.0]);
    for pair in abs.windows(2) {
        rel.push([pair[1][0] - pair[0][0], pair[1][1] - pair[0][1]]);
    }
    rel
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log(rows: &[(f64, &str, &str, f64, f64)]) -> SceneLog {
        let mut raw = "TIMESTAMP,TRACK_ID,OBJECT_TYPE,X,Y,CITY_NAME\n".to_string();
        for (t, id, kind, x, y) in rows {
            raw.push_str(&format!("{t},{id},{kind},{x},{y},PIT\n"));
        }
        SceneLog::load(FileID(1), raw.as_bytes()).unwrap()
    }

    fn small_cfg() -> DatasetConfig {
        DatasetConfig {
            obs_len: 2,
            pred_len: 2,
            ..Default::default()
        }
    }

    #[test]
    fn tracks_and_displacements() {
        let mut rows = Vec::new();
        for i in 0..4 {
            let t = i as f64 * 0.1;
            rows.push((t, "agent", "AGENT", 100.0 + i as f64, 200.0));
            rows.push((t, "av", "AV", 90.0, 200.0 + 2.0 * i as f64));
        }
        // Only seen at 3 of the 4 frames
        for i in 1..4 {
            rows.push((i as f64 * 0.1, "late", "OTHER", 0.0, 0.0));
        }
        let scene = log(&rows);
        let window = process_window(&scene, 0, &small_cfg()).unwrap();

        assert_eq!(window.map_origin, [100.0, 200.0]);
        assert_eq!(window.agents.len(), 2);
        assert!(window.is_usable(2));

        let agent = &window.agents[window.reference_row().unwrap()];
        assert_eq!(agent.abs, vec![[0.0, 0.0], [1.0, 0.0], [2.0, 0.0], [3.0, 0.0]]);
        assert_eq!(agent.rel[0], [0.0, 0.0]);
        for i in 1..4 {
            assert_eq!(agent.rel[i], [1.0, 0.0]);
        }
        assert_eq!(agent.non_linear, Some(false));
        assert_eq!(window.reference_orientation(2), Some(0.0));
    }

    #[test]
    fn gaps_are_discarded() {
        let mut rows = Vec::new();
        for i in 0..4 {
            let t = i as f64 * 0.1;
            rows.push((t, "agent", "AGENT", i as f64, 0.0));
        }
        // Four records, but two at the same frame and none at another
        for t in [0.0, 0.1, 0.1, 0.3] {
            rows.push((t, "dup", "OTHER", 5.0, 5.0));
        }
        let scene = log(&rows);
        let window = process_window(&scene, 0, &small_cfg()).unwrap();
        assert_eq!(window.agents.len(), 1);
        assert!(!window.is_usable(2));
    }

    #[test]
    fn test_split_keeps_only_observations() {
        let mut rows = Vec::new();
        for i in 0..2 {
            let t = i as f64 * 0.1;
            rows.push((t, "agent", "AGENT", i as f64, 0.0));
            rows.push((t, "av", "AV", 0.0, i as f64));
        }
        let scene = log(&rows);
        let cfg = DatasetConfig {
            split: Split::Test,
            ..small_cfg()
        };
        let window = process_window(&scene, 0, &cfg).unwrap();
        assert_eq!(window.agents.len(), 2);
        assert!(window.agents.iter().all(|a| a.non_linear.is_none()));
        assert!(window.agents.iter().all(|a| a.abs.len() == 2));
    }

    #[test]
    fn missing_origin() {
        let scene = log(&[(0.0, "av", "AV", 0.0, 0.0), (0.1, "av", "AV", 1.0, 0.0)]);
        assert!(process_window(&scene, 0, &small_cfg()).is_none());
    }
}
