use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub mod orig {
    use serde::{Deserialize, Serialize};

    /// The track UUID exactly as it appears in a log.
    #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    pub struct TrackID(pub String);
}

/// Dense per-scene object ID, assigned in order of first appearance in the log.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectID(pub usize);

/// The numeric name of a scene file, `<file_id>.csv`
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FileID(pub u64);

impl std::fmt::Display for FileID {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl CheapID for ObjectID {
    fn new(x: usize) -> Self {
        Self(x)
    }
}

pub trait CheapID: Copy {
    fn new(x: usize) -> Self;
}

#[derive(Clone, Serialize, Deserialize)]
pub struct IDMapping<K: Ord, V> {
    orig_to_cheap: BTreeMap<K, V>,
}

impl<K: Clone + std::fmt::Debug + Ord, V: CheapID> IDMapping<K, V> {
    pub fn new() -> Self {
        Self {
            orig_to_cheap: BTreeMap::new(),
        }
    }

    pub fn insert_idempotent(&mut self, orig: &K) -> V {
        match self.orig_to_cheap.get(orig) {
            Some(x) => *x,
            None => {
                let v = V::new(self.orig_to_cheap.len());
                self.orig_to_cheap.insert(orig.clone(), v);
                v
            }
        }
    }

    pub fn len(&self) -> usize {
        self.orig_to_cheap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orig_to_cheap.is_empty()
    }
}

impl<K: Clone + std::fmt::Debug + Ord, V: CheapID> Default for IDMapping<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_follow_first_appearance() {
        let mut ids: IDMapping<orig::TrackID, ObjectID> = IDMapping::new();
        let a = orig::TrackID("00000000-0000-0000-0000-000000000007".to_string());
        let b = orig::TrackID("00000000-0000-0000-0000-000000000001".to_string());
        assert_eq!(ids.insert_idempotent(&a), ObjectID(0));
        assert_eq!(ids.insert_idempotent(&b), ObjectID(1));
        assert_eq!(ids.insert_idempotent(&a), ObjectID(0));
        assert_eq!(ids.len(), 2);
    }
}
