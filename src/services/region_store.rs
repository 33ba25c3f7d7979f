//! Registered regions keyed by id
//!
//! Owned by the engine; every mutation runs on the engine task so readers
//! never see a partially applied update.

use crate::domain::error::GeofenceError;
use crate::domain::types::Region;
use rustc_hash::FxHashMap;

#[derive(Debug, Default)]
pub struct RegionStore {
    regions: FxHashMap<String, Region>,
}

impl RegionStore {
    pub fn new() -> Self {
        Self { regions: FxHashMap::default() }
    }

    /// Add a new region; fails if the id is taken
    pub fn register(&mut self, region: Region) -> Result<(), GeofenceError> {
        if self.regions.contains_key(&region.id) {
            return Err(GeofenceError::DuplicateId { id: region.id });
        }
        self.regions.insert(region.id.clone(), region);
        Ok(())
    }

    /// Replace an existing region, returning the previous definition
    pub fn update(&mut self, region: Region) -> Result<Region, GeofenceError> {
        match self.regions.get_mut(&region.id) {
            Some(slot) => Ok(std::mem::replace(slot, region)),
            None => Err(GeofenceError::NotFound { id: region.id }),
        }
    }

    pub fn unregister(&mut self, id: &str) -> Result<Region, GeofenceError> {
        self.regions
            .remove(id)
            .ok_or_else(|| GeofenceError::NotFound { id: id.to_string() })
    }

    pub fn get(&self, id: &str) -> Option<&Region> {
        self.regions.get(id)
    }

    /// Snapshot of all regions sorted by id
    pub fn list(&self) -> Vec<Region> {
        let mut regions: Vec<Region> = self.regions.values().cloned().collect();
        regions.sort_by(|a, b| a.id.cmp(&b.id));
        regions
    }

    /// Borrowing iterator in arbitrary order
    pub fn iter(&self) -> impl Iterator<Item = &Region> {
        self.regions.values()
    }

    /// Ids of regions whose expiry has passed at `now_ms`, sorted
    pub fn expired(&self, now_ms: u64) -> Vec<String> {
        let mut ids: Vec<String> = self
            .regions
            .values()
            .filter(|r| r.is_expired(now_ms))
            .map(|r| r.id.clone())
            .collect();
        ids.sort();
        ids
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{RegionSpec, TransitionKind};

    fn region(id: &str, radius: f64) -> Region {
        RegionSpec::new(id, 46.0, 14.5, radius, &[TransitionKind::Enter]).into_region(0).unwrap()
    }

    #[test]
    fn test_register_and_get() {
        let mut store = RegionStore::new();
        store.register(region("home", 200.0)).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("home").unwrap().radius_meters, 200.0);
        assert!(store.get("work").is_none());
    }

    #[test]
    fn test_register_duplicate() {
        let mut store = RegionStore::new();
        store.register(region("home", 200.0)).unwrap();
        let err = store.register(region("home", 300.0)).unwrap_err();
        assert_eq!(err, GeofenceError::DuplicateId { id: "home".to_string() });
        // Original is untouched
        assert_eq!(store.get("home").unwrap().radius_meters, 200.0);
    }

    #[test]
    fn test_update_replaces() {
        let mut store = RegionStore::new();
        store.register(region("home", 200.0)).unwrap();
        let previous = store.update(region("home", 250.0)).unwrap();
        assert_eq!(previous.radius_meters, 200.0);
        assert_eq!(store.get("home").unwrap().radius_meters, 250.0);
    }

    #[test]
    fn test_update_missing() {
        let mut store = RegionStore::new();
        let err = store.update(region("home", 200.0)).unwrap_err();
        assert!(matches!(err, GeofenceError::NotFound { .. }));
        assert!(store.is_empty());
    }

    #[test]
    fn test_unregister() {
        let mut store = RegionStore::new();
        store.register(region("home", 200.0)).unwrap();
        let removed = store.unregister("home").unwrap();
        assert_eq!(removed.id, "home");
        assert!(store.is_empty());
        assert!(matches!(store.unregister("home"), Err(GeofenceError::NotFound { .. })));
    }

    #[test]
    fn test_list_sorted() {
        let mut store = RegionStore::new();
        for id in ["work", "fitness", "home"] {
            store.register(region(id, 100.0)).unwrap();
        }
        let ids: Vec<String> = store.list().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["fitness", "home", "work"]);
    }

    #[test]
    fn test_expired() {
        let mut store = RegionStore::new();
        store.register(region("home", 100.0)).unwrap();
        store
            .register(
                RegionSpec::new("temp", 46.0, 14.5, 100.0, &[TransitionKind::Exit])
                    .with_expires_in_ms(1_000)
                    .into_region(500)
                    .unwrap(),
            )
            .unwrap();

        assert!(store.expired(1_499).is_empty());
        assert_eq!(store.expired(1_500), vec!["temp".to_string()]);
    }
}
