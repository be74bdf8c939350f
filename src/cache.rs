// Lookup Cache - memoized foreign-key resolution for one run
//
// Organization name -> id and external project slug -> internal slug. Hits and
// misses are both remembered; each distinct miss is reported exactly once even
// when many workers ask for it at the same time.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefKind {
    Organization,
    ProjectSlug,
}

/// A reference that never resolved during the run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MissingRef {
    pub kind: RefKind,
    pub key: String,
}

#[derive(Default)]
struct CacheState {
    organizations: HashMap<String, i64>,
    slugs: HashMap<String, String>,
    missing: HashSet<MissingRef>,
    /// Same entries as `missing`, in the order they were first reported.
    reported: Vec<MissingRef>,
}

impl CacheState {
    fn is_missing(&self, kind: RefKind, key: &str) -> bool {
        self.missing.contains(&MissingRef {
            kind,
            key: key.to_string(),
        })
    }

    fn note_miss(&mut self, kind: RefKind, key: &str) {
        let miss = MissingRef {
            kind,
            key: key.to_string(),
        };
        if self.missing.insert(miss.clone()) {
            match kind {
                RefKind::Organization => warn!("Organization not found in store: {}", key),
                RefKind::ProjectSlug => warn!("Project slug not found in store: {}", key),
            }
            self.reported.push(miss);
        }
    }
}

#[derive(Default)]
pub struct LookupCache {
    state: Mutex<CacheState>,
}

impl LookupCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve an organization name to its id. `Ok(None)` when unknown.
    pub fn organization_id(
        &self,
        store: &dyn Store,
        name: &str,
    ) -> Result<Option<i64>, StoreError> {
        {
            let state = self.state.lock();
            if let Some(id) = state.organizations.get(name) {
                debug!("org found in cache {} -> {}", name, id);
                return Ok(Some(*id));
            }
            if state.is_missing(RefKind::Organization, name) {
                return Ok(None);
            }
        }

        let found = store.organization_id(name)?;

        let mut state = self.state.lock();
        match found {
            Some(id) => {
                debug!("org found in store {} -> {}", name, id);
                state.organizations.insert(name.to_string(), id);
            }
            None => state.note_miss(RefKind::Organization, name),
        }
        Ok(found)
    }

    /// Resolve an external project slug to the store's own slug.
    pub fn internal_slug(
        &self,
        store: &dyn Store,
        external_slug: &str,
    ) -> Result<Option<String>, StoreError> {
        {
            let state = self.state.lock();
            if let Some(slug) = state.slugs.get(external_slug) {
                debug!("slug found in cache {} -> {}", external_slug, slug);
                return Ok(Some(slug.clone()));
            }
            if state.is_missing(RefKind::ProjectSlug, external_slug) {
                return Ok(None);
            }
        }

        let found = store.internal_slug(external_slug)?;

        let mut state = self.state.lock();
        match &found {
            Some(slug) => {
                debug!("slug found in store {} -> {}", external_slug, slug);
                state.slugs.insert(external_slug.to_string(), slug.clone());
            }
            None => state.note_miss(RefKind::ProjectSlug, external_slug),
        }
        Ok(found)
    }

    /// Distinct unresolved references, in first-seen order.
    pub fn missing(&self) -> Vec<MissingRef> {
        self.state.lock().reported.clone()
    }

    pub fn missing_keys(&self, kind: RefKind) -> Vec<String> {
        self.state
            .lock()
            .reported
            .iter()
            .filter(|m| m.kind == kind)
            .map(|m| m.key.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{seeded_store, CountingStore};
    use std::sync::Barrier;

    #[test]
    fn test_hit_is_cached() {
        let store = CountingStore::new(seeded_store());
        let cache = LookupCache::new();

        let first = cache.organization_id(&store, "Acme").unwrap();
        let second = cache.organization_id(&store, "Acme").unwrap();

        assert!(first.is_some());
        assert_eq!(first, second);
        assert_eq!(store.lookups(), 1);
        assert!(cache.missing().is_empty());
    }

    #[test]
    fn test_slug_resolution() {
        let store = CountingStore::new(seeded_store());
        let cache = LookupCache::new();

        assert_eq!(
            cache.internal_slug(&store, "sf-kubernetes").unwrap(),
            Some("cncf/kubernetes".to_string())
        );
        assert_eq!(cache.internal_slug(&store, "sf-unknown").unwrap(), None);
        assert_eq!(cache.internal_slug(&store, "sf-unknown").unwrap(), None);

        assert_eq!(store.lookups(), 2);
        assert_eq!(cache.missing_keys(RefKind::ProjectSlug), vec!["sf-unknown"]);
        assert!(cache.missing_keys(RefKind::Organization).is_empty());
    }

    #[test]
    fn test_concurrent_miss_reported_once() {
        let store = seeded_store();
        let cache = LookupCache::new();
        let barrier = Barrier::new(50);

        std::thread::scope(|s| {
            for _ in 0..50 {
                s.spawn(|| {
                    barrier.wait();
                    assert_eq!(cache.organization_id(&store, "Nowhere Inc").unwrap(), None);
                });
            }
        });

        assert_eq!(
            cache.missing(),
            vec![MissingRef {
                kind: RefKind::Organization,
                key: "Nowhere Inc".to_string()
            }]
        );
    }
}
