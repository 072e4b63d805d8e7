// Copyright 2023 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! The [`CachingDatabase`] type.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::{Database, Error, KeyFilter, Result, SaveOptions};
use crate::object::{Manifest, Object, ObjectId, Synonyms};

/// A [`Database`] wrapper that remembers what it has read.
///
/// Each entry is keyed by [`ObjectId`] and expires `ttl` after it was
/// stored. Expired entries are dropped when they are next looked at,
/// and all of them are swept out whenever the number of entries has
/// doubled since the last sweep.
/// An entry either holds a copy of the object, records only that the
/// object exists (learned from [`Database::lookup`]), or, if negative
/// caching is enabled, records that the object does not exist.
///
/// Writes go straight to the wrapped database and invalidate the
/// affected entry.
pub struct CachingDatabase<D> {
    inner: D,
    ttl: Duration,
    negative: bool,
    entries: Mutex<HashMap<ObjectId, Entry>>,

    /// The entry count at which the next sweep happens. Only accessed
    /// with `entries` locked.
    sweep_at: AtomicUsize,
}

/// The smallest entry count that triggers a sweep.
const MIN_SWEEP_LEN: usize = 1024;

struct Entry {
    payload: Payload,
    expires_at: Instant,
}

#[derive(Clone)]
enum Payload {
    Present(Object),
    PresentFlag,
    AbsentFlag,
}

impl<D: Database> CachingDatabase<D> {
    /// Wraps `inner`. A zero `ttl` disables caching.
    pub fn new(inner: D, ttl: Duration, negative: bool) -> Self {
        Self {
            inner,
            ttl,
            negative,
            entries: Mutex::new(HashMap::new()),
            sweep_at: AtomicUsize::new(MIN_SWEEP_LEN),
        }
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Returns the number of entries, including expired ones that have
    /// not been dropped yet.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<HashMap<ObjectId, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cached(&self, id: &ObjectId) -> Option<Payload> {
        let mut entries = self.lock();
        match entries.get(id) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.payload.clone()),
            Some(_) => {
                entries.remove(id);
                None
            }
            None => None,
        }
    }

    fn store(&self, id: ObjectId, payload: Payload) {
        if self.ttl.is_zero() {
            return;
        }
        if matches!(payload, Payload::AbsentFlag) && !self.negative {
            return;
        }
        let now = Instant::now();
        let entry = Entry {
            payload,
            expires_at: now + self.ttl,
        };
        let mut entries = self.lock();
        entries.insert(id, entry);
        if entries.len() >= self.sweep_at.load(Ordering::Relaxed) {
            entries.retain(|_, entry| entry.expires_at > now);
            let sweep_at = MIN_SWEEP_LEN.max(2 * entries.len());
            self.sweep_at.store(sweep_at, Ordering::Relaxed);
        }
    }

    /// Records that `id` exists, without replacing a cached copy.
    fn store_presence(&self, id: &ObjectId) {
        if let Some(Payload::Present(_)) = self.cached(id) {
            return;
        }
        self.store(id.clone(), Payload::PresentFlag);
    }

    fn invalidate(&self, id: &ObjectId) {
        self.lock().remove(id);
    }

    /// Answers an exact-key lookup from the cache alone, if every class
    /// asked about has a live entry.
    fn cached_lookup(&self, classes: &[String], key: &str) -> Option<Vec<ObjectId>> {
        let mut ids = Vec::new();
        for class in classes {
            let id = self.inner.object_id(class, key);
            match self.cached(&id)? {
                Payload::Present(_) | Payload::PresentFlag => ids.push(id),
                Payload::AbsentFlag => (),
            }
        }
        Some(ids)
    }
}

impl<D: Database> Database for CachingDatabase<D> {
    fn name(&self) -> Option<&str> {
        self.inner.name()
    }

    fn synonyms(&self) -> &Synonyms {
        self.inner.synonyms()
    }

    fn classes(&self) -> Result<Vec<String>> {
        self.inner.classes()
    }

    fn lookup(&self, classes: Option<&[String]>, keys: &KeyFilter) -> Result<Vec<ObjectId>> {
        if let (Some(classes), KeyFilter::Exact(key)) = (classes, keys) {
            if let Some(mut ids) = self.cached_lookup(classes, key) {
                ids.sort();
                return Ok(ids);
            }
        }

        let ids = self.inner.lookup(classes, keys)?;
        for id in &ids {
            self.store_presence(id);
        }
        if let (Some(classes), KeyFilter::Exact(key)) = (classes, keys) {
            for class in classes {
                let id = self.inner.object_id(class, key);
                if !ids.contains(&id) {
                    self.store(id, Payload::AbsentFlag);
                }
            }
        }
        Ok(ids)
    }

    fn fetch(&self, class: &str, key: &str) -> Result<Object> {
        let id = self.inner.object_id(class, key);
        match self.cached(&id) {
            Some(Payload::Present(object)) => return Ok(object),
            Some(Payload::AbsentFlag) => return Err(Error::NotFound(id)),
            Some(Payload::PresentFlag) | None => (),
        }
        match self.inner.fetch(class, key) {
            Ok(object) => {
                self.store(id, Payload::Present(object.clone()));
                Ok(object)
            }
            Err(Error::NotFound(missing)) => {
                self.store(id, Payload::AbsentFlag);
                Err(Error::NotFound(missing))
            }
            Err(e) => Err(e),
        }
    }

    fn save(&self, object: &Object, options: SaveOptions) -> Result<()> {
        let id = self.inner.primary_spec(object);
        let result = self.inner.save(object, options);
        self.invalidate(&id);
        result
    }

    fn delete(&self, object: &Object) -> Result<()> {
        let id = self.inner.primary_spec(object);
        let result = self.inner.delete(object);
        self.invalidate(&id);
        if result.is_ok() {
            self.store(id, Payload::AbsentFlag);
        }
        result
    }

    fn manifest(&self) -> Result<Option<Manifest>> {
        self.inner.manifest()
    }

    fn set_manifest(&self, manifest: &Manifest) -> Result<()> {
        self.inner.set_manifest(manifest)
    }

    fn primary_class(&self, class: &str) -> String {
        self.inner.primary_class(class)
    }

    fn object_id(&self, class: &str, key: &str) -> ObjectId {
        self.inner.object_id(class, key)
    }

    fn primary_key(&self, object: &Object) -> String {
        self.inner.primary_key(object)
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;
    use crate::db::FileDatabase;

    fn make_cache(ttl: Duration, negative: bool) -> (TempDir, CachingDatabase<FileDatabase>) {
        let dir = TempDir::new().unwrap();
        let database = FileDatabase::create(dir.path(), "TEST").unwrap();
        database
            .save(&Object::new("mntner", "EX-MNT"), SaveOptions::default())
            .unwrap();
        (dir, CachingDatabase::new(database, ttl, negative))
    }

    #[test]
    fn expired_entries_are_swept() {
        let (_dir, cache) = make_cache(Duration::from_millis(10), true);
        for i in 0..1000 {
            assert!(cache.try_fetch("person", &format!("A{}", i)).unwrap().is_none());
        }
        assert_eq!(cache.len(), 1000);
        std::thread::sleep(Duration::from_millis(50));

        for i in 0..1000 {
            assert!(cache.try_fetch("person", &format!("B{}", i)).unwrap().is_none());
        }
        // The first thousand expired before the sweep at 1024 entries.
        assert!(cache.len() <= 1000);
    }

    #[test]
    fn hits_return_the_cached_copy() {
        let (dir, cache) = make_cache(Duration::from_secs(60), true);
        let first = cache.fetch("mntner", "EX-MNT").unwrap();
        assert_eq!(first, cache.inner().fetch("mntner", "EX-MNT").unwrap());

        // Changes behind the cache's back are not seen until expiry.
        fs::remove_file(dir.path().join("mntner/EX-MNT")).unwrap();
        assert_eq!(cache.fetch("mntner", "EX-MNT").unwrap(), first);
        cache.clear();
        assert!(cache.fetch("mntner", "EX-MNT").unwrap_err().is_not_found());
    }

    #[test]
    fn absence_is_cached_when_enabled() {
        let (dir, cache) = make_cache(Duration::from_secs(60), true);
        assert!(cache.try_fetch("mntner", "NEW-MNT").unwrap().is_none());
        fs::write(dir.path().join("mntner/NEW-MNT"), "mntner: NEW-MNT\n").unwrap();
        assert!(cache.try_fetch("mntner", "NEW-MNT").unwrap().is_none());

        let (dir, cache) = make_cache(Duration::from_secs(60), false);
        assert!(cache.try_fetch("mntner", "NEW-MNT").unwrap().is_none());
        fs::write(dir.path().join("mntner/NEW-MNT"), "mntner: NEW-MNT\n").unwrap();
        assert!(cache.try_fetch("mntner", "NEW-MNT").unwrap().is_some());
    }

    #[test]
    fn entries_expire() {
        let (dir, cache) = make_cache(Duration::from_millis(20), true);
        assert!(cache.try_fetch("mntner", "NEW-MNT").unwrap().is_none());
        fs::write(dir.path().join("mntner/NEW-MNT"), "mntner: NEW-MNT\n").unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert!(cache.try_fetch("mntner", "NEW-MNT").unwrap().is_some());
    }

    #[test]
    fn zero_ttl_disables_caching() {
        let (_dir, cache) = make_cache(Duration::ZERO, true);
        cache.fetch("mntner", "EX-MNT").unwrap();
        assert!(cache.is_empty());
    }

    #[test]
    fn lookup_populates_presence() {
        let (dir, cache) = make_cache(Duration::from_secs(60), true);
        let classes = vec!["mntner".to_owned()];
        assert_eq!(cache.lookup(Some(&classes), &KeyFilter::Any).unwrap().len(), 1);
        assert_eq!(cache.len(), 1);

        // A presence flag alone does not answer a fetch.
        fs::write(dir.path().join("mntner/EX-MNT"), "mntner: EX-MNT\ndescr: new\n").unwrap();
        assert_eq!(cache.fetch("mntner", "EX-MNT").unwrap().get("descr"), Some("new"));

        // Exact lookups are answered from the cache.
        fs::remove_file(dir.path().join("mntner/EX-MNT")).unwrap();
        assert_eq!(
            cache.lookup(Some(&classes), &KeyFilter::Exact("EX-MNT")).unwrap(),
            [ObjectId::new("mntner", "EX-MNT")]
        );
    }

    #[test]
    fn writes_invalidate() {
        let (_dir, cache) = make_cache(Duration::from_secs(60), true);
        cache.fetch("mntner", "EX-MNT").unwrap();
        let mut changed = Object::new("mntner", "EX-MNT");
        changed.push("descr", "changed");
        cache.save(&changed, SaveOptions::default()).unwrap();
        assert_eq!(cache.fetch("mntner", "EX-MNT").unwrap().get("descr"), Some("changed"));

        cache.delete(&changed).unwrap();
        assert!(cache.try_fetch("mntner", "EX-MNT").unwrap().is_none());
    }
}
