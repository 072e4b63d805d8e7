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

//! Facilities for storing and accessing registry objects.
//!
//! The core of this module is the [`Database`] trait, which abstracts
//! object storage from the query engine. A database holds objects
//! addressed by an [`ObjectId`]: the object's primary class and its
//! primary key. The essential operations are enumerating identifiers
//! ([`Database::lookup`]), fetching a single object
//! ([`Database::fetch`]), and saving or deleting objects. Searching by
//! attribute value is provided on top of these.
//!
//! ## Provided implementations
//!
//! The [`FileDatabase`] keeps one file per object in a directory per
//! class. The [`CachingDatabase`] wraps any other database and keeps
//! recently read objects (and the knowledge that an object is absent)
//! in memory for a bounded time.

use crate::object::{Manifest, Object, ObjectId, Synonyms};
use crate::util::Caseless;

mod cache;
mod error;
mod file;

pub use cache::CachingDatabase;
pub use error::{Error, Result};
pub use file::FileDatabase;

////////////////////////////////////////////////////////////////////////
// FILTERS AND OPTIONS                                                //
////////////////////////////////////////////////////////////////////////

/// Selects object keys in [`Database::lookup`].
#[derive(Clone, Copy)]
pub enum KeyFilter<'a> {
    Any,
    Exact(&'a str),
    Set(&'a [String]),
    Predicate(&'a dyn Fn(&str) -> bool),
}

impl KeyFilter<'_> {
    /// Returns whether `key` passes the filter.
    pub fn matches(&self, key: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(exact) => *exact == key,
            Self::Set(set) => set.iter().any(|k| k == key),
            Self::Predicate(predicate) => predicate(key),
        }
    }
}

/// Options for [`Database::save`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SaveOptions {
    /// Keep `source` and `last-modified` even when they would be
    /// synthesized again on read.
    pub keep_metadata: bool,
}

/// A disjunction of attribute conditions for [`Database::search`]. An
/// object matches if any of its attributes has one of the condition's
/// keys and one of its values.
///
/// Keys and values are compared without regard to ASCII case. A value
/// holding a comma-separated list matches if any list item does.
#[derive(Clone, Debug, Default)]
pub struct Search {
    conditions: Vec<(String, Vec<String>)>,
}

impl Search {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a condition.
    pub fn with(mut self, key: impl Into<String>, values: Vec<String>) -> Self {
        self.conditions.push((key.into(), values));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn matches(&self, object: &Object) -> bool {
        object.iter().any(|(key, value)| {
            self.conditions
                .iter()
                .filter(|(k, _)| Caseless(k) == Caseless(key))
                .any(|(_, wanted)| value_matches(value, wanted))
        })
    }
}

fn value_matches(value: &str, wanted: &[String]) -> bool {
    let value = value.split('#').next().unwrap_or_default();
    let candidates = std::iter::once(value.trim()).chain(value.split(',').map(str::trim));
    candidates
        .filter(|item| !item.is_empty())
        .any(|item| wanted.iter().any(|w| Caseless(w.trim()) == Caseless(item)))
}

////////////////////////////////////////////////////////////////////////
// THE DATABASE TRAIT                                                 //
////////////////////////////////////////////////////////////////////////

/// Trait for object stores.
///
/// Classes are always passed around in their primary form (see
/// [`Database::primary_class`]); implementations apply the
/// canonicalization to the class names they receive.
pub trait Database: Send + Sync {
    /// The name of the database, which is also the `source` of the
    /// objects it holds, if known.
    fn name(&self) -> Option<&str>;

    /// The class synonym table used by this database.
    fn synonyms(&self) -> &Synonyms;

    /// Lists the primary classes for which objects may be present.
    fn classes(&self) -> Result<Vec<String>>;

    /// Enumerates the identifiers of stored objects, restricted to the
    /// given classes (all classes if `None`) and keys.
    fn lookup(&self, classes: Option<&[String]>, keys: &KeyFilter) -> Result<Vec<ObjectId>>;

    /// Fetches an object. Fails with [`Error::NotFound`] if absent.
    /// Implementations that know their own name add `source` and
    /// `last-modified` attributes to objects that lack them.
    fn fetch(&self, class: &str, key: &str) -> Result<Object>;

    /// Persists an object under its primary class and primary key.
    fn save(&self, object: &Object, options: SaveOptions) -> Result<()>;

    /// Removes an object.
    fn delete(&self, object: &Object) -> Result<()>;

    /// Returns the database manifest, if there is one.
    fn manifest(&self) -> Result<Option<Manifest>> {
        Ok(None)
    }

    /// Replaces the database manifest.
    fn set_manifest(&self, _manifest: &Manifest) -> Result<()> {
        Ok(())
    }

    /// A non-failing variant of [`Database::fetch`] for absent objects.
    /// Other errors are still reported.
    fn try_fetch(&self, class: &str, key: &str) -> Result<Option<Object>> {
        match self.fetch(class, key) {
            Ok(object) => Ok(Some(object)),
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Returns the canonical name of `class`.
    fn primary_class(&self, class: &str) -> String {
        self.synonyms().primary_class(class)
    }

    /// Returns the identifier under which an object of the given class
    /// and primary key is stored.
    fn object_id(&self, class: &str, key: &str) -> ObjectId {
        ObjectId::new(self.primary_class(class), key.trim())
    }

    fn primary_key(&self, object: &Object) -> String {
        object.primary_key()
    }

    /// Returns the identifier under which `object` is stored.
    fn primary_spec(&self, object: &Object) -> ObjectId {
        self.object_id(object.class(), &self.primary_key(object))
    }

    /// Returns the objects, among those selected by `classes` and
    /// `keys`, that match `search`.
    fn search(
        &self,
        search: &Search,
        classes: Option<&[String]>,
        keys: &KeyFilter,
    ) -> Result<Vec<Object>> {
        let mut found = Vec::new();
        for id in self.lookup(classes, keys)? {
            if let Some(object) = self.try_fetch(&id.class, &id.key)? {
                if search.matches(&object) {
                    found.push(object);
                }
            }
        }
        Ok(found)
    }

    /// Returns the objects in which any of `inverse_keys` has any of
    /// `inverse_values`.
    fn search_inverse(
        &self,
        inverse_keys: &[String],
        inverse_values: &[String],
        classes: Option<&[String]>,
    ) -> Result<Vec<Object>> {
        let search = inverse_keys.iter().fold(Search::new(), |search, key| {
            search.with(key.as_str(), inverse_values.to_vec())
        });
        if search.is_empty() {
            return Ok(Vec::new());
        }
        self.search(&search, classes, &KeyFilter::Any)
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_filters_work() {
        let set = vec!["A".to_owned(), "B".to_owned()];
        let even = |key: &str| key.len() % 2 == 0;
        assert!(KeyFilter::Any.matches("x"));
        assert!(KeyFilter::Exact("x").matches("x"));
        assert!(!KeyFilter::Exact("x").matches("X"));
        assert!(KeyFilter::Set(&set).matches("B"));
        assert!(!KeyFilter::Set(&set).matches("C"));
        assert!(KeyFilter::Predicate(&even).matches("ab"));
        assert!(!KeyFilter::Predicate(&even).matches("abc"));
    }

    #[test]
    fn search_matches_any_condition() {
        let object: Object = "mntner: EX-MNT\n\
                              admin-c: JD1-TEST\n\
                              mnt-by: EX-MNT, OTHER-MNT # self\n"
            .parse()
            .unwrap();
        let search = Search::new().with("tech-c", vec!["JD1-TEST".to_owned()]);
        assert!(!search.matches(&object));
        let search = search.with("ADMIN-C", vec!["jd1-test".to_owned()]);
        assert!(search.matches(&object));
        let list = Search::new().with("mnt-by", vec!["other-mnt".to_owned()]);
        assert!(list.matches(&object));
    }
}
