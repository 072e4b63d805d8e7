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

//! Bringing a database in line with a stream of objects.
//!
//! [`sync`] upserts each object of a stream by its primary key and,
//! optionally, deletes the objects the stream no longer contains.
//! Writers are expected to run while no server is reading the same
//! database, or to accept that queries may see a partial update.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use log::{debug, info, warn};

use crate::db::{self, Database, KeyFilter, SaveOptions};
use crate::object::{Manifest, Object, ObjectId};
use crate::rpsl;

/// Options for [`sync`].
#[derive(Clone, Debug, Default)]
pub struct SyncOptions {
    /// If set, the `source` attribute of every incoming object is
    /// replaced with this value.
    pub source: Option<String>,

    /// Delete stored objects that the stream does not contain. Only the
    /// classes that appear in the stream (or `classes`, if given) are
    /// affected.
    pub delete_missing: bool,

    /// If set, objects of other classes are ignored.
    pub classes: Option<Vec<String>>,
}

/// What a call to [`sync`] did.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SyncReport {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deleted: usize,
    pub parse_errors: usize,
}

impl SyncReport {
    /// Whether the database was modified.
    pub fn changed(&self) -> bool {
        self.created + self.updated + self.deleted > 0
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} created, {} updated, {} unchanged, {} deleted, {} parse errors",
            self.created, self.updated, self.unchanged, self.deleted, self.parse_errors,
        )
    }
}

/// Synchronizes `database` with `objects`.
///
/// Objects are compared without their `source` and `last-modified`
/// attributes, so re-importing the same data leaves the store
/// untouched. Parse errors are logged and counted; storage errors abort
/// the sync. If anything changed, the database manifest's serial is
/// incremented.
pub fn sync<D, I>(database: &D, objects: I, options: &SyncOptions) -> db::Result<SyncReport>
where
    D: Database + ?Sized,
    I: IntoIterator<Item = Result<Object, rpsl::Error>>,
{
    let allowed: Option<Vec<String>> = options.classes.as_ref().map(|classes| {
        classes
            .iter()
            .map(|class| database.primary_class(class))
            .collect()
    });

    let mut report = SyncReport::default();
    let mut seen = HashSet::new();
    let mut touched_classes = BTreeSet::new();
    for result in objects {
        let mut object = match result {
            Ok(object) => object,
            Err(e) => {
                warn!("Skipping an unparsable object: {}", e);
                report.parse_errors += 1;
                continue;
            }
        };
        let id = database.primary_spec(&object);
        if let Some(ref allowed) = allowed {
            if !allowed.contains(&id.class) {
                continue;
            }
        }
        if let Some(ref source) = options.source {
            object.set("source", source.as_str());
        }

        match database.try_fetch(&id.class, &id.key)? {
            Some(existing) if existing.without_metadata() == object.without_metadata() => {
                report.unchanged += 1;
            }
            Some(_) => {
                debug!("Updating {}.", id);
                database.save(&object, SaveOptions::default())?;
                report.updated += 1;
            }
            None => {
                debug!("Creating {}.", id);
                database.save(&object, SaveOptions::default())?;
                report.created += 1;
            }
        }
        touched_classes.insert(id.class.clone());
        seen.insert(id);
    }

    if options.delete_missing {
        let classes: Vec<String> = match allowed {
            Some(allowed) => allowed,
            None => touched_classes.into_iter().collect(),
        };
        report.deleted = delete_unseen(database, &classes, &seen)?;
    }

    if report.changed() {
        let mut manifest = match database.manifest()? {
            Some(manifest) => manifest,
            None => Manifest::new(database.name().unwrap_or_default()),
        };
        manifest.bump();
        database.set_manifest(&manifest)?;
        info!("Synchronized to serial {}: {}.", manifest.serial, report);
    } else {
        info!("Synchronized without changes: {}.", report);
    }
    Ok(report)
}

/// Deletes the objects of `classes` that are not in `seen`, returning
/// how many were deleted.
fn delete_unseen<D>(database: &D, classes: &[String], seen: &HashSet<ObjectId>) -> db::Result<usize>
where
    D: Database + ?Sized,
{
    if classes.is_empty() {
        return Ok(0);
    }
    let mut deleted = 0;
    for id in database.lookup(Some(classes), &KeyFilter::Any)? {
        if seen.contains(&id) {
            continue;
        }
        let Some(object) = database.try_fetch(&id.class, &id.key)? else {
            continue;
        };
        debug!("Deleting {}.", id);
        database.delete(&object)?;
        deleted += 1;
    }
    Ok(deleted)
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
