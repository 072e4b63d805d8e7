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

//! The [`FileDatabase`] type.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use log::debug;

use super::{Database, Error, KeyFilter, Result, SaveOptions};
use crate::object::{Manifest, Object, ObjectId, Synonyms};
use crate::rpsl::{Parser, PrettyPrinter};

/// The name of the manifest file in the database root.
pub const MANIFEST: &str = "MANIFEST";

/// A [`Database`] keeping each object in its own file.
///
/// Objects are stored at `<root>/<class>/<key>`, where `<class>` is the
/// primary class and `<key>` is the primary key with `/` replaced by
/// `_`. Files and directories whose names start with `.` are ignored,
/// as are files whose names are not valid UTF-8. The database's name
/// comes from the `MANIFEST` file in the root, if there is one.
///
/// In case-insensitive mode, keys are lower-cased before they are
/// mapped to file names.
#[derive(Debug)]
pub struct FileDatabase {
    root: PathBuf,
    name: Option<String>,
    case_insensitive: bool,
    synonyms: Synonyms,
}

impl FileDatabase {
    /// Opens the database in the existing directory `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let metadata = fs::metadata(&root).map_err(|e| Error::storage(&root, e))?;
        if !metadata.is_dir() {
            return Err(Error::storage(
                &root,
                io::Error::new(io::ErrorKind::Other, "not a directory"),
            ));
        }
        let mut database = Self {
            root,
            name: None,
            case_insensitive: false,
            synonyms: Synonyms::default(),
        };
        database.name = database.manifest()?.map(|manifest| manifest.database);
        debug!(
            "Opened file database {:?} at {}",
            database.name,
            database.root.display()
        );
        Ok(database)
    }

    /// Creates (if necessary) the directory `root` and opens a database
    /// in it. If the database has no manifest yet, one naming it
    /// `name` is written.
    pub fn create(root: impl Into<PathBuf>, name: &str) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| Error::storage(&root, e))?;
        let mut database = Self::open(root)?;
        if database.name.is_none() {
            database.set_manifest(&Manifest::new(name))?;
            database.name = Some(name.to_owned());
        }
        Ok(database)
    }

    pub fn with_case_insensitive(mut self, case_insensitive: bool) -> Self {
        self.case_insensitive = case_insensitive;
        self
    }

    pub fn with_synonyms(mut self, synonyms: Synonyms) -> Self {
        self.synonyms = synonyms;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the directory of `class`, or `None` if the class name
    /// could name something outside the root.
    fn class_dir(&self, class: &str) -> Option<PathBuf> {
        if is_safe_file_name(class) {
            Some(self.root.join(class))
        } else {
            None
        }
    }

    /// Returns the file of `id`, or `None` if the class or key could
    /// name something other than a file in a class directory.
    fn object_path(&self, id: &ObjectId) -> Option<PathBuf> {
        let name = sanitize_key(&id.key);
        if is_safe_file_name(&name) {
            Some(self.class_dir(&id.class)?.join(name))
        } else {
            None
        }
    }

    /// Like [`FileDatabase::object_path`], for writes.
    fn writable_path(&self, id: &ObjectId) -> Result<PathBuf> {
        self.object_path(id).ok_or_else(|| {
            Error::storage(
                &self.root,
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("{} cannot be stored", id),
                ),
            )
        })
    }

    fn read_object(&self, path: &Path) -> Result<Option<Object>> {
        let octets = match fs::read(path) {
            Ok(octets) => octets,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::storage(path, e)),
        };
        match Parser::new(&octets[..]).next() {
            Some(Ok(object)) => Ok(Some(object)),
            Some(Err(source)) => Err(Error::Parse {
                path: path.to_owned(),
                source,
            }),
            None => Err(Error::EmptyObject(path.to_owned())),
        }
    }

    /// Writes `object` to `path` through a staging file in the same
    /// directory, so that readers never see a partial file.
    fn write_object(&self, path: &Path, object: &Object) -> Result<()> {
        let dir = path.parent().unwrap_or(self.root.as_path());
        fs::create_dir_all(dir).map_err(|e| Error::storage(dir, e))?;
        let staging_path = dir.join(format!(".tmp-{:016x}", rand::random::<u64>()));
        let text = PrettyPrinter::default().format(object);

        let result = File::create(&staging_path)
            .and_then(|mut file| file.write_all(text.as_bytes()))
            .and_then(|()| fs::rename(&staging_path, path));
        if let Err(e) = result {
            let _ = fs::remove_file(&staging_path);
            return Err(Error::storage(path, e));
        }
        Ok(())
    }

    /// Lists the keys stored in a class directory.
    fn keys(&self, class: &str) -> Result<Vec<String>> {
        let Some(dir) = self.class_dir(class) else {
            return Ok(Vec::new());
        };
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::storage(&dir, e)),
        };
        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::storage(&dir, e))?;
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') {
                    keys.push(unsanitize_key(name));
                }
            }
        }
        Ok(keys)
    }
}

impl Database for FileDatabase {
    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn synonyms(&self) -> &Synonyms {
        &self.synonyms
    }

    fn classes(&self) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.root).map_err(|e| Error::storage(&self.root, e))?;
        let mut classes = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::storage(&self.root, e))?;
            let is_dir = entry
                .file_type()
                .map_err(|e| Error::storage(entry.path(), e))?
                .is_dir();
            if let Some(name) = entry.file_name().to_str() {
                if is_dir && !name.starts_with('.') {
                    classes.push(name.to_owned());
                }
            }
        }
        classes.sort();
        Ok(classes)
    }

    fn lookup(&self, classes: Option<&[String]>, keys: &KeyFilter) -> Result<Vec<ObjectId>> {
        let classes = match classes {
            Some(classes) => classes.iter().map(|c| self.primary_class(c)).collect(),
            None => self.classes()?,
        };

        let mut ids = Vec::new();
        for class in classes {
            match keys {
                KeyFilter::Exact(key) => {
                    let id = self.object_id(&class, key);
                    if self.object_path(&id).map_or(false, |path| path.is_file()) {
                        ids.push(id);
                    }
                }
                KeyFilter::Set(set) => {
                    for key in set.iter() {
                        let id = self.object_id(&class, key);
                        let exists = self.object_path(&id).map_or(false, |path| path.is_file());
                        if exists && !ids.contains(&id) {
                            ids.push(id);
                        }
                    }
                }
                KeyFilter::Any | KeyFilter::Predicate(_) => {
                    for key in self.keys(&class)? {
                        if keys.matches(&key) {
                            ids.push(ObjectId::new(class.as_str(), key));
                        }
                    }
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn fetch(&self, class: &str, key: &str) -> Result<Object> {
        let id = self.object_id(class, key);
        let Some(path) = self.object_path(&id) else {
            return Err(Error::NotFound(id));
        };
        let mut object = match self.read_object(&path)? {
            Some(object) => object,
            None => return Err(Error::NotFound(id)),
        };

        if let Some(name) = &self.name {
            if object.source().is_none() {
                object.push("source", name.as_str());
            }
            if object.last_modified().is_none() {
                let modified = fs::metadata(&path)
                    .and_then(|metadata| metadata.modified())
                    .map_err(|e| Error::storage(&path, e))?;
                let modified = DateTime::<Utc>::from(modified);
                object.set(
                    "last-modified",
                    modified.to_rfc3339_opts(SecondsFormat::Secs, true),
                );
            }
        }
        Ok(object)
    }

    fn save(&self, object: &Object, options: SaveOptions) -> Result<()> {
        let id = self.primary_spec(object);
        let path = self.writable_path(&id)?;
        let is_own = match (&self.name, object.source()) {
            (Some(name), Some(source)) => name.eq_ignore_ascii_case(source),
            _ => false,
        };
        if is_own && !options.keep_metadata {
            self.write_object(&path, &object.without_metadata())
        } else {
            self.write_object(&path, object)
        }
    }

    fn delete(&self, object: &Object) -> Result<()> {
        let id = self.primary_spec(object);
        let Some(path) = self.object_path(&id) else {
            return Err(Error::NotFound(id));
        };
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Error::NotFound(id)),
            Err(e) => Err(Error::storage(path, e)),
        }
    }

    fn manifest(&self) -> Result<Option<Manifest>> {
        let object = self.read_object(&self.root.join(MANIFEST))?;
        Ok(object.as_ref().and_then(Manifest::from_object))
    }

    fn set_manifest(&self, manifest: &Manifest) -> Result<()> {
        self.write_object(&self.root.join(MANIFEST), &manifest.to_object())
    }

    fn object_id(&self, class: &str, key: &str) -> ObjectId {
        let key = key.trim();
        if self.case_insensitive {
            ObjectId::new(self.primary_class(class), key.to_lowercase())
        } else {
            ObjectId::new(self.primary_class(class), key)
        }
    }
}

/// Whether `name` is a single, ordinary path component.
fn is_safe_file_name(name: &str) -> bool {
    !matches!(name, "" | "." | "..")
        && !name.contains(|c: char| matches!(c, '/' | '\\' | '\0'))
}

fn sanitize_key(key: &str) -> String {
    key.replace('/', "_")
}

fn unsanitize_key(name: &str) -> String {
    name.replace('_', "/")
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
