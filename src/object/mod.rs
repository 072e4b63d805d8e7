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

//! The registry object model.
//!
//! An [`Object`] is an ordered list of `key: value` [`Attribute`]s. The
//! first attribute is special: its key names the object's class, and
//! its value is the object's key. Everything else about an object
//! (its primary key, its source, the network it describes, and so on)
//! is derived from the attribute list on demand.
//!
//! Class-specific behavior is exposed through [`Object::typed`], which
//! produces a [`Typed`] view for the classes the query engine needs to
//! understand (networks, routes, AS numbers, and handles).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::rpsl::{self, PrettyPrinter};
use crate::util::Caseless;

pub mod class;
mod manifest;
mod typed;

pub use class::Synonyms;
pub use manifest::Manifest;
pub use typed::{AsBlock, AutNum, Handle, Inetnum, Route, Typed};

////////////////////////////////////////////////////////////////////////
// ATTRIBUTES AND OBJECTS                                             //
////////////////////////////////////////////////////////////////////////

/// A single `key: value` pair of an [`Object`]. Multi-line values
/// contain the configured newline sequence between their lines.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Attribute {
    pub key: String,
    pub value: String,
}

impl Attribute {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A registry object.
///
/// Attribute order is significant and is preserved. An `Object` always
/// has at least one attribute.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Object {
    attributes: Vec<Attribute>,
}

impl Object {
    /// Creates a new `Object` with only its class attribute.
    pub fn new(class: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            attributes: vec![Attribute::new(class, key)],
        }
    }

    /// Creates an `Object` from a list of attributes. Returns `None` if
    /// the list is empty.
    pub fn from_attributes(attributes: Vec<Attribute>) -> Option<Self> {
        if attributes.is_empty() {
            None
        } else {
            Some(Self { attributes })
        }
    }

    /// Returns the object's class, as written in its first attribute.
    pub fn class(&self) -> &str {
        &self.attributes[0].key
    }

    /// Returns the object's key (the value of its first attribute).
    pub fn key(&self) -> &str {
        &self.attributes[0].value
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn into_attributes(self) -> Vec<Attribute> {
        self.attributes
    }

    /// Returns an iterator over the `(key, value)` pairs of the object.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes
            .iter()
            .map(|attr| (attr.key.as_str(), attr.value.as_str()))
    }

    /// Returns the first value of the given key. Keys are matched
    /// without regard to ASCII case.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|attr| Caseless(&attr.key) == Caseless(key))
            .map(|attr| attr.value.as_str())
    }

    /// Returns all values of the given key, in order.
    pub fn get_all<'a, 'k>(&'a self, key: &'k str) -> impl Iterator<Item = &'a str> + 'k
    where
        'a: 'k,
    {
        self.attributes
            .iter()
            .filter(move |attr| Caseless(&attr.key) == Caseless(key))
            .map(|attr| attr.value.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Appends an attribute.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.push(Attribute::new(key, value));
    }

    /// Sets the value of `key`. The first occurrence is replaced and any
    /// later occurrences are removed; if the key is absent, it is
    /// appended.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        match self
            .attributes
            .iter()
            .position(|attr| Caseless(&attr.key) == Caseless(key))
        {
            Some(index) => {
                self.attributes[index].value = value.into();
                let mut i = 0;
                self.attributes.retain(|attr| {
                    i += 1;
                    i - 1 <= index || Caseless(&attr.key) != Caseless(key)
                });
            }
            None => self.push(key, value),
        }
    }

    /// Removes every occurrence of `key` except the class attribute,
    /// returning how many were removed.
    pub fn remove(&mut self, key: &str) -> usize {
        let before = self.attributes.len();
        let mut first = true;
        self.attributes.retain(|attr| {
            let keep = first || Caseless(&attr.key) != Caseless(key);
            first = false;
            keep
        });
        before - self.attributes.len()
    }

    /// Returns the database this object originates from: the first
    /// token of the `source` attribute, ignoring any `#` comment.
    pub fn source(&self) -> Option<&str> {
        let value = self.get("source")?;
        let value = value.split('#').next().unwrap_or_default();
        value.split_whitespace().next()
    }

    /// Returns the parsed `last-modified` timestamp, if present and
    /// valid.
    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        let value = self.get("last-modified")?;
        DateTime::parse_from_rfc3339(value.trim())
            .ok()
            .map(|time| time.with_timezone(&Utc))
    }

    /// Returns the object's primary key. For most classes this is the
    /// object key, but some classes are identified by other fields; see
    /// [`class::primary_key_fields`].
    pub fn primary_key(&self) -> String {
        let fields = class::primary_key_fields(&self.class().to_ascii_lowercase());
        if fields.is_empty() {
            return self.key().to_owned();
        }
        let mut primary_key = String::new();
        for field in fields {
            match self.get(field) {
                Some(value) => primary_key.push_str(value.trim()),
                None => return self.key().to_owned(),
            }
        }
        primary_key
    }

    /// Returns a copy of the object containing only the attributes that
    /// make up its primary key.
    pub fn primary_key_object(&self) -> Object {
        let fields = class::primary_key_fields(&self.class().to_ascii_lowercase());
        let mut object = Object::new(self.class(), self.key());
        for field in fields {
            if Caseless(field) == Caseless(self.class()) {
                continue;
            }
            if let Some(value) = self.get(field) {
                object.push(*field, value);
            }
        }
        object
    }

    /// Returns a copy of the object without the attributes that a
    /// database synthesizes on read (`source` and `last-modified`).
    pub fn without_metadata(&self) -> Object {
        let mut object = self.clone();
        object.remove("source");
        object.remove("last-modified");
        object
    }
}

impl FromStr for Object {
    type Err = rpsl::Error;

    /// Parses the first object in `text` with the default parser
    /// options.
    fn from_str(text: &str) -> Result<Self, Self::Err> {
        match rpsl::Parser::new(text.as_bytes()).next() {
            Some(result) => result,
            None => Err(rpsl::Error::no_object()),
        }
    }
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        PrettyPrinter::default().write(f, self)
    }
}

////////////////////////////////////////////////////////////////////////
// OBJECT IDENTIFIERS                                                 //
////////////////////////////////////////////////////////////////////////

/// Identifies a stored object by its primary class and primary key.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ObjectId {
    pub class: String,
    pub key: String,
}

impl ObjectId {
    pub fn new(class: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.class, self.key)
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
