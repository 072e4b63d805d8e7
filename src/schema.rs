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

//! Class schemas.
//!
//! A schema is itself an object, of class `schema`, whose key is the
//! upper-cased class name followed by `-SCHEMA`. Each of its `key`
//! attributes declares one attribute of the class:
//!
//! ```text
//! schema:  ROUTE-SCHEMA
//! key:     route mandatory single
//! key:     origin mandatory single inverse aut-num
//! key:     mnt-by optional multiple inverse mntner
//! ```
//!
//! The words after the attribute name may come in any order. An
//! attribute is optional and single-valued unless declared otherwise.
//! The classes following `inverse` are those that values of the
//! attribute refer to; they are used to find related objects.

use std::fmt;

use log::warn;

use crate::db::{self, Database};
use crate::object::class::SCHEMA;
use crate::object::Object;
use crate::util::{ends_with_caseless, Caseless};

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// Errors that arise when reading a schema object.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Error {
    /// The object is not of class `schema` or its key does not end in
    /// `-SCHEMA`.
    NotASchema(String),

    /// A `key` attribute could not be understood.
    InvalidKeySpec(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::NotASchema(key) => write!(f, "{} is not a schema", key),
            Self::InvalidKeySpec(spec) => write!(f, "invalid key declaration {:?}", spec),
        }
    }
}

impl std::error::Error for Error {}

/// A way in which an object fails to conform to its schema.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Issue {
    Missing(String),
    Repeated(String),
    Undeclared(String),
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Missing(key) => write!(f, "missing mandatory key {}", key),
            Self::Repeated(key) => write!(f, "repeated single key {}", key),
            Self::Undeclared(key) => write!(f, "undeclared key {}", key),
        }
    }
}

////////////////////////////////////////////////////////////////////////
// SCHEMAS                                                            //
////////////////////////////////////////////////////////////////////////

/// The declaration of one attribute in a [`Schema`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeySpec {
    pub name: String,
    pub multiple: bool,
    pub mandatory: bool,
    pub inverse: Vec<String>,
}

impl KeySpec {
    fn parse(spec: &str) -> Result<Self, Error> {
        let invalid = || Error::InvalidKeySpec(spec.to_owned());
        let mut words = spec.split_whitespace();
        let name = words.next().ok_or_else(invalid)?.to_ascii_lowercase();
        let mut key_spec = Self {
            name,
            multiple: false,
            mandatory: false,
            inverse: Vec::new(),
        };

        let mut in_inverse = false;
        for word in words {
            match word.to_ascii_lowercase().as_str() {
                "single" => key_spec.multiple = false,
                "multiple" => key_spec.multiple = true,
                "mandatory" => key_spec.mandatory = true,
                "optional" => key_spec.mandatory = false,
                "inverse" => {
                    in_inverse = true;
                    continue;
                }
                classes if in_inverse => {
                    key_spec.inverse.extend(
                        classes
                            .split(',')
                            .filter(|class| !class.is_empty())
                            .map(str::to_owned),
                    );
                    continue;
                }
                _ => return Err(invalid()),
            }
            in_inverse = false;
        }
        Ok(key_spec)
    }
}

/// The declared attributes of a class.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Schema {
    class: String,
    keys: Vec<KeySpec>,
}

impl Schema {
    /// Reads a schema from a `schema` object.
    pub fn from_object(object: &Object) -> Result<Self, Error> {
        let key = object.key().trim();
        if Caseless(object.class()) != Caseless(SCHEMA) || !ends_with_caseless(key, "-SCHEMA") {
            return Err(Error::NotASchema(key.to_owned()));
        }
        let class = key[..key.len() - "-SCHEMA".len()].to_ascii_lowercase();
        let keys = object
            .get_all("key")
            .map(KeySpec::parse)
            .collect::<Result<_, _>>()?;
        Ok(Self { class, keys })
    }

    /// Fetches and reads the schema of `class`. A malformed schema is
    /// logged and treated as absent.
    pub fn fetch<D: Database + ?Sized>(database: &D, class: &str) -> db::Result<Option<Self>> {
        let key = format!("{}-SCHEMA", database.primary_class(class).to_ascii_uppercase());
        let Some(object) = database.try_fetch(SCHEMA, &key)? else {
            return Ok(None);
        };
        match Self::from_object(&object) {
            Ok(schema) => Ok(Some(schema)),
            Err(e) => {
                warn!("Ignoring schema {}: {}", key, e);
                Ok(None)
            }
        }
    }

    /// The class described by this schema.
    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn keys(&self) -> &[KeySpec] {
        &self.keys
    }

    pub fn key(&self, name: &str) -> Option<&KeySpec> {
        self.keys.iter().find(|spec| Caseless(&spec.name) == Caseless(name))
    }

    /// Returns the declarations of attributes that refer to other
    /// objects.
    pub fn inverse_keys(&self) -> impl Iterator<Item = &KeySpec> {
        self.keys.iter().filter(|spec| !spec.inverse.is_empty())
    }

    /// Checks `object` against the schema. Keys starting with `x-`, the
    /// class attribute, and the attributes that databases synthesize
    /// on read (`source` and `last-modified`) are never undeclared.
    pub fn validate(&self, object: &Object) -> Vec<Issue> {
        let mut issues = Vec::new();
        for spec in &self.keys {
            let count = object.get_all(&spec.name).count();
            if spec.mandatory && count == 0 {
                issues.push(Issue::Missing(spec.name.clone()));
            } else if !spec.multiple && count > 1 {
                issues.push(Issue::Repeated(spec.name.clone()));
            }
        }

        let mut undeclared: Vec<String> = Vec::new();
        for attr in &object.attributes()[1..] {
            let key = attr.key.to_ascii_lowercase();
            let exempt = key.starts_with("x-") || key == "source" || key == "last-modified";
            if !exempt && self.key(&key).is_none() && !undeclared.contains(&key) {
                undeclared.push(key);
            }
        }
        issues.extend(undeclared.into_iter().map(Issue::Undeclared));
        issues
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    fn route_schema() -> Schema {
        let object: Object = "schema: ROUTE-SCHEMA\n\
                              key: route mandatory single\n\
                              key: origin single mandatory inverse aut-num\n\
                              key: mnt-by multiple inverse mntner\n\
                              key: admin-c optional multiple inverse person,role\n"
            .parse()
            .unwrap();
        Schema::from_object(&object).unwrap()
    }

    #[test]
    fn parses_key_declarations() {
        let schema = route_schema();
        assert_eq!(schema.class(), "route");
        assert_eq!(
            schema.key("ORIGIN"),
            Some(&KeySpec {
                name: "origin".to_owned(),
                multiple: false,
                mandatory: true,
                inverse: vec!["aut-num".to_owned()],
            })
        );
        let mnt_by = schema.key("mnt-by").unwrap();
        assert!(mnt_by.multiple && !mnt_by.mandatory);
        assert_eq!(schema.key("admin-c").unwrap().inverse, ["person", "role"]);
        assert_eq!(schema.inverse_keys().count(), 3);
    }

    #[test]
    fn rejects_bad_schemas() {
        let not_schema = Object::new("person", "ROUTE-SCHEMA");
        assert!(matches!(
            Schema::from_object(&not_schema),
            Err(Error::NotASchema(_))
        ));
        let mut bad = Object::new("schema", "ROUTE-SCHEMA");
        bad.push("key", "route sometimes");
        assert!(matches!(
            Schema::from_object(&bad),
            Err(Error::InvalidKeySpec(_))
        ));
    }

    #[test]
    fn validation_reports_issues() {
        let schema = route_schema();
        let good: Object = "route: 192.0.2.0/24\norigin: AS1\nmnt-by: A\nmnt-by: B\n\
                            x-note: fine\nsource: TEST\n"
            .parse()
            .unwrap();
        assert!(schema.validate(&good).is_empty());

        let bad: Object = "route: 192.0.2.0/24\nmnt-by: A\nroute: again\nbogus: 1\nbogus: 2\n"
            .parse()
            .unwrap();
        assert_eq!(
            schema.validate(&bad),
            [
                Issue::Repeated("route".to_owned()),
                Issue::Missing("origin".to_owned()),
                Issue::Undeclared("bogus".to_owned()),
            ]
        );
    }
}
