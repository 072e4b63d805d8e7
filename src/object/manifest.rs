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

//! The [`Manifest`] type.

use chrono::{DateTime, SecondsFormat, Utc};

use super::Object;

/// The top-level metadata object of a database.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Manifest {
    pub database: String,
    pub serial: u64,
    pub last_modified: DateTime<Utc>,
}

impl Manifest {
    /// Creates a manifest with serial 0, modified now.
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            serial: 0,
            last_modified: Utc::now(),
        }
    }

    /// Reads a manifest from its object form. Missing or malformed
    /// `serial` and `last-modified` attributes take default values.
    pub fn from_object(object: &Object) -> Option<Self> {
        if !object.class().eq_ignore_ascii_case("database") {
            return None;
        }
        Some(Self {
            database: object.key().to_owned(),
            serial: object
                .get("serial")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(0),
            last_modified: object.last_modified().unwrap_or_else(Utc::now),
        })
    }

    pub fn to_object(&self) -> Object {
        let mut object = Object::new("database", self.database.as_str());
        object.push("serial", self.serial.to_string());
        object.push(
            "last-modified",
            self.last_modified.to_rfc3339_opts(SecondsFormat::Secs, true),
        );
        object
    }

    /// Increments the serial and sets the modification time to now.
    pub fn bump(&mut self) {
        self.serial += 1;
        self.last_modified = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_form_round_trips() {
        let mut manifest = Manifest::new("TEST");
        manifest.bump();
        let object = manifest.to_object();
        assert_eq!(object.get("serial"), Some("1"));
        let back = Manifest::from_object(&object).unwrap();
        assert_eq!(back.database, "TEST");
        assert_eq!(back.serial, 1);
        assert_eq!(back.last_modified.timestamp(), manifest.last_modified.timestamp());
    }

    #[test]
    fn rejects_other_classes() {
        assert!(Manifest::from_object(&Object::new("person", "X")).is_none());
    }
}
