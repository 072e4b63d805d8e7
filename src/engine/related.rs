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

//! Following references between objects: related objects, abuse
//! contacts, and reverse domains.

use std::collections::{HashSet, VecDeque};

use super::Engine;
use crate::db::{self, Database};
use crate::index::rdns;
use crate::object::class::{
    DOMAIN, HANDLE_CLASSES, INETNUM_CLASSES, MNTNER, ORGANISATION, ROUTE_CLASSES,
};
use crate::object::{Object, ObjectId, Typed};
use crate::schema::Schema;
use crate::util::Caseless;

/// The references followed for classes without a schema.
const DEFAULT_REFERENCES: &[(&str, &[&str])] = &[
    ("admin-c", HANDLE_CLASSES),
    ("tech-c", HANDLE_CLASSES),
    ("zone-c", HANDLE_CLASSES),
    ("abuse-c", HANDLE_CLASSES),
    ("org", &[ORGANISATION]),
    ("mnt-by", &[MNTNER]),
];

impl<D: Database> Engine<D> {
    /// Replaces pseudo-classes and synonyms in a class list with the
    /// primary classes they stand for. Entries that are not class names
    /// are dropped.
    pub(super) fn expand_classes(&self, classes: &[String]) -> Vec<String> {
        let mut expanded = Vec::new();
        for class in classes {
            let class = class.trim().to_ascii_lowercase();
            match class.as_str() {
                "nic-hdl" => extend_unique(&mut expanded, HANDLE_CLASSES),
                "nic-cidr" => extend_unique(&mut expanded, INETNUM_CLASSES),
                "nic-route" => extend_unique(&mut expanded, ROUTE_CLASSES),
                "nic-net" => {
                    extend_unique(&mut expanded, INETNUM_CLASSES);
                    extend_unique(&mut expanded, ROUTE_CLASSES);
                }
                "nic-addr" => {
                    for class in &self.config.address_classes {
                        push_unique(&mut expanded, self.database.primary_class(class));
                    }
                }
                _ if !is_class_name(&class) => (),
                _ => push_unique(&mut expanded, self.database.primary_class(&class)),
            }
        }
        expanded
    }

    /// Returns the objects that `primary` refers to, directly or
    /// through up to `related_depth` references, in breadth-first order.
    /// Objects already in `seen` are skipped, and the returned ones are
    /// added to it.
    pub(super) fn related(
        &self,
        primary: &Object,
        seen: &mut HashSet<ObjectId>,
    ) -> db::Result<Vec<Object>> {
        let mut related = Vec::new();
        let mut queue = VecDeque::from([(primary.clone(), 0)]);
        while let Some((object, depth)) = queue.pop_front() {
            if depth >= self.config.related_depth {
                continue;
            }
            let references = self.references(&object)?;
            for (key, value) in object.iter() {
                let Some((_, classes)) = references.iter().find(|(k, _)| Caseless(k) == Caseless(key))
                else {
                    continue;
                };
                for target in split_references(value) {
                    if let Some(found) = self.fetch_first(classes.as_slice(), target)? {
                        if seen.insert(self.database.primary_spec(&found)) {
                            queue.push_back((found.clone(), depth + 1));
                            related.push(found);
                        }
                    }
                }
            }
        }
        Ok(related)
    }

    /// Returns the attributes of `object` that refer to other objects,
    /// each with the classes it may refer to.
    fn references(&self, object: &Object) -> db::Result<Vec<(String, Vec<String>)>> {
        if self.config.schemas {
            if let Some(schema) = Schema::fetch(self.database.as_ref(), object.class())? {
                return Ok(schema
                    .inverse_keys()
                    .map(|spec| (spec.name.clone(), self.expand_classes(&spec.inverse)))
                    .collect());
            }
        }
        Ok(DEFAULT_REFERENCES
            .iter()
            .map(|(key, classes)| {
                let classes = classes.iter().map(|class| class.to_string()).collect();
                (key.to_string(), classes)
            })
            .collect())
    }

    /// Fetches `key` from the first of `classes` that has it.
    fn fetch_first<S: AsRef<str>>(&self, classes: &[S], key: &str) -> db::Result<Option<Object>> {
        for class in classes {
            if let Some(object) = self.database.try_fetch(class.as_ref(), key)? {
                return Ok(Some(object));
            }
        }
        Ok(None)
    }

    /// Resolves the abuse contact of an inetnum or aut-num: the
    /// `abuse-mailbox` of its `abuse-c` handle, or failing an `abuse-c`,
    /// that of its organisation's `abuse-c` or the organisation itself.
    pub(super) fn abuse_contact(&self, object: &Object) -> db::Result<Option<String>> {
        if let Some(handle) = object.get("abuse-c").and_then(first_reference) {
            return self.abuse_mailbox_of_handle(handle);
        }
        let Some(org) = object.get("org").and_then(first_reference) else {
            return Ok(None);
        };
        let Some(org) = self.database.try_fetch(ORGANISATION, org)? else {
            return Ok(None);
        };
        if let Some(handle) = org.get("abuse-c").and_then(first_reference) {
            return self.abuse_mailbox_of_handle(handle);
        }
        Ok(org.get("abuse-mailbox").map(|mailbox| mailbox.trim().to_owned()))
    }

    fn abuse_mailbox_of_handle(&self, handle: &str) -> db::Result<Option<String>> {
        Ok(self
            .fetch_first(HANDLE_CLASSES, handle)?
            .and_then(|object| object.get("abuse-mailbox").map(|m| m.trim().to_owned())))
    }

    /// Fetches the `domain` objects for the reverse-DNS zones of the
    /// networks among `objects`.
    pub(super) fn reverse_domains(&self, objects: &[Object]) -> db::Result<Vec<Object>> {
        let mut domains = Vec::new();
        for object in objects {
            let zones = match object.typed() {
                Ok(Typed::Inetnum(inetnum)) => inetnum.rdns_zones(),
                Ok(Typed::Route(route)) => rdns::rdns_zones(&route.prefix()),
                _ => continue,
            };
            for zone in zones {
                domains.extend(self.database.try_fetch(DOMAIN, &zone)?);
            }
        }
        Ok(domains)
    }
}

/// Whether `class` has the form of a (lower-case) class name.
fn is_class_name(class: &str) -> bool {
    !class.is_empty()
        && class
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

fn push_unique(classes: &mut Vec<String>, class: String) {
    if !classes.contains(&class) {
        classes.push(class);
    }
}

fn extend_unique(classes: &mut Vec<String>, more: &[&str]) {
    for class in more {
        push_unique(classes, class.to_string());
    }
}

/// Splits a reference value into the keys it names. Values may list
/// several keys separated by commas or whitespace, and end in a `#`
/// comment.
fn split_references(value: &str) -> impl Iterator<Item = &str> {
    value
        .split('#')
        .next()
        .unwrap_or_default()
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|key| !key.is_empty())
}

fn first_reference(value: &str) -> Option<&str> {
    split_references(value).next()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::tests::make_database;
    use super::super::EngineConfig;
    use super::*;

    #[test]
    fn references_are_split() {
        let keys: Vec<_> = split_references("A-MNT, B-MNT C-MNT # note, D-MNT").collect();
        assert_eq!(keys, ["A-MNT", "B-MNT", "C-MNT"]);
        assert_eq!(first_reference("  # nothing"), None);
    }

    #[test]
    fn pseudo_classes_expand() {
        let (_dir, database) = make_database(&[]);
        let engine = Engine::new(database, EngineConfig::default()).unwrap();
        let expand = |classes: &[&str]| {
            let classes: Vec<String> = classes.iter().map(|c| c.to_string()).collect();
            engine.expand_classes(&classes)
        };
        assert_eq!(expand(&["nic-hdl", "person"]), ["person", "role"]);
        assert_eq!(
            expand(&["NIC-NET"]),
            ["inetnum", "inet6num", "route", "route6"]
        );
        assert_eq!(expand(&["nic-addr", "dns"]), ["inet-rtr", "domain"]);
        assert_eq!(expand(&["..", "person/..", "", " Person "]), ["person"]);
    }

    #[test]
    fn schemas_declare_references() {
        let (_dir, database) = make_database(&[
            "schema: ROUTE-SCHEMA\nkey: route mandatory\nkey: origin mandatory inverse aut-num\n",
            "route: 192.0.2.0/24\norigin: AS64512\nmnt-by: EX-MNT\n",
            "aut-num: AS64512\nmnt-by: EX-MNT\n",
            "mntner: EX-MNT\n",
        ]);
        let route = database.fetch("route", "192.0.2.0/24AS64512").unwrap();

        let engine = Engine::new(Arc::clone(&database), EngineConfig::default()).unwrap();
        let classes: Vec<_> = engine
            .related(&route, &mut HashSet::new())
            .unwrap()
            .iter()
            .map(|object| object.class().to_owned())
            .collect();
        // The schema replaces the default references for routes, but
        // aut-nums still follow mnt-by.
        assert_eq!(classes, ["aut-num", "mntner"]);

        let config = EngineConfig {
            schemas: false,
            related_depth: 1,
            ..EngineConfig::default()
        };
        let engine = Engine::new(database, config).unwrap();
        let classes: Vec<_> = engine
            .related(&route, &mut HashSet::new())
            .unwrap()
            .iter()
            .map(|object| object.class().to_owned())
            .collect();
        assert_eq!(classes, ["mntner"]);
    }
}
