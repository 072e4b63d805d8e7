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

//! Object class names, synonyms, and primary-key rules.

use std::collections::HashMap;

pub const INETNUM: &str = "inetnum";
pub const INET6NUM: &str = "inet6num";
pub const ROUTE: &str = "route";
pub const ROUTE6: &str = "route6";
pub const AUT_NUM: &str = "aut-num";
pub const AS_BLOCK: &str = "as-block";
pub const PERSON: &str = "person";
pub const ROLE: &str = "role";
pub const ORGANISATION: &str = "organisation";
pub const MNTNER: &str = "mntner";
pub const DOMAIN: &str = "domain";
pub const AS_SET: &str = "as-set";
pub const ROUTE_SET: &str = "route-set";
pub const RTR_SET: &str = "rtr-set";
pub const PEERING_SET: &str = "peering-set";
pub const FILTER_SET: &str = "filter-set";
pub const KEY_CERT: &str = "key-cert";
pub const IRT: &str = "irt";
pub const INET_RTR: &str = "inet-rtr";
pub const POEM: &str = "poem";
pub const SCHEMA: &str = "schema";

/// Classes describing address space.
pub const INETNUM_CLASSES: &[&str] = &[INETNUM, INET6NUM];

/// Classes describing routing announcements.
pub const ROUTE_CLASSES: &[&str] = &[ROUTE, ROUTE6];

/// Classes identified by a NIC handle.
pub const HANDLE_CLASSES: &[&str] = &[PERSON, ROLE];

/// Classes whose objects may carry an abuse contact.
pub const ABUSE_CLASSES: &[&str] = &[INETNUM, INET6NUM, AUT_NUM];

/// Returns the attributes whose values, concatenated, form the primary
/// key of objects of the given (lower-case) class. An empty slice means
/// that the object key is the primary key.
pub fn primary_key_fields(class: &str) -> &'static [&'static str] {
    match class {
        ROUTE => &[ROUTE, "origin"],
        ROUTE6 => &[ROUTE6, "origin"],
        PERSON | ROLE => &["nic-hdl"],
        ORGANISATION => &[ORGANISATION],
        _ => &[],
    }
}

/// A table mapping class synonyms to their primary class.
///
/// Class names are case-insensitive; [`Synonyms::primary_class`]
/// always returns a lower-case name. The default table makes `dns` a
/// synonym of `domain`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Synonyms {
    map: HashMap<String, String>,
}

impl Synonyms {
    /// Creates an empty synonym table.
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    /// Declares `synonym` to be another name for `primary`. Chains are
    /// collapsed, so every synonym maps directly to a class that is not
    /// itself a synonym. A declaration that would close a cycle is
    /// ignored.
    pub fn insert(&mut self, synonym: &str, primary: &str) {
        let synonym = synonym.to_ascii_lowercase();
        let primary = self.primary_class(primary);
        if synonym == primary {
            return;
        }
        for target in self.map.values_mut() {
            if *target == synonym {
                *target = primary.clone();
            }
        }
        self.map.insert(synonym, primary);
    }

    /// Returns the canonical name of `class`. This is idempotent.
    pub fn primary_class(&self, class: &str) -> String {
        let class = class.to_ascii_lowercase();
        match self.map.get(&class) {
            Some(primary) => primary.clone(),
            None => class,
        }
    }

    /// Returns the synonyms declared for `primary`.
    pub fn synonyms_of<'a>(&'a self, primary: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.map
            .iter()
            .filter(move |(_, p)| p.eq_ignore_ascii_case(primary))
            .map(|(s, _)| s.as_str())
    }
}

impl Default for Synonyms {
    fn default() -> Self {
        let mut synonyms = Self::new();
        synonyms.insert("dns", DOMAIN);
        synonyms
    }
}
