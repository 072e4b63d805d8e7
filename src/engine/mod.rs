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

//! The query engine.
//!
//! An [`Engine`] answers one query term at a time against a
//! [`Database`]. Free-text terms are first classified (see
//! [`classify`]) to decide which classes and lookups apply; inverse
//! terms search attribute values directly. The result is a list of
//! [`Event`]s: each [`Event::Primary`] starts a new logical result, and
//! the [`Event::Related`] events that follow it are the objects it
//! refers to.
//!
//! The engine is synchronous and holds no per-query state, so a single
//! instance may be shared between threads.

use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, info};

use crate::db::{self, Database};
use crate::index::{containing_as_blocks, find_as_block, CidrIndex};
use crate::object::class::{ABUSE_CLASSES, AS_BLOCK, AUT_NUM, INET_RTR};
use crate::object::Object;
use crate::schema::Schema;

mod classify;
mod network;
mod related;

pub use classify::{classify, Kind, TypeHint};

////////////////////////////////////////////////////////////////////////
// CONFIGURATION AND QUERY TYPES                                      //
////////////////////////////////////////////////////////////////////////

/// Settings that apply to every query answered by an [`Engine`].
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Use class schemas to find related objects.
    pub schemas: bool,

    /// Annotate primary objects that violate their class schema.
    pub validate: bool,

    /// Build a [`CidrIndex`] rather than walking supernets.
    pub index: bool,

    /// How many references to follow from a primary object.
    pub related_depth: usize,

    /// Classes whose objects are keyed by a single IP address.
    pub address_classes: Vec<String>,

    pub type_hints: Vec<TypeHint>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            schemas: true,
            validate: false,
            index: true,
            related_depth: 2,
            address_classes: vec![INET_RTR.to_owned()],
            type_hints: Vec::new(),
        }
    }
}

/// Per-query settings.
#[derive(Clone, Debug)]
pub struct QueryOptions {
    /// Restricts primary objects to these classes. Synonyms and
    /// pseudo-classes such as `nic-hdl` are accepted.
    pub classes: Option<Vec<String>>,

    /// Add the reverse-DNS domains of returned networks.
    pub reverse_domain: bool,

    /// Follow references from primary objects.
    pub related: bool,

    /// Levels of enclosing networks to add; negative means all.
    pub less_specific_levels: i32,

    /// Levels of enclosed networks to add; negative means all.
    pub more_specific_levels: i32,

    /// Only return networks equal to the one queried.
    pub exact_match: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            classes: None,
            reverse_domain: false,
            related: true,
            less_specific_levels: 0,
            more_specific_levels: 0,
            exact_match: false,
        }
    }
}

/// A query term.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Term {
    /// A free-text term, classified by [`classify`].
    Text(String),

    /// Objects in which any of `keys` has any of `values`.
    Inverse { keys: Vec<String>, values: Vec<String> },
}

/// One object in the answer to a query.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Event {
    Primary {
        object: Object,
        abuse_contact: Option<String>,
    },
    Related(Object),
}

impl Event {
    pub fn object(&self) -> &Object {
        match self {
            Self::Primary { object, .. } => object,
            Self::Related(object) => object,
        }
    }

    pub fn is_primary(&self) -> bool {
        matches!(self, Self::Primary { .. })
    }
}

////////////////////////////////////////////////////////////////////////
// THE ENGINE                                                         //
////////////////////////////////////////////////////////////////////////

/// A query engine over a shared database.
pub struct Engine<D> {
    database: Arc<D>,
    config: EngineConfig,
    index: Option<CidrIndex>,
}

impl<D: Database> Engine<D> {
    /// Creates an engine, building the CIDR index if configured to.
    pub fn new(database: Arc<D>, config: EngineConfig) -> db::Result<Self> {
        let index = if config.index {
            let index = CidrIndex::build(database.as_ref())?;
            info!("Built the CIDR index with {} entries.", index.len());
            Some(index)
        } else {
            None
        };
        Ok(Self {
            database,
            config,
            index,
        })
    }

    pub fn database(&self) -> &Arc<D> {
        &self.database
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Answers a single query term.
    pub fn query(&self, term: &Term, options: &QueryOptions) -> db::Result<Vec<Event>> {
        let allowed = options
            .classes
            .as_ref()
            .map(|classes| self.expand_classes(classes));
        let allowed = allowed.as_deref();

        let found = match term {
            Term::Inverse { keys, values } => {
                self.database.search_inverse(keys, values, allowed)?
            }
            Term::Text(text) => self.query_primary(text.trim(), options, allowed)?,
        };

        let mut seen = HashSet::new();
        let mut primaries = Vec::new();
        for object in found {
            if seen.insert(self.database.primary_spec(&object)) {
                primaries.push(object);
            }
        }
        if options.reverse_domain {
            for domain in self.reverse_domains(&primaries)? {
                if seen.insert(self.database.primary_spec(&domain)) {
                    primaries.push(domain);
                }
            }
        }
        debug!("{:?} matched {} primary objects", term, primaries.len());

        let mut events = Vec::new();
        for mut object in primaries {
            let abuse_contact = if ABUSE_CLASSES.contains(&object.class()) {
                self.abuse_contact(&object)?
            } else {
                None
            };
            let related = if options.related {
                self.related(&object, &mut seen)?
            } else {
                Vec::new()
            };
            if self.config.validate {
                self.annotate_validity(&mut object)?;
            }
            events.push(Event::Primary {
                object,
                abuse_contact,
            });
            events.extend(related.into_iter().map(Event::Related));
        }
        Ok(events)
    }

    /// Finds the primary objects for a free-text term.
    fn query_primary(
        &self,
        text: &str,
        options: &QueryOptions,
        allowed: Option<&[String]>,
    ) -> db::Result<Vec<Object>> {
        let permits = |class: &str| permits(allowed, class);
        let mut found = Vec::new();
        match classify(text, &self.config.type_hints) {
            Kind::AsNumber(asn) => {
                if permits(AS_BLOCK) {
                    found.extend(containing_as_blocks(self.database.as_ref(), asn)?);
                }
                if permits(AUT_NUM) {
                    found.extend(self.database.try_fetch(AUT_NUM, &format!("AS{}", asn))?);
                }
            }
            Kind::AsRange(first, last) => {
                if permits(AS_BLOCK) {
                    found.extend(find_as_block(self.database.as_ref(), first, last)?);
                }
            }
            Kind::Class(class) => {
                if permits(class) {
                    found.extend(self.database.try_fetch(class, text)?);
                }
            }
            Kind::Network(range) => {
                found = self.query_network(&range, options, allowed)?;
            }
            Kind::Hinted(classes) => {
                for class in self.expand_classes(&classes) {
                    if permits(&class) {
                        found.extend(self.database.try_fetch(&class, text)?);
                    }
                }
            }
            Kind::Generic => {
                let classes = match allowed {
                    Some(allowed) => allowed.to_vec(),
                    None => self.database.classes()?,
                };
                for class in classes {
                    found.extend(self.database.try_fetch(&class, text)?);
                }
            }
        }
        Ok(found)
    }

    /// Adds an `x-schema-valid` attribute to `object` if it violates
    /// its class schema.
    fn annotate_validity(&self, object: &mut Object) -> db::Result<()> {
        if let Some(schema) = Schema::fetch(self.database.as_ref(), object.class())? {
            let issues = schema.validate(object);
            if !issues.is_empty() {
                let issues: Vec<String> = issues.iter().map(ToString::to_string).collect();
                object.push("x-schema-valid", format!("INVALID {}", issues.join("; ")));
            }
        }
        Ok(())
    }
}

/// Returns whether `class` passes an optional class restriction.
fn permits(allowed: Option<&[String]>, class: &str) -> bool {
    allowed.map_or(true, |allowed| allowed.iter().any(|c| c == class))
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
pub(crate) mod tests {
    use regex::Regex;
    use tempfile::TempDir;

    use super::*;
    use crate::db::{FileDatabase, SaveOptions};

    /// Creates a file database holding the given objects.
    pub(crate) fn make_database(objects: &[&str]) -> (TempDir, Arc<FileDatabase>) {
        let dir = TempDir::new().unwrap();
        let database = FileDatabase::create(dir.path(), "TEST").unwrap();
        for text in objects {
            let object: Object = text.parse().unwrap();
            database.save(&object, SaveOptions::default()).unwrap();
        }
        (dir, Arc::new(database))
    }

    fn text(term: &str) -> Term {
        Term::Text(term.to_owned())
    }

    fn summary(events: &[Event]) -> Vec<String> {
        events
            .iter()
            .map(|event| {
                let role = if event.is_primary() { "P" } else { "R" };
                format!("{} {} {}", role, event.object().class(), event.object().key())
            })
            .collect()
    }

    const REGISTRY: &[&str] = &[
        "person: John Doe\nnic-hdl: JD1-TEST\n",
        "role: Abuse Team\nnic-hdl: AB1-TEST\nabuse-mailbox: abuse@example.net\n",
        "mntner: EX-MNT\nadmin-c: JD1-TEST\nmnt-by: EX-MNT\n",
        "organisation: ORG-EX1\nabuse-c: AB1-TEST\nmnt-by: EX-MNT\n",
        "inetnum: 10.0.0.0/8\nnetname: A\n",
        "inetnum: 10.1.0.0/16\nnetname: B\norg: ORG-EX1\n",
        "inetnum: 10.1.2.0/24\nnetname: C\nabuse-c: JD1-TEST\n",
        "route: 10.1.0.0/16\norigin: AS64512\nmnt-by: EX-MNT\n",
        "as-block: AS64512 - AS65534\n",
        "aut-num: AS64600\nas-name: EXAMPLE\n",
        "domain: 1.10.in-addr.arpa\nnserver: ns.example\n",
        "inet-rtr: 10.1.2.1\n",
    ];

    fn both_engines(objects: &[&str]) -> (TempDir, Vec<Engine<FileDatabase>>) {
        let (dir, database) = make_database(objects);
        let indexed = Engine::new(database.clone(), EngineConfig::default()).unwrap();
        let unindexed = Engine::new(
            database,
            EngineConfig {
                index: false,
                ..EngineConfig::default()
            },
        )
        .unwrap();
        (dir, vec![indexed, unindexed])
    }

    #[test]
    fn handle_lookup_follows_references() {
        let (_dir, engines) = both_engines(REGISTRY);
        for engine in engines {
            let events = engine.query(&text("EX-MNT"), &QueryOptions::default()).unwrap();
            assert_eq!(summary(&events), ["P mntner EX-MNT", "R person John Doe"]);

            let options = QueryOptions {
                related: false,
                ..QueryOptions::default()
            };
            let events = engine.query(&text("JD1-TEST"), &options).unwrap();
            assert_eq!(summary(&events), ["P person John Doe"]);
        }
    }

    #[test]
    fn network_queries_pick_the_longest_prefix() {
        let (_dir, engines) = both_engines(REGISTRY);
        let options = QueryOptions {
            related: false,
            ..QueryOptions::default()
        };
        for engine in engines {
            let events = engine.query(&text("10.1.9.9"), &options).unwrap();
            assert_eq!(
                summary(&events),
                ["P inetnum 10.1.0.0/16", "P route 10.1.0.0/16"]
            );

            let events = engine.query(&text("10.1.2.1"), &options).unwrap();
            assert_eq!(
                summary(&events),
                [
                    "P inet-rtr 10.1.2.1",
                    "P inetnum 10.1.2.0/24",
                    "P route 10.1.0.0/16"
                ]
            );
        }
    }

    #[test]
    fn network_query_levels_and_exact_matches() {
        let (_dir, engines) = both_engines(REGISTRY);
        for engine in engines {
            let options = QueryOptions {
                related: false,
                classes: Some(vec!["inetnum".to_owned()]),
                less_specific_levels: -1,
                ..QueryOptions::default()
            };
            let events = engine.query(&text("10.1.2.0/24"), &options).unwrap();
            assert_eq!(
                summary(&events),
                [
                    "P inetnum 10.1.2.0/24",
                    "P inetnum 10.1.0.0/16",
                    "P inetnum 10.0.0.0/8"
                ]
            );

            let options = QueryOptions {
                related: false,
                classes: Some(vec!["nic-cidr".to_owned()]),
                more_specific_levels: 1,
                ..QueryOptions::default()
            };
            let events = engine.query(&text("10.0.0.0/8"), &options).unwrap();
            assert_eq!(
                summary(&events),
                ["P inetnum 10.0.0.0/8", "P inetnum 10.1.0.0/16"]
            );

            let options = QueryOptions {
                related: false,
                exact_match: true,
                ..QueryOptions::default()
            };
            let events = engine.query(&text("10.1.2.128/25"), &options).unwrap();
            assert!(events.is_empty());
            let events = engine.query(&text("10.1.0.0/16"), &options).unwrap();
            assert_eq!(
                summary(&events),
                ["P inetnum 10.1.0.0/16", "P route 10.1.0.0/16"]
            );
        }
    }

    #[test]
    fn as_numbers_find_blocks_and_aut_nums() {
        let (_dir, engines) = both_engines(REGISTRY);
        let engine = &engines[0];
        let options = QueryOptions {
            related: false,
            ..QueryOptions::default()
        };
        let events = engine.query(&text("AS64600"), &options).unwrap();
        assert_eq!(
            summary(&events),
            ["P as-block AS64512 - AS65534", "P aut-num AS64600"]
        );
        let events = engine.query(&text("AS64512-AS65534"), &options).unwrap();
        assert_eq!(summary(&events), ["P as-block AS64512 - AS65534"]);
        let options = QueryOptions {
            classes: Some(vec!["aut-num".to_owned()]),
            ..options
        };
        let events = engine.query(&text("AS64600"), &options).unwrap();
        assert_eq!(summary(&events), ["P aut-num AS64600"]);
    }

    #[test]
    fn abuse_contacts_are_resolved() {
        let (_dir, engines) = both_engines(REGISTRY);
        let engine = &engines[0];
        let options = QueryOptions {
            related: false,
            classes: Some(vec!["inetnum".to_owned()]),
            ..QueryOptions::default()
        };
        let contact = |term: &str| match &engine.query(&text(term), &options).unwrap()[0] {
            Event::Primary { abuse_contact, .. } => abuse_contact.clone(),
            Event::Related(_) => panic!("expected a primary object"),
        };
        // Through the organisation.
        assert_eq!(contact("10.1.9.9").as_deref(), Some("abuse@example.net"));
        // The handle named by abuse-c has no abuse-mailbox.
        assert_eq!(contact("10.1.2.3"), None);
        assert_eq!(contact("10.9.9.9"), None);
    }

    #[test]
    fn reverse_domains_are_added() {
        let (_dir, engines) = both_engines(REGISTRY);
        let options = QueryOptions {
            related: false,
            reverse_domain: true,
            classes: Some(vec!["inetnum".to_owned()]),
            ..QueryOptions::default()
        };
        let events = engines[0].query(&text("10.1.0.0/16"), &options).unwrap();
        assert_eq!(
            summary(&events),
            ["P inetnum 10.1.0.0/16", "P domain 1.10.in-addr.arpa"]
        );
    }

    #[test]
    fn inverse_queries_search_attributes() {
        let (_dir, engines) = both_engines(REGISTRY);
        let term = Term::Inverse {
            keys: vec!["mnt-by".to_owned()],
            values: vec!["ex-mnt".to_owned()],
        };
        let options = QueryOptions {
            related: false,
            ..QueryOptions::default()
        };
        let mut keys: Vec<String> = engines[0]
            .query(&term, &options)
            .unwrap()
            .iter()
            .map(|event| event.object().class().to_owned())
            .collect();
        keys.sort();
        assert_eq!(keys, ["mntner", "organisation", "route"]);
    }

    #[test]
    fn related_objects_are_not_repeated() {
        let (_dir, engines) = both_engines(REGISTRY);
        let options = QueryOptions {
            classes: Some(vec!["nic-net".to_owned()]),
            ..QueryOptions::default()
        };
        let events = engines[0].query(&text("10.1.0.0/16"), &options).unwrap();
        assert_eq!(
            summary(&events),
            [
                "P inetnum 10.1.0.0/16",
                "R organisation ORG-EX1",
                "R role Abuse Team",
                "R mntner EX-MNT",
                "P route 10.1.0.0/16",
            ]
        );
    }

    #[test]
    fn type_hints_restrict_classes() {
        let (_dir, database) = make_database(REGISTRY);
        let config = EngineConfig {
            index: false,
            type_hints: vec![TypeHint {
                pattern: Regex::new("^JD").unwrap(),
                classes: vec!["role".to_owned()],
            }],
            ..EngineConfig::default()
        };
        let engine = Engine::new(database, config).unwrap();
        assert!(engine
            .query(&text("JD1-TEST"), &QueryOptions::default())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn validation_annotates_primaries() {
        let (_dir, database) = make_database(&[
            "schema: PERSON-SCHEMA\nkey: person mandatory single\nkey: nic-hdl mandatory single\n\
             key: phone mandatory multiple\n",
            "person: John Doe\nnic-hdl: JD1-TEST\n",
        ]);
        let config = EngineConfig {
            validate: true,
            ..EngineConfig::default()
        };
        let engine = Engine::new(database, config).unwrap();
        let events = engine.query(&text("JD1-TEST"), &QueryOptions::default()).unwrap();
        assert_eq!(
            events[0].object().get("x-schema-valid"),
            Some("INVALID missing mandatory key phone")
        );
    }
}
