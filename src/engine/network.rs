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

//! Network queries.

use std::collections::HashSet;

use ipnet::IpNet;

use super::{permits, Engine, QueryOptions};
use crate::db::{self, Database};
use crate::index::{covering_by_fetch, less_specifics_by_fetch, more_specifics_by_scan, Match};
use crate::net::{self, IpRange};
use crate::object::class::{INETNUM_CLASSES, ROUTE_CLASSES};
use crate::object::Object;

impl<D: Database> Engine<D> {
    /// Finds the objects describing the address space of `range`:
    ///
    /// 1. objects of the address classes keyed by the address itself,
    ///    if `range` is a single address;
    /// 2. the most specific inetnum containing `range` (or equal to it,
    ///    with `exact_match`), followed by its less specifics when
    ///    requested;
    /// 3. every route whose prefix contains `range` (or equals it);
    /// 4. the more specific inetnums and routes, when requested.
    pub(super) fn query_network(
        &self,
        range: &IpRange,
        options: &QueryOptions,
        allowed: Option<&[String]>,
    ) -> db::Result<Vec<Object>> {
        let mut found = Vec::new();
        if range.first() == range.last() {
            let address = range.first().to_string();
            for class in &self.config.address_classes {
                let class = self.database.primary_class(class);
                if permits(allowed, &class) {
                    found.extend(self.database.try_fetch(&class, &address)?);
                }
            }
        }

        let networks = range.networks();
        let Some(query_net) = networks.first() else {
            return Ok(found);
        };
        let inetnum_classes = permitted(INETNUM_CLASSES, allowed);
        let route_classes = permitted(ROUTE_CLASSES, allowed);
        let wanted = |stored: &IpRange| {
            if options.exact_match {
                stored == range
            } else {
                stored.contains_range(range)
            }
        };

        if !inetnum_classes.is_empty() {
            let mut best: Option<(IpRange, Object)> = None;
            for object in self.fetch_matches(self.covering(query_net, &inetnum_classes)?)? {
                let Ok(stored) = object.key().parse::<IpRange>() else {
                    continue;
                };
                let smaller = best.as_ref().map_or(true, |(b, _)| stored.span() < b.span());
                if wanted(&stored) && smaller {
                    best = Some((stored, object));
                }
            }

            if let Some((best_range, object)) = best {
                found.push(object);
                if options.less_specific_levels != 0 {
                    found.extend(self.less_specific_inetnums(
                        &best_range,
                        options.less_specific_levels,
                        &inetnum_classes,
                    )?);
                }
            }
        }

        if !route_classes.is_empty() {
            for object in self.fetch_matches(self.covering(query_net, &route_classes)?)? {
                if let Ok(prefix) = net::parse_network(object.key()) {
                    if wanted(&IpRange::from(prefix)) {
                        found.push(object);
                    }
                }
            }
        }

        if options.more_specific_levels != 0 {
            let classes: Vec<String> = inetnum_classes.into_iter().chain(route_classes).collect();
            if !classes.is_empty() {
                let mut matches = Vec::new();
                for network in &networks {
                    matches.extend(self.more_specifics(
                        network,
                        options.more_specific_levels,
                        &classes,
                    )?);
                }
                found.extend(self.fetch_matches(matches)?);
            }
        }
        Ok(found)
    }

    /// Returns the inetnums strictly containing `range`, most specific
    /// first.
    fn less_specific_inetnums(
        &self,
        range: &IpRange,
        levels: i32,
        classes: &[String],
    ) -> db::Result<Vec<Object>> {
        let Some(network) = range.networks().into_iter().next() else {
            return Ok(Vec::new());
        };
        let objects = self.fetch_matches(self.less_specifics(&network, levels, classes)?)?;
        Ok(objects
            .into_iter()
            .filter(|object| {
                object.key().parse::<IpRange>().map_or(false, |stored| {
                    stored != *range && stored.contains_range(range)
                })
            })
            .collect())
    }

    fn covering(&self, network: &IpNet, classes: &[String]) -> db::Result<Vec<Match>> {
        match self.index {
            Some(ref index) => Ok(index.covering(network, Some(classes))),
            None => covering_by_fetch(self.database.as_ref(), network, classes),
        }
    }

    fn less_specifics(
        &self,
        network: &IpNet,
        levels: i32,
        classes: &[String],
    ) -> db::Result<Vec<Match>> {
        match self.index {
            Some(ref index) => Ok(index.less_specifics(network, levels, Some(classes))),
            None => less_specifics_by_fetch(self.database.as_ref(), network, levels, classes),
        }
    }

    fn more_specifics(
        &self,
        network: &IpNet,
        levels: i32,
        classes: &[String],
    ) -> db::Result<Vec<Match>> {
        match self.index {
            Some(ref index) => Ok(index.more_specifics(network, levels, Some(classes))),
            None => more_specifics_by_scan(self.database.as_ref(), network, levels, classes),
        }
    }

    /// Fetches the objects of index matches, in order and without
    /// repeats. Objects removed since the index was built are skipped.
    fn fetch_matches(&self, matches: Vec<Match>) -> db::Result<Vec<Object>> {
        let mut seen = HashSet::new();
        let mut objects = Vec::new();
        for (_, id) in matches {
            if seen.contains(&id) {
                continue;
            }
            if let Some(object) = self.database.try_fetch(&id.class, &id.key)? {
                objects.push(object);
            }
            seen.insert(id);
        }
        Ok(objects)
    }
}

/// Returns the members of `classes` that pass `allowed`.
fn permitted(classes: &[&str], allowed: Option<&[String]>) -> Vec<String> {
    classes
        .iter()
        .filter(|class| permits(allowed, class))
        .map(|class| class.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::tests::make_database;
    use super::super::EngineConfig;
    use super::*;

    #[test]
    fn legacy_ranges_match_by_containment() {
        let (_dir, database) = make_database(&[
            "inetnum: 192.0.2.0 - 192.0.2.255\nnetname: LEGACY\n",
            "inetnum: 192.0.2.64 - 192.0.2.191\nnetname: ODD\n",
            "inetnum: 192.0.0.0/16\nnetname: WIDE\n",
        ]);
        for index in [true, false] {
            let config = EngineConfig {
                index,
                ..EngineConfig::default()
            };
            let engine = Engine::new(Arc::clone(&database), config).unwrap();
            let netname = |term: &str| {
                let range: IpRange = term.parse().unwrap();
                let found = engine
                    .query_network(&range, &QueryOptions::default(), None)
                    .unwrap();
                found[0].get("netname").unwrap().to_owned()
            };
            // 192.0.2.64 - 192.0.2.191 is made of two /26 blocks; both
            // can be found.
            assert_eq!(netname("192.0.2.70"), "ODD");
            assert_eq!(netname("192.0.2.150"), "ODD");
            assert_eq!(netname("192.0.2.64 - 192.0.2.191"), "ODD");
            assert_eq!(netname("192.0.2.10"), "LEGACY");
            assert_eq!(netname("192.0.2.60 - 192.0.2.70"), "LEGACY");
            assert_eq!(netname("192.0.3.1"), "WIDE");
        }
    }
}
