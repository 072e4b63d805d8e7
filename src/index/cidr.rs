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

//! The [`CidrIndex`] type and the fallback lookups used without it.

use ipnet::IpNet;
use log::debug;

use crate::db::{self, Database, KeyFilter};
use crate::net::{self, network_bits, IpRange};
use crate::object::class::{INETNUM_CLASSES, ROUTE_CLASSES};
use crate::object::ObjectId;

/// A stored network and the object it came from.
pub type Match = (IpNet, ObjectId);

////////////////////////////////////////////////////////////////////////
// THE INDEX                                                          //
////////////////////////////////////////////////////////////////////////

/// An in-memory binary trie of the networks described by `inetnum`,
/// `inet6num`, `route`, and `route6` objects.
///
/// Each object is entered under every CIDR block of its key (a legacy
/// `first - last` range may need several). Lookups walk at most one
/// node per prefix bit.
#[derive(Debug, Default)]
pub struct CidrIndex {
    v4: Node,
    v6: Node,
    len: usize,
}

#[derive(Debug, Default)]
struct Node {
    network: Option<IpNet>,
    entries: Vec<ObjectId>,
    children: [Option<Box<Node>>; 2],
}

impl Node {
    fn matching<'a>(&'a self, classes: Option<&'a [String]>) -> impl Iterator<Item = &'a ObjectId> {
        self.entries
            .iter()
            .filter(move |id| classes.map_or(true, |classes| classes.contains(&id.class)))
    }

    fn has_matching(&self, classes: Option<&[String]>) -> bool {
        self.matching(classes).next().is_some()
    }
}

fn bit(bits: u128, index: u8) -> usize {
    ((bits >> (127 - index as u32)) & 1) as usize
}

impl CidrIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an index of every network object in `database`.
    pub fn build<D: Database + ?Sized>(database: &D) -> db::Result<Self> {
        let mut index = Self::new();
        let classes: Vec<String> = INETNUM_CLASSES
            .iter()
            .chain(ROUTE_CLASSES)
            .map(|class| class.to_string())
            .collect();
        for id in database.lookup(Some(&classes), &KeyFilter::Any)? {
            match networks_of(&id) {
                Ok(networks) => {
                    for network in networks {
                        index.insert(network, id.clone());
                    }
                }
                Err(e) => debug!("Not indexing {}: {:?}", id, e),
            }
        }
        debug!("Indexed {} networks", index.len());
        Ok(index)
    }

    /// Returns the number of (network, object) entries.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn root(&self, network: &IpNet) -> &Node {
        match network {
            IpNet::V4(_) => &self.v4,
            IpNet::V6(_) => &self.v6,
        }
    }

    /// Adds an entry for `id` under `network`.
    pub fn insert(&mut self, network: IpNet, id: ObjectId) {
        let network = network.trunc();
        let bits = network_bits(&network);
        let mut node = match network {
            IpNet::V4(_) => &mut self.v4,
            IpNet::V6(_) => &mut self.v6,
        };
        for i in 0..network.prefix_len() {
            node = node.children[bit(bits, i)]
                .get_or_insert_with(Box::default)
                .as_mut();
        }
        node.network = Some(network);
        if !node.entries.contains(&id) {
            node.entries.push(id);
            self.len += 1;
        }
    }

    /// Removes the entry for `id` under `network`, if present.
    pub fn remove(&mut self, network: IpNet, id: &ObjectId) {
        let network = network.trunc();
        let bits = network_bits(&network);
        let mut node = match network {
            IpNet::V4(_) => &mut self.v4,
            IpNet::V6(_) => &mut self.v6,
        };
        for i in 0..network.prefix_len() {
            match node.children[bit(bits, i)].as_deref_mut() {
                Some(child) => node = child,
                None => return,
            }
        }
        let before = node.entries.len();
        node.entries.retain(|entry| entry != id);
        self.len -= before - node.entries.len();
    }

    /// Returns the path of nodes from the root towards `network`, up to
    /// and including the node for `network` itself if it exists.
    fn path(&self, network: &IpNet) -> Vec<&Node> {
        let network = network.trunc();
        let bits = network_bits(&network);
        let mut node = self.root(&network);
        let mut path = vec![node];
        for i in 0..network.prefix_len() {
            match node.children[bit(bits, i)].as_deref() {
                Some(child) => {
                    node = child;
                    path.push(node);
                }
                None => break,
            }
        }
        path
    }

    /// Returns the stored networks containing `network` (including
    /// `network` itself), most specific first.
    pub fn covering(&self, network: &IpNet, classes: Option<&[String]>) -> Vec<Match> {
        let mut matches = Vec::new();
        for node in self.path(network).into_iter().rev() {
            if let Some(stored) = node.network {
                matches.extend(node.matching(classes).map(|id| (stored, id.clone())));
            }
        }
        matches
    }

    /// Returns the stored networks strictly containing `network`, most
    /// specific first, from at most `levels` distinct prefixes (all of
    /// them if `levels` is negative).
    pub fn less_specifics(
        &self,
        network: &IpNet,
        levels: i32,
        classes: Option<&[String]>,
    ) -> Vec<Match> {
        let network = network.trunc();
        let covering = self
            .covering(&network, classes)
            .into_iter()
            .filter(|(stored, _)| stored.prefix_len() < network.prefix_len());
        limit_levels(covering, levels)
    }

    /// Returns the stored networks strictly inside `network`, least
    /// specific first. A network's level is one more than the number of
    /// stored networks between it and `network`; only those up to
    /// `levels` are returned (all of them if `levels` is negative).
    pub fn more_specifics(
        &self,
        network: &IpNet,
        levels: i32,
        classes: Option<&[String]>,
    ) -> Vec<Match> {
        let network = network.trunc();
        let path = self.path(&network);
        let Some(start) = path.last().filter(|_| path.len() == network.prefix_len() as usize + 1) else {
            return Vec::new();
        };

        let mut found = Vec::new();
        let mut stack: Vec<(&Node, i32)> = start
            .children
            .iter()
            .flatten()
            .map(|child| (child.as_ref(), 1))
            .collect();
        while let Some((node, level)) = stack.pop() {
            let mut next_level = level;
            if let Some(stored) = node.network.filter(|_| node.has_matching(classes)) {
                if levels >= 0 && level > levels {
                    continue;
                }
                found.extend(node.matching(classes).map(|id| (stored, id.clone())));
                next_level += 1;
            }
            stack.extend(
                node.children
                    .iter()
                    .flatten()
                    .map(|child| (child.as_ref(), next_level)),
            );
        }
        found.sort_by(|(a, a_id), (b, b_id)| {
            (a.prefix_len(), a.network(), a_id).cmp(&(b.prefix_len(), b.network(), b_id))
        });
        found
    }
}

/// Keeps the matches from the first `levels` distinct networks of a
/// list ordered by prefix length.
fn limit_levels(matches: impl Iterator<Item = Match>, levels: i32) -> Vec<Match> {
    let mut result: Vec<Match> = Vec::new();
    let mut distinct = 0;
    for (network, id) in matches {
        if result.last().map(|(last, _)| *last) != Some(network) {
            if levels >= 0 && distinct >= levels {
                break;
            }
            distinct += 1;
        }
        result.push((network, id));
    }
    result
}

/// Returns the prefix part of a route's primary key, which is the
/// prefix immediately followed by the origin AS.
pub fn route_key_prefix(key: &str) -> &str {
    let lower = key.to_ascii_lowercase();
    match lower.rfind("as") {
        Some(index) => key[..index].trim(),
        None => key.trim(),
    }
}

/// Returns the networks under which an object is indexed.
fn networks_of(id: &ObjectId) -> Result<Vec<IpNet>, net::AddressError> {
    if ROUTE_CLASSES.contains(&id.class.as_str()) {
        Ok(vec![net::parse_network(route_key_prefix(&id.key))?])
    } else {
        Ok(id.key.parse::<IpRange>()?.networks())
    }
}

////////////////////////////////////////////////////////////////////////
// FALLBACK LOOKUPS                                                   //
////////////////////////////////////////////////////////////////////////

/// Finds the stored networks containing `network` without an index, by
/// fetching each of its supernets in turn. Inetnums keyed in CIDR
/// notation are found under each supernet; those keyed as a `first -
/// last` range are matched on the CIDR block of their range that
/// contains `network`. Routes are matched on the prefix part of their
/// keys.
pub fn covering_by_fetch<D: Database + ?Sized>(
    database: &D,
    network: &IpNet,
    classes: &[String],
) -> db::Result<Vec<Match>> {
    let network = network.trunc();
    let inetnum_classes: Vec<String> = classes
        .iter()
        .filter(|class| INETNUM_CLASSES.contains(&class.as_str()))
        .cloned()
        .collect();
    let route_classes: Vec<String> = classes
        .iter()
        .filter(|class| ROUTE_CLASSES.contains(&class.as_str()))
        .cloned()
        .collect();

    let mut matches = Vec::new();
    for prefix_len in (0..=network.prefix_len()).rev() {
        let Ok(supernet) = IpNet::new(network.network(), prefix_len).map(|net| net.trunc()) else {
            continue;
        };

        if !inetnum_classes.is_empty() {
            let spelling = supernet.to_string();
            for id in database.lookup(Some(&inetnum_classes), &KeyFilter::Exact(&spelling))? {
                matches.push((supernet, id));
            }
        }

        if !route_classes.is_empty() {
            let is_route_of_supernet = |key: &str| {
                net::parse_network(route_key_prefix(key)).map_or(false, |net| net == supernet)
            };
            let ids = database.lookup(
                Some(&route_classes),
                &KeyFilter::Predicate(&is_route_of_supernet),
            )?;
            matches.extend(ids.into_iter().map(|id| (supernet, id)));
        }
    }

    if !inetnum_classes.is_empty() {
        let containing_block = |key: &str| {
            if !key.contains('-') {
                return None;
            }
            let range = key.parse::<IpRange>().ok()?;
            range
                .networks()
                .into_iter()
                .find(|block| block.contains(&network))
        };
        let in_range = |key: &str| containing_block(key).is_some();
        for id in database.lookup(Some(&inetnum_classes), &KeyFilter::Predicate(&in_range))? {
            if let Some(block) = containing_block(&id.key) {
                matches.push((block, id));
            }
        }
        matches.sort_by(|(a, _), (b, _)| b.prefix_len().cmp(&a.prefix_len()));
    }
    Ok(matches)
}

/// Finds the stored networks strictly containing `network` without an
/// index, with the same level semantics as
/// [`CidrIndex::less_specifics`].
pub fn less_specifics_by_fetch<D: Database + ?Sized>(
    database: &D,
    network: &IpNet,
    levels: i32,
    classes: &[String],
) -> db::Result<Vec<Match>> {
    let network = network.trunc();
    let covering = covering_by_fetch(database, &network, classes)?
        .into_iter()
        .filter(|(stored, _)| stored.prefix_len() < network.prefix_len());
    Ok(limit_levels(covering, levels))
}

/// Finds the stored networks inside `network` without a persistent
/// index, by indexing the candidate classes on the fly.
pub fn more_specifics_by_scan<D: Database + ?Sized>(
    database: &D,
    network: &IpNet,
    levels: i32,
    classes: &[String],
) -> db::Result<Vec<Match>> {
    let mut index = CidrIndex::new();
    for id in database.lookup(Some(classes), &KeyFilter::Any)? {
        if let Ok(networks) = networks_of(&id) {
            for stored in networks.into_iter().filter(|stored| network.contains(stored)) {
                index.insert(stored, id.clone());
            }
        }
    }
    Ok(index.more_specifics(network, levels, None))
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::db::{FileDatabase, SaveOptions};
    use crate::object::Object;

    fn net(text: &str) -> IpNet {
        text.parse().unwrap()
    }

    fn id(class: &str, key: &str) -> ObjectId {
        ObjectId::new(class, key)
    }

    fn sample_index() -> CidrIndex {
        let mut index = CidrIndex::new();
        for key in ["10.0.0.0/8", "10.1.0.0/16", "10.1.2.0/24", "10.1.3.0/24", "10.2.0.0/16"] {
            index.insert(net(key), id("inetnum", key));
        }
        index.insert(net("10.1.2.0/24"), id("route", "10.1.2.0/24AS1"));
        index.insert(net("2001:db8::/32"), id("inet6num", "2001:db8::/32"));
        index
    }

    fn keys(matches: &[Match]) -> Vec<&str> {
        matches.iter().map(|(_, id)| id.key.as_str()).collect()
    }

    #[test]
    fn covering_is_most_specific_first() {
        let index = sample_index();
        assert_eq!(index.len(), 7);
        let inetnums = vec!["inetnum".to_owned()];
        assert_eq!(
            keys(&index.covering(&net("10.1.2.3/32"), Some(&inetnums))),
            ["10.1.2.0/24", "10.1.0.0/16", "10.0.0.0/8"]
        );
        assert_eq!(
            keys(&index.covering(&net("10.1.2.0/24"), None)),
            ["10.1.2.0/24", "10.1.2.0/24AS1", "10.1.0.0/16", "10.0.0.0/8"]
        );
        assert!(index.covering(&net("192.0.2.0/24"), None).is_empty());
        assert_eq!(keys(&index.covering(&net("2001:db8::1/128"), None)), ["2001:db8::/32"]);
    }

    #[test]
    fn less_specifics_exclude_the_network_itself() {
        let index = sample_index();
        let inetnums = vec!["inetnum".to_owned()];
        assert_eq!(
            keys(&index.less_specifics(&net("10.1.2.0/24"), 1, Some(&inetnums))),
            ["10.1.0.0/16"]
        );
        assert_eq!(
            keys(&index.less_specifics(&net("10.1.2.0/24"), -1, Some(&inetnums))),
            ["10.1.0.0/16", "10.0.0.0/8"]
        );
        assert!(index.less_specifics(&net("10.1.2.0/24"), 0, None).is_empty());
    }

    #[test]
    fn more_specifics_respect_levels() {
        let index = sample_index();
        let inetnums = vec!["inetnum".to_owned()];
        assert_eq!(
            keys(&index.more_specifics(&net("10.0.0.0/8"), 1, Some(&inetnums))),
            ["10.1.0.0/16", "10.2.0.0/16"]
        );
        assert_eq!(
            keys(&index.more_specifics(&net("10.0.0.0/8"), -1, Some(&inetnums))),
            ["10.1.0.0/16", "10.2.0.0/16", "10.1.2.0/24", "10.1.3.0/24"]
        );
        assert!(index.more_specifics(&net("10.3.0.0/16"), -1, None).is_empty());
        assert!(index.more_specifics(&net("10.1.2.0/24"), -1, None).is_empty());
    }

    #[test]
    fn more_specifics_need_no_stored_start() {
        let index = sample_index();
        assert_eq!(
            keys(&index.more_specifics(&net("10.1.0.0/17"), 1, None)),
            ["10.1.2.0/24", "10.1.2.0/24AS1", "10.1.3.0/24"]
        );
    }

    #[test]
    fn remove_drops_entries() {
        let mut index = sample_index();
        index.remove(net("10.1.0.0/16"), &id("inetnum", "10.1.0.0/16"));
        assert_eq!(index.len(), 6);
        assert_eq!(
            keys(&index.covering(&net("10.1.9.9/32"), None)),
            ["10.0.0.0/8"]
        );
    }

    #[test]
    fn route_keys_split_at_origin() {
        assert_eq!(route_key_prefix("192.0.2.0/24AS64512"), "192.0.2.0/24");
        assert_eq!(route_key_prefix("2001:db8::/32as1"), "2001:db8::/32");
        assert_eq!(route_key_prefix("192.0.2.0/24"), "192.0.2.0/24");
    }

    fn sample_database() -> (TempDir, FileDatabase) {
        let dir = TempDir::new().unwrap();
        let database = FileDatabase::create(dir.path(), "TEST").unwrap();
        for text in [
            "inetnum: 10.0.0.0/8\n",
            "inetnum: 10.1.0.0 - 10.1.255.255\n",
            "inetnum: 10.1.2.0 - 10.1.4.255\n",
            "route: 10.1.0.0/16\norigin: AS1\n",
        ] {
            let object: Object = text.parse().unwrap();
            database.save(&object, SaveOptions::default()).unwrap();
        }
        (dir, database)
    }

    #[test]
    fn built_index_matches_fallbacks() {
        let (_dir, database) = sample_database();
        let index = CidrIndex::build(&database).unwrap();
        // The legacy range 10.1.2.0 - 10.1.4.255 needs two blocks.
        assert_eq!(index.len(), 5);

        let all: Vec<String> = ["inetnum", "route"].iter().map(|c| c.to_string()).collect();
        let query = net("10.1.0.0/16");
        let mut indexed = index.covering(&query, None);
        let mut fetched = covering_by_fetch(&database, &query, &all).unwrap();
        indexed.sort();
        fetched.sort();
        assert_eq!(indexed, fetched);
        assert_eq!(fetched.len(), 3);

        assert_eq!(
            keys(&more_specifics_by_scan(&database, &net("10.0.0.0/8"), -1, &all).unwrap()),
            keys(&index.more_specifics(&net("10.0.0.0/8"), -1, None))
        );

        let inetnums = vec!["inetnum".to_owned()];
        let query = net("10.1.9.0/24");
        assert_eq!(
            less_specifics_by_fetch(&database, &query, 1, &inetnums).unwrap(),
            index.less_specifics(&query, 1, Some(&inetnums))
        );
        assert_eq!(
            keys(&less_specifics_by_fetch(&database, &query, -1, &inetnums).unwrap()),
            ["10.1.0.0 - 10.1.255.255", "10.0.0.0/8"]
        );
    }
}
