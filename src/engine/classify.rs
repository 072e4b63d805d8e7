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

//! Classification of free-text query terms.

use regex::Regex;

use crate::net::{parse_as_range, parse_asn, IpRange};
use crate::object::class::{AS_SET, FILTER_SET, IRT, MNTNER, ORGANISATION, PEERING_SET, ROUTE_SET, RTR_SET};
use crate::util::{ends_with_caseless, starts_with_caseless};

/// A configured rule restricting terms that match `pattern` to the
/// given classes.
#[derive(Clone, Debug)]
pub struct TypeHint {
    pub pattern: Regex,
    pub classes: Vec<String>,
}

/// What a free-text term was recognized as.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Kind {
    AsNumber(u32),
    AsRange(u32, u32),
    Class(&'static str),
    Network(IpRange),
    Hinted(Vec<String>),
    Generic,
}

/// Key prefixes that identify a class. They are tried in order, after
/// the `-MNT` suffix of maintainers (except for `ORG-`, which comes
/// first).
const PREFIXES: &[(&str, &str)] = &[
    ("AS-", AS_SET),
    ("RS-", ROUTE_SET),
    ("RTRS-", RTR_SET),
    ("FLTR-", FILTER_SET),
    ("PRNG-", PEERING_SET),
    ("IRT-", IRT),
];

/// Classifies `term`. The first matching rule wins: AS numbers, AS
/// ranges, class-specific key prefixes and suffixes, networks and
/// addresses, type hints, and finally a generic key lookup.
pub fn classify(term: &str, hints: &[TypeHint]) -> Kind {
    if let Ok(asn) = parse_asn(term) {
        return Kind::AsNumber(asn);
    }
    if let Ok((first, last)) = parse_as_range(term) {
        return Kind::AsRange(first, last);
    }
    if starts_with_caseless(term, "ORG-") {
        return Kind::Class(ORGANISATION);
    }
    if ends_with_caseless(term, "-MNT") {
        return Kind::Class(MNTNER);
    }
    for (prefix, class) in PREFIXES {
        if starts_with_caseless(term, prefix) {
            return Kind::Class(*class);
        }
    }
    if let Ok(range) = term.parse::<IpRange>() {
        return Kind::Network(range);
    }
    for hint in hints {
        if hint.pattern.is_match(term) {
            return Kind::Hinted(hint.classes.clone());
        }
    }
    Kind::Generic
}
