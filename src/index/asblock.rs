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

//! Lookups of `as-block` objects by AS number.

use crate::db::{self, Database, KeyFilter};
use crate::net::parse_as_range;
use crate::object::class::AS_BLOCK;
use crate::object::{AsBlock, Object};

/// Returns the `as-block` objects whose range includes `asn`, smallest
/// range first. Blocks of equal size are ordered by their first AS
/// number.
pub fn containing_as_blocks<D: Database + ?Sized>(
    database: &D,
    asn: u32,
) -> db::Result<Vec<Object>> {
    let contains_asn = |key: &str| {
        parse_as_range(key).map_or(false, |(first, last)| AsBlock::new(first, last).contains(asn))
    };
    let mut blocks = Vec::new();
    let classes = [AS_BLOCK.to_owned()];
    for id in database.lookup(Some(&classes), &KeyFilter::Predicate(&contains_asn))? {
        if let Some(object) = database.try_fetch(&id.class, &id.key)? {
            if let Ok((first, last)) = parse_as_range(object.key()) {
                blocks.push((AsBlock::new(first, last), object));
            }
        }
    }
    blocks.sort_by_key(|(block, _)| (block.size(), *block.range().start()));
    Ok(blocks.into_iter().map(|(_, object)| object).collect())
}

/// Finds the `as-block` object covering exactly `first` to `last`,
/// however its key is spaced.
pub fn find_as_block<D: Database + ?Sized>(
    database: &D,
    first: u32,
    last: u32,
) -> db::Result<Option<Object>> {
    let is_range = |key: &str| parse_as_range(key) == Ok((first, last));
    let classes = [AS_BLOCK.to_owned()];
    for id in database.lookup(Some(&classes), &KeyFilter::Predicate(&is_range))? {
        if let Some(object) = database.try_fetch(&id.class, &id.key)? {
            return Ok(Some(object));
        }
    }
    Ok(None)
}
