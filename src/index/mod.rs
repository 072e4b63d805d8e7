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

//! Lookup structures and algorithms over the objects of a
//! [`Database`](crate::db::Database).
//!
//! Networks are found with a [`CidrIndex`] when one has been built, and
//! otherwise by the slower [`covering_by_fetch`] and
//! [`more_specifics_by_scan`], which need nothing but the database.
//! AS numbers are matched against `as-block` ranges by
//! [`containing_as_blocks`]. The [`rdns`] module converts between
//! networks and their reverse-DNS domains.

mod asblock;
mod cidr;
pub mod rdns;

pub use asblock::{containing_as_blocks, find_as_block};
pub use cidr::{
    covering_by_fetch, less_specifics_by_fetch, more_specifics_by_scan, route_key_prefix, CidrIndex,
    Match,
};
