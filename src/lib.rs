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

//! A registry database and whois server for RPSL objects: networks,
//! routes, autonomous systems and the handles that administer them.
//!
//! The crate is organized in layers:
//!
//! * [`rpsl`] reads and writes the RPSL text format, and [`object`]
//!   models the objects it describes.
//! * [`db`] stores objects, one file per object, optionally behind a
//!   cache.
//! * [`index`] answers network containment questions, and [`engine`]
//!   turns query terms into primary and related objects.
//! * [`server`] formats whois responses independent of any network
//!   I/O, which [`io`] provides.
//! * [`sync`] brings a database in line with a stream of objects.

pub mod db;
pub mod engine;
pub mod index;
#[cfg(feature = "tokio")]
pub mod io;
pub mod net;
pub mod object;
pub mod rpsl;
pub mod schema;
pub mod server;
pub mod sync;
mod util;
