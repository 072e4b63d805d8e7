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

//! The processing logic of a whois server.
//!
//! The [`Server`] structure is the heart of this module; see its
//! documentation for details.

use std::sync::{Arc, PoisonError, RwLock};

use log::error;

use crate::db::Database;
use crate::engine::{Engine, Event, Term};
use crate::rpsl::PrettyPrinter;

mod request;

pub use request::Request;

/// A whois server, abstracted from any underlying network I/O provider.
///
/// The [`Server`] turns request lines into response text. A request
/// line is parsed with [`Request::parse`]; each of its terms is then
/// answered with [`Server::answer`], which runs the query through the
/// server's [`Engine`] and formats the result. An I/O provider (see
/// [`crate::io`]) is responsible for reading request lines from the
/// network and writing the responses back.
///
/// The engine can be replaced at any time with [`Server::set_engine`],
/// for example after the database has been reloaded.
pub struct Server<D> {
    engine: RwLock<Arc<Engine<D>>>,
    primer: Option<String>,
}

impl<D> Server<D> {
    /// Creates a new `Server` that will answer queries with `engine`.
    pub fn new(engine: Arc<Engine<D>>) -> Self {
        Self {
            engine: RwLock::new(engine),
            primer: None,
        }
    }

    /// Returns the current engine of the server.
    pub fn engine(&self) -> Arc<Engine<D>> {
        self.engine
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Sets the engine of the `Server`. Queries already in progress
    /// continue with the old engine.
    pub fn set_engine(&self, engine: Arc<Engine<D>>) {
        *self.engine.write().unwrap_or_else(PoisonError::into_inner) = engine;
    }

    /// Sets the banner sent at the start of every response.
    pub fn set_primer(&mut self, primer: Option<String>) {
        self.primer = primer;
    }

    /// Returns the banner text to send before any answers, if one is
    /// configured. Every line of it ends in `\n`, and a blank line
    /// follows.
    pub fn primer(&self) -> Option<String> {
        self.primer.as_ref().map(|primer| {
            let mut text = String::new();
            for line in primer.lines() {
                text.push_str(line);
                text.push('\n');
            }
            text.push('\n');
            text
        })
    }
}

impl<D: Database> Server<D> {
    /// Answers a single term of `request`, returning the response text.
    ///
    /// Each primary object is introduced by an `% Information related
    /// to` line (preceded by an `% Abuse contact` line if one is known)
    /// and followed by its related objects. Objects are followed by a
    /// blank line. Database errors are logged and reported to the
    /// client only as `% Internal error`.
    pub fn answer(&self, request: &Request, term: &Term) -> String {
        let engine = self.engine();
        let events = match engine.query(term, &request.options) {
            Ok(events) => events,
            Err(e) => {
                error!("Failed to answer {:?}: {}", term, e);
                return String::from("% Internal error\n\n");
            }
        };
        if !events.iter().any(Event::is_primary) {
            return String::from("% No matching objects found\n\n");
        }

        let mut response = String::new();
        for event in &events {
            let object = match event {
                Event::Primary {
                    object,
                    abuse_contact,
                } => {
                    let key = object.primary_key();
                    if let Some(contact) = abuse_contact {
                        response.push_str(&format!(
                            "% Abuse contact for '{}' is '{}'\n\n",
                            key, contact
                        ));
                    }
                    response.push_str(&format!("% Information related to '{}'\n\n", key));
                    if request.primary_keys_only {
                        response.push_str(&PrettyPrinter::WHOIS.format(&object.primary_key_object()));
                        response.push('\n');
                        continue;
                    }
                    object
                }
                Event::Related(object) => object,
            };
            response.push_str(&PrettyPrinter::WHOIS.format(object));
            response.push('\n');
        }
        response
    }

    /// Answers every term of a request line, including the primer.
    pub fn handle_request(&self, line: &str) -> String {
        let request = Request::parse(line);
        let mut response = self.primer().unwrap_or_default();
        for term in request.terms() {
            response.push_str(&self.answer(&request, &term));
        }
        response
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
