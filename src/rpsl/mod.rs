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

//! Reading and writing of the RPSL object text format.
//!
//! This module provides the [`Parser`] structure, which accepts a
//! stream implementing the [`BufRead`] trait. It can subsequently be
//! iterated over to read the [`Object`]s in the stream. Objects are
//! separated by blank lines. Each line of an object is either a
//! `key: value` attribute or a continuation of the previous attribute's
//! value (a line starting with a space, a tab, or `+`).
//!
//! Lines starting with `%` are comments, as are lines starting with `#`
//! outside of an object (or anywhere, with `hash-comment` enabled).
//! Comment lines of the form `%! pragma <name> [<value>]` change how
//! the rest of the input is read; see [`ParseOptions`]. A pragma given
//! between objects applies to the rest of the stream, while a pragma
//! given inside an object applies only until the end of that object.
//!
//! The parser recovers from syntax errors: after reporting one, it
//! skips to the end of the offending object and carries on. I/O errors
//! end iteration.
//!
//! ```
//! use nicdb::rpsl::Parser;
//!
//! const TEXT: &[u8] = b"% a comment
//! person:  John Doe
//! address: Example Street 1
//!          Example City
//! nic-hdl: JD1-TEST
//!
//! mntner: EX-MNT
//! ";
//!
//! let mut parser = Parser::new(TEXT);
//! let person = parser.next().unwrap().unwrap();
//! assert_eq!(person.get("address"), Some("Example Street 1\nExample City"));
//! assert_eq!(parser.next().unwrap().unwrap().key(), "EX-MNT");
//! assert!(parser.next().is_none());
//! ```
//!
//! Objects are written back out with a [`PrettyPrinter`].

use std::io::BufRead;

use crate::object::{Attribute, Object};
use crate::util::decode_text;

pub mod error;
mod pragma;
mod printer;

use error::ErrorKind;
pub use error::{Error, Result};
pub use printer::PrettyPrinter;

////////////////////////////////////////////////////////////////////////
// PARSER OPTIONS                                                     //
////////////////////////////////////////////////////////////////////////

/// The sequence used to join the lines of a multi-line value.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Newline {
    Cr,
    Lf,
    CrLf,

    /// Lines are joined with a single space, producing a one-line
    /// value.
    None,
}

impl Newline {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cr => "\r",
            Self::Lf => "\n",
            Self::CrLf => "\r\n",
            Self::None => " ",
        }
    }
}

/// Settings controlling how a [`Parser`] reads its input. Each field
/// corresponds to a pragma.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ParseOptions {
    /// `whitespace-preserve`: keep leading and trailing whitespace of
    /// values and continuation lines.
    pub preserve_whitespace: bool,

    /// `newline-type`: how continuation lines are joined.
    pub newline: Newline,

    /// `stop-at-empty-line`: whether a blank line ends an object.
    pub stop_at_empty_line: bool,

    /// `condense-whitespace`: collapse runs of whitespace in each value
    /// line to a single space.
    pub condense_whitespace: bool,

    /// `strict-ripe`: only accept keys matching `[A-Za-z0-9-]+`.
    pub strict_ripe: bool,

    /// `hash-comment`: treat `#` lines inside objects as comments.
    pub hash_comment: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            preserve_whitespace: false,
            newline: Newline::Lf,
            stop_at_empty_line: true,
            condense_whitespace: false,
            strict_ripe: false,
            hash_comment: false,
        }
    }
}

////////////////////////////////////////////////////////////////////////
// PARSER                                                             //
////////////////////////////////////////////////////////////////////////

/// A parser for streams of RPSL objects. See the
/// [module-level documentation](`self`) for details.
pub struct Parser<S> {
    stream: S,
    line: usize,
    buffer: Vec<u8>,
    options: ParseOptions,
    recovering: bool,
    error: bool,
}

impl<S: BufRead> Parser<S> {
    /// Creates a new [`Parser`] with default options.
    pub fn new(stream: S) -> Self {
        Self::with_options(stream, ParseOptions::default())
    }

    /// Creates a new [`Parser`] with the given initial options.
    pub fn with_options(stream: S, options: ParseOptions) -> Self {
        Self {
            stream,
            line: 0,
            buffer: Vec::new(),
            options,
            recovering: false,
            error: false,
        }
    }

    /// Returns the number of lines read so far.
    pub fn line(&self) -> usize {
        self.line
    }

    /// Reads the next line, without its line terminator. Returns `None`
    /// at the end of the input.
    fn read_line(&mut self) -> Result<Option<String>> {
        self.buffer.clear();
        if self.stream.read_until(b'\n', &mut self.buffer)? == 0 {
            return Ok(None);
        }
        self.line += 1;
        if self.buffer.last() == Some(&b'\n') {
            self.buffer.pop();
        }
        if self.buffer.last() == Some(&b'\r') {
            self.buffer.pop();
        }
        Ok(Some(decode_text(&self.buffer).into_owned()))
    }

    /// Skips the remainder of an object in which a syntax error was
    /// found.
    fn skip_to_blank_line(&mut self) -> Result<()> {
        while let Some(line) = self.read_line()? {
            if is_blank(&line, &self.options) {
                break;
            }
        }
        Ok(())
    }

    /// Reads the next object. Returns `None` at the end of the input.
    fn parse_object(&mut self) -> Result<Option<Object>> {
        let mut local = self.options.clone();
        let mut attributes: Vec<Attribute> = Vec::new();

        while let Some(line) = self.read_line()? {
            if is_blank(&line, &local) {
                if attributes.is_empty() || !local.stop_at_empty_line {
                    continue;
                } else {
                    break;
                }
            }

            if let Some(rest) = line.strip_prefix("%!") {
                let pragma = pragma::parse_pragma(rest, self.line);
                if let Some(pragma) = self.in_object(pragma, &attributes)? {
                    pragma.apply(&mut local);
                    if attributes.is_empty() {
                        pragma.apply(&mut self.options);
                    }
                }
                continue;
            } else if line.starts_with('%')
                || (line.starts_with('#') && (attributes.is_empty() || local.hash_comment))
            {
                continue;
            }

            if line.starts_with([' ', '\t', '+']) {
                let Some(last) = attributes.last_mut() else {
                    return Err(Error::new(self.line, ErrorKind::ContinuationWithoutAttribute));
                };
                last.value.push_str(local.newline.as_str());
                last.value.push_str(&clean_value(&line[1..], &local));
            } else {
                let attribute = parse_attribute(&line, &local, self.line);
                let attribute = self.in_object(attribute, &attributes)?;
                attributes.push(attribute);
            }
        }

        Ok(Object::from_attributes(attributes))
    }

    /// Passes a result through, arranging for the rest of the current
    /// object to be skipped if it is an error raised inside an object.
    fn in_object<T>(&mut self, result: Result<T>, attributes: &[Attribute]) -> Result<T> {
        if result.is_err() && !attributes.is_empty() {
            self.recovering = true;
        }
        result
    }
}

impl<S: BufRead> Iterator for Parser<S> {
    type Item = Result<Object>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.error {
            return None;
        }

        let result = if self.recovering {
            self.recovering = false;
            self.skip_to_blank_line()
                .and_then(|()| self.parse_object())
        } else {
            self.parse_object()
        };

        match result {
            Ok(Some(object)) => Some(Ok(object)),
            Ok(None) => None,
            Err(Error::Io(e)) => {
                self.error = true;
                Some(Err(Error::Io(e)))
            }
            Err(e) => Some(Err(e)),
        }
    }
}

////////////////////////////////////////////////////////////////////////
// LINE HELPERS                                                       //
////////////////////////////////////////////////////////////////////////

fn is_blank(line: &str, options: &ParseOptions) -> bool {
    line.is_empty() || (!options.preserve_whitespace && line.trim().is_empty())
}

/// Splits a `key: value` line.
fn parse_attribute(line: &str, options: &ParseOptions, line_number: usize) -> Result<Attribute> {
    let Some((key, value)) = line.split_once(':') else {
        return Err(Error::new(line_number, ErrorKind::MissingColon));
    };
    let key = key.trim();
    if !is_valid_key(key, options.strict_ripe) {
        return Err(Error::new(line_number, ErrorKind::InvalidKey(key.to_owned())));
    }
    Ok(Attribute::new(key, clean_value(value, options)))
}

fn is_valid_key(key: &str, strict: bool) -> bool {
    if key.is_empty() {
        false
    } else if strict {
        key.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
    } else {
        !key.contains(char::is_whitespace)
    }
}

fn clean_value(value: &str, options: &ParseOptions) -> String {
    if options.condense_whitespace {
        value.split_whitespace().collect::<Vec<_>>().join(" ")
    } else if options.preserve_whitespace {
        value.to_owned()
    } else {
        value.trim().to_owned()
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(text: &str) -> Vec<Result<Object>> {
        Parser::new(text.as_bytes()).collect()
    }

    fn parse_ok(text: &str) -> Vec<Object> {
        parse_all(text).into_iter().map(|r| r.unwrap()).collect()
    }

    #[test]
    fn parses_attributes_and_continuations() {
        let objects = parse_ok(
            "\n\n# leading comment\n\
             inetnum:   192.0.2.0 - 192.0.2.255\n\
             descr:     first\n\
             \tsecond\n\
             +\n\
             +   fourth  \n\
             % comment inside\n\
             country:EX\n",
        );
        assert_eq!(objects.len(), 1);
        let object = &objects[0];
        assert_eq!(object.class(), "inetnum");
        assert_eq!(object.key(), "192.0.2.0 - 192.0.2.255");
        assert_eq!(object.get("descr"), Some("first\nsecond\n\nfourth"));
        assert_eq!(object.get("country"), Some("EX"));
        assert_eq!(object.attributes().len(), 3);
    }

    #[test]
    fn blank_lines_separate_objects() {
        let objects = parse_ok("a: 1\nb: 2\n\n   \nc: 3\r\n\r\nd: 4");
        let keys: Vec<_> = objects.iter().map(|o| o.key()).collect();
        assert_eq!(keys, ["1", "3", "4"]);
        assert_eq!(objects[0].get("b"), Some("2"));
    }

    #[test]
    fn empty_input_yields_nothing() {
        assert!(parse_all("").is_empty());
        assert!(parse_all("\n% only a comment\n\n").is_empty());
    }

    #[test]
    fn hash_lines_inside_objects_need_pragma() {
        let objects = parse_ok("a: 1\n#b: 2\n\n%! pragma hash-comment\nc: 3\n#d: 4\n");
        assert_eq!(objects[0].get("#b"), Some("2"));
        assert_eq!(objects[1].attributes().len(), 1);
    }

    #[test]
    fn pragmas_outside_objects_persist() {
        let objects = parse_ok(
            "%! pragma condense-whitespace\n\
             a:   x    y\n\
             \n\
             b:  p    q\n",
        );
        assert_eq!(objects[0].key(), "x y");
        assert_eq!(objects[1].key(), "p q");
    }

    #[test]
    fn pragmas_inside_objects_are_local() {
        let objects = parse_ok(
            "a: 1\n\
             %! pragma newline-type crlf\n\
             b: x\n\
             \x20y\n\
             \n\
             c: z\n\
             \x20w\n",
        );
        assert_eq!(objects[0].get("b"), Some("x\r\ny"));
        assert_eq!(objects[1].key(), "z\nw");
    }

    #[test]
    fn stop_at_empty_line_off_joins_objects() {
        let objects = parse_ok("%! pragma stop-at-empty-line off\na: 1\n\nb: 2\n");
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].get("b"), Some("2"));
    }

    #[test]
    fn whitespace_preserve_keeps_spacing() {
        let objects = parse_ok("%! pragma whitespace-preserve on\na:  x \n   y\n");
        assert_eq!(objects[0].key(), "  x \n  y");
    }

    #[test]
    fn strict_ripe_rejects_odd_keys() {
        let results = parse_all("%! pragma strict-ripe\nbad_key: 1\n\ngood-key: 2\n");
        assert_eq!(
            results[0].as_ref().unwrap_err().kind(),
            Some(&ErrorKind::InvalidKey("bad_key".to_owned()))
        );
        assert_eq!(results[1].as_ref().unwrap().key(), "2");
    }

    #[test]
    fn recovers_after_syntax_errors() {
        let results = parse_all("a: 1\nno colon here\nb: 2\n\nc: 3\n");
        assert_eq!(results.len(), 2);
        match &results[0] {
            Err(Error::Syntax(details)) => {
                assert_eq!(details.line(), 2);
                assert_eq!(details.kind(), &ErrorKind::MissingColon);
            }
            other => panic!("expected a syntax error, got {:?}", other),
        }
        assert_eq!(results[1].as_ref().unwrap().key(), "3");
    }

    #[test]
    fn rejects_leading_continuation() {
        let results = parse_all(" orphan\na: 1\n");
        assert_eq!(
            results[0].as_ref().unwrap_err().kind(),
            Some(&ErrorKind::ContinuationWithoutAttribute)
        );
        assert_eq!(results[1].as_ref().unwrap().key(), "1");
    }

    #[test]
    fn unknown_pragma_between_objects_does_not_skip() {
        let results = parse_all("%! pragma bogus\na: 1\n");
        assert!(results[0].is_err());
        assert_eq!(results[1].as_ref().unwrap().key(), "1");
    }

    #[test]
    fn decodes_latin_9() {
        let objects: Vec<_> = Parser::new(&b"person: Andr\xe9\n"[..])
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(objects[0].key(), "Andr\u{e9}");
    }
}
