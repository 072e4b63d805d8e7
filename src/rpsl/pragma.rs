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

//! Parsing of `%! pragma` lines.

use super::error::{Error, ErrorKind, Result};
use super::{Newline, ParseOptions};

/// A parser setting change requested by a pragma line.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(super) enum Pragma {
    WhitespacePreserve(bool),
    NewlineType(Newline),
    StopAtEmptyLine(bool),
    CondenseWhitespace(bool),
    StrictRipe(bool),
    HashComment(bool),
    Rfc,
}

impl Pragma {
    pub(super) fn apply(self, options: &mut ParseOptions) {
        match self {
            Self::WhitespacePreserve(on) => options.preserve_whitespace = on,
            Self::NewlineType(newline) => options.newline = newline,
            Self::StopAtEmptyLine(on) => options.stop_at_empty_line = on,
            Self::CondenseWhitespace(on) => options.condense_whitespace = on,
            Self::StrictRipe(on) => options.strict_ripe = on,
            Self::HashComment(on) => options.hash_comment = on,
            Self::Rfc => *options = ParseOptions::default(),
        }
    }
}

/// Parses the text following `%!` on a pragma line. Lines whose first
/// word is not `pragma` are ordinary comments, for which `None` is
/// returned.
pub(super) fn parse_pragma(text: &str, line: usize) -> Result<Option<Pragma>> {
    let mut words = text.split_whitespace();
    match words.next() {
        Some(word) if word.eq_ignore_ascii_case("pragma") => (),
        _ => return Ok(None),
    }
    let name = words.next().unwrap_or_default().to_ascii_lowercase();
    let value = words.next();

    let pragma = match name.as_str() {
        "whitespace-preserve" => Pragma::WhitespacePreserve(parse_switch(&name, value, line)?),
        "newline-type" => Pragma::NewlineType(parse_newline(&name, value, line)?),
        "stop-at-empty-line" => Pragma::StopAtEmptyLine(parse_switch(&name, value, line)?),
        "condense-whitespace" => Pragma::CondenseWhitespace(parse_switch(&name, value, line)?),
        "strict-ripe" => Pragma::StrictRipe(parse_switch(&name, value, line)?),
        "hash-comment" => Pragma::HashComment(parse_switch(&name, value, line)?),
        "rfc" => Pragma::Rfc,
        _ => return Err(Error::new(line, ErrorKind::UnknownPragma(name))),
    };
    Ok(Some(pragma))
}

/// Parses an on/off value. A missing value means "on".
fn parse_switch(name: &str, value: Option<&str>, line: usize) -> Result<bool> {
    match value.map(str::to_ascii_lowercase).as_deref() {
        None | Some("on") | Some("yes") | Some("true") => Ok(true),
        Some("off") | Some("no") | Some("false") => Ok(false),
        Some(_) => Err(invalid_value(name, line)),
    }
}

fn parse_newline(name: &str, value: Option<&str>, line: usize) -> Result<Newline> {
    match value.map(str::to_ascii_lowercase).as_deref() {
        Some("cr") => Ok(Newline::Cr),
        Some("lf") => Ok(Newline::Lf),
        Some("crlf") => Ok(Newline::CrLf),
        Some("none") => Ok(Newline::None),
        _ => Err(invalid_value(name, line)),
    }
}

fn invalid_value(name: &str, line: usize) -> Error {
    Error::new(line, ErrorKind::InvalidPragmaValue(name.to_owned()))
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pragmas() {
        assert_eq!(
            parse_pragma(" pragma whitespace-preserve", 1).unwrap(),
            Some(Pragma::WhitespacePreserve(true))
        );
        assert_eq!(
            parse_pragma(" pragma stop-at-empty-line off", 1).unwrap(),
            Some(Pragma::StopAtEmptyLine(false))
        );
        assert_eq!(
            parse_pragma(" PRAGMA newline-type CRLF", 1).unwrap(),
            Some(Pragma::NewlineType(Newline::CrLf))
        );
        assert_eq!(parse_pragma(" pragma rfc", 1).unwrap(), Some(Pragma::Rfc));
    }

    #[test]
    fn other_bang_lines_are_comments() {
        assert_eq!(parse_pragma(" hello there", 1).unwrap(), None);
        assert_eq!(parse_pragma("", 1).unwrap(), None);
    }

    #[test]
    fn rejects_bad_pragmas() {
        let error = parse_pragma(" pragma frobnicate on", 3).unwrap_err();
        assert_eq!(
            error.kind(),
            Some(&ErrorKind::UnknownPragma("frobnicate".to_owned()))
        );
        assert!(matches!(
            parse_pragma(" pragma hash-comment maybe", 3),
            Err(Error::Syntax(_))
        ));
        assert!(parse_pragma(" pragma newline-type", 3).is_err());
    }

    #[test]
    fn rfc_resets_options() {
        let mut options = ParseOptions::default();
        Pragma::HashComment(true).apply(&mut options);
        Pragma::NewlineType(Newline::Cr).apply(&mut options);
        assert!(options.hash_comment);
        Pragma::Rfc.apply(&mut options);
        assert_eq!(options, ParseOptions::default());
    }
}
