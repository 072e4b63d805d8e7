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

//! Error types for RPSL parsing.
//!
//! Syntax errors are recorded with an [`ErrorKind`] value and the line
//! at which they occurred.

use std::fmt;
use std::io;

////////////////////////////////////////////////////////////////////////
// ERROR STRUCTURE                                                    //
////////////////////////////////////////////////////////////////////////

/// Represents errors that may occur during RPSL parsing.
#[derive(Debug)]
pub enum Error {
    /// I/O errors encountered while reading the input.
    Io(io::Error),

    /// Syntax errors.
    Syntax(ErrorDetails),
}

impl Error {
    /// Constructs a new [`Error`] of the [`Syntax`](`Error::Syntax`)
    /// variant with provided information.
    pub(super) fn new(line: usize, kind: ErrorKind) -> Self {
        Self::Syntax(ErrorDetails { line, kind })
    }

    /// The error returned when text that should contain an object
    /// contains none.
    pub(crate) fn no_object() -> Self {
        Self::new(0, ErrorKind::NoObject)
    }

    /// Returns the kind of syntax error, if this is a syntax error.
    pub fn kind(&self) -> Option<&ErrorKind> {
        match self {
            Self::Io(_) => None,
            Self::Syntax(details) => Some(&details.kind),
        }
    }
}

impl From<io::Error> for Error {
    fn from(io_error: io::Error) -> Self {
        Self::Io(io_error)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Io(io_error) => write!(f, "I/O error: {}", io_error),
            Self::Syntax(details) => details.fmt(f),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(io_error) => Some(io_error),
            Self::Syntax(_) => None,
        }
    }
}

/// A result type for RPSL parsing.
pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////
// SYNTAX ERROR DETAILS                                               //
////////////////////////////////////////////////////////////////////////

/// Provides information about the position and kind of RPSL syntax
/// errors.
#[derive(Debug)]
pub struct ErrorDetails {
    pub(super) line: usize,
    pub(super) kind: ErrorKind,
}

impl ErrorDetails {
    /// Returns the line in the input at which the error occurred.
    pub fn line(&self) -> usize {
        self.line
    }

    /// Returns the kind of syntax error that occurred.
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }
}

impl fmt::Display for ErrorDetails {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.line == 0 {
            self.kind.fmt(f)
        } else {
            write!(f, "{} at line {}", self.kind, self.line)
        }
    }
}

////////////////////////////////////////////////////////////////////////
// SYNTAX ERROR KINDS                                                 //
////////////////////////////////////////////////////////////////////////

/// Kinds of RPSL syntax errors.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum ErrorKind {
    ContinuationWithoutAttribute,
    InvalidKey(String),
    InvalidPragmaValue(String),
    MissingColon,
    NoObject,
    UnknownPragma(String),
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::ContinuationWithoutAttribute => {
                f.write_str("continuation line with no preceding attribute")
            }
            Self::InvalidKey(key) => write!(f, "invalid attribute key {:?}", key),
            Self::InvalidPragmaValue(pragma) => {
                write!(f, "invalid value for pragma {:?}", pragma)
            }
            Self::MissingColon => f.write_str("expected <key>:<value>"),
            Self::NoObject => f.write_str("no object found"),
            Self::UnknownPragma(pragma) => write!(f, "unknown pragma {:?}", pragma),
        }
    }
}
