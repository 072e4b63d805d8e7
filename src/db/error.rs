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

//! Implementation of the [`Error`] type for database operations.

use std::fmt;
use std::io;
use std::path::PathBuf;

use crate::object::ObjectId;
use crate::rpsl;

/// Errors that arise during operations on a
/// [`Database`](super::Database).
#[derive(Debug)]
pub enum Error {
    /// The requested object does not exist.
    NotFound(ObjectId),

    /// The underlying storage failed.
    Storage { path: PathBuf, source: io::Error },

    /// A stored object could not be parsed.
    Parse { path: PathBuf, source: rpsl::Error },

    /// A stored file contained no object.
    EmptyObject(PathBuf),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub(super) fn storage(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "object {} not found", id),
            Self::Storage { path, .. } => write!(f, "storage error at {}", path.display()),
            Self::Parse { path, .. } => write!(f, "failed to parse {}", path.display()),
            Self::EmptyObject(path) => write!(f, "{} contains no object", path.display()),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage { source, .. } => Some(source),
            Self::Parse { source, .. } => Some(source),
            Self::NotFound(_) | Self::EmptyObject(_) => None,
        }
    }
}

/// A result type for database operations.
pub type Result<T> = std::result::Result<T, Error>;
