// Copyright 2022 Matthew Ingwersen.
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

//! Error types for named.conf parsing.

use std::fmt;

/// The line and column a syntax error was found at. Both count from
/// one.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

/// A named.conf syntax error.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Error {
    position: Position,
    kind: ErrorKind,
}

impl Error {
    pub(super) fn new(position: Position, kind: ErrorKind) -> Self {
        Self { position, kind }
    }

    pub fn line(&self) -> usize {
        self.position.line
    }

    pub fn column(&self) -> usize {
        self.position.column
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} at line {} column {}",
            self.kind, self.position.line, self.position.column,
        )
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Kinds of named.conf syntax errors.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum ErrorKind {
    MissingSemicolon,
    UnclosedBlock,
    UnclosedComment,
    UnclosedQuote,
    UnexpectedCloseBrace,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::MissingSemicolon => f.write_str("expected a semicolon"),
            Self::UnclosedBlock => f.write_str("reached end of input before close brace"),
            Self::UnclosedComment => f.write_str("reached end of input in comment"),
            Self::UnclosedQuote => f.write_str("reached end of input in quoted string"),
            Self::UnexpectedCloseBrace => f.write_str("unmatched close brace"),
        }
    }
}
