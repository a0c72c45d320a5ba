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

//! A recursive-descent parser for the named.conf grammar.
//!
//! The grammar recognized here is the skeleton shared by every BIND
//! configuration statement: a file is a sequence of clauses, a clause
//! is a sequence of tokens and brace-delimited blocks terminated by a
//! semicolon, and a block is itself a sequence of clauses. No keyword
//! is interpreted; that is left to the caller.

use super::error::{Error, ErrorKind, Position, Result};
use super::{Block, Clause, Document, Element, Token};

////////////////////////////////////////////////////////////////////////
// PARSER                                                             //
////////////////////////////////////////////////////////////////////////

/// The parser. It works through the source a character at a time,
/// tracking the line and column for error reporting.
pub(super) struct Parser {
    chars: Vec<char>,
    index: usize,
    position: Position,
}

impl Parser {
    pub(super) fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            index: 0,
            position: Position { line: 1, column: 1 },
        }
    }

    /// Parses the whole source as a [`Document`].
    pub(super) fn parse_document(mut self) -> Result<Document> {
        let clauses = self.parse_clauses(None)?;
        Ok(Document { clauses })
    }

    ////////////////////////////////////////////////////////////////////
    // CLAUSES AND BLOCKS                                             //
    ////////////////////////////////////////////////////////////////////

    /// Parses clauses until the end of the enclosing block, or (at the
    /// top level, where `block_start` is `None`) the end of the source.
    /// The close brace itself is left unconsumed for the caller.
    fn parse_clauses(&mut self, block_start: Option<Position>) -> Result<Vec<Clause>> {
        let mut clauses = Vec::new();
        loop {
            self.skip_trivia()?;
            match self.peek() {
                None => match block_start {
                    Some(position) => return Err(Error::new(position, ErrorKind::UnclosedBlock)),
                    None => return Ok(clauses),
                },
                Some('}') => match block_start {
                    Some(_) => return Ok(clauses),
                    None => return Err(self.error(ErrorKind::UnexpectedCloseBrace)),
                },
                Some(';') => {
                    // A stray semicolon is an empty clause; drop it.
                    self.advance();
                }
                Some(_) => clauses.push(self.parse_clause()?),
            }
        }
    }

    fn parse_clause(&mut self) -> Result<Clause> {
        let mut elements = Vec::new();
        loop {
            self.skip_trivia()?;
            match self.peek() {
                None | Some('}') => return Err(self.error(ErrorKind::MissingSemicolon)),
                Some(';') => {
                    self.advance();
                    return Ok(Clause { elements });
                }
                Some('{') => {
                    let open = self.position;
                    self.advance();
                    let clauses = self.parse_clauses(Some(open))?;
                    self.advance();
                    elements.push(Element::Block(Block { clauses }));
                }
                Some('"') => elements.push(Element::Token(self.parse_quoted()?)),
                Some(_) => elements.push(Element::Token(self.parse_word()?)),
            }
        }
    }

    ////////////////////////////////////////////////////////////////////
    // TOKENS                                                         //
    ////////////////////////////////////////////////////////////////////

    /// Parses a quoted string. The named.conf grammar has no escape
    /// sequences, so this runs to the next double quote.
    fn parse_quoted(&mut self) -> Result<Token> {
        let open = self.position;
        self.advance();
        let mut text = String::new();
        loop {
            match self.peek() {
                None => return Err(Error::new(open, ErrorKind::UnclosedQuote)),
                Some('"') => {
                    self.advance();
                    return Ok(Token::Quoted(text));
                }
                Some(c) => {
                    text.push(c);
                    self.advance();
                }
            }
        }
    }

    fn parse_word(&mut self) -> Result<Token> {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_whitespace() || matches!(c, ';' | '{' | '}' | '"' | '#') {
                break;
            }
            // A slash ends the word only when it opens a comment.
            // (Words with slashes are common; think CIDR ranges.)
            if c == '/' && matches!(self.peek_at(1), Some('/') | Some('*')) {
                break;
            }
            text.push(c);
            self.advance();
        }
        Ok(Token::Word(text))
    }

    ////////////////////////////////////////////////////////////////////
    // WHITESPACE AND COMMENTS                                        //
    ////////////////////////////////////////////////////////////////////

    /// Skips whitespace and all three comment styles (`#`, `//`, and
    /// `/* */`). Comment openers inside quoted strings never reach this
    /// point, since [`Parser::parse_quoted`] consumes them itself.
    fn skip_trivia(&mut self) -> Result<()> {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => self.advance(),
                Some('#') => self.skip_line(),
                Some('/') if self.peek_at(1) == Some('/') => self.skip_line(),
                Some('/') if self.peek_at(1) == Some('*') => self.skip_block_comment()?,
                _ => return Ok(()),
            }
        }
    }

    fn skip_line(&mut self) {
        while !matches!(self.peek(), None | Some('\n')) {
            self.advance();
        }
    }

    fn skip_block_comment(&mut self) -> Result<()> {
        let open = self.position;
        self.advance();
        self.advance();
        loop {
            match self.peek() {
                None => return Err(Error::new(open, ErrorKind::UnclosedComment)),
                Some('*') if self.peek_at(1) == Some('/') => {
                    self.advance();
                    self.advance();
                    return Ok(());
                }
                Some(_) => self.advance(),
            }
        }
    }

    ////////////////////////////////////////////////////////////////////
    // LOW-LEVEL CURSOR                                               //
    ////////////////////////////////////////////////////////////////////

    fn peek(&self) -> Option<char> {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.index + offset).copied()
    }

    fn advance(&mut self) {
        if let Some(&c) = self.chars.get(self.index) {
            self.index += 1;
            if c == '\n' {
                self.position.line += 1;
                self.position.column = 1;
            } else {
                self.position.column += 1;
            }
        }
    }

    fn error(&self, kind: ErrorKind) -> Error {
        Error::new(self.position, kind)
    }
}
