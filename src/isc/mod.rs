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

//! Reading and rewriting named.conf text.
//!
//! The header of each generated named.conf comes from operator-written
//! text stored in the database, and we have to splice settings into it:
//! the `directory` in the `options` stanza must point at the target
//! server's BIND directory, and the binary-format configuration adds
//! `masterfile-format raw` right after it. Doing that with string
//! surgery breaks as soon as an operator writes a comment containing
//! the word `options`, so this module parses the text into a small
//! syntax tree first.
//!
//! The tree keeps the structure every BIND statement shares — clauses
//! made of tokens and brace-delimited blocks — without interpreting any
//! keyword. [`Document::emit`] writes it back out in a normalized
//! layout: one clause per line, blocks indented by four columns, and
//! comments dropped.

use std::fmt;

use crate::util::Caseless;

mod error;
mod parser;

pub use error::{Error, ErrorKind, Position, Result};

use parser::Parser;

////////////////////////////////////////////////////////////////////////
// SYNTAX TREE                                                        //
////////////////////////////////////////////////////////////////////////

/// A parsed named.conf: a sequence of clauses.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Document {
    pub clauses: Vec<Clause>,
}

/// One semicolon-terminated clause, e.g. `directory "/etc/bind";` or a
/// whole `options { ... };` statement.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Clause {
    pub elements: Vec<Element>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Element {
    Token(Token),
    Block(Block),
}

/// A brace-delimited group of clauses.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Block {
    pub clauses: Vec<Clause>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Token {
    /// A bare word, such as a keyword or an IP address.
    Word(String),
    /// A double-quoted string. The quotes themselves are not stored.
    Quoted(String),
}

/// Shorthand for a bare-word element.
pub fn word(text: &str) -> Element {
    Element::Token(Token::Word(text.to_owned()))
}

/// Shorthand for a quoted-string element.
pub fn quoted(text: &str) -> Element {
    Element::Token(Token::Quoted(text.to_owned()))
}

impl Clause {
    pub fn of(elements: Vec<Element>) -> Self {
        Self { elements }
    }

    /// The clause's leading keyword, if it starts with a bare word.
    pub fn keyword(&self) -> Option<&str> {
        match self.elements.first() {
            Some(Element::Token(Token::Word(text))) => Some(text),
            _ => None,
        }
    }

    /// Whether the clause starts with the given keyword. BIND keywords
    /// are case-insensitive.
    fn keyword_is(&self, keyword: &str) -> bool {
        self.keyword().map_or(false, |k| Caseless(k) == Caseless(keyword))
    }

    fn block_mut(&mut self) -> Option<&mut Block> {
        self.elements.iter_mut().find_map(|element| match element {
            Element::Block(block) => Some(block),
            Element::Token(_) => None,
        })
    }

    /// The value of a two-token `keyword "value"` clause.
    fn value(&self) -> Option<&str> {
        match self.elements.get(1) {
            Some(Element::Token(Token::Word(text)))
            | Some(Element::Token(Token::Quoted(text))) => Some(text),
            _ => None,
        }
    }
}

////////////////////////////////////////////////////////////////////////
// PARSING AND EMISSION                                               //
////////////////////////////////////////////////////////////////////////

impl Document {
    /// Parses named.conf source text.
    pub fn parse(source: &str) -> Result<Self> {
        Parser::new(source).parse_document()
    }

    /// Writes the document back out in normalized form.
    pub fn emit(&self) -> String {
        let mut out = String::new();
        for clause in &self.clauses {
            clause.emit(&mut out, 0);
        }
        out
    }
}

impl Clause {
    fn emit(&self, out: &mut String, depth: usize) {
        indent(out, depth);
        for (i, element) in self.elements.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            match element {
                Element::Token(token) => out.push_str(&token.to_string()),
                Element::Block(block) => {
                    out.push_str("{\n");
                    for clause in &block.clauses {
                        clause.emit(out, depth + 1);
                    }
                    indent(out, depth);
                    out.push('}');
                }
            }
        }
        out.push_str(";\n");
    }
}

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str("    ");
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Word(text) => f.write_str(text),
            Self::Quoted(text) => write!(f, "\"{text}\""),
        }
    }
}

////////////////////////////////////////////////////////////////////////
// OPTIONS STANZA REWRITING                                           //
////////////////////////////////////////////////////////////////////////

impl Document {
    /// Points the `directory` setting of the `options` stanza at
    /// `directory`. An existing setting is replaced in place; a missing
    /// one is inserted at the head of the stanza; a missing stanza is
    /// appended to the document.
    pub fn set_options_directory(&mut self, directory: &str) {
        let options = self.options_block_mut();
        let clause = Clause::of(vec![word("directory"), quoted(directory)]);
        match options
            .clauses
            .iter_mut()
            .find(|c| c.keyword_is("directory"))
        {
            Some(existing) => *existing = clause,
            None => options.clauses.insert(0, clause),
        }
    }

    /// Inserts `clause` into the `options` stanza immediately after the
    /// `directory` setting, or at the end of the stanza if there is no
    /// such setting.
    pub fn insert_options_clause_after_directory(&mut self, clause: Clause) {
        let options = self.options_block_mut();
        let index = options
            .clauses
            .iter()
            .position(|c| c.keyword_is("directory"))
            .map_or(options.clauses.len(), |i| i + 1);
        options.clauses.insert(index, clause);
    }

    /// The current `directory` setting of the `options` stanza, if any.
    pub fn options_directory(&self) -> Option<&str> {
        self.clauses
            .iter()
            .find(|c| c.keyword_is("options"))
            .and_then(|c| match c.elements.iter().find_map(block) {
                Some(b) => b.clauses.iter().find(|c| c.keyword_is("directory")),
                None => None,
            })
            .and_then(Clause::value)
    }

    fn options_block_mut(&mut self) -> &mut Block {
        let index = self
            .clauses
            .iter()
            .position(|c| c.keyword_is("options") && c.elements.iter().any(is_block));
        let index = match index {
            Some(index) => index,
            None => {
                self.clauses.push(Clause::of(vec![
                    word("options"),
                    Element::Block(Block::default()),
                ]));
                self.clauses.len() - 1
            }
        };
        match self.clauses[index].block_mut() {
            Some(block) => block,
            None => unreachable!(),
        }
    }
}

fn block(element: &Element) -> Option<&Block> {
    match element {
        Element::Block(block) => Some(block),
        Element::Token(_) => None,
    }
}

fn is_block(element: &Element) -> bool {
    matches!(element, Element::Block(_))
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
