pub mod error;
pub mod eval;
pub mod grammar;
pub mod lex;
pub mod parse;
pub mod source;
pub mod system;
pub mod unsweeten;
pub mod value;

use std::io::{Read, Write};

pub use error::{Exception, ExceptionKind, Position};
pub use eval::Interpreter;
pub use grammar::LanguageSpecification;
pub use lex::{Lexeme, Lexer, Symbol};
pub use parse::{Node, Parser};
pub use unsweeten::{SimpleUnsweetener, Unsweeten};
pub use value::Value;

/// Remaining stack below which the recursive passes switch to a fresh segment.
pub(crate) const STACK_RED_ZONE: usize = 128 * 1024;
pub(crate) const STACK_GROW_SIZE: usize = 4 * 1024 * 1024;

/// Ties a grammar, an unsweetener and an interpreter together.
///
/// Every entry point reads its program from a byte stream and, on failure,
/// returns an [`Exception`] with the consumed source attached for reporting.
/// Interpreter state persists across [`execute`](Engine::execute) calls.
pub struct Engine {
    name: String,
    spec: LanguageSpecification,
    unsweetener: SimpleUnsweetener,
    interpreter: Interpreter,
}

impl Engine {
    pub fn new() -> Self {
        Self::with_interpreter(Interpreter::new())
    }

    /// An engine whose `print` writes to `output` instead of stdout.
    pub fn with_output(output: Box<dyn Write>) -> Self {
        Self::with_interpreter(Interpreter::with_output(output))
    }

    fn with_interpreter(interpreter: Interpreter) -> Self {
        Engine {
            name: "<input>".to_string(),
            spec: LanguageSpecification::becca(),
            unsweetener: SimpleUnsweetener::becca(),
            interpreter,
        }
    }

    /// Name shown in diagnostics, usually the script's path.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn spec(&self) -> &LanguageSpecification {
        &self.spec
    }

    pub fn interpreter_mut(&mut self) -> &mut Interpreter {
        &mut self.interpreter
    }

    pub fn tokens<R: Read>(&self, source: R) -> Result<Vec<Lexeme>, Exception> {
        let mut lexer = Lexer::new(source, &self.spec);
        let mut lexemes = Vec::new();
        loop {
            match lexer.next() {
                Ok(lexeme) => {
                    let done = lexeme.symbol == Symbol::Eof;
                    lexemes.push(lexeme);
                    if done {
                        return Ok(lexemes);
                    }
                }
                Err(e) => return Err(e.with_source(&self.name, lexer.source_text())),
            }
        }
    }

    pub fn raw_syntax<R: Read>(&self, source: R) -> Result<Vec<Node>, Exception> {
        self.parse(source).map(|(trees, _)| trees)
    }

    pub fn unsweetened_syntax<R: Read>(&self, source: R) -> Result<Vec<Node>, Exception> {
        let (trees, text) = self.parse(source)?;
        self.unsweetener
            .unsweeten_all(trees)
            .map_err(|e| e.with_source(&self.name, text))
    }

    /// Runs a whole program and returns the value of its last statement.
    pub fn execute<R: Read>(&mut self, source: R) -> Result<Value, Exception> {
        let (trees, text) = self.parse(source)?;
        let result = self
            .unsweetener
            .unsweeten_all(trees)
            .and_then(|trees| self.interpreter.execute(&trees));
        result.map_err(|e| e.with_source(&self.name, text))
    }

    fn parse<R: Read>(&self, source: R) -> Result<(Vec<Node>, String), Exception> {
        let mut parser = Parser::new(source, &self.spec);
        match parser.statements() {
            Ok(trees) => Ok((trees, parser.source_text().to_string())),
            Err(e) => Err(e.with_source(&self.name, parser.source_text())),
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
