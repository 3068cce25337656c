use std::fmt::Display;

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

/// A location in the program source. Lines and columns are 1-based; `offset`
/// is the byte offset of the character, used to point miette labels at it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub line: usize,
    pub col: usize,
    pub offset: usize,
}

impl Position {
    /// Sentinel for errors raised where no source location is meaningful.
    pub const UNKNOWN: Position = Position {
        line: 0,
        col: 0,
        offset: 0,
    };

    pub fn new(line: usize, col: usize, offset: usize) -> Self {
        Position { line, col, offset }
    }

    pub fn is_known(&self) -> bool {
        self.line > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionKind {
    AssertionError,
    SyntaxError,
    DivideByZeroError,
    TypeError,
    NameError,
    InternalError,
    MethodError,
    ArgumentError,
    IndexError,
    IterationError,
    IOError,
}

impl Display for ExceptionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ExceptionKind::AssertionError => "AssertionError",
            ExceptionKind::SyntaxError => "SyntaxError",
            ExceptionKind::DivideByZeroError => "DivideByZeroError",
            ExceptionKind::TypeError => "TypeError",
            ExceptionKind::NameError => "NameError",
            ExceptionKind::InternalError => "InternalError",
            ExceptionKind::MethodError => "MethodError",
            ExceptionKind::ArgumentError => "ArgumentError",
            ExceptionKind::IndexError => "IndexError",
            ExceptionKind::IterationError => "IterationError",
            ExceptionKind::IOError => "IOError",
        };
        write!(f, "{name}")
    }
}

/// The single failure type of the whole pipeline. Lexing, parsing,
/// unsweetening and evaluation all stop at the first `Exception`.
#[derive(Error, Debug, Diagnostic)]
#[error("{kind}: {message} at {}:{}", .position.line, .position.col)]
pub struct Exception {
    pub kind: ExceptionKind,
    pub message: String,
    pub position: Position,

    #[help]
    help: Option<String>,

    #[source_code]
    src: NamedSource<String>,

    #[label("here")]
    span: Option<SourceSpan>,
}

impl Exception {
    pub fn new(kind: ExceptionKind, message: impl Into<String>, position: Position) -> Self {
        Exception {
            kind,
            message: message.into(),
            position,
            help: None,
            src: NamedSource::new("<input>", String::new()),
            span: None,
        }
    }

    pub fn syntax(message: impl Into<String>, position: Position) -> Self {
        Self::new(ExceptionKind::SyntaxError, message, position)
    }

    pub fn type_error(message: impl Into<String>, position: Position) -> Self {
        Self::new(ExceptionKind::TypeError, message, position)
    }

    pub fn argument(message: impl Into<String>, position: Position) -> Self {
        Self::new(ExceptionKind::ArgumentError, message, position)
    }

    pub fn internal(message: impl Into<String>, position: Position) -> Self {
        Self::new(ExceptionKind::InternalError, message, position)
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Attaches the program text so the report can label the failing spot.
    /// Exceptions without a known position keep an unlabelled report.
    pub fn with_source(mut self, name: &str, source: impl Into<String>) -> Self {
        let source = source.into();
        if self.position.is_known() && self.position.offset <= source.len() {
            let len = source
                .get(self.position.offset..)
                .and_then(|rest| rest.chars().next())
                .map_or(0, char::len_utf8);
            self.span = Some(SourceSpan::from((self.position.offset, len)));
        }
        self.src = NamedSource::new(name, source);
        self
    }

    pub fn line(&self) -> usize {
        self.position.line
    }

    pub fn col(&self) -> usize {
        self.position.col
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_kind_and_location() {
        let e = Exception::new(
            ExceptionKind::NameError,
            "x is not defined",
            Position::new(3, 7, 20),
        );
        assert_eq!(e.to_string(), "NameError: x is not defined at 3:7");
    }

    #[test]
    fn source_attaches_a_label_only_for_known_positions() {
        let known = Exception::syntax("bad", Position::new(1, 3, 2)).with_source("t", "a @ b");
        assert_eq!(known.span, Some(SourceSpan::from((2, 1))));

        let unknown = Exception::internal("bad", Position::UNKNOWN).with_source("t", "a @ b");
        assert_eq!(unknown.span, None);
    }
}
