use std::fmt::Display;
use std::io::Read;

use crate::error::{Exception, Position};
use crate::grammar::LanguageSpecification;
use crate::source::CharStream;

/// Grammatical category of a lexeme or AST node.
///
/// The parenthesised variants are structural categories produced by the
/// lexer or by grammar rules; everything else (operators, keywords,
/// delimiters) is identified by its spelling.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Symbol {
    Name,
    Eof,
    StringLiteral,
    IntLiteral,
    FloatLiteral,
    Block,
    If,
    ElseIf,
    FunctionDefinition,
    FunctionParameters,
    FunctionInvocation,
    Access,
    Assignment,
    While,
    ForIn,
    Spelled(String),
}

impl Symbol {
    pub fn spelling(&self) -> Option<&str> {
        match self {
            Symbol::Spelled(s) => Some(s),
            _ => None,
        }
    }

    pub fn is(&self, spelling: &str) -> bool {
        self.spelling() == Some(spelling)
    }
}

impl From<&str> for Symbol {
    fn from(spelling: &str) -> Self {
        Symbol::Spelled(spelling.to_string())
    }
}

impl Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Symbol::Name => write!(f, "(NAME)"),
            Symbol::Eof => write!(f, "(EOF)"),
            Symbol::StringLiteral => write!(f, "(STRING)"),
            Symbol::IntLiteral => write!(f, "(INT)"),
            Symbol::FloatLiteral => write!(f, "(FLOAT)"),
            Symbol::Block => write!(f, "(BLOCK)"),
            Symbol::If => write!(f, "(IF)"),
            Symbol::ElseIf => write!(f, "(ELSEIF)"),
            Symbol::FunctionDefinition => write!(f, "(FUNCTIONDEFINITION)"),
            Symbol::FunctionParameters => write!(f, "(FUNCTIONPARAMETERS)"),
            Symbol::FunctionInvocation => write!(f, "(FUNCTIONINVOCATION)"),
            Symbol::Access => write!(f, "(ACCESS)"),
            Symbol::Assignment => write!(f, "(ASSIGNMENT)"),
            Symbol::While => write!(f, "(WHILE)"),
            Symbol::ForIn => write!(f, "(FORIN)"),
            Symbol::Spelled(s) => write!(f, "{s}"),
        }
    }
}

/// A single lexical unit. Grammar rules consume lexemes and build
/// [`Node`](crate::parse::Node)s out of them.
#[derive(Debug, Clone, PartialEq)]
pub struct Lexeme {
    pub symbol: Symbol,
    pub text: String,
    pub pos: Position,
}

impl Display for Lexeme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {:?} {}:{}",
            self.symbol, self.text, self.pos.line, self.pos.col
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Unknown,
    StringLiteral,
    IntLiteral,
    FloatLiteral,
    Name,
    Whitespace,
    Operator,
    Comment,
    Eof,
}

pub struct Lexer<'spec, R> {
    spec: &'spec LanguageSpecification,
    stream: CharStream<R>,
    peeked: Option<Lexeme>,
    state: State,
    buffer: String,
    start: Position,
    close_quote: char,
    literal: Symbol,
}

impl<'spec, R: Read> Lexer<'spec, R> {
    pub fn new(reader: R, spec: &'spec LanguageSpecification) -> Self {
        Lexer {
            spec,
            stream: CharStream::new(reader),
            peeked: None,
            state: State::Unknown,
            buffer: String::new(),
            start: Position::UNKNOWN,
            close_quote: '"',
            literal: Symbol::StringLiteral,
        }
    }

    pub fn spec(&self) -> &'spec LanguageSpecification {
        self.spec
    }

    /// Source text consumed so far.
    pub fn source_text(&self) -> &str {
        self.stream.text()
    }

    pub fn peek(&mut self) -> Result<&Lexeme, Exception> {
        if self.peeked.is_none() {
            let lexeme = self.next()?;
            self.peeked = Some(lexeme);
        }
        match &self.peeked {
            Some(lexeme) => Ok(lexeme),
            None => Err(Exception::internal(
                "lookahead cache empty after peek",
                Position::UNKNOWN,
            )),
        }
    }

    /// Consumes the next lexeme and requires it to carry `expected`.
    pub fn expect(&mut self, expected: &Symbol, error: &str) -> Result<Lexeme, Exception> {
        let lexeme = self.next()?;
        if &lexeme.symbol == expected {
            Ok(lexeme)
        } else {
            Err(
                Exception::syntax(format!("{error}, got {}", describe(&lexeme)), lexeme.pos)
                    .with_help(format!("use `{expected}` here instead")),
            )
        }
    }

    pub fn next(&mut self) -> Result<Lexeme, Exception> {
        if let Some(peeked) = self.peeked.take() {
            return Ok(peeked);
        }

        while let Some((c, pos)) = self.stream.next_char()? {
            let finished = match self.state {
                State::Unknown | State::Whitespace => {
                    if !c.is_whitespace() {
                        self.start_token(c, pos);
                    }
                    None
                }
                State::Comment => {
                    if c == '\n' {
                        self.state = State::Whitespace;
                    }
                    None
                }
                State::IntLiteral => {
                    if self.continues_int(c) {
                        self.buffer.push(c);
                        None
                    } else if c == '.' && !has_radix_prefix(&self.buffer) {
                        self.state = State::FloatLiteral;
                        self.buffer.push(c);
                        None
                    } else {
                        let lexeme = self.finish_token()?;
                        self.start_token(c, pos);
                        Some(lexeme)
                    }
                }
                State::FloatLiteral => {
                    if c.is_ascii_digit() {
                        self.buffer.push(c);
                        None
                    } else {
                        let lexeme = self.finish_token()?;
                        self.start_token(c, pos);
                        Some(lexeme)
                    }
                }
                State::StringLiteral => {
                    if c == self.close_quote {
                        let lexeme = self.finish_token()?;
                        self.state = State::Unknown;
                        Some(lexeme)
                    } else if c == '\n' {
                        return Err(Exception::syntax("new line in middle of string literal", pos)
                            .with_help(format!(
                                "terminate the string with `{}` before the end of the line",
                                self.close_quote
                            )));
                    } else {
                        self.buffer.push(c);
                        None
                    }
                }
                State::Name => {
                    if self.spec.is_identifier_character(c) {
                        self.buffer.push(c);
                        None
                    } else {
                        let lexeme = self.finish_token()?;
                        self.start_token(c, pos);
                        Some(lexeme)
                    }
                }
                State::Operator => {
                    let mut extended = self.buffer.clone();
                    extended.push(c);
                    if self.spec.is_defined(&Symbol::from(extended.as_str())) {
                        self.buffer = extended;
                        None
                    } else if self.spec.is_defined(&Symbol::from(self.buffer.as_str())) {
                        let lexeme = self.finish_token()?;
                        self.start_token(c, pos);
                        Some(lexeme)
                    } else {
                        return Err(Exception::syntax(
                            format!("unrecognized operator {}", self.buffer),
                            self.start,
                        ));
                    }
                }
                State::Eof => None,
            };

            if let Some(lexeme) = finished {
                if self.spec.is_comment_start(&lexeme.symbol) {
                    // the character after the marker already opened a token
                    self.buffer.clear();
                    self.state = if c == '\n' {
                        State::Whitespace
                    } else {
                        State::Comment
                    };
                    continue;
                }
                return Ok(lexeme);
            }
        }

        match self.state {
            State::StringLiteral => Err(Exception::syntax(
                "unexpected end of input in string literal",
                self.stream.position(),
            )),
            _ if !self.buffer.is_empty() => {
                let lexeme = self.finish_token()?;
                self.state = State::Eof;
                if self.spec.is_comment_start(&lexeme.symbol) {
                    Ok(self.eof())
                } else {
                    Ok(lexeme)
                }
            }
            _ => {
                self.state = State::Eof;
                Ok(self.eof())
            }
        }
    }

    fn eof(&self) -> Lexeme {
        Lexeme {
            symbol: Symbol::Eof,
            text: String::new(),
            pos: self.stream.position(),
        }
    }

    fn start_token(&mut self, c: char, pos: Position) {
        self.start = pos;
        self.buffer.clear();
        if let Some(quote) = self.spec.quote(c) {
            self.state = State::StringLiteral;
            self.close_quote = quote.close;
            self.literal = quote.literal.clone();
        } else if self.spec.is_identifier_start_character(c) {
            self.state = State::Name;
            self.buffer.push(c);
        } else if c.is_ascii_digit() {
            self.state = State::IntLiteral;
            self.buffer.push(c);
        } else if c.is_whitespace() {
            self.state = State::Whitespace;
        } else {
            self.state = State::Operator;
            self.buffer.push(c);
        }
    }

    fn continues_int(&self, c: char) -> bool {
        if self.buffer == "0" && matches!(c, 'x' | 'X' | 'o' | 'O' | 'b' | 'B') {
            true
        } else if has_radix_prefix(&self.buffer) {
            c.is_ascii_alphanumeric()
        } else {
            c.is_ascii_digit()
        }
    }

    fn finish_token(&mut self) -> Result<Lexeme, Exception> {
        let text = std::mem::take(&mut self.buffer);
        let symbol = match self.state {
            State::StringLiteral => self.literal.clone(),
            State::IntLiteral => {
                if parse_int(&text).is_none() {
                    return Err(Exception::syntax(
                        format!("malformed integer literal {text}"),
                        self.start,
                    ));
                }
                Symbol::IntLiteral
            }
            State::FloatLiteral => {
                if text.parse::<f64>().is_err() {
                    return Err(Exception::syntax(
                        format!("malformed float literal {text}"),
                        self.start,
                    ));
                }
                Symbol::FloatLiteral
            }
            State::Name => {
                let keyword = Symbol::from(text.as_str());
                if self.spec.is_defined(&keyword) {
                    keyword
                } else {
                    Symbol::Name
                }
            }
            State::Operator => {
                let operator = Symbol::from(text.as_str());
                if !self.spec.is_defined(&operator) {
                    return Err(Exception::syntax(
                        format!("unidentified operator {text}"),
                        self.start,
                    ));
                }
                operator
            }
            state => {
                return Err(Exception::syntax(
                    format!("attempted to resolve token in {state:?} state"),
                    self.stream.position(),
                ));
            }
        };
        Ok(Lexeme {
            symbol,
            text,
            pos: self.start,
        })
    }

    /// Iterates lexemes up to and including the first `EOF` or error.
    pub fn tokens(self) -> Tokens<'spec, R> {
        Tokens {
            lexer: self,
            done: false,
        }
    }
}

pub struct Tokens<'spec, R> {
    lexer: Lexer<'spec, R>,
    done: bool,
}

impl<R: Read> Iterator for Tokens<'_, R> {
    type Item = Result<Lexeme, Exception>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let item = self.lexer.next();
        self.done = matches!(&item, Err(_) | Ok(Lexeme { symbol: Symbol::Eof, .. }));
        Some(item)
    }
}

fn has_radix_prefix(text: &str) -> bool {
    let mut chars = text.chars();
    chars.next() == Some('0') && matches!(chars.next(), Some('x' | 'X' | 'o' | 'O' | 'b' | 'B'))
}

pub(crate) fn describe(lexeme: &Lexeme) -> String {
    if lexeme.symbol == Symbol::Eof {
        "end of input".to_string()
    } else {
        format!("`{}`", lexeme.text)
    }
}

/// Parses an integer the way literals and `int(...)` read them: base 10, or
/// base 16/8/2 behind a `0x`/`0o`/`0b` prefix, with an optional sign.
pub fn parse_int(text: &str) -> Option<i64> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let (radix, digits) = match digits.get(..2) {
        Some("0x" | "0X") => (16, &digits[2..]),
        Some("0o" | "0O") => (8, &digits[2..]),
        Some("0b" | "0B") => (2, &digits[2..]),
        _ => (10, digits),
    };
    if digits.is_empty() || digits.starts_with(['+', '-']) {
        return None;
    }
    let magnitude = i128::from_str_radix(digits, radix).ok()?;
    let value = if negative { -magnitude } else { magnitude };
    i64::try_from(value).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExceptionKind;

    fn lex(source: &str) -> Result<Vec<Lexeme>, Exception> {
        let spec = LanguageSpecification::becca();
        Lexer::new(source.as_bytes(), &spec).tokens().collect()
    }

    fn symbols(source: &str) -> Vec<String> {
        lex(source)
            .unwrap()
            .into_iter()
            .map(|lexeme| lexeme.symbol.to_string())
            .collect()
    }

    #[test]
    fn classifies_names_keywords_and_literals() {
        assert_eq!(
            symbols("while x 12 3.5 'hi'"),
            ["while", "(NAME)", "(INT)", "(FLOAT)", "(STRING)", "(EOF)"]
        );
    }

    #[test]
    fn maximal_munch_on_defined_operators() {
        assert_eq!(
            symbols("a<=b==c&&!d"),
            ["(NAME)", "<=", "(NAME)", "==", "(NAME)", "&&", "!", "(NAME)", "(EOF)"]
        );
    }

    #[test]
    fn string_literal_drops_quotes() {
        let lexemes = lex("\"a b\"").unwrap();
        assert_eq!(lexemes[0].text, "a b");
        assert_eq!(lexemes[0].pos, Position::new(1, 1, 0));
    }

    #[test]
    fn positions_follow_lines() {
        let lexemes = lex("x\n  yy").unwrap();
        assert_eq!((lexemes[1].pos.line, lexemes[1].pos.col), (2, 3));
    }

    #[test]
    fn newline_inside_string_is_reported_where_it_occurs() {
        let err = lex("x = \"abc\ny\";").unwrap_err();
        assert_eq!(err.kind, ExceptionKind::SyntaxError);
        assert_eq!((err.line(), err.col()), (1, 9));
    }

    #[test]
    fn end_of_input_inside_string_is_an_error() {
        let err = lex("'abc").unwrap_err();
        assert_eq!(err.kind, ExceptionKind::SyntaxError);
    }

    #[test]
    fn characters_outside_operators_are_identifier_characters() {
        assert_eq!(symbols("a @ b"), ["(NAME)", "(NAME)", "(NAME)", "(EOF)"]);
        assert_eq!(symbols("a@b"), ["(NAME)", "(EOF)"]);
    }

    #[test]
    fn undefined_operator_is_an_error() {
        let err = lex("a & b").unwrap_err();
        assert_eq!(err.kind, ExceptionKind::SyntaxError);
        assert_eq!(err.message, "unrecognized operator &");
        assert_eq!(err.col(), 3);
    }

    #[test]
    fn comments_run_to_end_of_line() {
        assert_eq!(
            symbols("a // ignored ( stuff\nb"),
            ["(NAME)", "(NAME)", "(EOF)"]
        );
        assert_eq!(symbols("a //"), ["(NAME)", "(EOF)"]);
    }

    #[test]
    fn peek_caches_one_lexeme() {
        let spec = LanguageSpecification::becca();
        let mut lexer = Lexer::new("a b".as_bytes(), &spec);
        assert_eq!(lexer.peek().unwrap().text, "a");
        assert_eq!(lexer.peek().unwrap().text, "a");
        assert_eq!(lexer.next().unwrap().text, "a");
        assert_eq!(lexer.next().unwrap().text, "b");
        assert_eq!(lexer.next().unwrap().symbol, Symbol::Eof);
        assert_eq!(lexer.next().unwrap().symbol, Symbol::Eof);
    }

    #[test]
    fn prefixed_integers() {
        assert_eq!(parse_int("0x1F"), Some(31));
        assert_eq!(parse_int("0b101"), Some(5));
        assert_eq!(parse_int("-42"), Some(-42));
        assert_eq!(parse_int("0x"), None);
        assert_eq!(parse_int("12a"), None);
        assert_eq!(symbols("0x1F"), ["(INT)", "(EOF)"]);
        assert_eq!(lex("0xZZ").unwrap_err().kind, ExceptionKind::SyntaxError);
    }
}
