//! The grammar table driving both the lexer and the parser.
//!
//! Every symbol maps to a [`GrammarEntry`] holding its binding power and up
//! to three parse behaviours. The behaviours are closed enums: a builder such
//! as [`LanguageSpecification::define_while`] installs a rule value, and the
//! parser interprets it through [`PrefixRule::parse`], [`InfixRule::parse`]
//! or [`StatementRule::parse`]. Grammars stay open for extension by calling
//! more builders at startup.

use std::collections::{HashMap, HashSet};
use std::io::Read;

use crate::error::Exception;
use crate::lex::{Lexeme, Symbol, describe};
use crate::parse::{Node, Parser};

/// How a symbol parses when it starts an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum PrefixRule {
    /// The lexeme is a complete expression by itself.
    Value,
    /// One operand, parsed at `power`.
    Unary { power: u32 },
    /// A parenthesised sub-expression; the parentheses leave no node behind.
    Group { close: Symbol },
    /// `if` used as an expression.
    If { else_keyword: Symbol },
}

/// How a symbol parses when it follows a complete left operand.
#[derive(Debug, Clone, PartialEq)]
pub enum InfixRule {
    Binary {
        node: Option<Symbol>,
        right_associative: bool,
    },
    Call {
        close: Symbol,
        separator: Symbol,
    },
    Access,
}

/// How a symbol parses when it starts a statement.
#[derive(Debug, Clone, PartialEq)]
pub enum StatementRule {
    Block {
        end: Symbol,
    },
    If {
        else_keyword: Symbol,
    },
    While,
    ForIn {
        in_keyword: Symbol,
    },
    FunctionDefinition {
        open: Symbol,
        close: Symbol,
        separator: Symbol,
    },
    Return,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GrammarEntry {
    pub binding_power: u32,
    pub prefix: Option<PrefixRule>,
    pub infix: Option<InfixRule>,
    pub statement: Option<StatementRule>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuoteSpec {
    pub open: char,
    pub close: char,
    pub literal: Symbol,
}

#[derive(Debug, Clone, Default)]
pub struct LanguageSpecification {
    symbols: HashMap<Symbol, GrammarEntry>,
    quotes: HashMap<char, QuoteSpec>,
    statement_terminators: HashSet<Symbol>,
    block_delimiters: HashMap<Symbol, Symbol>,
    comment_starts: HashSet<Symbol>,
    operator_starts: HashSet<char>,
}

impl LanguageSpecification {
    /// An empty language that only knows names and numeric literals.
    pub fn new() -> Self {
        let mut spec = LanguageSpecification::default();
        spec.define_value(Symbol::Name);
        spec.define_value(Symbol::IntLiteral);
        spec.define_value(Symbol::FloatLiteral);
        spec
    }

    /// The standard language.
    pub fn becca() -> Self {
        let mut spec = LanguageSpecification::new();

        spec.define_quotes('"', '"', Symbol::StringLiteral);
        spec.define_quotes('\'', '\'', Symbol::StringLiteral);
        spec.define_comment("//");
        spec.define_statement_terminator(";");
        spec.define_block("{", "}");
        spec.define_parens("(", ")", ",");
        spec.define_access(".");

        spec.define_if("if", "else");
        spec.define_while("while");
        spec.define_for_in("for", "in");
        spec.define_function_definition("def", "(", ")", ",");
        spec.define_return("return");

        spec.define_value("true");
        spec.define_value("false");
        spec.define_value("null");

        spec.define_prefix("!", 80);
        spec.define_prefix("-", 80);
        spec.define_assignment("=", 10);
        spec.define_infix("||", 20);
        spec.define_infix("&&", 30);
        for comparison in ["==", "!=", "<", ">", "<=", ">="] {
            spec.define_infix(comparison, 50);
        }
        spec.define_infix("+", 60);
        spec.define_infix("-", 60);
        spec.define_infix("*", 70);
        spec.define_infix("/", 70);
        spec.define_infix("%", 70);

        spec
    }

    /// Inserts `symbol` or merges behaviour into its existing entry. Rules
    /// already present are never replaced and the binding power only grows.
    pub fn define(
        &mut self,
        symbol: impl Into<Symbol>,
        binding_power: u32,
        prefix: Option<PrefixRule>,
        infix: Option<InfixRule>,
        statement: Option<StatementRule>,
    ) {
        let symbol = symbol.into();
        if let Symbol::Spelled(spelling) = &symbol {
            if !is_word(spelling) {
                self.operator_starts.extend(spelling.chars().next());
            }
        }

        let entry = self.symbols.entry(symbol).or_default();
        if entry.prefix.is_none() {
            entry.prefix = prefix;
        }
        if entry.infix.is_none() {
            entry.infix = infix;
        }
        if entry.statement.is_none() {
            entry.statement = statement;
        }
        entry.binding_power = entry.binding_power.max(binding_power);
    }

    pub fn define_empty(&mut self, symbol: impl Into<Symbol>) {
        self.define(symbol, 0, None, None, None);
    }

    pub fn define_value(&mut self, symbol: impl Into<Symbol>) {
        self.define(symbol, 0, Some(PrefixRule::Value), None, None);
    }

    /// The operand is parsed at `power`; the symbol's own binding power is
    /// left alone so an infix use of the same spelling keeps its precedence.
    pub fn define_prefix(&mut self, symbol: impl Into<Symbol>, power: u32) {
        self.define(symbol, 0, Some(PrefixRule::Unary { power }), None, None);
    }

    /// Left-associative binary operator.
    pub fn define_infix(&mut self, symbol: impl Into<Symbol>, power: u32) {
        let rule = InfixRule::Binary {
            node: None,
            right_associative: false,
        };
        self.define(symbol, power, None, Some(rule), None);
    }

    /// Right-associative binary operator producing an `Assignment` node.
    pub fn define_assignment(&mut self, symbol: impl Into<Symbol>, power: u32) {
        let rule = InfixRule::Binary {
            node: Some(Symbol::Assignment),
            right_associative: true,
        };
        self.define(symbol, power, None, Some(rule), None);
    }

    pub fn define_statement(&mut self, symbol: impl Into<Symbol>, rule: StatementRule) {
        self.define(symbol, 0, None, None, Some(rule));
    }

    pub fn define_statement_terminator(&mut self, symbol: impl Into<Symbol>) {
        let symbol = symbol.into();
        self.define_empty(symbol.clone());
        self.statement_terminators.insert(symbol);
    }

    pub fn define_block(&mut self, start: impl Into<Symbol>, end: impl Into<Symbol>) {
        let (start, end) = (start.into(), end.into());
        self.define_value(end.clone());
        self.define_statement(start.clone(), StatementRule::Block { end: end.clone() });
        self.block_delimiters.insert(start, end);
    }

    pub fn define_comment(&mut self, symbol: impl Into<Symbol>) {
        let symbol = symbol.into();
        self.define_empty(symbol.clone());
        self.comment_starts.insert(symbol);
    }

    pub fn define_quotes(&mut self, open: char, close: char, literal: Symbol) {
        self.quotes.insert(
            open,
            QuoteSpec {
                open,
                close,
                literal: literal.clone(),
            },
        );
        self.define_value(literal);
    }

    /// Grouping with `open`/`close` in prefix position and calls in infix
    /// position, arguments split by `separator`.
    pub fn define_parens(&mut self, open: &str, close: &str, separator: &str) {
        let close = Symbol::from(close);
        self.define(
            open,
            0,
            Some(PrefixRule::Group {
                close: close.clone(),
            }),
            None,
            None,
        );
        self.define_value(close.clone());
        self.define_empty(separator);
        self.define(
            open,
            110,
            None,
            Some(InfixRule::Call {
                close,
                separator: separator.into(),
            }),
            None,
        );
    }

    pub fn define_access(&mut self, symbol: impl Into<Symbol>) {
        self.define(symbol, 100, None, Some(InfixRule::Access), None);
    }

    pub fn define_if(&mut self, if_keyword: &str, else_keyword: &str) {
        let else_keyword = Symbol::from(else_keyword);
        self.define(
            if_keyword,
            0,
            Some(PrefixRule::If {
                else_keyword: else_keyword.clone(),
            }),
            None,
            Some(StatementRule::If {
                else_keyword: else_keyword.clone(),
            }),
        );
        self.define_empty(else_keyword);
    }

    pub fn define_while(&mut self, keyword: &str) {
        self.define_statement(keyword, StatementRule::While);
    }

    pub fn define_for_in(&mut self, for_keyword: &str, in_keyword: &str) {
        self.define_statement(
            for_keyword,
            StatementRule::ForIn {
                in_keyword: in_keyword.into(),
            },
        );
        self.define_empty(in_keyword);
    }

    pub fn define_function_definition(
        &mut self,
        keyword: &str,
        open: &str,
        close: &str,
        separator: &str,
    ) {
        self.define_statement(
            keyword,
            StatementRule::FunctionDefinition {
                open: open.into(),
                close: close.into(),
                separator: separator.into(),
            },
        );
    }

    pub fn define_return(&mut self, keyword: &str) {
        self.define_statement(keyword, StatementRule::Return);
    }

    pub fn entry(&self, symbol: &Symbol) -> Option<&GrammarEntry> {
        self.symbols.get(symbol)
    }

    pub fn is_defined(&self, symbol: &Symbol) -> bool {
        self.symbols.contains_key(symbol)
    }

    pub fn binding_power(&self, symbol: &Symbol) -> u32 {
        self.entry(symbol).map_or(0, |entry| entry.binding_power)
    }

    pub fn quote(&self, open: char) -> Option<&QuoteSpec> {
        self.quotes.get(&open)
    }

    pub fn is_identifier_character(&self, c: char) -> bool {
        !c.is_whitespace() && !self.quotes.contains_key(&c) && !self.operator_starts.contains(&c)
    }

    pub fn is_identifier_start_character(&self, c: char) -> bool {
        self.is_identifier_character(c) && !c.is_ascii_digit()
    }

    pub fn is_statement_terminator(&self, symbol: &Symbol) -> bool {
        self.statement_terminators.contains(symbol)
    }

    pub fn is_block_start(&self, symbol: &Symbol) -> bool {
        self.block_delimiters.contains_key(symbol)
    }

    pub fn is_block_end(&self, symbol: &Symbol, start: &Symbol) -> bool {
        self.block_delimiters.get(start) == Some(symbol)
    }

    pub fn is_any_block_end(&self, symbol: &Symbol) -> bool {
        self.block_delimiters.values().any(|end| end == symbol)
    }

    pub fn is_comment_start(&self, symbol: &Symbol) -> bool {
        self.comment_starts.contains(symbol)
    }
}

fn is_word(spelling: &str) -> bool {
    spelling.chars().all(|c| c.is_alphanumeric() || c == '_')
}

impl PrefixRule {
    pub fn parse<R: Read>(
        &self,
        lexeme: Lexeme,
        parser: &mut Parser<'_, R>,
    ) -> Result<Node, Exception> {
        match self {
            PrefixRule::Value => Ok(parser.node(lexeme)),
            PrefixRule::Unary { power } => {
                let mut node = parser.node(lexeme);
                let operand = parser.expression(*power)?;
                node.children.push(operand);
                Ok(node)
            }
            PrefixRule::Group { close } => {
                let inner = parser.expression(0)?;
                let next = parser.next()?;
                if &next.symbol != close {
                    return Err(Exception::syntax(
                        format!("unterminated parentheses, found {}", describe(&next)),
                        next.pos,
                    )
                    .with_help(format!(
                        "close the group opened at {}:{} with `{close}`",
                        lexeme.pos.line, lexeme.pos.col
                    )));
                }
                Ok(inner)
            }
            PrefixRule::If { else_keyword } => parse_if(lexeme, parser, else_keyword),
        }
    }
}

impl InfixRule {
    pub fn parse<R: Read>(
        &self,
        lexeme: Lexeme,
        parser: &mut Parser<'_, R>,
        left: Node,
    ) -> Result<Node, Exception> {
        match self {
            InfixRule::Binary {
                node: rename,
                right_associative,
            } => {
                let power = parser.spec().binding_power(&lexeme.symbol);
                let mut node = parser.node(lexeme);
                if let Some(symbol) = rename {
                    node.symbol = symbol.clone();
                }
                let power = if *right_associative {
                    power.saturating_sub(1)
                } else {
                    power
                };
                let right = parser.expression(power)?;
                node.children = vec![left, right];
                Ok(node)
            }
            InfixRule::Call { close, separator } => {
                if matches!(
                    left.symbol,
                    Symbol::StringLiteral | Symbol::IntLiteral | Symbol::FloatLiteral
                ) {
                    return Err(Exception::syntax(
                        format!("unexpected {} after literal", lexeme.text),
                        lexeme.pos,
                    ));
                }
                let mut node = parser.node(lexeme);
                node.symbol = Symbol::FunctionInvocation;
                node.children.push(left);

                if &parser.peek()?.symbol == close {
                    parser.next()?;
                    return Ok(node);
                }
                loop {
                    let argument = parser.expression(0)?;
                    node.children.push(argument);
                    if &parser.peek()?.symbol != separator {
                        break;
                    }
                    parser.next()?;
                }
                let end = parser.next()?;
                if &end.symbol != close {
                    return Err(unterminated_parentheses(&end, &node));
                }
                Ok(node)
            }
            InfixRule::Access => {
                if parser.peek()?.symbol != Symbol::Name {
                    return Err(Exception::syntax("invalid property access", lexeme.pos)
                        .with_help("a method name must follow the access operator"));
                }
                let power = parser.spec().binding_power(&lexeme.symbol);
                let mut node = parser.node(lexeme);
                node.symbol = Symbol::Access;
                let member = parser.expression(power)?;
                node.children = vec![left, member];
                Ok(node)
            }
        }
    }
}

impl StatementRule {
    pub fn parse<R: Read>(
        &self,
        lexeme: Lexeme,
        parser: &mut Parser<'_, R>,
    ) -> Result<Node, Exception> {
        match self {
            StatementRule::Block { end } => {
                let mut node = parser.node(lexeme);
                node.symbol = Symbol::Block;
                node.children = parser.block_statements(end)?;
                let close = parser.next()?;
                if &close.symbol != end {
                    return Err(Exception::syntax(
                        format!("unterminated block, found {}", describe(&close)),
                        close.pos,
                    )
                    .with_help(format!(
                        "close the block opened at {}:{} with `{end}`",
                        node.pos.line, node.pos.col
                    )));
                }
                Ok(node)
            }
            StatementRule::If { else_keyword } => parse_if(lexeme, parser, else_keyword),
            StatementRule::While => {
                let mut node = parser.node(lexeme);
                node.symbol = Symbol::While;
                let condition = parser.expression(0)?;
                let body = parser.block()?;
                node.children = vec![condition, body];
                Ok(node)
            }
            StatementRule::ForIn { in_keyword } => {
                let mut node = parser.node(lexeme);
                node.symbol = Symbol::ForIn;
                let variable = parser.expect(&Symbol::Name, "expected loop variable name")?;
                let variable = parser.node(variable);
                parser.expect(in_keyword, &format!("expected `{in_keyword}`"))?;
                let iterable = parser.expression(0)?;
                let body = parser.block()?;
                node.children = vec![variable, iterable, body];
                Ok(node)
            }
            StatementRule::FunctionDefinition {
                open,
                close,
                separator,
            } => {
                let mut node = parser.node(lexeme);
                node.symbol = Symbol::FunctionDefinition;
                let name = parser.expect(&Symbol::Name, "expected function name")?;
                let name = parser.node(name);

                let open = parser.expect(open, &format!("expected `{open}`"))?;
                let mut parameters = Node::new(Symbol::FunctionParameters, open.text, open.pos);
                if &parser.peek()?.symbol == close {
                    parser.next()?;
                } else {
                    loop {
                        let parameter = parser.expect(&Symbol::Name, "expected parameter name")?;
                        if parameters.children.iter().any(|p| p.text == parameter.text) {
                            return Err(Exception::syntax(
                                format!("duplicate parameter {}", parameter.text),
                                parameter.pos,
                            ));
                        }
                        parameters.children.push(parser.node(parameter));
                        if &parser.peek()?.symbol != separator {
                            break;
                        }
                        parser.next()?;
                    }
                    let end = parser.next()?;
                    if &end.symbol != close {
                        return Err(unterminated_parentheses(&end, &parameters));
                    }
                }

                let body = parser.block()?;
                node.children = vec![name, parameters, body];
                Ok(node)
            }
            StatementRule::Return => {
                let mut node = parser.node(lexeme);
                let next = parser.peek()?.symbol.clone();
                let spec = parser.spec();
                let bare = next == Symbol::Eof
                    || spec.is_statement_terminator(&next)
                    || spec.is_any_block_end(&next);
                if !bare {
                    let value = parser.expression(0)?;
                    node.children.push(value);
                }
                if parser.spec().is_statement_terminator(&parser.peek()?.symbol) {
                    parser.next()?;
                }
                Ok(node)
            }
        }
    }
}

/// `if <condition> <block>` followed by an optional `else <block>` or
/// `else if ...` chain. The nested `if` is re-tagged as `ElseIf`.
fn parse_if<R: Read>(
    lexeme: Lexeme,
    parser: &mut Parser<'_, R>,
    else_keyword: &Symbol,
) -> Result<Node, Exception> {
    let if_keyword = lexeme.symbol.clone();
    let mut node = parser.node(lexeme);
    node.symbol = Symbol::If;

    let condition = parser.expression(0)?;
    let then_branch = parser.block()?;
    node.children = vec![condition, then_branch];

    if &parser.peek()?.symbol == else_keyword {
        parser.next()?;
        if parser.peek()?.symbol == if_keyword {
            let mut chained = parser.statement()?;
            chained.symbol = Symbol::ElseIf;
            node.children.push(chained);
        } else {
            let else_branch = parser.block()?;
            node.children.push(else_branch);
        }
    }
    Ok(node)
}

fn unterminated_parentheses(found: &Lexeme, opened: &Node) -> Exception {
    Exception::syntax(
        format!("unterminated parentheses with symbol {}", describe(found)),
        found.pos,
    )
    .with_help(format!(
        "close the parenthesis opened at {}:{}",
        opened.pos.line, opened.pos.col
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn define_merges_without_overwriting() {
        let mut spec = LanguageSpecification::new();
        spec.define_infix("-", 60);
        spec.define_prefix("-", 80);
        spec.define_infix("-", 10);

        let entry = spec.entry(&Symbol::from("-")).unwrap();
        assert_eq!(entry.binding_power, 60);
        assert_eq!(entry.prefix, Some(PrefixRule::Unary { power: 80 }));
        assert_eq!(
            entry.infix,
            Some(InfixRule::Binary {
                node: None,
                right_associative: false
            })
        );
    }

    #[test]
    fn binding_power_only_grows() {
        let mut spec = LanguageSpecification::new();
        spec.define_empty("(");
        spec.define_parens("(", ")", ",");
        assert_eq!(spec.binding_power(&Symbol::from("(")), 110);
    }

    #[test]
    fn block_delimiters_pair_up() {
        let spec = LanguageSpecification::becca();
        let open = Symbol::from("{");
        let close = Symbol::from("}");
        assert!(spec.is_block_start(&open));
        assert!(spec.is_block_end(&close, &open));
        assert!(spec.is_any_block_end(&close));
        assert!(!spec.is_block_end(&open, &close));
        assert_eq!(
            spec.entry(&close).and_then(|e| e.prefix.clone()),
            Some(PrefixRule::Value)
        );
    }

    #[test]
    fn identifier_characters_exclude_operator_starts() {
        let spec = LanguageSpecification::becca();
        assert!(spec.is_identifier_character('a'));
        assert!(spec.is_identifier_character('7'));
        assert!(!spec.is_identifier_start_character('7'));
        assert!(!spec.is_identifier_character('&'));
        assert!(!spec.is_identifier_character('"'));
        assert!(!spec.is_identifier_character(' '));
        // keywords are words, so their letters stay identifier characters
        assert!(spec.is_identifier_character('w'));
    }
}
