use std::fmt::{Display, Write as _};
use std::io::Read;

use crate::error::{Exception, Position};
use crate::grammar::LanguageSpecification;
use crate::lex::{Lexeme, Lexer, Symbol, describe};
use crate::{STACK_GROW_SIZE, STACK_RED_ZONE};

/// A syntax tree node. Children are ordered and owned.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub symbol: Symbol,
    pub text: String,
    pub binding_power: u32,
    pub pos: Position,
    pub children: Vec<Node>,
}

impl Node {
    pub fn new(symbol: Symbol, text: impl Into<String>, pos: Position) -> Self {
        Node {
            symbol,
            text: text.into(),
            binding_power: 0,
            pos,
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<Node>) -> Self {
        self.children = children;
        self
    }

    /// One line per node, `{symbol:..,value:..,bindingPower:..}:`, with two
    /// extra spaces of indentation per level.
    pub fn tree_string(&self) -> String {
        let mut out = String::new();
        self.write_tree(&mut out, 0);
        out
    }

    fn write_tree(&self, out: &mut String, depth: usize) {
        let _ = writeln!(
            out,
            "{:indent$}{{symbol:{},value:{},bindingPower:{}}}:",
            "",
            self.symbol,
            self.text,
            self.binding_power,
            indent = depth * 2
        );
        for child in &self.children {
            child.write_tree(out, depth + 1);
        }
    }
}

impl Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.tree_string())
    }
}

/// Top-down operator precedence parser over a streaming [`Lexer`].
///
/// Which symbols exist and how each one parses is entirely decided by the
/// [`LanguageSpecification`]; the parser only drives the rules.
pub struct Parser<'spec, R> {
    lexer: Lexer<'spec, R>,
    open_blocks: Vec<Symbol>,
}

impl<'spec, R: Read> Parser<'spec, R> {
    pub fn new(reader: R, spec: &'spec LanguageSpecification) -> Self {
        Parser {
            lexer: Lexer::new(reader, spec),
            open_blocks: Vec::new(),
        }
    }

    pub fn spec(&self) -> &'spec LanguageSpecification {
        self.lexer.spec()
    }

    pub fn source_text(&self) -> &str {
        self.lexer.source_text()
    }

    pub fn peek(&mut self) -> Result<&Lexeme, Exception> {
        self.lexer.peek()
    }

    pub fn next(&mut self) -> Result<Lexeme, Exception> {
        self.lexer.next()
    }

    pub fn expect(&mut self, expected: &Symbol, error: &str) -> Result<Lexeme, Exception> {
        self.lexer.expect(expected, error)
    }

    /// Wraps a lexeme into a leaf node carrying the symbol's binding power.
    pub fn node(&self, lexeme: Lexeme) -> Node {
        Node {
            binding_power: self.spec().binding_power(&lexeme.symbol),
            symbol: lexeme.symbol,
            text: lexeme.text,
            pos: lexeme.pos,
            children: Vec::new(),
        }
    }

    /// Parses statements until end of input or the end symbol of the
    /// innermost open block, which is left unconsumed.
    pub fn statements(&mut self) -> Result<Vec<Node>, Exception> {
        let mut statements = Vec::new();
        loop {
            let next = self.peek()?.symbol.clone();
            if next == Symbol::Eof || self.open_blocks.last() == Some(&next) {
                return Ok(statements);
            }
            statements.push(self.statement()?);
        }
    }

    /// [`statements`](Self::statements) with `end` registered as the
    /// terminator of a newly opened block.
    pub fn block_statements(&mut self, end: &Symbol) -> Result<Vec<Node>, Exception> {
        self.open_blocks.push(end.clone());
        let statements = self.statements();
        self.open_blocks.pop();
        statements
    }

    pub fn statement(&mut self) -> Result<Node, Exception> {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || self.statement_within())
    }

    fn statement_within(&mut self) -> Result<Node, Exception> {
        let spec = self.spec();
        let rule = spec
            .entry(&self.peek()?.symbol)
            .and_then(|entry| entry.statement.as_ref());
        if let Some(rule) = rule {
            let lexeme = self.next()?;
            return rule.parse(lexeme, self);
        }

        let expression = self.expression(0)?;
        let terminator = self.next()?;
        if !spec.is_statement_terminator(&terminator.symbol) {
            return Err(Exception::syntax(
                format!("unterminated statement, found {}", describe(&terminator)),
                terminator.pos,
            )
            .with_help("end the statement with `;`"));
        }
        Ok(expression)
    }

    /// Requires the next lexeme to open a block and parses the block.
    pub fn block(&mut self) -> Result<Node, Exception> {
        let spec = self.spec();
        let lexeme = self.next()?;
        if !spec.is_block_start(&lexeme.symbol) {
            return Err(Exception::syntax(
                format!("expected block start, but got {}", describe(&lexeme)),
                lexeme.pos,
            ));
        }
        match spec.entry(&lexeme.symbol).and_then(|e| e.statement.as_ref()) {
            Some(rule) => rule.parse(lexeme, self),
            None => Err(Exception::internal(
                format!("block start {} has no statement rule", lexeme.symbol),
                lexeme.pos,
            )),
        }
    }

    /// Parses an expression, absorbing infix operators while their binding
    /// power is strictly greater than `right_binding_power`.
    pub fn expression(&mut self, right_binding_power: u32) -> Result<Node, Exception> {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || {
            self.expression_within(right_binding_power)
        })
    }

    fn expression_within(&mut self, right_binding_power: u32) -> Result<Node, Exception> {
        let spec = self.spec();
        let lexeme = self.next()?;
        let Some(prefix) = spec.entry(&lexeme.symbol).and_then(|e| e.prefix.as_ref()) else {
            return Err(Exception::syntax(
                format!("{} is not a valid prefix symbol", describe(&lexeme)),
                lexeme.pos,
            ));
        };
        let mut left = prefix.parse(lexeme, self)?;

        while right_binding_power < spec.binding_power(&self.peek()?.symbol) {
            let lexeme = self.next()?;
            let Some(infix) = spec.entry(&lexeme.symbol).and_then(|e| e.infix.as_ref()) else {
                return Err(Exception::syntax(
                    format!("{} is not a valid infix symbol", describe(&lexeme)),
                    lexeme.pos,
                ));
            };
            left = infix.parse(lexeme, self, left)?;
        }
        Ok(left)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExceptionKind;

    fn parse(source: &str) -> Result<Vec<Node>, Exception> {
        let spec = LanguageSpecification::becca();
        Parser::new(source.as_bytes(), &spec).statements()
    }

    /// Compact s-expression view: `(op a b)` for interior nodes.
    fn sexp(node: &Node) -> String {
        let head = match &node.symbol {
            Symbol::Spelled(s) => s.clone(),
            Symbol::Name | Symbol::IntLiteral | Symbol::FloatLiteral | Symbol::StringLiteral => {
                node.text.clone()
            }
            other => other.to_string(),
        };
        if node.children.is_empty() {
            head
        } else {
            let children: Vec<_> = node.children.iter().map(sexp).collect();
            format!("({head} {})", children.join(" "))
        }
    }

    fn single(source: &str) -> String {
        let statements = parse(source).unwrap();
        assert_eq!(statements.len(), 1);
        sexp(&statements[0])
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        assert_eq!(single("1 + 2 * 3;"), "(+ 1 (* 2 3))");
        assert_eq!(single("(1 + 2) * 3;"), "(* (+ 1 2) 3)");
    }

    #[test]
    fn subtraction_is_left_associative() {
        assert_eq!(single("10 - 3 - 2;"), "(- (- 10 3) 2)");
    }

    #[test]
    fn assignment_is_right_associative() {
        assert_eq!(single("a = b = 1;"), "((ASSIGNMENT) a ((ASSIGNMENT) b 1))");
    }

    #[test]
    fn unary_minus_and_not() {
        assert_eq!(single("-a * b;"), "(* (- a) b)");
        assert_eq!(single("!a && b;"), "(&& (! a) b)");
        assert_eq!(single("2 * 3 - 1;"), "(- (* 2 3) 1)");
    }

    #[test]
    fn calls_and_method_access() {
        assert_eq!(single("f();"), "((FUNCTIONINVOCATION) f)");
        assert_eq!(single("add(1, 2 + 3);"), "((FUNCTIONINVOCATION) add 1 (+ 2 3))");
        assert_eq!(
            single("s.replace('a', 'b').length;"),
            "((ACCESS) ((ACCESS) s ((FUNCTIONINVOCATION) replace a b)) length)"
        );
    }

    #[test]
    fn if_else_if_chain() {
        assert_eq!(
            single("if a { 1; } else if b { 2; } else { 3; }"),
            "((IF) a ((BLOCK) 1) ((ELSEIF) b ((BLOCK) 2) ((BLOCK) 3)))"
        );
    }

    #[test]
    fn definitions_and_loops() {
        assert_eq!(
            single("def add(a, b) { return a + b; }"),
            "((FUNCTIONDEFINITION) add ((FUNCTIONPARAMETERS) a b) ((BLOCK) (return (+ a b))))"
        );
        assert_eq!(
            single("while i < 3 { i = i + 1; }"),
            "((WHILE) (< i 3) ((BLOCK) ((ASSIGNMENT) i (+ i 1))))"
        );
        assert_eq!(
            single("for c in 'ab' { print(c); }"),
            "((FORIN) c ab ((BLOCK) ((FUNCTIONINVOCATION) print c)))"
        );
    }

    #[test]
    fn bare_return() {
        let expected = "((FUNCTIONDEFINITION) f (FUNCTIONPARAMETERS) ((BLOCK) return))";
        assert_eq!(single("def f() { return; }"), expected);
        assert_eq!(single("def f() { return }"), expected);
    }

    #[test]
    fn nested_blocks_close_innermost_first() {
        let statements = parse("{ { a; } b; } c;").unwrap();
        assert_eq!(statements.len(), 2);
        assert_eq!(sexp(&statements[0]), "((BLOCK) ((BLOCK) a) b)");
    }

    #[test]
    fn missing_terminator_is_reported_at_the_next_lexeme() {
        let err = parse("a = 1\nb = 2;").unwrap_err();
        assert_eq!(err.kind, ExceptionKind::SyntaxError);
        assert_eq!((err.line(), err.col()), (2, 1));
    }

    #[test]
    fn unterminated_block_and_parentheses() {
        assert_eq!(parse("{ a;").unwrap_err().kind, ExceptionKind::SyntaxError);
        assert_eq!(parse("f(1, 2;").unwrap_err().kind, ExceptionKind::SyntaxError);
        assert_eq!(parse("(1 + 2;").unwrap_err().kind, ExceptionKind::SyntaxError);
    }

    #[test]
    fn invalid_prefix_and_access() {
        assert_eq!(parse("* 2;").unwrap_err().kind, ExceptionKind::SyntaxError);
        assert_eq!(parse("a.1;").unwrap_err().kind, ExceptionKind::SyntaxError);
        assert_eq!(parse("def f(a, a) {}").unwrap_err().kind, ExceptionKind::SyntaxError);
    }

    #[test]
    fn names_separated_by_unknown_characters_are_unterminated() {
        let err = parse("a @ b;").unwrap_err();
        assert_eq!(err.kind, ExceptionKind::SyntaxError);
        assert!(err.message.starts_with("unterminated statement"), "{}", err.message);
        assert_eq!(err.col(), 3);
    }

    #[test]
    fn deep_nesting_does_not_exhaust_the_stack() {
        let depth = 20_000;
        let source = format!("{}1{};", "(".repeat(depth), ")".repeat(depth));
        let statements = parse(&source).unwrap();
        assert_eq!(statements[0].symbol, Symbol::IntLiteral);

        let source = format!("{}{}", "{ ".repeat(2_000), "}".repeat(2_000));
        assert_eq!(parse(&source).unwrap().len(), 1);
    }

    #[test]
    fn tree_string_indents_children() {
        let statements = parse("1 + x;").unwrap();
        assert_eq!(
            statements[0].tree_string(),
            "{symbol:+,value:+,bindingPower:60}:\n  \
             {symbol:(INT),value:1,bindingPower:0}:\n  \
             {symbol:(NAME),value:x,bindingPower:0}:\n"
        );
    }
}
