//! Rewrites sugared statement forms into core constructs before evaluation.

use std::collections::HashMap;

use crate::error::{Exception, Position};
use crate::lex::Symbol;
use crate::parse::Node;
use crate::{STACK_GROW_SIZE, STACK_RED_ZONE};

pub type RewriteRule = fn(Node) -> Result<Node, Exception>;

pub trait Unsweeten {
    /// Rewrites one statement tree, including the statement lists nested in
    /// its blocks, branches, loop bodies and function bodies.
    fn unsweeten(&self, tree: Node) -> Result<Node, Exception>;

    fn unsweeten_all(&self, trees: Vec<Node>) -> Result<Vec<Node>, Exception> {
        trees.into_iter().map(|tree| self.unsweeten(tree)).collect()
    }
}

/// Table of rewrite rules keyed on the root symbol of a statement.
/// Expressions are never descended into.
#[derive(Debug, Clone, Default)]
pub struct SimpleUnsweetener {
    rules: HashMap<Symbol, RewriteRule>,
}

impl SimpleUnsweetener {
    pub fn new() -> Self {
        SimpleUnsweetener::default()
    }

    /// The standard rewrites: `for ... in` becomes an iterator-driven `while`.
    pub fn becca() -> Self {
        let mut unsweetener = SimpleUnsweetener::new();
        unsweetener.define(Symbol::ForIn, unsweeten_for_in);
        unsweetener
    }

    pub fn define(&mut self, symbol: Symbol, rule: RewriteRule) {
        self.rules.insert(symbol, rule);
    }
}

impl Unsweeten for SimpleUnsweetener {
    fn unsweeten(&self, tree: Node) -> Result<Node, Exception> {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || self.unsweeten_nested(tree))
    }
}

impl SimpleUnsweetener {
    fn unsweeten_nested(&self, tree: Node) -> Result<Node, Exception> {
        let mut tree = match self.rules.get(&tree.symbol) {
            Some(rule) => rule(tree)?,
            None => tree,
        };

        // indices of children that hold statement lists or further branches
        let nested = match tree.symbol {
            Symbol::Block => 0..tree.children.len(),
            Symbol::If | Symbol::ElseIf => 1..tree.children.len(),
            Symbol::While => 1..tree.children.len().min(2),
            Symbol::FunctionDefinition => 2..tree.children.len().min(3),
            _ => 0..0,
        };
        for index in nested {
            let child = std::mem::replace(
                &mut tree.children[index],
                Node::new(Symbol::Block, "", Position::UNKNOWN),
            );
            tree.children[index] = self.unsweeten(child)?;
        }
        Ok(tree)
    }
}

/// ```text
/// for x in xs { body }
/// ```
/// becomes
/// ```text
/// {
///     x = null;
///     ~xIterator@L:C = xs.iterator();
///     while ~xIterator@L:C.hasNext() {
///         x = ~xIterator@L:C.getNext();
///         body
///     }
/// }
/// ```
/// The hidden iterator name carries the loop position so nested loops over
/// the same variable do not share an iterator.
fn unsweeten_for_in(tree: Node) -> Result<Node, Exception> {
    let pos = tree.pos;
    let [variable, iterable, body]: [Node; 3] = tree.children.try_into().map_err(|_| {
        Exception::internal("malformed for-in: expected variable, iterable and body", pos)
    })?;
    if variable.symbol != Symbol::Name || body.symbol != Symbol::Block {
        return Err(Exception::internal(
            "malformed for-in: expected a loop variable name and a block",
            pos,
        ));
    }

    let hidden = format!("~{}Iterator@{}:{}", variable.text, pos.line, pos.col);
    let var_pos = variable.pos;
    let iter_pos = iterable.pos;

    let initialize = build_assignment(
        build_name(&variable.text, var_pos),
        Node::new(Symbol::from("null"), "null", var_pos),
    );
    let iterator = build_assignment(
        build_name(&hidden, iter_pos),
        build_method_call(iterable, "iterator", iter_pos),
    );
    let condition = build_method_call(build_name(&hidden, iter_pos), "hasNext", pos);
    let advance = build_assignment(
        build_name(&variable.text, var_pos),
        build_method_call(build_name(&hidden, iter_pos), "getNext", var_pos),
    );

    let mut statements = vec![advance];
    statements.extend(body.children);
    let loop_body = build_block(statements, body.pos);

    Ok(build_block(
        vec![
            initialize,
            iterator,
            build_while(condition, loop_body, pos),
        ],
        pos,
    ))
}

pub fn build_name(name: &str, pos: Position) -> Node {
    Node::new(Symbol::Name, name, pos)
}

pub fn build_assignment(target: Node, value: Node) -> Node {
    let pos = target.pos;
    Node::new(Symbol::Assignment, "=", pos).with_children(vec![target, value])
}

pub fn build_block(statements: Vec<Node>, pos: Position) -> Node {
    Node::new(Symbol::Block, "{", pos).with_children(statements)
}

pub fn build_while(condition: Node, body: Node, pos: Position) -> Node {
    Node::new(Symbol::While, "while", pos).with_children(vec![condition, body])
}

/// `receiver.method()` with no arguments besides the receiver.
pub fn build_method_call(receiver: Node, method: &str, pos: Position) -> Node {
    let invocation =
        Node::new(Symbol::FunctionInvocation, "(", pos).with_children(vec![build_name(method, pos)]);
    Node::new(Symbol::Access, ".", pos).with_children(vec![receiver, invocation])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::LanguageSpecification;
    use crate::parse::Parser;

    fn unsweetened(source: &str) -> Vec<Node> {
        let spec = LanguageSpecification::becca();
        let trees = Parser::new(source.as_bytes(), &spec).statements().unwrap();
        SimpleUnsweetener::becca().unsweeten_all(trees).unwrap()
    }

    fn symbols(node: &Node) -> Vec<Symbol> {
        node.children.iter().map(|c| c.symbol.clone()).collect()
    }

    #[test]
    fn for_in_becomes_block_with_while() {
        let trees = unsweetened("for c in 'ab' { print(c); }");
        let block = &trees[0];
        assert_eq!(block.symbol, Symbol::Block);
        assert_eq!(
            symbols(block),
            [Symbol::Assignment, Symbol::Assignment, Symbol::While]
        );

        let init = &block.children[0];
        assert_eq!(init.children[0].text, "c");
        assert!(init.children[1].symbol.is("null"));

        let iterator = &block.children[1];
        assert!(iterator.children[0].text.starts_with("~cIterator"));
        assert_eq!(iterator.children[1].symbol, Symbol::Access);

        let body = &block.children[2].children[1];
        assert_eq!(
            symbols(body),
            [Symbol::Assignment, Symbol::FunctionInvocation]
        );
    }

    #[test]
    fn positions_survive_rewriting() {
        let trees = unsweetened("\n  for c in s {}");
        assert_eq!((trees[0].pos.line, trees[0].pos.col), (2, 3));
        assert_eq!(trees[0].children[0].children[0].pos.col, 7);
    }

    #[test]
    fn nested_statement_lists_are_rewritten() {
        let trees = unsweetened(
            "def f(xs) { if xs { for a in xs { for b in a {} } } else { for x in xs {} } }",
        );
        let body = &trees[0].children[2];
        let branch = &body.children[0];
        let outer = &branch.children[1].children[0];
        assert_eq!(outer.symbol, Symbol::Block);
        let inner = &outer.children[2].children[1].children[1];
        assert_eq!(inner.symbol, Symbol::Block);
        assert_eq!(branch.children[2].children[0].symbol, Symbol::Block);
    }

    #[test]
    fn expressions_are_left_alone() {
        let trees = unsweetened("x = 1 + 2;");
        assert_eq!(trees[0].symbol, Symbol::Assignment);
        assert_eq!(symbols(&trees[0].children[1]), [Symbol::IntLiteral, Symbol::IntLiteral]);
    }

    #[test]
    fn malformed_for_in_is_an_internal_error() {
        let bad = Node::new(Symbol::ForIn, "for", Position::UNKNOWN);
        let err = SimpleUnsweetener::becca().unsweeten(bad).unwrap_err();
        assert_eq!(err.kind, crate::error::ExceptionKind::InternalError);
    }
}
