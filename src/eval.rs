use std::collections::HashMap;
use std::io::Write;
use std::rc::Rc;

use crate::error::{Exception, ExceptionKind, Position};
use crate::lex::{Symbol, parse_int};
use crate::parse::Node;
use crate::system;
use crate::value::{Arity, Body, Callable, Payload, TypeRegistry, Value};
use crate::{STACK_GROW_SIZE, STACK_RED_ZONE};

/// Deepest user-function nesting before evaluation gives up. The host stack
/// grows on demand, so this only bounds runaway recursion.
pub const MAX_CALL_DEPTH: usize = 4096;

#[derive(Debug)]
pub struct Frame {
    pub function: String,
    pub bindings: HashMap<String, Value>,
    pub return_value: Option<Value>,
}

impl Frame {
    pub fn new(function: &str) -> Self {
        Frame {
            function: function.to_string(),
            bindings: HashMap::new(),
            return_value: None,
        }
    }
}

/// Lexical frames, innermost last. The global frame at the bottom is never
/// popped.
#[derive(Debug)]
pub struct CallStack {
    frames: Vec<Frame>,
}

impl CallStack {
    pub fn new() -> Self {
        CallStack {
            frames: vec![Frame::new("<global>")],
        }
    }

    pub fn push(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    pub fn pop(&mut self) -> Option<Frame> {
        if self.frames.len() > 1 {
            self.frames.pop()
        } else {
            None
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_global(&self) -> bool {
        self.frames.len() == 1
    }

    pub fn iter(&self) -> impl Iterator<Item = &Frame> {
        self.frames.iter().rev()
    }

    pub fn current(&self) -> &Frame {
        &self.frames[self.frames.len() - 1]
    }

    pub fn current_mut(&mut self) -> &mut Frame {
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    pub fn globals_mut(&mut self) -> &mut Frame {
        &mut self.frames[0]
    }

    /// Searches from the innermost frame outwards.
    pub fn resolve(&self, name: &str) -> Option<&Value> {
        self.iter().find_map(|frame| frame.bindings.get(name))
    }

    /// Always binds in the innermost frame, shadowing outer bindings.
    pub fn assign(&mut self, name: &str, value: Value) {
        self.current_mut().bindings.insert(name.to_string(), value);
    }

    pub fn returning(&self) -> bool {
        self.current().return_value.is_some()
    }
}

impl Default for CallStack {
    fn default() -> Self {
        Self::new()
    }
}

/// Tree-walking evaluator over unsweetened syntax.
pub struct Interpreter {
    pub(crate) call_stack: CallStack,
    pub(crate) types: TypeRegistry,
    output: Box<dyn Write>,
}

impl Interpreter {
    /// An interpreter printing to standard output.
    pub fn new() -> Self {
        Self::with_output(Box::new(std::io::stdout()))
    }

    pub fn with_output(output: Box<dyn Write>) -> Self {
        let mut interpreter = Interpreter {
            call_stack: CallStack::new(),
            types: system::registry(),
            output,
        };
        system::install_globals(&mut interpreter);
        interpreter
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    /// Extension point for embedders registering their own types.
    pub fn types_mut(&mut self) -> &mut TypeRegistry {
        &mut self.types
    }

    pub fn define_global(&mut self, name: &str, value: Value) {
        self.call_stack.globals_mut().bindings.insert(name.to_string(), value);
    }

    pub fn call_stack(&self) -> &CallStack {
        &self.call_stack
    }

    pub fn output(&mut self) -> &mut dyn Write {
        &mut *self.output
    }

    pub fn type_name(&self, value: &Value) -> &str {
        self.types.name_of(value.ty)
    }

    pub fn render(&self, value: &Value) -> String {
        self.types.render(value)
    }

    /// Evaluates a statement list in the current frame; the value of the last
    /// statement evaluated is returned.
    pub fn execute(&mut self, statements: &[Node]) -> Result<Value, Exception> {
        self.evaluate_statements(statements)
    }

    fn evaluate_statements(&mut self, statements: &[Node]) -> Result<Value, Exception> {
        let mut last = Value::null();
        for statement in statements {
            last = self.evaluate(statement)?;
            if self.call_stack.returning() {
                break;
            }
        }
        Ok(last)
    }

    pub fn evaluate(&mut self, node: &Node) -> Result<Value, Exception> {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || self.evaluate_node(node))
    }

    fn evaluate_node(&mut self, node: &Node) -> Result<Value, Exception> {
        match &node.symbol {
            Symbol::StringLiteral => Ok(Value::string(node.text.as_str())),
            Symbol::IntLiteral => parse_int(&node.text)
                .map(Value::int)
                .ok_or_else(|| Exception::internal(format!("malformed int {}", node.text), node.pos)),
            Symbol::FloatLiteral => node
                .text
                .parse::<f64>()
                .map(Value::float)
                .map_err(|_| Exception::internal(format!("malformed float {}", node.text), node.pos)),
            Symbol::Name => self.resolve(&node.text, node.pos),
            Symbol::Assignment => self.assign(node),
            Symbol::Block => self.evaluate_statements(&node.children),
            Symbol::If | Symbol::ElseIf => self.evaluate_if(node),
            Symbol::While => self.evaluate_while(node),
            Symbol::FunctionDefinition => self.define_function(node),
            Symbol::FunctionInvocation => self.call(node),
            Symbol::Access => self.access(node),
            Symbol::Spelled(spelling) => self.evaluate_spelled(spelling, node),
            _ => Err(unrecognized(node)),
        }
    }

    fn evaluate_spelled(&mut self, spelling: &str, node: &Node) -> Result<Value, Exception> {
        match spelling {
            "true" => Ok(Value::bool(true)),
            "false" => Ok(Value::bool(false)),
            "null" => Ok(Value::null()),
            "return" => self.evaluate_return(node),
            "&&" => self.evaluate_and(node),
            "||" => self.evaluate_or(node),
            "!" => {
                let operand = self.unary_operand(node)?;
                Ok(Value::bool(!operand.truthy()))
            }
            "-" if node.children.len() == 1 => self.negate(node),
            "==" => {
                let (left, right) = self.operands(node)?;
                Ok(Value::bool(left.equals(&right)))
            }
            "!=" => {
                let (left, right) = self.operands(node)?;
                Ok(Value::bool(!left.equals(&right)))
            }
            "<" | ">" => {
                let (left, right) = self.operands(node)?;
                self.compare(spelling, &left, &right, node.pos).map(Value::bool)
            }
            "<=" | ">=" => {
                let (left, right) = self.operands(node)?;
                if left.equals(&right) {
                    return Ok(Value::bool(true));
                }
                self.compare(&spelling[..1], &left, &right, node.pos)
                    .map(Value::bool)
            }
            "+" | "-" | "*" | "/" | "%" => {
                let (left, right) = self.operands(node)?;
                self.arithmetic(spelling, left, right, node.pos)
            }
            _ => Err(unrecognized(node)),
        }
    }

    fn resolve(&self, name: &str, pos: Position) -> Result<Value, Exception> {
        self.call_stack.resolve(name).cloned().ok_or_else(|| {
            Exception::new(ExceptionKind::NameError, format!("{name} is not defined"), pos)
        })
    }

    fn assign(&mut self, node: &Node) -> Result<Value, Exception> {
        let [target, value] = node.children.as_slice() else {
            return Err(malformed(node, "assignment"));
        };
        if target.symbol != Symbol::Name {
            return Err(Exception::syntax("invalid assignment target", target.pos)
                .with_help("only plain names can be assigned to"));
        }
        let value = self.evaluate(value)?;
        self.call_stack.assign(&target.text, value.clone());
        Ok(value)
    }

    fn evaluate_if(&mut self, node: &Node) -> Result<Value, Exception> {
        let [condition, then_branch, rest @ ..] = node.children.as_slice() else {
            return Err(malformed(node, "if"));
        };
        if self.evaluate(condition)?.truthy() {
            self.evaluate(then_branch)
        } else if let Some(else_branch) = rest.first() {
            self.evaluate(else_branch)
        } else {
            Ok(Value::null())
        }
    }

    fn evaluate_while(&mut self, node: &Node) -> Result<Value, Exception> {
        let [condition, body] = node.children.as_slice() else {
            return Err(malformed(node, "while"));
        };
        let mut last = Value::null();
        while self.evaluate(condition)?.truthy() {
            last = self.evaluate(body)?;
            if self.call_stack.returning() {
                break;
            }
        }
        Ok(last)
    }

    fn define_function(&mut self, node: &Node) -> Result<Value, Exception> {
        let [name, parameters, body] = node.children.as_slice() else {
            return Err(malformed(node, "function definition"));
        };
        if name.symbol != Symbol::Name
            || parameters.symbol != Symbol::FunctionParameters
            || body.symbol != Symbol::Block
        {
            return Err(malformed(node, "function definition"));
        }
        let function = Value::function(Callable {
            name: name.text.clone(),
            arity: Arity::Fixed(parameters.children.len()),
            body: Body::UserDefined(Rc::new(node.clone())),
        });
        self.call_stack.assign(&name.text, function.clone());
        Ok(function)
    }

    fn call(&mut self, node: &Node) -> Result<Value, Exception> {
        let Some((callee, arguments)) = node.children.split_first() else {
            return Err(malformed(node, "invocation"));
        };
        let target = self.evaluate(callee)?;
        let callable = match &target.payload {
            Payload::Function(callable) => callable.clone(),
            Payload::Type(id) => self.types.constructor(*id).ok_or_else(|| {
                Exception::type_error(
                    format!("type {} cannot be constructed", self.types.name_of(*id)),
                    node.pos,
                )
            })?,
            _ => {
                return Err(Exception::type_error(
                    format!("{} is not callable", self.type_name(&target)),
                    callee.pos,
                ));
            }
        };
        let arguments = arguments
            .iter()
            .map(|argument| self.evaluate(argument))
            .collect::<Result<Vec<_>, _>>()?;
        self.invoke(&callable, arguments, node.pos)
    }

    /// Calls a builtin or user function after checking its arity.
    pub fn invoke(
        &mut self,
        callable: &Callable,
        arguments: Vec<Value>,
        pos: Position,
    ) -> Result<Value, Exception> {
        if let Arity::Fixed(expected) = callable.arity {
            if arguments.len() != expected {
                return Err(Exception::type_error(
                    format!(
                        "{} takes exactly {expected} arguments, found {}",
                        callable.name,
                        arguments.len()
                    ),
                    pos,
                ));
            }
        }

        match &callable.body {
            Body::Native(function) => function(self, &arguments, pos),
            Body::UserDefined(definition) => {
                let [_, parameters, body] = definition.children.as_slice() else {
                    return Err(malformed(definition, "function definition"));
                };
                if self.call_stack.depth() > MAX_CALL_DEPTH {
                    return Err(Exception::internal(
                        format!("maximum call depth exceeded in {}", callable.name),
                        pos,
                    ));
                }

                let mut frame = Frame::new(&callable.name);
                for (parameter, argument) in parameters.children.iter().zip(arguments) {
                    frame.bindings.insert(parameter.text.clone(), argument);
                }
                self.call_stack.push(frame);
                let result = stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || {
                    self.evaluate_statements(&body.children)
                });
                let frame = self.call_stack.pop();
                result?;
                Ok(frame
                    .and_then(|frame| frame.return_value)
                    .unwrap_or_else(Value::null))
            }
        }
    }

    fn access(&mut self, node: &Node) -> Result<Value, Exception> {
        let [receiver, member] = node.children.as_slice() else {
            return Err(malformed(node, "access"));
        };
        let receiver = self.evaluate(receiver)?;
        let (method, arguments) = match member.symbol {
            Symbol::Name => (member.text.as_str(), &[][..]),
            Symbol::FunctionInvocation => match member.children.split_first() {
                Some((name, arguments)) if name.symbol == Symbol::Name => {
                    (name.text.as_str(), arguments)
                }
                _ => return Err(Exception::syntax("invalid property access", member.pos)),
            },
            _ => return Err(Exception::syntax("invalid property access", member.pos)),
        };

        let mut values = Vec::with_capacity(arguments.len() + 1);
        values.push(receiver);
        for argument in arguments {
            values.push(self.evaluate(argument)?);
        }
        self.call_method(values, method, node.pos)
    }

    /// `arguments[0]` is the receiver.
    pub fn call_method(
        &mut self,
        arguments: Vec<Value>,
        method: &str,
        pos: Position,
    ) -> Result<Value, Exception> {
        let Some(receiver) = arguments.first() else {
            return Err(Exception::internal("method call without receiver", pos));
        };
        let Some(callable) = self.types.method(receiver.ty, method) else {
            return Err(Exception::new(
                ExceptionKind::MethodError,
                format!("{} has no method {method}", self.type_name(receiver)),
                pos,
            ));
        };
        self.invoke(&callable, arguments, pos)
    }

    fn evaluate_return(&mut self, node: &Node) -> Result<Value, Exception> {
        if self.call_stack.is_global() {
            return Err(Exception::syntax("return outside of a function", node.pos));
        }
        let value = match node.children.first() {
            Some(expression) => self.evaluate(expression)?,
            None => Value::null(),
        };
        self.call_stack.current_mut().return_value = Some(value.clone());
        Ok(value)
    }

    fn evaluate_and(&mut self, node: &Node) -> Result<Value, Exception> {
        let [left, right] = node.children.as_slice() else {
            return Err(malformed(node, "&&"));
        };
        let left = self.evaluate(left)?;
        if !left.truthy() {
            return Ok(left);
        }
        self.evaluate(right)
    }

    fn evaluate_or(&mut self, node: &Node) -> Result<Value, Exception> {
        let [left, right] = node.children.as_slice() else {
            return Err(malformed(node, "||"));
        };
        let left = self.evaluate(left)?;
        if left.truthy() {
            return Ok(left);
        }
        self.evaluate(right)
    }

    fn unary_operand(&mut self, node: &Node) -> Result<Value, Exception> {
        match node.children.as_slice() {
            [operand] => self.evaluate(operand),
            _ => Err(malformed(node, &node.text)),
        }
    }

    fn negate(&mut self, node: &Node) -> Result<Value, Exception> {
        let operand = self.unary_operand(node)?;
        match operand.payload {
            Payload::Int(i) => Ok(Value::int(i.wrapping_neg())),
            Payload::Float(f) => Ok(Value::float(-f)),
            _ => Err(Exception::type_error(
                format!("type {} does not support unary -", self.type_name(&operand)),
                node.pos,
            )),
        }
    }

    /// Left operand first, then right.
    fn operands(&mut self, node: &Node) -> Result<(Value, Value), Exception> {
        let [left, right] = node.children.as_slice() else {
            return Err(malformed(node, &node.text));
        };
        let left = self.evaluate(left)?;
        let right = self.evaluate(right)?;
        Ok((left, right))
    }

    fn compare(
        &self,
        operator: &str,
        left: &Value,
        right: &Value,
        pos: Position,
    ) -> Result<bool, Exception> {
        let ordering = match (&left.payload, &right.payload) {
            (Payload::Int(a), Payload::Int(b)) => a.partial_cmp(b),
            (Payload::Float(a), Payload::Float(b)) => a.partial_cmp(b),
            (Payload::Str(a), Payload::Str(b)) => a.partial_cmp(b),
            _ if left.ty == right.ty => {
                return Err(Exception::type_error(
                    format!("type {} cannot be compared with {operator}", self.type_name(left)),
                    pos,
                ));
            }
            _ => {
                return Err(Exception::type_error(
                    format!(
                        "attempted to compare incomparable types {} and {} with {operator}",
                        self.type_name(left),
                        self.type_name(right)
                    ),
                    pos,
                ));
            }
        };
        Ok(match operator {
            "<" => ordering.is_some_and(|o| o.is_lt()),
            _ => ordering.is_some_and(|o| o.is_gt()),
        })
    }

    fn arithmetic(
        &self,
        operator: &str,
        left: Value,
        right: Value,
        pos: Position,
    ) -> Result<Value, Exception> {
        use Payload::{Float, Int, Str};

        let divide_by_zero = |kind: &str| {
            let operation = if operator == "/" { "division" } else { "modulo" };
            Exception::new(
                ExceptionKind::DivideByZeroError,
                format!("{kind} {operation} by zero"),
                pos,
            )
        };

        Ok(match (operator, &left.payload, &right.payload) {
            ("+", Int(a), Int(b)) => Value::int(a.wrapping_add(*b)),
            ("-", Int(a), Int(b)) => Value::int(a.wrapping_sub(*b)),
            ("*", Int(a), Int(b)) => Value::int(a.wrapping_mul(*b)),
            ("/" | "%", Int(_), Int(0)) => return Err(divide_by_zero("integer")),
            ("/", Int(a), Int(b)) => Value::int(a.wrapping_div(*b)),
            ("%", Int(a), Int(b)) => Value::int(a.wrapping_rem(*b)),

            ("/" | "%", Float(_), Float(b)) if *b == 0.0 => return Err(divide_by_zero("float")),
            ("+", Float(a), Float(b)) => Value::float(a + b),
            ("-", Float(a), Float(b)) => Value::float(a - b),
            ("*", Float(a), Float(b)) => Value::float(a * b),
            ("/", Float(a), Float(b)) => Value::float(a / b),
            ("%", Float(a), Float(b)) => Value::float(a % b),

            ("+", Str(a), Str(b)) => Value::string(format!("{a}{b}")),

            _ if left.ty == right.ty => {
                return Err(Exception::type_error(
                    format!("type {} does not support operator {operator}", self.type_name(&left)),
                    pos,
                ));
            }
            _ => {
                return Err(Exception::type_error(
                    format!(
                        "incompatible types {} and {} with operator {operator}",
                        self.type_name(&left),
                        self.type_name(&right)
                    ),
                    pos,
                ));
            }
        })
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

fn unrecognized(node: &Node) -> Exception {
    Exception::syntax(format!("unrecognized symbol {}", node.symbol), node.pos)
}

fn malformed(node: &Node, what: &str) -> Exception {
    Exception::internal(format!("malformed {what} node"), node.pos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::LanguageSpecification;
    use crate::parse::Parser;
    use crate::unsweeten::{SimpleUnsweetener, Unsweeten};

    fn run(source: &str) -> Result<Value, Exception> {
        let spec = LanguageSpecification::becca();
        let trees = Parser::new(source.as_bytes(), &spec).statements()?;
        let trees = SimpleUnsweetener::becca().unsweeten_all(trees)?;
        Interpreter::with_output(Box::new(std::io::sink())).execute(&trees)
    }

    fn int(source: &str) -> i64 {
        match run(source).unwrap().payload {
            Payload::Int(i) => i,
            other => panic!("expected int, got {other:?}"),
        }
    }

    fn boolean(source: &str) -> bool {
        match run(source).unwrap().payload {
            Payload::Bool(b) => b,
            other => panic!("expected bool, got {other:?}"),
        }
    }

    fn kind(source: &str) -> ExceptionKind {
        run(source).unwrap_err().kind
    }

    #[test]
    fn arithmetic_follows_precedence() {
        assert_eq!(int("1 + 2 * 3;"), 7);
        assert_eq!(int("(1 + 2) * 3;"), 9);
        assert_eq!(int("10 - 3 - 2;"), 5);
        assert_eq!(int("5 / 2;"), 2);
        assert_eq!(int("-7 % 3;"), -1);
        assert_eq!(int("9223372036854775807 + 1;"), i64::MIN);
    }

    #[test]
    fn division_by_zero_points_at_the_operator() {
        let err = run("x = 5 / 0;").unwrap_err();
        assert_eq!(err.kind, ExceptionKind::DivideByZeroError);
        assert_eq!((err.line(), err.col()), (1, 7));
        assert_eq!(kind("5 % 0;"), ExceptionKind::DivideByZeroError);
        assert_eq!(kind("5.0 / 0.0;"), ExceptionKind::DivideByZeroError);
    }

    #[test]
    fn mixed_operands_are_type_errors() {
        assert_eq!(kind("1 + 'a';"), ExceptionKind::TypeError);
        assert_eq!(kind("1 + 1.0;"), ExceptionKind::TypeError);
        assert_eq!(kind("'a' - 'b';"), ExceptionKind::TypeError);
        assert_eq!(kind("1 < 'a';"), ExceptionKind::TypeError);
        assert_eq!(kind("true < false;"), ExceptionKind::TypeError);
        assert_eq!(kind("-'a';"), ExceptionKind::TypeError);
    }

    #[test]
    fn equality_and_ordering() {
        assert!(!boolean("1 == 1.0;"));
        assert!(boolean("1 != 1.0;"));
        assert!(boolean("'ab' == 'ab';"));
        assert!(boolean("2 <= 2;"));
        assert!(boolean("'a' < 'b';"));
        assert!(!boolean("3 >= 4;"));
        assert!(boolean("null == null;"));
    }

    #[test]
    fn logical_operators_short_circuit() {
        assert_eq!(int("0 && undefined;"), 0);
        assert_eq!(int("3 || undefined;"), 3);
        assert_eq!(int("1 && 4;"), 4);
        assert!(!boolean("!1;"));
    }

    #[test]
    fn function_scopes_do_not_leak() {
        assert_eq!(kind("def f() { y = 1; } f(); y;"), ExceptionKind::NameError);
        assert_eq!(int("x = 1; def f() { x = 2; return x; } f() * 10 + x;"), 21);
        assert_eq!(int("x = 4; def f() { return x; } f();"), 4);
    }

    #[test]
    fn return_stops_the_function_only() {
        assert_eq!(
            int("def f(n) { while true { if n > 2 { return n; } n = n + 1; } } f(0);"),
            3
        );
        assert!(matches!(run("def f() { return; } f();").unwrap().payload, Payload::Null));
        assert!(matches!(run("def f() { 1; } f();").unwrap().payload, Payload::Null));
        assert_eq!(kind("return 1;"), ExceptionKind::SyntaxError);
    }

    #[test]
    fn recursion() {
        assert_eq!(
            int("def fib(n) { if n < 2 { return n; } return fib(n - 1) + fib(n - 2); } fib(15);"),
            610
        );
    }

    #[test]
    fn arity_is_checked() {
        let err = run("def add(a, b) { return a + b; } add(1);").unwrap_err();
        assert_eq!(err.kind, ExceptionKind::TypeError);
        assert_eq!(err.message, "add takes exactly 2 arguments, found 1");
    }

    #[test]
    fn calling_a_non_function_is_a_type_error() {
        assert_eq!(kind("x = 1; x();"), ExceptionKind::TypeError);
        assert_eq!(kind("undefined();"), ExceptionKind::NameError);
    }

    #[test]
    fn invalid_assignment_target() {
        assert_eq!(kind("1 = 2;"), ExceptionKind::SyntaxError);
    }

    #[test]
    fn deep_recursion_succeeds() {
        let sum = "def sum(n) { if n == 0 { return 0; } return n + sum(n - 1); }";
        assert_eq!(int(&format!("{sum} sum(127);")), 8128);
        assert_eq!(int(&format!("{sum} sum(800);")), 320_400);
    }

    #[test]
    fn runaway_recursion_is_stopped() {
        let err = run("def f() { return f(); } f();").unwrap_err();
        assert_eq!(err.kind, ExceptionKind::InternalError);
        assert_eq!(err.message, "maximum call depth exceeded in f");
    }

    #[test]
    fn for_in_runs_once_per_element() {
        assert_eq!(int("n = 0; for c in 'hello' { n = n + 1; } n;"), 5);
        assert_eq!(int("n = 0; for x in array(1, 2, 3) { n = n + x; } n;"), 6);
        assert_eq!(int("n = 0; for c in '' { n = n + 1; } n;"), 0);
    }
}
