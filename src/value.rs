//! Runtime values and the registry of types they belong to.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::rc::Rc;

use crate::error::{Exception, Position};
use crate::eval::Interpreter;
use crate::parse::Node;
use crate::{STACK_GROW_SIZE, STACK_RED_ZONE};

/// Host function backing a builtin. Methods receive their receiver as the
/// first argument.
pub type NativeFn = fn(&mut Interpreter, &[Value], Position) -> Result<Value, Exception>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Fixed(usize),
    Variadic,
}

#[derive(Clone)]
pub enum Body {
    Native(NativeFn),
    /// The whole `FunctionDefinition` node: name, parameters and block.
    UserDefined(Rc<Node>),
}

#[derive(Clone)]
pub struct Callable {
    pub name: String,
    pub arity: Arity,
    pub body: Body,
}

impl Callable {
    pub fn native(name: &str, arity: Arity, function: NativeFn) -> Self {
        Callable {
            name: name.to_string(),
            arity,
            body: Body::Native(function),
        }
    }
}

impl Debug for Callable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let body = match self.body {
            Body::Native(_) => "native",
            Body::UserDefined(_) => "user-defined",
        };
        f.debug_struct("Callable")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("body", &body)
            .finish()
    }
}

/// Index into the [`TypeRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeId(usize);

impl TypeId {
    pub const TYPE: TypeId = TypeId(0);
    pub const STRING: TypeId = TypeId(1);
    pub const INT: TypeId = TypeId(2);
    pub const FLOAT: TypeId = TypeId(3);
    pub const BOOL: TypeId = TypeId(4);
    pub const NULL: TypeId = TypeId(5);
    pub const FUNCTION: TypeId = TypeId(6);
    pub const ARRAY: TypeId = TypeId(7);
    pub const STRING_ITERATOR: TypeId = TypeId(8);
    pub const ARRAY_ITERATOR: TypeId = TypeId(9);

    pub fn index(self) -> usize {
        self.0
    }
}

/// Traversal state shared by every copy of an iterator value.
#[derive(Debug)]
pub enum Cursor {
    Chars { chars: Vec<char>, index: usize },
    Items { items: Rc<RefCell<Vec<Value>>>, index: usize },
}

impl Cursor {
    pub fn has_next(&self) -> bool {
        match self {
            Cursor::Chars { chars, index } => *index < chars.len(),
            Cursor::Items { items, index } => *index < items.borrow().len(),
        }
    }

    /// Hands out the current element and moves past it, or `None` at the end.
    pub fn advance(&mut self) -> Option<Value> {
        let next = match self {
            Cursor::Chars { chars, index } => chars.get(*index).map(|c| Value::string(c.to_string())),
            Cursor::Items { items, index } => items.borrow().get(*index).cloned(),
        };
        if next.is_some() {
            match self {
                Cursor::Chars { index, .. } | Cursor::Items { index, .. } => *index += 1,
            }
        }
        next
    }
}

#[derive(Debug, Clone)]
pub enum Payload {
    Str(Rc<str>),
    Int(i64),
    Float(f64),
    Bool(bool),
    Null,
    Function(Rc<Callable>),
    Array(Rc<RefCell<Vec<Value>>>),
    Type(TypeId),
    Iterator(Rc<RefCell<Cursor>>),
}

/// A runtime value: the type it belongs to plus its data.
#[derive(Debug, Clone)]
pub struct Value {
    pub ty: TypeId,
    pub payload: Payload,
}

impl Value {
    pub fn string(s: impl Into<Rc<str>>) -> Self {
        Value {
            ty: TypeId::STRING,
            payload: Payload::Str(s.into()),
        }
    }

    pub fn int(i: i64) -> Self {
        Value {
            ty: TypeId::INT,
            payload: Payload::Int(i),
        }
    }

    pub fn float(f: f64) -> Self {
        Value {
            ty: TypeId::FLOAT,
            payload: Payload::Float(f),
        }
    }

    pub fn bool(b: bool) -> Self {
        Value {
            ty: TypeId::BOOL,
            payload: Payload::Bool(b),
        }
    }

    pub fn null() -> Self {
        Value {
            ty: TypeId::NULL,
            payload: Payload::Null,
        }
    }

    pub fn function(callable: Callable) -> Self {
        Value {
            ty: TypeId::FUNCTION,
            payload: Payload::Function(Rc::new(callable)),
        }
    }

    pub fn array(items: Vec<Value>) -> Self {
        Value {
            ty: TypeId::ARRAY,
            payload: Payload::Array(Rc::new(RefCell::new(items))),
        }
    }

    pub fn type_value(id: TypeId) -> Self {
        Value {
            ty: TypeId::TYPE,
            payload: Payload::Type(id),
        }
    }

    pub fn iterator(ty: TypeId, cursor: Cursor) -> Self {
        Value {
            ty,
            payload: Payload::Iterator(Rc::new(RefCell::new(cursor))),
        }
    }

    /// Language-level equality. Values of different types are never equal;
    /// arrays and iterators compare by identity.
    pub fn equals(&self, other: &Value) -> bool {
        if self.ty != other.ty {
            return false;
        }
        match (&self.payload, &other.payload) {
            (Payload::Str(a), Payload::Str(b)) => a == b,
            (Payload::Int(a), Payload::Int(b)) => a == b,
            (Payload::Float(a), Payload::Float(b)) => a == b,
            (Payload::Bool(a), Payload::Bool(b)) => a == b,
            (Payload::Null, Payload::Null) => true,
            (Payload::Function(a), Payload::Function(b)) => a.name == b.name,
            (Payload::Type(a), Payload::Type(b)) => a == b,
            (Payload::Array(a), Payload::Array(b)) => Rc::ptr_eq(a, b),
            (Payload::Iterator(a), Payload::Iterator(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn truthy(&self) -> bool {
        match &self.payload {
            Payload::Str(s) => !s.is_empty(),
            Payload::Int(i) => *i != 0,
            Payload::Float(f) => *f != 0.0,
            Payload::Bool(b) => *b,
            Payload::Null => false,
            Payload::Array(items) => !items.borrow().is_empty(),
            Payload::Function(_) | Payload::Type(_) | Payload::Iterator(_) => true,
        }
    }
}

#[derive(Debug)]
pub struct TypeDescriptor {
    pub name: String,
    /// The type of this type value, always `type` itself.
    pub ty: TypeId,
    pub constructor: Option<Rc<Callable>>,
    pub methods: HashMap<String, Rc<Callable>>,
}

/// Arena of every type known to an interpreter. Index 0 is `type`, whose own
/// type is itself.
#[derive(Debug)]
pub struct TypeRegistry {
    types: Vec<TypeDescriptor>,
    by_name: HashMap<String, TypeId>,
}

impl TypeRegistry {
    pub fn bootstrap(type_constructor: Callable) -> Self {
        let mut registry = TypeRegistry {
            types: Vec::new(),
            by_name: HashMap::new(),
        };
        registry.define("type", Some(type_constructor));
        registry
    }

    pub fn define(&mut self, name: &str, constructor: Option<Callable>) -> TypeId {
        let id = TypeId(self.types.len());
        self.types.push(TypeDescriptor {
            name: name.to_string(),
            ty: TypeId::TYPE,
            constructor: constructor.map(Rc::new),
            methods: HashMap::new(),
        });
        self.by_name.insert(name.to_string(), id);
        id
    }

    /// Methods count their receiver in `arity`.
    pub fn define_method(&mut self, ty: TypeId, name: &str, arity: Arity, function: NativeFn) {
        if let Some(descriptor) = self.types.get_mut(ty.0) {
            descriptor
                .methods
                .insert(name.to_string(), Rc::new(Callable::native(name, arity, function)));
        }
    }

    pub fn get(&self, id: TypeId) -> Option<&TypeDescriptor> {
        self.types.get(id.0)
    }

    pub fn lookup(&self, name: &str) -> Option<TypeId> {
        self.by_name.get(name).copied()
    }

    pub fn ids(&self) -> impl Iterator<Item = TypeId> + '_ {
        (0..self.types.len()).map(TypeId)
    }

    pub fn name_of(&self, id: TypeId) -> &str {
        self.get(id).map_or("<unknown type>", |t| t.name.as_str())
    }

    pub fn method(&self, ty: TypeId, name: &str) -> Option<Rc<Callable>> {
        self.get(ty).and_then(|t| t.methods.get(name)).cloned()
    }

    pub fn constructor(&self, ty: TypeId) -> Option<Rc<Callable>> {
        self.get(ty).and_then(|t| t.constructor.clone())
    }

    /// The text `print` and `string(...)` produce for a value.
    pub fn render(&self, value: &Value) -> String {
        self.render_within(value, &mut HashSet::new())
    }

    /// `open` holds the arrays currently being rendered; meeting one again
    /// prints `[...]`.
    fn render_within(
        &self,
        value: &Value,
        open: &mut HashSet<*const RefCell<Vec<Value>>>,
    ) -> String {
        match &value.payload {
            Payload::Str(s) => s.to_string(),
            Payload::Int(i) => i.to_string(),
            Payload::Float(f) => f.to_string(),
            Payload::Bool(b) => b.to_string(),
            Payload::Null => "<null>".to_string(),
            Payload::Function(callable) => callable.name.clone(),
            Payload::Type(id) => self.name_of(*id).to_string(),
            Payload::Array(items) => {
                if !open.insert(Rc::as_ptr(items)) {
                    return "[...]".to_string();
                }
                let rendered: Vec<_> = items
                    .borrow()
                    .iter()
                    .map(|item| match &item.payload {
                        Payload::Str(s) => format!("{s:?}"),
                        _ => stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || {
                            self.render_within(item, open)
                        }),
                    })
                    .collect();
                open.remove(&Rc::as_ptr(items));
                format!("[{}]", rendered.join(", "))
            }
            Payload::Iterator(_) => format!("<{}>", self.name_of(value.ty)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nothing(_: &mut Interpreter, _: &[Value], _: Position) -> Result<Value, Exception> {
        Ok(Value::null())
    }

    #[test]
    fn type_is_its_own_type() {
        let registry = TypeRegistry::bootstrap(Callable::native("type", Arity::Fixed(1), nothing));
        let descriptor = registry.get(TypeId::TYPE).unwrap();
        assert_eq!(descriptor.name, "type");
        assert_eq!(descriptor.ty, TypeId::TYPE);
        assert_eq!(registry.lookup("type"), Some(TypeId::TYPE));
    }

    #[test]
    fn equality_requires_matching_types() {
        assert!(Value::int(1).equals(&Value::int(1)));
        assert!(!Value::int(1).equals(&Value::float(1.0)));
        assert!(!Value::string("1").equals(&Value::int(1)));
        assert!(Value::null().equals(&Value::null()));
    }

    #[test]
    fn arrays_compare_by_identity() {
        let a = Value::array(vec![Value::int(1)]);
        let b = Value::array(vec![Value::int(1)]);
        assert!(a.equals(&a.clone()));
        assert!(!a.equals(&b));
    }

    #[test]
    fn self_containing_array_renders_once() {
        let registry = TypeRegistry::bootstrap(Callable::native("type", Arity::Fixed(1), nothing));
        let a = Value::array(vec![Value::int(1)]);
        let Payload::Array(items) = &a.payload else {
            unreachable!()
        };
        items.borrow_mut().push(a.clone());
        assert_eq!(registry.render(&a), "[1, [...]]");

        let shared = Value::array(vec![Value::int(2)]);
        let pair = Value::array(vec![shared.clone(), shared]);
        assert_eq!(registry.render(&pair), "[[2], [2]]");
    }

    #[test]
    fn truthiness() {
        assert!(!Value::string("").truthy());
        assert!(Value::string("x").truthy());
        assert!(!Value::int(0).truthy());
        assert!(!Value::float(0.0).truthy());
        assert!(!Value::null().truthy());
        assert!(!Value::array(vec![]).truthy());
        assert!(Value::type_value(TypeId::INT).truthy());
    }

    #[test]
    fn cursor_walks_chars_once() {
        let mut cursor = Cursor::Chars {
            chars: "ab".chars().collect(),
            index: 0,
        };
        assert_eq!(cursor.advance().map(|v| v.truthy()), Some(true));
        assert!(cursor.has_next());
        assert!(cursor.advance().is_some());
        assert!(!cursor.has_next());
        assert!(cursor.advance().is_none());
    }
}
