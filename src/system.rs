//! Builtin types, their constructors and methods, and the global functions.

use crate::error::{Exception, ExceptionKind, Position};
use crate::eval::Interpreter;
use crate::lex::parse_int;
use crate::value::{Arity, Callable, Cursor, NativeFn, Payload, TypeId, TypeRegistry, Value};

/// Registers the builtin types in `TypeId` order along with their methods.
pub fn registry() -> TypeRegistry {
    let mut types = TypeRegistry::bootstrap(Callable::native("type", Arity::Fixed(1), type_of));

    let builtins: [(&str, Arity, NativeFn); 9] = [
        ("string", Arity::Fixed(1), construct_string),
        ("int", Arity::Fixed(1), construct_int),
        ("float", Arity::Fixed(1), construct_float),
        ("bool", Arity::Fixed(1), construct_bool),
        ("null", Arity::Fixed(0), construct_null),
        ("function", Arity::Variadic, construct_function),
        ("array", Arity::Variadic, construct_array),
        ("stringIterator", Arity::Fixed(1), construct_string_iterator),
        ("arrayIterator", Arity::Fixed(1), construct_array_iterator),
    ];
    for (name, arity, constructor) in builtins {
        types.define(name, Some(Callable::native(name, arity, constructor)));
    }

    types.define_method(TypeId::STRING, "length", Arity::Fixed(1), string_length);
    types.define_method(TypeId::STRING, "toUpperCase", Arity::Fixed(1), string_to_upper_case);
    types.define_method(TypeId::STRING, "toLowerCase", Arity::Fixed(1), string_to_lower_case);
    types.define_method(TypeId::STRING, "replace", Arity::Fixed(3), string_replace);
    types.define_method(TypeId::STRING, "iterator", Arity::Fixed(1), construct_string_iterator);

    types.define_method(TypeId::ARRAY, "length", Arity::Fixed(1), array_length);
    types.define_method(TypeId::ARRAY, "append", Arity::Variadic, array_append);
    types.define_method(TypeId::ARRAY, "getItem", Arity::Fixed(2), array_get_item);
    types.define_method(TypeId::ARRAY, "iterator", Arity::Fixed(1), construct_array_iterator);

    for iterator in [TypeId::STRING_ITERATOR, TypeId::ARRAY_ITERATOR] {
        types.define_method(iterator, "hasNext", Arity::Fixed(1), iterator_has_next);
        types.define_method(iterator, "getNext", Arity::Fixed(1), iterator_get_next);
    }

    types
}

/// Binds every type under its name plus `print` and `assert` in the global
/// frame.
pub fn install_globals(interpreter: &mut Interpreter) {
    let types: Vec<_> = interpreter
        .types
        .ids()
        .map(|id| (interpreter.types.name_of(id).to_string(), id))
        .collect();
    for (name, id) in types {
        interpreter.define_global(&name, Value::type_value(id));
    }
    for function in [
        Callable::native("print", Arity::Variadic, print),
        Callable::native("assert", Arity::Fixed(1), assert),
    ] {
        interpreter.define_global(&function.name.clone(), Value::function(function));
    }
}

pub fn print(
    interpreter: &mut Interpreter,
    arguments: &[Value],
    pos: Position,
) -> Result<Value, Exception> {
    let line = arguments
        .iter()
        .map(|value| interpreter.render(value))
        .collect::<Vec<_>>()
        .join(" ");
    writeln!(interpreter.output(), "{line}")
        .and_then(|()| interpreter.output().flush())
        .map_err(|e| Exception::new(ExceptionKind::IOError, format!("print failed: {e}"), pos))?;
    Ok(Value::null())
}

pub fn assert(_: &mut Interpreter, arguments: &[Value], pos: Position) -> Result<Value, Exception> {
    match arguments {
        [condition] if condition.truthy() => Ok(Value::null()),
        _ => Err(Exception::new(ExceptionKind::AssertionError, "assertion failed", pos)),
    }
}

fn type_of(_: &mut Interpreter, arguments: &[Value], pos: Position) -> Result<Value, Exception> {
    let value = single(arguments, pos)?;
    Ok(Value::type_value(value.ty))
}

fn construct_string(
    interpreter: &mut Interpreter,
    arguments: &[Value],
    pos: Position,
) -> Result<Value, Exception> {
    let value = single(arguments, pos)?;
    Ok(Value::string(interpreter.render(value)))
}

fn construct_int(
    interpreter: &mut Interpreter,
    arguments: &[Value],
    pos: Position,
) -> Result<Value, Exception> {
    let value = single(arguments, pos)?;
    match &value.payload {
        Payload::Int(i) => Ok(Value::int(*i)),
        Payload::Float(f) if f.is_finite() => Ok(Value::int(f.trunc() as i64)),
        Payload::Str(s) => parse_int(s.trim())
            .map(Value::int)
            .ok_or_else(|| Exception::argument(format!("cannot parse {s:?} as int"), pos)),
        Payload::Float(f) => Err(Exception::argument(format!("cannot convert {f} to int"), pos)),
        _ => Err(Exception::type_error(
            format!("cannot convert {} to int", interpreter.type_name(value)),
            pos,
        )),
    }
}

fn construct_float(
    interpreter: &mut Interpreter,
    arguments: &[Value],
    pos: Position,
) -> Result<Value, Exception> {
    let value = single(arguments, pos)?;
    match &value.payload {
        Payload::Float(f) => Ok(Value::float(*f)),
        Payload::Int(i) => Ok(Value::float(*i as f64)),
        Payload::Str(s) => s
            .trim()
            .parse::<f64>()
            .map(Value::float)
            .map_err(|_| Exception::argument(format!("cannot parse {s:?} as float"), pos)),
        _ => Err(Exception::type_error(
            format!("cannot convert {} to float", interpreter.type_name(value)),
            pos,
        )),
    }
}

fn construct_bool(_: &mut Interpreter, arguments: &[Value], pos: Position) -> Result<Value, Exception> {
    let value = single(arguments, pos)?;
    Ok(Value::bool(value.truthy()))
}

fn construct_null(_: &mut Interpreter, _: &[Value], _: Position) -> Result<Value, Exception> {
    Ok(Value::null())
}

fn construct_function(_: &mut Interpreter, _: &[Value], pos: Position) -> Result<Value, Exception> {
    Err(Exception::type_error("functions are created with def", pos))
}

fn construct_array(_: &mut Interpreter, arguments: &[Value], _: Position) -> Result<Value, Exception> {
    Ok(Value::array(arguments.to_vec()))
}

fn construct_string_iterator(
    interpreter: &mut Interpreter,
    arguments: &[Value],
    pos: Position,
) -> Result<Value, Exception> {
    let value = single(arguments, pos)?;
    let Payload::Str(s) = &value.payload else {
        return Err(Exception::argument(
            format!("cannot iterate over {} as a string", interpreter.type_name(value)),
            pos,
        ));
    };
    let cursor = Cursor::Chars {
        chars: s.chars().collect(),
        index: 0,
    };
    Ok(Value::iterator(TypeId::STRING_ITERATOR, cursor))
}

fn construct_array_iterator(
    interpreter: &mut Interpreter,
    arguments: &[Value],
    pos: Position,
) -> Result<Value, Exception> {
    let value = single(arguments, pos)?;
    let Payload::Array(items) = &value.payload else {
        return Err(Exception::argument(
            format!("cannot iterate over {} as an array", interpreter.type_name(value)),
            pos,
        ));
    };
    let cursor = Cursor::Items {
        items: items.clone(),
        index: 0,
    };
    Ok(Value::iterator(TypeId::ARRAY_ITERATOR, cursor))
}

fn string_length(_: &mut Interpreter, arguments: &[Value], pos: Position) -> Result<Value, Exception> {
    let s = receiver_str(arguments, pos)?;
    Ok(Value::int(s.chars().count() as i64))
}

fn string_to_upper_case(
    _: &mut Interpreter,
    arguments: &[Value],
    pos: Position,
) -> Result<Value, Exception> {
    let s = receiver_str(arguments, pos)?;
    Ok(Value::string(s.to_uppercase()))
}

fn string_to_lower_case(
    _: &mut Interpreter,
    arguments: &[Value],
    pos: Position,
) -> Result<Value, Exception> {
    let s = receiver_str(arguments, pos)?;
    Ok(Value::string(s.to_lowercase()))
}

fn string_replace(
    interpreter: &mut Interpreter,
    arguments: &[Value],
    pos: Position,
) -> Result<Value, Exception> {
    let s = receiver_str(arguments, pos)?;
    let (Payload::Str(from), Payload::Str(to)) = (&arguments[1].payload, &arguments[2].payload) else {
        return Err(Exception::argument(
            format!(
                "replace expects two strings, found {} and {}",
                interpreter.type_name(&arguments[1]),
                interpreter.type_name(&arguments[2])
            ),
            pos,
        ));
    };
    Ok(Value::string(s.replace(from.as_ref(), to)))
}

fn array_length(_: &mut Interpreter, arguments: &[Value], pos: Position) -> Result<Value, Exception> {
    let items = receiver_array(arguments, pos)?;
    Ok(Value::int(items.borrow().len() as i64))
}

/// Appends every argument after the receiver; returns the array itself.
fn array_append(_: &mut Interpreter, arguments: &[Value], pos: Position) -> Result<Value, Exception> {
    let items = receiver_array(arguments, pos)?;
    items.borrow_mut().extend(arguments[1..].iter().cloned());
    Ok(arguments[0].clone())
}

fn array_get_item(
    interpreter: &mut Interpreter,
    arguments: &[Value],
    pos: Position,
) -> Result<Value, Exception> {
    let items = receiver_array(arguments, pos)?;
    let Payload::Int(index) = arguments[1].payload else {
        return Err(Exception::argument(
            format!("array index must be an int, found {}", interpreter.type_name(&arguments[1])),
            pos,
        ));
    };
    let items = items.borrow();
    usize::try_from(index)
        .ok()
        .and_then(|i| items.get(i))
        .cloned()
        .ok_or_else(|| {
            Exception::new(
                ExceptionKind::IndexError,
                format!("index {index} out of range for array of length {}", items.len()),
                pos,
            )
        })
}

fn iterator_has_next(_: &mut Interpreter, arguments: &[Value], pos: Position) -> Result<Value, Exception> {
    let Some(Payload::Iterator(cursor)) = arguments.first().map(|v| &v.payload) else {
        return Err(Exception::internal("hasNext called on a non-iterator", pos));
    };
    Ok(Value::bool(cursor.borrow().has_next()))
}

fn iterator_get_next(_: &mut Interpreter, arguments: &[Value], pos: Position) -> Result<Value, Exception> {
    let Some(Payload::Iterator(cursor)) = arguments.first().map(|v| &v.payload) else {
        return Err(Exception::internal("getNext called on a non-iterator", pos));
    };
    cursor.borrow_mut().advance().ok_or_else(|| {
        Exception::new(
            ExceptionKind::IterationError,
            "iterator has no more elements",
            pos,
        )
    })
}

fn single(arguments: &[Value], pos: Position) -> Result<&Value, Exception> {
    match arguments {
        [value] => Ok(value),
        _ => Err(Exception::type_error(
            format!("expected exactly 1 argument, found {}", arguments.len()),
            pos,
        )),
    }
}

fn receiver_str(arguments: &[Value], pos: Position) -> Result<&str, Exception> {
    match arguments.first().map(|v| &v.payload) {
        Some(Payload::Str(s)) => Ok(&**s),
        _ => Err(Exception::internal("string method called on a non-string", pos)),
    }
}

fn receiver_array(
    arguments: &[Value],
    pos: Position,
) -> Result<&std::rc::Rc<std::cell::RefCell<Vec<Value>>>, Exception> {
    match arguments.first().map(|v| &v.payload) {
        Some(Payload::Array(items)) => Ok(items),
        _ => Err(Exception::internal("array method called on a non-array", pos)),
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::io::Write;
    use std::rc::Rc;

    use super::*;
    use crate::Engine;

    #[derive(Clone, Default)]
    struct Capture(Rc<RefCell<Vec<u8>>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn output(source: &str) -> String {
        let capture = Capture::default();
        let mut engine = Engine::with_output(Box::new(capture.clone()));
        engine.execute(source.as_bytes()).unwrap();
        let bytes = capture.0.borrow().clone();
        String::from_utf8(bytes).unwrap()
    }

    fn error(source: &str) -> ExceptionKind {
        Engine::with_output(Box::new(std::io::sink()))
            .execute(source.as_bytes())
            .unwrap_err()
            .kind
    }

    #[test]
    fn print_joins_with_spaces() {
        assert_eq!(output("print(1, 'a', null, true, 2.5);"), "1 a <null> true 2.5\n");
        assert_eq!(output("print();"), "\n");
    }

    #[test]
    fn type_values() {
        assert_eq!(output("print(type(1), type(type), type(type(1)));"), "int type type\n");
        assert_eq!(output("print(type(1) == int, type('') == int);"), "true false\n");
    }

    #[test]
    fn conversions() {
        assert_eq!(output("print(int('42') + 1, int(' -0x10 '), int(2.9));"), "43 -16 2\n");
        assert_eq!(output("print(float(2), float('1.5'));"), "2 1.5\n");
        assert_eq!(output("print(string(12) + '!', bool(''), bool('x'));"), "12! false true\n");
        assert_eq!(error("int('nope');"), ExceptionKind::ArgumentError);
        assert_eq!(error("int(null);"), ExceptionKind::TypeError);
        assert_eq!(error("function();"), ExceptionKind::TypeError);
    }

    #[test]
    fn string_methods() {
        assert_eq!(
            output("s = 'Hello'; print(s.length(), s.toUpperCase(), s.toLowerCase(), s.replace('l', 'L'));"),
            "5 HELLO hello HeLLo\n"
        );
        assert_eq!(error("'a'.nope();"), ExceptionKind::MethodError);
        assert_eq!(error("'a'.length(1);"), ExceptionKind::TypeError);
    }

    #[test]
    fn array_methods() {
        assert_eq!(
            output("a = array(1); a.append(2, 3); print(a.length(), a.getItem(2), a);"),
            "3 3 [1, 2, 3]\n"
        );
        assert_eq!(error("array().getItem(0);"), ExceptionKind::IndexError);
        assert_eq!(error("array(1).getItem(-1);"), ExceptionKind::IndexError);
        assert_eq!(error("array(1).getItem('0');"), ExceptionKind::ArgumentError);
    }

    #[test]
    fn iterators_share_state_and_end() {
        assert_eq!(
            output("i = 'ab'.iterator(); j = i; print(i.getNext(), j.getNext(), i.hasNext());"),
            "a b false\n"
        );
        assert_eq!(error("i = stringIterator(''); i.getNext();"), ExceptionKind::IterationError);
        assert_eq!(error("stringIterator(1);"), ExceptionKind::ArgumentError);
    }

    #[test]
    fn assert_raises_on_falsy() {
        assert_eq!(output("assert(1 < 2);"), "");
        assert_eq!(error("assert(0);"), ExceptionKind::AssertionError);
    }
}
