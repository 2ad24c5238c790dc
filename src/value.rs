use std::fmt;
use std::rc::Rc;

use crate::environment::{FrameId, FramePin};
use crate::error::RuntimeError;
use crate::interpreter::Interpreter;
use crate::stmt::FunctionDecl;
use crate::token::Token;

/// Anything that can appear in callee position.
pub trait Callable: fmt::Debug + fmt::Display {
    fn arity(&self) -> usize;

    /// Invoke with already‑evaluated arguments. `paren` locates errors.
    fn call(
        &self,
        interpreter: &mut Interpreter,
        paren: &Token,
        arguments: Vec<Value>,
    ) -> Result<Value, RuntimeError>;

    /// Frame this callable closed over, if any. Keeps the frame alive.
    fn closure(&self) -> Option<FrameId> {
        None
    }
}

/// A runtime value.
#[derive(Debug, Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Number(f64),
    String(String),
    Callable(Rc<dyn Callable>),
}

impl Value {
    /// Only `nil` and `false` are falsy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    pub fn as_callable(&self) -> Option<&Rc<dyn Callable>> {
        match self {
            Value::Callable(c) => Some(c),
            _ => None,
        }
    }
}

/// Language equality: no coercion across types, `nil` equals only `nil`,
/// callables compare by identity, and NaN equals NaN.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Callable(a), Value::Callable(b)) => {
                std::ptr::eq(Rc::as_ptr(a) as *const (), Rc::as_ptr(b) as *const ())
            }
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),

            Value::Bool(b) => write!(f, "{}", b),

            Value::Number(n) => f.write_str(&format_number(*n)),

            Value::String(s) => write!(f, "{}", s),

            Value::Callable(c) => write!(f, "{}", c),
        }
    }
}

/// Natural textual form of a number: `3`, `2.5`, `-0.5`, `Infinity`, `NaN`.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n == 0.0 {
        // Covers negative zero as well.
        "0".to_string()
    } else {
        n.to_string()
    }
}

/// Function implemented by the host.
pub struct NativeFunction {
    pub name: &'static str,
    pub arity: usize,
    pub func: fn(&[Value]) -> Result<Value, String>,
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish()
    }
}

impl fmt::Display for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<native fn>")
    }
}

impl Callable for NativeFunction {
    fn arity(&self) -> usize {
        self.arity
    }

    fn call(
        &self,
        _interpreter: &mut Interpreter,
        paren: &Token,
        arguments: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        (self.func)(&arguments).map_err(|msg| RuntimeError::new(paren, msg))
    }
}

/// User function: its declaration plus the frame it closed over.
#[derive(Debug)]
pub struct LoxFunction {
    pub declaration: Rc<FunctionDecl>,
    pub closure: FrameId,

    /// Keeps `closure` from being collected while this function exists.
    pub pin: FramePin,
}

impl fmt::Display for LoxFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<fn {}>", self.declaration.name.lexeme)
    }
}

impl Callable for LoxFunction {
    fn arity(&self) -> usize {
        self.declaration.params.len()
    }

    fn call(
        &self,
        interpreter: &mut Interpreter,
        _paren: &Token,
        arguments: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        interpreter.call_function(&self.declaration, self.closure, arguments)
    }

    fn closure(&self) -> Option<FrameId> {
        Some(self.closure)
    }
}
