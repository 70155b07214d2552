//! Runtime value representation

#![allow(
    clippy::min_ident_chars,
    reason = "Short identifiers like b, i, f, s are conventional in value implementations"
)]

use crate::env::Env;
use kl_ir::{DeclId, Function};
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Runtime value
#[derive(Debug, Clone)]
pub enum Value {
    /// `Unit`
    Unit,
    /// `null`
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value
    Int(i64),
    /// Float value
    Float(f64),
    /// String value
    String(String),
    /// Vararg array
    Array(Vec<Self>),
    /// Class instance, compared by identity
    Object(ObjectRef),
    /// Lambda or callable reference
    Closure(Rc<Closure>),
    /// `Result` of a suspended computation
    Result(Box<Result<Self, Self>>),
    /// The `COROUTINE_SUSPENDED` sentinel
    Suspended,
    /// Root continuation handed to a suspend entry point
    Completion(u32),
}

/// Shared handle to a class instance
pub type ObjectRef = Rc<RefCell<Object>>;

/// Class instance
pub struct Object {
    /// Runtime class
    pub class: DeclId,
    /// Field values; unset fields read as `null`
    pub fields: FxHashMap<DeclId, Value>,
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("class", &self.class)
            .field("fields", &self.fields.len())
            .finish()
    }
}

/// A function value
pub enum Closure {
    /// Lambda literal with the scope it was created in
    Lambda {
        /// Lambda body
        function: Rc<Function>,
        /// Captured scope
        env: Env,
    },
    /// Callable reference with its bound receivers
    Reference {
        /// Referenced function
        target: DeclId,
        /// Bound dispatch receiver
        dispatch_receiver: Option<Value>,
        /// Bound extension receiver
        extension_receiver: Option<Value>,
    },
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lambda { function, .. } => write!(f, "Lambda({})", function.decl),
            Self::Reference { target, .. } => write!(f, "Reference({target})"),
        }
    }
}

impl Value {
    /// Allocate an instance of `class` with no fields set
    pub fn object(class: DeclId) -> Self {
        Self::Object(Rc::new(RefCell::new(Object {
            class,
            fields: FxHashMap::default(),
        })))
    }

    /// Successful `Result`
    pub fn success(value: Self) -> Self {
        Self::Result(Box::new(Ok(value)))
    }

    /// Failed `Result`
    pub fn failure(exception: Self) -> Self {
        Self::Result(Box::new(Err(exception)))
    }

    /// Get the value as a boolean, if possible
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get the value as an integer, if possible
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Get the value as a string slice, if possible
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Whether this is the suspension sentinel
    #[must_use]
    pub fn is_suspended(&self) -> bool {
        matches!(self, Self::Suspended)
    }

    /// Name of the value's kind for error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unit => "Unit",
            Self::Null => "null",
            Self::Bool(_) => "Bool",
            Self::Int(_) => "Int",
            Self::Float(_) => "Float",
            Self::String(_) => "String",
            Self::Array(_) => "Array",
            Self::Object(_) => "object",
            Self::Closure(_) => "function",
            Self::Result(_) => "Result",
            Self::Suspended => "COROUTINE_SUSPENDED",
            Self::Completion(_) => "completion",
        }
    }
}

#[allow(clippy::float_cmp, reason = "IR equality on floats is exact")]
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Unit, Self::Unit) | (Self::Null, Self::Null) | (Self::Suspended, Self::Suspended) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => Rc::ptr_eq(a, b),
            (Self::Closure(a), Self::Closure(b)) => Rc::ptr_eq(a, b),
            (Self::Result(a), Self::Result(b)) => a == b,
            (Self::Completion(a), Self::Completion(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unit => write!(f, "Unit"),
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(fl) => write!(f, "{fl}"),
            Self::String(s) => write!(f, "{s}"),
            Self::Array(elements) => {
                write!(f, "[")?;
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{element}")?;
                }
                write!(f, "]")
            }
            Self::Object(object) => write!(f, "<object {}>", object.borrow().class),
            Self::Closure(closure) => write!(f, "<{closure:?}>"),
            Self::Result(result) => match &**result {
                Ok(value) => write!(f, "Success({value})"),
                Err(exception) => write!(f, "Failure({exception})"),
            },
            Self::Suspended => write!(f, "COROUTINE_SUSPENDED"),
            Self::Completion(id) => write!(f, "<completion {id}>"),
        }
    }
}
