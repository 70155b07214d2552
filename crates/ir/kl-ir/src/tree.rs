//! Tree-shaped IR: owned nodes that reference descriptors by handle

use crate::decl::DeclId;
use crate::ty::Type;
use kl_span::{FileId, FileSpan};
use serde::{Deserialize, Serialize};

/// All files of one compilation unit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IrModule {
    /// Module name
    pub name: String,
    /// Files in pipeline order
    pub files: Vec<IrFile>,
}

/// One source file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrFile {
    /// File name used in diagnostics
    pub name: String,
    /// File identifier used in spans
    pub file_id: FileId,
    /// Top-level declarations
    pub declarations: Vec<Declaration>,
}

/// Declaration that may appear at file or class level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Declaration {
    /// Function or constructor
    Function(Function),
    /// Class
    Class(Class),
    /// Field or top-level property
    Field(Field),
}

impl Declaration {
    /// Descriptor of the declared entity
    pub fn decl(&self) -> DeclId {
        match self {
            Self::Function(function) => function.decl,
            Self::Class(class) => class.decl,
            Self::Field(field) => field.decl,
        }
    }
}

/// Function, constructor or lambda body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    /// Descriptor
    pub decl: DeclId,
    /// Generic parameters
    #[serde(default)]
    pub type_params: Vec<DeclId>,
    /// `this` of members and constructors
    #[serde(default)]
    pub dispatch_receiver: Option<ValueParameter>,
    /// Receiver of extensions and lambdas with receiver
    #[serde(default)]
    pub extension_receiver: Option<ValueParameter>,
    /// Value parameters
    #[serde(default)]
    pub params: Vec<ValueParameter>,
    /// Statements; `None` for abstract and external declarations
    pub body: Option<Vec<Stmt>>,
    /// Source location
    #[serde(default)]
    pub span: FileSpan,
}

impl Function {
    /// Dispatch receiver, extension receiver, then value parameters
    pub fn explicit_params(&self) -> impl Iterator<Item = &ValueParameter> + '_ {
        self.dispatch_receiver
            .iter()
            .chain(self.extension_receiver.iter())
            .chain(self.params.iter())
    }
}

/// Value parameter with its optional default
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueParameter {
    /// Descriptor
    pub decl: DeclId,
    /// Default value, evaluated in the callee's scope
    #[serde(default)]
    pub default: Option<Expr>,
    /// Source location
    #[serde(default)]
    pub span: FileSpan,
}

impl ValueParameter {
    /// Parameter without a default
    pub fn new(decl: DeclId, span: FileSpan) -> Self {
        Self {
            decl,
            default: None,
            span,
        }
    }
}

/// Class with its member declarations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Class {
    /// Descriptor
    pub decl: DeclId,
    /// Members
    pub declarations: Vec<Declaration>,
    /// Source location
    #[serde(default)]
    pub span: FileSpan,
}

/// Field or top-level property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    /// Descriptor
    pub decl: DeclId,
    /// Initial value
    #[serde(default)]
    pub initializer: Option<Expr>,
    /// Source location
    #[serde(default)]
    pub span: FileSpan,
}

/// Local variable declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    /// Descriptor
    pub decl: DeclId,
    /// Initial value
    pub initializer: Option<Expr>,
    /// Source location
    #[serde(default)]
    pub span: FileSpan,
}

/// Statement inside a body or block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    /// `val`/`var`
    Variable(Variable),
    /// Expression evaluated for effect, or a block's value when last
    Expr(Expr),
    /// Local function
    Function(Function),
    /// Local class
    Class(Class),
}

/// Constant value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    /// `Unit`
    Unit,
    /// `null`
    Null,
    /// Boolean constant
    Bool(bool),
    /// Integer constant
    Int(i64),
    /// Floating point constant
    Float(f64),
    /// String constant
    String(String),
}

/// Strict binary operators; short-circuit forms are already `If`s
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    /// `+`, also string concatenation
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Rem,
    /// `==`
    Eq,
    /// `!=`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    LtEq,
    /// `>`
    Gt,
    /// `>=`
    GtEq,
    /// `===`
    RefEq,
}

impl BinaryOp {
    /// Source spelling
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::Eq => "==",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
            Self::RefEq => "===",
        }
    }

    /// Whether the result is a boolean
    pub fn is_comparison(self) -> bool {
        !matches!(self, Self::Add | Self::Sub | Self::Mul | Self::Div | Self::Rem)
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    /// `-`
    Neg,
    /// `!`
    Not,
}

/// How a block scopes its declarations
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockOrigin {
    /// Ordinary scope
    #[default]
    Plain,
    /// Declarations are visible in the enclosing scope
    Transparent,
    /// Temporaries hoisted around a suspension point; flattened into parents
    Temporaries,
}

/// Direct call of a declared function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    /// Called function or constructor
    pub callee: DeclId,
    /// Type arguments
    #[serde(default)]
    pub type_args: Vec<Type>,
    /// Receiver for members
    #[serde(default)]
    pub dispatch_receiver: Option<Expr>,
    /// Receiver for extensions
    #[serde(default)]
    pub extension_receiver: Option<Expr>,
    /// Value arguments; `None` requests the default
    pub args: Vec<Option<Expr>>,
}

impl Call {
    /// Call with positional arguments and no receivers
    pub fn new(callee: DeclId, args: Vec<Expr>) -> Self {
        Self {
            callee,
            type_args: Vec::new(),
            dispatch_receiver: None,
            extension_receiver: None,
            args: args.into_iter().map(Some).collect(),
        }
    }
}

/// Typed expression node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    /// Node kind
    pub kind: ExprKind,
    /// Static type
    pub ty: Type,
    /// Source location
    #[serde(default)]
    pub span: FileSpan,
}

impl Expr {
    /// Assemble an expression
    pub fn new(kind: ExprKind, ty: Type, span: FileSpan) -> Self {
        Self { kind, ty, span }
    }

    /// `Unit` constant
    pub fn unit(span: FileSpan) -> Self {
        Self::new(ExprKind::Const(Literal::Unit), Type::Unit, span)
    }

    /// Called function if this is a direct call
    pub fn as_call(&self) -> Option<&Call> {
        match &self.kind {
            ExprKind::Call(call) => Some(call),
            _ => None,
        }
    }
}

/// Closed set of expression kinds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprKind {
    /// Constant
    Const(Literal),
    /// Read of a variable or parameter
    GetValue(DeclId),
    /// Assignment to a variable
    SetValue {
        /// Assigned variable
        target: DeclId,
        /// New value
        value: Box<Expr>,
    },
    /// Field read; no receiver for top-level properties
    GetField {
        /// Object holding the field
        receiver: Option<Box<Expr>>,
        /// Field
        field: DeclId,
    },
    /// Field write
    SetField {
        /// Object holding the field
        receiver: Option<Box<Expr>>,
        /// Field
        field: DeclId,
        /// New value
        value: Box<Expr>,
    },
    /// Direct call
    Call(Box<Call>),
    /// Call of a function-typed value
    Invoke {
        /// Function value
        callee: Box<Expr>,
        /// Arguments, receiver first for lambdas with receiver
        args: Vec<Expr>,
    },
    /// Lambda literal
    Lambda(Box<Function>),
    /// Callable reference, possibly with bound receivers
    FunctionReference {
        /// Referenced function
        target: DeclId,
        /// Bound dispatch receiver
        dispatch_receiver: Option<Box<Expr>>,
        /// Bound extension receiver
        extension_receiver: Option<Box<Expr>>,
    },
    /// Statement sequence; value of the last expression statement
    Block {
        /// Statements
        statements: Vec<Stmt>,
        /// Scoping behaviour
        origin: BlockOrigin,
    },
    /// Block that `return`s to `target` jump out of
    ReturnableBlock {
        /// Return target declared by the block
        target: DeclId,
        /// Statements
        statements: Vec<Stmt>,
        /// Function whose body was inlined here
        inlined_from: Option<DeclId>,
    },
    /// Return from a function or returnable block
    Return {
        /// Function or return target
        target: DeclId,
        /// Returned value
        value: Box<Expr>,
    },
    /// Conditional
    If {
        /// Condition
        condition: Box<Expr>,
        /// Taken when true
        then_branch: Box<Expr>,
        /// Taken when false
        else_branch: Option<Box<Expr>>,
    },
    /// Loop
    While {
        /// Checked before every iteration
        condition: Box<Expr>,
        /// Loop body
        body: Box<Expr>,
    },
    /// Strict binary operation
    Binary {
        /// Operator
        op: BinaryOp,
        /// Left operand, evaluated first
        lhs: Box<Expr>,
        /// Right operand
        rhs: Box<Expr>,
    },
    /// Unary operation
    Unary {
        /// Operator
        op: UnaryOp,
        /// Operand
        operand: Box<Expr>,
    },
    /// Throw an exception value
    Throw(Box<Expr>),
    /// Vararg argument list
    Vararg {
        /// Element type
        element_type: Type,
        /// Elements
        elements: Vec<Expr>,
    },
    /// Implicit cast to the node's type
    Cast(Box<Expr>),
    /// Body of a state machine, dispatched on the resume point id
    SuspendableExpression {
        /// Evaluates to the suspension point to resume at, `0` to start
        suspension_point_id: Box<Expr>,
        /// Rewritten body
        result: Box<Expr>,
    },
    /// A suspend call rewritten with explicit save and restore
    SuspensionPoint {
        /// Variable declared by the point, holding its id
        id: DeclId,
        /// Number stored into `label` while suspended
        point: u32,
        /// Save, call and early return when suspended
        result: Box<Expr>,
        /// Restore and unwrap the resume argument
        resume_result: Box<Expr>,
    },
}
