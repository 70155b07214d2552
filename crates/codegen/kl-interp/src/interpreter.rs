//! Tree-walking evaluator

use crate::env::{Env, Scope};
use crate::value::{Closure, Value};
use indexmap::IndexMap;
use kl_ir::visit::{walk_expr, walk_function, walk_module};
use kl_ir::{
    BinaryOp, BlockOrigin, Builtins, Class, CompilationUnit, DeclId, DeclKind, DeclTable, Declaration, Expr,
    ExprKind, Field, Function, Intrinsic, Literal, Stmt, Type, UnaryOp, Visitor,
};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;
use std::iter;
use std::mem;
use std::rc::Rc;
use thiserror::Error;
use tracing::{debug, trace};

/// Interpreter error
#[derive(Debug, Clone, Error)]
pub enum InterpError {
    /// No top-level function has the requested name
    #[error("no function named `{0}`")]
    UnknownEntry(String),
    /// Called function has neither a body nor a native implementation
    #[error("`{0}` has no body and no native implementation")]
    MissingBody(String),
    /// Read or assignment of an unbound variable
    #[error("undefined variable `{0}`")]
    UndefinedVariable(String),
    /// Operand of the wrong kind
    #[error("type mismatch: expected {expected}, got {got}")]
    TypeMismatch {
        /// Expected kind
        expected: &'static str,
        /// Actual kind
        got: &'static str,
    },
    /// Integer division by zero
    #[error("division by zero")]
    DivisionByZero,
    /// A parameter has neither an argument nor a default
    #[error("no argument for parameter `{parameter}` of `{function}`")]
    MissingArgument {
        /// Called function
        function: String,
        /// Unbound parameter
        parameter: String,
    },
    /// `label` names no suspension point of the body
    #[error("no suspension point {0} to resume at")]
    UnknownSuspensionPoint(i64),
    /// Spill markers survive only in unfinished state machines
    #[error("`{0}` marker reached the evaluator")]
    UnexpandedMarker(String),
    /// A `return` left the function that declared its target
    #[error("return to `{0}` escaped its target")]
    StrayReturn(String),
    /// Constructor without an owning class
    #[error("constructor `{0}` has no class")]
    OrphanConstructor(String),
    /// `resume` was handed something that is not a continuation
    #[error("cannot resume {0}")]
    NotAContinuation(&'static str),
    /// An exception escaped the entry point
    #[error("uncaught exception: {0}")]
    Uncaught(Value),
}

/// How evaluation left an expression early
enum Unwind {
    Return { target: DeclId, value: Value },
    Throw(Value),
    Error(InterpError),
}

impl From<InterpError> for Unwind {
    fn from(error: InterpError) -> Self {
        match error {
            // natives throw by returning an uncaught exception
            InterpError::Uncaught(exception) => Self::Throw(exception),
            other => Self::Error(other),
        }
    }
}

type Eval<T> = Result<T, Unwind>;

/// Arguments handed to a native function
#[derive(Debug, Clone)]
pub struct NativeCall {
    /// Receivers first, then value arguments
    pub args: Vec<Value>,
    /// Continuation of the calling frame; `null` outside suspend code
    pub continuation: Value,
}

type Native = Box<dyn FnMut(NativeCall) -> Result<Value, InterpError>>;

/// Outcome of starting or resuming a suspend computation
#[derive(Debug, Clone, PartialEq)]
pub enum Execution {
    /// Ran to the end with this value
    Completed(Value),
    /// Waiting for a native to resume it
    Suspended,
}

/// Interpreter state
pub struct Interpreter {
    decls: DeclTable,
    builtins: Builtins,
    functions: FxHashMap<DeclId, Rc<Function>>,
    initializers: FxHashMap<DeclId, Rc<Expr>>,
    entries: IndexMap<String, DeclId>,
    globals: FxHashMap<DeclId, Value>,
    /// Scope each local class was declared in
    class_envs: FxHashMap<DeclId, Env>,
    natives: FxHashMap<String, Native>,
    root: Env,
    env: Env,
    /// Continuation of every active frame
    continuations: Vec<Value>,
    completions: u32,
}

impl Interpreter {
    /// Interpreter over a copy of `unit`
    #[must_use]
    pub fn new(unit: &CompilationUnit) -> Self {
        let mut indexer = Indexer::default();
        for file in &unit.module.files {
            for declaration in &file.declarations {
                if let Declaration::Function(function) = declaration {
                    indexer
                        .entries
                        .entry(unit.decls.name(function.decl))
                        .or_insert(function.decl);
                }
            }
        }
        walk_module(&mut indexer, &unit.module);
        debug!(functions = indexer.functions.len(), "indexed unit");

        let root: Env = Rc::default();
        Self {
            builtins: unit.decls.builtins().clone(),
            decls: unit.decls.clone(),
            functions: indexer.functions,
            initializers: indexer.initializers,
            entries: indexer.entries,
            globals: FxHashMap::default(),
            class_envs: FxHashMap::default(),
            natives: FxHashMap::default(),
            env: Rc::clone(&root),
            root,
            continuations: Vec::new(),
            completions: 0,
        }
    }

    /// Descriptor table of the unit
    pub fn decls(&self) -> &DeclTable {
        &self.decls
    }

    /// Implement every bodiless function named `name` with `native`
    pub fn register_native(
        &mut self,
        name: &str,
        native: impl FnMut(NativeCall) -> Result<Value, InterpError> + 'static,
    ) {
        self.natives.insert(name.to_string(), Box::new(native));
    }

    /// Top-level function named `name`
    pub fn function(&self, name: &str) -> Result<DeclId, InterpError> {
        self.entries
            .get(name)
            .copied()
            .ok_or_else(|| InterpError::UnknownEntry(name.to_string()))
    }

    /// Call a top-level function outside any coroutine
    pub fn call(&mut self, name: &str, args: Vec<Value>) -> Result<Value, InterpError> {
        let decl = self.function(name)?;
        self.call_decl(decl, args)
    }

    /// Call any function outside any coroutine
    pub fn call_decl(&mut self, decl: DeclId, args: Vec<Value>) -> Result<Value, InterpError> {
        self.run_entry(decl, args, Value::Null)
    }

    /// Call a suspend function with a fresh root completion
    pub fn start(&mut self, name: &str, args: Vec<Value>) -> Result<Execution, InterpError> {
        let decl = self.function(name)?;
        let root = Value::Completion(self.completions);
        self.completions += 1;
        debug!(entry = name, "starting coroutine");
        let value = self.run_entry(decl, args, root)?;
        Ok(if value.is_suspended() {
            Execution::Suspended
        } else {
            Execution::Completed(value)
        })
    }

    /// Resume `continuation` with `result`, then every completion above
    /// it that finishes in turn
    pub fn resume(&mut self, continuation: Value, result: Result<Value, Value>) -> Result<Execution, InterpError> {
        let mut current = continuation;
        let mut outcome = result;
        loop {
            let object = match current {
                Value::Completion(_) => {
                    return match outcome {
                        Ok(value) => Ok(Execution::Completed(value)),
                        Err(exception) => Err(InterpError::Uncaught(exception)),
                    };
                }
                Value::Object(object) => object,
                other => return Err(InterpError::NotAContinuation(other.kind())),
            };
            let completion = object
                .borrow()
                .fields
                .get(&self.builtins.completion)
                .cloned()
                .unwrap_or(Value::Null);
            trace!(class = %self.decls.name(object.borrow().class), "resuming continuation");

            let step = self.call_function(
                self.builtins.invoke_suspend,
                Some(Value::Object(object)),
                None,
                vec![Some(Value::Result(Box::new(outcome)))],
            );
            outcome = match step {
                Ok(Value::Suspended) => return Ok(Execution::Suspended),
                Ok(value) => Ok(value),
                Err(Unwind::Throw(exception)) => Err(exception),
                Err(other) => return Err(self.escaped(other)),
            };
            current = completion;
        }
    }

    fn run_entry(&mut self, decl: DeclId, args: Vec<Value>, continuation: Value) -> Result<Value, InterpError> {
        self.continuations.push(continuation);
        let result = self.call_function(decl, None, None, args.into_iter().map(Some).collect());
        self.continuations.pop();
        result.map_err(|unwind| self.escaped(unwind))
    }

    fn escaped(&self, unwind: Unwind) -> InterpError {
        match unwind {
            Unwind::Return { target, .. } => InterpError::StrayReturn(self.decls.name(target)),
            Unwind::Throw(exception) => InterpError::Uncaught(exception),
            Unwind::Error(error) => error,
        }
    }

    fn current_continuation(&self) -> Value {
        self.continuations.last().cloned().unwrap_or(Value::Null)
    }

    fn scoped<T>(&mut self, run: impl FnOnce(&mut Self) -> Eval<T>) -> Eval<T> {
        let scope = Scope::child(&self.env);
        let saved = mem::replace(&mut self.env, scope);
        let result = run(self);
        self.env = saved;
        result
    }

    fn call_function(
        &mut self,
        callee: DeclId,
        dispatch: Option<Value>,
        extension: Option<Value>,
        args: Vec<Option<Value>>,
    ) -> Eval<Value> {
        let descriptor = self.decls.get(callee);
        if let Some(intrinsic) = descriptor.intrinsic {
            return self.intrinsic(intrinsic, args);
        }
        if descriptor.kind == DeclKind::Constructor {
            return self.construct(callee, args);
        }
        if let Some(Value::Closure(closure)) = self.env.lookup(callee) {
            return self.invoke_closure(&closure, extension, args);
        }

        let target = match &dispatch {
            Some(Value::Object(object)) => {
                let class = object.borrow().class;
                self.resolve_virtual(class, callee)
            }
            _ => callee,
        };
        if let Some(function) = self.functions.get(&target).cloned()
            && function.body.is_some()
        {
            let parent = self.member_env(target);
            return self.enter(&function, &parent, dispatch, extension, args);
        }

        let name = self.decls.name(target);
        let continuation = self.current_continuation();
        if let Some(native) = self.natives.get_mut(&name) {
            let args = dispatch
                .into_iter()
                .chain(extension)
                .chain(args.into_iter().flatten())
                .collect();
            return native(NativeCall { args, continuation }).map_err(Unwind::from);
        }
        Err(InterpError::MissingBody(name).into())
    }

    /// Scope a member body runs in: its local class's, else the root
    fn member_env(&self, member: DeclId) -> Env {
        self.decls
            .get(member)
            .owner
            .and_then(|owner| self.class_envs.get(&owner))
            .map_or_else(|| Rc::clone(&self.root), Rc::clone)
    }

    /// Most derived override of `callee` visible from `class`
    fn resolve_virtual(&self, class: DeclId, callee: DeclId) -> DeclId {
        let mut pending = vec![class];
        let mut seen = FxHashSet::default();
        while let Some(current) = pending.pop() {
            if !seen.insert(current) {
                continue;
            }
            let Some(signature) = self.decls.class_signature(current) else {
                continue;
            };
            let found = signature.members.iter().copied().find(|&member| {
                member != callee
                    && self.decls.overrides(member, callee)
                    && self
                        .functions
                        .get(&member)
                        .is_some_and(|function| function.body.is_some())
            });
            if let Some(member) = found {
                return member;
            }
            pending.extend(signature.super_types.iter().filter_map(Type::class_id));
        }
        callee
    }

    /// Run `function` in a fresh scope under `parent`
    fn enter(
        &mut self,
        function: &Rc<Function>,
        parent: &Env,
        dispatch: Option<Value>,
        extension: Option<Value>,
        args: Vec<Option<Value>>,
    ) -> Eval<Value> {
        let decl = function.decl;
        let continuation = if self.decls.overrides(decl, self.builtins.invoke_suspend) {
            dispatch.clone().unwrap_or(Value::Null)
        } else if self.decls.is_suspend(decl) {
            self.current_continuation()
        } else {
            Value::Null
        };

        let saved = mem::replace(&mut self.env, Scope::child(parent));
        self.continuations.push(continuation);
        let result = self.bind_and_run(function, dispatch, extension, args);
        self.continuations.pop();
        self.env = saved;

        match result {
            Err(Unwind::Return { target, value }) if target == decl => Ok(value),
            other => other,
        }
    }

    fn bind_and_run(
        &mut self,
        function: &Function,
        dispatch: Option<Value>,
        extension: Option<Value>,
        args: Vec<Option<Value>>,
    ) -> Eval<Value> {
        let mut args: VecDeque<Option<Value>> = args.into();
        if let (Some(param), Some(receiver)) = (&function.dispatch_receiver, dispatch) {
            self.env.declare(param.decl, receiver);
        }
        match (&function.extension_receiver, extension) {
            (Some(param), Some(receiver)) => self.env.declare(param.decl, receiver),
            // lambda with receiver invoked like a plain lambda
            (Some(param), None) => {
                let receiver = args.pop_front().flatten().unwrap_or(Value::Null);
                self.env.declare(param.decl, receiver);
            }
            (None, Some(receiver)) => args.push_front(Some(receiver)),
            (None, None) => {}
        }

        for (index, param) in function.params.iter().enumerate() {
            let value = match args.get_mut(index).and_then(Option::take) {
                Some(value) => value,
                None => match &param.default {
                    Some(default) => self.eval(default, None)?,
                    None if self.decls.get(param.decl).modifiers.vararg => Value::Array(Vec::new()),
                    None => {
                        return Err(InterpError::MissingArgument {
                            function: self.decls.name(function.decl),
                            parameter: self.decls.name(param.decl),
                        }
                        .into());
                    }
                },
            };
            self.env.declare(param.decl, value);
        }

        let body = function.body.as_deref().unwrap_or_default();
        let value = self.exec_statements(body, None)?;
        Ok(if self.decls.get(function.decl).modifiers.lambda {
            value
        } else {
            Value::Unit
        })
    }

    fn construct(&mut self, constructor: DeclId, args: Vec<Option<Value>>) -> Eval<Value> {
        let Some(class) = self.decls.get(constructor).owner else {
            return Err(InterpError::OrphanConstructor(self.decls.name(constructor)).into());
        };
        let object = Value::object(class);
        if let Value::Object(instance) = &object {
            let members = self
                .decls
                .class_signature(class)
                .map(|signature| signature.members.clone())
                .unwrap_or_default();
            for member in members {
                if let Some(initializer) = self.initializers.get(&member).cloned() {
                    let value = self.eval(&initializer, None)?;
                    instance.borrow_mut().fields.insert(member, value);
                }
            }
        }
        if let Some(function) = self.functions.get(&constructor).cloned() {
            let parent = self.member_env(constructor);
            self.enter(&function, &parent, Some(object.clone()), None, args)?;
        }
        Ok(object)
    }

    fn invoke_closure(&mut self, closure: &Closure, extension: Option<Value>, args: Vec<Option<Value>>) -> Eval<Value> {
        match closure {
            Closure::Lambda { function, env } => self.enter(function, env, None, extension, args),
            Closure::Reference {
                target,
                dispatch_receiver,
                extension_receiver,
            } => {
                let signature = self.decls.function_signature(*target);
                let takes_dispatch = signature.is_some_and(|signature| signature.dispatch_receiver.is_some());
                let takes_extension = signature.is_some_and(|signature| signature.extension_receiver.is_some());
                let mut args: VecDeque<Option<Value>> = args.into();
                let dispatch = match dispatch_receiver {
                    Some(receiver) => Some(receiver.clone()),
                    None if takes_dispatch => args.pop_front().flatten(),
                    None => None,
                };
                let extension = match (extension_receiver, extension) {
                    (Some(receiver), _) => Some(receiver.clone()),
                    (None, Some(receiver)) => Some(receiver),
                    (None, None) if takes_extension => args.pop_front().flatten(),
                    (None, None) => None,
                };
                self.call_function(*target, dispatch, extension, args.into())
            }
        }
    }

    /// Call a function-typed value
    fn invoke_value(&mut self, callee: Value, args: Vec<Option<Value>>) -> Eval<Value> {
        match callee {
            Value::Closure(closure) => self.invoke_closure(&closure, None, args),
            // suspend function objects implement `invoke`
            Value::Object(object) => self.call_function(self.builtins.invoke, Some(Value::Object(object)), None, args),
            other => Err(mismatch("function", &other)),
        }
    }

    fn intrinsic(&mut self, intrinsic: Intrinsic, args: Vec<Option<Value>>) -> Eval<Value> {
        let mut args = args.into_iter().flatten();
        let mut first = || args.next().unwrap_or(Value::Unit);
        match intrinsic {
            Intrinsic::RunWithoutSuspension => {
                let block = first();
                self.invoke_value(block, Vec::new())
            }
            Intrinsic::ReturnIfSuspended => Ok(first()),
            Intrinsic::CoroutineSuspended => Ok(Value::Suspended),
            Intrinsic::GetContinuation => Ok(self.current_continuation()),
            Intrinsic::ResultSuccess => Ok(Value::success(first())),
            Intrinsic::ResultGetOrThrow => match first() {
                Value::Result(result) => (*result).map_err(Unwind::Throw),
                other => Err(mismatch("Result", &other)),
            },
            Intrinsic::ResultExceptionOrNull => match first() {
                Value::Result(result) => Ok((*result).err().unwrap_or(Value::Null)),
                other => Err(mismatch("Result", &other)),
            },
            Intrinsic::SaveState | Intrinsic::RestoreState => {
                Err(InterpError::UnexpandedMarker(intrinsic.to_string()).into())
            }
        }
    }

    fn exec_statements(&mut self, statements: &[Stmt], target: Option<u32>) -> Eval<Value> {
        let mut pending = target;
        let mut last = Value::Unit;
        for stmt in statements {
            if let Some(point) = pending {
                if !stmt_contains_point(stmt, point) {
                    self.skip(stmt);
                    continue;
                }
                pending = None;
                last = self.exec(stmt, Some(point))?;
                continue;
            }
            last = self.exec(stmt, None)?;
        }
        Ok(last)
    }

    /// A statement jumped over while resuming still declares what it declares
    fn skip(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Variable(variable) => self.env.declare(variable.decl, Value::Null),
            Stmt::Function(function) => self.bind_local_function(function),
            Stmt::Class(class) => self.bind_local_class(class),
            Stmt::Expr(_) => {}
        }
    }

    fn exec(&mut self, stmt: &Stmt, target: Option<u32>) -> Eval<Value> {
        match stmt {
            Stmt::Variable(variable) => {
                let value = match &variable.initializer {
                    Some(initializer) => self.eval(initializer, target)?,
                    None => Value::Null,
                };
                self.env.declare(variable.decl, value);
                Ok(Value::Unit)
            }
            Stmt::Expr(expr) => self.eval(expr, target),
            Stmt::Function(function) => {
                self.bind_local_function(function);
                Ok(Value::Unit)
            }
            Stmt::Class(class) => {
                self.bind_local_class(class);
                Ok(Value::Unit)
            }
        }
    }

    fn bind_local_function(&mut self, function: &Function) {
        let closure = Closure::Lambda {
            function: self.function_rc(function),
            env: Rc::clone(&self.env),
        };
        self.env.declare(function.decl, Value::Closure(Rc::new(closure)));
    }

    fn bind_local_class(&mut self, class: &Class) {
        self.class_envs.insert(class.decl, Rc::clone(&self.env));
    }

    fn function_rc(&self, function: &Function) -> Rc<Function> {
        self.functions
            .get(&function.decl)
            .cloned()
            .unwrap_or_else(|| Rc::new(function.clone()))
    }

    /// Evaluate `expr`. With a `target`, `expr` contains that suspension
    /// point and evaluation resumes there instead of starting over.
    fn eval(&mut self, expr: &Expr, target: Option<u32>) -> Eval<Value> {
        let aim = |child: &Expr| target.filter(|&point| contains_point(child, point));
        match &expr.kind {
            ExprKind::Const(literal) => Ok(constant(literal)),
            ExprKind::GetValue(decl) => self
                .env
                .lookup(*decl)
                .ok_or_else(|| InterpError::UndefinedVariable(self.decls.name(*decl)).into()),
            ExprKind::SetValue { target: variable, value } => {
                let value = self.eval(value, aim(value))?;
                if self.env.assign(*variable, value) {
                    Ok(Value::Unit)
                } else {
                    Err(InterpError::UndefinedVariable(self.decls.name(*variable)).into())
                }
            }
            ExprKind::GetField { receiver, field } => match receiver {
                Some(receiver) => {
                    let object = self.eval(receiver, aim(receiver))?;
                    read_field(&object, *field)
                }
                None => self.global(*field),
            },
            ExprKind::SetField { receiver, field, value } => {
                let mut values = self.eval_operands(&[receiver.as_deref(), Some(&**value)], target)?;
                let value = values.pop().flatten().unwrap_or(Value::Unit);
                match values.pop().flatten() {
                    Some(Value::Object(object)) => {
                        object.borrow_mut().fields.insert(*field, value);
                    }
                    Some(other) => return Err(mismatch("object", &other)),
                    None => {
                        self.globals.insert(*field, value);
                    }
                }
                Ok(Value::Unit)
            }
            ExprKind::Call(call) => {
                let mut operands = vec![call.dispatch_receiver.as_ref(), call.extension_receiver.as_ref()];
                operands.extend(call.args.iter().map(Option::as_ref));
                let mut values = self.eval_operands(&operands, target)?.into_iter();
                let dispatch = values.next().flatten();
                let extension = values.next().flatten();
                self.call_function(call.callee, dispatch, extension, values.collect())
            }
            ExprKind::Invoke { callee, args } => {
                let operands: Vec<Option<&Expr>> = iter::once(Some(&**callee))
                    .chain(args.iter().map(Some))
                    .collect();
                let mut values = self.eval_operands(&operands, target)?.into_iter();
                let callee = values.next().flatten().unwrap_or(Value::Unit);
                self.invoke_value(callee, values.collect())
            }
            ExprKind::Lambda(function) => {
                let closure = Closure::Lambda {
                    function: self.function_rc(function),
                    env: Rc::clone(&self.env),
                };
                Ok(Value::Closure(Rc::new(closure)))
            }
            ExprKind::FunctionReference {
                target: referenced,
                dispatch_receiver,
                extension_receiver,
            } => {
                let mut values = self
                    .eval_operands(&[dispatch_receiver.as_deref(), extension_receiver.as_deref()], target)?
                    .into_iter();
                Ok(Value::Closure(Rc::new(Closure::Reference {
                    target: *referenced,
                    dispatch_receiver: values.next().flatten(),
                    extension_receiver: values.next().flatten(),
                })))
            }
            ExprKind::Block { statements, origin } => match origin {
                BlockOrigin::Transparent => self.exec_statements(statements, target),
                BlockOrigin::Plain | BlockOrigin::Temporaries => {
                    self.scoped(|this| this.exec_statements(statements, target))
                }
            },
            ExprKind::ReturnableBlock {
                target: block,
                statements,
                ..
            } => match self.scoped(|this| this.exec_statements(statements, target)) {
                Err(Unwind::Return { target, value }) if target == *block => Ok(value),
                other => other,
            },
            ExprKind::Return { target: returned, value } => {
                let value = self.eval(value, aim(value))?;
                Err(Unwind::Return {
                    target: *returned,
                    value,
                })
            }
            ExprKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let has_else = else_branch.is_some();
                if target.is_some() && aim(condition).is_none() {
                    let value = if aim(then_branch).is_some() {
                        self.eval(then_branch, target)?
                    } else if let Some(else_branch) = else_branch {
                        self.eval(else_branch, target)?
                    } else {
                        Value::Unit
                    };
                    return Ok(if has_else { value } else { Value::Unit });
                }
                let condition = self.eval(condition, aim(condition))?;
                let value = if truth(&condition)? {
                    self.eval(then_branch, None)?
                } else if let Some(else_branch) = else_branch {
                    self.eval(else_branch, None)?
                } else {
                    Value::Unit
                };
                Ok(if has_else { value } else { Value::Unit })
            }
            ExprKind::While { condition, body } => {
                let mut resume = target;
                loop {
                    if let Some(point) = resume.take() {
                        if contains_point(condition, point) {
                            let entered = self.eval(condition, Some(point))?;
                            if !truth(&entered)? {
                                break;
                            }
                            self.eval(body, None)?;
                        } else {
                            self.eval(body, Some(point))?;
                        }
                        continue;
                    }
                    let entered = self.eval(condition, None)?;
                    if !truth(&entered)? {
                        break;
                    }
                    self.eval(body, None)?;
                }
                Ok(Value::Unit)
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let mut values = self.eval_operands(&[Some(&**lhs), Some(&**rhs)], target)?.into_iter();
                let lhs = values.next().flatten().unwrap_or(Value::Unit);
                let rhs = values.next().flatten().unwrap_or(Value::Unit);
                binary(*op, lhs, rhs)
            }
            ExprKind::Unary { op, operand } => {
                let value = self.eval(operand, aim(operand))?;
                unary(*op, value)
            }
            ExprKind::Throw(value) => {
                let exception = self.eval(value, aim(value))?;
                Err(Unwind::Throw(exception))
            }
            ExprKind::Vararg { elements, .. } => {
                let operands: Vec<Option<&Expr>> = elements.iter().map(Some).collect();
                let values = self.eval_operands(&operands, target)?;
                Ok(Value::Array(values.into_iter().flatten().collect()))
            }
            ExprKind::Cast(value) => self.eval(value, aim(value)),
            ExprKind::SuspendableExpression {
                suspension_point_id,
                result,
            } => {
                let label = self.eval(suspension_point_id, None)?;
                let label = label.as_int().ok_or_else(|| mismatch("Int", &label))?;
                if label == 0 {
                    return self.eval(result, None);
                }
                let point = u32::try_from(label)
                    .ok()
                    .filter(|&point| contains_point(result, point))
                    .ok_or(InterpError::UnknownSuspensionPoint(label))?;
                trace!(point, "resuming at suspension point");
                self.eval(result, Some(point))
            }
            ExprKind::SuspensionPoint {
                id,
                point,
                result,
                resume_result,
            } => {
                self.env.declare(*id, Value::Int(i64::from(*point)));
                match target {
                    Some(resumed) if resumed == *point => self.eval(resume_result, None),
                    Some(resumed) if contains_point(result, resumed) => self.eval(result, target),
                    Some(_) => self.eval(resume_result, target),
                    None => self.eval(result, None),
                }
            }
        }
    }

    /// Evaluate operands in order, except that the one holding the
    /// resumed point goes first; the rest are safe to evaluate again
    fn eval_operands(&mut self, operands: &[Option<&Expr>], target: Option<u32>) -> Eval<Vec<Option<Value>>> {
        let mut values: Vec<Option<Value>> = vec![None; operands.len()];
        let resumed = target.and_then(|point| {
            operands
                .iter()
                .position(|operand| operand.is_some_and(|expr| contains_point(expr, point)))
        });
        if let Some(index) = resumed
            && let Some(expr) = operands[index]
        {
            values[index] = Some(self.eval(expr, target)?);
        }
        for (index, operand) in operands.iter().enumerate() {
            if Some(index) == resumed {
                continue;
            }
            if let Some(expr) = operand {
                values[index] = Some(self.eval(expr, None)?);
            }
        }
        Ok(values)
    }

    fn global(&mut self, field: DeclId) -> Eval<Value> {
        if let Some(value) = self.globals.get(&field) {
            return Ok(value.clone());
        }
        let value = match self.initializers.get(&field).cloned() {
            Some(initializer) => self.eval(&initializer, None)?,
            None => Value::Null,
        };
        self.globals.insert(field, value.clone());
        Ok(value)
    }
}

fn mismatch(expected: &'static str, got: &Value) -> Unwind {
    Unwind::Error(InterpError::TypeMismatch {
        expected,
        got: got.kind(),
    })
}

fn truth(value: &Value) -> Eval<bool> {
    value.as_bool().ok_or_else(|| mismatch("Bool", value))
}

fn constant(literal: &Literal) -> Value {
    match literal {
        Literal::Unit => Value::Unit,
        Literal::Null => Value::Null,
        Literal::Bool(value) => Value::Bool(*value),
        Literal::Int(value) => Value::Int(*value),
        Literal::Float(value) => Value::Float(*value),
        Literal::String(value) => Value::String(value.clone()),
    }
}

fn read_field(object: &Value, field: DeclId) -> Eval<Value> {
    match object {
        Value::Object(object) => Ok(object.borrow().fields.get(&field).cloned().unwrap_or(Value::Null)),
        other => Err(mismatch("object", other)),
    }
}

fn binary(op: BinaryOp, lhs: Value, rhs: Value) -> Eval<Value> {
    use Value::{Float, Int, String};
    let value = match (op, &lhs, &rhs) {
        (BinaryOp::Eq | BinaryOp::RefEq, _, _) => Value::Bool(lhs == rhs),
        (BinaryOp::NotEq, _, _) => Value::Bool(lhs != rhs),
        (BinaryOp::Add, String(left), _) => String(format!("{left}{rhs}")),
        (BinaryOp::Add, _, String(right)) => String(format!("{lhs}{right}")),
        (BinaryOp::Add, Int(left), Int(right)) => Int(left.wrapping_add(*right)),
        (BinaryOp::Sub, Int(left), Int(right)) => Int(left.wrapping_sub(*right)),
        (BinaryOp::Mul, Int(left), Int(right)) => Int(left.wrapping_mul(*right)),
        (BinaryOp::Div | BinaryOp::Rem, Int(_), Int(0)) => return Err(InterpError::DivisionByZero.into()),
        (BinaryOp::Div, Int(left), Int(right)) => Int(left.wrapping_div(*right)),
        (BinaryOp::Rem, Int(left), Int(right)) => Int(left.wrapping_rem(*right)),
        (BinaryOp::Add, Float(left), Float(right)) => Float(left + right),
        (BinaryOp::Sub, Float(left), Float(right)) => Float(left - right),
        (BinaryOp::Mul, Float(left), Float(right)) => Float(left * right),
        (BinaryOp::Div, Float(left), Float(right)) => Float(left / right),
        (BinaryOp::Rem, Float(left), Float(right)) => Float(left % right),
        (BinaryOp::Lt, Int(left), Int(right)) => Value::Bool(left < right),
        (BinaryOp::LtEq, Int(left), Int(right)) => Value::Bool(left <= right),
        (BinaryOp::Gt, Int(left), Int(right)) => Value::Bool(left > right),
        (BinaryOp::GtEq, Int(left), Int(right)) => Value::Bool(left >= right),
        (BinaryOp::Lt, Float(left), Float(right)) => Value::Bool(left < right),
        (BinaryOp::LtEq, Float(left), Float(right)) => Value::Bool(left <= right),
        (BinaryOp::Gt, Float(left), Float(right)) => Value::Bool(left > right),
        (BinaryOp::GtEq, Float(left), Float(right)) => Value::Bool(left >= right),
        (BinaryOp::Lt, String(left), String(right)) => Value::Bool(left < right),
        (BinaryOp::LtEq, String(left), String(right)) => Value::Bool(left <= right),
        (BinaryOp::Gt, String(left), String(right)) => Value::Bool(left > right),
        (BinaryOp::GtEq, String(left), String(right)) => Value::Bool(left >= right),
        (_, Int(_) | Float(_) | String(_), _) => return Err(mismatch(lhs.kind(), &rhs)),
        _ => return Err(mismatch("number", &lhs)),
    };
    Ok(value)
}

fn unary(op: UnaryOp, value: Value) -> Eval<Value> {
    match (op, value) {
        (UnaryOp::Neg, Value::Int(value)) => Ok(Value::Int(value.wrapping_neg())),
        (UnaryOp::Neg, Value::Float(value)) => Ok(Value::Float(-value)),
        (UnaryOp::Not, Value::Bool(value)) => Ok(Value::Bool(!value)),
        (UnaryOp::Neg, other) => Err(mismatch("number", &other)),
        (UnaryOp::Not, other) => Err(mismatch("Bool", &other)),
    }
}

/// Whether suspension point `point` occurs in `expr`, outside nested
/// functions and classes
fn contains_point(expr: &Expr, point: u32) -> bool {
    let mut finder = PointFinder { point, found: false };
    finder.visit_expr(expr);
    finder.found
}

fn stmt_contains_point(stmt: &Stmt, point: u32) -> bool {
    match stmt {
        Stmt::Variable(variable) => variable
            .initializer
            .as_ref()
            .is_some_and(|initializer| contains_point(initializer, point)),
        Stmt::Expr(expr) => contains_point(expr, point),
        Stmt::Function(_) | Stmt::Class(_) => false,
    }
}

struct PointFinder {
    point: u32,
    found: bool,
}

impl Visitor for PointFinder {
    fn visit_function(&mut self, _function: &Function) {}

    fn visit_class(&mut self, _class: &Class) {}

    fn visit_expr(&mut self, expr: &Expr) {
        if self.found {
            return;
        }
        if let ExprKind::SuspensionPoint { point, .. } = expr.kind
            && point == self.point
        {
            self.found = true;
            return;
        }
        walk_expr(self, expr);
    }
}

/// Every function body and field initializer in the unit, nested ones included
#[derive(Default)]
struct Indexer {
    functions: FxHashMap<DeclId, Rc<Function>>,
    initializers: FxHashMap<DeclId, Rc<Expr>>,
    entries: IndexMap<String, DeclId>,
}

impl Visitor for Indexer {
    fn visit_function(&mut self, function: &Function) {
        self.functions.insert(function.decl, Rc::new(function.clone()));
        walk_function(self, function);
    }

    fn visit_field(&mut self, field: &Field) {
        if let Some(initializer) = &field.initializer {
            self.initializers.insert(field.decl, Rc::new(initializer.clone()));
            self.visit_expr(initializer);
        }
    }
}
