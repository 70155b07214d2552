//! Fixtures shared by the end-to-end lowering tests.
//!
//! Programs are built directly with [`IrBuilder`], run once on the
//! evaluator as written, lowered by the full pipeline and run again.

use kl_driver::{LoweringConfig, LoweringReport, lower_unit};
use kl_inline::NoExternalBodies;
use kl_interp::{Interpreter, InterpError, Value};
use kl_ir::visit::{any_expr, walk_expr, walk_module};
use kl_ir::{CompilationUnit, DeclTable, Declaration, Expr, Function, IrFile, IrModule, Modifiers, Stmt, Visitor};
use kl_pass::LoweringError;
use kl_span::FileId;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Single-file module holding `declarations`
pub fn module(declarations: Vec<Declaration>) -> IrModule {
    IrModule {
        name: "test".to_string(),
        files: vec![IrFile {
            name: "test.kl".to_string(),
            file_id: FileId(0),
            declarations,
        }],
    }
}

/// Unit of top-level functions
pub fn unit(decls: DeclTable, functions: Vec<Function>) -> CompilationUnit {
    CompilationUnit::new(decls, module(functions.into_iter().map(Declaration::Function).collect()))
}

/// `inline`
pub fn inline() -> Modifiers {
    Modifiers {
        inline: true,
        ..Modifiers::default()
    }
}

/// `suspend`
pub fn suspend() -> Modifiers {
    Modifiers {
        suspend: true,
        ..Modifiers::default()
    }
}

/// Lambda literal
pub fn lambda() -> Modifiers {
    Modifiers {
        lambda: true,
        ..Modifiers::default()
    }
}

/// Declared elsewhere; served by a native at run time
pub fn external() -> Modifiers {
    Modifiers {
        external: true,
        ..Modifiers::default()
    }
}

/// Run the default pipeline
///
/// # Errors
///
/// Whatever the pipeline reports
pub fn lower(unit: CompilationUnit) -> Result<(CompilationUnit, LoweringReport), LoweringError> {
    lower_unit(unit, LoweringConfig::default(), NoExternalBodies)
}

/// Implement `name` with a native returning `value`, counting its calls
pub fn counter(interpreter: &mut Interpreter, name: &str, value: Value) -> Rc<Cell<u32>> {
    let calls = Rc::new(Cell::new(0));
    let seen = Rc::clone(&calls);
    interpreter.register_native(name, move |_| {
        seen.set(seen.get() + 1);
        Ok(value.clone())
    });
    calls
}

/// Continuations handed to a native that always suspends
#[derive(Debug, Clone, Default)]
pub struct Parked {
    continuations: Rc<RefCell<Vec<Value>>>,
    arguments: Rc<RefCell<Vec<Vec<Value>>>>,
}

impl Parked {
    /// Implement `name` with a native that parks its caller
    pub fn install(interpreter: &mut Interpreter, name: &str) -> Self {
        let parked = Self::default();
        let continuations = Rc::clone(&parked.continuations);
        let arguments = Rc::clone(&parked.arguments);
        interpreter.register_native(name, move |call| {
            arguments.borrow_mut().push(call.args);
            continuations.borrow_mut().push(call.continuation);
            Ok(Value::Suspended)
        });
        parked
    }

    /// Oldest parked continuation
    pub fn take(&self) -> Option<Value> {
        let mut continuations = self.continuations.borrow_mut();
        (!continuations.is_empty()).then(|| continuations.remove(0))
    }

    /// Arguments of every call so far, oldest first
    pub fn arguments(&self) -> Vec<Vec<Value>> {
        self.arguments.borrow().clone()
    }

    /// Number of continuations waiting
    pub fn len(&self) -> usize {
        self.continuations.borrow().len()
    }

    /// Whether nothing is waiting
    pub fn is_empty(&self) -> bool {
        self.continuations.borrow().is_empty()
    }
}

/// Call `entry` with no arguments, outside any coroutine
///
/// # Errors
///
/// Any evaluation failure
pub fn call(interpreter: &mut Interpreter, entry: &str) -> Result<Value, InterpError> {
    interpreter.call(entry, Vec::new())
}

/// Whether any expression in the body of `function` matches
pub fn body_contains(function: &Function, predicate: &mut dyn FnMut(&Expr) -> bool) -> bool {
    function.body.iter().flatten().any(|stmt| match stmt {
        Stmt::Expr(expr) => any_expr(expr, predicate),
        Stmt::Variable(variable) => variable
            .initializer
            .as_ref()
            .is_some_and(|initializer| any_expr(initializer, predicate)),
        Stmt::Function(_) | Stmt::Class(_) => false,
    })
}

/// Number of expressions anywhere in `module` matching `predicate`
pub fn count_exprs(module: &IrModule, predicate: impl FnMut(&Expr) -> bool) -> usize {
    struct Counter<Predicate> {
        predicate: Predicate,
        count: usize,
    }

    impl<Predicate: FnMut(&Expr) -> bool> Visitor for Counter<Predicate> {
        fn visit_expr(&mut self, expr: &Expr) {
            if (self.predicate)(expr) {
                self.count += 1;
            }
            walk_expr(self, expr);
        }
    }

    let mut counter = Counter { predicate, count: 0 };
    walk_module(&mut counter, module);
    counter.count
}
