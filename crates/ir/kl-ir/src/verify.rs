//! Structural checks run between lowering phases

use crate::decl::{DeclId, DeclKind, DeclTable};
use crate::tree::{Class, Expr, ExprKind, Field, Function, IrModule, Stmt};
use crate::visit::{Visitor, walk_class, walk_expr, walk_function, walk_module, walk_stmt};
use rustc_hash::FxHashSet;
use std::mem;

/// A broken structural invariant
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IrViolation {
    /// Two nodes declare the same descriptor
    #[error("`{name}` ({decl}) is declared more than once")]
    DuplicateDeclaration {
        /// Descriptor declared twice
        decl: DeclId,
        /// Its name
        name: String,
    },
    /// A node references a placeholder that was never initialised
    #[error("`{name}` ({decl}) still has a pending descriptor")]
    PendingDescriptor {
        /// Uninitialised descriptor
        decl: DeclId,
        /// Its name
        name: String,
    },
    /// A `return` outside the function or block it targets
    #[error("return to `{name}` ({target}) from outside of it")]
    DanglingReturn {
        /// Return target
        target: DeclId,
        /// Its name
        name: String,
    },
    /// A local variable used but never declared in the module
    #[error("local `{name}` ({decl}) is used but never declared")]
    UndeclaredLocal {
        /// Variable descriptor
        decl: DeclId,
        /// Its name
        name: String,
    },
}

/// Check a module, returning every violation found
pub fn verify_module(module: &IrModule, decls: &DeclTable) -> Result<(), Vec<IrViolation>> {
    let mut verifier = Verifier {
        decls,
        declared: FxHashSet::default(),
        used_locals: Vec::new(),
        return_targets: Vec::new(),
        violations: Vec::new(),
    };
    walk_module(&mut verifier, module);
    verifier.finish()
}

/// Check a single function
pub fn verify_function(function: &Function, decls: &DeclTable) -> Result<(), Vec<IrViolation>> {
    let mut verifier = Verifier {
        decls,
        declared: FxHashSet::default(),
        used_locals: Vec::new(),
        return_targets: Vec::new(),
        violations: Vec::new(),
    };
    verifier.visit_function(function);
    verifier.finish()
}

struct Verifier<'decls> {
    decls: &'decls DeclTable,
    declared: FxHashSet<DeclId>,
    used_locals: Vec<DeclId>,
    return_targets: Vec<DeclId>,
    violations: Vec<IrViolation>,
}

impl Verifier<'_> {
    fn declare(&mut self, decl: DeclId) {
        self.reference(decl);
        if !self.declared.insert(decl) {
            self.violations.push(IrViolation::DuplicateDeclaration {
                decl,
                name: self.decls.name(decl),
            });
        }
    }

    fn reference(&mut self, decl: DeclId) {
        if self.decls.get(decl).is_pending() {
            self.violations.push(IrViolation::PendingDescriptor {
                decl,
                name: self.decls.name(decl),
            });
        }
    }

    fn use_value(&mut self, decl: DeclId) {
        self.reference(decl);
        if self.decls.get(decl).kind == DeclKind::Variable && !self.used_locals.contains(&decl) {
            self.used_locals.push(decl);
        }
    }

    fn finish(mut self) -> Result<(), Vec<IrViolation>> {
        for decl in mem::take(&mut self.used_locals) {
            if !self.declared.contains(&decl) {
                self.violations.push(IrViolation::UndeclaredLocal {
                    decl,
                    name: self.decls.name(decl),
                });
            }
        }
        if self.violations.is_empty() {
            Ok(())
        } else {
            Err(self.violations)
        }
    }
}

impl Visitor for Verifier<'_> {
    fn visit_function(&mut self, function: &Function) {
        self.declare(function.decl);
        for param in function.explicit_params() {
            self.declare(param.decl);
        }
        self.return_targets.push(function.decl);
        walk_function(self, function);
        self.return_targets.pop();
    }

    fn visit_class(&mut self, class: &Class) {
        self.declare(class.decl);
        walk_class(self, class);
    }

    fn visit_field(&mut self, field: &Field) {
        self.declare(field.decl);
        if let Some(initializer) = &field.initializer {
            self.visit_expr(initializer);
        }
    }

    fn visit_stmt(&mut self, stmt: &Stmt) {
        walk_stmt(self, stmt);
        if let Stmt::Variable(variable) = stmt {
            self.declare(variable.decl);
        }
    }

    fn visit_expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::GetValue(decl) | ExprKind::SetValue { target: decl, .. } => self.use_value(*decl),
            ExprKind::GetField { field, .. } | ExprKind::SetField { field, .. } => self.reference(*field),
            ExprKind::Call(call) => self.reference(call.callee),
            ExprKind::FunctionReference { target, .. } => self.reference(*target),
            ExprKind::SuspensionPoint { id, .. } => self.declare(*id),
            ExprKind::Return { target, .. } => {
                if !self.return_targets.contains(target) {
                    self.violations.push(IrViolation::DanglingReturn {
                        target: *target,
                        name: self.decls.name(*target),
                    });
                }
            }
            ExprKind::ReturnableBlock { target, .. } => {
                self.declare(*target);
                self.return_targets.push(*target);
                walk_expr(self, expr);
                self.return_targets.pop();
                return;
            }
            ExprKind::Const(_)
            | ExprKind::Invoke { .. }
            | ExprKind::Lambda(_)
            | ExprKind::Block { .. }
            | ExprKind::If { .. }
            | ExprKind::While { .. }
            | ExprKind::Binary { .. }
            | ExprKind::Unary { .. }
            | ExprKind::Throw(_)
            | ExprKind::Vararg { .. }
            | ExprKind::Cast(_)
            | ExprKind::SuspendableExpression { .. } => {}
        }
        walk_expr(self, expr);
    }
}
