//! Free variables captured by suspend lambdas and local functions

use indexmap::IndexSet;
use kl_ir::visit::{walk_expr, walk_function, walk_stmt};
use kl_ir::{DeclId, DeclKind, DeclTable, Expr, ExprKind, Function, Stmt, Visitor};
use rustc_hash::FxHashSet;

/// Variables and parameters `function` reads or writes without declaring
/// them, in order of first use
pub(crate) fn free_variables(decls: &DeclTable, function: &Function) -> Vec<DeclId> {
    let mut collector = Collector {
        decls,
        declared: FxHashSet::default(),
        used: IndexSet::new(),
    };
    collector.visit_function(function);
    let Collector { declared, used, .. } = collector;
    used.into_iter().filter(|decl| !declared.contains(decl)).collect()
}

struct Collector<'decls> {
    decls: &'decls DeclTable,
    declared: FxHashSet<DeclId>,
    used: IndexSet<DeclId>,
}

impl Visitor for Collector<'_> {
    fn visit_function(&mut self, function: &Function) {
        self.declared
            .extend(function.explicit_params().map(|param| param.decl));
        walk_function(self, function);
    }

    fn visit_stmt(&mut self, stmt: &Stmt) {
        if let Stmt::Variable(variable) = stmt {
            self.declared.insert(variable.decl);
        }
        walk_stmt(self, stmt);
    }

    fn visit_expr(&mut self, expr: &Expr) {
        if let ExprKind::GetValue(decl) | ExprKind::SetValue { target: decl, .. } = &expr.kind
            && matches!(self.decls.get(*decl).kind, DeclKind::Variable | DeclKind::ValueParameter)
        {
            self.used.insert(*decl);
        }
        walk_expr(self, expr);
    }
}
