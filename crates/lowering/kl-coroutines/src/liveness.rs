//! Which locals have to survive each suspension point.
//!
//! Every variable whose scope is still open at a point is treated as live.
//! This over-approximates real liveness but never drops a value the
//! resumed code reads.

use indexmap::IndexMap;
use kl_ir::visit::{walk_expr, walk_stmt};
use kl_ir::{BlockOrigin, Class, DeclId, Expr, ExprKind, Function, Stmt, Visitor};

/// Visible locals at each suspension point, keyed by point number
pub(crate) fn live_locals(statements: &[Stmt]) -> IndexMap<u32, Vec<DeclId>> {
    let mut tracker = ScopeTracker {
        scopes: vec![Vec::new()],
        live: IndexMap::new(),
    };
    for stmt in statements {
        tracker.visit_stmt(stmt);
    }
    tracker.live
}

struct ScopeTracker {
    scopes: Vec<Vec<DeclId>>,
    live: IndexMap<u32, Vec<DeclId>>,
}

impl ScopeTracker {
    fn scoped(&mut self, expr: &Expr) {
        self.scopes.push(Vec::new());
        walk_expr(self, expr);
        self.scopes.pop();
    }
}

impl Visitor for ScopeTracker {
    fn visit_function(&mut self, _function: &Function) {}

    fn visit_class(&mut self, _class: &Class) {}

    fn visit_stmt(&mut self, stmt: &Stmt) {
        walk_stmt(self, stmt);
        // visible only after its own initializer
        if let Stmt::Variable(variable) = stmt
            && let Some(scope) = self.scopes.last_mut()
        {
            scope.push(variable.decl);
        }
    }

    fn visit_expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Block {
                origin: BlockOrigin::Transparent,
                ..
            } => walk_expr(self, expr),
            ExprKind::Block { .. } | ExprKind::ReturnableBlock { .. } => self.scoped(expr),
            ExprKind::SuspensionPoint { point, .. } => {
                walk_expr(self, expr);
                let visible = self.scopes.iter().flatten().copied().collect();
                self.live.insert(*point, visible);
            }
            _ => walk_expr(self, expr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kl_ir::{DeclTable, IrBuilder, Type};
    use kl_span::FileSpan;

    #[test]
    fn test_variable_declared_by_point_is_not_live_at_it() {
        let mut decls = DeclTable::new();
        let mut builder = IrBuilder::new(&mut decls, FileSpan::default());
        let owner = builder.function("f", None, &[], Type::Unit, kl_ir::Modifiers::default()).decl;
        let before = builder.variable("before", owner, Type::Int, false);
        let after = builder.variable("after", owner, Type::Any, false);
        let nested = builder.variable("nested", owner, Type::Int, false);
        let id = builder.variable("suspensionPointId0", owner, Type::Int, false);
        let point = Expr::new(
            ExprKind::SuspensionPoint {
                id,
                point: 1,
                result: Box::new(builder.unit()),
                resume_result: Box::new(builder.unit()),
            },
            Type::Any,
            FileSpan::default(),
        );
        let inner = builder.block(vec![builder.declare_local(nested, Some(builder.int(1)))], Type::Unit);
        let statements = vec![
            builder.declare_local(before, Some(builder.int(1))),
            Stmt::Expr(inner),
            builder.declare_local(after, Some(point)),
        ];

        let live = live_locals(&statements);
        assert_eq!(live.get(&1), Some(&vec![before]));
    }
}
