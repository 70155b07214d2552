//! Deciding how much machinery a suspend function needs

use kl_ir::visit::walk_expr;
use kl_ir::{Class, DeclTable, Expr, ExprKind, Function, Intrinsic, Stmt, Type, Visitor};

/// How a suspend function gets lowered
#[derive(Debug, Clone, PartialEq)]
pub enum SuspendFunctionKind {
    /// No suspend calls; an ordinary function
    NoSuspendCalls,
    /// Exactly one suspend call, in tail position
    Delegating(Expr),
    /// Needs a state-machine class
    NeedsStateMachine,
}

/// Direct call of a suspend function or invocation of a suspend function value
pub(crate) fn is_suspend_call(decls: &DeclTable, expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Call(call) => decls.is_suspend(call.callee),
        ExprKind::Invoke { callee, .. } => callee.ty.is_suspend_function(),
        _ => false,
    }
}

/// `returnIfSuspended(argument)`
pub(crate) fn is_unwrap(decls: &DeclTable, expr: &Expr) -> bool {
    matches!(&expr.kind, ExprKind::Call(call) if decls.intrinsic(call.callee) == Some(Intrinsic::ReturnIfSuspended))
}

/// Argument of an unwrap whose argument is itself a suspend call
pub(crate) fn unwrapped_suspend_call<'expr>(decls: &DeclTable, expr: &'expr Expr) -> Option<&'expr Expr> {
    if !is_unwrap(decls, expr) {
        return None;
    }
    expr.as_call()
        .and_then(|call| call.args.first())
        .and_then(Option::as_ref)
        .filter(|argument| is_suspend_call(decls, argument))
}

/// Whether `expr` contains a suspend call or a suspension point. Nested
/// functions, lambdas and classes are lowered on their own and not searched.
pub(crate) fn has_suspension(decls: &DeclTable, expr: &Expr) -> bool {
    struct Finder<'decls> {
        decls: &'decls DeclTable,
        found: bool,
    }

    impl Visitor for Finder<'_> {
        fn visit_function(&mut self, _function: &Function) {}

        fn visit_class(&mut self, _class: &Class) {}

        fn visit_expr(&mut self, expr: &Expr) {
            if self.found {
                return;
            }
            if is_suspend_call(self.decls, expr) || matches!(expr.kind, ExprKind::SuspensionPoint { .. }) {
                self.found = true;
                return;
            }
            walk_expr(self, expr);
        }
    }

    let mut finder = Finder { decls, found: false };
    finder.visit_expr(expr);
    finder.found
}

/// Suspend calls in the function's own statements. An unwrap around a
/// suspend call counts once.
pub(crate) fn count_suspend_calls(decls: &DeclTable, statements: &[Stmt]) -> usize {
    struct Counter<'decls> {
        decls: &'decls DeclTable,
        count: usize,
    }

    impl Visitor for Counter<'_> {
        fn visit_function(&mut self, _function: &Function) {}

        fn visit_class(&mut self, _class: &Class) {}

        fn visit_expr(&mut self, expr: &Expr) {
            if is_suspend_call(self.decls, expr) && unwrapped_suspend_call(self.decls, expr).is_none() {
                self.count += 1;
            }
            walk_expr(self, expr);
        }
    }

    let mut counter = Counter { decls, count: 0 };
    for stmt in statements {
        counter.visit_stmt(stmt);
    }
    counter.count
}

/// The call or invocation the body ends with, looking through `return`
/// and single-statement blocks
fn tail_call(statements: &[Stmt]) -> Option<&Expr> {
    let Some(Stmt::Expr(last)) = statements.last() else {
        return None;
    };
    let mut value = last;
    loop {
        match &value.kind {
            ExprKind::Return { value: returned, .. } => value = returned,
            ExprKind::Block { statements, .. } if statements.len() == 1 => match &statements[0] {
                Stmt::Expr(only) => value = only,
                _ => return None,
            },
            ExprKind::Call(_) | ExprKind::Invoke { .. } => return Some(value),
            _ => return None,
        }
    }
}

/// Classify a suspend function or lambda
pub fn classify(decls: &DeclTable, function: &Function, is_lambda: bool) -> SuspendFunctionKind {
    if is_lambda {
        return SuspendFunctionKind::NeedsStateMachine;
    }
    let Some(body) = &function.body else {
        return SuspendFunctionKind::NoSuspendCalls;
    };
    match count_suspend_calls(decls, body) {
        0 => SuspendFunctionKind::NoSuspendCalls,
        1 => match tail_call(body) {
            Some(call) if is_suspend_call(decls, call) => SuspendFunctionKind::Delegating(call.clone()),
            _ => SuspendFunctionKind::NeedsStateMachine,
        },
        _ => SuspendFunctionKind::NeedsStateMachine,
    }
}

/// Make the delegating call the function's return value, dropping an
/// unwrap around it
pub(crate) fn simplify_delegating(decls: &DeclTable, function: &mut Function, call: Expr) {
    let value = match unwrapped_suspend_call(decls, &call) {
        Some(argument) => argument.clone(),
        None => call,
    };
    let Some(last) = function.body.as_mut().and_then(|body| body.last_mut()) else {
        return;
    };
    let span = value.span;
    *last = Stmt::Expr(Expr::new(
        ExprKind::Return {
            target: function.decl,
            value: Box::new(value),
        },
        Type::Nothing,
        span,
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use kl_ir::{IrBuilder, Modifiers};
    use kl_span::FileSpan;

    fn suspend() -> Modifiers {
        Modifiers {
            suspend: true,
            ..Modifiers::default()
        }
    }

    #[test]
    fn test_tail_invocation_of_suspend_value_delegates() {
        let mut decls = DeclTable::new();
        let mut b = IrBuilder::new(&mut decls, FileSpan::default());
        let block_type = Type::function(Vec::new(), Type::Int, true);
        let mut f = b.function("f", None, &[("block", block_type)], Type::Int, suspend());
        let invocation = b.invoke(b.get(f.params[0].decl), Vec::new());
        f.body = Some(vec![Stmt::Expr(b.ret(f.decl, invocation))]);

        let SuspendFunctionKind::Delegating(call) = classify(&decls, &f, false) else {
            panic!("expected a delegating function");
        };
        assert!(matches!(call.kind, ExprKind::Invoke { .. }));
    }

    #[test]
    fn test_plain_function_value_is_not_a_suspend_call() {
        let mut decls = DeclTable::new();
        let mut b = IrBuilder::new(&mut decls, FileSpan::default());
        let block_type = Type::function(Vec::new(), Type::Int, false);
        let mut f = b.function("f", None, &[("block", block_type)], Type::Int, suspend());
        let invocation = b.invoke(b.get(f.params[0].decl), Vec::new());
        f.body = Some(vec![Stmt::Expr(b.ret(f.decl, invocation))]);

        assert_eq!(classify(&decls, &f, false), SuspendFunctionKind::NoSuspendCalls);
    }

    #[test]
    fn test_invocation_before_the_tail_needs_a_machine() {
        let mut decls = DeclTable::new();
        let mut b = IrBuilder::new(&mut decls, FileSpan::default());
        let block_type = Type::function(Vec::new(), Type::Int, true);
        let mut f = b.function("f", None, &[("block", block_type)], Type::Int, suspend());
        let block = f.params[0].decl;
        f.body = Some(vec![
            Stmt::Expr(b.invoke(b.get(block), Vec::new())),
            Stmt::Expr(b.ret(f.decl, b.int(1))),
        ]);

        assert_eq!(classify(&decls, &f, false), SuspendFunctionKind::NeedsStateMachine);
    }
}
