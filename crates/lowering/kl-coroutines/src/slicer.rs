//! Splitting expressions around suspend calls.
//!
//! Operands evaluated before a suspend call are hoisted into temporaries
//! so that resuming never evaluates them twice, and every suspend call is
//! replaced by a [`ExprKind::SuspensionPoint`] carrying the save, the
//! early return and the resume path. Spilling itself is left to the
//! `saveState`/`restoreState` markers, expanded once liveness is known.

use crate::classify::{has_suspension, is_suspend_call, is_unwrap, unwrapped_suspend_call};
use kl_ir::visit::walk_expr_mut;
use kl_ir::{
    BinaryOp, BlockOrigin, Builtins, Call, Class, DeclId, DeclKind, DeclTable, Expr, ExprKind, Function, IrBuilder,
    MutVisitor, Stmt, Type,
};
use kl_span::FileSpan;
use std::convert::Infallible;
use std::mem;

pub(crate) struct ExpressionSlicer<'decls> {
    decls: &'decls mut DeclTable,
    builtins: Builtins,
    /// `invokeSuspend`; owns temporaries and point ids
    owner: DeclId,
    suspend_result: DeclId,
    /// `invokeSuspend`'s result parameter
    resumed_with: DeclId,
    temporaries: u32,
    points: u32,
}

impl<'decls> ExpressionSlicer<'decls> {
    pub(crate) fn new(decls: &'decls mut DeclTable, owner: DeclId, suspend_result: DeclId, resumed_with: DeclId) -> Self {
        let builtins = decls.builtins().clone();
        Self {
            decls,
            builtins,
            owner,
            suspend_result,
            resumed_with,
            temporaries: 0,
            points: 0,
        }
    }

    /// Suspension points created so far
    pub(crate) fn points(&self) -> u32 {
        self.points
    }

    pub(crate) fn slice(&mut self, statements: &mut [Stmt]) {
        for stmt in statements {
            match self.visit_stmt(stmt) {
                Ok(()) => {}
                Err(never) => match never {},
            }
        }
    }

    fn temporary(&mut self, value: Expr, statements: &mut Vec<Stmt>) -> Expr {
        let name = format!("tmp{}", self.temporaries);
        self.temporaries += 1;
        let mut builder = IrBuilder::new(self.decls, value.span);
        let temporary = builder.variable(&name, self.owner, value.ty.clone(), false);
        statements.push(builder.declare_local(temporary, Some(value)));
        builder.get(temporary)
    }

    fn save_state(&self, span: FileSpan) -> Stmt {
        Stmt::Expr(Expr::new(
            ExprKind::Call(Box::new(Call::new(self.builtins.save_state, Vec::new()))),
            Type::Unit,
            span,
        ))
    }

    /// `{ saveState(); value }`, hoisting `value` first unless it is pure
    fn save_before(&mut self, value: Expr) -> Expr {
        let span = value.span;
        let ty = value.ty.clone();
        let mut statements = Vec::new();
        let value = if is_pure(self.decls, &value) {
            value
        } else {
            self.temporary(value, &mut statements)
        };
        statements.push(self.save_state(span));
        statements.push(Stmt::Expr(value));
        block(statements, BlockOrigin::Plain, ty, span)
    }

    fn suspension_point(&mut self, call: Expr, saved: bool, span: FileSpan) -> Expr {
        let index = self.points;
        self.points += 1;
        let builtins = self.builtins.clone();
        let suspend_result = self.suspend_result;
        let resumed_with = self.resumed_with;
        let owner = self.owner;
        let mut builder = IrBuilder::new(self.decls, span);
        let id = builder.variable(&format!("suspensionPointId{index}"), owner, Type::Int, false);

        let mut result = Vec::new();
        if !saved {
            result.push(self.save_state(span));
        }
        let builder = IrBuilder::new(self.decls, span);
        result.push(Stmt::Expr(builder.set(suspend_result, call)));
        let suspended = builder.binary(
            BinaryOp::RefEq,
            builder.get(suspend_result),
            builder.call(builtins.coroutine_suspended, Vec::new()),
        );
        result.push(Stmt::Expr(builder.if_then(
            suspended,
            builder.ret(owner, builder.get(suspend_result)),
            None,
        )));
        result.push(Stmt::Expr(builder.get(suspend_result)));

        let resume = vec![
            Stmt::Expr(builder.call(builtins.restore_state, Vec::new())),
            Stmt::Expr(builder.call(builtins.result_get_or_throw, vec![builder.get(resumed_with)])),
        ];

        Expr::new(
            ExprKind::SuspensionPoint {
                id,
                point: index + 1,
                result: Box::new(builder.block(result, Type::Any)),
                resume_result: Box::new(builder.block(resume, Type::Any)),
            },
            Type::Any,
            span,
        )
    }

    /// Hoist operands and, for a suspend call, build its suspension point
    fn slice_operands(&mut self, expr: &mut Expr) {
        let unwrap = is_unwrap(self.decls, expr);
        let suspend = unwrap || is_suspend_call(self.decls, expr);
        let span = expr.span;
        let mut temporaries = Vec::new();
        let mut saved = false;
        let mut unwrapped = None;
        {
            let mut operands = operands(&mut expr.kind);
            let count = operands.len();
            let mut tail = vec![false; count + 1];
            for index in (0..count).rev() {
                tail[index] = tail[index + 1]
                    || operands[index]
                        .get()
                        .is_some_and(|child| has_suspension(self.decls, child));
            }

            let mut first = true;
            for (index, operand) in operands.iter_mut().enumerate() {
                let Some(child) = operand.take() else {
                    continue;
                };
                let child = flatten_temporaries(child, &mut temporaries);
                let keep = (first && !tail[index + 1]) || is_pure(self.decls, &child) || !tail[index];
                first = false;
                let child = if keep {
                    child
                } else {
                    self.temporary(child, &mut temporaries)
                };
                operand.put(child);
            }

            if unwrap {
                // the unwrap disappears; its argument stands in for the call
                if let Some(argument) = operands.get_mut(2).and_then(Operand::take) {
                    let argument_span = argument.span;
                    let ty = argument.ty.clone();
                    unwrapped = Some(block(
                        vec![self.save_state(argument_span), Stmt::Expr(argument)],
                        BlockOrigin::Plain,
                        ty,
                        argument_span,
                    ));
                    saved = true;
                }
            } else if suspend
                && let Some(last) = operands.last_mut()
                && let Some(child) = last.take()
            {
                let wrapped = self.save_before(child);
                last.put(wrapped);
                saved = true;
            }
        }

        if !suspend {
            if !temporaries.is_empty() {
                let inner = mem::replace(expr, Expr::unit(span));
                let ty = inner.ty.clone();
                temporaries.push(Stmt::Expr(inner));
                *expr = block(temporaries, BlockOrigin::Temporaries, ty, span);
            }
            return;
        }

        let original = mem::replace(expr, Expr::unit(span));
        let ty = original.ty.clone();
        let call = unwrapped.unwrap_or(original);
        let point = self.suspension_point(call, saved, span);
        let value = if ty.is_unit() {
            block(
                vec![Stmt::Expr(point), Stmt::Expr(Expr::unit(span))],
                BlockOrigin::Transparent,
                Type::Unit,
                span,
            )
        } else {
            Expr::new(ExprKind::Cast(Box::new(point)), ty.clone(), span)
        };
        *expr = if temporaries.is_empty() {
            value
        } else {
            temporaries.push(Stmt::Expr(value));
            block(temporaries, BlockOrigin::Plain, ty, span)
        };
    }
}

impl MutVisitor for ExpressionSlicer<'_> {
    type Error = Infallible;

    // nested bodies are lowered on their own
    fn visit_function(&mut self, _function: &mut Function) -> Result<(), Infallible> {
        Ok(())
    }

    fn visit_class(&mut self, _class: &mut Class) -> Result<(), Infallible> {
        Ok(())
    }

    fn visit_expr(&mut self, expr: &mut Expr) -> Result<(), Infallible> {
        strip_unwrap(self.decls, expr);
        walk_expr_mut(self, expr)?;
        if matches!(
            expr.kind,
            ExprKind::Call(_)
                | ExprKind::Invoke { .. }
                | ExprKind::SetField { .. }
                | ExprKind::Binary { .. }
                | ExprKind::Vararg { .. }
        ) {
            self.slice_operands(expr);
        }
        Ok(())
    }
}

/// `returnIfSuspended(f())` where `f` suspends is just `f()`
fn strip_unwrap(decls: &DeclTable, expr: &mut Expr) {
    if unwrapped_suspend_call(decls, expr).is_none() {
        return;
    }
    let argument = match &mut expr.kind {
        ExprKind::Call(call) => call.args.first_mut().and_then(Option::take),
        _ => None,
    };
    if let Some(argument) = argument {
        *expr = argument;
    }
}

/// Evaluating it again after resuming gives the same value
fn is_pure(decls: &DeclTable, expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Const(_) => true,
        ExprKind::GetValue(decl) => {
            let descriptor = decls.get(*decl);
            match descriptor.kind {
                DeclKind::ValueParameter => true,
                DeclKind::Variable => !descriptor.modifiers.mutable,
                _ => false,
            }
        }
        ExprKind::Cast(value) => is_pure(decls, value),
        _ => false,
    }
}

/// Move the statements of a temporaries block into `temporaries`,
/// leaving its value
fn flatten_temporaries(child: Expr, temporaries: &mut Vec<Stmt>) -> Expr {
    let ExprKind::Block {
        origin: BlockOrigin::Temporaries,
        mut statements,
    } = child.kind
    else {
        return child;
    };
    match statements.pop() {
        Some(Stmt::Expr(value)) => {
            temporaries.extend(statements);
            value
        }
        last => {
            statements.extend(last);
            block(statements, BlockOrigin::Temporaries, child.ty, child.span)
        }
    }
}

fn block(statements: Vec<Stmt>, origin: BlockOrigin, ty: Type, span: FileSpan) -> Expr {
    Expr::new(ExprKind::Block { statements, origin }, ty, span)
}

/// Operand slot of a node, in evaluation order
enum Operand<'expr> {
    Required(&'expr mut Expr),
    Optional(&'expr mut Option<Expr>),
    Boxed(&'expr mut Option<Box<Expr>>),
}

impl Operand<'_> {
    fn get(&self) -> Option<&Expr> {
        match self {
            Self::Required(expr) => Some(&**expr),
            Self::Optional(expr) => expr.as_ref(),
            Self::Boxed(expr) => expr.as_deref(),
        }
    }

    fn take(&mut self) -> Option<Expr> {
        match self {
            Self::Required(expr) => {
                let span = expr.span;
                Some(mem::replace(&mut **expr, Expr::unit(span)))
            }
            Self::Optional(expr) => expr.take(),
            Self::Boxed(expr) => expr.take().map(|boxed| *boxed),
        }
    }

    fn put(&mut self, value: Expr) {
        match self {
            Self::Required(expr) => **expr = value,
            Self::Optional(expr) => **expr = Some(value),
            Self::Boxed(expr) => **expr = Some(Box::new(value)),
        }
    }
}

fn operands(kind: &mut ExprKind) -> Vec<Operand<'_>> {
    match kind {
        ExprKind::Call(call) => {
            let Call {
                dispatch_receiver,
                extension_receiver,
                args,
                ..
            } = &mut **call;
            let mut operands = vec![Operand::Optional(dispatch_receiver), Operand::Optional(extension_receiver)];
            operands.extend(args.iter_mut().map(Operand::Optional));
            operands
        }
        ExprKind::Invoke { callee, args } => {
            let mut operands = vec![Operand::Required(&mut **callee)];
            operands.extend(args.iter_mut().map(Operand::Required));
            operands
        }
        ExprKind::SetField { receiver, value, .. } => {
            vec![Operand::Boxed(receiver), Operand::Required(&mut **value)]
        }
        ExprKind::Binary { lhs, rhs, .. } => vec![Operand::Required(&mut **lhs), Operand::Required(&mut **rhs)],
        ExprKind::Vararg { elements, .. } => elements.iter_mut().map(Operand::Required).collect(),
        _ => Vec::new(),
    }
}
