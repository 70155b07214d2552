//! Rewriting a suspend body into the body of `invokeSuspend`

use crate::liveness::live_locals;
use crate::slicer::ExpressionSlicer;
use indexmap::IndexMap;
use kl_ir::visit::{walk_expr_mut, walk_stmt_mut};
use kl_ir::{
    BinaryOp, BlockOrigin, Builtins, Class, DeclId, DeclTable, Descriptor, Expr, ExprKind, IrBuilder, MutVisitor,
    Stmt, Type, UnaryOp,
};
use kl_pass::{Diagnostics, LoweringContext};
use kl_span::FileSpan;
use rustc_hash::FxHashMap;
use std::convert::Infallible;
use tracing::trace;

/// Declarations of one coroutine class that its `invokeSuspend` body uses
pub(crate) struct StateMachine {
    /// Function or lambda whose body is being moved
    pub(crate) function: DeclId,
    pub(crate) class: DeclId,
    pub(crate) invoke_suspend: DeclId,
    /// `this` of `invokeSuspend`
    pub(crate) this: DeclId,
    /// Result `invokeSuspend` was resumed with
    pub(crate) resumed_with: DeclId,
    pub(crate) label: DeclId,
    /// Explicit parameter or captured variable to the field holding it
    pub(crate) parameter_fields: IndexMap<DeclId, DeclId>,
    pub(crate) return_type: Type,
    pub(crate) span: FileSpan,
}

pub(crate) struct LoweredBody {
    pub(crate) statements: Vec<Stmt>,
    pub(crate) spilled_fields: Vec<DeclId>,
    pub(crate) suspension_points: u32,
}

impl StateMachine {
    pub(crate) fn lower_body(&self, ctx: &mut LoweringContext, mut statements: Vec<Stmt>) -> LoweredBody {
        let builtins = ctx.decls.builtins().clone();
        let suspend_result =
            IrBuilder::new(&mut ctx.decls, self.span).variable("suspendResult", self.invoke_suspend, Type::Any, true);

        let mut slicer = ExpressionSlicer::new(&mut ctx.decls, self.invoke_suspend, suspend_result, self.resumed_with);
        slicer.slice(&mut statements);
        let suspension_points = slicer.points();

        let live = live_locals(&statements);
        let renamed = self.make_live_locals_mutable(&mut ctx.decls, &live, &mut statements);

        let mut spilled = IndexMap::new();
        for local in live.values().flatten() {
            if spilled.contains_key(local) {
                continue;
            }
            let name = ctx.decls.name(*local);
            let ty = ctx.decls.value_type(*local).cloned().unwrap_or(Type::Any);
            let field = IrBuilder::new(&mut ctx.decls, self.span).field(&name, Some(self.class), ty, true);
            spilled.insert(*local, field);
        }
        trace!(points = suspension_points, spilled = spilled.len(), "sliced suspend body");

        let mut finisher = Finisher {
            decls: &mut ctx.decls,
            diagnostics: &mut ctx.diagnostics,
            machine: self,
            builtins: &builtins,
            live: &live,
            renamed: &renamed,
            spilled: &spilled,
            points: Vec::new(),
        };
        for stmt in &mut statements {
            match finisher.visit_stmt(stmt) {
                Ok(()) => {}
                Err(never) => match never {},
            }
        }

        LoweredBody {
            statements: self.dispatch(&mut ctx.decls, &builtins, suspend_result, statements),
            spilled_fields: spilled.into_values().collect(),
            suspension_points,
        }
    }

    /// Wrap the rewritten statements in the dispatch on `label`
    fn dispatch(
        &self,
        decls: &mut DeclTable,
        builtins: &Builtins,
        suspend_result: DeclId,
        statements: Vec<Stmt>,
    ) -> Vec<Stmt> {
        let mut builder = IrBuilder::new(decls, self.span);
        let exception = builder.variable("exception", self.invoke_suspend, Type::Any, false);
        let this = builder.get(self.this);

        // a failure delivered to the first resume is rethrown before dispatching
        let not_null = Expr::new(
            ExprKind::Unary {
                op: UnaryOp::Not,
                operand: Box::new(builder.binary(BinaryOp::RefEq, builder.get(exception), builder.null())),
            },
            Type::Bool,
            self.span,
        );
        let mut dispatched = vec![
            builder.declare_local(
                exception,
                Some(builder.call(builtins.result_exception_or_null, vec![builder.get(self.resumed_with)])),
            ),
            Stmt::Expr(builder.if_then(not_null, builder.throw(builder.get(exception)), None)),
        ];
        dispatched.extend(statements);

        let mut body = vec![
            builder.declare_local(suspend_result, None),
            Stmt::Expr(Expr::new(
                ExprKind::SuspendableExpression {
                    suspension_point_id: Box::new(builder.get_field(Some(this), self.label)),
                    result: Box::new(builder.block(dispatched, Type::Unit)),
                },
                Type::Unit,
                self.span,
            )),
        ];
        if self.return_type.is_unit() {
            body.push(Stmt::Expr(builder.ret(self.invoke_suspend, builder.unit())));
        }
        body
    }

    /// Locals saved across a point must be assignable when restored, so
    /// immutable ones are redeclared as fresh mutable variables
    fn make_live_locals_mutable(
        &self,
        decls: &mut DeclTable,
        live: &IndexMap<u32, Vec<DeclId>>,
        statements: &mut [Stmt],
    ) -> FxHashMap<DeclId, DeclId> {
        let mut renamed = FxHashMap::default();
        for &local in live.values().flatten() {
            if renamed.contains_key(&local) || decls.get(local).modifiers.mutable {
                continue;
            }
            let mut descriptor = decls.get(local).clone();
            descriptor.modifiers.mutable = true;
            descriptor.owner = Some(self.invoke_suspend);
            let fresh = decls.alloc(Descriptor {
                copied_from: Some(local),
                ..descriptor
            });
            renamed.insert(local, fresh);
        }
        if !renamed.is_empty() {
            let mut renamer = Renamer { renamed: &renamed };
            for stmt in statements {
                match renamer.visit_stmt(stmt) {
                    Ok(()) => {}
                    Err(never) => match never {},
                }
            }
        }
        renamed
    }
}

struct Renamer<'map> {
    renamed: &'map FxHashMap<DeclId, DeclId>,
}

impl MutVisitor for Renamer<'_> {
    type Error = Infallible;

    fn visit_stmt(&mut self, stmt: &mut Stmt) -> Result<(), Infallible> {
        if let Stmt::Variable(variable) = stmt
            && let Some(&fresh) = self.renamed.get(&variable.decl)
        {
            variable.decl = fresh;
        }
        walk_stmt_mut(self, stmt)
    }

    fn visit_expr(&mut self, expr: &mut Expr) -> Result<(), Infallible> {
        match &mut expr.kind {
            ExprKind::GetValue(decl) | ExprKind::SetValue { target: decl, .. } => {
                if let Some(&fresh) = self.renamed.get(decl) {
                    *decl = fresh;
                }
            }
            _ => {}
        }
        walk_expr_mut(self, expr)
    }
}

/// Retargets returns, moves parameter reads to fields and expands the
/// save/restore markers of each point
struct Finisher<'run> {
    decls: &'run mut DeclTable,
    diagnostics: &'run mut Diagnostics,
    machine: &'run StateMachine,
    builtins: &'run Builtins,
    live: &'run IndexMap<u32, Vec<DeclId>>,
    renamed: &'run FxHashMap<DeclId, DeclId>,
    spilled: &'run IndexMap<DeclId, DeclId>,
    /// Enclosing points as `(point, id variable)`
    points: Vec<(u32, DeclId)>,
}

impl Finisher<'_> {
    fn this(&self, span: FileSpan) -> Expr {
        Expr::new(
            ExprKind::GetValue(self.machine.this),
            Type::class(self.machine.class),
            span,
        )
    }

    fn spills(&self, point: u32) -> impl Iterator<Item = (DeclId, DeclId)> + '_ {
        self.live.get(&point).into_iter().flatten().filter_map(|local| {
            let field = *self.spilled.get(local)?;
            let value = self.renamed.get(local).copied().unwrap_or(*local);
            Some((value, field))
        })
    }

    fn save(&mut self, span: FileSpan) -> Option<Expr> {
        let &(point, id) = self.points.last()?;
        let spills: Vec<_> = self.spills(point).collect();
        let this = self.this(span);
        let builder = IrBuilder::new(self.decls, span);
        let mut statements: Vec<Stmt> = spills
            .into_iter()
            .map(|(local, field)| Stmt::Expr(builder.set_field(Some(this.clone()), field, builder.get(local))))
            .collect();
        statements.push(Stmt::Expr(builder.set_field(Some(this), self.machine.label, builder.get(id))));
        Some(transparent(statements, span))
    }

    fn restore(&mut self, span: FileSpan) -> Option<Expr> {
        let &(point, _) = self.points.last()?;
        let spills: Vec<_> = self.spills(point).collect();
        let this = self.this(span);
        let builder = IrBuilder::new(self.decls, span);
        let statements = spills
            .into_iter()
            .map(|(local, field)| Stmt::Expr(builder.set(local, builder.get_field(Some(this.clone()), field))))
            .collect();
        Some(transparent(statements, span))
    }
}

fn transparent(statements: Vec<Stmt>, span: FileSpan) -> Expr {
    Expr::new(
        ExprKind::Block {
            statements,
            origin: BlockOrigin::Transparent,
        },
        Type::Unit,
        span,
    )
}

impl MutVisitor for Finisher<'_> {
    type Error = Infallible;

    // nested classes are lowered separately and capture nothing
    fn visit_class(&mut self, _class: &mut Class) -> Result<(), Infallible> {
        Ok(())
    }

    fn visit_expr(&mut self, expr: &mut Expr) -> Result<(), Infallible> {
        if let ExprKind::SuspensionPoint { id, point, .. } = expr.kind {
            self.points.push((point, id));
            let result = walk_expr_mut(self, expr);
            self.points.pop();
            return result;
        }
        walk_expr_mut(self, expr)?;

        let span = expr.span;
        match &mut expr.kind {
            ExprKind::Return { target, .. } if *target == self.machine.function => {
                *target = self.machine.invoke_suspend;
            }
            ExprKind::GetValue(decl) => {
                if let Some(&field) = self.machine.parameter_fields.get(decl) {
                    expr.kind = ExprKind::GetField {
                        receiver: Some(Box::new(self.this(span))),
                        field,
                    };
                }
            }
            ExprKind::SetValue { target, .. } => {
                if self.machine.parameter_fields.contains_key(target) {
                    let name = self.decls.name(*target);
                    self.diagnostics.error(
                        format!("assignment to captured variable `{name}` inside a suspend lambda is not supported"),
                        span,
                    );
                }
            }
            ExprKind::Call(call) if call.callee == self.builtins.save_state => {
                if let Some(save) = self.save(span) {
                    *expr = save;
                }
            }
            ExprKind::Call(call) if call.callee == self.builtins.restore_state => {
                if let Some(restore) = self.restore(span) {
                    *expr = restore;
                }
            }
            _ => {}
        }
        Ok(())
    }
}
