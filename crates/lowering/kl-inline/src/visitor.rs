//! Walk that finds and expands inline call sites

use crate::inliner::Inliner;
use crate::provider::InlineBodyProvider;
use kl_ir::visit::{walk_expr_mut, walk_function_mut};
use kl_ir::{DeclId, DeclKind, DeclTable, Expr, ExprKind, Function, Literal, MutVisitor};
use kl_pass::{LoweringContext, LoweringError};
use kl_span::FileSpan;
use rustc_hash::FxHashMap;
use std::mem;
use tracing::debug;

/// Whether calls to `callee` are expanded in place. Intrinsics such as
/// `runWithoutSuspension` carry the inline marker but stay calls.
pub(crate) fn needs_inlining(decls: &DeclTable, callee: DeclId) -> bool {
    let descriptor = decls.get(callee);
    descriptor.modifiers.inline && descriptor.kind == DeclKind::Function && descriptor.intrinsic.is_none()
}

/// Post-order walk expanding every call to an inline function
pub(crate) struct InlineVisitor<'run> {
    pub(crate) ctx: &'run mut LoweringContext,
    provider: &'run dyn InlineBodyProvider,
    index: &'run FxHashMap<DeclId, Function>,
    in_progress: Vec<DeclId>,
    scopes: Vec<DeclId>,
}

impl<'run> InlineVisitor<'run> {
    pub(crate) fn new(
        ctx: &'run mut LoweringContext,
        provider: &'run dyn InlineBodyProvider,
        index: &'run FxHashMap<DeclId, Function>,
    ) -> Self {
        Self {
            ctx,
            provider,
            index,
            in_progress: Vec::new(),
            scopes: Vec::new(),
        }
    }

    pub(crate) fn inline_if_needed(&mut self, expr: &mut Expr) -> Result<(), LoweringError> {
        let ExprKind::Call(call) = &expr.kind else {
            return Ok(());
        };
        let callee = call.callee;
        if !needs_inlining(&self.ctx.decls, callee) {
            return Ok(());
        }
        let Some(declaration) = self.function_declaration(callee, expr.span)? else {
            return Ok(());
        };

        let kind = mem::replace(&mut expr.kind, ExprKind::Const(Literal::Unit));
        let ExprKind::Call(call) = kind else {
            expr.kind = kind;
            return Ok(());
        };
        debug!(callee = %self.ctx.decls.name(callee), "inlining call");
        let mut inliner = Inliner::new(self.scopes.last().copied());
        *expr = inliner.inline_function(self, *call, &declaration, expr.span)?;
        Ok(())
    }

    /// Body of `callee` with its own inline calls expanded, or `None`
    /// after warning that it cannot be obtained
    fn function_declaration(&mut self, callee: DeclId, span: FileSpan) -> Result<Option<Function>, LoweringError> {
        if let Some(expanded) = self.ctx.caches.inline_bodies.get(&callee) {
            return Ok(Some(expanded.clone()));
        }
        if self.in_progress.contains(&callee) {
            return Err(LoweringError::RecursiveInline {
                callee: self.ctx.decls.name(callee),
                span,
            });
        }

        let found = match self.index.get(&callee) {
            Some(function) => Some(function.clone()),
            None => self.provider.inline_body(&mut self.ctx.decls, callee),
        };
        let Some(mut function) = found.filter(|function| function.body.is_some()) else {
            let name = self.ctx.decls.name(callee);
            self.ctx
                .diagnostics
                .warning(format!("failed to obtain inline function declaration `{name}`"), span);
            return Ok(None);
        };

        self.in_progress.push(callee);
        let expanded = self.visit_function(&mut function);
        self.in_progress.pop();
        expanded?;

        self.ctx.caches.inline_bodies.insert(callee, function.clone());
        Ok(Some(function))
    }
}

impl MutVisitor for InlineVisitor<'_> {
    type Error = LoweringError;

    fn visit_function(&mut self, function: &mut Function) -> Result<(), LoweringError> {
        self.scopes.push(function.decl);
        let result = walk_function_mut(self, function);
        self.scopes.pop();
        result
    }

    fn visit_expr(&mut self, expr: &mut Expr) -> Result<(), LoweringError> {
        walk_expr_mut(self, expr)?;
        self.inline_if_needed(expr)
    }
}
