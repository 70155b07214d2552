//! Per-file rewriting of suspend functions and suspend lambdas

use crate::builder::{build_coroutine, start_body};
use crate::capture::free_variables;
use crate::classify::{SuspendFunctionKind, classify, simplify_delegating};
use kl_ir::visit::walk_expr_mut;
use kl_ir::{Call, Class, Declaration, Expr, ExprKind, Function, IrFile, Literal, MutVisitor, Stmt, Type};
use kl_pass::{LoweringContext, LoweringError};
use std::mem;
use tracing::{debug, trace};

/// Walks one file, lowering nested suspend code before the function
/// that contains it
pub(crate) struct SuspendLowering<'ctx> {
    ctx: &'ctx mut LoweringContext,
    /// Classes of suspend lambdas, placed at the end of the file
    lifted: Vec<Declaration>,
}

impl<'ctx> SuspendLowering<'ctx> {
    pub(crate) fn new(ctx: &'ctx mut LoweringContext) -> Self {
        Self {
            ctx,
            lifted: Vec::new(),
        }
    }

    pub(crate) fn lower_file(mut self, file: &mut IrFile) -> Result<(), LoweringError> {
        let declarations = mem::take(&mut file.declarations);
        file.declarations = self.lower_declarations(declarations)?;
        file.declarations.append(&mut self.lifted);
        Ok(())
    }

    fn lower_declarations(&mut self, declarations: Vec<Declaration>) -> Result<Vec<Declaration>, LoweringError> {
        let mut lowered = Vec::with_capacity(declarations.len());
        for declaration in declarations {
            match declaration {
                Declaration::Function(mut function) => {
                    self.visit_function(&mut function)?;
                    if let Some(class) = self.lower_suspend_function(&mut function, false) {
                        lowered.push(Declaration::Class(class));
                    }
                    lowered.push(Declaration::Function(function));
                }
                Declaration::Class(mut class) => {
                    self.visit_class(&mut class)?;
                    lowered.push(Declaration::Class(class));
                }
                Declaration::Field(mut field) => {
                    if let Some(initializer) = &mut field.initializer {
                        self.visit_expr(initializer)?;
                    }
                    lowered.push(Declaration::Field(field));
                }
            }
        }
        Ok(lowered)
    }

    fn lower_statements(&mut self, statements: &mut Vec<Stmt>) -> Result<(), LoweringError> {
        let mut lowered = Vec::with_capacity(statements.len());
        for mut stmt in mem::take(statements) {
            self.visit_stmt(&mut stmt)?;
            if let Stmt::Function(function) = &mut stmt
                && let Some(class) = self.lower_suspend_function(function, true)
            {
                lowered.push(Stmt::Class(class));
            }
            lowered.push(stmt);
        }
        *statements = lowered;
        Ok(())
    }

    /// Returns the coroutine class when `function` needs a state machine
    fn lower_suspend_function(&mut self, function: &mut Function, local: bool) -> Option<Class> {
        let descriptor = self.ctx.decls.get(function.decl);
        if !descriptor.modifiers.suspend || descriptor.modifiers.is_abstract || function.body.is_none() {
            return None;
        }
        match classify(&self.ctx.decls, function, false) {
            SuspendFunctionKind::NoSuspendCalls => None,
            SuspendFunctionKind::Delegating(call) => {
                trace!(function = %self.ctx.decls.name(function.decl), "delegating suspend function");
                simplify_delegating(&self.ctx.decls, function, call);
                None
            }
            SuspendFunctionKind::NeedsStateMachine => {
                let name = self.ctx.decls.name(function.decl);
                if local && let Some(&captured) = free_variables(&self.ctx.decls, function).first() {
                    let variable = self.ctx.decls.name(captured);
                    self.ctx.diagnostics.error(
                        format!("local suspend function `{name}` captures `{variable}` and cannot be turned into a state machine"),
                        function.span,
                    );
                    return None;
                }
                debug!(function = %name, "building state machine");
                let built = build_coroutine(self.ctx, function.clone(), None);
                function.body = Some(start_body(self.ctx, function, &built.info));
                self.ctx.caches.coroutines.insert(function.decl, built.info);
                Some(built.class)
            }
        }
    }

    /// Replace a suspend lambda by a call of its class's factory
    fn lower_suspend_lambda(&mut self, expr: &mut Expr) -> Result<(), LoweringError> {
        let kind = mem::replace(&mut expr.kind, ExprKind::Const(Literal::Unit));
        let ExprKind::Lambda(function) = kind else {
            expr.kind = kind;
            return Ok(());
        };
        let captured = free_variables(&self.ctx.decls, &function);
        let decl = function.decl;
        debug!(lambda = %self.ctx.decls.name(decl), captured = captured.len(), "building suspend lambda class");
        let built = build_coroutine(self.ctx, *function, Some(&captured));
        let Some(factory) = built.info.factory else {
            return Err(LoweringError::Malformed {
                message: format!("state machine of suspend lambda `{}` has no factory", self.ctx.decls.name(decl)),
                span: expr.span,
            });
        };
        let args = captured
            .iter()
            .map(|&variable| {
                let ty = self.ctx.decls.value_type(variable).cloned().unwrap_or(Type::Any);
                Expr::new(ExprKind::GetValue(variable), ty, expr.span)
            })
            .collect();
        // keeps the lambda's function type
        expr.kind = ExprKind::Call(Box::new(Call::new(factory, args)));
        self.lifted.push(Declaration::Class(built.class));
        self.ctx.caches.coroutines.insert(decl, built.info);
        Ok(())
    }
}

impl MutVisitor for SuspendLowering<'_> {
    type Error = LoweringError;

    fn visit_function(&mut self, function: &mut Function) -> Result<(), LoweringError> {
        let params = function
            .dispatch_receiver
            .iter_mut()
            .chain(function.extension_receiver.iter_mut())
            .chain(function.params.iter_mut());
        for param in params {
            if let Some(default) = &mut param.default {
                self.visit_expr(default)?;
            }
        }
        if let Some(body) = &mut function.body {
            self.lower_statements(body)?;
        }
        Ok(())
    }

    fn visit_class(&mut self, class: &mut Class) -> Result<(), LoweringError> {
        let declarations = mem::take(&mut class.declarations);
        class.declarations = self.lower_declarations(declarations)?;
        Ok(())
    }

    fn visit_expr(&mut self, expr: &mut Expr) -> Result<(), LoweringError> {
        match &mut expr.kind {
            ExprKind::Block { statements, .. } | ExprKind::ReturnableBlock { statements, .. } => {
                return self.lower_statements(statements);
            }
            _ => walk_expr_mut(self, expr)?,
        }
        if let ExprKind::Lambda(function) = &expr.kind
            && self.ctx.decls.is_suspend(function.decl)
        {
            return self.lower_suspend_lambda(expr);
        }
        Ok(())
    }
}
