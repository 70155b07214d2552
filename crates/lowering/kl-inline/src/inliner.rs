//! Expansion of a single call site

use crate::visitor::InlineVisitor;
use kl_copy::{DeepCopier, TypeSubstitutor};
use kl_ir::visit::walk_expr_mut;
use kl_ir::{
    Call, DeclId, DeclKind, DeclTable, Descriptor, Expr, ExprKind, Function, MutVisitor, Signature, Stmt, Type,
    Variable,
};
use kl_pass::LoweringError;
use kl_span::FileSpan;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::mem;
use tracing::trace;

/// Expands calls to one inline function and the lambdas passed to it.
///
/// Every copy made while expanding a call site goes through the same
/// [`DeepCopier`], so the history it publishes covers the whole site.
pub(crate) struct Inliner {
    copier: DeepCopier,
    scope_owner: Option<DeclId>,
    substitutions: FxHashMap<DeclId, Expr>,
}

impl Inliner {
    pub(crate) fn new(scope_owner: Option<DeclId>) -> Self {
        Self {
            copier: DeepCopier::new(scope_owner),
            scope_owner,
            substitutions: FxHashMap::default(),
        }
    }

    /// Replace `call` with a returnable block holding a fresh copy of
    /// `callee`'s body. `callee` must already be free of inline calls.
    pub(crate) fn inline_function(
        &mut self,
        visitor: &mut InlineVisitor<'_>,
        call: Call,
        callee: &Function,
        span: FileSpan,
    ) -> Result<Expr, LoweringError> {
        let types =
            (!callee.type_params.is_empty()).then(|| TypeSubstitutor::new(&callee.type_params, &call.type_args));
        let mut copy = self
            .copier
            .copy_function(&mut visitor.ctx.decls, callee, types.as_ref());
        let evaluation = self.evaluate_arguments(visitor, call, &copy, callee.decl, span)?;
        self.copier
            .record_into(&mut visitor.ctx.caches.global_substitutions, callee.decl);

        let mut statements = copy.body.take().unwrap_or_default();
        for stmt in &mut statements {
            self.substitute_stmt(visitor, stmt)?;
        }

        let return_type = visitor.ctx.decls.return_type(copy.decl);
        let target = visitor.ctx.decls.get_mut(copy.decl);
        target.kind = DeclKind::ReturnTarget;
        target.owner = self.scope_owner;
        target.signature = Signature::ReturnTarget(return_type.clone());

        trace!(callee = %visitor.ctx.decls.name(callee.decl), "expanded call site");
        let mut block = evaluation;
        block.extend(statements);
        Ok(Expr::new(
            ExprKind::ReturnableBlock {
                target: copy.decl,
                statements: block,
                inlined_from: Some(callee.decl),
            },
            return_type,
            span,
        ))
    }

    /// Bind every parameter of `copy` to the expression its uses become,
    /// emitting temporaries for arguments that must be evaluated once
    fn evaluate_arguments(
        &mut self,
        visitor: &mut InlineVisitor<'_>,
        call: Call,
        copy: &Function,
        original: DeclId,
        span: FileSpan,
    ) -> Result<Vec<Stmt>, LoweringError> {
        let bindings = bind_arguments(&visitor.ctx.decls, call, copy, original, span)?;
        let hint = visitor.ctx.decls.name(original);
        let mut statements = Vec::new();

        for (param, argument) in bindings {
            let decls = &visitor.ctx.decls;
            if decls.accepts_inline_lambda(param) && is_inlinable_lambda(decls, &argument) {
                self.substitutions.insert(param, argument);
                continue;
            }

            let immutable = is_immutable_read(decls, &argument);
            let mut value = argument;
            self.substitute_expr(visitor, &mut value)?;
            if immutable {
                self.substitutions.insert(param, value);
                continue;
            }

            let temporary = self.temporary(&mut visitor.ctx.decls, &hint, value.ty.clone());
            let read = Expr::new(ExprKind::GetValue(temporary), value.ty.clone(), value.span);
            statements.push(Stmt::Variable(Variable {
                decl: temporary,
                initializer: Some(value),
                span,
            }));
            self.substitutions.insert(param, read);
        }
        Ok(statements)
    }

    fn temporary(&self, decls: &mut DeclTable, hint: &str, ty: Type) -> DeclId {
        let index = decls.next_temporary_index();
        let name = decls.intern(&format!("tmp{index}_{hint}"));
        decls.alloc(Descriptor::new(
            name,
            DeclKind::Variable,
            self.scope_owner,
            Signature::Value(ty),
        ))
    }

    fn substitute_expr(&mut self, visitor: &mut InlineVisitor<'_>, expr: &mut Expr) -> Result<(), LoweringError> {
        Substitutor { inliner: self, visitor }.visit_expr(expr)
    }

    fn substitute_stmt(&mut self, visitor: &mut InlineVisitor<'_>, stmt: &mut Stmt) -> Result<(), LoweringError> {
        Substitutor { inliner: self, visitor }.visit_stmt(stmt)
    }
}

/// Pair parameters of `copy` with call arguments. Receivers come first,
/// then value arguments in order, then defaults for omitted ones.
fn bind_arguments(
    decls: &DeclTable,
    call: Call,
    copy: &Function,
    original: DeclId,
    span: FileSpan,
) -> Result<Vec<(DeclId, Expr)>, LoweringError> {
    let Call {
        dispatch_receiver,
        extension_receiver,
        args,
        ..
    } = call;
    let callee = decls.name(original);
    let mut values: VecDeque<Option<Expr>> = args.into();
    let mut bindings = Vec::new();

    if let (Some(param), Some(receiver)) = (&copy.dispatch_receiver, dispatch_receiver) {
        bindings.push((param.decl, receiver));
    }
    match (&copy.extension_receiver, extension_receiver) {
        (Some(param), Some(receiver)) => bindings.push((param.decl, receiver)),
        // A lambda with receiver invoked like a plain lambda
        (Some(param), None) => match values.pop_front().flatten() {
            Some(receiver) => bindings.push((param.decl, receiver)),
            None => {
                return Err(LoweringError::MissingArgument {
                    callee,
                    index: 0,
                    span,
                });
            }
        },
        (None, Some(receiver)) => values.push_front(Some(receiver)),
        (None, None) => {}
    }

    if values.len() > copy.params.len() {
        return Err(LoweringError::TooManyArguments {
            callee,
            given: values.len(),
            expected: copy.params.len(),
            span,
        });
    }

    let mut defaults = Vec::new();
    for (index, param) in copy.params.iter().enumerate() {
        match values.get_mut(index).and_then(Option::take) {
            Some(argument) => bindings.push((param.decl, argument)),
            None => match &param.default {
                Some(default) => defaults.push((param.decl, default.clone())),
                None if decls.get(param.decl).modifiers.vararg => {
                    bindings.push((param.decl, empty_vararg(decls, param.decl, span)));
                }
                None => {
                    return Err(LoweringError::MissingArgument {
                        callee,
                        index,
                        span,
                    });
                }
            },
        }
    }
    bindings.extend(defaults);
    Ok(bindings)
}

fn empty_vararg(decls: &DeclTable, param: DeclId, span: FileSpan) -> Expr {
    let ty = decls.value_type(param).cloned().unwrap_or(Type::Any);
    let element_type = match &ty {
        Type::Array(element) => (**element).clone(),
        other => other.clone(),
    };
    Expr::new(
        ExprKind::Vararg {
            element_type,
            elements: Vec::new(),
        },
        ty,
        span,
    )
}

fn is_inlinable_lambda(decls: &DeclTable, argument: &Expr) -> bool {
    match &argument.kind {
        ExprKind::Lambda(_) => true,
        ExprKind::FunctionReference { target, .. } => !decls.is_suspend(*target),
        _ => false,
    }
}

fn is_immutable_read(decls: &DeclTable, argument: &Expr) -> bool {
    let ExprKind::GetValue(decl) = argument.kind else {
        return false;
    };
    let descriptor = decls.get(decl);
    match descriptor.kind {
        DeclKind::ValueParameter => true,
        DeclKind::Variable => !descriptor.modifiers.mutable,
        _ => false,
    }
}

/// Rewrites parameter uses inside one expansion
struct Substitutor<'sub, 'run> {
    inliner: &'sub mut Inliner,
    visitor: &'sub mut InlineVisitor<'run>,
}

impl Substitutor<'_, '_> {
    /// `param(args)` where `param` is bound to a lambda or reference
    fn inline_invocation(&mut self, expr: &mut Expr) -> Result<bool, LoweringError> {
        let ExprKind::Invoke { callee, .. } = &expr.kind else {
            return Ok(false);
        };
        let ExprKind::GetValue(param) = callee.kind else {
            return Ok(false);
        };
        let Some(bound) = self.inliner.substitutions.get(&param).cloned() else {
            return Ok(false);
        };
        let span = expr.span;

        match bound.kind {
            ExprKind::Lambda(function) => {
                let args = take_invoke_args(expr);
                let call = Call::new(function.decl, args);
                let mut inlined = self
                    .inliner
                    .inline_function(&mut *self.visitor, call, &function, span)?;
                walk_expr_mut(self, &mut inlined)?;
                *expr = inlined;
                Ok(true)
            }
            ExprKind::FunctionReference {
                target,
                dispatch_receiver,
                extension_receiver,
            } => {
                let decls = &mut self.visitor.ctx.decls;
                let Some(signature) = decls.function_signature(target).cloned() else {
                    return Ok(false);
                };
                let mut args: VecDeque<Expr> = take_invoke_args(expr).into();
                let mut bound_receiver = |receiver: Option<Box<Expr>>, declared: bool, args: &mut VecDeque<Expr>| {
                    match receiver {
                        Some(receiver) => Some(self.inliner.copier.copy_expr(decls, &receiver, None)),
                        None if declared => args.pop_front(),
                        None => None,
                    }
                };
                let dispatch = bound_receiver(dispatch_receiver, signature.dispatch_receiver.is_some(), &mut args);
                let extension = bound_receiver(extension_receiver, signature.extension_receiver.is_some(), &mut args);
                let call = Call {
                    callee: target,
                    type_args: Vec::new(),
                    dispatch_receiver: dispatch,
                    extension_receiver: extension,
                    args: args.into_iter().map(Some).collect(),
                };
                let mut direct = Expr::new(ExprKind::Call(Box::new(call)), signature.return_type, span);
                walk_expr_mut(self, &mut direct)?;
                self.visitor.inline_if_needed(&mut direct)?;
                *expr = direct;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

fn take_invoke_args(expr: &mut Expr) -> Vec<Expr> {
    match &mut expr.kind {
        ExprKind::Invoke { args, .. } => mem::take(args),
        _ => Vec::new(),
    }
}

impl MutVisitor for Substitutor<'_, '_> {
    type Error = LoweringError;

    fn visit_expr(&mut self, expr: &mut Expr) -> Result<(), LoweringError> {
        if self.inline_invocation(expr)? {
            return Ok(());
        }
        if let ExprKind::GetValue(decl) = expr.kind
            && let Some(mut argument) = self.inliner.substitutions.get(&decl).cloned()
        {
            walk_expr_mut(self, &mut argument)?;
            *expr = self
                .inliner
                .copier
                .copy_expr(&mut self.visitor.ctx.decls, &argument, None);
            return Ok(());
        }
        walk_expr_mut(self, expr)
    }
}
