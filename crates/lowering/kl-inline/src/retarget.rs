//! Retargeting of code outside inlined bodies.
//!
//! A local class copied into a call site is a new class. Code that got
//! hold of an instance (through the call's result) still names the
//! original, so calls to its members and variables of its type are
//! pointed at the most recent copy.

use kl_copy::GlobalSubstitutionMap;
use kl_ir::visit::{walk_expr_mut, walk_function_mut, walk_module_mut, walk_stmt_mut};
use kl_ir::{
    DeclId, DeclKind, DeclTable, Descriptor, Expr, ExprKind, Function, IrModule, MutVisitor, Signature, Stmt, Type,
};
use kl_pass::{LoweringContext, LoweringError};
use rustc_hash::FxHashMap;
use tracing::debug;

pub(crate) fn retarget_external_references(
    ctx: &mut LoweringContext,
    module: &mut IrModule,
) -> Result<(), LoweringError> {
    let global = &ctx.caches.global_substitutions;
    if global.is_empty() {
        return Ok(());
    }
    let mut retargeter = Retargeter {
        decls: &mut ctx.decls,
        global,
        scopes: Vec::new(),
        variables: FxHashMap::default(),
        retargeted: 0,
    };
    walk_module_mut(&mut retargeter, module)?;
    debug!(retargeted = retargeter.retargeted, "retargeted references to copied declarations");
    Ok(())
}

struct Retargeter<'ctx> {
    decls: &'ctx mut DeclTable,
    global: &'ctx GlobalSubstitutionMap,
    scopes: Vec<DeclId>,
    variables: FxHashMap<DeclId, DeclId>,
    retargeted: usize,
}

impl Retargeter<'_> {
    /// Replacement for `original`, unless we are inside the function
    /// whose expansion produced it
    fn replacement(&self, original: DeclId) -> Result<Option<DeclId>, LoweringError> {
        let Some(entry) = self.global.resolve(original)? else {
            return Ok(None);
        };
        if self.scopes.contains(&entry.inlined_function) || entry.replacement == original {
            return Ok(None);
        }
        Ok(Some(entry.replacement))
    }

    fn retarget_variable(&mut self, variable: DeclId) -> Result<Option<DeclId>, LoweringError> {
        let Some(Type::Class { class, args }) = self.decls.value_type(variable).cloned() else {
            return Ok(None);
        };
        let Some(replacement) = self.replacement(class)? else {
            return Ok(None);
        };
        let original = self.decls.get(variable).clone();
        let retyped = self.decls.alloc(Descriptor {
            signature: Signature::Value(Type::Class {
                class: replacement,
                args,
            }),
            copied_from: Some(variable),
            ..original
        });
        self.variables.insert(variable, retyped);
        self.retargeted += 1;
        Ok(Some(retyped))
    }
}

impl MutVisitor for Retargeter<'_> {
    type Error = LoweringError;

    fn visit_function(&mut self, function: &mut Function) -> Result<(), LoweringError> {
        self.scopes.push(function.decl);
        let result = walk_function_mut(self, function);
        self.scopes.pop();
        result
    }

    fn visit_stmt(&mut self, stmt: &mut Stmt) -> Result<(), LoweringError> {
        walk_stmt_mut(self, stmt)?;
        if let Stmt::Variable(variable) = stmt
            && let Some(retyped) = self.retarget_variable(variable.decl)?
        {
            variable.decl = retyped;
        }
        Ok(())
    }

    fn visit_expr(&mut self, expr: &mut Expr) -> Result<(), LoweringError> {
        walk_expr_mut(self, expr)?;
        match &mut expr.kind {
            ExprKind::GetValue(decl) => {
                if let Some(&retyped) = self.variables.get(decl) {
                    *decl = retyped;
                    if let Some(ty) = self.decls.value_type(retyped) {
                        expr.ty = ty.clone();
                    }
                }
            }
            ExprKind::SetValue { target, .. } => {
                if let Some(&retyped) = self.variables.get(target) {
                    *target = retyped;
                }
            }
            ExprKind::Call(call) => {
                if let Some(replacement) = self.replacement(call.callee)?
                    && matches!(self.decls.get(replacement).kind, DeclKind::Function | DeclKind::Constructor)
                {
                    call.callee = replacement;
                    expr.ty = self.decls.return_type(replacement);
                    self.retargeted += 1;
                }
            }
            _ => {}
        }
        Ok(())
    }
}
