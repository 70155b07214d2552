//! Function inlining.
//!
//! Every call to an inline function is replaced by a returnable block
//! holding a fresh copy of the callee's body. Arguments are evaluated
//! once, in order, into temporaries unless they are plain reads of
//! immutable values. Lambdas passed to inline parameters are expanded
//! where they are invoked instead of being materialized.

mod inliner;
mod provider;
mod retarget;
mod visitor;

pub use provider::{InlineBodyProvider, ModuleBodies, NoExternalBodies};

use kl_ir::visit::{walk_expr, walk_file, walk_file_mut};
use kl_ir::{DeclId, Expr, ExprKind, Function, IrModule, Visitor};
use kl_pass::{Leftover, LoweringContext, LoweringError, LoweringPass};
use rustc_hash::FxHashMap;
use std::fmt;
use tracing::{debug, info};
use visitor::{InlineVisitor, needs_inlining};

/// The inlining pass
pub struct FunctionInlining {
    provider: Box<dyn InlineBodyProvider>,
}

impl FunctionInlining {
    /// Pass drawing external bodies from `provider`
    pub fn new(provider: impl InlineBodyProvider + 'static) -> Self {
        Self {
            provider: Box::new(provider),
        }
    }
}

impl Default for FunctionInlining {
    fn default() -> Self {
        Self::new(NoExternalBodies)
    }
}

impl fmt::Debug for FunctionInlining {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_struct("FunctionInlining").finish_non_exhaustive()
    }
}

impl LoweringPass for FunctionInlining {
    fn name(&self) -> &'static str {
        "inline"
    }

    fn lower(&mut self, ctx: &mut LoweringContext, module: &mut IrModule) -> Result<(), LoweringError> {
        let index = provider::index_functions(module, |decl| ctx.decls.get(decl).modifiers.inline);
        info!(candidates = index.len(), "inlining");

        let mut visitor = InlineVisitor::new(ctx, self.provider.as_ref(), &index);
        for file in &mut module.files {
            debug!(file = %file.name, "inlining calls");
            walk_file_mut(&mut visitor, file)?;
        }

        retarget::retarget_external_references(ctx, module)
    }

    fn leftovers(&self, ctx: &LoweringContext, module: &IrModule) -> Vec<Leftover> {
        // Calls whose body was unavailable were already reported as warnings
        let available = provider::index_functions(module, |decl| ctx.decls.get(decl).modifiers.inline);
        let mut finder = RemainingCalls {
            ctx,
            available: &available,
            found: Vec::new(),
        };
        for file in &module.files {
            walk_file(&mut finder, file);
        }
        finder.found
    }
}

struct RemainingCalls<'ctx> {
    ctx: &'ctx LoweringContext,
    available: &'ctx FxHashMap<DeclId, Function>,
    found: Vec<Leftover>,
}

impl Visitor for RemainingCalls<'_> {
    fn visit_expr(&mut self, expr: &Expr) {
        if let ExprKind::Call(call) = &expr.kind
            && needs_inlining(&self.ctx.decls, call.callee)
            && self.available.contains_key(&call.callee)
        {
            self.found.push(Leftover {
                pass: "inline",
                construct: format!("call to inline function `{}`", self.ctx.decls.name(call.callee)),
                span: expr.span,
            });
        }
        walk_expr(self, expr);
    }
}
