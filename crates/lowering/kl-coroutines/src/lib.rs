//! Lowering of suspend functions and suspend lambdas into state machines.
//!
//! Each suspend function is classified first. Functions without suspend
//! calls are left alone, and a function whose only suspend call is its
//! result simply returns that call. Everything else gets a class derived
//! from `ContinuationImpl`: parameters and the locals live across a
//! suspension point become fields, the body moves into `invokeSuspend`
//! and dispatches on `label`, and the original function just creates an
//! instance and runs it. Suspend lambdas always get a class; the lambda
//! expression becomes a call of the class's factory constructor.

mod builder;
mod capture;
mod classify;
mod liveness;
mod lowering;
mod machine;
mod slicer;

pub use classify::{SuspendFunctionKind, classify};

use kl_ir::visit::{walk_expr, walk_file, walk_function};
use kl_ir::{Expr, ExprKind, Function, IrFile, Visitor};
use kl_pass::{FileLoweringPass, Leftover, LoweringContext, LoweringError};
use lowering::SuspendLowering;
use tracing::info;

/// The coroutine pass; run it through [`kl_pass::PerFile`]
#[derive(Debug, Clone, Copy, Default)]
pub struct SuspendFunctionsLowering;

impl FileLoweringPass for SuspendFunctionsLowering {
    fn name(&self) -> &'static str {
        "coroutines"
    }

    fn lower_file(&mut self, ctx: &mut LoweringContext, file: &mut IrFile) -> Result<(), LoweringError> {
        let before = ctx.caches.coroutines.len();
        SuspendLowering::new(ctx).lower_file(file)?;
        info!(
            file = %file.name,
            state_machines = ctx.caches.coroutines.len() - before,
            "lowered suspend functions"
        );
        Ok(())
    }

    fn file_leftovers(&self, ctx: &LoweringContext, file: &IrFile) -> Vec<Leftover> {
        let mut finder = Unlowered { ctx, found: Vec::new() };
        walk_file(&mut finder, file);
        finder.found
    }
}

/// Markers that were never expanded, suspend lambdas and suspend bodies
/// still needing a state machine
struct Unlowered<'ctx> {
    ctx: &'ctx LoweringContext,
    found: Vec<Leftover>,
}

impl Unlowered<'_> {
    fn report(&mut self, construct: String, span: kl_span::FileSpan) {
        self.found.push(Leftover {
            pass: "coroutines",
            construct,
            span,
        });
    }
}

impl Visitor for Unlowered<'_> {
    fn visit_function(&mut self, function: &Function) {
        let decls = &self.ctx.decls;
        let descriptor = decls.get(function.decl);
        if descriptor.modifiers.suspend
            && !descriptor.modifiers.lambda
            && classify(decls, function, false) == SuspendFunctionKind::NeedsStateMachine
        {
            let name = decls.name(function.decl);
            self.report(format!("suspend function `{name}` without a state machine"), function.span);
        }
        walk_function(self, function);
    }

    fn visit_expr(&mut self, expr: &Expr) {
        let builtins = self.ctx.decls.builtins();
        match &expr.kind {
            ExprKind::Call(call) if call.callee == builtins.save_state || call.callee == builtins.restore_state => {
                let marker = self.ctx.decls.name(call.callee);
                self.report(format!("unexpanded `{marker}` marker"), expr.span);
            }
            ExprKind::Lambda(function) if self.ctx.decls.is_suspend(function.decl) => {
                self.report("suspend lambda".to_string(), expr.span);
            }
            _ => {}
        }
        walk_expr(self, expr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kl_ir::visit::any_expr;
    use kl_ir::{
        BinaryOp, DeclId, DeclTable, Declaration, IrBuilder, IrModule, Modifiers, Stmt, Type, verify_module,
    };
    use kl_pass::{LoweringPass, PerFile};
    use kl_span::{FileId, FileSpan};

    fn suspend() -> Modifiers {
        Modifiers {
            suspend: true,
            ..Modifiers::default()
        }
    }

    fn module(declarations: Vec<Declaration>) -> IrModule {
        IrModule {
            name: "test".to_string(),
            files: vec![IrFile {
                name: "test.kl".to_string(),
                file_id: FileId(0),
                declarations,
            }],
        }
    }

    fn lower(ctx: &mut LoweringContext, module: &mut IrModule) -> Vec<Leftover> {
        let mut pass = PerFile(SuspendFunctionsLowering);
        pass.lower(ctx, module).unwrap();
        pass.leftovers(ctx, module)
    }

    fn declared_names(module: &IrModule, decls: &DeclTable) -> Vec<String> {
        module.files[0]
            .declarations
            .iter()
            .map(|declaration| decls.name(declaration.decl()))
            .collect()
    }

    fn find<'module>(module: &'module IrModule, decls: &DeclTable, name: &str) -> &'module Function {
        module.files[0]
            .declarations
            .iter()
            .find_map(|declaration| match declaration {
                Declaration::Function(function) if decls.name(function.decl) == name => Some(function),
                _ => None,
            })
            .unwrap()
    }

    fn body_contains(function: &Function, predicate: &mut dyn FnMut(&Expr) -> bool) -> bool {
        function.body.iter().flatten().any(|stmt| match stmt {
            Stmt::Expr(expr) => any_expr(expr, predicate),
            Stmt::Variable(variable) => variable
                .initializer
                .as_ref()
                .is_some_and(|initializer| any_expr(initializer, predicate)),
            _ => false,
        })
    }

    fn points(function: &Function) -> Vec<u32> {
        let mut found = Vec::new();
        body_contains(function, &mut |expr| {
            if let ExprKind::SuspensionPoint { point, .. } = expr.kind {
                found.push(point);
            }
            false
        });
        found
    }

    /// External `suspend fun suspendingCall(x: Int): String`
    fn suspending_call(b: &mut IrBuilder<'_>) -> Function {
        b.function("suspendingCall", None, &[("x", Type::Int)], Type::String, suspend())
    }

    #[test]
    fn test_function_without_suspend_calls_is_untouched() {
        let mut decls = DeclTable::new();
        let mut b = IrBuilder::new(&mut decls, FileSpan::default());
        let mut f = b.function("f", None, &[], Type::Int, suspend());
        f.body = Some(vec![Stmt::Expr(b.ret(f.decl, b.int(1)))]);
        let original = f.clone();
        let mut ctx = LoweringContext::new(decls);
        let mut module = module(vec![Declaration::Function(f)]);

        assert!(lower(&mut ctx, &mut module).is_empty());
        assert_eq!(find(&module, &ctx.decls, "f"), &original);
        assert!(ctx.caches.coroutines.is_empty());
    }

    #[test]
    fn test_delegating_call_loses_its_unwrap() {
        let mut decls = DeclTable::new();
        let unwrap = decls.builtins().return_if_suspended;
        let mut b = IrBuilder::new(&mut decls, FileSpan::default());
        let g = b.function("g", None, &[], Type::Int, suspend());
        let mut f = b.function("f", None, &[], Type::Int, suspend());
        let unwrapped = b.call(unwrap, vec![b.call(g.decl, Vec::new())]);
        f.body = Some(vec![Stmt::Expr(b.ret(f.decl, unwrapped))]);
        let g_decl = g.decl;
        let mut ctx = LoweringContext::new(decls);
        let mut module = module(vec![Declaration::Function(g), Declaration::Function(f)]);

        assert!(lower(&mut ctx, &mut module).is_empty());
        assert_eq!(declared_names(&module, &ctx.decls), vec!["g", "f"]);
        let f = find(&module, &ctx.decls, "f");
        let Some(Stmt::Expr(Expr {
            kind: ExprKind::Return { value, .. },
            ..
        })) = f.body.as_ref().and_then(|body| body.last())
        else {
            panic!("expected a return");
        };
        assert!(matches!(&value.kind, ExprKind::Call(call) if call.callee == g_decl));
        assert!(ctx.caches.coroutines.is_empty());
    }

    /// `suspend fun load(): String { val a = compute(); val b = suspendingCall(a); return a + b }`
    fn load_unit() -> (LoweringContext, IrModule) {
        let mut decls = DeclTable::new();
        let mut b = IrBuilder::new(&mut decls, FileSpan::default());
        let mut compute = b.function("compute", None, &[], Type::Int, Modifiers::default());
        compute.body = Some(vec![Stmt::Expr(b.ret(compute.decl, b.int(41)))]);
        let call = suspending_call(&mut b);
        let mut load = b.function("load", None, &[], Type::String, suspend());
        let a = b.variable("a", load.decl, Type::Int, false);
        let result = b.variable("b", load.decl, Type::String, false);
        let sum = b.binary(BinaryOp::Add, b.get(a), b.get(result));
        load.body = Some(vec![
            b.declare_local(a, Some(b.call(compute.decl, Vec::new()))),
            b.declare_local(result, Some(b.call(call.decl, vec![b.get(a)]))),
            Stmt::Expr(b.ret(load.decl, b.cast(sum, Type::String))),
        ]);
        let module = module(vec![
            Declaration::Function(compute),
            Declaration::Function(call),
            Declaration::Function(load),
        ]);
        (LoweringContext::new(decls), module)
    }

    #[test]
    fn test_local_live_across_point_is_spilled() {
        let (mut ctx, mut module) = load_unit();
        assert!(lower(&mut ctx, &mut module).is_empty());
        verify_module(&module, &ctx.decls).unwrap();

        assert_eq!(
            declared_names(&module, &ctx.decls),
            vec!["compute", "suspendingCall", "load$COROUTINE$0", "load"]
        );
        let info = ctx.caches.coroutines.values().next().unwrap();
        assert_eq!(info.suspension_points, 1);
        let spilled: Vec<String> = info.spilled_fields.iter().map(|field| ctx.decls.name(*field)).collect();
        assert_eq!(spilled, vec!["a"]);
        assert!(info.parameter_fields.is_empty());

        let Some(Declaration::Class(class)) = module.files[0].declarations.get(2) else {
            panic!("expected the coroutine class");
        };
        let invoke_suspend = class
            .declarations
            .iter()
            .find_map(|declaration| match declaration {
                Declaration::Function(function) if function.decl == info.invoke_suspend => Some(function),
                _ => None,
            })
            .unwrap();
        assert_eq!(points(invoke_suspend), vec![1]);
        assert!(body_contains(invoke_suspend, &mut |expr| matches!(
            expr.kind,
            ExprKind::SuspendableExpression { .. }
        )));

        // the original now only starts the machine
        let load = find(&module, &ctx.decls, "load");
        assert_eq!(load.body.as_ref().map(Vec::len), Some(1));
        assert!(body_contains(load, &mut |expr| matches!(
            &expr.kind,
            ExprKind::Call(call) if call.callee == info.constructor
        )));
    }

    #[test]
    fn test_points_are_numbered_from_one() {
        let mut decls = DeclTable::new();
        let mut b = IrBuilder::new(&mut decls, FileSpan::default());
        let call = suspending_call(&mut b);
        let mut twice = b.function("twice", None, &[("n", Type::Int)], Type::Unit, suspend());
        let n = twice.params[0].decl;
        twice.body = Some(vec![
            Stmt::Expr(b.call(call.decl, vec![b.get(n)])),
            Stmt::Expr(b.call(call.decl, vec![b.int(2)])),
        ]);
        let mut ctx = LoweringContext::new(decls);
        let mut module = module(vec![Declaration::Function(call), Declaration::Function(twice)]);

        assert!(lower(&mut ctx, &mut module).is_empty());
        verify_module(&module, &ctx.decls).unwrap();
        let info = ctx.caches.coroutines.values().next().unwrap();
        assert_eq!(info.suspension_points, 2);
        assert_eq!(info.parameter_fields.len(), 1);
        assert_eq!(ctx.decls.name(info.parameter_fields[0]), "n");

        let Some(Declaration::Class(class)) = module.files[0].declarations.get(1) else {
            panic!("expected the coroutine class");
        };
        let invoke_suspend = class
            .declarations
            .iter()
            .find_map(|declaration| match declaration {
                Declaration::Function(function) if function.decl == info.invoke_suspend => Some(function),
                _ => None,
            })
            .unwrap();
        assert_eq!(points(invoke_suspend), vec![1, 2]);
        // Unit functions end in an explicit return
        assert!(matches!(
            invoke_suspend.body.as_ref().and_then(|body| body.last()),
            Some(Stmt::Expr(Expr {
                kind: ExprKind::Return { .. },
                ..
            }))
        ));
    }

    /// `fun main() { val x = 1; val l = suspend { ...; suspendingCall(x) } }`
    fn lambda_unit(assign_captured: bool) -> (LoweringContext, IrModule, DeclId) {
        let mut decls = DeclTable::new();
        let mut b = IrBuilder::new(&mut decls, FileSpan::default());
        let call = suspending_call(&mut b);
        let mut main = b.function("main", None, &[], Type::Unit, Modifiers::default());
        let x = b.variable("x", main.decl, Type::Int, assign_captured);
        let lambda_modifiers = Modifiers {
            suspend: true,
            lambda: true,
            ..Modifiers::default()
        };
        let mut lambda = b.function("<anonymous>", Some(main.decl), &[], Type::String, lambda_modifiers);
        let mut statements = Vec::new();
        if assign_captured {
            statements.push(Stmt::Expr(b.set(x, b.int(5))));
        }
        statements.push(Stmt::Expr(b.ret(lambda.decl, b.call(call.decl, vec![b.get(x)]))));
        lambda.body = Some(statements);
        let lambda_decl = lambda.decl;
        let l = b.variable("l", main.decl, Type::function(Vec::new(), Type::String, true), false);
        main.body = Some(vec![
            b.declare_local(x, Some(b.int(1))),
            b.declare_local(l, Some(b.lambda(lambda))),
        ]);
        let module = module(vec![Declaration::Function(call), Declaration::Function(main)]);
        (LoweringContext::new(decls), module, lambda_decl)
    }

    #[test]
    fn test_suspend_lambda_becomes_factory_call() {
        let (mut ctx, mut module, lambda) = lambda_unit(false);
        assert!(lower(&mut ctx, &mut module).is_empty());
        verify_module(&module, &ctx.decls).unwrap();
        assert!(ctx.diagnostics.is_empty());

        let info = ctx.caches.coroutines.get(&lambda).unwrap().clone();
        let factory = info.factory.unwrap();
        assert_eq!(info.parameter_fields.len(), 1);
        // lifted to the end of the file
        assert_eq!(
            declared_names(&module, &ctx.decls),
            vec!["suspendingCall", "main", "<anonymous>$COROUTINE$0"]
        );
        let main = find(&module, &ctx.decls, "main");
        assert!(!body_contains(main, &mut |expr| matches!(expr.kind, ExprKind::Lambda(_))));
        assert!(body_contains(main, &mut |expr| matches!(
            &expr.kind,
            ExprKind::Call(call) if call.callee == factory && call.args.len() == 1
        )));
    }

    #[test]
    fn test_assignment_to_captured_variable_is_reported() {
        let (mut ctx, mut module, _) = lambda_unit(true);
        lower(&mut ctx, &mut module);
        assert_eq!(ctx.diagnostics.error_count(), 1);
        assert!(
            ctx.diagnostics
                .errors()
                .any(|diagnostic| diagnostic.message.contains("captured variable `x`"))
        );
    }

    #[test]
    fn test_local_suspend_function_capturing_outer_local_is_reported() {
        let mut decls = DeclTable::new();
        let mut b = IrBuilder::new(&mut decls, FileSpan::default());
        let call = suspending_call(&mut b);
        let mut outer = b.function("outer", None, &[("p", Type::Int)], Type::Unit, Modifiers::default());
        let p = outer.params[0].decl;
        let local_modifiers = Modifiers {
            suspend: true,
            local: true,
            ..Modifiers::default()
        };
        let mut local = b.function("inner", Some(outer.decl), &[], Type::Unit, local_modifiers);
        local.body = Some(vec![
            Stmt::Expr(b.call(call.decl, vec![b.get(p)])),
            Stmt::Expr(b.call(call.decl, vec![b.int(1)])),
        ]);
        outer.body = Some(vec![Stmt::Function(local)]);
        let mut ctx = LoweringContext::new(decls);
        let mut module = module(vec![Declaration::Function(call), Declaration::Function(outer)]);

        let leftovers = lower(&mut ctx, &mut module);
        assert_eq!(ctx.diagnostics.error_count(), 1);
        assert!(ctx.caches.coroutines.is_empty());
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn test_local_suspend_function_gets_sibling_class() {
        let mut decls = DeclTable::new();
        let mut b = IrBuilder::new(&mut decls, FileSpan::default());
        let call = suspending_call(&mut b);
        let mut outer = b.function("outer", None, &[], Type::Unit, Modifiers::default());
        let local_modifiers = Modifiers {
            suspend: true,
            local: true,
            ..Modifiers::default()
        };
        let mut local = b.function("inner", Some(outer.decl), &[], Type::Unit, local_modifiers);
        local.body = Some(vec![
            Stmt::Expr(b.call(call.decl, vec![b.int(1)])),
            Stmt::Expr(b.call(call.decl, vec![b.int(2)])),
        ]);
        outer.body = Some(vec![Stmt::Function(local)]);
        let mut ctx = LoweringContext::new(decls);
        let mut module = module(vec![Declaration::Function(call), Declaration::Function(outer)]);

        assert!(lower(&mut ctx, &mut module).is_empty());
        verify_module(&module, &ctx.decls).unwrap();
        let outer = find(&module, &ctx.decls, "outer");
        assert!(matches!(
            outer.body.as_deref(),
            Some([Stmt::Class(_), Stmt::Function(_)])
        ));
    }
}
