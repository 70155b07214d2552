//! Inline expansion seen from outside: lowered programs keep their meaning

use kl_driver::{LoweringConfig, Phase, Pipeline};
use kl_inline::{ModuleBodies, NoExternalBodies};
use kl_interp::{Interpreter, Value};
use kl_ir::{
    BinaryOp, Call, CompilationUnit, DeclId, DeclKind, DeclTable, Declaration, ExprKind, IrBuilder, IrModule,
    Modifiers, Signature, Stmt, Type, ValueParameter,
};
use kl_pass::LoweringContext;
use kl_span::FileSpan;
use std::cell::RefCell;
use std::rc::Rc;
use lowering_tests::{body_contains, call, count_exprs, counter, external, inline, lambda, lower, module, unit};

/// `inline fun twice(x: Int, f: (Int) -> Int) = f(f(x))` called as
/// `twice(next()) { it * 2 }`
fn twice_program() -> CompilationUnit {
    let mut decls = DeclTable::new();
    let mut b = IrBuilder::new(&mut decls, FileSpan::default());
    let next = b.function("next", None, &[], Type::Int, external());
    let block_type = Type::function(vec![Type::Int], Type::Int, false);
    let mut twice = b.function("twice", None, &[("x", Type::Int), ("f", block_type)], Type::Int, inline());
    let (x, f) = (twice.params[0].decl, twice.params[1].decl);
    let inner = b.invoke(b.get(f), vec![b.get(x)]);
    twice.body = Some(vec![Stmt::Expr(b.ret(twice.decl, b.invoke(b.get(f), vec![inner])))]);

    let mut main = b.function("main", None, &[], Type::Int, Modifiers::default());
    let mut double = b.function("<anonymous>", Some(main.decl), &[("it", Type::Int)], Type::Int, lambda());
    let it = double.params[0].decl;
    double.body = Some(vec![Stmt::Expr(
        b.ret(double.decl, b.binary(BinaryOp::Mul, b.get(it), b.int(2))),
    )]);
    let expanded = b.call(twice.decl, vec![b.call(next.decl, Vec::new()), b.lambda(double)]);
    main.body = Some(vec![Stmt::Expr(b.ret(main.decl, expanded))]);
    unit(decls, vec![twice, main])
}

#[test]
fn test_inlined_program_computes_the_same_value() {
    let program = twice_program();
    let mut before = Interpreter::new(&program);
    let calls_before = counter(&mut before, "next", Value::Int(5));
    assert_eq!(call(&mut before, "main").unwrap(), Value::Int(20));
    assert_eq!(calls_before.get(), 1);

    let (lowered, report) = lower(program).unwrap();
    assert!(report.phases_run.contains(&Phase::Inline));
    assert_eq!(report.diagnostics.error_count(), 0);

    let main = lowered.find_function("main").unwrap();
    assert!(!body_contains(main, &mut |expr| match &expr.kind {
        ExprKind::Invoke { .. } | ExprKind::Lambda(_) => true,
        ExprKind::Call(call) => lowered.decls.name(call.callee) == "twice",
        _ => false,
    }));

    let mut after = Interpreter::new(&lowered);
    let calls_after = counter(&mut after, "next", Value::Int(5));
    assert_eq!(call(&mut after, "main").unwrap(), Value::Int(20));
    // the argument went into a temporary instead of being duplicated
    assert_eq!(calls_after.get(), 1);
}

/// `inline fun mix(a: Int, b: Int, c: Int = tag("c") + b) = a * 100 + b * 10 + c`
/// called as `mix(tag("a"), tag("b"))`
fn mix_program() -> CompilationUnit {
    let mut decls = DeclTable::new();
    let mut b = IrBuilder::new(&mut decls, FileSpan::default());
    let tag = b.function("tag", None, &[("name", Type::String)], Type::Int, external());
    let mut mix = b.function(
        "mix",
        None,
        &[("a", Type::Int), ("b", Type::Int), ("c", Type::Int)],
        Type::Int,
        inline(),
    );
    let (a, second, c) = (mix.params[0].decl, mix.params[1].decl, mix.params[2].decl);
    mix.params[2] = ValueParameter {
        default: Some(b.binary(
            BinaryOp::Add,
            b.call(tag.decl, vec![b.string("c")]),
            b.get(second),
        )),
        ..mix.params[2].clone()
    };
    let hundreds = b.binary(BinaryOp::Mul, b.get(a), b.int(100));
    let tens = b.binary(BinaryOp::Mul, b.get(second), b.int(10));
    let sum = b.binary(BinaryOp::Add, b.binary(BinaryOp::Add, hundreds, tens), b.get(c));
    mix.body = Some(vec![Stmt::Expr(b.ret(mix.decl, sum))]);

    let mut main = b.function("main", None, &[], Type::Int, Modifiers::default());
    let args = vec![b.call(tag.decl, vec![b.string("a")]), b.call(tag.decl, vec![b.string("b")])];
    main.body = Some(vec![Stmt::Expr(b.ret(main.decl, b.call(mix.decl, args)))]);
    unit(decls, vec![mix, main])
}

/// Implement `tag` as a native that logs its argument
fn tags(interpreter: &mut Interpreter) -> Rc<RefCell<Vec<String>>> {
    let log = Rc::new(RefCell::new(Vec::new()));
    let seen = Rc::clone(&log);
    interpreter.register_native("tag", move |call| {
        let name = call.args[0].as_str().unwrap_or_default().to_string();
        let value = match name.as_str() {
            "a" => 1,
            "b" => 2,
            _ => 3,
        };
        seen.borrow_mut().push(name);
        Ok(Value::Int(value))
    });
    log
}

#[test]
fn test_arguments_and_defaults_keep_their_evaluation_order() {
    let program = mix_program();
    let mut before = Interpreter::new(&program);
    let order_before = tags(&mut before);
    assert_eq!(call(&mut before, "main").unwrap(), Value::Int(125));
    assert_eq!(*order_before.borrow(), ["a", "b", "c"]);

    let (lowered, report) = lower(program).unwrap();
    assert_eq!(report.diagnostics.error_count(), 0);
    let main = lowered.find_function("main").unwrap();
    assert!(!body_contains(main, &mut |expr| matches!(
        &expr.kind,
        ExprKind::Call(call) if lowered.decls.name(call.callee) == "mix"
    )));

    let mut after = Interpreter::new(&lowered);
    let order_after = tags(&mut after);
    assert_eq!(call(&mut after, "main").unwrap(), Value::Int(125));
    // each argument ran once, and the default saw the temporary holding `b`
    assert_eq!(*order_after.borrow(), ["a", "b", "c"]);
}

#[test]
fn test_generic_inline_is_specialised_per_call() {
    let mut decls = DeclTable::new();
    let mut b = IrBuilder::new(&mut decls, FileSpan::default());
    let type_param = b.declare("T", DeclKind::TypeParameter, None, Modifiers::default(), Signature::TypeParameter);
    let mut identity = b.function(
        "identity",
        None,
        &[("value", Type::Param(type_param))],
        Type::Param(type_param),
        inline(),
    );
    identity.type_params.push(type_param);
    b.sync_signature(&identity);
    identity.body = Some(vec![Stmt::Expr(b.ret(identity.decl, b.get(identity.params[0].decl)))]);

    let mut main = b.function("main", None, &[], Type::String, Modifiers::default());
    let number = b.variable("n", main.decl, Type::Int, false);
    let text = b.variable("s", main.decl, Type::String, false);
    let as_int = b.call_with(Call {
        type_args: vec![Type::Int],
        ..Call::new(identity.decl, vec![b.int(4)])
    });
    let as_string = b.call_with(Call {
        type_args: vec![Type::String],
        ..Call::new(identity.decl, vec![b.string("a")])
    });
    let joined = b.binary(BinaryOp::Add, b.get(text), b.get(number));
    main.body = Some(vec![
        b.declare_local(number, Some(as_int)),
        b.declare_local(text, Some(as_string)),
        Stmt::Expr(b.ret(main.decl, joined)),
    ]);
    let identity_decl = identity.decl;
    let program = unit(decls, vec![identity, main]);
    let expected = call(&mut Interpreter::new(&program), "main").unwrap();
    assert_eq!(expected, Value::String("a4".to_string()));

    let (lowered, _) = lower(program).unwrap();
    let mut blocks: Vec<(DeclId, Type)> = Vec::new();
    count_exprs(&lowered.module, |expr| {
        if let ExprKind::ReturnableBlock {
            target,
            inlined_from: Some(from),
            ..
        } = &expr.kind
            && *from == identity_decl
        {
            blocks.push((*target, expr.ty.clone()));
        }
        false
    });
    assert_eq!(blocks.len(), 2);
    assert_ne!(blocks[0].0, blocks[1].0);
    assert_eq!(blocks[0].1, Type::Int);
    assert_eq!(blocks[1].1, Type::String);
    assert_eq!(call(&mut Interpreter::new(&lowered), "main").unwrap(), expected);
}

/// A library module and a main module sharing one table
fn library_and_main() -> (DeclTable, IrModule, IrModule) {
    let mut decls = DeclTable::new();
    let mut b = IrBuilder::new(&mut decls, FileSpan::default());
    let mut double = b.function("double", None, &[("x", Type::Int)], Type::Int, inline());
    let x = double.params[0].decl;
    double.body = Some(vec![Stmt::Expr(
        b.ret(double.decl, b.binary(BinaryOp::Add, b.get(x), b.get(x))),
    )]);
    let mut main = b.function("main", None, &[], Type::Int, Modifiers::default());
    main.body = Some(vec![Stmt::Expr(b.ret(main.decl, b.call(double.decl, vec![b.int(21)])))]);
    let library = module(vec![Declaration::Function(double)]);
    let program = module(vec![Declaration::Function(main)]);
    (decls, library, program)
}

#[test]
fn test_bodies_come_from_a_separately_compiled_module() {
    let (decls, library, mut program) = library_and_main();
    let mut ctx = LoweringContext::new(decls);
    Pipeline::new(LoweringConfig::default(), ModuleBodies::new(&library))
        .run(&mut ctx, &mut program)
        .unwrap();
    assert_eq!(ctx.diagnostics.warnings().count(), 0);
    assert_eq!(
        count_exprs(&program, |expr| matches!(expr.kind, ExprKind::ReturnableBlock { .. })),
        1
    );

    let lowered = CompilationUnit::new(ctx.into_decls(), program);
    assert_eq!(call(&mut Interpreter::new(&lowered), "main").unwrap(), Value::Int(42));
}

#[test]
fn test_unavailable_body_only_warns() {
    let (decls, _, mut program) = library_and_main();
    let mut ctx = LoweringContext::new(decls);
    let report = Pipeline::new(LoweringConfig::default(), NoExternalBodies)
        .run(&mut ctx, &mut program)
        .unwrap();
    assert_eq!(report.diagnostics.error_count(), 0);
    let warnings: Vec<_> = ctx.diagnostics.warnings().collect();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].message.contains("double"));
    assert_eq!(
        count_exprs(&program, |expr| matches!(expr.kind, ExprKind::Call(_))),
        1
    );
}
