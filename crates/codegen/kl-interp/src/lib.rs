//! Reference evaluator for Kiln IR
//!
//! Runs a compilation unit before or after lowering. Suspend code is
//! driven through the same continuation contract the lowered state
//! machines implement, so natives registered by the host can suspend a
//! computation and resume it later.

mod env;
pub mod interpreter;
pub mod value;

pub use interpreter::{Execution, InterpError, Interpreter, NativeCall};
pub use value::{Closure, Object, ObjectRef, Value};

#[cfg(test)]
mod tests {
    use super::*;
    use kl_ir::{
        BinaryOp, Call, ClassSignature, CompilationUnit, DeclKind, DeclTable, Declaration, IrBuilder, IrFile,
        IrModule, Modifiers, Signature, Stmt, Type, ValueParameter,
    };
    use kl_span::{FileId, FileSpan};
    use std::cell::Cell;
    use std::rc::Rc;

    fn unit(decls: DeclTable, declarations: Vec<Declaration>) -> CompilationUnit {
        CompilationUnit::new(
            decls,
            IrModule {
                name: "test".to_string(),
                files: vec![IrFile {
                    name: "test.kl".to_string(),
                    file_id: FileId(0),
                    declarations,
                }],
            },
        )
    }

    #[test]
    fn test_arithmetic_and_defaults() {
        let mut decls = DeclTable::new();
        let mut b = IrBuilder::new(&mut decls, FileSpan::default());
        let mut add = b.function("add", None, &[("a", Type::Int), ("b", Type::Int)], Type::Int, Modifiers::default());
        add.params[1].default = Some(b.int(10));
        let sum = b.binary(BinaryOp::Add, b.get(add.params[0].decl), b.get(add.params[1].decl));
        add.body = Some(vec![Stmt::Expr(b.ret(add.decl, sum))]);
        let mut interpreter = Interpreter::new(&unit(decls, vec![Declaration::Function(add)]));

        assert_eq!(interpreter.call("add", vec![Value::Int(2), Value::Int(3)]).unwrap(), Value::Int(5));
        assert_eq!(interpreter.call("add", vec![Value::Int(2)]).unwrap(), Value::Int(12));
        assert!(matches!(
            interpreter.call("missing", Vec::new()),
            Err(InterpError::UnknownEntry(_))
        ));
    }

    #[test]
    fn test_lambda_sees_captured_assignment() {
        let mut decls = DeclTable::new();
        let mut b = IrBuilder::new(&mut decls, FileSpan::default());
        let mut main = b.function("main", None, &[], Type::Int, Modifiers::default());
        let counter = b.variable("counter", main.decl, Type::Int, true);
        let read = b.variable("read", main.decl, Type::function(Vec::new(), Type::Int, false), false);
        let lambda_modifiers = Modifiers {
            lambda: true,
            ..Modifiers::default()
        };
        let mut lambda = b.function("<anonymous>", Some(main.decl), &[], Type::Int, lambda_modifiers);
        lambda.body = Some(vec![Stmt::Expr(b.ret(lambda.decl, b.get(counter)))]);
        main.body = Some(vec![
            b.declare_local(counter, Some(b.int(1))),
            b.declare_local(read, Some(b.lambda(lambda))),
            Stmt::Expr(b.set(counter, b.int(7))),
            Stmt::Expr(b.ret(main.decl, b.invoke(b.get(read), Vec::new()))),
        ]);
        let mut interpreter = Interpreter::new(&unit(decls, vec![Declaration::Function(main)]));
        assert_eq!(interpreter.call("main", Vec::new()).unwrap(), Value::Int(7));
    }

    #[test]
    fn test_natives_receive_arguments_and_can_throw() {
        let mut decls = DeclTable::new();
        let mut b = IrBuilder::new(&mut decls, FileSpan::default());
        let log = b.function("log", None, &[("value", Type::Int)], Type::Unit, Modifiers::default());
        let fail = b.function("fail", None, &[], Type::Unit, Modifiers::default());
        let mut main = b.function("main", None, &[], Type::Unit, Modifiers::default());
        main.body = Some(vec![
            Stmt::Expr(b.call(log.decl, vec![b.int(4)])),
            Stmt::Expr(b.call(fail.decl, Vec::new())),
            Stmt::Expr(b.call(log.decl, vec![b.int(5)])),
        ]);
        let mut interpreter = Interpreter::new(&unit(
            decls,
            vec![
                Declaration::Function(log),
                Declaration::Function(fail),
                Declaration::Function(main),
            ],
        ));
        let seen = Rc::new(Cell::new(0));
        let sink = Rc::clone(&seen);
        interpreter.register_native("log", move |call| {
            sink.set(sink.get() + call.args[0].as_int().unwrap_or_default());
            Ok(Value::Unit)
        });
        interpreter.register_native("fail", |_| Err(InterpError::Uncaught(Value::String("boom".into()))));

        let error = interpreter.call("main", Vec::new()).unwrap_err();
        assert!(matches!(error, InterpError::Uncaught(Value::String(ref message)) if message == "boom"));
        assert_eq!(seen.get(), 4);
    }

    #[test]
    fn test_member_calls_dispatch_to_overrides() {
        let mut decls = DeclTable::new();
        let mut b = IrBuilder::new(&mut decls, FileSpan::default());
        let base = b.declare("Base", DeclKind::Class, None, Modifiers::default(), Signature::Pending);
        let derived = b.declare("Derived", DeclKind::Class, None, Modifiers::default(), Signature::Pending);

        let abstract_modifiers = Modifiers {
            is_abstract: true,
            ..Modifiers::default()
        };
        let mut name = b.function("name", Some(base), &[], Type::String, abstract_modifiers);
        let base_this = b.parameter("<this>", name.decl, Type::class(base));
        name.dispatch_receiver = Some(ValueParameter::new(base_this, FileSpan::default()));
        b.sync_signature(&name);

        let mut override_name = b.function("name", Some(derived), &[], Type::String, Modifiers::default());
        let this = b.parameter("<this>", override_name.decl, Type::class(derived));
        override_name.dispatch_receiver = Some(ValueParameter::new(this, FileSpan::default()));
        b.sync_signature(&override_name);
        override_name.body = Some(vec![Stmt::Expr(b.ret(override_name.decl, b.string("derived")))]);
        b.decls().get_mut(override_name.decl).overrides = vec![name.decl];

        let mut constructor = b.function("<init>", Some(derived), &[], Type::class(derived), Modifiers::default());
        let constructor_this = b.parameter("<this>", constructor.decl, Type::class(derived));
        constructor.dispatch_receiver = Some(ValueParameter::new(constructor_this, FileSpan::default()));
        b.sync_signature(&constructor);
        constructor.body = Some(Vec::new());
        b.decls().get_mut(constructor.decl).kind = DeclKind::Constructor;

        b.decls().get_mut(base).signature = Signature::Class(ClassSignature {
            super_types: vec![Type::Any],
            members: vec![name.decl],
        });
        b.decls().get_mut(derived).signature = Signature::Class(ClassSignature {
            super_types: vec![Type::class(base)],
            members: vec![constructor.decl, override_name.decl],
        });

        let mut main = b.function("main", None, &[], Type::String, Modifiers::default());
        let instance = b.call(constructor.decl, Vec::new());
        let call = b.call_with(Call {
            dispatch_receiver: Some(instance),
            ..Call::new(name.decl, Vec::new())
        });
        main.body = Some(vec![Stmt::Expr(b.ret(main.decl, call))]);

        let classes = vec![
            Declaration::Class(kl_ir::Class {
                decl: base,
                declarations: vec![Declaration::Function(name)],
                span: FileSpan::default(),
            }),
            Declaration::Class(kl_ir::Class {
                decl: derived,
                declarations: vec![Declaration::Function(constructor), Declaration::Function(override_name)],
                span: FileSpan::default(),
            }),
            Declaration::Function(main),
        ];
        let mut interpreter = Interpreter::new(&unit(decls, classes));
        assert_eq!(
            interpreter.call("main", Vec::new()).unwrap(),
            Value::String("derived".to_string())
        );
    }

    #[test]
    fn test_resuming_a_completion_finishes_immediately() {
        let decls = DeclTable::new();
        let mut interpreter = Interpreter::new(&unit(decls, Vec::new()));
        let outcome = interpreter.resume(Value::Completion(0), Ok(Value::Int(3))).unwrap();
        assert_eq!(outcome, Execution::Completed(Value::Int(3)));
        assert!(matches!(
            interpreter.resume(Value::Int(1), Ok(Value::Unit)),
            Err(InterpError::NotAContinuation("Int"))
        ));
    }
}
