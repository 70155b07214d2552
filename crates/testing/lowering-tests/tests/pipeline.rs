//! Configuration, checks and serialization around the whole pipeline

use kl_driver::{LoweringConfig, Phase, lower_unit};
use kl_inline::NoExternalBodies;
use kl_interp::{Execution, Interpreter, Value};
use kl_ir::{BinaryOp, CompilationUnit, DeclTable, Declaration, IrBuilder, Modifiers, Stmt, Type};
use kl_pass::LoweringError;
use kl_span::FileSpan;
use lowering_tests::{Parked, external, suspend, unit};
use std::io::Write as _;

/// `suspend fun twice(): Int { val a = fetch(); val b = fetch(); return a + b }`
fn program() -> CompilationUnit {
    let mut decls = DeclTable::new();
    let mut b = IrBuilder::new(&mut decls, FileSpan::default());
    let suspending = Modifiers {
        suspend: true,
        ..external()
    };
    let fetch = b.function("fetch", None, &[], Type::Int, suspending);
    let mut twice = b.function("twice", None, &[], Type::Int, suspend());
    let first = b.variable("a", twice.decl, Type::Int, false);
    let second = b.variable("b", twice.decl, Type::Int, false);
    twice.body = Some(vec![
        b.declare_local(first, Some(b.call(fetch.decl, Vec::new()))),
        b.declare_local(second, Some(b.call(fetch.decl, Vec::new()))),
        Stmt::Expr(b.ret(twice.decl, b.binary(BinaryOp::Add, b.get(first), b.get(second)))),
    ]);
    unit(decls, vec![twice])
}

fn config(text: &str) -> LoweringConfig {
    LoweringConfig::from_toml_str(text).unwrap()
}

#[test]
fn test_every_phase_runs_by_default() {
    let (lowered, report) = lower_unit(program(), LoweringConfig::default(), NoExternalBodies).unwrap();
    assert_eq!(report.phases_run, Phase::ALL.to_vec());
    let classes = lowered.module.files[0]
        .declarations
        .iter()
        .filter(|declaration| matches!(declaration, Declaration::Class(_)))
        .count();
    assert_eq!(classes, 1);
}

#[test]
fn test_disabled_coroutines_keep_suspend_bodies() {
    let original = program();
    let before = original.find_function("twice").cloned();
    let config = config("[phases]\ndisabled = [\"coroutines\"]");
    let (lowered, report) = lower_unit(original, config, NoExternalBodies).unwrap();
    assert!(!report.phases_run.contains(&Phase::Coroutines));
    assert_eq!(lowered.find_function("twice").cloned(), before);
}

#[test]
fn test_coroutines_without_inlining_is_rejected() {
    let config = config("[phases]\ndisabled = [\"inline\"]");
    let error = lower_unit(program(), config, NoExternalBodies).unwrap_err();
    assert!(matches!(
        error,
        LoweringError::MissingPrerequisite { phase, prerequisite }
            if phase == "coroutines" && prerequisite == "inline"
    ));
}

#[test]
fn test_config_file_drives_the_run() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[phases]\nverbose = [\"coroutines\"]\n\n[checks]\nrequire_exhaustive = false").unwrap();
    let config = LoweringConfig::load(file.path()).unwrap();
    assert!(config.is_verbose(Phase::Coroutines));
    let (_, report) = lower_unit(program(), config, NoExternalBodies).unwrap();
    assert!(report.phases_run.contains(&Phase::Coroutines));
}

#[test]
fn test_lowered_unit_survives_serialization() {
    let (lowered, _) = lower_unit(program(), LoweringConfig::default(), NoExternalBodies).unwrap();
    let json = serde_json::to_string(&lowered).unwrap();
    let restored: CompilationUnit = serde_json::from_str(&json).unwrap();
    assert_eq!(restored.module, lowered.module);

    let mut interpreter = Interpreter::new(&restored);
    let parked = Parked::install(&mut interpreter, "fetch");
    assert_eq!(interpreter.start("twice", Vec::new()).unwrap(), Execution::Suspended);
    let resumed = interpreter.resume(parked.take().unwrap(), Ok(Value::Int(20))).unwrap();
    assert_eq!(resumed, Execution::Suspended);
    let finished = interpreter.resume(parked.take().unwrap(), Ok(Value::Int(22))).unwrap();
    assert_eq!(finished, Execution::Completed(Value::Int(42)));
}
