//! Runs the lowering phases in order over one compilation unit

use crate::config::LoweringConfig;
use crate::phase::Phase;
use indexmap::IndexMap;
use kl_coroutines::SuspendFunctionsLowering;
use kl_inline::{FunctionInlining, InlineBodyProvider};
use kl_ir::pretty::print_module;
use kl_ir::{IrModule, verify_module};
use kl_pass::{Diagnostics, LoweringContext, LoweringError, LoweringPass, PerFile};
use std::fmt;
use tracing::{debug, info, info_span, warn};

/// What a successful run did
#[derive(Debug, Clone)]
pub struct LoweringReport {
    /// Phases that executed, in order, including empty slots
    pub phases_run: Vec<Phase>,
    /// Warnings collected along the way
    pub diagnostics: Diagnostics,
}

/// The ordered lowering pipeline.
///
/// Phases without a registered pass still take part in ordering and
/// prerequisite checks but do nothing when they run.
pub struct Pipeline {
    config: LoweringConfig,
    passes: IndexMap<Phase, Box<dyn LoweringPass>>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Pipeline")
            .field("config", &self.config)
            .field("passes", &self.passes.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Pipeline {
    /// Pipeline with inlining and coroutine lowering registered
    pub fn new(config: LoweringConfig, provider: impl InlineBodyProvider + 'static) -> Self {
        let mut pipeline = Self::empty(config);
        pipeline.register(Phase::Inline, FunctionInlining::new(provider));
        pipeline.register(Phase::Coroutines, PerFile(SuspendFunctionsLowering));
        pipeline
    }

    /// Pipeline with no passes registered
    pub fn empty(config: LoweringConfig) -> Self {
        Self {
            config,
            passes: IndexMap::new(),
        }
    }

    /// Put `pass` in the slot for `phase`, replacing whatever was there
    pub fn register(&mut self, phase: Phase, pass: impl LoweringPass + 'static) {
        self.passes.insert(phase, Box::new(pass));
    }

    /// Configuration in use
    pub fn config(&self) -> &LoweringConfig {
        &self.config
    }

    /// Whether a pass fills the slot for `phase`
    pub fn is_registered(&self, phase: Phase) -> bool {
        self.passes.contains_key(&phase)
    }

    /// Lower `module` in place
    pub fn run(&mut self, ctx: &mut LoweringContext, module: &mut IrModule) -> Result<LoweringReport, LoweringError> {
        let mut phases_run = Vec::new();

        for phase in Phase::ALL {
            let _span = info_span!("phase", %phase).entered();
            if !self.config.is_enabled(phase) {
                debug!("phase disabled");
                continue;
            }
            if let Some(missing) = phase
                .prerequisites()
                .iter()
                .find(|prerequisite| !phases_run.contains(*prerequisite))
            {
                return Err(LoweringError::MissingPrerequisite {
                    phase: phase.to_string(),
                    prerequisite: missing.to_string(),
                });
            }

            let warnings_before = ctx.diagnostics.warnings().count();
            match self.passes.get_mut(&phase) {
                Some(pass) => {
                    info!(pass = pass.name(), "running phase");
                    pass.lower(ctx, module)?;
                }
                None => debug!("no pass registered"),
            }
            phases_run.push(phase);

            if self.config.checks.verify_after_each_phase {
                verify_module(module, &ctx.decls).map_err(|violations| LoweringError::InvalidIr {
                    phase: phase.to_string(),
                    violations,
                })?;
            }
            if self.config.is_verbose(phase) {
                info!("IR after {phase}:\n{}", print_module(module, &ctx.decls));
            }
            let warnings = ctx.diagnostics.warnings().count() - warnings_before;
            if warnings > 0 {
                warn!(warnings, "phase reported warnings");
            }
        }

        let count = ctx.diagnostics.error_count();
        if count > 0 {
            return Err(LoweringError::CompilationFailed { count });
        }

        if self.config.checks.require_exhaustive {
            let leftovers: Vec<_> = phases_run
                .iter()
                .filter_map(|phase| self.passes.get(phase))
                .flat_map(|pass| pass.leftovers(ctx, module))
                .collect();
            if !leftovers.is_empty() {
                return Err(LoweringError::IncompleteLowering { leftovers });
            }
        }

        info!(phases = phases_run.len(), "lowering finished");
        Ok(LoweringReport {
            phases_run,
            diagnostics: ctx.diagnostics.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PhaseSettings;
    use kl_inline::NoExternalBodies;
    use kl_ir::{DeclTable, Declaration, IrBuilder, IrFile, Modifiers, Stmt, Type};
    use kl_pass::{FnPass, Leftover};
    use kl_span::{FileId, FileSpan};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn unit() -> (LoweringContext, IrModule) {
        let mut decls = DeclTable::new();
        let mut b = IrBuilder::new(&mut decls, FileSpan::default());
        let mut main = b.function("main", None, &[], Type::Int, Modifiers::default());
        main.body = Some(vec![Stmt::Expr(b.ret(main.decl, b.int(0)))]);
        let module = IrModule {
            name: "test".to_string(),
            files: vec![IrFile {
                name: "main.kl".to_string(),
                file_id: FileId(0),
                declarations: vec![Declaration::Function(main)],
            }],
        };
        (LoweringContext::new(decls), module)
    }

    fn recorder(phase: Phase, log: &Rc<RefCell<Vec<Phase>>>) -> impl LoweringPass + 'static {
        let log = Rc::clone(log);
        FnPass::new("recorder", move |_: &mut LoweringContext, _: &mut IrModule| {
            log.borrow_mut().push(phase);
            Ok(())
        })
    }

    #[test]
    fn test_all_phases_run_in_order() {
        let (mut ctx, mut module) = unit();
        let mut pipeline = Pipeline::new(LoweringConfig::default(), NoExternalBodies);
        let report = pipeline.run(&mut ctx, &mut module).unwrap();
        assert_eq!(report.phases_run, Phase::ALL.to_vec());
    }

    #[test]
    fn test_registered_passes_run_in_phase_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut pipeline = Pipeline::empty(LoweringConfig::default());
        pipeline.register(Phase::Varargs, recorder(Phase::Varargs, &log));
        pipeline.register(Phase::TestProcessor, recorder(Phase::TestProcessor, &log));
        pipeline.register(Phase::Delegation, recorder(Phase::Delegation, &log));
        let (mut ctx, mut module) = unit();
        pipeline.run(&mut ctx, &mut module).unwrap();
        assert_eq!(
            *log.borrow(),
            vec![Phase::TestProcessor, Phase::Delegation, Phase::Varargs]
        );
    }

    #[test]
    fn test_disabled_prerequisite_is_an_error() {
        let config = LoweringConfig {
            phases: PhaseSettings {
                disabled: vec![Phase::Inline],
                ..PhaseSettings::default()
            },
            ..LoweringConfig::default()
        };
        let (mut ctx, mut module) = unit();
        let mut pipeline = Pipeline::new(config, NoExternalBodies);
        let error = pipeline.run(&mut ctx, &mut module).unwrap_err();
        assert!(matches!(
            error,
            LoweringError::MissingPrerequisite { ref phase, ref prerequisite }
                if phase == "coroutines" && prerequisite == "inline"
        ));
    }

    #[test]
    fn test_disabling_a_dependent_too_is_fine() {
        let config = LoweringConfig {
            phases: PhaseSettings {
                disabled: vec![Phase::EnumClasses, Phase::DefaultArguments, Phase::Varargs],
                ..PhaseSettings::default()
            },
            ..LoweringConfig::default()
        };
        let (mut ctx, mut module) = unit();
        let report = Pipeline::new(config, NoExternalBodies).run(&mut ctx, &mut module).unwrap();
        assert!(!report.phases_run.contains(&Phase::Varargs));
        assert!(report.phases_run.contains(&Phase::Coroutines));
    }

    #[test]
    fn test_reported_errors_fail_the_run() {
        let mut pipeline = Pipeline::empty(LoweringConfig::default());
        pipeline.register(
            Phase::Delegation,
            FnPass::new("failing", |ctx: &mut LoweringContext, _: &mut IrModule| {
                ctx.diagnostics.error("broken", FileSpan::default());
                ctx.diagnostics.error("also broken", FileSpan::default());
                Ok(())
            }),
        );
        let (mut ctx, mut module) = unit();
        let error = pipeline.run(&mut ctx, &mut module).unwrap_err();
        assert!(matches!(error, LoweringError::CompilationFailed { count: 2 }));
    }

    struct Stubborn;

    impl LoweringPass for Stubborn {
        fn name(&self) -> &'static str {
            "stubborn"
        }

        fn lower(&mut self, _: &mut LoweringContext, _: &mut IrModule) -> Result<(), LoweringError> {
            Ok(())
        }

        fn leftovers(&self, _: &LoweringContext, _: &IrModule) -> Vec<Leftover> {
            vec![Leftover {
                pass: "stubborn",
                construct: "everything".to_string(),
                span: FileSpan::default(),
            }]
        }
    }

    #[test]
    fn test_leftovers_fail_only_when_exhaustive() {
        let mut pipeline = Pipeline::empty(LoweringConfig::default());
        pipeline.register(Phase::EnumClasses, Stubborn);
        let (mut ctx, mut module) = unit();
        let error = pipeline.run(&mut ctx, &mut module).unwrap_err();
        assert!(matches!(error, LoweringError::IncompleteLowering { ref leftovers } if leftovers.len() == 1));

        let mut config = LoweringConfig::default();
        config.checks.require_exhaustive = false;
        let mut pipeline = Pipeline::empty(config);
        pipeline.register(Phase::EnumClasses, Stubborn);
        let (mut ctx, mut module) = unit();
        assert!(pipeline.run(&mut ctx, &mut module).is_ok());
    }

    #[test]
    fn test_verifier_catches_broken_output() {
        let mut pipeline = Pipeline::empty(LoweringConfig::default());
        pipeline.register(
            Phase::Delegation,
            FnPass::new("duplicating", |_: &mut LoweringContext, module: &mut IrModule| {
                let file = &mut module.files[0];
                let copy = file.declarations[0].clone();
                file.declarations.push(copy);
                Ok(())
            }),
        );
        let (mut ctx, mut module) = unit();
        let error = pipeline.run(&mut ctx, &mut module).unwrap_err();
        assert!(matches!(error, LoweringError::InvalidIr { ref phase, .. } if phase == "delegation"));
    }
}
