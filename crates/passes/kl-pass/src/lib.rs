//! Shared infrastructure for lowering passes.
//!
//! Failures come in three tiers:
//! - fatal [`LoweringError`]s abort the unit through `Err`,
//! - recoverable errors are collected in [`Diagnostics`] and fail the
//!   build once every phase has run,
//! - warnings are collected and only degrade the affected site.

mod context;
mod diagnostics;
mod error;
mod pass;

pub use context::{CoroutineInfo, LoweringCaches, LoweringContext};
pub use diagnostics::{Diagnostic, Diagnostics, Severity};
pub use error::{Leftover, LoweringError};
pub use pass::{FileLoweringPass, FnPass, LoweringPass, PerFile};

#[cfg(test)]
mod tests {
    use super::*;
    use kl_ir::{DeclTable, IrFile, IrModule};
    use kl_span::{FileId, FileSpan};

    struct CountFiles(usize);

    impl FileLoweringPass for CountFiles {
        fn name(&self) -> &'static str {
            "count"
        }

        fn lower_file(&mut self, _ctx: &mut LoweringContext, _file: &mut IrFile) -> Result<(), LoweringError> {
            self.0 += 1;
            Ok(())
        }
    }

    fn module(files: usize) -> IrModule {
        IrModule {
            name: "test".to_string(),
            files: (0..files)
                .map(|index| IrFile {
                    name: format!("f{index}.kl"),
                    file_id: FileId(index as u32),
                    declarations: Vec::new(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_per_file_visits_every_file() {
        let mut ctx = LoweringContext::new(DeclTable::new());
        let mut pass = PerFile(CountFiles(0));
        pass.lower(&mut ctx, &mut module(3)).unwrap();
        assert_eq!(pass.0.0, 3);
        assert_eq!(pass.name(), "count");
    }

    #[test]
    fn test_fn_pass_reports_errors() {
        let mut ctx = LoweringContext::new(DeclTable::new());
        let mut pass = FnPass::new("fails", |ctx: &mut LoweringContext, _module: &mut IrModule| {
            ctx.diagnostics.error("bad", FileSpan::default());
            Err(LoweringError::CompilationFailed { count: 1 })
        });
        let result = pass.lower(&mut ctx, &mut module(1));
        assert!(matches!(result, Err(LoweringError::CompilationFailed { count: 1 })));
        assert!(ctx.diagnostics.has_errors());
    }

    #[test]
    fn test_error_span() {
        let error = LoweringError::MissingArgument {
            callee: "f".to_string(),
            index: 1,
            span: FileSpan::default(),
        };
        assert_eq!(error.span(), Some(FileSpan::default()));
        assert_eq!(error.to_string(), "incomplete call to `f`: no argument at index 1");
    }
}
