//! The interface every lowering pass implements

use crate::context::LoweringContext;
use crate::error::{Leftover, LoweringError};
use kl_ir::{IrFile, IrModule};

/// A whole-module rewrite eliminating one category of construct
pub trait LoweringPass {
    /// Short name used in logs and leftovers
    fn name(&self) -> &'static str;

    /// Rewrite the module in place
    fn lower(&mut self, ctx: &mut LoweringContext, module: &mut IrModule) -> Result<(), LoweringError>;

    /// Constructs this pass should have removed that are still present
    fn leftovers(&self, _ctx: &LoweringContext, _module: &IrModule) -> Vec<Leftover> {
        Vec::new()
    }
}

/// A pass that rewrites files independently
pub trait FileLoweringPass {
    /// Short name used in logs and leftovers
    fn name(&self) -> &'static str;

    /// Rewrite one file in place
    fn lower_file(&mut self, ctx: &mut LoweringContext, file: &mut IrFile) -> Result<(), LoweringError>;

    /// Constructs still present in `file`
    fn file_leftovers(&self, _ctx: &LoweringContext, _file: &IrFile) -> Vec<Leftover> {
        Vec::new()
    }
}

/// Runs a [`FileLoweringPass`] over every file in order
#[derive(Debug, Clone, Default)]
pub struct PerFile<P>(pub P);

impl<P: FileLoweringPass> LoweringPass for PerFile<P> {
    fn name(&self) -> &'static str {
        self.0.name()
    }

    fn lower(&mut self, ctx: &mut LoweringContext, module: &mut IrModule) -> Result<(), LoweringError> {
        for file in &mut module.files {
            self.0.lower_file(ctx, file)?;
        }
        Ok(())
    }

    fn leftovers(&self, ctx: &LoweringContext, module: &IrModule) -> Vec<Leftover> {
        module
            .files
            .iter()
            .flat_map(|file| self.0.file_leftovers(ctx, file))
            .collect()
    }
}

/// A pass built from a closure, for sibling passes and tests
pub struct FnPass<F> {
    name: &'static str,
    run: F,
}

impl<F> FnPass<F>
where
    F: FnMut(&mut LoweringContext, &mut IrModule) -> Result<(), LoweringError>,
{
    /// Wrap `run` as a pass named `name`
    pub fn new(name: &'static str, run: F) -> Self {
        Self { name, run }
    }
}

impl<F> LoweringPass for FnPass<F>
where
    F: FnMut(&mut LoweringContext, &mut IrModule) -> Result<(), LoweringError>,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn lower(&mut self, ctx: &mut LoweringContext, module: &mut IrModule) -> Result<(), LoweringError> {
        (self.run)(ctx, module)
    }
}
