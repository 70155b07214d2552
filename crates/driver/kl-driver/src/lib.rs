//! Lowering pipeline driver
//!
//! Owns the fixed phase order, the configuration that switches phases
//! on and off, and the checks run between phases.

mod config;
mod phase;
mod pipeline;

pub use config::{CheckSettings, ConfigError, LoweringConfig, PhaseSettings};
pub use phase::Phase;
pub use pipeline::{LoweringReport, Pipeline};

use kl_inline::InlineBodyProvider;
use kl_ir::CompilationUnit;
use kl_pass::{LoweringContext, LoweringError};

/// Lower a whole unit with the default passes and hand back the result
pub fn lower_unit(
    unit: CompilationUnit,
    config: LoweringConfig,
    provider: impl InlineBodyProvider + 'static,
) -> Result<(CompilationUnit, LoweringReport), LoweringError> {
    let CompilationUnit { decls, mut module } = unit;
    let mut ctx = LoweringContext::new(decls);
    let report = Pipeline::new(config, provider).run(&mut ctx, &mut module)?;
    Ok((CompilationUnit::new(ctx.into_decls(), module), report))
}
