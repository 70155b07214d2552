//! `kiln lower`

use crate::Emit;
use crate::unit::{load_config, load_unit, report};
use anyhow::{Context as _, Result};
use colored::Colorize as _;
use kl_driver::Pipeline;
use kl_inline::NoExternalBodies;
use kl_ir::CompilationUnit;
use kl_ir::pretty::print_module;
use kl_pass::LoweringContext;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Run the pipeline over a unit, printing diagnostics either way
pub fn lower_file(input: &Path, config: Option<&Path>) -> Result<CompilationUnit> {
    let CompilationUnit { decls, mut module } = load_unit(input)?;
    let config = load_config(config)?;
    debug!(input = %input.display(), declarations = decls.len(), "loaded unit");
    let mut ctx = LoweringContext::new(decls);
    let result = Pipeline::new(config, NoExternalBodies).run(&mut ctx, &mut module);
    report(&ctx.diagnostics);
    let lowered = result.with_context(|| format!("lowering {} failed", input.display()))?;
    eprintln!(
        "{} {} phase(s) over {}",
        "Lowered".green().bold(),
        lowered.phases_run.len(),
        input.display()
    );
    Ok(CompilationUnit::new(ctx.into_decls(), module))
}

pub fn lower(input: &Path, config: Option<&Path>, emit: Emit, output: Option<&Path>) -> Result<()> {
    let unit = lower_file(input, config)?;
    let text = match emit {
        Emit::Pretty => print_module(&unit.module, &unit.decls),
        Emit::Json => serde_json::to_string_pretty(&unit)?,
    };
    match output {
        Some(path) => fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))?,
        None => println!("{text}"),
    }
    Ok(())
}
