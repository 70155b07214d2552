//! Loading units and configuration from disk

use anyhow::{Context as _, Result};
use colored::Colorize as _;
use kl_driver::LoweringConfig;
use kl_ir::CompilationUnit;
use kl_pass::{Diagnostics, Severity};
use std::fs;
use std::path::Path;

/// Read a compilation unit serialized as JSON
pub fn load_unit(path: &Path) -> Result<CompilationUnit> {
    let text = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("{} is not a serialized compilation unit", path.display()))
}

/// Configuration from `path`, or the defaults
pub fn load_config(path: Option<&Path>) -> Result<LoweringConfig> {
    match path {
        Some(path) => Ok(LoweringConfig::load(path)?),
        None => Ok(LoweringConfig::default()),
    }
}

/// Print collected diagnostics to stderr
pub fn report(diagnostics: &Diagnostics) {
    for diagnostic in diagnostics.iter() {
        let tag = match diagnostic.severity {
            Severity::Error => "error".red().bold(),
            Severity::Warning => "warning".yellow().bold(),
        };
        eprintln!("{tag}: {} at {}", diagnostic.message, diagnostic.span);
    }
}
