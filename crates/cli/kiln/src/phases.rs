//! `kiln phases`

use crate::unit::load_config;
use anyhow::Result;
use colored::Colorize as _;
use kl_driver::Phase;
use std::path::Path;

pub fn list(config: Option<&Path>) -> Result<()> {
    let config = load_config(config)?;
    for phase in Phase::ALL {
        let state = if config.is_enabled(phase) {
            "enabled".green()
        } else {
            "disabled".red()
        };
        let verbose = if config.is_verbose(phase) { " (verbose)" } else { "" };
        println!("{:<18} {:<9} {}{verbose}", phase.to_string().bold(), state, phase.description());
    }
    Ok(())
}
