//! `kiln run`

use crate::lower::lower_file;
use crate::unit::load_unit;
use anyhow::{Result, anyhow};
use colored::Colorize as _;
use kl_interp::{Execution, Interpreter};
use std::path::Path;
use tracing::debug;

pub fn run(input: &Path, entry: &str, lower: bool, config: Option<&Path>) -> Result<()> {
    let unit = if lower {
        lower_file(input, config)?
    } else {
        load_unit(input)?
    };

    debug!(entry, lowered = lower, "starting evaluation");
    let mut interpreter = Interpreter::new(&unit);
    // Values hold `Rc`s, so the error is rendered before it crosses into anyhow
    let execution = interpreter
        .start(entry, Vec::new())
        .map_err(|error| anyhow!("{entry} failed: {error}"))?;
    match execution {
        Execution::Completed(value) => println!("{value}"),
        Execution::Suspended => {
            println!("{} {entry} suspended with nothing to resume it", "Note:".yellow());
        }
    }
    Ok(())
}
