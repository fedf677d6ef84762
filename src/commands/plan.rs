//! `attune plan`

use crate::cli::{Cli, PlanArgs};
use crate::commands::{build_plan, session};
use crate::ui;
use crate::{EXIT_FATAL, EXIT_LOAD, EXIT_OK};
use anyhow::Result;
use pipeline::has_fatal;

pub fn run(cli: &Cli, args: &PlanArgs) -> Result<i32> {
    let session = session(cli)?;

    let (planned, _selection) = match build_plan(&args.file, &session) {
        Ok(out) => out,
        Err(err) => {
            eprintln!("{err:#}");
            return Ok(EXIT_LOAD);
        }
    };

    ui::print_report("Plan", &planned, cli.quiet);
    Ok(if has_fatal(&planned) { EXIT_FATAL } else { EXIT_OK })
}
