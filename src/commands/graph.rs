//! `attune graph`

use crate::cli::{Cli, GraphArgs, GraphFormat};
use crate::commands::session;
use crate::{EXIT_LOAD, EXIT_OK};
use anyhow::Result;
use graph::{print, DotPrinter, TextPrinter};

pub fn run(cli: &Cli, args: &GraphArgs) -> Result<i32> {
    let session = session(cli)?;

    let resolved = match pipeline::load_resolved(
        &args.file,
        &session.overrides,
        resource::registry::global(),
        &session.walk,
    ) {
        Ok(resolved) => resolved,
        Err(err) => {
            eprintln!("{err:#}");
            return Ok(EXIT_LOAD);
        }
    };

    let rendered = match args.format {
        GraphFormat::Dot => print(&resolved, &DotPrinter::default()),
        GraphFormat::Text => print(&resolved, &TextPrinter),
    };
    print!("{rendered}");
    Ok(EXIT_OK)
}
