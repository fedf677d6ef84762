//! `attune apply`

use crate::cli::{ApplyArgs, Cli};
use crate::commands::{build_plan, session};
use crate::ui;
use crate::{EXIT_FATAL, EXIT_LOAD, EXIT_OK};
use anyhow::Result;
use colored::Colorize;
use graph::NodeId;
use indicatif::{ProgressBar, ProgressStyle};
use pipeline::{has_fatal, ApplyOptions, NoProgress, Progress};
use resource::TaskStatus;
use std::sync::Arc;

/// Progress bar over the apply traversal
struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    fn new() -> Self {
        let bar = ProgressBar::hidden();
        bar.set_style(
            ProgressStyle::with_template("  {bar:30} {pos}/{len} {msg}")
                .expect("static progress template"),
        );
        Self { bar }
    }
}

impl Progress for BarProgress {
    fn on_start(&self, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    }

    fn on_node(&self, id: &NodeId, _status: &TaskStatus) {
        self.bar.set_message(id.base().to_string());
        self.bar.inc(1);
    }

    fn on_done(&self) {
        self.bar.finish_and_clear();
    }
}

pub fn run(cli: &Cli, args: &ApplyArgs) -> Result<i32> {
    let session = session(cli)?;

    let (planned, selection) = match build_plan(&args.file, &session) {
        Ok(out) => out,
        Err(err) => {
            eprintln!("{err:#}");
            return Ok(EXIT_LOAD);
        }
    };

    ui::print_report("Plan", &planned, cli.quiet);

    if has_fatal(&planned) && !args.force {
        if !cli.quiet {
            println!();
            println!("  {} plan has fatal nodes; pass --force to apply anyway", "✗".red());
        }
        return Ok(EXIT_FATAL);
    }

    let progress: Arc<dyn Progress> = if cli.quiet {
        Arc::new(NoProgress)
    } else {
        Arc::new(BarProgress::new())
    };
    let opts = ApplyOptions {
        verify: !args.no_verify,
        progress,
    };

    let finished = match pipeline::apply(&planned, &selection, &session.ctx, &session.walk, &opts) {
        Ok(finished) => finished,
        Err(err) => {
            // Unlike a plan failure, the traversal may already have
            // converged some nodes before stopping.
            eprintln!("{err:#}");
            return Ok(EXIT_FATAL);
        }
    };

    ui::print_report("Apply", &finished, cli.quiet);
    Ok(if has_fatal(&finished) { EXIT_FATAL } else { EXIT_OK })
}
