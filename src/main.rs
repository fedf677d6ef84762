mod cli;
mod commands;
mod params;
mod ui;

use clap::Parser;
use clap::error::ErrorKind;
use cli::{Cli, Command};

/// Convergence succeeded (or there was nothing to do)
pub const EXIT_OK: i32 = 0;
/// Plan or apply had a fatal node, or an apply stopped partway; the host
/// may have been partially converged
pub const EXIT_FATAL: i32 = 1;
/// The module source could not be loaded or resolved; nothing ran
pub const EXIT_LOAD: i32 = 2;
/// Bad invocation
pub const EXIT_USAGE: i32 = 3;

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => EXIT_OK,
                _ => EXIT_USAGE,
            };
            let _ = err.print();
            std::process::exit(code);
        }
    };

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    if cli.nocolor {
        colored::control::set_override(false);
    }

    let result = match &cli.command {
        Command::Plan(args) => commands::plan::run(&cli, args),
        Command::Apply(args) => commands::apply::run(&cli, args),
        Command::Graph(args) => commands::graph::run(&cli, args),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(EXIT_LOAD);
        }
    }
}
