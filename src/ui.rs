//! Terminal report rendering

use chrono::Local;
use colored::Colorize;
use graph::Graph;
use pipeline::PlanEntry;
use resource::StatusCode;

/// Counts of outcomes in a plan or apply graph
#[derive(Debug, Default, Clone, Copy)]
pub struct Summary {
    pub will_change: usize,
    pub no_change: usize,
    pub cant_change: usize,
    pub fatal: usize,
}

impl Summary {
    pub fn from_graph(g: &Graph<PlanEntry>) -> Self {
        let mut summary = Self::default();
        for id in g.ids() {
            let Some(entry) = g.get(&id) else { continue };
            match entry.status.code {
                StatusCode::WillChange => summary.will_change += 1,
                StatusCode::NoChange => summary.no_change += 1,
                StatusCode::CantChange => summary.cant_change += 1,
                StatusCode::Fatal => summary.fatal += 1,
            }
        }
        summary
    }
}

/// Print a plan or apply report: every non-NoChange outcome, then counts
pub fn print_report(title: &str, g: &Graph<PlanEntry>, quiet: bool) {
    let summary = Summary::from_graph(g);

    if !quiet {
        println!();
        println!(
            "{} {} ({})",
            "==".dimmed(),
            title.bold(),
            Local::now().format("%Y-%m-%d %H:%M:%S")
        );
    }

    for id in g.ids() {
        let Some(entry) = g.get(&id) else { continue };
        let interesting = entry.status.code != StatusCode::NoChange || !entry.status.output.is_empty();
        if !interesting {
            continue;
        }

        let symbol = match entry.status.code {
            StatusCode::WillChange => "~".yellow(),
            StatusCode::NoChange => "✓".green(),
            StatusCode::CantChange => "!".red(),
            StatusCode::Fatal => "✗".red().bold(),
        };
        println!("  {} {}", symbol, id);

        for diff in &entry.status.diffs {
            if diff.changes() {
                println!(
                    "      {}: {} {} {}",
                    diff.field.dimmed(),
                    format!("{:?}", diff.current).red(),
                    "→".dimmed(),
                    format!("{:?}", diff.desired).green()
                );
            }
        }
        for line in &entry.status.output {
            println!("      {}", line.dimmed());
        }
    }

    if !quiet {
        println!();
        println!(
            "  {} to change, {} unchanged, {} blocked, {} fatal",
            summary.will_change.to_string().yellow(),
            summary.no_change.to_string().green(),
            summary.cant_change,
            if summary.fatal > 0 {
                summary.fatal.to_string().red().to_string()
            } else {
                summary.fatal.to_string()
            }
        );
    }
}
