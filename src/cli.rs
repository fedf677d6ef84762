use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "attune")]
#[command(version)]
#[command(about = "Declarative configuration convergence for your hosts", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub nocolor: bool,

    /// Worker pool size for graph traversals; 1 forces serial execution
    #[arg(long, global = true)]
    pub concurrency: Option<usize>,

    /// TOML or JSON file overriding top-level params
    #[arg(long, global = true)]
    pub paramsfile: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show what would change without touching the host
    Plan(PlanArgs),

    /// Converge the host to the declared state
    Apply(ApplyArgs),

    /// Print the resolved graph
    Graph(GraphArgs),
}

#[derive(Args)]
pub struct PlanArgs {
    /// Module source file
    pub file: PathBuf,
}

#[derive(Args)]
pub struct ApplyArgs {
    /// Module source file
    pub file: PathBuf,

    /// Apply even when the plan contains fatal nodes
    #[arg(long)]
    pub force: bool,

    /// Trust each apply's own status instead of re-checking convergence
    #[arg(long)]
    pub no_verify: bool,
}

#[derive(Args)]
pub struct GraphArgs {
    /// Module source file
    pub file: PathBuf,

    /// Output format
    #[arg(long, value_enum, default_value_t = GraphFormat::Dot)]
    pub format: GraphFormat,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GraphFormat {
    /// Graphviz DOT
    Dot,
    /// Indented tree
    Text,
}
