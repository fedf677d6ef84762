pub mod apply;
pub mod graph;
pub mod plan;

use crate::cli::Cli;
use crate::params;
// `::graph` disambiguates the crate from this module's `graph` submodule.
use ::graph::{Graph, WalkOptions};
use anyhow::Result;
use indexmap::IndexMap;
use log::debug;
use pipeline::{PipelineError, PlanEntry, RunContext, Selection};
use resource::Value;
use std::path::Path;

/// Everything a command needs before touching the pipeline
pub struct Session {
    pub walk: WalkOptions,
    pub ctx: RunContext,
    pub overrides: IndexMap<String, Value>,
}

pub fn session(cli: &Cli) -> Result<Session> {
    let walk = match cli.concurrency {
        Some(n) => WalkOptions::with_concurrency(n),
        None => WalkOptions::default(),
    };
    let overrides = params::load_overrides(cli.paramsfile.as_deref())?;
    Ok(Session {
        walk,
        ctx: RunContext::capture(),
        overrides,
    })
}

/// Drive the pipeline through planning
pub fn build_plan(
    file: &Path,
    session: &Session,
) -> Result<(Graph<PlanEntry>, Selection), PipelineError> {
    let resolved = pipeline::load_resolved(
        file,
        &session.overrides,
        resource::registry::global(),
        &session.walk,
    )?;
    debug!("resolved {} nodes from {}", resolved.len(), file.display());

    let tasks = pipeline::render(&resolved, &session.ctx, &session.walk)?;
    let selection = pipeline::select_branches(&tasks);
    let planned = pipeline::plan(&tasks, &selection, &session.ctx, &session.walk)?;
    Ok((planned, selection))
}
