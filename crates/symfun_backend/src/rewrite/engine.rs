use crate::rewrite::{
    replace_validated, Action, Rewrite, RewriteDatabase, RewriteError, RewriteQuery, StageKind,
};
use symfun_common::progress_ui::{self, ProgressMode};
use symfun_common::util::progress_logger::{ProgressLogger, ProgressSession};
use symfun_graph::{alias, FunctionGraph, Orderings};
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, Default)]
pub struct RewriteOptions {
    /// Replaces the budget of every fixed-point stage.
    pub max_iters: Option<usize>,
    pub progress: ProgressMode,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StageReport {
    pub name: String,
    pub iterations: usize,
    pub applied: usize,
    pub converged: bool,
    pub time: Duration,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RewriteReport {
    pub stages: Vec<StageReport>,
    pub warnings: Vec<String>,
}

impl RewriteReport {
    pub fn applied(&self) -> usize {
        self.stages.iter().map(|stage| stage.applied).sum()
    }

    pub fn stage(&self, name: &str) -> Option<&StageReport> {
        self.stages.iter().find(|stage| stage.name == name)
    }
}

/// One scan over the graph.  Returns how many rewrites were applied.
fn run_iteration(fgraph: &mut FunctionGraph, rewrites: &[&Rewrite]) -> Result<usize, RewriteError> {
    let mut applied = 0;

    for rewrite in rewrites {
        if let Action::Global(f) = &rewrite.action {
            if f(fgraph)? {
                log::trace!("applied global rewrite {}", rewrite.name);
                applied += 1;
            }
        }
    }

    let locals = rewrites
        .iter()
        .filter_map(|rewrite| match &rewrite.action {
            Action::Local(f) => Some((rewrite.name.as_str(), f)),
            Action::Global(_) => None,
        })
        .collect::<Vec<_>>();
    if locals.is_empty() {
        return Ok(applied);
    }

    for node in fgraph.toposort(&Orderings::new())? {
        for (name, f) in &locals {
            // An earlier rewrite in this scan may have replaced the node.
            let Some(content) = fgraph.node(node) else {
                break;
            };
            let outputs = content.outputs.clone();

            let arena_size = fgraph.node_count();
            let Some(replacements) = f(fgraph, node)? else {
                if fgraph.node_count() != arena_size {
                    fgraph.prune();
                }
                continue;
            };
            let pairs = outputs
                .into_iter()
                .zip(replacements)
                .filter(|(old, new)| old != new)
                .collect::<Vec<_>>();
            if pairs.is_empty() {
                continue;
            }

            match replace_validated(fgraph, &pairs) {
                Ok(true) => {
                    log::trace!("applied {} to node {:?}", name, node);
                    applied += 1;
                }
                Ok(false) => {
                    log::trace!("{} on node {:?} would break aliasing", name, node);
                    fgraph.prune();
                }
                Err(err) => {
                    log::trace!("rejected {} on node {:?}: {}", name, node, err);
                    fgraph.prune();
                }
            }
        }
    }

    Ok(applied)
}

/// Runs every stage `query` selects from `db`, in position order, and validates aliasing after
/// each destructive stage and at the end.  Returns the orderings the final graph needs.
pub fn optimize(
    db: &RewriteDatabase,
    query: &RewriteQuery,
    fgraph: &mut FunctionGraph,
    options: &RewriteOptions,
) -> Result<(RewriteReport, Orderings), RewriteError> {
    let mut report = RewriteReport::default();

    for selected in db.select(query) {
        let stage = selected.stage;
        let max_iters = match stage.kind {
            StageKind::FixedPoint { max_iters } => options.max_iters.unwrap_or(max_iters).max(1),
            StageKind::Once => 1,
        };

        let start = Instant::now();
        let mut session =
            progress_ui::bar(options.progress, &stage.name).start_session(Some(max_iters));
        let mut iterations = 0;
        let mut applied = 0;
        let mut converged = false;

        while iterations < max_iters {
            iterations += 1;
            let count = run_iteration(fgraph, &selected.rewrites)?;
            applied += count;
            session.update(1);
            if count == 0 {
                converged = true;
                break;
            }
        }
        session.finish();

        if stage.kind == StageKind::Once {
            converged = true;
        }
        if !converged {
            let warning = format!(
                "stage '{}' did not reach a fixpoint within {} iterations",
                stage.name, max_iters
            );
            log::warn!("{}", warning);
            report.warnings.push(warning);
        }

        if stage.may_destroy {
            alias::validate(fgraph)?;
        }

        let time = start.elapsed();
        log::debug!(
            "stage {}: {} rewrites in {} iterations ({:?})",
            stage.name,
            applied,
            iterations,
            time
        );
        report.stages.push(StageReport {
            name: stage.name.clone(),
            iterations,
            applied,
            converged,
            time,
        });
    }

    let orderings = alias::validate(fgraph)?;
    Ok((report, orderings))
}
