//! The stock rewrite stages.

pub mod canonicalize;
pub mod inplace;
pub mod merge;
pub mod print_graph;
pub mod specialize;
pub mod stabilize;
pub mod useless;

use crate::rewrite::{RewriteDatabase, RewriteError, Stage, StageKind};
use symfun_graph::{FunctionGraph, NodeId, Op, ScalarOp, VarId};

/// The value every element of `var` holds, if `var` is a constant filled with one value.
pub(crate) fn uniform_constant(fgraph: &FunctionGraph, var: VarId) -> Option<f64> {
    let value = fgraph.var(var).constant()?;
    value.with_data(|data| {
        let (&first, rest) = data.split_first()?;
        if rest.iter().all(|&x| x == first) {
            Some(first)
        } else {
            None
        }
    })
}

/// The operands of `node` if it is the non-destructive elementwise `scalar`.
pub(crate) fn match_elemwise(
    fgraph: &FunctionGraph,
    node: NodeId,
    scalar: ScalarOp,
) -> Option<Vec<VarId>> {
    let content = fgraph.node(node)?;
    match content.op {
        Op::Elemwise {
            scalar: found,
            inplace: None,
        } if found == scalar => Some(content.inputs.clone()),
        _ => None,
    }
}

/// The operands of the node producing `var`, if that node is the elementwise `scalar`.
pub(crate) fn match_producer(
    fgraph: &FunctionGraph,
    var: VarId,
    scalar: ScalarOp,
) -> Option<Vec<VarId>> {
    let (node, _, _) = fgraph.producer(var)?;
    match_elemwise(fgraph, node, scalar)
}

/// `Some(vec![var])` when `var` can stand in for the single output of `node`.
pub(crate) fn same_type_as_output(
    fgraph: &FunctionGraph,
    node: NodeId,
    var: VarId,
) -> Option<Vec<VarId>> {
    let output = *fgraph.node(node)?.outputs.first()?;
    if fgraph.ty(output) == fgraph.ty(var) {
        Some(vec![var])
    } else {
        None
    }
}

pub fn merge_stage(name: &str, position: f64, tags: &[&str]) -> Stage {
    Stage::new(name, position, StageKind::Once)
        .tagged(&["merge"])
        .with(merge::merge_rewrite(tags))
}

/// The standard pipeline, in position order:
///
/// | position | stage          |
/// |----------|----------------|
/// | 0        | `merge1`       |
/// | 0.6      | `useless`      |
/// | 1        | `canonicalize` |
/// | 1.5      | `stabilize`    |
/// | 2        | `specialize`   |
/// | 49       | `merge2`       |
/// | 75       | `inplace`      |
/// | 100      | `merge3`       |
/// | 101      | `print_graph`  |
pub fn standard_database() -> Result<RewriteDatabase, RewriteError> {
    let mut db = RewriteDatabase::new();
    db.register(merge_stage("merge1", 0.0, &["merge", "fast_run", "fast_compile"]))?;
    db.register(useless::stage())?;
    db.register(canonicalize::stage())?;
    db.register(stabilize::stage())?;
    db.register(specialize::stage())?;
    db.register(merge_stage("merge2", 49.0, &["merge", "fast_run"]))?;
    db.register(inplace::stage())?;
    db.register(merge_stage("merge3", 100.0, &["merge", "fast_run"]))?;
    db.register(print_graph::stage())?;
    Ok(db)
}

#[cfg(test)]
pub(crate) mod test_util {
    use crate::rewrite::engine::{optimize, RewriteOptions, RewriteReport};
    use crate::rewrite::{RewriteDatabase, RewriteQuery, Stage};
    use symfun_graph::{FunctionGraph, Graph, VarId};

    pub fn run_stage(
        stage: Stage,
        tags: &[&str],
        graph: &Graph,
        inputs: &[VarId],
        outputs: &[VarId],
    ) -> (FunctionGraph, RewriteReport) {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut db = RewriteDatabase::new();
        db.register(stage).unwrap();
        let mut fgraph = FunctionGraph::capture(graph, inputs, outputs, false).unwrap();
        let (report, _) = optimize(
            &db,
            &RewriteQuery::including(tags),
            &mut fgraph,
            &RewriteOptions::default(),
        )
        .unwrap();
        (fgraph, report)
    }

    pub fn op_names(fgraph: &FunctionGraph) -> Vec<String> {
        let mut names = fgraph
            .live_nodes()
            .map(|(_, node)| node.op.name())
            .collect::<Vec<_>>();
        names.sort();
        names
    }
}
