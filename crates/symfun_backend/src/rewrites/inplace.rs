use crate::reuse::infer_reuse_pattern;
use crate::rewrite::{Rewrite, RewriteError, Stage, StageKind};
use symfun_graph::{FunctionGraph, Orderings};

/// Turns each node that can safely overwrite one of its inputs into its destructive form.
///
/// Nodes are considered in schedule order and each conversion is kept before the next node is
/// examined, so later decisions see the destroyers introduced by earlier ones.
pub fn make_inplace(fgraph: &mut FunctionGraph) -> Result<bool, RewriteError> {
    let mut changed = false;
    for node in fgraph.toposort(&Orderings::new())? {
        let Some(content) = fgraph.node(node) else {
            continue;
        };
        if content.op.is_destructive() || content.op.destructive_variant(0).is_none() {
            continue;
        }
        let op = content.op.clone();

        let Some(&input) = infer_reuse_pattern(fgraph, node)?.first() else {
            continue;
        };
        if let Some(variant) = op.destructive_variant(input) {
            log::trace!("node {:?}: {} overwrites input {}", node, op.name(), input);
            fgraph.replace_node_op(node, variant)?;
            changed = true;
        }
    }
    Ok(changed)
}

pub fn stage() -> Stage {
    Stage::new("inplace", 75.0, StageKind::Once)
        .tagged(&["inplace"])
        .destructive()
        .with(Rewrite::global(
            "make_inplace",
            &["inplace", "fast_run"],
            make_inplace,
        ))
}
