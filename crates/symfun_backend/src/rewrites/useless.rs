use crate::rewrite::{Rewrite, Stage, StageKind};
use crate::rewrites::same_type_as_output;
use symfun_graph::Op;

/// Identity views and copies inside the graph serve no purpose: protective copies are only
/// added after rewriting, by the reuse planner.
pub fn remove_identity() -> Rewrite {
    Rewrite::local(
        "remove_identity",
        &["useless", "fast_run", "fast_compile"],
        |fgraph, node| {
            let content = fgraph.expect_node(node)?;
            match content.op {
                Op::ViewOp | Op::DeepCopy => Ok(same_type_as_output(fgraph, node, content.inputs[0])),
                _ => Ok(None),
            }
        },
    )
}

pub fn stage() -> Stage {
    Stage::new("useless", 0.6, StageKind::fixed_point())
        .tagged(&["useless"])
        .with(remove_identity())
}
