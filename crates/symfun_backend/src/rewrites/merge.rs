//! Merging of structurally identical constants and nodes.
//!
//! Nodes are visited in schedule order, so by the time a node is looked at its inputs have
//! already been merged.  One pass therefore reaches a fixpoint.

use crate::rewrite::{replace_validated, Rewrite, RewriteError};
use rustc_hash::FxHashMap;
use symfun_graph::{FunctionGraph, NodeId, Orderings, Type, VarId, VarKind};

fn merge_constants(fgraph: &mut FunctionGraph) -> Result<usize, RewriteError> {
    let mut buckets: FxHashMap<(Type, Vec<u64>), VarId> = FxHashMap::default();
    let mut pairs = Vec::new();

    for var in fgraph.live_vars() {
        let VarKind::Constant(value) = &fgraph.var(var).kind else {
            continue;
        };
        let bits = value.with_data(|data| data.iter().map(|x| x.to_bits()).collect());
        let key = (fgraph.ty(var).clone(), bits);
        match buckets.get(&key) {
            Some(&survivor) => pairs.push((var, survivor)),
            None => {
                buckets.insert(key, var);
            }
        }
    }

    let mut merged = 0;
    for &(old, new) in &pairs {
        if replace_validated(fgraph, &[(old, new)])? {
            merged += 1;
        }
    }
    Ok(merged)
}

/// Replaces `duplicate` with `survivor` unless that breaks aliasing.
fn try_merge(
    fgraph: &mut FunctionGraph,
    duplicate: NodeId,
    survivor: NodeId,
) -> Result<bool, RewriteError> {
    let (Some(dup), Some(surv)) = (fgraph.node(duplicate), fgraph.node(survivor)) else {
        return Ok(false);
    };
    let pairs = dup
        .outputs
        .iter()
        .copied()
        .zip(surv.outputs.iter().copied())
        .collect::<Vec<_>>();

    let merged = replace_validated(fgraph, &pairs)?;
    if !merged {
        log::trace!("not merging {:?} into {:?}", duplicate, survivor);
    }
    Ok(merged)
}

pub fn merge(fgraph: &mut FunctionGraph) -> Result<bool, RewriteError> {
    let mut merged = merge_constants(fgraph)?;

    let mut buckets: FxHashMap<Vec<VarId>, Vec<NodeId>> = FxHashMap::default();
    for node in fgraph.toposort(&Orderings::new())? {
        let Some(content) = fgraph.node(node) else {
            continue;
        };
        // Two destroyers of the same inputs are two distinct writes.
        if content.op.is_destructive() {
            continue;
        }
        let key = content.inputs.clone();
        let survivor = buckets.get(&key).and_then(|candidates| {
            candidates.iter().copied().find(|&candidate| {
                fgraph
                    .node(candidate)
                    .is_some_and(|other| other.op == content.op)
            })
        });

        match survivor {
            Some(survivor) if try_merge(fgraph, node, survivor)? => merged += 1,
            _ => buckets.entry(key).or_default().push(node),
        }
    }

    if merged > 0 {
        log::trace!("merged {} duplicates", merged);
    }
    Ok(merged > 0)
}

pub fn merge_rewrite(tags: &[&str]) -> Rewrite {
    Rewrite::global("merge", tags, merge)
}
