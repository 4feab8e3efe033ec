//! Buffer reuse and protective copies.
//!
//! [`infer_reuse_pattern`] decides which inputs a node may overwrite, and drives the `inplace`
//! stage.  [`insert_deepcopy`] runs once rewriting is done and makes sure no output hands the
//! caller a raw alias of storage it did not agree to share.

use symfun_graph::alias::{self, AliasedMemoryError};
use symfun_graph::{FunctionGraph, GraphError, NodeId, Op, VarId, VarKind};

/// Whether a node may overwrite one of its inputs.
#[derive(Clone, Debug, PartialEq)]
pub enum Liveness {
    /// Only this node still needs the input's storage.
    Unique,
    /// The storage must survive the node.
    Shared(AliasedMemoryError),
    /// The op cannot write its output over this input at all.
    Incompatible,
}

/// The per-input safety of overwriting, proven by trying the destructive form of the node on a
/// copy of the graph and validating the result.
pub fn input_liveness(fgraph: &FunctionGraph, node: NodeId) -> Result<Vec<Liveness>, GraphError> {
    let content = fgraph.expect_node(node)?;
    let input_types = content
        .inputs
        .iter()
        .map(|&var| fgraph.ty(var).clone())
        .collect::<Vec<_>>();
    let output_types = content
        .outputs
        .iter()
        .map(|&var| fgraph.ty(var).clone())
        .collect::<Vec<_>>();
    let candidates = content.op.reuse_candidates(&input_types, &output_types);

    let mut liveness = Vec::with_capacity(content.inputs.len());
    for index in 0..content.inputs.len() {
        let variant = match content.op.destructive_variant(index) {
            Some(variant) if candidates.contains(&index) => variant,
            _ => {
                liveness.push(Liveness::Incompatible);
                continue;
            }
        };
        let mut trial = fgraph.clone();
        trial.replace_node_op(node, variant)?;
        liveness.push(match alias::validate(&trial) {
            Ok(_) => Liveness::Unique,
            Err(err) => Liveness::Shared(err),
        });
    }
    Ok(liveness)
}

/// The inputs of `node` that are safe to overwrite with its output.
pub fn infer_reuse_pattern(fgraph: &FunctionGraph, node: NodeId) -> Result<Vec<usize>, GraphError> {
    Ok(input_liveness(fgraph, node)?
        .into_iter()
        .enumerate()
        .filter(|(_, liveness)| *liveness == Liveness::Unique)
        .map(|(index, _)| index)
        .collect())
}

/// How a declared input may be shared with outputs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InputContract {
    pub var: VarId,
    pub borrow: bool,
    /// The input is a shared value with an update.
    pub updated: bool,
}

/// How a graph output may alias other storage.  Update outputs carry the input they are
/// written back to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutputContract {
    pub borrow: bool,
    pub update_of: Option<VarId>,
}

fn wrap_output(fgraph: &mut FunctionGraph, index: usize, view: bool) -> Result<(), GraphError> {
    let output = fgraph.outputs()[index];
    let op = if view { Op::ViewOp } else { Op::DeepCopy };
    log::trace!("protecting output {} with {}", index, op.name());
    let wrapped = fgraph.add_node1(op, &[output])?;
    fgraph.replace_output(index, wrapped)
}

/// Inserts `view_op` or `deep_copy` nodes in front of outputs that alias another output, a
/// declared input, a constant or a shared value.  Returns how many outputs were wrapped.
pub fn insert_deepcopy(
    fgraph: &mut FunctionGraph,
    inputs: &[InputContract],
    outputs: &[OutputContract],
) -> Result<usize, GraphError> {
    debug_assert_eq!(outputs.len(), fgraph.outputs().len());

    let destroyed_roots = fgraph
        .live_nodes()
        .flat_map(|(_, node)| {
            node.op
                .destroy_map()
                .into_iter()
                .map(|(_, input)| node.inputs[input])
                .collect::<Vec<_>>()
        })
        .map(|var| alias::alias_root(fgraph, var))
        .collect::<Vec<_>>();

    let mut wrapped = 0;
    for i in 0..outputs.len() {
        let root = alias::alias_root(fgraph, fgraph.outputs()[i]);

        let aliased_later = (i + 1..outputs.len())
            .find(|&j| alias::alias_root(fgraph, fgraph.outputs()[j]) == root);
        if let Some(j) = aliased_later {
            wrap_output(fgraph, i, outputs[i].borrow && outputs[j].borrow)?;
            wrapped += 1;
            continue;
        }

        if let Some(target) = outputs[i].update_of {
            if root != target && fgraph.var(root).is_root() {
                wrap_output(fgraph, i, false)?;
                wrapped += 1;
            }
            continue;
        }

        let view = match &fgraph.var(root).kind {
            VarKind::Output { .. } => continue,
            VarKind::Shared(_) => false,
            VarKind::Constant(_) => outputs[i].borrow,
            VarKind::Input => match inputs.iter().find(|input| input.var == root) {
                Some(input) if input.updated || destroyed_roots.contains(&root) => continue,
                Some(input) => input.borrow && outputs[i].borrow,
                None => false,
            },
        };
        wrap_output(fgraph, i, view)?;
        wrapped += 1;
    }
    Ok(wrapped)
}
