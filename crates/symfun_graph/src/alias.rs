//! Destroy-map and view-map analysis.
//!
//! Every destructive node overwrites the storage of one of its inputs.  That is only sound when
//! nobody can observe the old contents afterwards: the storage must not belong to the caller or
//! to a shared container (the supervisor's protected set), and every other reader of the storage
//! must be scheduled before the destroyer.  [`validate`] checks both conditions and returns the
//! extra scheduling edges the second one demands.

use crate::fgraph::{Client, FunctionGraph, Orderings};
use crate::graph::{NodeId, VarId, VarKind};
use im_rc::OrdSet;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum AliasedMemoryError {
    #[error("{op} (node {node:?}) would overwrite protected storage of {root:?} through {var:?}")]
    Protected {
        node: NodeId,
        op: String,
        var: VarId,
        root: VarId,
    },
    #[error("{op} (node {node:?}) would overwrite {var:?}, which is still read by {reader}")]
    LiveAlias {
        node: NodeId,
        op: String,
        var: VarId,
        reader: String,
    },
    #[error("nodes {first:?} and {second:?} both overwrite the storage of {root:?}")]
    MultipleDestroyers {
        first: NodeId,
        second: NodeId,
        root: VarId,
    },
    #[error("the orderings required by destructive operations are cyclic")]
    OrderingCycle,
    #[error("{op} (node {node:?}) is destructive but in-place operations were not accepted")]
    InplaceNotAccepted { node: NodeId, op: String },
}

/// Variables whose storage must never be overwritten.
#[derive(Clone, Debug, Default)]
pub struct Supervisor {
    protected: OrdSet<VarId>,
}

impl Supervisor {
    pub fn protect(&mut self, var: VarId) {
        self.protected.insert(var);
    }

    pub fn is_protected(&self, var: VarId) -> bool {
        self.protected.contains(&var)
    }
}

/// The variable that owns the storage `var` lives in.  Views and destructive outputs share their
/// input's buffer, so both are followed.
pub fn alias_root(fgraph: &FunctionGraph, var: VarId) -> VarId {
    let mut current = var;
    while let Some((_, node, index)) = fgraph.producer(current) {
        let source = node
            .op
            .view_map()
            .into_iter()
            .chain(node.op.destroy_map())
            .find(|&(output, _)| output == index);
        match source {
            Some((_, input)) => current = node.inputs[input],
            None => break,
        }
    }
    current
}

/// Maps every live variable to the variable owning its storage.
pub fn storage_roots(fgraph: &FunctionGraph) -> BTreeMap<VarId, VarId> {
    fgraph
        .live_vars()
        .into_iter()
        .map(|var| (var, alias_root(fgraph, var)))
        .collect()
}

/// All live variables sharing the storage of `root`, `root` included.
pub fn view_tree_set(fgraph: &FunctionGraph, root: VarId) -> OrdSet<VarId> {
    storage_roots(fgraph)
        .into_iter()
        .filter(|&(_, owner)| owner == root)
        .map(|(var, _)| var)
        .collect()
}

/// Storage the compiled function may not overwrite regardless of the supervisor: constants, and
/// shared containers it reads without declaring them.
fn is_intrinsically_protected(fgraph: &FunctionGraph, root: VarId) -> bool {
    match fgraph.var(root).kind {
        VarKind::Constant(_) => true,
        VarKind::Shared(_) | VarKind::Input => !fgraph.inputs().contains(&root),
        VarKind::Output { .. } => false,
    }
}

pub fn is_protected(fgraph: &FunctionGraph, root: VarId) -> bool {
    fgraph.supervisor().is_protected(root) || is_intrinsically_protected(fgraph, root)
}

/// Rejects a graph containing destructive nodes before any rewrite has run.
pub fn check_no_inplace(fgraph: &FunctionGraph) -> Result<(), AliasedMemoryError> {
    match fgraph
        .live_nodes()
        .find(|(_, node)| node.op.is_destructive())
    {
        Some((node, content)) => Err(AliasedMemoryError::InplaceNotAccepted {
            node,
            op: content.op.name(),
        }),
        None => Ok(()),
    }
}

/// Checks every destructive node in the graph.  On success, returns the orderings under which
/// every destroyer runs after all other readers of the storage it overwrites.
pub fn validate(fgraph: &FunctionGraph) -> Result<Orderings, AliasedMemoryError> {
    let roots = storage_roots(fgraph);
    let clients = fgraph.clients();
    let mut orderings = Orderings::new();

    for (destroyer, node) in fgraph.live_nodes() {
        let destroy_map = node.op.destroy_map();
        if destroy_map.is_empty() {
            continue;
        }
        let op = node.op.name();
        let descendants = fgraph.descendants(destroyer);
        let ancestors = node
            .inputs
            .iter()
            .flat_map(|&input| fgraph.ancestors(input))
            .collect::<BTreeSet<_>>();

        for (_, input) in destroy_map {
            let var = node.inputs[input];
            let root = roots.get(&var).copied().unwrap_or(var);
            if is_protected(fgraph, root) {
                return Err(AliasedMemoryError::Protected {
                    node: destroyer,
                    op,
                    var,
                    root,
                });
            }

            let pre_destroy = roots.iter().filter(|&(&member, &owner)| {
                owner == root
                    && match fgraph.producer(member) {
                        Some((producer, _, _)) => {
                            producer != destroyer && !descendants.contains(&producer)
                        }
                        None => true,
                    }
            });

            for (&member, _) in pre_destroy {
                for &client in clients.get(&member).into_iter().flatten() {
                    let reader = match client {
                        Client::Output(index) => {
                            return Err(AliasedMemoryError::LiveAlias {
                                node: destroyer,
                                op,
                                var: member,
                                reader: format!("graph output {}", index),
                            });
                        }
                        Client::Node(reader, _) if reader == destroyer => continue,
                        Client::Node(reader, _) => reader,
                    };
                    let Some(reader_node) = fgraph.node(reader) else {
                        continue;
                    };
                    if reader_node.op.is_pure_view() {
                        continue;
                    }
                    if descendants.contains(&reader) {
                        return Err(AliasedMemoryError::LiveAlias {
                            node: destroyer,
                            op,
                            var: member,
                            reader: format!("{} (node {:?})", reader_node.op.name(), reader),
                        });
                    }
                    let destroys_same_storage =
                        reader_node.op.destroy_map().iter().any(|&(_, other)| {
                            let other = reader_node.inputs[other];
                            roots.get(&other).copied().unwrap_or(other) == root
                        });
                    if destroys_same_storage && !ancestors.contains(&reader) {
                        return Err(AliasedMemoryError::MultipleDestroyers {
                            first: reader.min(destroyer),
                            second: reader.max(destroyer),
                            root,
                        });
                    }
                    orderings.entry(destroyer).or_default().insert(reader);
                }
            }
        }
    }

    fgraph
        .toposort(&orderings)
        .map_err(|_| AliasedMemoryError::OrderingCycle)?;
    Ok(orderings)
}
