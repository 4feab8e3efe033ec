//! The captured compilation graph.
//!
//! A [`FunctionGraph`] owns private copies of the variable and node arenas of the [`Graph`] it was
//! captured from.  Handles are never recycled: removing a node empties its slot, and rewrites
//! redirect edges from one variable to another rather than editing the variables themselves.

use crate::alias::Supervisor;
use crate::data::dtype::Type;
use crate::data::op::{Op, OpError};
use crate::data::value::Value;
use crate::graph::{Graph, Node, NodeId, VarId, VarKind, Variable};
use id_collections::{id_type, IdVec};
use id_graph_sccs::{SccKind, Sccs};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum GraphError {
    #[error("variable {var:?}{} is required to compute the outputs but was not declared as an input", fmt_name(.name))]
    UndeclaredInput { var: VarId, name: Option<String> },
    #[error("output {index} does not depend on any declared input")]
    DisconnectedOutput { index: usize },
    #[error("declared input {var:?} is computed by the graph and cannot be an input")]
    NotARoot { var: VarId },
    #[error("cannot replace {old:?} of type {old_ty} with {new:?} of type {new_ty}")]
    TypeMismatch {
        old: VarId,
        new: VarId,
        old_ty: Type,
        new_ty: Type,
    },
    #[error("replacing {old:?} with {new:?} would create a cycle")]
    Cycle { old: VarId, new: VarId },
    #[error("the graph and its ordering constraints are cyclic")]
    CyclicSchedule,
    #[error("node {0:?} has been removed from the graph")]
    RemovedNode(NodeId),
    #[error("op {new} does not produce the same outputs as {old}")]
    OpSignature { old: String, new: String },
    #[error("the graph has no output {index}")]
    NoSuchOutput { index: usize },
    #[error(transparent)]
    Op(#[from] OpError),
}

fn fmt_name(name: &Option<String>) -> String {
    match name {
        Some(name) => format!(" ('{}')", name),
        None => String::new(),
    }
}

/// Extra scheduling edges: each node maps to nodes that must run before it.
pub type Orderings = BTreeMap<NodeId, BTreeSet<NodeId>>;

/// A consumer of a variable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Client {
    /// Input slot of a node.
    Node(NodeId, usize),
    /// Slot of the graph's output list.
    Output(usize),
}

#[derive(Clone, Debug)]
pub struct FunctionGraph {
    vars: IdVec<VarId, Variable>,
    nodes: IdVec<NodeId, Option<Node>>,
    inputs: Vec<VarId>,
    outputs: Vec<VarId>,
    supervisor: Supervisor,
}

impl FunctionGraph {
    /// Captures the subgraph computing `outputs` from `inputs`.
    ///
    /// Constants and shared values are allowed as undeclared roots.  Any other root encountered
    /// on the way back from the outputs must be declared.
    pub fn capture(
        graph: &Graph,
        inputs: &[VarId],
        outputs: &[VarId],
        require_output_dependence: bool,
    ) -> Result<Self, GraphError> {
        for &input in inputs {
            if !graph.var(input).is_root() {
                return Err(GraphError::NotARoot { var: input });
            }
        }

        let declared = inputs.iter().copied().collect::<BTreeSet<_>>();
        let mut visited = BTreeSet::new();
        let mut stack = outputs.to_vec();
        while let Some(var) = stack.pop() {
            if !visited.insert(var) {
                continue;
            }
            let variable = graph.var(var);
            match &variable.kind {
                VarKind::Input if !declared.contains(&var) => {
                    return Err(GraphError::UndeclaredInput {
                        var,
                        name: variable.name.clone(),
                    });
                }
                VarKind::Input | VarKind::Shared(_) | VarKind::Constant(_) => {}
                VarKind::Output { node, .. } => stack.extend(&graph.node(*node).inputs),
            }
        }

        let mut fgraph = FunctionGraph {
            vars: graph.vars.clone(),
            nodes: graph.nodes.clone().map(|_, node| Some(node)),
            inputs: inputs.to_vec(),
            outputs: outputs.to_vec(),
            supervisor: Supervisor::default(),
        };
        fgraph.prune();

        if require_output_dependence {
            for (index, &output) in outputs.iter().enumerate() {
                let roots = fgraph.root_ancestors(output);
                if !inputs.iter().any(|input| roots.contains(input)) {
                    return Err(GraphError::DisconnectedOutput { index });
                }
            }
        }

        Ok(fgraph)
    }

    pub fn inputs(&self) -> &[VarId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[VarId] {
        &self.outputs
    }

    pub fn var(&self, var: VarId) -> &Variable {
        &self.vars[var]
    }

    pub fn ty(&self, var: VarId) -> &Type {
        &self.vars[var].ty
    }

    pub fn node(&self, node: NodeId) -> Option<&Node> {
        self.nodes[node].as_ref()
    }

    pub fn expect_node(&self, node: NodeId) -> Result<&Node, GraphError> {
        self.node(node).ok_or(GraphError::RemovedNode(node))
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn live_nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes
            .iter()
            .filter_map(|(id, node)| node.as_ref().map(|node| (id, node)))
    }

    pub fn has_destroyers(&self) -> bool {
        self.live_nodes().any(|(_, node)| node.op.is_destructive())
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    pub fn supervisor_mut(&mut self) -> &mut Supervisor {
        &mut self.supervisor
    }

    /// The producing node of `var`, if it is live.
    pub fn producer(&self, var: VarId) -> Option<(NodeId, &Node, usize)> {
        let (node, index) = self.vars[var].producer()?;
        self.node(node).map(|content| (node, content, index))
    }

    /// All variables in use: roots, node outputs, and graph outputs.
    pub fn live_vars(&self) -> BTreeSet<VarId> {
        let mut vars = self.inputs.iter().copied().collect::<BTreeSet<_>>();
        vars.extend(&self.outputs);
        for (_, node) in self.live_nodes() {
            vars.extend(&node.inputs);
            vars.extend(&node.outputs);
        }
        vars
    }

    pub fn clients(&self) -> BTreeMap<VarId, Vec<Client>> {
        let mut clients: BTreeMap<VarId, Vec<Client>> = BTreeMap::new();
        for (id, node) in self.live_nodes() {
            for (slot, &input) in node.inputs.iter().enumerate() {
                clients.entry(input).or_default().push(Client::Node(id, slot));
            }
        }
        for (index, &output) in self.outputs.iter().enumerate() {
            clients.entry(output).or_default().push(Client::Output(index));
        }
        clients
    }

    /// Nodes that `var` transitively depends on, including its producer.
    pub fn ancestors(&self, var: VarId) -> BTreeSet<NodeId> {
        let mut ancestors = BTreeSet::new();
        let mut stack = vec![var];
        while let Some(var) = stack.pop() {
            if let Some((node, content, _)) = self.producer(var) {
                if ancestors.insert(node) {
                    stack.extend(&content.inputs);
                }
            }
        }
        ancestors
    }

    /// Nodes that transitively consume an output of `node`, excluding `node` itself.
    pub fn descendants(&self, node: NodeId) -> BTreeSet<NodeId> {
        let clients = self.clients();
        let mut descendants = BTreeSet::new();
        let mut stack = match self.node(node) {
            Some(content) => content.outputs.clone(),
            None => Vec::new(),
        };
        while let Some(var) = stack.pop() {
            for client in clients.get(&var).into_iter().flatten() {
                if let Client::Node(consumer, _) = client {
                    if descendants.insert(*consumer) {
                        if let Some(content) = self.node(*consumer) {
                            stack.extend(&content.outputs);
                        }
                    }
                }
            }
        }
        descendants
    }

    /// Root variables (inputs, constants, shared values) that `var` depends on.
    pub fn root_ancestors(&self, var: VarId) -> BTreeSet<VarId> {
        let mut roots = BTreeSet::new();
        let mut visited = BTreeSet::new();
        let mut stack = vec![var];
        while let Some(var) = stack.pop() {
            if !visited.insert(var) {
                continue;
            }
            match self.producer(var) {
                Some((_, node, _)) => stack.extend(&node.inputs),
                None => {
                    roots.insert(var);
                }
            }
        }
        roots
    }

    pub fn add_constant(&mut self, value: Value) -> VarId {
        self.vars.push(Variable {
            ty: value.ty(),
            kind: VarKind::Constant(value),
            name: None,
        })
    }

    /// Adds a node computing `op` over existing variables.  The node stays unreachable until a
    /// replacement routes a consumer to one of its outputs.
    pub fn add_node(&mut self, op: Op, inputs: &[VarId]) -> Result<Vec<VarId>, GraphError> {
        let input_types = inputs
            .iter()
            .map(|&var| self.vars[var].ty.clone())
            .collect::<Vec<_>>();
        let output_types = op.infer_types(&input_types)?;

        let node = NodeId(self.nodes.len());
        let outputs = output_types
            .into_iter()
            .enumerate()
            .map(|(index, ty)| {
                self.vars.push(Variable {
                    ty,
                    kind: VarKind::Output { node, index },
                    name: None,
                })
            })
            .collect::<Vec<_>>();
        self.nodes.push(Some(Node {
            op,
            inputs: inputs.to_vec(),
            outputs: outputs.clone(),
        }));
        Ok(outputs)
    }

    pub fn add_node1(&mut self, op: Op, inputs: &[VarId]) -> Result<VarId, GraphError> {
        let name = op.name();
        let outputs = self.add_node(op, inputs)?;
        match outputs[..] {
            [output] => Ok(output),
            _ => Err(GraphError::Op(OpError::OutputCount {
                op: name,
                expected: 1,
                got: outputs.len(),
            })),
        }
    }

    fn check_replacement(&self, old: VarId, new: VarId) -> Result<(), GraphError> {
        if self.vars[old].ty != self.vars[new].ty {
            return Err(GraphError::TypeMismatch {
                old,
                new,
                old_ty: self.vars[old].ty.clone(),
                new_ty: self.vars[new].ty.clone(),
            });
        }
        let ancestors = self.ancestors(new);
        let creates_cycle = self.live_nodes().any(|(id, node)| {
            node.inputs.contains(&old) && (ancestors.contains(&id) || node.outputs.contains(&new))
        });
        if creates_cycle {
            return Err(GraphError::Cycle { old, new });
        }
        Ok(())
    }

    /// Routes every consumer of `old` to `new`, then prunes whatever became unreachable.  On
    /// failure the graph is left unchanged.
    pub fn replace(&mut self, old: VarId, new: VarId) -> Result<(), GraphError> {
        if old == new {
            return Ok(());
        }
        self.check_replacement(old, new)?;
        log::trace!("replacing {:?} with {:?}", old, new);

        for node in self.nodes.values_mut().flatten() {
            for input in &mut node.inputs {
                if *input == old {
                    *input = new;
                }
            }
        }
        for output in &mut self.outputs {
            if *output == old {
                *output = new;
            }
        }
        self.prune();
        Ok(())
    }

    /// Applies several replacements as one transaction.
    pub fn replace_all(&mut self, pairs: &[(VarId, VarId)]) -> Result<(), GraphError> {
        let backup = self.clone();
        for &(old, new) in pairs {
            if let Err(err) = self.replace(old, new) {
                *self = backup;
                return Err(err);
            }
        }
        Ok(())
    }

    /// Redirects only the graph-output slot `index`.
    pub fn replace_output(&mut self, index: usize, new: VarId) -> Result<(), GraphError> {
        let old = *self
            .outputs
            .get(index)
            .ok_or(GraphError::NoSuchOutput { index })?;
        if self.vars[old].ty != self.vars[new].ty {
            return Err(GraphError::TypeMismatch {
                old,
                new,
                old_ty: self.vars[old].ty.clone(),
                new_ty: self.vars[new].ty.clone(),
            });
        }
        self.outputs[index] = new;
        self.prune();
        Ok(())
    }

    /// Swaps the op stored at `node`, keeping its edges.  The new op must produce outputs of the
    /// same types.
    pub fn replace_node_op(&mut self, node: NodeId, op: Op) -> Result<(), GraphError> {
        let content = self.expect_node(node)?;
        let input_types = content
            .inputs
            .iter()
            .map(|&var| self.vars[var].ty.clone())
            .collect::<Vec<_>>();
        let output_types = content
            .outputs
            .iter()
            .map(|&var| self.vars[var].ty.clone())
            .collect::<Vec<_>>();
        let old_name = content.op.name();

        if op.infer_types(&input_types)? != output_types {
            return Err(GraphError::OpSignature {
                old: old_name,
                new: op.name(),
            });
        }
        if let Some(content) = self.nodes[node].as_mut() {
            content.op = op;
        }
        Ok(())
    }

    /// Removes nodes that no graph output depends on.
    pub fn prune(&mut self) {
        let mut reachable = BTreeSet::new();
        for &output in &self.outputs {
            reachable.extend(self.ancestors(output));
        }
        for (id, slot) in self.nodes.iter_mut() {
            if slot.is_some() && !reachable.contains(&id) {
                log::trace!("pruning unreachable node {:?}", id);
                *slot = None;
            }
        }
    }

    /// A producer-before-consumer order of the live nodes that also satisfies `orderings`.
    pub fn toposort(&self, orderings: &Orderings) -> Result<Vec<NodeId>, GraphError> {
        #[id_type]
        struct SccId(usize);

        let sccs: Sccs<SccId, _> = id_graph_sccs::find_components(self.nodes.count(), |id| {
            let mut deps = BTreeSet::new();
            if let Some(node) = &self.nodes[id] {
                for &input in &node.inputs {
                    if let Some((producer, _, _)) = self.producer(input) {
                        deps.insert(producer);
                    }
                }
                if let Some(before) = orderings.get(&id) {
                    deps.extend(before.iter().filter(|&&dep| self.nodes[dep].is_some()));
                }
            }
            deps
        });

        let mut order = Vec::new();
        for (_, component) in &sccs {
            match component.kind {
                SccKind::Cyclic => return Err(GraphError::CyclicSchedule),
                SccKind::Acyclic => {
                    for &id in component.nodes {
                        if self.nodes[id].is_some() {
                            order.push(id);
                        }
                    }
                }
            }
        }
        Ok(order)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::data::dtype::DType;
    use crate::data::op::ScalarOp;
    use rand::{Rng, SeedableRng};
    use rand_pcg::Pcg64;

    fn fvec() -> Type {
        Type::vector(DType::Float64)
    }

    #[test]
    fn capture_requires_declared_inputs() {
        let mut g = Graph::new();
        let x = g.input(fvec(), "x");
        let y = g.input(fvec(), "y");
        let z = g.add(x, y).unwrap();

        assert!(matches!(
            FunctionGraph::capture(&g, &[x], &[z], false),
            Err(GraphError::UndeclaredInput { var, .. }) if var == y
        ));
        assert!(FunctionGraph::capture(&g, &[x, y], &[z], false).is_ok());
    }

    #[test]
    fn capture_reports_disconnected_outputs() {
        let mut g = Graph::new();
        let x = g.input(fvec(), "x");
        let c = g.constant(Value::vector(vec![1.0]));
        let y = g.neg(c).unwrap();

        assert!(FunctionGraph::capture(&g, &[x], &[y], false).is_ok());
        assert_eq!(
            FunctionGraph::capture(&g, &[x], &[y], true).unwrap_err(),
            GraphError::DisconnectedOutput { index: 0 }
        );
    }

    #[test]
    fn computed_variables_cannot_be_inputs() {
        let mut g = Graph::new();
        let x = g.input(fvec(), "x");
        let y = g.neg(x).unwrap();
        let z = g.exp(y).unwrap();
        assert_eq!(
            FunctionGraph::capture(&g, &[x, y], &[z], false).unwrap_err(),
            GraphError::NotARoot { var: y }
        );
    }

    #[test]
    fn replacing_a_missing_output_is_an_error() {
        let mut g = Graph::new();
        let x = g.input(fvec(), "x");
        let y = g.neg(x).unwrap();
        let mut fg = FunctionGraph::capture(&g, &[x], &[y], false).unwrap();
        assert_eq!(
            fg.replace_output(1, x).unwrap_err(),
            GraphError::NoSuchOutput { index: 1 }
        );
    }

    #[test]
    fn capture_drops_unneeded_nodes() {
        let mut g = Graph::new();
        let x = g.input(fvec(), "x");
        let used = g.neg(x).unwrap();
        let _unused = g.exp(x).unwrap();
        let fg = FunctionGraph::capture(&g, &[x], &[used], false).unwrap();
        assert_eq!(fg.live_nodes().count(), 1);
    }

    #[test]
    fn replace_rejects_type_changes_and_cycles() {
        let mut g = Graph::new();
        let x = g.input(fvec(), "x");
        let a = g.neg(x).unwrap();
        let b = g.exp(a).unwrap();
        let s = g.sum(b).unwrap();
        let mut fg = FunctionGraph::capture(&g, &[x], &[b, s], false).unwrap();
        let before = fg.clone();

        assert!(matches!(
            fg.replace(b, s),
            Err(GraphError::TypeMismatch { .. })
        ));
        assert!(matches!(fg.replace(a, b), Err(GraphError::Cycle { .. })));
        assert_eq!(fg.outputs(), before.outputs());
        assert_eq!(fg.live_nodes().count(), before.live_nodes().count());

        fg.replace(a, x).unwrap();
        assert_eq!(fg.live_nodes().count(), 2);
        assert!(fg.toposort(&Orderings::new()).is_ok());
    }

    #[test]
    fn clone_is_independent() {
        let mut g = Graph::new();
        let x = g.input(fvec(), "x");
        let y = g.neg(x).unwrap();
        let z = g.neg(y).unwrap();
        let fg = FunctionGraph::capture(&g, &[x], &[z], false).unwrap();

        let mut copy = fg.clone();
        copy.replace(z, x).unwrap();
        assert_eq!(copy.live_nodes().count(), 0);
        assert_eq!(fg.live_nodes().count(), 2);
        assert_eq!(fg.outputs(), &[z]);
    }

    #[test]
    fn toposort_honors_orderings() {
        let mut g = Graph::new();
        let x = g.input(fvec(), "x");
        let a = g.neg(x).unwrap();
        let b = g.exp(x).unwrap();
        let fg = FunctionGraph::capture(&g, &[x], &[a, b], false).unwrap();
        let na = fg.producer(a).unwrap().0;
        let nb = fg.producer(b).unwrap().0;

        for (first, second) in [(na, nb), (nb, na)] {
            let mut orderings = Orderings::new();
            orderings.entry(second).or_default().insert(first);
            assert_eq!(fg.toposort(&orderings).unwrap(), vec![first, second]);
        }

        let mut cyclic = Orderings::new();
        cyclic.entry(na).or_default().insert(nb);
        cyclic.entry(nb).or_default().insert(na);
        assert_eq!(fg.toposort(&cyclic), Err(GraphError::CyclicSchedule));
    }

    fn random_graph(rng: &mut Pcg64, size: usize) -> (Graph, Vec<VarId>, Vec<VarId>) {
        let mut g = Graph::new();
        let inputs = (0..3)
            .map(|i| g.input(fvec(), format!("x{}", i)))
            .collect::<Vec<_>>();
        let mut pool = inputs.clone();
        for _ in 0..size {
            let a = pool[rng.random_range(0..pool.len())];
            let b = pool[rng.random_range(0..pool.len())];
            let var = match rng.random_range(0..3) {
                0 => g.elemwise(ScalarOp::Add, &[a, b]),
                1 => g.elemwise(ScalarOp::Mul, &[a, b]),
                _ => g.elemwise(ScalarOp::Neg, &[a]),
            }
            .unwrap();
            pool.push(var);
        }
        let outputs = pool[pool.len() - 2..].to_vec();
        (g, inputs, outputs)
    }

    #[test]
    fn random_replacements_keep_the_graph_acyclic() {
        let mut rng = Pcg64::seed_from_u64(0x5eed_f00d);
        for _ in 0..50 {
            let (g, inputs, outputs) = random_graph(&mut rng, 20);
            let mut fg = FunctionGraph::capture(&g, &inputs, &outputs, false).unwrap();

            for _ in 0..20 {
                let vars = fg.live_vars().into_iter().collect::<Vec<_>>();
                let old = vars[rng.random_range(0..vars.len())];
                let new = vars[rng.random_range(0..vars.len())];
                // Failed replacements are fine; they must just leave a valid graph behind.
                let _ = fg.replace(old, new);
                let order = fg.toposort(&Orderings::new()).unwrap();
                assert_eq!(order.len(), fg.live_nodes().count());
            }
        }
    }
}
