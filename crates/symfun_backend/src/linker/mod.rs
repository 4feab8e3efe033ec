//! Linkers turn an optimized graph into something that can be run.
//!
//! Both linkers share the same [`Schedule`]: a topological order of the nodes over numbered
//! storage slots.  They differ in how each step is executed.

pub mod perform;
pub mod plan;

use crate::profiling::ProfileStats;
use symfun_common::config::PlanOptions;
use symfun_graph::{
    FunctionGraph, GraphError, NodeId, Op, OpError, Orderings, SharedError, SharedValue, Value,
    VarId, VarKind,
};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum RunError {
    #[error("expected {expected} input values, got {got}")]
    InputCount { expected: usize, got: usize },
    #[error("{op} (node {node:?}) failed: {source}")]
    Op {
        node: NodeId,
        op: String,
        #[source]
        source: OpError,
    },
    #[error(transparent)]
    Shared(#[from] SharedError),
    #[error("slot {0} was read before it was written")]
    EmptySlot(usize),
}

/// What a monitor sees after each node runs.
pub struct NodeEvent<'a> {
    pub node: NodeId,
    pub op: &'a Op,
    pub inputs: &'a [Value],
    pub outputs: &'a [Value],
}

pub type Monitor = Rc<dyn Fn(&NodeEvent<'_>)>;

#[derive(Clone, Default)]
pub struct LinkOptions {
    pub plan: PlanOptions,
    pub monitor: Option<Monitor>,
}

impl LinkOptions {
    pub fn monitored(monitor: impl Fn(&NodeEvent<'_>) + 'static) -> Self {
        LinkOptions {
            monitor: Some(Rc::new(monitor)),
            ..Default::default()
        }
    }
}

impl fmt::Debug for LinkOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkOptions")
            .field("plan", &self.plan)
            .field("monitor", &self.monitor.is_some())
            .finish()
    }
}

pub trait Executable {
    /// Runs the graph on one value per graph input, returning one value per graph output.
    /// Timing is only taken when `profile` is given.
    fn run(
        &mut self,
        inputs: Vec<Value>,
        profile: Option<&mut ProfileStats>,
    ) -> Result<Vec<Value>, RunError>;
}

pub trait Linker {
    fn name(&self) -> &str;

    fn link(
        &self,
        fgraph: &FunctionGraph,
        orderings: &Orderings,
        options: &LinkOptions,
    ) -> Result<Box<dyn Executable>, GraphError>;
}

#[derive(Clone, Debug)]
pub(crate) enum Source {
    Argument(usize),
    Constant(Value),
    Shared(SharedValue),
}

#[derive(Clone, Debug)]
pub(crate) struct Step {
    pub node: NodeId,
    pub op: Op,
    pub name: String,
    pub inputs: Vec<usize>,
    pub outputs: Vec<usize>,
    /// Slots whose last reader is this step.
    pub frees: Vec<usize>,
}

#[derive(Clone, Debug)]
pub(crate) struct Schedule {
    pub slot_count: usize,
    pub arity: usize,
    pub roots: Vec<(usize, Source)>,
    pub steps: Vec<Step>,
    pub outputs: Vec<usize>,
}

impl Schedule {
    pub fn new(fgraph: &FunctionGraph, orderings: &Orderings) -> Result<Self, GraphError> {
        let order = fgraph.toposort(orderings)?;

        let mut slots: BTreeMap<VarId, usize> = BTreeMap::new();
        let mut roots = Vec::new();
        for (index, &input) in fgraph.inputs().iter().enumerate() {
            let slot = slots.len();
            if slots.insert(input, slot).is_none() {
                roots.push((slot, Source::Argument(index)));
            }
        }

        let mut slot_of = |var: VarId, slots: &mut BTreeMap<VarId, usize>| -> usize {
            if let Some(&slot) = slots.get(&var) {
                return slot;
            }
            let slot = slots.len();
            slots.insert(var, slot);
            match &fgraph.var(var).kind {
                VarKind::Constant(value) => roots.push((slot, Source::Constant(value.clone()))),
                VarKind::Shared(shared) => roots.push((slot, Source::Shared(shared.clone()))),
                VarKind::Input | VarKind::Output { .. } => {}
            }
            slot
        };

        let mut steps = Vec::with_capacity(order.len());
        for node in order {
            let content = fgraph.expect_node(node)?;
            let inputs = content
                .inputs
                .iter()
                .map(|&var| slot_of(var, &mut slots))
                .collect();
            let outputs = content
                .outputs
                .iter()
                .map(|&var| slot_of(var, &mut slots))
                .collect();
            steps.push(Step {
                node,
                op: content.op.clone(),
                name: content.op.name(),
                inputs,
                outputs,
                frees: Vec::new(),
            });
        }
        let outputs = fgraph
            .outputs()
            .iter()
            .map(|&var| slot_of(var, &mut slots))
            .collect::<Vec<_>>();

        let mut last_use = BTreeMap::new();
        for (index, step) in steps.iter().enumerate() {
            for &slot in &step.inputs {
                last_use.insert(slot, index);
            }
        }
        for (slot, index) in last_use {
            if !outputs.contains(&slot) {
                steps[index].frees.push(slot);
            }
        }

        Ok(Schedule {
            slot_count: slots.len(),
            arity: fgraph.inputs().len(),
            roots,
            steps,
            outputs,
        })
    }

    /// Fills the root slots for a call.
    pub fn load(&self, slots: &mut [Option<Value>], inputs: Vec<Value>) -> Result<(), RunError> {
        if inputs.len() != self.arity {
            return Err(RunError::InputCount {
                expected: self.arity,
                got: inputs.len(),
            });
        }
        let mut inputs = inputs.into_iter().map(Some).collect::<Vec<_>>();
        for (slot, source) in &self.roots {
            slots[*slot] = match source {
                Source::Argument(index) => inputs[*index].take(),
                Source::Constant(value) => Some(value.clone()),
                Source::Shared(shared) => Some(shared.get_value(true)?),
            };
        }
        Ok(())
    }

    pub fn read(slots: &[Option<Value>], indices: &[usize]) -> Result<Vec<Value>, RunError> {
        indices
            .iter()
            .map(|&slot| slots[slot].clone().ok_or(RunError::EmptySlot(slot)))
            .collect()
    }

    pub fn clear_roots(&self, slots: &mut [Option<Value>]) {
        for (slot, _) in &self.roots {
            slots[*slot] = None;
        }
    }
}

pub(crate) fn op_failed(step: &Step, source: OpError) -> RunError {
    RunError::Op {
        node: step.node,
        op: step.name.clone(),
        source,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use symfun_graph::{DType, Graph, Type};

    #[test]
    fn intermediates_are_freed_after_their_last_reader() {
        let mut g = Graph::new();
        let x = g.input(Type::vector(DType::Float64), "x");
        let a = g.neg(x).unwrap();
        let b = g.exp(a).unwrap();
        let c = g.add(a, b).unwrap();
        let fgraph = FunctionGraph::capture(&g, &[x], &[c], false).unwrap();
        let schedule = Schedule::new(&fgraph, &Orderings::new()).unwrap();

        assert_eq!(schedule.slot_count, 4);
        let names = schedule
            .steps
            .iter()
            .map(|step| step.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["neg", "exp", "add"]);
        // `x` dies after neg, `a` and `b` after add; the output slot is never freed.
        assert_eq!(schedule.steps[0].frees, vec![0]);
        assert!(schedule.steps[1].frees.is_empty());
        assert_eq!(schedule.steps[2].frees.len(), 2);
    }
}
