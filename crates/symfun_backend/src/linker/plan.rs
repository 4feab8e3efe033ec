//! The planning linker.
//!
//! Each node is specialized into a thunk once, at link time.  Storage slots live in the
//! executable.  With garbage collection on, intermediates are dropped right after their last
//! reader.  With it off, they stay in their slots between calls and a thunk may write its next
//! result into the previous buffer, which it only does when nothing else holds that buffer.

use crate::linker::{
    op_failed, Executable, LinkOptions, Linker, Monitor, NodeEvent, RunError, Schedule,
};
use crate::profiling::ProfileStats;
use symfun_graph::{Backend, FunctionGraph, GraphError, Orderings, Thunk, Value};
use std::time::Instant;

#[derive(Clone, Copy, Debug, Default)]
pub struct PlanLinker;

struct PlanExecutable {
    schedule: Schedule,
    thunks: Vec<Thunk>,
    slots: Vec<Option<Value>>,
    allow_gc: bool,
    monitor: Option<Monitor>,
}

impl PlanExecutable {
    fn step(&mut self, index: usize) -> Result<(), RunError> {
        let step = &self.schedule.steps[index];
        let inputs = Schedule::read(&self.slots, &step.inputs)?;
        let reusable = if self.allow_gc {
            None
        } else {
            step.outputs
                .first()
                .and_then(|&slot| self.slots[slot].take())
        };

        let outputs = (self.thunks[index])(&inputs, reusable).map_err(|err| op_failed(step, err))?;
        if let Some(monitor) = &self.monitor {
            monitor(&NodeEvent {
                node: step.node,
                op: &step.op,
                inputs: &inputs,
                outputs: &outputs,
            });
        }
        drop(inputs);

        for (&slot, value) in step.outputs.iter().zip(outputs) {
            self.slots[slot] = Some(value);
        }
        if self.allow_gc {
            for &slot in &step.frees {
                self.slots[slot] = None;
            }
        }
        Ok(())
    }
}

impl Executable for PlanExecutable {
    fn run(
        &mut self,
        inputs: Vec<Value>,
        profile: Option<&mut ProfileStats>,
    ) -> Result<Vec<Value>, RunError> {
        self.schedule.load(&mut self.slots, inputs)?;

        let result = match profile {
            None => (0..self.thunks.len()).try_for_each(|index| self.step(index)),
            Some(stats) => (0..self.thunks.len()).try_for_each(|index| {
                let start = Instant::now();
                self.step(index)?;
                let step = &self.schedule.steps[index];
                stats.record_node(step.node.0, &step.name, start.elapsed());
                Ok(())
            }),
        };
        let outputs = result.and_then(|()| Schedule::read(&self.slots, &self.schedule.outputs));

        // Never hold on to caller or shared buffers past the call.
        self.schedule.clear_roots(&mut self.slots);
        if self.allow_gc || outputs.is_err() {
            self.slots.iter_mut().for_each(|slot| *slot = None);
        }
        outputs
    }
}

impl Linker for PlanLinker {
    fn name(&self) -> &str {
        "plan"
    }

    fn link(
        &self,
        fgraph: &FunctionGraph,
        orderings: &Orderings,
        options: &LinkOptions,
    ) -> Result<Box<dyn Executable>, GraphError> {
        let schedule = Schedule::new(fgraph, orderings)?;
        let thunks = schedule
            .steps
            .iter()
            .map(|step| match step.op.thunk(Backend::Plan) {
                Some(thunk) => thunk,
                None => {
                    log::debug!("{} has no plan thunk, falling back to perform", step.name);
                    let op = step.op.clone();
                    Box::new(move |inputs: &[Value], _: Option<Value>| op.perform(inputs)) as Thunk
                }
            })
            .collect();

        Ok(Box::new(PlanExecutable {
            slots: vec![None; schedule.slot_count],
            schedule,
            thunks,
            allow_gc: options.plan.allow_gc,
            monitor: options.monitor.clone(),
        }))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::linker::perform::PerformLinker;
    use symfun_common::config::PlanOptions;
    use symfun_graph::{DType, Graph, Type};

    fn graph() -> (FunctionGraph, Orderings) {
        let mut g = Graph::new();
        let x = g.input(Type::vector(DType::Float64), "x");
        let a = g.neg(x).unwrap();
        let b = g.exp(a).unwrap();
        let c = g.add(a, b).unwrap();
        (
            FunctionGraph::capture(&g, &[x], &[c], false).unwrap(),
            Orderings::new(),
        )
    }

    #[test]
    fn plan_and_perform_agree() {
        let (fgraph, orderings) = graph();
        let options = LinkOptions::default();
        let mut perform = PerformLinker.link(&fgraph, &orderings, &options).unwrap();
        let mut plan = PlanLinker.link(&fgraph, &orderings, &options).unwrap();

        let x = Value::vector(vec![0.0, 1.0, -2.0]);
        let expected = perform.run(vec![x.clone()], None).unwrap();
        let actual = plan.run(vec![x], None).unwrap();
        assert!(expected[0].allclose(&actual[0], 0.0));
    }

    #[test]
    fn kept_buffers_are_not_overwritten_while_held() {
        let (fgraph, orderings) = graph();
        let options = LinkOptions {
            plan: PlanOptions { allow_gc: false },
            monitor: None,
        };
        let mut plan = PlanLinker.link(&fgraph, &orderings, &options).unwrap();

        let first = plan.run(vec![Value::vector(vec![1.0, 2.0])], None).unwrap();
        let snapshot = first[0].to_vec();
        let second = plan.run(vec![Value::vector(vec![5.0, 6.0])], None).unwrap();

        assert_eq!(first[0].to_vec(), snapshot);
        assert!(!first[0].shares_storage(&second[0]));
    }

    #[test]
    fn wrong_arity_is_reported() {
        let (fgraph, orderings) = graph();
        let mut plan = PlanLinker
            .link(&fgraph, &orderings, &LinkOptions::default())
            .unwrap();
        assert_eq!(
            plan.run(Vec::new(), None).unwrap_err(),
            RunError::InputCount {
                expected: 1,
                got: 0
            }
        );
    }
}
