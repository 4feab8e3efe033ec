//! The interpreting linker: every call walks the schedule and dispatches each op's `perform`.

use crate::linker::{
    op_failed, Executable, LinkOptions, Linker, Monitor, NodeEvent, RunError, Schedule, Step,
};
use crate::profiling::ProfileStats;
use symfun_graph::{FunctionGraph, GraphError, Orderings, Value};
use std::time::Instant;

#[derive(Clone, Copy, Debug, Default)]
pub struct PerformLinker;

struct PerformExecutable {
    schedule: Schedule,
    monitor: Option<Monitor>,
}

impl PerformExecutable {
    fn step(&self, step: &Step, slots: &mut [Option<Value>]) -> Result<(), RunError> {
        let inputs = Schedule::read(slots, &step.inputs)?;
        let outputs = step.op.perform(&inputs).map_err(|err| op_failed(step, err))?;
        if let Some(monitor) = &self.monitor {
            monitor(&NodeEvent {
                node: step.node,
                op: &step.op,
                inputs: &inputs,
                outputs: &outputs,
            });
        }
        for (&slot, value) in step.outputs.iter().zip(outputs) {
            slots[slot] = Some(value);
        }
        Ok(())
    }
}

impl Executable for PerformExecutable {
    fn run(
        &mut self,
        inputs: Vec<Value>,
        profile: Option<&mut ProfileStats>,
    ) -> Result<Vec<Value>, RunError> {
        let mut slots = vec![None; self.schedule.slot_count];
        self.schedule.load(&mut slots, inputs)?;

        match profile {
            None => {
                for step in &self.schedule.steps {
                    self.step(step, &mut slots)?;
                }
            }
            Some(stats) => {
                for step in &self.schedule.steps {
                    let start = Instant::now();
                    self.step(step, &mut slots)?;
                    stats.record_node(step.node.0, &step.name, start.elapsed());
                }
            }
        }

        Schedule::read(&slots, &self.schedule.outputs)
    }
}

impl Linker for PerformLinker {
    fn name(&self) -> &str {
        "perform"
    }

    fn link(
        &self,
        fgraph: &FunctionGraph,
        orderings: &Orderings,
        options: &LinkOptions,
    ) -> Result<Box<dyn Executable>, GraphError> {
        Ok(Box::new(PerformExecutable {
            schedule: Schedule::new(fgraph, orderings)?,
            monitor: options.monitor.clone(),
        }))
    }
}
