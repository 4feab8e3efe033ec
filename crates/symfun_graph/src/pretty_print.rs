use crate::fgraph::{FunctionGraph, Orderings};
use crate::graph::{VarId, VarKind};
use std::fmt;

fn write_var(f: &mut fmt::Formatter<'_>, fgraph: &FunctionGraph, var: VarId) -> fmt::Result {
    let variable = fgraph.var(var);
    match (&variable.kind, &variable.name) {
        (VarKind::Constant(value), _) => match value.item() {
            Some(x) if value.shape().is_empty() => write!(f, "{}", x),
            _ => write!(f, "const%{}", var.0),
        },
        (_, Some(name)) => write!(f, "{}", name),
        (_, None) => write!(f, "%{}", var.0),
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, fgraph: &FunctionGraph, vars: &[VarId]) -> fmt::Result {
    for (i, &var) in vars.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write_var(f, fgraph, var)?;
    }
    Ok(())
}

impl fmt::Display for FunctionGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "inputs: ")?;
        for (i, &input) in self.inputs().iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write_var(f, self, input)?;
            write!(f, ": {}", self.ty(input))?;
        }
        writeln!(f)?;

        // Arena order if the graph is somehow cyclic.
        let order = self
            .toposort(&Orderings::new())
            .unwrap_or_else(|_| self.live_nodes().map(|(id, _)| id).collect());
        for id in order {
            let Some(node) = self.node(id) else {
                continue;
            };
            write!(f, "  ")?;
            write_list(f, self, &node.outputs)?;
            write!(f, " = {}(", node.op.name())?;
            write_list(f, self, &node.inputs)?;
            writeln!(f, ")")?;
        }

        write!(f, "outputs: ")?;
        write_list(f, self, self.outputs())
    }
}
