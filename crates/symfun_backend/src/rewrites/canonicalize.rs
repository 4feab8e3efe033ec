use crate::rewrite::{Rewrite, Stage, StageKind};
use crate::rewrites::{match_elemwise, match_producer, same_type_as_output, uniform_constant};
use symfun_graph::{FunctionGraph, GraphError, NodeId, Op, ScalarOp, VarId};

const TAGS: &[&str] = &["canonicalize", "fast_run", "fast_compile"];

/// Drops a binary operand that is a constant `identity` (`x + 0`, `x * 1`).
fn drop_identity_operand(
    fgraph: &FunctionGraph,
    node: NodeId,
    scalar: ScalarOp,
    identity: f64,
) -> Option<Vec<VarId>> {
    let inputs = match_elemwise(fgraph, node, scalar)?;
    let (a, b) = (inputs[0], inputs[1]);
    if uniform_constant(fgraph, b) == Some(identity) {
        if let Some(replacement) = same_type_as_output(fgraph, node, a) {
            return Some(replacement);
        }
    }
    if uniform_constant(fgraph, a) == Some(identity) {
        return same_type_as_output(fgraph, node, b);
    }
    None
}

pub fn add_zero() -> Rewrite {
    Rewrite::local("add_zero", TAGS, |fgraph, node| {
        Ok(drop_identity_operand(fgraph, node, ScalarOp::Add, 0.0))
    })
}

pub fn mul_one() -> Rewrite {
    Rewrite::local("mul_one", TAGS, |fgraph, node| {
        Ok(drop_identity_operand(fgraph, node, ScalarOp::Mul, 1.0))
    })
}

pub fn neg_neg() -> Rewrite {
    Rewrite::local("neg_neg", TAGS, |fgraph, node| {
        let Some(inputs) = match_elemwise(fgraph, node, ScalarOp::Neg) else {
            return Ok(None);
        };
        Ok(match_producer(fgraph, inputs[0], ScalarOp::Neg)
            .and_then(|inner| same_type_as_output(fgraph, node, inner[0])))
    })
}

/// `x op x` to a constant fill of `x`'s shape.  Wrong for NaN and, for division, zero elements.
fn self_cancel(
    fgraph: &mut FunctionGraph,
    node: NodeId,
    scalar: ScalarOp,
    value: f64,
) -> Result<Option<Vec<VarId>>, GraphError> {
    let Some(inputs) = match_elemwise(fgraph, node, scalar) else {
        return Ok(None);
    };
    if inputs[0] != inputs[1] || same_type_as_output(fgraph, node, inputs[0]).is_none() {
        return Ok(None);
    }
    Ok(Some(vec![fgraph.add_node1(Op::Fill { value }, &[inputs[0]])?]))
}

pub fn sub_self() -> Rewrite {
    Rewrite::local("sub_self", &["unsafe"], |fgraph, node| {
        self_cancel(fgraph, node, ScalarOp::Sub, 0.0)
    })
}

pub fn div_self() -> Rewrite {
    Rewrite::local("div_self", &["unsafe"], |fgraph, node| {
        self_cancel(fgraph, node, ScalarOp::Div, 1.0)
    })
}

pub fn stage() -> Stage {
    Stage::new("canonicalize", 1.0, StageKind::fixed_point())
        .tagged(&["canonicalize"])
        .with(add_zero())
        .with(mul_one())
        .with(neg_neg())
        .with(sub_self())
        .with(div_self())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::rewrites::test_util::{op_names, run_stage};
    use symfun_graph::{DType, Graph, Type, Value};

    #[test]
    fn identities_are_removed() {
        let mut g = Graph::new();
        let x = g.input(Type::vector(DType::Float64), "x");
        let zero = g.constant(Value::scalar(DType::Float64, 0.0));
        let one = g.constant(Value::scalar(DType::Float64, 1.0));
        let a = g.add(zero, x).unwrap();
        let b = g.mul(a, one).unwrap();
        let c = g.neg(b).unwrap();
        let d = g.neg(c).unwrap();
        let y = g.exp(d).unwrap();

        let (fgraph, _) = run_stage(stage(), &["fast_run"], &g, &[x], &[y]);
        assert_eq!(op_names(&fgraph), vec!["exp"]);
        let (_, exp, _) = fgraph.producer(fgraph.outputs()[0]).unwrap();
        assert_eq!(exp.inputs, vec![x]);
    }

    #[test]
    fn identity_that_changes_dtype_is_kept() {
        let mut g = Graph::new();
        let x = g.input(Type::vector(DType::Bool), "x");
        let zero = g.constant(Value::scalar(DType::Int64, 0.0));
        let y = g.add(x, zero).unwrap();

        let (fgraph, _) = run_stage(stage(), &["fast_run"], &g, &[x], &[y]);
        assert_eq!(op_names(&fgraph), vec!["add"]);
    }

    #[test]
    fn self_cancellation_needs_unsafe() {
        let mut g = Graph::new();
        let x = g.input(Type::vector(DType::Float64), "x");
        let y = g.sub(x, x).unwrap();

        let (fgraph, _) = run_stage(stage(), &["fast_run"], &g, &[x], &[y]);
        assert_eq!(op_names(&fgraph), vec!["sub"]);

        let (fgraph, _) = run_stage(stage(), &["unsafe"], &g, &[x], &[y]);
        assert_eq!(op_names(&fgraph), vec!["fill{0}"]);
    }
}
