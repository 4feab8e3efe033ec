use crate::rewrite::{Rewrite, Stage, StageKind};
use crate::rewrites::{match_elemwise, same_type_as_output};
use symfun_graph::{DType, Op, ScalarOp, Value};

/// `x * x` to `sqr(x)`.
pub fn mul_self() -> Rewrite {
    Rewrite::local("mul_self", &["specialize", "fast_run"], |fgraph, node| {
        let Some(inputs) = match_elemwise(fgraph, node, ScalarOp::Mul) else {
            return Ok(None);
        };
        if inputs[0] != inputs[1] {
            return Ok(None);
        }
        let replacement = fgraph.add_node1(Op::elemwise(ScalarOp::Sqr), &[inputs[0]])?;
        Ok(same_type_as_output(fgraph, node, replacement))
    })
}

/// `x / c` to `x * (1 / c)` for a scalar constant `c`.  Can differ from the division in the last
/// bit.
pub fn div_by_constant() -> Rewrite {
    Rewrite::local(
        "div_by_constant",
        &["specialize", "fast_run", "unstable"],
        |fgraph, node| {
            let Some(inputs) = match_elemwise(fgraph, node, ScalarOp::Div) else {
                return Ok(None);
            };
            let divisor = match fgraph.var(inputs[1]).constant() {
                Some(value) if value.shape().is_empty() => value.item(),
                _ => None,
            };
            let Some(divisor) = divisor.filter(|&c| c != 0.0) else {
                return Ok(None);
            };
            let reciprocal = fgraph.add_constant(Value::scalar(DType::Float64, 1.0 / divisor));
            let replacement = fgraph.add_node1(Op::elemwise(ScalarOp::Mul), &[inputs[0], reciprocal])?;
            Ok(same_type_as_output(fgraph, node, replacement))
        },
    )
}

pub fn stage() -> Stage {
    Stage::new("specialize", 2.0, StageKind::fixed_point())
        .tagged(&["specialize"])
        .with(mul_self())
        .with(div_by_constant())
}
