use crate::rewrite::{Rewrite, Stage, StageKind};
use crate::rewrites::{match_elemwise, match_producer, same_type_as_output, uniform_constant};
use symfun_graph::{Op, ScalarOp};

const TAGS: &[&str] = &["stabilize", "fast_run", "stable"];

/// `log(1 + x)` to `log1p(x)`.
pub fn log1p() -> Rewrite {
    Rewrite::local("log1p", TAGS, |fgraph, node| {
        let Some(inputs) = match_elemwise(fgraph, node, ScalarOp::Log) else {
            return Ok(None);
        };
        let Some(sum) = match_producer(fgraph, inputs[0], ScalarOp::Add) else {
            return Ok(None);
        };
        let operand = if uniform_constant(fgraph, sum[0]) == Some(1.0) {
            sum[1]
        } else if uniform_constant(fgraph, sum[1]) == Some(1.0) {
            sum[0]
        } else {
            return Ok(None);
        };
        let replacement = fgraph.add_node1(Op::elemwise(ScalarOp::Log1p), &[operand])?;
        Ok(same_type_as_output(fgraph, node, replacement))
    })
}

/// `log(exp(x))` to `x`.
pub fn log_exp() -> Rewrite {
    Rewrite::local("log_exp", TAGS, |fgraph, node| {
        let Some(inputs) = match_elemwise(fgraph, node, ScalarOp::Log) else {
            return Ok(None);
        };
        Ok(match_producer(fgraph, inputs[0], ScalarOp::Exp)
            .and_then(|inner| same_type_as_output(fgraph, node, inner[0])))
    })
}

pub fn stage() -> Stage {
    Stage::new("stabilize", 1.5, StageKind::fixed_point())
        .tagged(&["stabilize"])
        .with(log1p())
        .with(log_exp())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::rewrites::test_util::{op_names, run_stage};
    use symfun_graph::{DType, Graph, Type, Value};

    #[test]
    fn log_of_one_plus() {
        let mut g = Graph::new();
        let x = g.input(Type::vector(DType::Float64), "x");
        let one = g.constant(Value::scalar(DType::Float64, 1.0));
        let s = g.add(x, one).unwrap();
        let y = g.log(s).unwrap();

        let (fgraph, _) = run_stage(stage(), &["stabilize"], &g, &[x], &[y]);
        assert_eq!(op_names(&fgraph), vec!["log1p"]);
    }

    #[test]
    fn log_of_exp_cancels() {
        let mut g = Graph::new();
        let x = g.input(Type::vector(DType::Float64), "x");
        let e = g.exp(x).unwrap();
        let l = g.log(e).unwrap();
        let y = g.neg(l).unwrap();

        let (fgraph, _) = run_stage(stage(), &["fast_run"], &g, &[x], &[y]);
        assert_eq!(op_names(&fgraph), vec!["neg"]);
    }
}
