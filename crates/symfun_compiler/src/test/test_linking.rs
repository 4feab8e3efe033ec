use crate::test::{compiler, fvec};
use crate::FunctionSpec;
use symfun_backend::linker::LinkOptions;
use symfun_backend::{ModeSpec, RunError};
use symfun_common::config::{CompileOptions, PlanOptions, ProfileMode};
use symfun_graph::data::op::from_function;
use symfun_graph::{DType, Graph, OpError, Value, VarId};
use std::cell::RefCell;
use std::rc::Rc;

fn chain() -> (Graph, VarId, VarId) {
    let mut g = Graph::new();
    let x = g.input(fvec(), "x");
    let a = g.neg(x).unwrap();
    let b = g.exp(a).unwrap();
    let y = g.add(a, b).unwrap();
    (g, x, y)
}

fn with_linker(linker: &str) -> ModeSpec {
    ModeSpec::Custom {
        optimizer: "fast_run".to_owned(),
        linker: linker.to_owned(),
    }
}

#[test]
fn kept_buffers_never_overwrite_returned_values() {
    let (g, x, y) = chain();
    let spec = FunctionSpec::new([x], [y]).with_link(LinkOptions {
        plan: PlanOptions { allow_gc: false },
        monitor: None,
    });
    let mut function = compiler().compile(&g, &spec).unwrap();

    let first = function.call(&[Value::vector(vec![0.0, 1.0])]).unwrap();
    let snapshot = first[0].to_vec();
    for i in 0..4 {
        let next = function.call(&[Value::vector(vec![i as f64, 2.0])]).unwrap();
        assert!(!next[0].shares_storage(&first[0]));
    }
    assert_eq!(first[0].to_vec(), snapshot);

    drop(first);
    let again = function.call(&[Value::vector(vec![0.0, 1.0])]).unwrap();
    assert_eq!(again[0].to_vec(), snapshot);
}

#[test]
fn monitors_see_every_node_without_changing_results() {
    let (g, x, y) = chain();
    for linker in ["perform", "plan"] {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let recorder = seen.clone();
        let link = LinkOptions::monitored(move |event| {
            recorder
                .borrow_mut()
                .push((event.op.name(), event.outputs[0].to_vec()))
        });
        let spec = FunctionSpec::new([x], [y])
            .with_mode(with_linker(linker))
            .with_link(link);
        let mut monitored = compiler().compile(&g, &spec).unwrap();
        let mut plain = compiler()
            .compile(&g, &FunctionSpec::new([x], [y]).with_mode(with_linker(linker)))
            .unwrap();

        let arg = Value::vector(vec![0.0]);
        let expected = plain.call(&[arg.clone()]).unwrap();
        let actual = monitored.call(&[arg]).unwrap();
        assert_eq!(actual, expected);

        let seen = seen.borrow();
        let names = seen.iter().map(|(name, _)| name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["neg", "exp", "add{inplace=0}"], "{}", linker);
        assert_eq!(seen[2].1, vec![1.0]);
    }
}

#[test]
fn profiling_accumulates_across_calls() {
    let (g, x, y) = chain();
    let spec = FunctionSpec::new([x], [y]).with_options(CompileOptions {
        profile: ProfileMode::Enabled,
        ..Default::default()
    });
    let mut function = compiler().compile(&g, &spec).unwrap();
    for _ in 0..3 {
        function.call(&[Value::vector(vec![1.0, 2.0])]).unwrap();
    }

    let profile = function.profile().unwrap();
    assert_eq!(profile.call_count, 3);
    assert_eq!(profile.nodes.len(), 3);
    assert!(profile.nodes.values().all(|node| node.calls == 3));
    assert!(profile.compile_time >= profile.rewrite_time);
    assert!(profile.call_time >= profile.node_time());

    let unprofiled = compiler()
        .compile(&g, &FunctionSpec::new([x], [y]))
        .unwrap();
    assert!(unprofiled.profile().is_none());

    let mode = compiler()
        .modes
        .get_mode("FAST_COMPILE")
        .unwrap()
        .profiled();
    let profiled = compiler()
        .compile(&g, &FunctionSpec::new([x], [y]).with_mode(mode))
        .unwrap();
    assert!(profiled.profile().is_some());
}

#[test]
fn opaque_functions_run_under_both_linkers() {
    let mut g = Graph::new();
    let x = g.input(fvec(), "x");
    let clamp = from_function("clamp", vec![fvec()], vec![fvec()], |inputs| {
        let data: Vec<f64> = inputs[0].with_data(|data| data.iter().map(|x| x.clamp(-1.0, 1.0)).collect());
        Ok(vec![Value::new(DType::Float64, inputs[0].shape().to_vec(), data)?])
    });
    let y = g.apply1(clamp, &[x]).unwrap();
    let z = g.neg(y).unwrap();

    for linker in ["perform", "plan"] {
        let spec = FunctionSpec::new([x], [z]).with_mode(with_linker(linker));
        let mut function = compiler().compile(&g, &spec).unwrap();
        let result = function.call(&[Value::vector(vec![-3.0, 0.5, 8.0])]).unwrap();
        assert_eq!(result[0].to_vec(), vec![1.0, -0.5, -1.0], "{}", linker);
    }
}

#[test]
fn op_failures_name_the_node() {
    let mut g = Graph::new();
    let x = g.input(fvec(), "x");
    let failing = from_function("fails", vec![fvec()], vec![fvec()], |_| {
        Err(OpError::Custom("no".to_owned()))
    });
    let y = g.apply1(failing, &[x]).unwrap();

    let mut function = compiler()
        .compile(&g, &FunctionSpec::new([x], [y]))
        .unwrap();
    let err = function.call(&[Value::vector(vec![1.0])]).unwrap_err();
    assert!(matches!(
        err.kind,
        crate::ErrorKind::Run(RunError::Op { ref op, .. }) if op == "fails"
    ));
}
