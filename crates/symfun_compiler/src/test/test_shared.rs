use crate::test::{compiler, fvec};
use crate::{ErrorKind, FunctionSpec, In};
use symfun_graph::{DType, Graph, SharedError, SharedValue, Value};

fn counter_pair() -> (Graph, SharedValue, SharedValue, FunctionSpec) {
    let a = SharedValue::new("a", Value::vector(vec![1.0]));
    let b = SharedValue::new("b", Value::vector(vec![10.0]));

    let mut g = Graph::new();
    let va = g.shared(&a);
    let vb = g.shared(&b);
    let one = g.constant(Value::scalar(DType::Float64, 1.0));
    let next_a = g.add(va, one).unwrap();
    let next_b = g.add(vb, va).unwrap();

    let spec = FunctionSpec::new(Vec::<In>::new(), [va])
        .with_update(va, next_a)
        .with_update(vb, next_b);
    (g, a, b, spec)
}

fn current(shared: &SharedValue) -> Vec<f64> {
    shared.get_value(false).unwrap().to_vec()
}

#[test]
fn updates_see_the_values_from_before_the_call() {
    for mode in ["FAST_RUN", "FAST_COMPILE"] {
        let (g, a, b, spec) = counter_pair();
        let mut function = compiler().compile(&g, &spec.with_mode(mode)).unwrap();

        let first = function.call(&[]).unwrap();
        assert_eq!(first[0].to_vec(), vec![1.0], "{}", mode);
        assert_eq!(current(&a), vec![2.0], "{}", mode);
        assert_eq!(current(&b), vec![11.0], "{}", mode);

        let second = function.call(&[]).unwrap();
        assert_eq!(second[0].to_vec(), vec![2.0], "{}", mode);
        assert_eq!(current(&a), vec![3.0], "{}", mode);
        assert_eq!(current(&b), vec![13.0], "{}", mode);

        // Returned values never alias shared storage.
        assert_eq!(first[0].to_vec(), vec![1.0], "{}", mode);
    }
}

#[test]
fn shared_values_can_be_declared_with_their_update() {
    let w = SharedValue::new("w", Value::vector(vec![0.5, 0.5]));
    let mut g = Graph::new();
    let x = g.input(fvec(), "x");
    let vw = g.shared(&w);
    let y = g.mul(x, vw).unwrap();
    let next_w = g.add(vw, x).unwrap();

    let spec = FunctionSpec::new([In::new(x), In::new(vw).update(next_w)], [y]);
    let mut function = compiler().compile(&g, &spec).unwrap();
    assert_eq!(function.input_count(), 1);

    let result = function.call(&[Value::vector(vec![2.0, 4.0])]).unwrap();
    assert_eq!(result[0].to_vec(), vec![1.0, 2.0]);
    assert_eq!(current(&w), vec![2.5, 4.5]);
}

#[test]
fn distinct_variables_over_one_container_read_the_same_value() {
    let s = SharedValue::new("s", Value::vector(vec![3.0]));
    let mut g = Graph::new();
    let first = g.shared(&s);
    let second = g.shared(&s);
    let total = g.add(first, second).unwrap();
    let two = g.constant(Value::scalar(DType::Float64, 2.0));
    let doubled = g.mul(second, two).unwrap();

    let spec = FunctionSpec::new(Vec::<In>::new(), [total]).with_update(first, doubled);
    let mut function = compiler().compile(&g, &spec).unwrap();

    assert_eq!(function.call(&[]).unwrap()[0].to_vec(), vec![6.0]);
    assert_eq!(current(&s), vec![6.0]);
    assert_eq!(function.call(&[]).unwrap()[0].to_vec(), vec![12.0]);
}

#[test]
fn set_value_between_calls_is_observed() {
    let (g, a, _, spec) = counter_pair();
    let mut function = compiler().compile(&g, &spec).unwrap();
    function.call(&[]).unwrap();
    a.set_value(Value::vector(vec![40.0]), false).unwrap();
    assert_eq!(function.call(&[]).unwrap()[0].to_vec(), vec![40.0]);
    assert_eq!(current(&a), vec![41.0]);
}

#[test]
fn released_values_cannot_be_compiled_or_called() {
    let (g, a, _, spec) = counter_pair();
    let mut function = compiler().compile(&g, &spec).unwrap();
    a.release();

    let released = ErrorKind::Shared(SharedError::Released {
        name: "a".to_owned(),
    });
    assert_eq!(function.call(&[]).unwrap_err().kind, released);
    assert_eq!(compiler().compile(&g, &spec).unwrap_err().kind, released);
}

#[test]
fn malformed_updates_are_rejected() {
    let s = SharedValue::new("s", Value::vector(vec![1.0]));
    let mut g = Graph::new();
    let x = g.input(fvec(), "x");
    let vs = g.shared(&s);
    let y = g.add(x, vs).unwrap();
    let total = g.sum(vs).unwrap();
    let also_s = g.shared(&s);

    let err = compiler()
        .compile(&g, &FunctionSpec::new([In::new(x).update(y)], [y]))
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::UpdateOnNonShared { var: x });

    let err = compiler()
        .compile(&g, &FunctionSpec::new([x], [y]).with_update(x, y))
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::UpdateOnNonShared { var: x });

    let err = compiler()
        .compile(&g, &FunctionSpec::new([x], [y]).with_update(vs, total))
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::UpdateTypeMismatch { .. }));

    let err = compiler()
        .compile(
            &g,
            &FunctionSpec::new([x], [y])
                .with_update(vs, y)
                .with_update(also_s, y),
        )
        .unwrap_err();
    assert_eq!(
        err.kind,
        ErrorKind::DuplicateUpdate {
            name: "s".to_owned()
        }
    );
}
