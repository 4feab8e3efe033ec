equivalence! {
    small_graph_0: seed = 0, ops = 4;
    small_graph_1: seed = 1, ops = 4;
    small_graph_2: seed = 2, ops = 5;
    medium_graph_0: seed = 10, ops = 8;
    medium_graph_1: seed = 11, ops = 8;
    medium_graph_2: seed = 12, ops = 8;
    medium_graph_3: seed = 13, ops = 10;
    large_graph_0: seed = 100, ops = 16;
    large_graph_1: seed = 101, ops = 16;
    large_graph_2: seed = 102, ops = 20;
}

#[test]
fn many_seeds() {
    for seed in 1000..1040 {
        crate::test::random_graph::check_equivalence(seed, 12);
    }
}
