use pn_graph::builtin::{Affine, ChannelSink, FixedSource, NullSink, Relu};
use pn_graph::cpu::cpu_eval_graph;
use pn_graph::graph::Graph;

#[test]
fn affine_batch_two() {
    let mut graph = Graph::new();
    let x = graph.buffer("x", 2);
    let y = graph.buffer("y", 1);

    graph.source(FixedSource::new(2, vec![vec![1.0, 2.0, 1.0, 2.0]]), x, 0);
    graph.compute(Affine::new(2, 1, vec![2.0, 4.0], vec![1.0]), x, 0, y, 0);
    graph.sink(NullSink::new(1), y, 0);

    let outputs = cpu_eval_graph(&graph, 2, &[vec![1.0, 2.0, 1.0, 2.0]]);
    assert_eq!(outputs, vec![vec![7.0, 13.0]]);
}

#[test]
fn sinks_read_windows() {
    let mut graph = Graph::new();
    let x = graph.buffer("x", 3);
    let y = graph.buffer("y", 3);

    graph.source(FixedSource::new(3, vec![vec![0.0; 3]]), x, 0);
    // identity with a bias of 10
    let weight = vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];
    graph.compute(Affine::new(3, 3, weight, vec![10.0; 3]), x, 0, y, 0);
    let (head, _) = ChannelSink::new(1);
    let (tail, _) = ChannelSink::new(2);
    graph.sink(head, y, 0);
    graph.sink(tail, y, 1);

    let outputs = cpu_eval_graph(&graph, 1, &[vec![-1.0, 2.0, 3.0]]);
    assert_eq!(outputs, vec![vec![9.0], vec![12.0, 13.0]]);
}

#[test]
fn relu_after_affine() {
    let mut graph = Graph::new();
    let x = graph.buffer("x", 2);
    let h = graph.buffer("h", 2);
    let y = graph.buffer("y", 2);

    graph.source(FixedSource::new(2, vec![vec![0.0; 2]]), x, 0);
    graph.compute(Affine::new(2, 2, vec![1.0, -1.0, 1.0, -1.0], vec![0.0, 0.0]), x, 0, h, 0);
    graph.compute(Relu::new(2), h, 0, y, 0);
    graph.sink(NullSink::new(2), y, 0);

    let outputs = cpu_eval_graph(&graph, 1, &[vec![1.0, 2.0]]);
    assert_eq!(outputs, vec![vec![3.0, 0.0]]);
}
