use pn_eval::evaluator::{Evaluator, EvaluatorConfig};
use pn_eval::tester::assert_outputs_match;
use pn_eval::Device;
use pn_graph::builtin::{Affine, ChannelSink, FixedSource, Relu};
use pn_graph::cpu::cpu_eval_graph;
use pn_graph::graph::Graph;

fn device() -> Device {
    Device::new(0).unwrap()
}

fn scenario_a_weights() -> (Vec<f32>, Vec<f32>) {
    let weight = (0..4 * 10).map(|i| (i % 7) as f32 * 0.5 - 1.0).collect();
    let bias = (0..10).map(|j| j as f32 * 0.25).collect();
    (weight, bias)
}

#[test]
fn two_sources_two_sink_windows() {
    let (weight, bias) = scenario_a_weights();

    let mut graph = Graph::new();
    let x = graph.buffer("x", 4);
    let y = graph.buffer("y", 10);
    graph.source(FixedSource::new(2, vec![vec![1.0, 1.0]]), x, 0);
    graph.source(FixedSource::new(2, vec![vec![2.0, 2.0]]), x, 2);
    graph.compute(Affine::new(4, 10, weight.clone(), bias.clone()), x, 0, y, 0);
    let (head, head_values) = ChannelSink::new(6);
    let (tail, tail_values) = ChannelSink::new(4);
    graph.sink(head, y, 0);
    graph.sink(tail, y, 6);

    // [1, 1, 2, 2] . W + b
    let input = [1.0, 1.0, 2.0, 2.0];
    let expected = (0..10)
        .map(|j| bias[j] + (0..4).map(|i| input[i] * weight[i * 10 + j]).sum::<f32>())
        .collect::<Vec<_>>();

    let mut evaluator = Evaluator::new(device(), graph, EvaluatorConfig::default()).unwrap();
    let snapshot = evaluator.run_pass_blocking();

    let head = head_values.try_recv().unwrap();
    let tail = tail_values.try_recv().unwrap();
    assert_outputs_match(&[expected[..6].to_vec(), expected[6..].to_vec()], &[head, tail], true);
    assert_eq!(snapshot.buffer_by_name("x"), Some(input.to_vec()));
    assert_eq!(snapshot.sink_inputs().concat().len(), 10);
}

#[test]
fn batch_of_two() {
    let mut graph = Graph::new();
    let x = graph.buffer("x", 2);
    let y = graph.buffer("y", 1);
    graph.source(FixedSource::new(2, vec![vec![1.0, 2.0, 1.0, 2.0]]), x, 0);
    graph.compute(Affine::new(2, 1, vec![2.0, 4.0], vec![1.0]), x, 0, y, 0);
    let (sink, values) = ChannelSink::new(1);
    graph.sink(sink, y, 0);

    let config = EvaluatorConfig::default().with_batch_size(2);
    let mut evaluator = Evaluator::new(device(), graph, config).unwrap();
    let snapshot = evaluator.run_pass_blocking();

    assert_eq!(values.try_recv().unwrap(), vec![7.0, 13.0]);
    assert_eq!(snapshot.batch_size(), 2);
    assert_eq!(snapshot.sink_inputs(), vec![vec![7.0, 13.0]]);
}

#[test]
fn affine_then_relu() {
    let mut graph = Graph::new();
    let x = graph.buffer("x", 2);
    let h = graph.buffer("h", 1);
    let y = graph.buffer("y", 1);
    graph.source(FixedSource::new(2, vec![vec![1.0, 1.0]]), x, 0);
    graph.compute(Affine::new(2, 1, vec![2.0, -4.0], vec![1.0]), x, 0, h, 0);
    graph.compute(Relu::new(1), h, 0, y, 0);
    let (sink, values) = ChannelSink::new(1);
    graph.sink(sink, y, 0);

    let mut evaluator = Evaluator::new(device(), graph, EvaluatorConfig::default()).unwrap();
    evaluator.run_pass_blocking();

    assert_eq!(values.try_recv().unwrap(), vec![0.0]);
}

#[test]
fn matches_cpu_reference() {
    let build = || {
        let mut graph = Graph::new();
        let x = graph.buffer("x", 3);
        let h = graph.buffer("h", 4);
        let y = graph.buffer("y", 2);
        graph.source(FixedSource::new(3, vec![vec![0.5, -1.0, 2.0]]), x, 0);
        let weight = (0..12).map(|i| (i as f32 - 6.0) / 4.0).collect();
        graph.compute(Affine::new(3, 4, weight, vec![0.1, -0.2, 0.3, -0.4]), x, 0, h, 0);
        graph.compute(Relu::new(2), h, 1, y, 0);
        let (sink, _) = ChannelSink::new(2);
        graph.sink(sink, y, 0);
        graph
    };

    let expected = cpu_eval_graph(&build(), 1, &[vec![0.5, -1.0, 2.0]]);

    let mut evaluator = Evaluator::new(device(), build(), EvaluatorConfig::default()).unwrap();
    for _ in 0..5 {
        let snapshot = evaluator.run_pass_blocking();
        assert_outputs_match(&expected, &snapshot.sink_inputs(), false);
    }
}
