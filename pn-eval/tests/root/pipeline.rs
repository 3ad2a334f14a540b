use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;

use pn_eval::evaluator::{Evaluator, EvaluatorConfig};
use pn_eval::tester::{assert_outputs_match, eval_pipelined, mlp_graph, pass_input};
use pn_eval::Device;
use pn_graph::builtin::{Affine, FixedSource, FnSource, NullSink, Relu};
use pn_graph::cpu::cpu_eval_graph;
use pn_graph::graph::Graph;

const SIZES: &[usize] = &[4, 8, 8, 3];

fn device() -> Device {
    Device::new(0).unwrap()
}

fn seeded_mlp() -> Graph {
    mlp_graph(SIZES, &mut StdRng::seed_from_u64(42)).0
}

#[test]
fn sequential_passes_match_cpu() {
    let reference = seeded_mlp();
    let mut evaluator = Evaluator::new(device(), seeded_mlp(), EvaluatorConfig::default()).unwrap();

    for pass in 0..8 {
        let snapshot = evaluator.run_pass_blocking();
        assert_eq!(snapshot.pass(), pass as u64);

        let expected = cpu_eval_graph(&reference, 1, &[pass_input(pass, SIZES[0], 1)]);
        assert_outputs_match(&expected, &snapshot.sink_inputs(), false);
    }
}

#[test]
fn interleaved_passes_do_not_mix() {
    let reference = seeded_mlp();
    let passes = 32;

    for slot_count in [1, 2, 3, 5] {
        for batch_size in [1, 2] {
            println!("Testing slot_count {}, batch_size {}", slot_count, batch_size);
            let config = EvaluatorConfig::default()
                .with_slot_count(slot_count)
                .with_batch_size(batch_size);

            let outputs = eval_pipelined(device(), seeded_mlp(), config, passes).unwrap();
            assert_eq!(outputs.len(), passes);

            for (pass, actual) in outputs.iter().enumerate() {
                let expected = cpu_eval_graph(&reference, batch_size, &[pass_input(pass, SIZES[0], batch_size)]);
                assert_outputs_match(&expected, actual, false);
            }
        }
    }
}

/// Two producers write disjoint halves of `h`, which an affine then reads as a whole.
fn diamond_graph() -> Graph {
    let mut graph = Graph::new();
    let x = graph.buffer("x", 2);
    let h = graph.buffer("h", 4);
    let y = graph.buffer("y", 3);

    graph.source(FnSource::new(2, |pass, batch_size| pass_input(pass, 2, batch_size)), x, 0);
    let left = graph.compute(Affine::new(2, 2, vec![1.0, -2.0, 0.5, 3.0], vec![0.25, -0.5]), x, 0, h, 0);
    let right = graph.compute(Relu::new(2), x, 0, h, 2);
    let weight = (0..12).map(|i| (i as f32 - 5.0) / 3.0).collect();
    let join = graph.compute(Affine::new(4, 3, weight, vec![0.0, 1.0, -1.0]), h, 0, y, 0);
    graph.set_debug_id(left, "left");
    graph.set_debug_id(right, "right");
    graph.set_debug_id(join, "join");

    graph.sink(NullSink::new(3), y, 0);
    // straddles both producers
    graph.sink(NullSink::new(2), h, 1);
    graph
}

#[test]
fn diamond_join_matches_cpu() {
    let reference = diamond_graph();
    let passes = 20;

    for slot_count in [1, 3] {
        for batch_size in [1, 2] {
            println!("Testing slot_count {}, batch_size {}", slot_count, batch_size);
            let config = EvaluatorConfig::default()
                .with_slot_count(slot_count)
                .with_batch_size(batch_size);

            let outputs = eval_pipelined(device(), diamond_graph(), config, passes).unwrap();
            for (pass, actual) in outputs.iter().enumerate() {
                assert_eq!(actual.len(), 2);
                let expected = cpu_eval_graph(&reference, batch_size, &[pass_input(pass, 2, batch_size)]);
                assert_outputs_match(&expected, actual, false);
            }
        }
    }
}

#[test]
fn slots_are_reused_round_robin() {
    let slot_count = 3;
    let config = EvaluatorConfig::default().with_slot_count(slot_count);
    let mut evaluator = Evaluator::new(device(), seeded_mlp(), config).unwrap();

    let (sender, receiver) = flume::unbounded();
    for _ in 0..10 {
        let sender = sender.clone();
        evaluator.run_pass(move |snapshot| sender.send((snapshot.pass(), snapshot.slot())).unwrap());
    }
    drop(evaluator);
    drop(sender);

    let mut slots = receiver.iter().collect::<Vec<_>>();
    slots.sort();
    for (pass, slot) in slots {
        assert_eq!(slot, pass as usize % slot_count, "Pass {} used unexpected slot", pass);
    }
}

#[test]
fn extra_pass_waits_for_free_slot() {
    let slot_count = 3;
    let config = EvaluatorConfig::default().with_slot_count(slot_count);
    let mut evaluator = Evaluator::new(device(), seeded_mlp(), config).unwrap();

    // completion callbacks run on the worker, so blocking the first one stalls every later completion
    let (gate_sender, gate) = flume::unbounded::<()>();
    for _ in 0..slot_count {
        let gate = gate.clone();
        evaluator.run_pass(move |_| gate.recv().unwrap());
    }
    assert_eq!(evaluator.stats().admitted(), slot_count as u64);

    let (admitted_sender, admitted) = flume::bounded(1);
    let thread = std::thread::spawn(move || {
        evaluator.run_pass(|_| {});
        admitted_sender.send(()).unwrap();
        evaluator
    });

    assert!(admitted.recv_timeout(Duration::from_millis(200)).is_err());

    for _ in 0..slot_count {
        gate_sender.send(()).unwrap();
    }
    admitted.recv_timeout(Duration::from_secs(10)).unwrap();

    let evaluator = thread.join().unwrap();
    assert_eq!(evaluator.stats().admitted(), slot_count as u64 + 1);
    assert!(evaluator.stats().peak_in_flight() <= slot_count as u64);
}

#[test]
fn stats_and_memory() {
    let config = EvaluatorConfig::default().with_slot_count(2);
    let mut evaluator = Evaluator::new(device(), seeded_mlp(), config).unwrap();

    for _ in 0..10 {
        evaluator.run_pass(|_| {});
    }
    evaluator.run_pass_blocking();

    let stats = evaluator.stats();
    println!("{}", stats);
    assert_eq!(stats.admitted(), 11);
    assert_eq!(stats.completed(), 11);
    assert_eq!(stats.in_flight(), 0);
    assert!(stats.peak_in_flight() >= 1 && stats.peak_in_flight() <= 2);
    // 3 affine + 2 relu per pass
    assert_eq!(stats.nodes_encoded(), 11 * 5);

    // input, 3 linear and 2 activation buffers
    let features: usize = 4 + (8 + 8 + 3) + (8 + 8);
    let mem_usage = evaluator.mem_usage();
    assert_eq!(mem_usage.slot_bytes, features * 4);
    assert_eq!(mem_usage.total_bytes, features * 4 * 2);

    assert!(!evaluator.slot_buffers(0).aliases(evaluator.slot_buffers(1)));
}

#[test]
fn unobserved_nodes_are_skipped() {
    let mut graph = Graph::new();
    let x = graph.buffer("x", 2);
    let y = graph.buffer("y", 2);
    let unused = graph.buffer("unused", 2);
    graph.source(FixedSource::new(2, vec![vec![-1.0, 1.0]]), x, 0);
    graph.compute(Relu::new(2), x, 0, y, 0);
    graph.compute(Relu::new(2), x, 0, unused, 0);
    graph.sink(NullSink::new(2), y, 0);

    let mut evaluator = Evaluator::new(device(), graph, EvaluatorConfig::default()).unwrap();
    let snapshot = evaluator.run_pass_blocking();

    assert_eq!(snapshot.buffer_by_name("y"), Some(vec![0.0, 1.0]));
    assert_eq!(snapshot.buffer_by_name("unused"), Some(vec![0.0, 0.0]));
    assert_eq!(evaluator.stats().nodes_encoded(), 1);
}

#[test]
fn source_straight_to_sink() {
    let mut graph = Graph::new();
    let x = graph.buffer("x", 3);
    graph.source(FixedSource::new(3, vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]), x, 0);
    graph.sink(NullSink::new(3), x, 0);

    let mut evaluator = Evaluator::new(device(), graph, EvaluatorConfig::default()).unwrap();
    assert_eq!(evaluator.run_pass_blocking().sink_inputs(), vec![vec![1.0, 2.0, 3.0]]);
    assert_eq!(evaluator.run_pass_blocking().sink_inputs(), vec![vec![4.0, 5.0, 6.0]]);
    assert_eq!(evaluator.stats().nodes_encoded(), 0);
}
