use pn_device::args::{KernelContext, KernelError};
use pn_device::module::{register_module, ModuleError, ModuleSource};
use pn_eval::evaluator::{Evaluator, EvaluatorConfig, SetupError};
use pn_eval::Device;
use pn_graph::builtin::{Affine, FixedSource, NullSink, Relu};
use pn_graph::graph::{Graph, GraphError};
use pn_graph::layer::LayerError;

fn relu_graph() -> Graph {
    let mut graph = Graph::new();
    let x = graph.buffer("x", 2);
    let y = graph.buffer("y", 2);
    graph.source(FixedSource::new(2, vec![vec![0.0, 0.0]]), x, 0);
    graph.compute(Relu::new(2), x, 0, y, 0);
    graph.sink(NullSink::new(2), y, 0);
    graph
}

fn device() -> Device {
    Device::new(0).unwrap()
}

fn noop(_: &KernelContext) -> Result<(), KernelError> {
    Ok(())
}

#[test]
fn missing_module() {
    let config = EvaluatorConfig::default().with_module_name("missing");
    match Evaluator::new(device(), relu_graph(), config) {
        Err(SetupError::Module(ModuleError::NotFound(name, _))) => assert_eq!(name, "missing"),
        other => panic!("Expected missing module error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn missing_kernel() {
    register_module(ModuleSource::new("no_relu").with_function("noop", noop));

    let config = EvaluatorConfig::default().with_module_name("no_relu");
    match Evaluator::new(device(), relu_graph(), config) {
        Err(SetupError::LayerSetup { node, source }) => {
            assert_eq!(node.index(), 1);
            assert_eq!(
                source,
                LayerError::MissingKernel {
                    module: "no_relu".to_owned(),
                    kernel: "relu_forward".to_owned()
                }
            );
        }
        other => panic!("Expected layer setup error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn affine_parameter_shape() {
    let mut graph = Graph::new();
    let x = graph.buffer("x", 2);
    let y = graph.buffer("y", 3);
    graph.source(FixedSource::new(2, vec![vec![0.0, 0.0]]), x, 0);
    // two biases for three outputs
    let affine = graph.compute(Affine::new(2, 3, vec![0.0; 6], vec![0.0; 2]), x, 0, y, 0);
    graph.sink(NullSink::new(3), y, 0);

    match Evaluator::new(device(), graph, EvaluatorConfig::default()) {
        Err(SetupError::LayerSetup {
            node,
            source: LayerError::InvalidParameters(_),
        }) => assert_eq!(node, affine),
        other => panic!("Expected invalid parameters error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn invalid_config() {
    for config in [
        EvaluatorConfig::default().with_slot_count(0),
        EvaluatorConfig::default().with_batch_size(0),
    ] {
        let result = Evaluator::new(device(), relu_graph(), config);
        assert!(matches!(result, Err(SetupError::InvalidConfig(_))));
    }
}

#[test]
fn invalid_graph() {
    let mut graph = relu_graph();
    let x = graph.buffer_by_name("x").unwrap();
    graph.source(FixedSource::new(1, vec![vec![0.0]]), x, 1);

    match Evaluator::new(device(), graph, EvaluatorConfig::default()) {
        Err(SetupError::InvalidGraph(GraphError::OverlappingProducers { .. })) => {}
        other => panic!("Expected invalid graph error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn single_slot() {
    let config = EvaluatorConfig::default().with_slot_count(1);
    let mut evaluator = Evaluator::new(Device::new(1).unwrap(), relu_graph(), config).unwrap();
    println!("{:?}", evaluator);

    for pass in 0..4 {
        let snapshot = evaluator.run_pass_blocking();
        assert_eq!(snapshot.slot(), 0);
        assert_eq!(snapshot.pass(), pass);
    }
    assert_eq!(evaluator.mem_usage().slot_count, 1);
}
