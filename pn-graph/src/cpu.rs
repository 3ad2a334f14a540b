use std::collections::HashMap;

use itertools::{zip_eq, Itertools};

use crate::graph::Graph;
use crate::layer::Layer;

/// Evaluate `graph` on the host, visiting nodes in topological order.
///
/// `inputs` contains one batch per source, in [Graph::sources] order, and replaces calling the sources.
/// The result contains the values each sink would consume, in [Graph::sinks] order.
/// Sinks themselves are not called.
pub fn cpu_eval_graph(graph: &Graph, batch_size: usize, inputs: &[Vec<f32>]) -> Vec<Vec<f32>> {
    let order = graph
        .topological_order()
        .unwrap_or_else(|e| panic!("Cannot evaluate invalid graph: {}", e));

    let sources = graph.sources();
    let sinks = graph.sinks();
    assert_eq!(
        inputs.len(),
        sources.len(),
        "Wrong number of inputs, expected one per source"
    );

    let mut buffers = graph
        .buffers()
        .map(|buffer| vec![0.0; graph[buffer].len * batch_size])
        .collect_vec();
    let mut outputs = vec![vec![]; sinks.len()];

    let source_index: HashMap<_, _> = sources.iter().enumerate().map(|(i, &n)| (n, i)).collect();
    let sink_index: HashMap<_, _> = sinks.iter().enumerate().map(|(i, &n)| (n, i)).collect();

    for node in order {
        let info = &graph[node];
        let read = |buffers: &[Vec<f32>]| {
            let slice = info.input.unwrap_or_else(|| panic!("Node {:?} has no input", node));
            buffers[slice.buffer.index()][slice.element_range(batch_size)].to_vec()
        };

        let result = match &info.layer {
            Layer::Source(_) => inputs[source_index[&node]].clone(),
            Layer::Compute(layer) => layer.cpu_forward(batch_size, &read(&buffers)),
            Layer::Sink(_) => {
                outputs[sink_index[&node]] = read(&buffers);
                continue;
            }
        };

        let slice = info.output.unwrap_or_else(|| panic!("Node {:?} has no output", node));
        let target = &mut buffers[slice.buffer.index()][slice.element_range(batch_size)];
        for (t, r) in zip_eq(target, result) {
            *t = r;
        }
    }

    outputs
}
