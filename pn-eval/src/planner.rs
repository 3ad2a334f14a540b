use itertools::Itertools;

use pn_graph::graph::{BufferSlice, Graph, Node};
use pn_graph::layer::LayerKind;

/// The static schedule shared by every slot, derived once from the graph.
///
/// Everything here is indexed by [Node::index], and all ranges are already scaled to device elements.
#[derive(Debug)]
pub struct Plan {
    pub batch_size: usize,
    pub nodes: Vec<NodePlan>,

    pub sources: Vec<Node>,
    pub sinks: Vec<Node>,
    pub live_compute_count: usize,

    /// Device element count per graph buffer.
    pub buffer_lens: Vec<usize>,
}

#[derive(Debug)]
pub struct NodePlan {
    pub node: Node,
    pub kind: LayerKind,
    /// Whether some sink is reachable from this node. Only meaningful for compute nodes.
    pub live: bool,

    /// Successors that take part in traversal: live compute nodes and sinks.
    pub successors: Vec<Node>,
    /// The number of predecessors that must be encoded before this node becomes ready.
    pub predecessor_count: usize,

    pub input: Option<ElementRange>,
    pub output: Option<ElementRange>,
}

/// A range of device elements within a slot buffer.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ElementRange {
    pub buffer: usize,
    pub offset: usize,
    pub len: usize,
}

impl Plan {
    /// Build the plan for an already validated graph.
    pub fn new(graph: &Graph, batch_size: usize) -> Plan {
        let successors = graph.nodes().map(|node| graph.successors(node)).collect_vec();

        // walk backwards from the sinks
        let mut reaches_sink = vec![false; graph.node_count()];
        let mut stack = graph.sinks();
        while let Some(node) = stack.pop() {
            if !reaches_sink[node.index()] {
                reaches_sink[node.index()] = true;
                stack.extend(graph.predecessors(node));
            }
        }

        let kinds = graph.nodes().map(|node| graph[node].layer.kind()).collect_vec();
        let traversed = |node: Node| match kinds[node.index()] {
            LayerKind::Source => false,
            LayerKind::Compute => reaches_sink[node.index()],
            LayerKind::Sink => true,
        };

        let mut predecessor_count = vec![0; graph.node_count()];
        for node in graph.nodes() {
            for &next in &successors[node.index()] {
                predecessor_count[next.index()] += 1;
            }
        }

        let range = |slice: BufferSlice| {
            let elements = slice.element_range(batch_size);
            ElementRange {
                buffer: slice.buffer.index(),
                offset: elements.start,
                len: elements.len(),
            }
        };

        let nodes = graph
            .nodes()
            .map(|node| {
                let info = &graph[node];
                NodePlan {
                    node,
                    kind: kinds[node.index()],
                    live: kinds[node.index()] == LayerKind::Compute && reaches_sink[node.index()],
                    successors: successors[node.index()].iter().copied().filter(|&n| traversed(n)).collect(),
                    predecessor_count: predecessor_count[node.index()],
                    input: info.input.map(range),
                    output: info.output.map(range),
                }
            })
            .collect_vec();

        let live_compute_count = nodes.iter().filter(|n| n.live).count();
        let buffer_lens = graph.buffers().map(|buffer| graph[buffer].len * batch_size).collect();

        Plan {
            batch_size,
            nodes,
            sources: graph.sources(),
            sinks: graph.sinks(),
            live_compute_count,
            buffer_lens,
        }
    }

    pub fn node(&self, node: Node) -> &NodePlan {
        &self.nodes[node.index()]
    }

    /// Bytes needed for one complete set of slot buffers.
    pub fn slot_bytes(&self) -> usize {
        self.buffer_lens.iter().sum::<usize>() * std::mem::size_of::<f32>()
    }
}
