use std::collections::VecDeque;
use std::fmt::{Debug, Display, Formatter};
use std::ops::{Index, Range};

use indexmap::IndexMap;
use itertools::Itertools;
use rand::random;

use crate::layer::{ComputeLayer, Layer, LayerKind, SinkLayer, SourceLayer};

/// The core graph datastructure.
///
/// The graph consists of named buffers with a fixed number of features, and nodes that place a layer on
/// regions of those buffers. Nodes are connected implicitly: `b` is a successor of `a` if the output region
/// of `a` overlaps the input region of `b` in the same buffer.
///
/// The data structure is append-only, nodes and buffers can't be removed, so handles never become invalid.
/// Handles carry a random check value, using a handle with the wrong graph panics.
///
/// This type implements `Index<Node>` and `Index<Buffer>`, so `graph[node]` and `graph[buffer]` give access
/// to the corresponding info.
///
/// Construction only checks handles, call [Graph::validate] to check the structure as a whole.
pub struct Graph {
    check: u32,
    buffers: IndexMap<String, BufferInfo>,
    nodes: Vec<NodeInfo>,
}

/// A node in a [Graph].
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Node {
    index: usize,
    check: u32,
}

/// A buffer in a [Graph].
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct Buffer {
    index: usize,
    check: u32,
}

#[derive(Debug, Clone)]
pub struct BufferInfo {
    pub name: String,
    /// The number of features per sample.
    pub len: usize,
}

/// A contiguous region of a buffer, in features.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct BufferSlice {
    pub buffer: Buffer,
    pub offset: usize,
    pub len: usize,
}

#[derive(Debug)]
pub struct NodeInfo {
    pub layer: Layer,
    pub input: Option<BufferSlice>,
    pub output: Option<BufferSlice>,
    pub debug_id: String,
}

#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum GraphError {
    #[error("{kind:?} node {node:?} has no {side} slice")]
    MissingSlice {
        node: Node,
        kind: LayerKind,
        side: SliceSide,
    },
    #[error("{kind:?} node {node:?} should not have an {side} slice")]
    UnexpectedSlice {
        node: Node,
        kind: LayerKind,
        side: SliceSide,
    },
    #[error("{side} slice of node {node:?} has length {actual} but the layer expects {expected}")]
    SliceLength {
        node: Node,
        side: SliceSide,
        expected: usize,
        actual: usize,
    },
    #[error("{side} slice {range:?} of node {node:?} is out of bounds for buffer `{buffer}` with length {buffer_len}")]
    OutOfBounds {
        node: Node,
        side: SliceSide,
        buffer: String,
        range: Range<usize>,
        buffer_len: usize,
    },
    #[error("nodes {first:?} and {second:?} both write to an overlapping region of buffer `{buffer}`")]
    OverlappingProducers { first: Node, second: Node, buffer: String },
    #[error("graph contains a cycle through nodes {nodes:?}")]
    Cycle { nodes: Vec<Node> },
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum SliceSide {
    Input,
    Output,
}

impl Index<Node> for Graph {
    type Output = NodeInfo;

    fn index(&self, node: Node) -> &Self::Output {
        self.check_node(node);
        &self.nodes[node.index]
    }
}

impl Index<Buffer> for Graph {
    type Output = BufferInfo;

    fn index(&self, buffer: Buffer) -> &Self::Output {
        self.check_buffer(buffer);
        &self.buffers[buffer.index]
    }
}

impl Graph {
    pub fn new() -> Self {
        Graph {
            check: random(),
            buffers: IndexMap::new(),
            nodes: vec![],
        }
    }

    fn check_node(&self, node: Node) {
        assert_eq!(node.check, self.check, "Node {:?} does not belong to this graph", node);
        assert!(node.index < self.nodes.len());
    }

    fn check_buffer(&self, buffer: Buffer) {
        assert_eq!(
            buffer.check, self.check,
            "Buffer {:?} does not belong to this graph",
            buffer
        );
        assert!(buffer.index < self.buffers.len());
    }

    /// Iterate over the nodes in this graph, in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = Node> {
        let check = self.check;
        (0..self.nodes.len()).map(move |index| Node { index, check })
    }

    pub fn buffers(&self) -> impl Iterator<Item = Buffer> {
        let check = self.check;
        (0..self.buffers.len()).map(move |index| Buffer { index, check })
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn buffer_by_name(&self, name: &str) -> Option<Buffer> {
        let index = self.buffers.get_index_of(name)?;
        Some(Buffer {
            index,
            check: self.check,
        })
    }

    fn nodes_of_kind(&self, kind: LayerKind) -> Vec<Node> {
        self.nodes().filter(|&node| self[node].layer.kind() == kind).collect()
    }

    pub fn sources(&self) -> Vec<Node> {
        self.nodes_of_kind(LayerKind::Source)
    }

    pub fn computes(&self) -> Vec<Node> {
        self.nodes_of_kind(LayerKind::Compute)
    }

    pub fn sinks(&self) -> Vec<Node> {
        self.nodes_of_kind(LayerKind::Sink)
    }

    /// The nodes that read a region written by `node`, in insertion order.
    pub fn successors(&self, node: Node) -> Vec<Node> {
        let output = match self[node].output {
            None => return vec![],
            Some(output) => output,
        };

        self.nodes()
            .filter(|&other| other != node && self[other].input.map_or(false, |input| input.overlaps(&output)))
            .collect()
    }

    /// The nodes that write a region read by `node`, in insertion order.
    pub fn predecessors(&self, node: Node) -> Vec<Node> {
        let input = match self[node].input {
            None => return vec![],
            Some(input) => input,
        };

        self.nodes()
            .filter(|&other| other != node && self[other].output.map_or(false, |output| output.overlaps(&input)))
            .collect()
    }

    pub fn set_debug_id(&mut self, node: Node, id: impl Into<String>) {
        self.check_node(node);
        self.nodes[node.index].debug_id = id.into();
    }

    /// Mutable access to a compute layer, used to set it up for a device.
    /// Returns `None` if `node` is not a compute node.
    pub fn compute_layer_mut(&mut self, node: Node) -> Option<&mut (dyn ComputeLayer + 'static)> {
        self.check_node(node);
        match &mut self.nodes[node.index].layer {
            Layer::Compute(layer) => Some(layer.as_mut()),
            Layer::Source(_) | Layer::Sink(_) => None,
        }
    }

    /// Declare a new buffer with `len` features per sample.
    pub fn buffer(&mut self, name: impl Into<String>, len: usize) -> Buffer {
        let name = name.into();
        assert!(
            !self.buffers.contains_key(&name),
            "Buffer with name `{}` already exists",
            name
        );

        let (index, _) = self.buffers.insert_full(name.clone(), BufferInfo { name, len });
        Buffer {
            index,
            check: self.check,
        }
    }

    pub fn slice(&self, buffer: Buffer, offset: usize, len: usize) -> BufferSlice {
        self.check_buffer(buffer);
        BufferSlice { buffer, offset, len }
    }

    /// Place a source writing `layer.output_len()` features to `output` starting at `output_offset`.
    pub fn source(&mut self, layer: impl SourceLayer + 'static, output: Buffer, output_offset: usize) -> Node {
        let output = self.slice(output, output_offset, layer.output_len());
        self.push(Layer::Source(Box::new(layer)), None, Some(output))
    }

    pub fn compute(
        &mut self,
        layer: impl ComputeLayer + 'static,
        input: Buffer,
        input_offset: usize,
        output: Buffer,
        output_offset: usize,
    ) -> Node {
        let input = self.slice(input, input_offset, layer.input_len());
        let output = self.slice(output, output_offset, layer.output_len());
        self.push(Layer::Compute(Box::new(layer)), Some(input), Some(output))
    }

    pub fn sink(&mut self, layer: impl SinkLayer + 'static, input: Buffer, input_offset: usize) -> Node {
        let input = self.slice(input, input_offset, layer.input_len());
        self.push(Layer::Sink(Box::new(layer)), Some(input), None)
    }

    /// Add a node with arbitrary slices. Nothing beyond the handles is checked here,
    /// mismatches between the layer kind and the slices are reported by [Graph::validate].
    pub fn push(&mut self, layer: Layer, input: Option<BufferSlice>, output: Option<BufferSlice>) -> Node {
        for slice in input.iter().chain(output.iter()) {
            self.check_buffer(slice.buffer);
        }

        let index = self.nodes.len();
        self.nodes.push(NodeInfo {
            layer,
            input,
            output,
            debug_id: String::new(),
        });
        Node {
            index,
            check: self.check,
        }
    }

    /// Check that the graph is well-formed:
    /// * every node has exactly the slices its layer kind requires, with the lengths the layer expects
    /// * every slice is within the bounds of its buffer
    /// * no element has more than one producer
    /// * there are no cycles
    pub fn validate(&self) -> Result<(), GraphError> {
        for node in self.nodes() {
            let info = &self[node];
            let kind = info.layer.kind();

            let sides = [
                (SliceSide::Input, info.input, info.layer.input_len()),
                (SliceSide::Output, info.output, info.layer.output_len()),
            ];

            for (side, slice, expected_len) in sides {
                match (slice, expected_len) {
                    (None, None) => {}
                    (None, Some(_)) => return Err(GraphError::MissingSlice { node, kind, side }),
                    (Some(_), None) => return Err(GraphError::UnexpectedSlice { node, kind, side }),
                    (Some(slice), Some(expected)) => {
                        if slice.len != expected {
                            return Err(GraphError::SliceLength {
                                node,
                                side,
                                expected,
                                actual: slice.len,
                            });
                        }

                        let buffer = &self[slice.buffer];
                        if slice.range().end > buffer.len {
                            return Err(GraphError::OutOfBounds {
                                node,
                                side,
                                buffer: buffer.name.clone(),
                                range: slice.range(),
                                buffer_len: buffer.len,
                            });
                        }
                    }
                }
            }
        }

        let producers = self.nodes().filter_map(|n| Some((n, self[n].output?))).collect_vec();
        for (&(first, a), &(second, b)) in producers.iter().tuple_combinations() {
            if a.overlaps(&b) {
                return Err(GraphError::OverlappingProducers {
                    first,
                    second,
                    buffer: self[a.buffer].name.clone(),
                });
            }
        }

        self.topological_order().map(|_| ())
    }

    /// Order the nodes so that every node comes after all of its predecessors.
    /// Ties are broken by insertion order.
    pub fn topological_order(&self) -> Result<Vec<Node>, GraphError> {
        let successors = self.nodes().map(|node| self.successors(node)).collect_vec();
        let mut pending = vec![0; self.nodes.len()];
        for next in successors.iter().flatten() {
            pending[next.index] += 1;
        }

        let mut ready: VecDeque<Node> = self.nodes().filter(|n| pending[n.index] == 0).collect();
        let mut order = vec![];

        while let Some(node) = ready.pop_front() {
            order.push(node);
            for &next in &successors[node.index] {
                pending[next.index] -= 1;
                if pending[next.index] == 0 {
                    ready.push_back(next);
                }
            }
        }

        if order.len() == self.nodes.len() {
            Ok(order)
        } else {
            let nodes = self.nodes().filter(|n| pending[n.index] != 0).collect();
            Err(GraphError::Cycle { nodes })
        }
    }
}

impl Node {
    pub fn index(self) -> usize {
        self.index
    }
}

impl Buffer {
    pub fn index(self) -> usize {
        self.index
    }
}

impl BufferSlice {
    /// The feature range covered by this slice.
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.len
    }

    /// The device element range covered by this slice, for the feature-major layout with `batch_size` samples.
    pub fn element_range(&self, batch_size: usize) -> Range<usize> {
        self.offset * batch_size..(self.offset + self.len) * batch_size
    }

    pub fn overlaps(&self, other: &BufferSlice) -> bool {
        self.buffer == other.buffer && self.offset < other.offset + other.len && other.offset < self.offset + self.len
    }
}

impl Display for SliceSide {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SliceSide::Input => write!(f, "input"),
            SliceSide::Output => write!(f, "output"),
        }
    }
}

impl Debug for Node {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let Node { index, check } = self;
        if f.alternate() {
            write!(f, "Node {{ index: {}, check: {} }}", index, check)
        } else {
            write!(f, "Node({})", index)
        }
    }
}

impl Debug for Buffer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let Buffer { index, check } = self;
        if f.alternate() {
            write!(f, "Buffer {{ index: {}, check: {} }}", index, check)
        } else {
            write!(f, "Buffer({})", index)
        }
    }
}

impl Debug for Graph {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("check", &self.check)
            .field("buffers", &self.buffers.len())
            .field("nodes", &self.nodes.len())
            .finish()
    }
}

impl Display for Graph {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Graph {{")?;
        writeln!(f, "  check: {},", self.check)?;

        writeln!(f, "  buffers: [")?;
        for buffer in self.buffers() {
            let BufferInfo { name, len } = &self[buffer];
            writeln!(f, "    {:?} = {:?} [{}],", buffer, name, len)?;
        }
        writeln!(f, "  ],")?;

        writeln!(f, "  nodes: [")?;
        for node in self.nodes() {
            let NodeInfo {
                layer,
                input,
                output,
                debug_id,
            } = &self[node];

            let fmt_slice = |slice: &Option<BufferSlice>| match slice {
                None => "_".to_owned(),
                Some(slice) => format!("{}{:?}", self[slice.buffer].name, slice.range()),
            };

            writeln!(
                f,
                "    {:?} = {:?}({}) -> {} {:?},",
                node,
                layer,
                fmt_slice(input),
                fmt_slice(output),
                debug_id,
            )?;
        }
        writeln!(f, "  ],")?;

        writeln!(f, "}}")?;
        Ok(())
    }
}
