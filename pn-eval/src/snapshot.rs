use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use pn_graph::graph::{Buffer, BufferSlice, Graph, Node};
use pn_graph::layer::LayerKind;

use crate::instance::BufferSet;
use crate::planner::{ElementRange, Plan};

/// Read-only view of the buffers of one completed pass.
///
/// The view reads the slot's device buffers directly, so it only shows the results of its own pass until
/// the slot is admitted again. Consume or copy what you need inside the completion callback,
/// or at least before `slot_count` more passes have been started.
#[derive(Clone)]
pub struct Snapshot {
    graph: Arc<Graph>,
    plan: Arc<Plan>,
    buffers: Arc<BufferSet>,
    slot: usize,
    pass: u64,
}

impl Snapshot {
    pub(crate) fn new(graph: Arc<Graph>, plan: Arc<Plan>, buffers: Arc<BufferSet>, slot: usize, pass: u64) -> Self {
        Snapshot {
            graph,
            plan,
            buffers,
            slot,
            pass,
        }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    /// The sequence number of the pass, counting from zero in `run_pass` call order.
    pub fn pass(&self) -> u64 {
        self.pass
    }

    pub fn batch_size(&self) -> usize {
        self.plan.batch_size
    }

    /// The full contents of `buffer`, feature-major.
    pub fn buffer(&self, buffer: Buffer) -> Vec<f32> {
        let len = self.graph[buffer].len;
        self.read(self.graph.slice(buffer, 0, len))
    }

    pub fn buffer_by_name(&self, name: &str) -> Option<Vec<f32>> {
        self.graph.buffer_by_name(name).map(|buffer| self.buffer(buffer))
    }

    pub fn read(&self, slice: BufferSlice) -> Vec<f32> {
        let info = &self.graph[slice.buffer];
        assert!(
            slice.range().end <= info.len,
            "Slice {:?} out of bounds for buffer `{}`",
            slice.range(),
            info.name
        );

        let elements = slice.element_range(self.batch_size());
        self.buffers.read(ElementRange {
            buffer: slice.buffer.index(),
            offset: elements.start,
            len: elements.len(),
        })
    }

    /// The values `sink` consumed at the end of this pass.
    pub fn sink_input(&self, sink: Node) -> Vec<f32> {
        let plan = self.plan.node(sink);
        assert_eq!(plan.kind, LayerKind::Sink, "Node {:?} is not a sink", sink);

        let range = plan
            .input
            .unwrap_or_else(|| panic!("Sink {:?} has no input slice", sink));
        self.buffers.read(range)
    }

    /// The values of all sinks, in [Graph::sinks] order.
    pub fn sink_inputs(&self) -> Vec<Vec<f32>> {
        self.plan.sinks.iter().map(|&sink| self.sink_input(sink)).collect()
    }
}

impl Debug for Snapshot {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("slot", &self.slot)
            .field("pass", &self.pass)
            .field("batch_size", &self.batch_size())
            .finish()
    }
}
