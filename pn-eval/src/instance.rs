use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use itertools::Itertools;

use pn_device::handle::Device;
use pn_device::mem::DevicePtr;
use pn_graph::graph::Node;
use pn_graph::layer::LayerKind;

use crate::planner::{ElementRange, Plan};
use crate::snapshot::Snapshot;

/// Per pass lifecycle of a node within one slot.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum NodeStage {
    Pending,
    Encoded,
    Completed,
}

/// One complete set of device buffers, one per graph buffer.
///
/// Shared between the slot, the evaluator (to upload source batches) and snapshots.
pub struct BufferSet {
    device: Device,
    buffers: Vec<DevicePtr>,
}

pub type CompletionCallback = Box<dyn FnOnce(Snapshot) + Send>;

/// An execution slot: a buffer set plus the node bookkeeping of the pass currently using it.
///
/// Only ever touched by the worker thread.
pub struct Instance {
    index: usize,
    buffers: Arc<BufferSet>,

    stages: Vec<NodeStage>,
    pending_predecessors: Vec<usize>,
    ready: Vec<Node>,
    completed: usize,

    pass: Option<u64>,
    on_complete: Option<CompletionCallback>,
}

impl BufferSet {
    pub fn alloc(device: Device, plan: &Plan) -> Self {
        let buffers = plan.buffer_lens.iter().map(|&len| device.alloc(len)).collect();
        BufferSet { device, buffers }
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn get(&self, index: usize) -> Option<&DevicePtr> {
        self.buffers.get(index)
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn len_bytes(&self) -> usize {
        self.buffers.iter().map(|b| b.len_bytes()).sum()
    }

    /// Copy the current contents of `range` to the host.
    ///
    /// Panics if the range refers to a buffer that doesn't exist in this set.
    pub fn read(&self, range: ElementRange) -> Vec<f32> {
        self.resolve(range).read(range.offset, range.len)
    }

    pub fn write(&self, range: ElementRange, values: &[f32]) {
        assert_eq!(values.len(), range.len, "Wrong number of values for {:?}", range);
        self.resolve(range).copy_from_host(range.offset, values);
    }

    pub fn resolve(&self, range: ElementRange) -> &DevicePtr {
        self.get(range.buffer)
            .unwrap_or_else(|| panic!("No device buffer bound for {:?}, only have {}", range, self.buffers.len()))
    }

    /// Whether any device buffer is shared with `other`.
    pub fn aliases(&self, other: &BufferSet) -> bool {
        self.buffers
            .iter()
            .any(|a| other.buffers.iter().any(|b| a.same_buffer(b)))
    }
}

impl Instance {
    pub fn new(index: usize, buffers: Arc<BufferSet>, plan: &Plan) -> Self {
        Instance {
            index,
            buffers,
            stages: vec![NodeStage::Pending; plan.nodes.len()],
            pending_predecessors: plan.nodes.iter().map(|n| n.predecessor_count).collect(),
            ready: vec![],
            completed: 0,
            pass: None,
            on_complete: None,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn buffers(&self) -> &Arc<BufferSet> {
        &self.buffers
    }

    pub fn pass(&self) -> Option<u64> {
        self.pass
    }

    pub fn stage(&self, node: Node) -> NodeStage {
        self.stages[node.index()]
    }

    pub fn completed_count(&self) -> usize {
        self.completed
    }

    /// Prepare the slot for a new pass: every node back to [NodeStage::Pending], fresh predecessor counters
    /// and live compute nodes without any predecessors on the ready stack.
    pub fn reset(&mut self, plan: &Plan, pass: u64, on_complete: CompletionCallback) {
        assert!(
            self.pass.is_none(),
            "Slot {} reset while pass {:?} is still running",
            self.index,
            self.pass
        );

        self.stages.iter_mut().for_each(|s| *s = NodeStage::Pending);
        for (pending, node) in self.pending_predecessors.iter_mut().zip_eq(&plan.nodes) {
            *pending = node.predecessor_count;
        }
        self.ready.clear();
        self.completed = 0;

        self.ready
            .extend(plan.nodes.iter().filter(|n| n.live && n.predecessor_count == 0).map(|n| n.node));

        self.pass = Some(pass);
        self.on_complete = Some(on_complete);
    }

    /// Sources have their data written at admission, so they skip straight to [NodeStage::Completed].
    pub fn mark_source_completed(&mut self, plan: &Plan, node: Node) {
        assert_eq!(plan.node(node).kind, LayerKind::Source);
        self.stages[node.index()] = NodeStage::Completed;
        self.release_successors(plan, node);
    }

    pub fn pop_ready(&mut self) -> Option<Node> {
        self.ready.pop()
    }

    pub fn mark_encoded(&mut self, plan: &Plan, node: Node) {
        assert_eq!(self.stages[node.index()], NodeStage::Pending, "Node {:?} encoded twice", node);
        self.stages[node.index()] = NodeStage::Encoded;
        self.release_successors(plan, node);
    }

    /// Record a device completion, returns whether every live compute node has now completed.
    pub fn mark_completed(&mut self, plan: &Plan, node: Node) -> bool {
        let stage = &mut self.stages[node.index()];
        assert_eq!(
            *stage,
            NodeStage::Encoded,
            "Completion for node {:?} in slot {} which is not encoded",
            node,
            self.index
        );
        *stage = NodeStage::Completed;
        self.completed += 1;

        self.is_finished(plan)
    }

    pub fn is_finished(&self, plan: &Plan) -> bool {
        self.completed == plan.live_compute_count
    }

    /// End the current pass, returning its index and callback. The slot can be reset again afterwards.
    pub fn finish(&mut self) -> (u64, CompletionCallback) {
        let pass = self.pass.take();
        let on_complete = self.on_complete.take();
        match (pass, on_complete) {
            (Some(pass), Some(on_complete)) => (pass, on_complete),
            _ => panic!("Slot {} finished without an active pass", self.index),
        }
    }

    fn release_successors(&mut self, plan: &Plan, node: Node) {
        for &next in &plan.node(node).successors {
            let pending = &mut self.pending_predecessors[next.index()];
            assert!(*pending > 0, "Predecessor counter underflow for {:?}", next);
            *pending -= 1;
            if *pending == 0 {
                self.ready.push(next);
            }
        }
    }
}

impl Debug for BufferSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferSet")
            .field("device", &self.device)
            .field("buffers", &self.buffers.iter().map(|b| b.len()).collect_vec())
            .finish()
    }
}

impl Debug for Instance {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("index", &self.index)
            .field("pass", &self.pass)
            .field("completed", &self.completed)
            .field("ready", &self.ready)
            .field("stages", &self.stages)
            .finish()
    }
}
