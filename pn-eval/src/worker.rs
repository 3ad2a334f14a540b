use std::sync::Arc;

use flume::{Receiver, Sender};

use pn_device::queue::{CommandQueue, CommandStatus};
use pn_graph::graph::{Graph, Node};
use pn_graph::layer::Layer;

use crate::instance::{CompletionCallback, Instance, NodeStage};
use crate::planner::Plan;
use crate::snapshot::Snapshot;
use crate::stats::EvaluatorStats;

pub(crate) enum WorkerMessage {
    /// Start a new pass in `slot`, the source batches have already been written.
    Admit {
        slot: usize,
        pass: u64,
        on_complete: CompletionCallback,
    },
    /// Posted from the queue thread when the command buffer of `node` finished.
    Completed {
        slot: usize,
        node: Node,
        status: CommandStatus,
    },
    Shutdown,
}

/// The single thread that owns all slot bookkeeping.
///
/// Everything that mutates an [Instance] happens in response to a message, so no locking is needed.
pub(crate) struct Worker {
    graph: Arc<Graph>,
    plan: Arc<Plan>,
    instances: Vec<Instance>,
    queue: CommandQueue,
    stats: Arc<EvaluatorStats>,

    /// Handed to command buffer completion handlers.
    sender: Sender<WorkerMessage>,
    /// Returning a slot index here releases its permit.
    permits: Sender<usize>,
}

impl Worker {
    pub fn new(
        graph: Arc<Graph>,
        plan: Arc<Plan>,
        instances: Vec<Instance>,
        queue: CommandQueue,
        stats: Arc<EvaluatorStats>,
        sender: Sender<WorkerMessage>,
        permits: Sender<usize>,
    ) -> Self {
        Worker {
            graph,
            plan,
            instances,
            queue,
            stats,
            sender,
            permits,
        }
    }

    pub fn run(mut self, receiver: Receiver<WorkerMessage>) {
        for message in receiver.iter() {
            match message {
                WorkerMessage::Admit {
                    slot,
                    pass,
                    on_complete,
                } => self.admit(slot, pass, on_complete),
                WorkerMessage::Completed { slot, node, status } => self.completed(slot, node, status),
                WorkerMessage::Shutdown => break,
            }
        }

        log::debug!("Evaluator worker shutting down");
    }

    fn admit(&mut self, slot: usize, pass: u64, on_complete: CompletionCallback) {
        log::debug!("Admitting pass {} in slot {}", pass, slot);

        let plan = &*self.plan;
        let instance = &mut self.instances[slot];
        instance.reset(plan, pass, on_complete);
        for &source in &plan.sources {
            instance.mark_source_completed(plan, source);
        }

        if instance.is_finished(plan) {
            // nothing to run on the device
            self.finalize(slot);
        } else {
            self.encode_ready(slot);
        }
    }

    /// Encode and commit every node that is ready in `slot`, including nodes that become ready along the way.
    fn encode_ready(&mut self, slot: usize) {
        let batch_size = self.plan.batch_size;
        let instance = &mut self.instances[slot];

        while let Some(node) = instance.pop_ready() {
            let plan = self.plan.node(node);
            if instance.stage(node) != NodeStage::Pending {
                continue;
            }

            let info = &self.graph[node];
            let layer = match &info.layer {
                Layer::Compute(layer) => layer,
                Layer::Source(_) | Layer::Sink(_) => continue,
            };

            let input = plan
                .input
                .unwrap_or_else(|| panic!("Compute node {:?} has no input binding", node));
            let output = plan
                .output
                .unwrap_or_else(|| panic!("Compute node {:?} has no output binding", node));
            let buffers = instance.buffers();
            let input_ptr = buffers.resolve(input);
            let output_ptr = buffers.resolve(output);

            let mut commands = self.queue.command_buffer();
            commands.set_label(format!("slot {} node {:?} {}", slot, node, info.debug_id));
            layer.encode(
                &mut commands,
                batch_size,
                input_ptr,
                input.offset,
                output_ptr,
                output.offset,
            );

            let sender = self.sender.clone();
            commands.on_completed(move |status| {
                // only fails if the worker panicked
                let _ = sender.send(WorkerMessage::Completed { slot, node, status });
            });
            self.queue.commit(commands);

            log::trace!("Encoded node {:?} for slot {}", node, slot);
            self.stats.record_encoded();
            instance.mark_encoded(&self.plan, node);
        }
    }

    fn completed(&mut self, slot: usize, node: Node, status: CommandStatus) {
        if let CommandStatus::Error(e) = status {
            log::error!("Device execution of node {:?} in slot {} failed: {}", node, slot, e);
            panic!("Device execution of node {:?} in slot {} failed: {}", node, slot, e);
        }

        let instance = &mut self.instances[slot];
        if instance.mark_completed(&self.plan, node) {
            self.finalize(slot);
        }
    }

    fn finalize(&mut self, slot: usize) {
        let instance = &mut self.instances[slot];
        let buffers = Arc::clone(instance.buffers());

        for &sink in &self.plan.sinks {
            let range = self
                .plan
                .node(sink)
                .input
                .unwrap_or_else(|| panic!("Sink {:?} has no input binding", sink));

            match &self.graph[sink].layer {
                Layer::Sink(layer) => layer.consume(&buffers.read(range)),
                other => panic!("Expected sink layer for {:?}, got {:?}", sink, other),
            }
        }

        let (pass, on_complete) = instance.finish();
        log::debug!("Pass {} in slot {} completed", pass, slot);

        self.stats.record_completed();

        let snapshot = Snapshot::new(Arc::clone(&self.graph), Arc::clone(&self.plan), buffers, slot, pass);
        on_complete(snapshot);

        // the evaluator may already be gone while the last passes drain
        let _ = self.permits.send(slot);
    }
}
