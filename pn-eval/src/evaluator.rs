use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::thread::JoinHandle;

use flume::{Receiver, Sender};

use pn_device::handle::Device;
use pn_device::module::{KernelModule, ModuleError};
use pn_device::queue::CommandQueue;
use pn_graph::graph::{Graph, GraphError, Node};
use pn_graph::layer::{Layer, LayerError};

use crate::instance::{BufferSet, Instance};
use crate::planner::Plan;
use crate::snapshot::Snapshot;
use crate::stats::{EvaluatorStats, MemoryUsage};
use crate::worker::{Worker, WorkerMessage};

/// Evaluates a graph pass by pass, keeping up to `slot_count` passes in flight on the device.
///
/// Each pass gets an execution slot with its own buffers. Node work is encoded as soon as all of its
/// producers have been encoded, and results are delivered through a callback once every node that
/// feeds a sink has completed on the device.
///
/// ```
/// # use pn_device::handle::Device;
/// # use pn_eval::evaluator::{Evaluator, EvaluatorConfig};
/// # use pn_graph::builtin::{Affine, ChannelSink, FixedSource};
/// # use pn_graph::graph::Graph;
/// let mut graph = Graph::new();
/// let x = graph.buffer("x", 2);
/// let y = graph.buffer("y", 1);
/// graph.source(FixedSource::new(2, vec![vec![1.0, 2.0]]), x, 0);
/// graph.compute(Affine::new(2, 1, vec![1.0, 1.0], vec![0.5]), x, 0, y, 0);
/// let (sink, results) = ChannelSink::new(1);
/// graph.sink(sink, y, 0);
///
/// let device = Device::new(0).unwrap();
/// let mut evaluator = Evaluator::new(device, graph, EvaluatorConfig::default()).unwrap();
/// for _ in 0..8 {
///     evaluator.run_pass(|_snapshot| {});
/// }
/// drop(evaluator);
///
/// assert_eq!(results.try_iter().count(), 8);
/// ```
pub struct Evaluator {
    device: Device,
    config: EvaluatorConfig,

    graph: Arc<Graph>,
    plan: Arc<Plan>,
    buffer_sets: Vec<Arc<BufferSet>>,

    permits: Receiver<usize>,
    worker_sender: Sender<WorkerMessage>,
    worker_thread: Option<JoinHandle<()>>,

    stats: Arc<EvaluatorStats>,
    mem_usage: MemoryUsage,
    next_pass: u64,
}

/// Construction parameters of an [Evaluator], see [EvaluatorConfig::default] for the defaults.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct EvaluatorConfig {
    /// The number of execution slots, and so the maximum number of passes in flight.
    pub slot_count: usize,
    /// The number of samples every source produces per pass.
    pub batch_size: usize,
    /// The kernel module the compute layers are set up with.
    pub module_name: String,
}

/// Everything that can go wrong in [Evaluator::new]. Nothing is retried.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("invalid graph: {0}")]
    InvalidGraph(#[from] GraphError),
    #[error("failed to load kernel module: {0}")]
    Module(#[from] ModuleError),
    #[error("failed to set up layer of node {node:?}: {source}")]
    LayerSetup { node: Node, source: LayerError },
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        EvaluatorConfig {
            slot_count: 3,
            batch_size: 1,
            module_name: pn_device::kernels::BUILTIN_MODULE_NAME.to_owned(),
        }
    }
}

impl EvaluatorConfig {
    pub fn with_slot_count(self, slot_count: usize) -> Self {
        EvaluatorConfig { slot_count, ..self }
    }

    pub fn with_batch_size(self, batch_size: usize) -> Self {
        EvaluatorConfig { batch_size, ..self }
    }

    pub fn with_module_name(self, module_name: impl Into<String>) -> Self {
        EvaluatorConfig {
            module_name: module_name.into(),
            ..self
        }
    }

    fn check(&self) -> Result<(), SetupError> {
        if self.slot_count == 0 {
            return Err(SetupError::InvalidConfig("slot_count must be at least 1".to_owned()));
        }
        if self.batch_size == 0 {
            return Err(SetupError::InvalidConfig("batch_size must be at least 1".to_owned()));
        }
        Ok(())
    }
}

impl Evaluator {
    pub fn new(device: Device, mut graph: Graph, config: EvaluatorConfig) -> Result<Self, SetupError> {
        config.check()?;
        graph.validate()?;

        let module = KernelModule::load(device, &config.module_name)?;
        let plan = Plan::new(&graph, config.batch_size);

        let buffer_sets = (0..config.slot_count)
            .map(|_| Arc::new(BufferSet::alloc(device, &plan)))
            .collect::<Vec<_>>();

        for node in graph.computes() {
            if let Some(layer) = graph.compute_layer_mut(node) {
                layer
                    .setup(&module)
                    .map_err(|source| SetupError::LayerSetup { node, source })?;
            }
        }

        let mem_usage = MemoryUsage::new(plan.slot_bytes(), config.slot_count);
        log::info!(
            "Created evaluator on {:?}: {} nodes ({} live compute), {} buffers, {} slots, batch size {}, {:?}",
            device,
            graph.node_count(),
            plan.live_compute_count,
            graph.buffer_count(),
            config.slot_count,
            config.batch_size,
            mem_usage,
        );

        let graph = Arc::new(graph);
        let plan = Arc::new(plan);
        let stats = Arc::new(EvaluatorStats::default());

        let instances = buffer_sets
            .iter()
            .enumerate()
            .map(|(i, buffers)| Instance::new(i, Arc::clone(buffers), &plan))
            .collect();

        // every slot starts out free, handing them out in FIFO order gives round-robin reuse
        let (permit_sender, permits) = flume::bounded(config.slot_count);
        for slot in 0..config.slot_count {
            permit_sender
                .send(slot)
                .unwrap_or_else(|_| unreachable!("receiver is still alive"));
        }

        let (worker_sender, worker_receiver) = flume::unbounded();
        let worker = Worker::new(
            Arc::clone(&graph),
            Arc::clone(&plan),
            instances,
            CommandQueue::new(device),
            Arc::clone(&stats),
            worker_sender.clone(),
            permit_sender,
        );
        let worker_thread = std::thread::Builder::new()
            .name("pn-eval-worker".to_owned())
            .spawn(move || worker.run(worker_receiver))
            .unwrap_or_else(|e| panic!("Failed to spawn evaluator worker: {}", e));

        Ok(Evaluator {
            device,
            config,
            graph,
            plan,
            buffer_sets,
            permits,
            worker_sender,
            worker_thread: Some(worker_thread),
            stats,
            mem_usage,
            next_pass: 0,
        })
    }

    /// Start a new pass, blocking only while all slots are in use.
    ///
    /// Every source is asked for its next batch immediately, on the calling thread.
    /// `on_complete` is called exactly once on the worker thread when the pass finishes,
    /// after all sinks have consumed their values. Returns the pass index.
    ///
    /// Panics if the worker has died because of an earlier device failure.
    pub fn run_pass(&mut self, on_complete: impl FnOnce(Snapshot) + Send + 'static) -> u64 {
        let slot = self
            .permits
            .recv()
            .unwrap_or_else(|_| panic!("Evaluator worker died, cannot admit new passes"));

        let pass = self.next_pass;
        self.next_pass += 1;
        self.stats.record_admitted();

        let buffers = &self.buffer_sets[slot];
        for &source in &self.plan.sources {
            let layer = match &self.graph[source].layer {
                Layer::Source(layer) => layer,
                other => panic!("Expected source layer for {:?}, got {:?}", source, other),
            };
            let range = self
                .plan
                .node(source)
                .output
                .unwrap_or_else(|| panic!("Source {:?} has no output binding", source));

            let batch = layer.next_batch(self.config.batch_size);
            assert_eq!(
                batch.len(),
                range.len,
                "Source {:?} produced {} values, expected {}",
                source,
                batch.len(),
                range.len
            );
            buffers.write(range, &batch);
        }

        let message = WorkerMessage::Admit {
            slot,
            pass,
            on_complete: Box::new(on_complete),
        };
        if self.worker_sender.send(message).is_err() {
            panic!("Evaluator worker died, cannot admit pass {}", pass);
        }

        pass
    }

    /// Run a pass and wait for its result.
    pub fn run_pass_blocking(&mut self) -> Snapshot {
        let (sender, receiver) = flume::bounded(1);
        let pass = self.run_pass(move |snapshot| {
            let _ = sender.send(snapshot);
        });
        receiver
            .recv()
            .unwrap_or_else(|_| panic!("Evaluator worker died before completing pass {}", pass))
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn slot_count(&self) -> usize {
        self.config.slot_count
    }

    pub fn stats(&self) -> &EvaluatorStats {
        &self.stats
    }

    pub fn mem_usage(&self) -> MemoryUsage {
        self.mem_usage
    }

    /// The device buffers of `slot`, for inspection.
    pub fn slot_buffers(&self, slot: usize) -> &BufferSet {
        &self.buffer_sets[slot]
    }
}

impl Drop for Evaluator {
    fn drop(&mut self) {
        // wait for in-flight passes by claiming every slot
        for _ in 0..self.config.slot_count {
            if self.permits.recv().is_err() {
                break;
            }
        }

        let _ = self.worker_sender.send(WorkerMessage::Shutdown);
        if let Some(thread) = self.worker_thread.take() {
            if thread.join().is_err() {
                log::error!("Evaluator worker panicked");
            }
        }
    }
}

impl Debug for Evaluator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Evaluator {{")?;

        writeln!(f, "    device: {:?},", self.device)?;
        writeln!(f, "    config: {:?},", self.config)?;
        writeln!(f, "    mem_usage: {:?},", self.mem_usage)?;
        writeln!(f, "    next_pass: {},", self.next_pass)?;
        writeln!(f, "    live_compute_count: {},", self.plan.live_compute_count)?;
        writeln!(f, "    slots: [")?;
        for set in &self.buffer_sets {
            writeln!(f, "        {:?},", set)?;
        }
        writeln!(f, "    ],")?;

        writeln!(f, "}}")?;
        Ok(())
    }
}
