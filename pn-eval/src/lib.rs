#![warn(missing_debug_implementations)]

//! A pipelined evaluator for graphs from the `pn_graph` crate. The core type is [Evaluator](evaluator::Evaluator).
//!
//! Passes are evaluated one batch at a time, but up to `slot_count` of them are in flight on the device
//! at once, each in its own execution slot with private buffers.
//!
//! # Quick demo
//!
//! ```
//! # use pn_eval::evaluator::{Evaluator, EvaluatorConfig};
//! # use pn_eval::Device;
//! # use pn_graph::builtin::{Affine, FixedSource, NullSink, Relu};
//! # use pn_graph::graph::Graph;
//! // build a tiny graph: x -> affine -> relu -> y
//! let mut graph = Graph::new();
//! let x = graph.buffer("x", 2);
//! let h = graph.buffer("h", 1);
//! let y = graph.buffer("y", 1);
//! graph.source(FixedSource::new(2, vec![vec![1.0, 1.0]]), x, 0);
//! graph.compute(Affine::new(2, 1, vec![2.0, -4.0], vec![1.0]), x, 0, h, 0);
//! graph.compute(Relu::new(1), h, 0, y, 0);
//! graph.sink(NullSink::new(1), y, 0);
//!
//! // build an evaluator with the default three slots
//! let device = Device::new(0).unwrap();
//! let mut evaluator = Evaluator::new(device, graph, EvaluatorConfig::default()).unwrap();
//!
//! // run a pass and wait for it
//! let snapshot = evaluator.run_pass_blocking();
//! assert_eq!(snapshot.sink_inputs(), vec![vec![0.0]]);
//! assert_eq!(snapshot.buffer_by_name("h"), Some(vec![-1.0]));
//! ```

/// Export the [Device] type for convenience: often an explicit dependency on the `pn_device` crate is not needed.
pub use pn_device::handle::Device;

/// The main evaluator type and its configuration.
pub mod evaluator;
/// Execution slots.
pub mod instance;
/// The static per-graph schedule.
pub mod planner;
/// Completed pass results.
pub mod snapshot;
/// Counters and memory usage.
pub mod stats;
/// Testing and debugging infrastructure.
pub mod tester;

mod worker;
