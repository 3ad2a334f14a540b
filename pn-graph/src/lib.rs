#![warn(missing_debug_implementations)]
#![allow(clippy::new_without_default)]

//! A static dataflow graph of layers placed on named buffers.
//!
//! The core type of this crate is [Graph](graph::Graph). Nodes are placements of a [Layer](layer::Layer):
//! sources write a new batch into a buffer region, compute layers transform one region into another and
//! sinks consume a region once a pass finishes. Edges are implicit, a node depends on every node whose
//! output region overlaps its input region.
//!
//! ```
//! # use pn_graph::graph::Graph;
//! # use pn_graph::builtin::{Affine, ChannelSink, FixedSource, Relu};
//! # use pn_graph::cpu::cpu_eval_graph;
//! let mut graph = Graph::new();
//! let x = graph.buffer("x", 2);
//! let h = graph.buffer("h", 1);
//! let y = graph.buffer("y", 1);
//!
//! graph.source(FixedSource::new(2, vec![vec![1.0, 1.0]]), x, 0);
//! graph.compute(Affine::new(2, 1, vec![2.0, -4.0], vec![1.0]), x, 0, h, 0);
//! graph.compute(Relu::new(1), h, 0, y, 0);
//! let (sink, _receiver) = ChannelSink::new(1);
//! graph.sink(sink, y, 0);
//!
//! graph.validate().unwrap();
//! let outputs = cpu_eval_graph(&graph, 1, &[vec![1.0, 1.0]]);
//! assert_eq!(outputs, vec![vec![0.0]]);
//! ```

/// The [ndarray] crate is used for CPU execution, and re-exported for convenience.
pub use ndarray;

/// The core graph datastructure.
pub mod graph;
/// The layer capability traits.
pub mod layer;
/// Built-in layers.
pub mod builtin;

/// CPU reference execution.
pub mod cpu;
