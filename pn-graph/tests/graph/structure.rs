use pn_graph::builtin::{Affine, FixedSource, NullSink, Relu};
use pn_graph::graph::{Graph, GraphError, SliceSide};
use pn_graph::layer::{Layer, LayerKind};

fn source(len: usize) -> FixedSource {
    FixedSource::new(len, vec![vec![0.0; len]])
}

#[test]
fn successors_follow_overlap() {
    let mut graph = Graph::new();
    let x = graph.buffer("x", 4);
    let y = graph.buffer("y", 4);

    let a = graph.source(source(2), x, 0);
    let b = graph.source(source(2), x, 2);
    let left = graph.compute(Relu::new(2), x, 1, y, 0);
    let right = graph.compute(Relu::new(1), x, 3, y, 2);
    let sink = graph.sink(NullSink::new(4), y, 0);

    assert_eq!(graph.successors(a), vec![left]);
    assert_eq!(graph.successors(b), vec![left, right]);
    assert_eq!(graph.successors(left), vec![sink]);
    assert_eq!(graph.predecessors(sink), vec![left, right]);
    assert_eq!(graph.predecessors(a), vec![]);

    assert_eq!(graph.sources(), vec![a, b]);
    assert_eq!(graph.computes(), vec![left, right]);
    assert_eq!(graph.sinks(), vec![sink]);

    graph.validate().unwrap();
    println!("{}", graph);
}

#[test]
fn adjacent_slices_do_not_overlap() {
    let mut graph = Graph::new();
    let x = graph.buffer("x", 4);
    let a = graph.source(source(2), x, 0);
    graph.sink(NullSink::new(2), x, 2);

    assert_eq!(graph.successors(a), vec![]);
    graph.validate().unwrap();
}

#[test]
fn topological_order_respects_edges() {
    let mut graph = Graph::new();
    let x = graph.buffer("x", 1);
    let y = graph.buffer("y", 1);
    let z = graph.buffer("z", 1);

    // inserted in reverse
    let sink = graph.sink(NullSink::new(1), z, 0);
    let second = graph.compute(Relu::new(1), y, 0, z, 0);
    let first = graph.compute(Relu::new(1), x, 0, y, 0);
    let src = graph.source(source(1), x, 0);

    assert_eq!(graph.topological_order().unwrap(), vec![src, first, second, sink]);
}

#[test]
fn cycle() {
    let mut graph = Graph::new();
    let x = graph.buffer("x", 1);
    let y = graph.buffer("y", 1);

    let a = graph.compute(Relu::new(1), x, 0, y, 0);
    let b = graph.compute(Relu::new(1), y, 0, x, 0);

    assert_eq!(graph.validate(), Err(GraphError::Cycle { nodes: vec![a, b] }));
}

#[test]
fn overlapping_producers() {
    let mut graph = Graph::new();
    let x = graph.buffer("x", 4);
    let a = graph.source(source(3), x, 0);
    let b = graph.source(source(2), x, 2);

    assert_eq!(
        graph.validate(),
        Err(GraphError::OverlappingProducers {
            first: a,
            second: b,
            buffer: "x".to_owned()
        })
    );
}

#[test]
fn out_of_bounds() {
    let mut graph = Graph::new();
    let x = graph.buffer("x", 4);
    let y = graph.buffer("y", 10);
    graph.source(source(4), x, 0);
    let affine = graph.compute(Affine::new(4, 10, vec![0.0; 40], vec![0.0; 10]), x, 0, y, 1);

    match graph.validate() {
        Err(GraphError::OutOfBounds {
            node,
            side,
            buffer,
            range,
            buffer_len,
        }) => {
            assert_eq!(node, affine);
            assert_eq!(side, SliceSide::Output);
            assert_eq!(buffer, "y");
            assert_eq!(range, 1..11);
            assert_eq!(buffer_len, 10);
        }
        other => panic!("Expected out of bounds error, got {:?}", other),
    }
}

#[test]
fn mismatched_slices() {
    let mut graph = Graph::new();
    let x = graph.buffer("x", 4);
    let slice = graph.slice(x, 0, 2);
    let node = graph.push(Layer::Sink(Box::new(NullSink::new(2))), Some(slice), Some(slice));
    assert_eq!(
        graph.validate(),
        Err(GraphError::UnexpectedSlice {
            node,
            kind: LayerKind::Sink,
            side: SliceSide::Output
        })
    );

    let mut graph = Graph::new();
    let x = graph.buffer("x", 4);
    let slice = graph.slice(x, 0, 2);
    let node = graph.push(Layer::Compute(Box::new(Relu::new(2))), None, Some(slice));
    assert_eq!(
        graph.validate(),
        Err(GraphError::MissingSlice {
            node,
            kind: LayerKind::Compute,
            side: SliceSide::Input
        })
    );

    let mut graph = Graph::new();
    let x = graph.buffer("x", 4);
    let slice = graph.slice(x, 0, 3);
    let node = graph.push(Layer::Source(Box::new(source(2))), None, Some(slice));
    assert_eq!(
        graph.validate(),
        Err(GraphError::SliceLength {
            node,
            side: SliceSide::Output,
            expected: 2,
            actual: 3
        })
    );
}

#[test]
fn buffer_names() {
    let mut graph = Graph::new();
    let x = graph.buffer("x", 4);
    let y = graph.buffer("y", 2);

    assert_eq!(graph.buffer_by_name("x"), Some(x));
    assert_eq!(graph.buffer_by_name("y"), Some(y));
    assert_eq!(graph.buffer_by_name("z"), None);
    assert_eq!(graph[y].len, 2);
}

#[test]
#[should_panic]
fn duplicate_buffer_name() {
    let mut graph = Graph::new();
    graph.buffer("x", 4);
    graph.buffer("x", 2);
}

#[test]
#[should_panic]
fn foreign_handle() {
    let mut first = Graph::new();
    let mut second = Graph::new();
    let x = first.buffer("x", 4);
    second.buffer("x", 4);

    second.sink(NullSink::new(4), x, 0);
}
