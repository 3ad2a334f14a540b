use std::collections::BTreeMap;

use itertools::{enumerate, zip_eq};
use rand::Rng;
use rand_distr::{Distribution, Normal};

use pn_device::handle::Device;
use pn_graph::builtin::{Affine, ChannelSink, FnSource, Relu};
use pn_graph::graph::Graph;

use crate::evaluator::{Evaluator, EvaluatorConfig, SetupError};

const TOLERANCE_ABS_DIFF: f64 = 0.001;
const TOLERANCE_REL_DIFF: f64 = 0.001;
const MAX_LOGGED_ERRORS: usize = 8;

/// Run `passes` pipelined passes and collect the sink values of each, ordered by pass index.
pub fn eval_pipelined(
    device: Device,
    graph: Graph,
    config: EvaluatorConfig,
    passes: usize,
) -> Result<Vec<Vec<Vec<f32>>>, SetupError> {
    let (sender, receiver) = flume::unbounded();

    let mut evaluator = Evaluator::new(device, graph, config)?;
    for _ in 0..passes {
        let sender = sender.clone();
        evaluator.run_pass(move |snapshot| {
            let _ = sender.send((snapshot.pass(), snapshot.sink_inputs()));
        });
    }
    drop(evaluator);
    drop(sender);

    let results: BTreeMap<u64, Vec<Vec<f32>>> = receiver.iter().collect();
    assert_eq!(results.len(), passes, "Not every pass delivered a result");
    Ok(results.into_values().collect())
}

/// The deterministic input [mlp_graph] feeds into pass `pass`.
pub fn pass_input(pass: usize, len: usize, batch_size: usize) -> Vec<f32> {
    (0..len * batch_size)
        .map(|i| ((pass * 31 + i * 7) % 17) as f32 / 8.0 - 1.0)
        .collect()
}

/// Build a multi-layer perceptron with random weights and relu activations between the affine layers.
///
/// The single source produces [pass_input] for each pass, the returned receiver gets the output of every pass.
pub fn mlp_graph(sizes: &[usize], rng: &mut impl Rng) -> (Graph, flume::Receiver<Vec<f32>>) {
    assert!(sizes.len() >= 2, "Need at least an input and output size");

    let mut graph = Graph::new();
    let input_len = sizes[0];
    let mut prev = graph.buffer("input", input_len);
    graph.source(
        FnSource::new(input_len, move |pass, batch_size| pass_input(pass, input_len, batch_size)),
        prev,
        0,
    );

    let layer_count = sizes.len() - 1;
    for (i, window) in enumerate(sizes.windows(2)) {
        let (n_in, n_out) = (window[0], window[1]);

        let normal = Normal::new(0.0, 1.0 / (n_in as f32).sqrt()).unwrap();
        let weight = (0..n_in * n_out).map(|_| normal.sample(rng)).collect();
        let bias = (0..n_out).map(|_| rng.gen_range(-0.1..0.1)).collect();

        let linear = graph.buffer(format!("linear_{}", i), n_out);
        let node = graph.compute(Affine::new(n_in, n_out, weight, bias), prev, 0, linear, 0);
        graph.set_debug_id(node, format!("affine_{}", i));
        prev = linear;

        if i + 1 != layer_count {
            let act = graph.buffer(format!("act_{}", i), n_out);
            let node = graph.compute(Relu::new(n_out), prev, 0, act, 0);
            graph.set_debug_id(node, format!("relu_{}", i));
            prev = act;
        }
    }

    let (sink, receiver) = ChannelSink::new(sizes[sizes.len() - 1]);
    graph.sink(sink, prev, 0);

    (graph, receiver)
}

pub fn assert_outputs_match(expected: &[Vec<f32>], actual: &[Vec<f32>], print_match: bool) {
    match check_outputs_match(expected, actual) {
        Ok(Match { diff_per_output }) => {
            if print_match {
                for (i, diff) in enumerate(diff_per_output) {
                    println!(
                        "Output {} with length {} matched, max diff: abs {}, rel {}",
                        i,
                        actual[i].len(),
                        diff.max_abs_diff,
                        diff.max_rel_diff
                    );
                }
            }
        }
        Err(Mismatch {
            error_count,
            total_count,
            first_errors,
        }) => {
            eprintln!("Mismatch in {}/{} values:", error_count, total_count);

            for error in &first_errors {
                let Error {
                    output,
                    index,
                    expected_value,
                    actual_value,
                    more_omitted,
                } = *error;

                eprintln!(
                    "  Wrong output value {:?}, expected {:?} at index {} in output {} (length {})",
                    actual_value,
                    expected_value,
                    index,
                    output,
                    expected[output].len()
                );

                if more_omitted {
                    eprintln!("  ...");
                }
            }

            panic!("Output mismatch");
        }
    }
}

#[derive(Debug, Clone)]
pub struct Match {
    pub diff_per_output: Vec<Difference>,
}

#[derive(Debug, Copy, Clone)]
pub struct Difference {
    pub max_rel_diff: f64,
    pub max_abs_diff: f64,
}

#[derive(Debug, Clone)]
pub struct Mismatch {
    pub error_count: u64,
    pub total_count: u64,
    pub first_errors: Vec<Error>,
}

#[derive(Debug, Copy, Clone)]
pub struct Error {
    pub output: usize,
    pub index: usize,
    pub expected_value: f32,
    pub actual_value: f32,
    pub more_omitted: bool,
}

pub fn check_outputs_match(expected: &[Vec<f32>], actual: &[Vec<f32>]) -> Result<Match, Mismatch> {
    assert_eq!(expected.len(), actual.len(), "Wrong number of outputs");

    let mut total_count = 0;
    let mut error_count = 0;
    let mut diff_per_output = vec![];
    let mut first_errors: Vec<Error> = vec![];

    for (i, (expected_output, output)) in zip_eq(expected, actual).enumerate() {
        assert_eq!(expected_output.len(), output.len(), "Wrong length for output {}", i);

        let mut max_abs_diff = 0.0;
        let mut max_rel_diff = 0.0;
        let mut current_error_count = 0;

        for (index, (&expected_value, &value)) in zip_eq(expected_output, output).enumerate() {
            let (e, v) = (expected_value as f64, value as f64);
            let (abs_diff, rel_diff) = if e == v || e.is_nan() || v.is_nan() {
                (0.0, 0.0)
            } else {
                let abs_diff = (e - v).abs();
                (abs_diff, abs_diff / e.abs())
            };

            max_abs_diff = f64::max(max_abs_diff, abs_diff);
            max_rel_diff = f64::max(max_rel_diff, rel_diff);
            total_count += 1;

            let exceeds_tolerance = abs_diff >= TOLERANCE_ABS_DIFF && rel_diff >= TOLERANCE_REL_DIFF;
            let nan_mismatch = e.is_nan() != v.is_nan();

            if exceeds_tolerance || nan_mismatch {
                error_count += 1;
                current_error_count += 1;

                if current_error_count < MAX_LOGGED_ERRORS {
                    first_errors.push(Error {
                        output: i,
                        index,
                        expected_value,
                        actual_value: value,
                        more_omitted: false,
                    });
                } else if let Some(last) = first_errors.last_mut() {
                    last.more_omitted = true;
                }
            }
        }

        diff_per_output.push(Difference {
            max_rel_diff,
            max_abs_diff,
        });
    }

    if error_count == 0 {
        Ok(Match { diff_per_output })
    } else {
        Err(Mismatch {
            error_count,
            total_count,
            first_errors,
        })
    }
}
