use std::time::Instant;

use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;

use pn_eval::evaluator::{Evaluator, EvaluatorConfig};
use pn_eval::tester::mlp_graph;
use pn_eval::Device;

#[derive(Debug, clap::Parser)]
struct Args {
    /// Slot counts to compare.
    #[clap(short, long, value_delimiter = ',', default_values_t = vec![1, 2, 3, 4])]
    slots: Vec<usize>,
    #[clap(short, long, default_value_t = 1)]
    batch_size: usize,
    #[clap(short, long, default_value_t = 1000)]
    n: usize,

    /// Layer sizes of the random perceptron, including the input.
    #[clap(long, value_delimiter = ',', default_values_t = vec![64, 256, 256, 256, 10])]
    sizes: Vec<usize>,
    #[clap(long, default_value_t = 0)]
    seed: u64,

    #[clap(short, long, default_value_t = 0)]
    device: i32,
    #[clap(short, long)]
    print: bool,
}

fn main() {
    env_logger::init();

    let Args {
        slots,
        batch_size,
        n,
        sizes,
        seed,
        device,
        print,
    } = Args::parse();
    let n = n.max(1);

    if cfg!(debug_assertions) {
        eprintln!("Warning: debug assertions are enabled, maybe this binary is not optimized either?");
    }

    let device = match Device::new(device) {
        Ok(device) => device,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let mut result = vec![];

    for slot_count in slots {
        println!("Testing slot count {} with {} passes", slot_count, n);

        let (graph, outputs) = mlp_graph(&sizes, &mut StdRng::seed_from_u64(seed));
        if print {
            println!("{}", graph);
        }

        let config = EvaluatorConfig::default()
            .with_slot_count(slot_count)
            .with_batch_size(batch_size);
        let mut evaluator = match Evaluator::new(device, graph, config) {
            Ok(evaluator) => evaluator,
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        };
        if print {
            println!("{:?}", evaluator);
        }

        // warmup
        for _ in 0..(n / 10).max(1) {
            evaluator.run_pass(|_| {});
        }
        evaluator.run_pass_blocking();
        outputs.drain().for_each(drop);

        let start = Instant::now();
        for _ in 0..n - 1 {
            evaluator.run_pass(|_| {});
        }
        evaluator.run_pass_blocking();
        let delta = (Instant::now() - start).as_secs_f32();

        let throughput = (batch_size * n) as f32 / delta;
        println!("  throughput: {} evals/s", throughput);
        println!("{}", evaluator.stats());
        result.push((slot_count, throughput));

        assert_eq!(outputs.drain().count(), n);
    }

    println!("{:?}", result);
}
