//! HMM inference CLI
//!
//! Demonstrates the engine on synthetic data: sample sequences from a
//! reference model, train with EM or minibatch gradient descent, and decode
//! state paths.

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use hmm_inference::{
    fit_em, fit_gradient, viterbi_decode, Adam, GradientConfig, Hmm, ObservationBatch, Optimizer,
    Sgd,
};
use ndarray::{arr2, array};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hmm_inference")]
#[command(about = "Discrete HMM inference and learning on synthetic data")]
struct Cli {
    /// RNG seed for sampling, initialization, and shuffling
    #[arg(long, default_value = "0", global = true)]
    seed: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sample observation sequences from the reference model
    Sample {
        /// Number of sequences
        #[arg(short = 'n', long, default_value = "5")]
        count: usize,

        /// Length of each sequence
        #[arg(short, long, default_value = "20")]
        length: usize,
    },

    /// Train a model with Baum-Welch EM on sampled data
    TrainEm {
        /// Number of training sequences
        #[arg(short = 'n', long, default_value = "50")]
        count: usize,

        /// Length of each sequence
        #[arg(short, long, default_value = "80")]
        length: usize,

        /// Number of EM epochs
        #[arg(long, default_value = "50")]
        epochs: usize,
    },

    /// Train a model by minibatch gradient descent on sampled data
    TrainSgd {
        /// Number of training sequences
        #[arg(short = 'n', long, default_value = "50")]
        count: usize,

        /// Length of each sequence
        #[arg(short, long, default_value = "80")]
        length: usize,

        /// Number of epochs
        #[arg(long, default_value = "30")]
        epochs: usize,

        /// Sequences per minibatch
        #[arg(long, default_value = "10")]
        batch_size: usize,

        /// Use Adam instead of plain SGD
        #[arg(long)]
        adam: bool,

        /// Learning rate
        #[arg(long, default_value = "0.2")]
        learning_rate: f64,
    },

    /// Sample one sequence and decode it with Viterbi
    Decode {
        /// Length of the sequence
        #[arg(short, long, default_value = "30")]
        length: usize,
    },
}

/// Reference 2-state model used by every subcommand.
fn reference_model() -> Hmm {
    Hmm::new(
        arr2(&[[0.8, 0.2], [0.2, 0.8]]),
        arr2(&[[0.95, 0.05], [0.1, 0.9]]),
        array![0.7, 0.3],
    )
    .expect("reference model is valid")
}

fn sample_batch(model: &Hmm, count: usize, length: usize, seed: u64) -> Result<ObservationBatch> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let sequences: Vec<Vec<usize>> = (0..count).map(|_| model.sample(length, &mut rng).1).collect();
    Ok(ObservationBatch::from_sequences(&sequences)?)
}

fn print_matrix(name: &str, m: &ndarray::Array2<f64>) {
    println!("{}", name.bold());
    for row in m.rows() {
        print!("  ");
        for v in row {
            print!("{:.3}  ", v);
        }
        println!();
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("hmm_inference=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let truth = reference_model();

    match cli.command {
        Commands::Sample { count, length } => {
            let mut rng = ChaCha8Rng::seed_from_u64(cli.seed);
            println!("{}", "Sampling from the reference model...".cyan());
            for i in 0..count {
                let (states, obs) = truth.sample(length, &mut rng);
                println!("seq {i}:");
                println!("  states: {:?}", states);
                println!("  obs:    {:?}", obs);
            }
        }

        Commands::TrainEm {
            count,
            length,
            epochs,
        } => {
            println!(
                "{}",
                format!("Sampling {count} sequences of length {length}...").cyan()
            );
            let batch = sample_batch(&truth, count, length, cli.seed)?;

            println!("{}", format!("Running EM for {epochs} epochs...").cyan());
            let (model, trace) = fit_em(&batch, None, Some((2, 2)), None, epochs, cli.seed)?;

            println!(
                "{}",
                format!(
                    "NLL: {:.4} -> {:.4}",
                    trace.first().copied().unwrap_or(f64::NAN),
                    trace.last().copied().unwrap_or(f64::NAN)
                )
                .green()
            );
            print_matrix("Learned transition matrix:", &model.trans_mat);
            print_matrix("True transition matrix:", &truth.trans_mat);
            print_matrix("Learned emission matrix:", &model.obs_mat);
            print_matrix("True emission matrix:", &truth.obs_mat);
        }

        Commands::TrainSgd {
            count,
            length,
            epochs,
            batch_size,
            adam,
            learning_rate,
        } => {
            println!(
                "{}",
                format!("Sampling {count} sequences of length {length}...").cyan()
            );
            let batch = sample_batch(&truth, count, length, cli.seed)?;

            let config = GradientConfig {
                batch_size,
                num_epochs: epochs,
                seed: cli.seed,
            };
            let mut sgd;
            let mut adam_opt;
            let optimizer: &mut dyn Optimizer = if adam {
                adam_opt = Adam::new(learning_rate);
                &mut adam_opt
            } else {
                sgd = Sgd::new(learning_rate);
                &mut sgd
            };

            println!(
                "{}",
                format!(
                    "Training with {} for {epochs} epochs (batch size {batch_size})...",
                    if adam { "Adam" } else { "SGD" }
                )
                .cyan()
            );
            let (model, losses) = fit_gradient(&batch, (2, 2), &config, optimizer)?;

            println!(
                "{}",
                format!(
                    "Minibatch loss: {:.4} -> {:.4}",
                    losses.first().copied().unwrap_or(f64::NAN),
                    losses.last().copied().unwrap_or(f64::NAN)
                )
                .green()
            );
            print_matrix("Learned transition matrix:", &model.trans_mat);
            print_matrix("Learned emission matrix:", &model.obs_mat);
        }

        Commands::Decode { length } => {
            let mut rng = ChaCha8Rng::seed_from_u64(cli.seed);
            let (states, obs) = truth.sample(length, &mut rng);
            let obs_arr = ndarray::Array1::from(obs.clone());
            let path = viterbi_decode(&truth, obs_arr.view(), length)?;

            let matches = states
                .iter()
                .zip(path.iter())
                .filter(|(a, b)| a == b)
                .count();
            println!("obs:     {:?}", obs);
            println!("true:    {:?}", states);
            println!("decoded: {:?}", path);
            println!(
                "{}",
                format!(
                    "Decoded {matches}/{length} states correctly ({:.0}%)",
                    100.0 * matches as f64 / length as f64
                )
                .green()
            );
        }
    }

    Ok(())
}
