//! Converts the trained Keras model into the weights record the server loads
//!
//! Usage:
//!   cargo run --release -p inference-engine --features convert --bin convert-weights -- \
//!     --input elacare_cardamom_model.h5 --output models/elacare_cardamom_model.mpk

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use inference_engine::architecture::{HIDDEN_DENSE, OUTPUT_DENSE};
use inference_engine::keras_h5::read_keras_h5;
use inference_engine::{ArchitectureSpec, InferenceBackend, LeafNet};

/// Convert a Keras .h5 cardamom model to a burn record
#[derive(Parser, Debug)]
#[command(name = "convert-weights")]
#[command(about = "Convert the Keras cardamom model into a weights record")]
struct Args {
    /// Keras model or weights file (.h5)
    #[arg(short, long)]
    input: PathBuf,

    /// Output record; the .mpk extension is enforced
    #[arg(short, long, default_value = "models/elacare_cardamom_model.mpk")]
    output: PathBuf,

    /// Keras name of the 128-unit dense layer, if not `dense`
    #[arg(long, default_value = HIDDEN_DENSE)]
    hidden_dense: String,

    /// Keras name of the softmax layer, if not `dense_1`
    #[arg(long, default_value = OUTPUT_DENSE)]
    output_dense: String,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let spec = ArchitectureSpec::cardamom();
    let device = Default::default();

    println!("=== Keras Weight Converter ===");
    println!("Reading {:?}", args.input);

    let mut weights = read_keras_h5(&args.input).context("reading Keras weights")?;
    println!("  {} tensors, {} parameters", weights.len(), weights.parameter_count());

    weights.rename_layer(&args.hidden_dense, HIDDEN_DENSE)?;
    weights.rename_layer(&args.output_dense, OUTPUT_DENSE)?;

    let net: LeafNet<InferenceBackend> =
        LeafNet::from_keras(weights, &spec, &device).context("weights do not match the architecture")?;

    if let Some(parent) = args.output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let written = net.save(&args.output)?;

    // Reload to prove the record is servable
    LeafNet::<InferenceBackend>::load(&written, &spec, &device).context("reloading the written record")?;

    println!("Wrote {:?} ({} parameters)", written, spec.parameter_count());
    Ok(())
}
