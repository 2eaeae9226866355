//! llmsim Prompt - build the prompt table from a stimuli table
//!
//! Keeps the experiment items, rewrites sentence markup and adds one prompt
//! column per question slot.

use clap::Parser;
use llmsim::{build_prompts, read_instruction, PromptConfig, Table};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "llmsim_prompt")]
#[command(about = "Build prompts from a stimuli table")]
struct Args {
    /// Stimuli table (CSV)
    #[arg(short, long, default_value = "../data/Material-Konstanz_aufb.csv")]
    input: PathBuf,

    /// Instruction text prepended to every prompt
    #[arg(short = 'I', long, default_value = "instruction.txt")]
    instruction: PathBuf,

    /// Where to write the prompt table
    #[arg(short, long, default_value = "../prompts/prompt.csv")]
    output: PathBuf,

    /// Condition codes to keep
    #[arg(short, long, value_delimiter = ',', default_value = "k,p,n")]
    conditions: Vec<String>,
}

fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    if let Err(e) = run(&args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> llmsim::Result<()> {
    let instruction = read_instruction(&args.instruction)?;
    let stimuli = Table::read_csv(&args.input)?;
    let config = PromptConfig::default().with_conditions(args.conditions.iter().cloned());

    let prompts = build_prompts(&stimuli, &instruction, &config)?;
    prompts.write_csv(&args.output)?;

    tracing::info!("Wrote {} prompts to {}", prompts.len(), args.output.display());
    Ok(())
}
