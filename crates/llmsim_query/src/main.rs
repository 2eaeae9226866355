//! llmsim Query - run hosted chat completions on pre-built prompts
//!
//! Every row is asked both of its questions; the answers and the run
//! parameters are written to one output table per run.

use clap::Parser;
use llmsim::{output_file_name, read_instruction, QueryConfig, QueryRunner, Suffix, Table};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, clap::ValueEnum)]
enum CliSuffix {
    #[value(name = "no-story")]
    NoStory,
}

#[derive(Parser, Debug)]
#[command(name = "llmsim_query")]
#[command(about = "Run hosted chat completions on pre-constructed prompts")]
struct Args {
    /// Example count recorded in the output file name
    #[arg(long, default_value = "0")]
    num_examples: u32,

    /// Random seed
    #[arg(short = 'S', long, default_value = "0")]
    seed: i64,

    /// Model to query
    #[arg(short = 'M', long, default_value = "gpt-3.5-turbo")]
    model: String,

    /// Tag appended to the output file name
    #[arg(long, value_enum)]
    suffix: Option<CliSuffix>,

    /// Temperature for sampling (0 is close to argmax)
    #[arg(short = 'T', long, default_value = "0")]
    temperature: f32,

    /// Prompt table produced by llmsim_prompt
    #[arg(short, long, default_value = "../prompts/prompt.csv")]
    prompts: PathBuf,

    /// Instruction text sent as system message
    #[arg(short = 'I', long, default_value = "instruction.txt")]
    instruction: PathBuf,

    /// File holding the API key
    #[arg(short = 'k', long, default_value = "key.txt")]
    key_file: PathBuf,

    /// Directory for the output table
    #[arg(short, long, default_value = "../model_data")]
    output_dir: PathBuf,

    /// Backend API URL (for OpenAI-compatible endpoints)
    #[arg(short = 'u', long)]
    base_url: Option<String>,
}

fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let suffix = args.suffix.as_ref().map(|s| match s {
        CliSuffix::NoStory => Suffix::NoStory,
    });

    let mut config = QueryConfig::new(&args.model)
        .with_temperature(args.temperature)
        .with_seed(args.seed)
        .with_suffix(suffix)
        .with_num_examples(args.num_examples);
    if let Some(url) = &args.base_url {
        config = config.with_base_url(url);
    }

    if let Err(e) = run(&args, config) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args, config: QueryConfig) -> llmsim::Result<()> {
    let runner = QueryRunner::from_key_file(config, &args.key_file)?;
    let instruction = read_instruction(&args.instruction)?;
    let prompts = Table::read_csv(&args.prompts)?;

    tracing::info!("Model: {}", runner.config().model);
    tracing::info!("Temperature: {}", runner.config().temperature);
    tracing::info!("Seed: {}", runner.config().seed);
    tracing::info!("Rows: {}", prompts.len());

    let results = runner.run(&prompts, &instruction)?;

    let output = args.output_dir.join(output_file_name(runner.config()));
    results.write_csv(&output)?;
    tracing::info!("Wrote {} rows to {}", results.len(), output.display());
    Ok(())
}
