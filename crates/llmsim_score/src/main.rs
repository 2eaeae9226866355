//! llmsim Score - pseudo-log-likelihoods of answer options under a local model
//!
//! Prints one JSON line per option with its log-likelihood and its share of
//! the softmax over all options.

use clap::Parser;
use llmsim::{
    load_model, score_options, DevicePlacement, Granularity, LocalModelConfig, ModelSource,
    Precision, Sentinels,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum CliSource {
    /// Encoder-decoder (T5) with sentinel masking
    T5,
    /// Decoder-only model
    Causal,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum CliGranularity {
    Word,
    Token,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum CliPrecision {
    F32,
    F16,
    Bf16,
}

#[derive(Parser, Debug)]
#[command(name = "llmsim_score")]
#[command(about = "Score answer options with a local model")]
struct Args {
    /// HuggingFace model id
    #[arg(short, long, default_value = "google/flan-t5-large")]
    model: String,

    /// Model kind
    #[arg(short, long, value_enum, default_value = "t5")]
    source: CliSource,

    /// Prompt the options complete
    #[arg(short, long)]
    prompt: String,

    /// Answer option (repeat for each option)
    #[arg(short, long = "option", required = true)]
    options: Vec<String>,

    /// Mask word by word or token by token
    #[arg(short, long, value_enum, default_value = "word")]
    granularity: CliGranularity,

    /// Weight precision (defaults to f32 for T5, f16 for causal models)
    #[arg(long, value_enum)]
    precision: Option<CliPrecision>,

    /// Force CPU even if CUDA is available
    #[arg(long)]
    cpu: bool,
}

fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let source = match args.source {
        CliSource::T5 => ModelSource::EncoderDecoder,
        CliSource::Causal => ModelSource::Causal,
    };
    let granularity = match args.granularity {
        CliGranularity::Word => Granularity::Word,
        CliGranularity::Token => Granularity::Token,
    };

    let mut config = LocalModelConfig::new(&args.model, source);
    if args.cpu {
        config = config.with_device(DevicePlacement::Cpu);
    }
    if let Some(precision) = args.precision {
        config = config.with_precision(match precision {
            CliPrecision::F32 => Precision::F32,
            CliPrecision::F16 => Precision::F16,
            CliPrecision::Bf16 => Precision::Bf16,
        });
    }

    if let Err(e) = run(&args, &config, granularity) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args, config: &LocalModelConfig, granularity: Granularity) -> llmsim::Result<()> {
    let Some((tokenizer, mut model)) = load_model(config)? else {
        return Err(llmsim::LlmsimError::HostedModel(config.model_id.clone()));
    };

    tracing::info!("Model: {} ({:?})", config.model_id, model.source());
    tracing::info!("Device: {:?}", model.device());
    tracing::info!("Granularity: {:?}", granularity);
    tracing::info!("Options: {}", args.options.len());

    let scores = score_options(
        &mut model,
        &tokenizer,
        &args.prompt,
        &args.options,
        granularity,
        &Sentinels::default(),
    )?;

    for score in &scores {
        tracing::debug!("{}: {:.4}", score.option, score.log_likelihood);
        println!("{}", serde_json::to_string(score)?);
    }
    Ok(())
}
