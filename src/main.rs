use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dreamkit::{Config, Dataset, EntryStore, HfPromptTokenizer, PairedDataset, PromptDataset};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser)]
#[command(name = "dreamkit")]
#[command(about = "Concept datasets and sample generation for text-to-image fine-tuning", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate configuration file
    Validate {
        /// Configuration file to validate
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Resolve the configured concepts and show what the dataset contains
    Inspect {
        /// Configuration file
        #[arg(short, long)]
        config: PathBuf,

        /// tokenizer.json of the text encoder
        #[arg(short, long)]
        tokenizer: PathBuf,

        /// Tokenizer maximum sequence length
        #[arg(long, default_value_t = 77)]
        max_length: usize,

        /// Pair instance entries with class entries
        #[arg(long)]
        paired: bool,

        /// Number of entries to print
        #[arg(long, default_value_t = 5)]
        show: usize,
    },

    /// Show how prompt replication work is split across workers
    Prompts {
        /// Prompt to replicate
        #[arg(short, long)]
        prompt: String,

        /// Number of images to generate
        #[arg(short, long)]
        num_samples: usize,

        /// Number of workers
        #[arg(short, long, default_value_t = 1)]
        world_size: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json)?;

    match cli.command {
        Commands::Validate { config } => validate_config(config),
        Commands::Inspect {
            config,
            tokenizer,
            max_length,
            paired,
            show,
        } => inspect(config, tokenizer, max_length, paired, show),
        Commands::Prompts {
            prompt,
            num_samples,
            world_size,
        } => show_shards(prompt, num_samples, world_size),
    }
}

fn init_logging(verbosity: u8, json_output: bool) -> Result<()> {
    let default_level = match verbosity {
        0 => "dreamkit=info,warn",
        1 => "dreamkit=debug,info",
        _ => "trace",
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if json_output {
        let json_layer = fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_filter(env_filter);
        tracing_subscriber::registry()
            .with(json_layer)
            .try_init()
            .context("Failed to install JSON logger")?;
    } else {
        let fmt_layer = fmt::layer().with_target(false).with_filter(env_filter);
        tracing_subscriber::registry()
            .with(fmt_layer)
            .try_init()
            .context("Failed to install logger")?;
    }

    Ok(())
}

fn validate_config(config_path: PathBuf) -> Result<()> {
    info!("Validating configuration file: {}", config_path.display());

    let config = Config::from_file(&config_path).context("Failed to load configuration file")?;

    info!("Configuration is valid");
    info!("  - Image size: {} (center crop: {})", config.dataset.size, config.dataset.center_crop);
    info!("  - Concepts: {}", config.concepts.len());
    match &config.sampling {
        Some(sampling) => info!(
            "  - Sampling every {} steps, {} prompts, batch size {}",
            sampling.interval_steps,
            sampling.concepts.len(),
            sampling.batch_size
        ),
        None => info!("  - Sampling disabled"),
    }
    info!("  - Sample directory: {}", config.sample_save_dir.display());

    Ok(())
}

fn inspect(
    config_path: PathBuf,
    tokenizer_path: PathBuf,
    max_length: usize,
    paired: bool,
    show: usize,
) -> Result<()> {
    let config = Config::from_file(&config_path).context("Failed to load configuration file")?;
    let tokenizer = Arc::new(
        HfPromptTokenizer::from_file(&tokenizer_path, max_length)
            .context("Failed to load tokenizer")?,
    );

    if paired {
        let dataset = PairedDataset::from_config(&config.dataset, &config.concepts, tokenizer)
            .context("Failed to build paired dataset")?;
        println!("instance entries: {}", dataset.len());
        println!("class entries:    {}", dataset.class_len());
        print_entries("instance", dataset.instances(), show);
        print_entries("class", dataset.classes(), show);
    } else {
        let store = EntryStore::from_config(&config.dataset, &config.concepts, tokenizer)
            .context("Failed to build dataset")?;
        println!("entries: {}", store.len());
        print_entries("instance", &store, show);
    }

    Ok(())
}

fn print_entries(label: &str, store: &EntryStore, show: usize) {
    for entry in store.entries().iter().take(show) {
        let head: Vec<_> = entry.token_ids.iter().take(8).collect();
        println!(
            "  [{}] {} ({} tokens) {:?}",
            label,
            entry.path.display(),
            entry.token_ids.len(),
            head
        );
    }
}

fn show_shards(prompt: String, num_samples: usize, world_size: usize) -> Result<()> {
    let dataset = PromptDataset::new(prompt, num_samples);
    println!("{} samples over {} workers", dataset.len(), world_size);
    for rank in 0..world_size {
        let range = dataset.shard(rank, world_size)?;
        println!("  rank {}: {:?} ({} samples)", rank, range, range.len());
    }
    Ok(())
}
