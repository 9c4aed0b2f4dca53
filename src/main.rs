use clap::{Parser, Subcommand};
use pitcheval::{validate_input, Config, PitchErrorAnalysis};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Instrument-family classifier evaluation by pitch
#[derive(Parser)]
#[command(name = "pitcheval")]
#[command(about = "Evaluate an instrument-family classifier and break its error down by pitch")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the classifier on a dataset and write the evaluation outputs
    Evaluate {
        /// Dataset root containing ml-inputs/
        data_dir: PathBuf,

        /// Model directory (default: <DATA_DIR>/model)
        #[arg(short, long)]
        model: Option<PathBuf>,

        /// Output directory (default: <DATA_DIR>/evaluation)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Custom configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Split analysed by pitch (overrides the configuration)
        #[arg(long)]
        split: Option<String>,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,

        /// Quiet output
        #[arg(short, long)]
        quiet: bool,
    },
    /// Validate configuration file
    ValidateConfig {
        /// Configuration file to validate
        config: PathBuf,
    },
    /// Show default configuration
    ShowConfig,
}

fn init_tracing(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Evaluate {
            data_dir,
            model,
            output,
            config,
            split,
            verbose,
            quiet,
        } => {
            if verbose && quiet {
                anyhow::bail!("Cannot specify both --verbose and --quiet");
            }
            init_tracing(if verbose {
                "debug"
            } else if quiet {
                "warn"
            } else {
                "info"
            });

            // Load configuration
            let mut config = if let Some(config_path) = config {
                pitcheval::config::load_config(config_path)?
            } else {
                Config::default()
            };
            if let Some(split) = split {
                config.aggregation.split = split;
            }

            // Validate input
            validate_input(&data_dir, &config)?;

            let processor = PitchErrorAnalysis::new(config);
            let outcome = processor.process(&data_dir, model.as_deref(), output.as_deref())?;

            if !quiet {
                println!("Predictions: {}", outcome.files.predictions.display());
                println!("Pitch bins:  {}", outcome.files.bins.display());
                println!("Summary:     {}", outcome.files.summary.display());
                for chart in &outcome.files.charts {
                    println!("Chart:       {}", chart.display());
                }
            }
        }
        Commands::ValidateConfig { config } => {
            let config = pitcheval::config::load_config(config)?;
            println!("Configuration is valid");
            if let Ok(json) = serde_json::to_string_pretty(&config) {
                println!("{}", json);
            }
        }
        Commands::ShowConfig => {
            let config = Config::default();
            let json = serde_json::to_string_pretty(&config)?;
            println!("{}", json);
        }
    }

    Ok(())
}
