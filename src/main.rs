//! Load test CLI for OpenAI-compatible inference endpoints.

use clap::{Parser, Subcommand};
use loadgen::{ResultsReport, RunConfig};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "loadgen")]
#[command(about = "Load generator for OpenAI-compatible inference APIs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a load test from a scenario file
    Run {
        /// Path to scenario YAML file
        #[arg(short, long)]
        scenario: PathBuf,

        /// Override concurrency level
        #[arg(short, long)]
        concurrency: Option<u32>,

        /// Override total request count
        #[arg(short, long)]
        requests: Option<u64>,

        /// Output format: table (default), json, csv
        #[arg(short, long, default_value = "table")]
        output: String,
    },

    /// Run a quick test configured from flags and environment variables
    Quick {
        /// Model name (falls back to MODEL_NAME)
        #[arg(short, long)]
        model: Option<String>,

        /// Total requests to send
        #[arg(short, long, default_value = "50")]
        requests: u64,

        /// Concurrent requests
        #[arg(short, long, default_value = "1")]
        concurrency: u32,

        /// Endpoint URL override (falls back to VLLM_URL / VLLM_HOST)
        #[arg(short, long)]
        url: Option<String>,

        /// Response token budget per request
        #[arg(long)]
        max_tokens: Option<u32>,

        /// Output format: table (default), json, csv
        #[arg(short, long, default_value = "table")]
        output: String,
    },

    /// List available scenarios
    List {
        /// Scenarios directory
        #[arg(short, long, default_value = "scenarios")]
        dir: PathBuf,
    },
}

async fn run_and_report(config: RunConfig, output: &str) -> anyhow::Result<()> {
    println!("Starting load test: {}", config.name);
    println!("  Endpoint: {}", config.endpoint_url());
    println!("  Model: {}", config.model_name);
    println!("  Requests: {}", config.total_requests);
    println!("  Concurrency: {}", config.concurrency);
    println!("  Warmup: {} requests", config.warmup_requests);
    println!();

    let mut runner = loadgen::LoadRunner::new(config)?;
    let summary = runner.run().await?;

    match output {
        "json" => println!("{}", ResultsReport::format_json(&summary.stats)?),
        "csv" => {
            println!("{}", ResultsReport::csv_header());
            println!("{}", ResultsReport::format_csv(&summary.stats));
        }
        _ => println!("{}", ResultsReport::format_table(&summary.stats)),
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            scenario,
            concurrency,
            requests,
            output,
        } => {
            println!("Loading scenario: {}", scenario.display());

            let mut config = RunConfig::from_file(&scenario)?;
            if let Some(c) = concurrency {
                config.concurrency = c;
            }
            if let Some(r) = requests {
                config.total_requests = r;
            }
            config.validate()?;

            run_and_report(config, &output).await
        }
        Commands::Quick {
            model,
            requests,
            concurrency,
            url,
            max_tokens,
            output,
        } => {
            let mut config = RunConfig::from_env();
            config.name = "quick".to_string();
            config.description = "Quick smoke test".to_string();
            config.total_requests = requests;
            config.concurrency = concurrency;
            if let Some(m) = model {
                config.model_name = m;
            }
            if let Some(u) = url {
                config.url = Some(u);
            }
            if let Some(t) = max_tokens {
                config.max_tokens = t;
            }
            config.validate()?;

            run_and_report(config, &output).await
        }
        Commands::List { dir } => {
            println!("Available scenarios in {}:", dir.display());
            println!();

            match std::fs::read_dir(&dir) {
                Ok(entries) => {
                    let mut scenarios = Vec::new();
                    for entry in entries.flatten() {
                        let path = entry.path();
                        if path.extension().and_then(|s| s.to_str()) == Some("yaml") {
                            if let Ok(config) = RunConfig::from_file(&path) {
                                scenarios.push((
                                    path.file_name()
                                        .map(|n| n.to_string_lossy().to_string())
                                        .unwrap_or_default(),
                                    config.name,
                                    config.description,
                                ));
                            }
                        }
                    }
                    scenarios.sort_by(|a, b| a.0.cmp(&b.0));

                    if scenarios.is_empty() {
                        println!("No scenario files found");
                    } else {
                        for (filename, name, description) in scenarios {
                            println!("  {} - {}", filename, name);
                            if !description.is_empty() {
                                println!("    {}", description);
                            }
                            println!();
                        }
                    }
                }
                Err(e) => {
                    eprintln!("Error reading directory: {}", e);
                    eprintln!("Make sure the directory exists and is readable");
                }
            }
            Ok(())
        }
    }
}
