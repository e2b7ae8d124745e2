//! kb-responder - CLI Interface
//!
//! Command-line interface for querying and training the responder.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use kb_responder::completion::{self, ChatCompletion, ChatMessage};
use kb_responder::*;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "kb-responder")]
#[command(about = "Knowledge-base conversational responder", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Knowledge table (TOML) to use instead of the built-in one
    #[arg(short, long, value_name = "FILE")]
    knowledge: Option<PathBuf>,

    /// Never fall back to external search
    #[arg(long)]
    no_search: bool,

    /// Disable the response cache
    #[arg(long)]
    no_cache: bool,

    /// Override the knowledge-base match threshold
    #[arg(long)]
    threshold: Option<f64>,

    /// Seed for weights, shuffling and reply selection
    #[arg(long)]
    seed: Option<u64>,

    /// Train for this many epochs before answering (0 skips training)
    #[arg(long, default_value = "0")]
    train_epochs: usize,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a single input
    Predict {
        /// Input text (joined with spaces)
        #[arg(required = true)]
        text: Vec<String>,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Answer every non-empty line of a file, in order
    Batch {
        #[arg(value_name = "FILE")]
        input: PathBuf,
    },

    /// Answer a chat transcript (JSON array of {role, content})
    Chat {
        #[arg(value_name = "FILE")]
        transcript: PathBuf,

        /// Emit chat.completion.chunk values, one per line
        #[arg(long)]
        stream: bool,

        /// Model name reported in the envelope
        #[arg(long, default_value = completion::DEFAULT_MODEL)]
        model: String,
    },

    /// Train the scoring model and print the report
    Train {
        #[arg(short, long)]
        epochs: Option<usize>,

        #[arg(long)]
        lr: Option<f64>,
    },

    /// Interactive session
    Repl,

    /// Show configuration and model info
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::from_default_env().filter_level(level).init();

    let predictor = build_predictor(&cli)?;

    match cli.command {
        Commands::Predict { text, json } => {
            let input = text.join(" ");
            let result = predictor.predict(&input).await;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_result(&result);
            }
        }
        Commands::Batch { input } => {
            let content = std::fs::read_to_string(&input)
                .with_context(|| format!("Failed to read {}", input.display()))?;
            let lines: Vec<&str> = content.lines().map(str::trim).filter(|l| !l.is_empty()).collect();

            let batch = predictor.batch_predict(&lines).await;
            for (input, result) in &batch.results {
                println!("> {}", input);
                print_result(result);
                println!();
            }
            println!("{} inputs in {:?}", batch.len(), batch.total_time);
        }
        Commands::Chat { transcript, stream, model } => {
            let content = std::fs::read_to_string(&transcript)
                .with_context(|| format!("Failed to read {}", transcript.display()))?;
            let messages: Vec<ChatMessage> = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", transcript.display()))?;

            let Some(input) = completion::compose_input(&messages) else {
                bail!("transcript has no user message");
            };
            let result = predictor.predict(&input).await;

            if stream {
                for chunk in completion::stream_chunks(&model, &result, 20) {
                    println!("{}", serde_json::to_string(&chunk)?);
                }
            } else {
                let envelope = ChatCompletion::from_prediction(&model, &input, &result);
                println!("{}", serde_json::to_string_pretty(&envelope)?);
            }
        }
        Commands::Train { epochs, lr } => {
            let mut options = predictor.config().training.clone();
            if let Some(epochs) = epochs {
                options.epochs = epochs;
            }
            if let Some(lr) = lr {
                options.learning_rate = lr;
            }

            let report = predictor.train(&options)?;
            println!("Samples: {}", report.samples);
            println!("Epochs: {}", report.epochs);
            if let Some(loss) = report.final_loss() {
                println!("Final loss: {:.6}", loss);
            }
            println!(
                "Weights: w1={:.4} w2={:.4} b={:.4}",
                report.weights.w1, report.weights.w2, report.weights.bias
            );
        }
        Commands::Repl => run_repl(&predictor).await?,
        Commands::Info => {
            println!("{}", predictor.info());
            println!();
            let config = predictor.config();
            println!("Configuration:");
            println!("  Match Threshold: {:.2}", config.match_threshold);
            println!("  Default Score: {:.2}", config.default_score);
            println!("  Search Timeout: {}ms", config.search_timeout_ms);
            println!("  Training: {} epochs, lr {}", config.training.epochs, config.training.learning_rate);
        }
    }

    Ok(())
}

fn build_predictor(cli: &Cli) -> Result<Predictor> {
    let mut config = match &cli.config {
        Some(path) => ResponderConfig::load(path)?,
        None => ResponderConfig::default(),
    };

    // Override with CLI options
    if cli.no_search {
        config.enable_search = false;
    }
    if cli.no_cache {
        config.cache_enabled = false;
    }
    if let Some(threshold) = cli.threshold {
        config.match_threshold = threshold;
    }
    if cli.seed.is_some() {
        config.seed = cli.seed;
    }

    let knowledge = match &cli.knowledge {
        Some(path) => KnowledgeBase::load(path)?,
        None => KnowledgeBase::builtin()?,
    };

    let mut predictor = Predictor::with_knowledge(config, knowledge)?;
    if let Some(provider) = search_provider()? {
        predictor = predictor.with_search(provider);
    }

    if cli.train_epochs > 0 {
        let mut options = predictor.config().training.clone();
        options.epochs = cli.train_epochs;
        predictor.train(&options)?;
    }

    Ok(predictor)
}

#[cfg(feature = "web-search")]
fn search_provider() -> Result<Option<Arc<dyn SearchProvider>>> {
    let provider: Arc<dyn SearchProvider> = Arc::new(search::WebSearch::new()?);
    Ok(Some(provider))
}

#[cfg(not(feature = "web-search"))]
fn search_provider() -> Result<Option<Arc<dyn SearchProvider>>> {
    log::debug!("Built without web-search; search fallback has no provider");
    Ok(None)
}

fn print_result(result: &PredictionResult) {
    println!("{}", result.answer);
    println!(
        "  [{:?}] score {:.3}, source {}, {:?}{}",
        result.path,
        result.score,
        result.source,
        result.response_time,
        if result.cached { ", cached" } else { "" }
    );
}

/// Run interactive REPL
async fn run_repl(predictor: &Predictor) -> Result<()> {
    println!("{}\n", predictor.info());
    println!("Type 'help' for commands, 'exit' to quit.\n");

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        print!("> ");
        io::stdout().flush()?;

        let Some(line) = lines.next() else {
            break;
        };
        let line = line?;
        let input = line.trim();

        if input.is_empty() {
            continue;
        }

        match input {
            "exit" | "quit" => break,
            "help" => {
                println!("  stats              show counters");
                println!("  clear              drop cached answers");
                println!("  train              run one training pass");
                println!("  add <q> => <a>     teach a new answer");
                println!("  exit               leave\n");
                continue;
            }
            "stats" => {
                let stats = predictor.stats();
                println!("  Requests: {}", stats.total_requests);
                println!("  Cache hits: {} ({:.1}%)", stats.cache_hits, stats.cache_hit_rate * 100.0);
                println!("  Search queries: {}", stats.search_queries);
                println!("  Training runs: {}", stats.training_runs);
                println!("  Knowledge: {} entries, vocabulary {}\n", stats.knowledge_size, stats.vocabulary_size);
                continue;
            }
            "clear" => {
                predictor.clear_cache();
                continue;
            }
            "train" => {
                match predictor.train(&predictor.config().training) {
                    Ok(report) => println!("  Trained on {} samples, final loss {:?}\n", report.samples, report.final_loss()),
                    Err(e) => println!("  Training failed: {}\n", e),
                }
                continue;
            }
            _ => {}
        }

        if let Some(rest) = input.strip_prefix("add ") {
            match rest.split_once("=>") {
                Some((prompt, answer)) if !prompt.trim().is_empty() && !answer.trim().is_empty() => {
                    let total = predictor.add_knowledge(prompt.trim(), answer.trim(), knowledge::DEFAULT_RELEVANCE);
                    println!("  ✓ Knowledge base now has {} entries\n", total);
                }
                _ => println!("  Usage: add <prompt> => <answer>\n"),
            }
            continue;
        }

        let result = predictor.predict(input).await;
        print_result(&result);
        println!();
    }

    println!("Goodbye!");
    Ok(())
}
