#![forbid(unsafe_code)]

use std::io::{self, Read};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use vlm_eval_harness::extract::extract_json_with_strategy;
use vlm_eval_harness::gateway::{create_client, list_providers, ChatClient, ChatInput, ClientOptions};
use vlm_eval_harness::{CoDetectorTask, EvalOptions, EvalTask, Evaluator, GazeDirectionTask};

#[derive(Parser)]
#[command(name = "vlm-eval", version, about = "Vision-language model evaluation harness")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a model on a labeled image dataset
    Eval {
        #[arg(long, value_enum)]
        task: TaskKind,
        /// Directory holding metadata.jsonl and the images it references
        #[arg(long)]
        dataset: PathBuf,
        #[command(flatten)]
        client: ClientArgs,
        /// Where the debug log goes
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
        /// Seed for the balanced-accuracy draw
        #[arg(long)]
        seed: Option<u64>,
        /// Evaluate at most this many samples
        #[arg(long)]
        limit: Option<usize>,
        /// Write the report as JSON to this path
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// List registered providers
    Providers,
    /// Extract the first JSON object from a model response
    Extract {
        /// File to read, or `-` for stdin
        #[arg(long, default_value = "-")]
        input: String,
    },
    /// Send a single chat request
    Chat {
        #[command(flatten)]
        client: ClientArgs,
        #[arg(long)]
        text: String,
        #[arg(long)]
        image: Option<PathBuf>,
        /// Use the blocking client instead of the async one
        #[arg(long)]
        blocking: bool,
    },
}

#[derive(Args)]
struct ClientArgs {
    #[arg(long, env = "VLM_EVAL_PROVIDER", default_value = "lmstudio")]
    provider: String,
    /// Empty selects the provider's default model
    #[arg(long, env = "VLM_EVAL_MODEL", default_value = "")]
    model: String,
    #[arg(long)]
    base_url: Option<String>,
    #[arg(long)]
    timeout_secs: Option<u64>,
}

impl ClientArgs {
    fn build(&self) -> Result<Box<dyn ChatClient>, Box<dyn std::error::Error>> {
        let mut opts = ClientOptions::new();
        if let Some(url) = &self.base_url {
            opts = opts.base_url(url.clone());
        }
        if let Some(secs) = self.timeout_secs {
            opts = opts.timeout(Duration::from_secs(secs));
        }
        Ok(create_client(&self.provider, &self.model, &opts)?)
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum TaskKind {
    CoDetector,
    GazeDirection,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Eval {
            task,
            dataset,
            client,
            out_dir,
            seed,
            limit,
            report,
        } => {
            let client = client.build()?;
            let opts = EvalOptions {
                out_dir,
                seed,
                limit,
                report_path: report,
                print_progress: true,
            };
            match task {
                TaskKind::CoDetector => run_eval(client.as_ref(), CoDetectorTask, &dataset, opts).await?,
                TaskKind::GazeDirection => {
                    run_eval(client.as_ref(), GazeDirectionTask, &dataset, opts).await?
                }
            }
        }
        Commands::Providers => {
            for name in list_providers() {
                println!("{name}");
            }
        }
        Commands::Extract { input } => {
            let text = if input == "-" {
                let mut buf = String::new();
                io::stdin().read_to_string(&mut buf)?;
                buf
            } else {
                std::fs::read_to_string(&input)?
            };
            let Some((strategy, obj)) = extract_json_with_strategy(&text) else {
                return Err("no JSON object found".into());
            };
            println!("strategy: {strategy}");
            println!("{}", serde_json::to_string_pretty(&obj)?);
        }
        Commands::Chat {
            client,
            text,
            image,
            blocking,
        } => {
            let client = client.build()?;
            let input = match image {
                Some(path) => ChatInput::with_image(text, path),
                None => ChatInput::text(text),
            };
            println!("provider: {} ({})", client.provider(), client.model_name());
            let reply = if blocking {
                tokio::task::spawn_blocking(move || client.chat(&input)).await??
            } else {
                client.async_chat(&input).await?
            };
            println!("{reply}");
        }
    }

    Ok(())
}

async fn run_eval<T: EvalTask>(
    client: &dyn ChatClient,
    task: T,
    dataset: &std::path::Path,
    opts: EvalOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let outcome = Evaluator::new(client, task, opts).run(dataset).await?;
    eprintln!(
        "[eval] {} samples, accuracy {:.2}%",
        outcome.report.counts.attempted,
        outcome.report.accuracy * 100.0
    );
    Ok(())
}
