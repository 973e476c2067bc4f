use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use hop_retriever::commands::{
    BuildArgs, SearchArgs, build, generate, health, search, search_batch, status,
};
use hop_retriever::config::{Config, show_config, write_default_config};
use hop_retriever::database::{Passage, QaPair};

#[derive(Parser)]
#[command(name = "hop-retriever")]
#[command(about = "Dense passage and QA-pair retrieval for multi-hop question answering")]
#[command(version)]
struct Cli {
    /// Directory holding config.toml and the default index directories
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// What each corpus line becomes
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// One record per line, embedding title and passage
    Passage,
    /// One record per question/answer pair in the line's `qa` list
    Qa,
}

#[derive(Subcommand)]
enum Commands {
    /// Show or initialize the configuration file
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Index a JSONL corpus
    Build {
        /// Corpus file, one JSON object per line
        corpus: PathBuf,
        #[arg(long, value_enum, default_value_t = Mode::Passage)]
        mode: Mode,
        /// Output directory, defaults to <config dir>/index/<mode>
        #[arg(long)]
        out: Option<PathBuf>,
        /// Records per encoder call
        #[arg(long)]
        batch_size: Option<usize>,
        /// Documents between numbered checkpoints
        #[arg(long)]
        save_every: Option<u64>,
        /// Add to the existing index instead of starting over
        #[arg(long)]
        append: bool,
    },
    /// Search a built index
    Search {
        query: String,
        #[arg(long, value_enum, default_value_t = Mode::Passage)]
        mode: Mode,
        /// Index directory, defaults to <config dir>/index/<mode>
        #[arg(long)]
        index: Option<PathBuf>,
        /// Number of hits, defaults to the configured top-k
        #[arg(long, short = 'k')]
        topk: Option<usize>,
        /// Candidates fetched before deduplication, defaults to oversample x top-k
        #[arg(long)]
        fetch_k: Option<usize>,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run every query in a file against one loaded index
    SearchBatch {
        /// One query per line, plain text or JSON with a "question" field
        queries: PathBuf,
        #[arg(long, value_enum, default_value_t = Mode::Passage)]
        mode: Mode,
        #[arg(long)]
        index: Option<PathBuf>,
        #[arg(long, short = 'k')]
        topk: Option<usize>,
        #[arg(long)]
        fetch_k: Option<usize>,
        /// Searches in flight at once
        #[arg(long, default_value_t = 8)]
        concurrency: usize,
        /// Print one JSON line per query
        #[arg(long)]
        json: bool,
    },
    /// Show index size, checkpoints and metadata consistency
    Status {
        #[arg(long, value_enum, default_value_t = Mode::Passage)]
        mode: Mode,
        #[arg(long)]
        index: Option<PathBuf>,
    },
    /// Send a prompt to the generation service
    Generate {
        prompt: String,
        /// Print only this field of a JSON reply
        #[arg(long)]
        field: Option<String>,
        #[arg(long)]
        temperature: Option<f32>,
        #[arg(long)]
        max_tokens: Option<u32>,
    },
    /// Check that the encoder and generation services respond
    Health,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config_dir = match cli.config_dir {
        Some(dir) => dir,
        None => Config::config_dir()?,
    };
    let config = Config::load(&config_dir)?;

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config(&config)?;
            } else {
                write_default_config(&config)?;
            }
        }
        Commands::Build {
            corpus,
            mode,
            out,
            batch_size,
            save_every,
            append,
        } => {
            let args = BuildArgs {
                out,
                batch_size,
                save_every,
                append,
            };
            match mode {
                Mode::Passage => {
                    build::<Passage>(&config, &corpus, args).await?;
                }
                Mode::Qa => {
                    build::<QaPair>(&config, &corpus, args).await?;
                }
            }
        }
        Commands::Search {
            query,
            mode,
            index,
            topk,
            fetch_k,
            json,
        } => {
            let args = SearchArgs {
                index,
                topk,
                fetch_k,
                json,
            };
            match mode {
                Mode::Passage => {
                    search::<Passage>(&config, &query, args).await?;
                }
                Mode::Qa => {
                    search::<QaPair>(&config, &query, args).await?;
                }
            }
        }
        Commands::SearchBatch {
            queries,
            mode,
            index,
            topk,
            fetch_k,
            concurrency,
            json,
        } => {
            let args = SearchArgs {
                index,
                topk,
                fetch_k,
                json,
            };
            let answered = match mode {
                Mode::Passage => {
                    search_batch::<Passage>(&config, &queries, args, concurrency).await?
                }
                Mode::Qa => search_batch::<QaPair>(&config, &queries, args, concurrency).await?,
            };
            eprintln!("Answered {answered} queries");
        }
        Commands::Status { mode, index } => match mode {
            Mode::Passage => {
                status::<Passage>(&config, index).await?;
            }
            Mode::Qa => {
                status::<QaPair>(&config, index).await?;
            }
        },
        Commands::Generate {
            prompt,
            field,
            temperature,
            max_tokens,
        } => {
            generate(&config, prompt, field, temperature, max_tokens).await?;
        }
        Commands::Health => {
            health(&config).await?;
        }
    }

    Ok(())
}
