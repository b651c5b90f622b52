//! # apidoc CLI
//!
//! The `apidoc` binary chunks API documents, builds the knowledge base,
//! answers queries, and serves the HTTP tool API.
//!
//! ## Usage
//!
//! ```bash
//! apidoc --config ./config/apidoc.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `apidoc chunk <input>` | Chunk a document and print category counts |
//! | `apidoc convert <in.py> <out.md>` | Render a Python module as API markdown |
//! | `apidoc build <input>` | Chunk, embed, and persist the knowledge base |
//! | `apidoc query "<prompt>"` | Retrieve class and method snippets |
//! | `apidoc stats` | Row counts, dimensions, and file sizes |
//! | `apidoc serve` | Start the HTTP tool server |
//! | `apidoc completions <shell>` | Print shell completions |
//!
//! `chunk` and `convert` do not need a config file.
//!
//! Logging goes to stderr and is controlled by `APIDOC_LOG`
//! (e.g. `APIDOC_LOG=debug apidoc query "..."`).

use anyhow::Result;
use apidoc_rag::build_cmd::{self, BuildOptions};
use apidoc_rag::config;
use apidoc_rag::progress::ProgressMode;
use apidoc_rag::source_chunk::{self, SourceFormat};
use apidoc_rag::{query_cmd, server, stats};
use apidoc_rag_core::chunk::BoundaryMode;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// apidoc: retrieval-augmented lookup over reference-API documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/apidoc.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "apidoc",
    about = "Chunk, embed, and query reference-API documents",
    version,
    long_about = "apidoc splits an API document into class and method chunks, embeds them \
    into one flat index per category, and answers free-text prompts with the most relevant \
    class and method snippets, via a CLI and an HTTP tool server."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/apidoc.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chunk a document and report what was found.
    ///
    /// Reads `[chunking].boundary` from the config when the file exists.
    Chunk {
        /// Markdown API document or Python module.
        input: PathBuf,

        /// Input format. Detected from the extension when omitted.
        #[arg(long, value_enum)]
        format: Option<SourceFormat>,

        /// Boundary mode for markdown: `lenient` or `strict`.
        #[arg(long)]
        boundary: Option<BoundaryMode>,

        /// Print the full corpus as JSON instead of counts.
        #[arg(long)]
        json: bool,
    },

    /// Render a Python module as API markdown.
    ///
    /// The output can be fed back to `build` (or `chunk`) as markdown.
    Convert {
        /// Python module to read.
        input: PathBuf,
        /// Markdown file to write.
        output: PathBuf,
    },

    /// Build the knowledge base from an API document.
    ///
    /// Chunks the document, embeds every chunk with the configured
    /// provider, and writes the index pair of each category to
    /// `[index].dir`. Chunks that cannot be embedded are skipped.
    Build {
        /// Markdown API document or Python module.
        input: PathBuf,

        /// Input format. Detected from the extension when omitted.
        #[arg(long, value_enum)]
        format: Option<SourceFormat>,

        /// Override `[embedding].batch_size`.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Chunk only; show counts without embedding or writing.
        #[arg(long)]
        dry_run: bool,

        /// Progress output on stderr. Defaults to `human` on a TTY.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Retrieve snippets relevant to a prompt.
    Query {
        /// What you want to do, in plain words.
        prompt: String,

        /// Print the `{success, data|error}` envelope as JSON.
        #[arg(long)]
        json: bool,

        /// Override `[retrieval].class_top_k`.
        #[arg(long)]
        class_top_k: Option<usize>,

        /// Override `[retrieval].method_top_k`.
        #[arg(long)]
        method_top_k: Option<usize>,
    },

    /// Show knowledge base statistics.
    Stats,

    /// Start the HTTP tool server on `[server].bind`.
    Serve,

    /// Generate shell completions.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("APIDOC_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Commands that don't require config
    match &cli.command {
        Commands::Chunk {
            input,
            format,
            boundary,
            json,
        } => {
            let boundary = match boundary {
                Some(b) => *b,
                None => configured_boundary(&cli.config)?,
            };
            return run_chunk(input, *format, boundary, *json);
        }
        Commands::Convert { input, output } => {
            let n = source_chunk::convert_source_to_markdown(input, output)?;
            println!("convert");
            println!("  source: {}", input.display());
            println!("  chunks: {}", n);
            println!("  written: {}", output.display());
            return Ok(());
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(*shell, &mut cmd, "apidoc", &mut std::io::stdout());
            return Ok(());
        }
        _ => {}
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Build {
            input,
            format,
            batch_size,
            dry_run,
            progress,
        } => {
            let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);
            let opts = BuildOptions {
                input,
                format,
                batch_size,
                dry_run,
            };
            build_cmd::run_build(&cfg, &opts, mode.reporter().as_ref()).await?;
        }
        Commands::Query {
            prompt,
            json,
            class_top_k,
            method_top_k,
        } => {
            query_cmd::run_query(&cfg, &prompt, class_top_k, method_top_k, json).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg)?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Chunk { .. } | Commands::Convert { .. } | Commands::Completions { .. } => {
            // Handled above (before config loading)
        }
    }

    Ok(())
}

/// Boundary mode from the config file, or the default when there is none.
fn configured_boundary(path: &Path) -> Result<BoundaryMode> {
    if !path.exists() {
        return Ok(BoundaryMode::default());
    }
    Ok(config::load_config(path)?.chunking.boundary)
}

fn run_chunk(
    input: &Path,
    format: Option<SourceFormat>,
    boundary: BoundaryMode,
    json: bool,
) -> Result<()> {
    let corpus = source_chunk::load_corpus(input, format, boundary)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&corpus)?);
        return Ok(());
    }

    let format = format.unwrap_or_else(|| SourceFormat::detect(input));
    println!("chunk");
    println!("  source: {}", input.display());
    println!("  format: {}", format!("{:?}", format).to_lowercase());
    println!("  classes: {}", corpus.classes.len());
    println!("  methods: {}", corpus.methods.len());
    Ok(())
}
