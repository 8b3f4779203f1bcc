use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use lexbarrel_core::config::IndexConfig;
use lexbarrel_core::document::DocumentReader;
use lexbarrel_core::forward::build_forward_index;
use lexbarrel_core::inverted::build_inverted_index;
use lexbarrel_core::lexicon::{build_lexicon, Lexicon};
use lexbarrel_core::persist::IndexPaths;
use lexbarrel_core::progress::{ProgressLog, Stage};
use lexbarrel_core::trie::Trie;
use tracing_subscriber::{fmt, EnvFilter};
use walkdir::WalkDir;

use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "indexer")]
#[command(about = "Build the lexicon, forward index, barrels and autocomplete trie", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Common {
    /// Data directory holding the lexicon, logs and index files
    #[arg(long, default_value = "./data")]
    data: PathBuf,
    /// Optional JSON config overriding weight tiers and batch sizes
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Assign term ids and document frequencies
    Lexicon {
        #[command(flatten)]
        common: Common,
        /// Cleaned documents (file or directory of .json/.jsonl)
        #[arg(long)]
        input: PathBuf,
    },
    /// Write forward-index batches for documents already in the lexicon
    Forward {
        #[command(flatten)]
        common: Common,
        #[arg(long)]
        input: PathBuf,
    },
    /// Merge forward batches into barrels
    Inverted {
        #[command(flatten)]
        common: Common,
    },
    /// Snapshot the autocomplete trie
    Trie {
        #[command(flatten)]
        common: Common,
    },
    /// Run every stage in order
    Build {
        #[command(flatten)]
        common: Common,
        #[arg(long)]
        input: PathBuf,
    },
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Lexicon { common, input } => {
            let (paths, config) = prepare(&common)?;
            run_lexicon(&paths, &config, &input)
        }
        Commands::Forward { common, input } => {
            let (paths, config) = prepare(&common)?;
            run_forward(&paths, &config, &input)
        }
        Commands::Inverted { common } => {
            let (paths, config) = prepare(&common)?;
            run_inverted(&paths, &config)
        }
        Commands::Trie { common } => {
            let (paths, _) = prepare(&common)?;
            run_trie(&paths)
        }
        Commands::Build { common, input } => {
            let (paths, config) = prepare(&common)?;
            run_lexicon(&paths, &config, &input)?;
            run_forward(&paths, &config, &input)?;
            run_inverted(&paths, &config)?;
            run_trie(&paths)?;
            tracing::info!(data = %paths.root.display(), "index build complete");
            Ok(())
        }
    }
}

fn prepare(common: &Common) -> Result<(IndexPaths, IndexConfig)> {
    let config = IndexConfig::load_or_default(common.config.as_deref())?;
    let paths = IndexPaths::new(&common.data);
    fs::create_dir_all(&paths.root).with_context(|| format!("creating data directory {}", paths.root.display()))?;
    Ok((paths, config))
}

fn input_files(input: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = Vec::new();
    if input.is_dir() {
        for entry in WalkDir::new(input).sort_by_file_name().into_iter().filter_map(|e| e.ok()) {
            let p = entry.path();
            if p.is_file() && matches!(p.extension().and_then(|s| s.to_str()), Some("json" | "jsonl")) {
                files.push(p.to_path_buf());
            }
        }
    } else if input.is_file() {
        files.push(input.to_path_buf());
    } else {
        bail!("input {} does not exist", input.display());
    }
    tracing::info!(files = files.len(), input = %input.display(), "collected input files");
    Ok(files)
}

fn run_lexicon(paths: &IndexPaths, config: &IndexConfig, input: &Path) -> Result<()> {
    let mut lexicon = Lexicon::open_or_new(paths)?;
    let mut log = ProgressLog::open(paths, Stage::Lexicon)?;
    let docs = DocumentReader::new(input_files(input)?);
    build_lexicon(paths, config, &mut lexicon, &mut log, docs).context("lexicon stage failed")?;
    Ok(())
}

fn run_forward(paths: &IndexPaths, config: &IndexConfig, input: &Path) -> Result<()> {
    let lexicon = Lexicon::open_required(paths)?;
    let lexicon_log = ProgressLog::open_prerequisite(paths, Stage::Forward)?;
    let mut log = ProgressLog::open(paths, Stage::Forward)?;
    let docs = DocumentReader::new(input_files(input)?);
    build_forward_index(paths, config, &lexicon, &lexicon_log, &mut log, docs).context("forward stage failed")?;
    Ok(())
}

fn run_inverted(paths: &IndexPaths, config: &IndexConfig) -> Result<()> {
    let mut lexicon = Lexicon::open_required(paths)?;
    let stats = build_inverted_index(paths, config, &mut lexicon).context("inverted stage failed")?;
    tracing::info!(terms = stats.terms_written, barrels = stats.barrels, docs = stats.new_documents, "barrels written");
    Ok(())
}

fn run_trie(paths: &IndexPaths) -> Result<()> {
    let lexicon = Lexicon::open_required(paths)?;
    let trie = Trie::from_lexicon(&lexicon);
    trie.save(paths).context("saving trie snapshot")?;
    tracing::info!(terms = trie.len(), "trie snapshot written");
    Ok(())
}
