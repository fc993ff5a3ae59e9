use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::model::TemplateMode;

#[derive(Parser, Debug)]
#[command(
    name = "ragguard",
    version,
    about = "Guarded retrieval-augmented question answering over a local evidence store"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Ingest(IngestArgs),
    Status(StatusArgs),
    Calibrate(CalibrateArgs),
    Ask(AskArgs),
}

#[derive(Args, Debug, Clone)]
pub struct IngestArgs {
    #[arg(long, default_value = ".cache/ragguard")]
    pub cache_root: PathBuf,

    #[arg(long, default_value = "data")]
    pub data_dir: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value = ".cache/ragguard")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct CalibrateArgs {
    #[arg(long, default_value = ".cache/ragguard")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    #[arg(long)]
    pub probe_file: Option<PathBuf>,

    #[arg(long, default_value_t = 20)]
    pub probe_k: usize,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct AskArgs {
    #[arg(long, default_value = ".cache/ragguard")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    #[arg(long)]
    pub query: String,

    #[arg(long, default_value_t = 0.35)]
    pub threshold: f64,

    #[arg(long, default_value_t = 1)]
    pub min_chunks: usize,

    #[arg(long, default_value_t = 4)]
    pub max_chunks: usize,

    #[arg(long, value_enum, default_value_t = TemplateMode::Strict)]
    pub template_mode: TemplateMode,

    #[arg(long, default_value_t = 0.3)]
    pub fidelity_threshold: f64,

    #[arg(long, default_value_t = false)]
    pub no_citation_check: bool,

    #[arg(long, default_value_t = 30_000)]
    pub timeout_ms: u64,

    #[arg(long, default_value = "http://localhost:11434")]
    pub ollama_url: String,

    #[arg(long, default_value = "llama3")]
    pub model: String,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}
