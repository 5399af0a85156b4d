//! # tenderlens CLI
//!
//! ```bash
//! # Analyze a technical specification (şartname) PDF, pretty-printed
//! tenderlens analyze teknik_sartname.pdf --pretty
//!
//! # Analyze every document of a tender package
//! tenderlens analyze ihale_dokumanlari.zip --config ./tenderlens.toml
//!
//! # Show the effective configuration
//! tenderlens config
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};

use tenderlens::config::{load_config, PipelineConfig, APP_NAME, APP_VERSION};
use tenderlens::pipeline::import::{classify, DocumentKind};
use tenderlens::pipeline::progress::{ProgressCallback, ProgressEvent};
use tenderlens::{build_processor, CancelToken};

#[derive(Parser)]
#[command(
    name = "tenderlens",
    version,
    about = "Analyze tender documents into one merged, validated JSON record"
)]
struct Cli {
    /// Pipeline configuration file (TOML). Built-in defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a PDF, DOCX, XLSX, DOC or text file, or a ZIP of them.
    ///
    /// Prints the result envelope as JSON on stdout. Exits non-zero when
    /// the analysis failed.
    Analyze {
        file: PathBuf,

        /// MIME type hint, used only when the content signature is not recognised.
        #[arg(long)]
        mime: Option<String>,

        #[arg(long)]
        pretty: bool,
    },

    /// Print the effective configuration as TOML.
    Config,
}

fn main() -> ExitCode {
    tenderlens::init_tracing();
    match run(Cli::parse()) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = match &cli.config {
        Some(path) => load_config(path).with_context(|| format!("loading {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    match cli.command {
        Commands::Config => {
            print!("{}", config.to_toml()?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Analyze { file, mime, pretty } => {
            let bytes = std::fs::read(&file).with_context(|| format!("reading {}", file.display()))?;
            let filename = file
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("document");

            tracing::info!(version = APP_VERSION, "{APP_NAME} starting");
            let processor = build_processor(&config)?;
            let cancel = CancelToken::new();
            let progress: &ProgressCallback<'_> = &|e: &ProgressEvent| {
                tracing::info!(stage = e.stage.as_str(), percent = e.progress_percent, "{}", e.message);
            };

            let output = if classify(&bytes, filename, mime.as_deref()).kind == DocumentKind::Archive {
                processor.analyze_archive(&bytes, filename, Some(progress), &cancel)
            } else {
                processor.analyze(&bytes, filename, mime.as_deref(), Some(progress), &cancel)
            };

            println!("{}", output.to_json(pretty)?);
            Ok(if output.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}
