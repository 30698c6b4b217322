//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use clap::Parser;
use std::path::PathBuf;

/// Sourcewatch - AI-agent data quality monitor for ingested data sources
///
/// Scans two input folders (daily file listings + source CV documents),
/// runs six detectors per source, and synthesizes the findings into an
/// executive report with priority tiers using a local LLM.
///
/// Examples:
///   sourcewatch ./artifacts/files/2025-09-08 ./datasource_cvs
///   sourcewatch ./files ./cvs --max-sources 5 --no-extract-names
///   sourcewatch ./files ./cvs --dry-run
///   sourcewatch --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Folder containing the daily file listings
    ///
    /// Expected contents: files.json and files_last_weekday.json, each a
    /// JSON map of source id to file entries.
    /// Not required when using --init-config.
    #[arg(value_name = "PRIMARY_FOLDER", required_unless_present = "init_config")]
    pub primary_folder: Option<PathBuf>,

    /// Folder containing the per-source CV documents (<id>_native.md)
    #[arg(value_name = "METADATA_FOLDER", required_unless_present = "init_config")]
    pub metadata_folder: Option<PathBuf>,

    /// Extract display names from CV file headers (default)
    #[arg(long, conflicts_with = "no_extract_names")]
    pub extract_names: bool,

    /// Use generic Source_<id> names instead of CV headers
    #[arg(long, conflicts_with = "extract_names")]
    pub no_extract_names: bool,

    /// Maximum number of sources to analyze
    ///
    /// Discovery order is stable; the first N discovered sources are kept.
    #[arg(long, value_name = "COUNT")]
    pub max_sources: Option<usize>,

    /// Write the rendered report to the output directory (default)
    #[arg(long, conflicts_with = "no_save_output")]
    pub save_output: bool,

    /// Print the report to stdout only
    #[arg(long, conflicts_with = "save_output")]
    pub no_save_output: bool,

    /// Session identifier encoded into the output filename
    ///
    /// Defaults to a timestamp-derived id.
    #[arg(long, value_name = "ID")]
    pub session_id: Option<String>,

    /// Directory for saved reports
    #[arg(long, default_value = ".", value_name = "DIR")]
    pub output_dir: PathBuf,

    /// Ollama model to use for the reasoning calls
    #[arg(short, long, default_value = "llama3.2:latest", env = "SOURCEWATCH_MODEL")]
    pub model: String,

    /// Ollama API endpoint URL
    #[arg(long, default_value = "http://localhost:11434", env = "OLLAMA_URL")]
    pub ollama_url: String,

    /// Temperature for LLM responses (0.0 - 1.0)
    #[arg(long, default_value = "0.0")]
    pub temperature: f32,

    /// Reasoning call timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Maximum concurrent reasoning calls across all sources
    #[arg(long, default_value = "4", value_name = "NUM")]
    pub concurrency: usize,

    /// Path to configuration file
    ///
    /// If not specified, looks for .sourcewatch.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Dry run: discover sources and gather evidence without reasoning calls
    #[arg(long)]
    pub dry_run: bool,

    /// Generate a default .sourcewatch.toml configuration file
    #[arg(long)]
    pub init_config: bool,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        for (label, folder) in [
            ("Primary folder", &self.primary_folder),
            ("Metadata folder", &self.metadata_folder),
        ] {
            match folder {
                None => return Err(format!("{} is required", label)),
                Some(path) => {
                    if !path.exists() {
                        return Err(format!("{} does not exist: {}", label, path.display()));
                    }
                    if !path.is_dir() {
                        return Err(format!("{} is not a directory: {}", label, path.display()));
                    }
                }
            }
        }

        // Validate Ollama URL format (not needed for dry-run)
        if !self.dry_run
            && !self.ollama_url.starts_with("http://")
            && !self.ollama_url.starts_with("https://")
        {
            return Err("Ollama URL must start with 'http://' or 'https://'".to_string());
        }

        if !(0.0..=1.0).contains(&self.temperature) {
            return Err("Temperature must be between 0.0 and 1.0".to_string());
        }

        if self.concurrency == 0 {
            return Err("Concurrency must be at least 1".to_string());
        }

        if let Some(max) = self.max_sources {
            if max == 0 {
                return Err("Max sources must be at least 1".to_string());
            }
        }

        if let Some(timeout) = self.timeout {
            if timeout == 0 {
                return Err("Timeout must be at least 1 second".to_string());
            }
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
