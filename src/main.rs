//! Sourcewatch - AI-agent data quality monitor for ingested data sources
//!
//! A CLI tool that inspects daily file listings against their last-weekday
//! baseline, runs six anomaly detectors per source with a local LLM for
//! narration, and produces an executive report with priority tiers.
//!
//! Exit codes:
//!   0 - Success (report produced, or dry run completed)
//!   1 - Runtime error (missing folders, connection, synthesis failure)

mod agent;
mod analysis;
mod cli;
mod config;
mod discovery;
mod error;
mod evidence;
mod models;
mod pipeline;
mod report;

use anyhow::{Context, Result};
use cli::Args;
use config::Config;
use discovery::DiscoveryOptions;
use evidence::FolderListing;
use indicatif::{ProgressBar, ProgressStyle};
use models::DetectorKind;
use pipeline::{Pipeline, RunContext};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Initialize logging
    init_logging(&args);

    info!("Sourcewatch v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run(args).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Analysis failed: {}", e);
            eprintln!("\n❌ Error: {}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .sourcewatch.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(".sourcewatch.toml");

    if path.exists() {
        eprintln!("⚠️  .sourcewatch.toml already exists. Remove it first or edit it manually.");
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).context("Failed to write .sourcewatch.toml")?;

    println!("✅ Created .sourcewatch.toml with default settings.");
    println!("   Edit it to customize model, concurrency, and output options.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) {
    let level = args.log_level();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Run the complete analysis workflow. Returns the exit code.
async fn run(args: Args) -> Result<i32> {
    let start_time = Instant::now();

    // Load configuration
    let mut config = load_config(&args)?;
    config.merge_with_args(&args);

    let primary_folder = args
        .primary_folder
        .clone()
        .context("Primary folder is required")?;
    let metadata_folder = args
        .metadata_folder
        .clone()
        .context("Metadata folder is required")?;

    // Step 1: Discover sources
    println!("📂 Discovering sources in {}", metadata_folder.display());
    let discovery_options = DiscoveryOptions {
        extract_names: config.pipeline.extract_names,
        max_sources: config.pipeline.max_sources,
    };
    let sources = discovery::discover_sources(&primary_folder, &metadata_folder, &discovery_options)?;
    println!("   Found {} sources", sources.len());

    // Step 2: Load the file listings
    let listing = FolderListing::load(&primary_folder)?;

    // Handle --dry-run: gather evidence and exit, no reasoning calls
    if args.dry_run {
        return handle_dry_run(&sources, &listing);
    }

    // Step 3: Initialize the reasoning client
    println!("🤖 Initializing reasoning client...");
    println!("   Model: {}", config.model.name);
    println!("   Ollama: {}", config.model.ollama_url);
    println!("   Timeout: {}s", config.model.timeout_seconds);
    println!("   Concurrency: {}", config.pipeline.concurrency);

    let reasoner = agent::OllamaClient::new(agent::ReasonerConfig {
        ollama_url: config.model.ollama_url.clone(),
        model_name: config.model.name.clone(),
        temperature: config.model.temperature,
        timeout_seconds: config.model.timeout_seconds,
    })
    .context("Failed to build reasoning client")?;

    let pipeline = Pipeline::new(
        Arc::new(reasoner),
        config.pipeline.concurrency,
        Duration::from_millis(config.model.retry_backoff_ms),
    );

    // Step 4: Run detection and synthesis
    let ctx = RunContext::new(args.session_id.clone());
    info!("Session {} started at {}", ctx.session_id, ctx.started_at);

    println!("\n🔬 Analyzing {} sources (6 detectors each)...\n", sources.len());
    let spinner = make_spinner(args.quiet);
    let executive = pipeline.run(sources, &listing).await?;
    spinner.finish_and_clear();

    // Step 5: Render and persist the report
    let markdown = report::render_markdown(&executive);

    if !args.quiet {
        println!("{}", markdown);
    }

    let mut saved_path: Option<PathBuf> = None;
    if config.report.save_output {
        let output_dir = PathBuf::from(&config.report.output_dir);
        saved_path = Some(report::save_report(&executive, &output_dir, &ctx)?);
    }

    // Print summary
    let duration = start_time.elapsed().as_secs_f64();
    println!("📊 Analysis Summary:");
    println!("   Sources analyzed: {}", executive.total_sources());
    println!(
        "   - 🔴 Urgent: {} | 🟡 Needs attention: {} | 🟢 No action: {}",
        executive.urgent.len(),
        executive.needs_attention.len(),
        executive.no_action.len()
    );
    println!("   Duration: {:.1}s", duration);

    match saved_path {
        Some(path) => println!("\n✅ Report saved to: {}", path.display()),
        None => println!("\n✅ Analysis complete (report not saved, --no-save-output)."),
    }

    Ok(0)
}

/// Handle --dry-run: print the locally gathered evidence, no LLM calls.
fn handle_dry_run(sources: &[models::Source], listing: &FolderListing) -> Result<i32> {
    println!("\n🔍 Dry run: gathering evidence (no reasoning calls)...\n");

    for source in sources {
        let snapshot = listing.snapshot(&source.id);
        println!(
            "   📄 {} (id: {}) — {} files today, {} records",
            source.name(),
            source.id,
            snapshot.today.len(),
            snapshot.total_records()
        );
        for kind in DetectorKind::ALL {
            let evidence = snapshot.gather(kind);
            if evidence.flagged_count > 0 {
                println!(
                    "      ⚠️  {}: {} flagged ({})",
                    kind,
                    evidence.flagged_count,
                    evidence.flagged_files.join(", ")
                );
            }
        }
    }

    println!("\n✅ Dry run complete. No reasoning calls were made.");
    Ok(0)
}

/// Spinner shown while the pipeline runs. Hidden in quiet mode.
fn make_spinner(quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message("Running detectors and synthesis...");
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from .sourcewatch.toml");
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}
