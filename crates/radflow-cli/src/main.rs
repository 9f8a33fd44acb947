//! CLI binary for running, validating and inspecting radflow runs.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

use radflow_pipeline::{
    build_plan, default_renderers, default_transforms, resolve_clock, validate, DirectorySource,
    PipelineExecutor, RunConfig, Severity, TimeWindow,
};

#[derive(Parser)]
#[command(name = "radflow", version, about = "Radar volume processing flow runner")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a processing flow from a TOML configuration
    Run {
        /// Path to the run configuration
        config: PathBuf,

        /// Start of the processing period (RFC 3339), overrides `start`
        #[arg(long)]
        start: Option<DateTime<Utc>>,

        /// End of the processing period (RFC 3339, exclusive), overrides `end`
        #[arg(long)]
        end: Option<DateTime<Utc>>,

        /// Input data directory, overrides `input`
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Output directory for products, overrides `output`
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check a configuration without running it
    Validate {
        /// Path to the run configuration
        config: PathBuf,
    },

    /// Show levels, stages, inputs and the clock of a configuration
    Info {
        /// Path to the run configuration
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Run {
            config,
            start,
            end,
            input,
            output,
            json,
        } => {
            cmd_run(&config, start, end, input, output, json).await?;
        }
        Commands::Validate { config } => {
            cmd_validate(&config)?;
        }
        Commands::Info { config } => {
            cmd_info(&config)?;
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<RunConfig> {
    RunConfig::load(path).with_context(|| format!("loading {}", path.display()))
}

/// Overlay command-line period bounds on the configured window.
fn apply_window(
    config: &mut RunConfig,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> anyhow::Result<()> {
    let start = start.or(config.window.map(|w| w.start));
    let end = end.or(config.window.map(|w| w.end));
    match (start, end) {
        (Some(start), Some(end)) => {
            if start >= end {
                bail!("start {start} is not before end {end}");
            }
            config.window = Some(TimeWindow::new(start, end));
        }
        (None, None) => {
            bail!("no processing period: set start/end in the config or pass --start and --end")
        }
        _ => bail!("both a start and an end are required"),
    }
    Ok(())
}

async fn cmd_run(
    path: &Path,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    json: bool,
) -> anyhow::Result<()> {
    let mut config = load_config(path)?;
    if let Some(input) = input {
        config.input = input;
    }
    if let Some(output) = output {
        config.output = output;
    }
    apply_window(&mut config, start, end)?;

    let transforms = default_transforms();
    let renderers = default_renderers();
    for diag in validate(&config, &transforms, &renderers) {
        if diag.severity == Severity::Warning {
            tracing::warn!(rule = %diag.rule, "{}", diag.message);
        }
    }

    println!("Running: {}", config.name);
    println!("Input: {}", config.input.display());
    println!("Output: {}", config.output.display());
    if let Some(window) = config.window {
        println!("Period: {} .. {}", window.start, window.end);
    }

    let source = DirectorySource::new(&config.input)?;
    let executor = PipelineExecutor::new(config, transforms, renderers);
    let report = executor.run(&source).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("\nRun completed ({})", report.run_id);
    println!("Clock: {}", report.clock);
    println!(
        "processed {} of {} steps ({} skipped)",
        report.steps_processed,
        report.steps_total,
        report.steps_skipped()
    );
    for step in &report.skipped_steps {
        println!("  skipped {}: {}", step.timestamp, step.reason);
    }
    if !report.stage_failures.is_empty() {
        println!("Stage failures: {}", report.stage_failures.len());
        for f in &report.stage_failures {
            println!("  {} [{}]: {}", f.stage, f.status, f.error);
        }
    }
    println!(
        "Products: {} rendered, {} skipped",
        report.products_rendered, report.products_skipped
    );

    Ok(())
}

fn cmd_validate(path: &Path) -> anyhow::Result<()> {
    let config = load_config(path)?;
    let diagnostics = validate(&config, &default_transforms(), &default_renderers());

    if diagnostics.is_empty() {
        println!("Configuration is valid");
        return Ok(());
    }

    let mut has_error = false;
    for diag in &diagnostics {
        let severity = match diag.severity {
            Severity::Error => {
                has_error = true;
                "ERROR"
            }
            Severity::Warning => "WARN",
            Severity::Info => "INFO",
        };
        println!("[{}] {}: {}", severity, diag.rule, diag.message);
        if let Some(fix) = &diag.fix {
            println!("        fix: {}", fix);
        }
    }

    if has_error {
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_info(path: &Path) -> anyhow::Result<()> {
    let config = load_config(path)?;
    let plan = build_plan(&config, &default_transforms())?;

    println!("Run: {}", config.name);
    println!("Input: {}", config.input.display());
    println!("Output: {}", config.output.display());
    if let Some(scan) = config.master_scan() {
        println!("Master scan: {}", scan);
    }

    println!("\nLevels:");
    for (level, names) in plan.levels.iter() {
        println!("  l{}: {}", level, names.join(", "));
    }

    println!("\nStages:");
    for stage in plan.ordered() {
        let global = if stage.make_global { " global" } else { "" };
        println!("  {} [{}]{}", stage.name, stage.stage_type, global);
        for d in &stage.datatypes {
            println!("    in  {}", d);
        }
        for p in &stage.products {
            println!("    out {} ({})", p.name, p.product_type);
        }
    }

    println!("\nRequired inputs:");
    for d in &plan.required {
        println!("  {}", d);
    }

    match resolve_clock(&plan.required, config.clock.as_ref(), &config.clock_fallback) {
        Ok(clock) => println!("\nClock: {}", clock),
        Err(e) => println!("\nClock: unresolved ({})", e),
    }

    Ok(())
}
