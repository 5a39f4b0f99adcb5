use std::io;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use kasca_governor::checkpoint::{
    parse_step_tag, resolve_pointer, EvalPolicy, MetricsStore, Pointer, Verdict,
};
use kasca_governor::config::AppConfig;
use kasca_governor::manifest::{
    build_manifests, dataset_stats, load_manifest_rows, missing_feature_caches, DirectorySource,
    NullProbe, RecordingSource,
};
use kasca_governor::split::Split;

/// Split assignment and checkpoint governance for keystroke-audio training runs.
#[derive(Parser)]
#[command(name = "kasca-governor", about, version)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(long, global = true, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Assign new recordings and rebuild train/eval manifests
    Manifests {
        /// Skip ffprobe and record a duration of 0 for every recording
        #[arg(long)]
        no_probe: bool,
    },
    /// Print dataset statistics for the recordings directory as JSON
    Stats {
        #[arg(long)]
        no_probe: bool,
    },
    /// Report which manifest rows still lack a feature cache under the tokens directory
    Caches {
        /// List every missing cache path
        #[arg(long)]
        list: bool,
    },
    /// Show pointers, retained checkpoints and the best eval of a run
    Status,
    /// Re-run the early-stopping policy over persisted eval records
    Replay,
    /// Print a config file containing every default value
    DefaultConfig,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "kasca_governor=info".into()),
        )
        .with(fmt::layer().with_writer(io::stderr))
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    if let Command::DefaultConfig = cli.command {
        print!("{}", AppConfig::default_toml());
        return Ok(());
    }

    let config = AppConfig::load_or_default(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;

    match cli.command {
        Command::Manifests { no_probe } => run_manifests(&config, no_probe),
        Command::Stats { no_probe } => run_stats(&config, no_probe),
        Command::Caches { list } => run_caches(&config, list),
        Command::Status => run_status(&config),
        Command::Replay => run_replay(&config),
        Command::DefaultConfig => Ok(()),
    }
}

fn run_manifests(config: &AppConfig, no_probe: bool) -> Result<()> {
    let dir = &config.paths.recordings_dir;
    let source: Box<dyn RecordingSource> = if no_probe {
        Box::new(DirectorySource::with_probe(dir, NullProbe))
    } else {
        Box::new(DirectorySource::new(dir))
    };
    let summary = build_manifests(
        source.as_ref(),
        &config.paths.manifests_dir,
        config.split.train_ratio,
        &config.split.schema_version,
    )
    .with_context(|| format!("building manifests from {}", dir.display()))?;

    println!(
        "train: {}  eval: {}  events: {}",
        summary.meta.train_count, summary.meta.eval_count, summary.meta.total_events
    );
    println!(
        "newly assigned: {}  repaired: {}  skipped: {}  train fraction: {:.3}",
        summary.newly_assigned, summary.repaired, summary.skipped, summary.train_fraction
    );
    Ok(())
}

fn run_stats(config: &AppConfig, no_probe: bool) -> Result<()> {
    let dir = &config.paths.recordings_dir;
    let stats = if no_probe {
        dataset_stats(&DirectorySource::with_probe(dir, NullProbe))
    } else {
        dataset_stats(&DirectorySource::new(dir))
    }
    .with_context(|| format!("scanning {}", dir.display()))?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

fn run_caches(config: &AppConfig, list: bool) -> Result<()> {
    let tokens_dir = &config.paths.tokens_dir;
    for split in [Split::Train, Split::Test] {
        let rows = load_manifest_rows(&config.paths.manifests_dir, split)
            .with_context(|| format!("reading {split} manifest"))?;
        let missing = missing_feature_caches(&rows, tokens_dir);
        println!(
            "{split}: {} rows, {} cached, {} missing",
            rows.len(),
            rows.len() - missing.len(),
            missing.len()
        );
        if list {
            for path in &missing {
                println!("  {}", path.display());
            }
        }
    }
    Ok(())
}

fn run_status(config: &AppConfig) -> Result<()> {
    let dir = &config.paths.checkpoints_dir;
    if !dir.is_dir() {
        bail!("checkpoint directory {} does not exist", dir.display());
    }
    for pointer in [Pointer::Latest, Pointer::Best] {
        match resolve_pointer(dir, pointer) {
            Ok(target) => println!("{:<7} {}", pointer.name(), target.display()),
            Err(e) => println!("{:<7} ({e})", pointer.name()),
        }
    }

    let mut steps: Vec<(u64, String)> = std::fs::read_dir(dir)
        .with_context(|| format!("listing {}", dir.display()))?
        .flatten()
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            parse_step_tag(&name).map(|step| (step, name))
        })
        .collect();
    steps.sort();
    println!("retained: {}", steps.len());
    for (_, name) in &steps {
        println!("  {name}");
    }

    let records = MetricsStore::new(dir.join(&config.checkpoint.metrics_dir_name)).load_all();
    let best = records
        .iter()
        .filter_map(|r| r.primary().map(|v| (r.step, v)))
        .fold(None, |acc: Option<(u64, f64)>, (step, v)| match acc {
            Some((_, best)) if best >= v => acc,
            _ => Some((step, v)),
        });
    match best {
        Some((step, value)) => println!(
            "evals: {}  best token_accuracy: {value:.4} at step {step}",
            records.len()
        ),
        None => println!("evals: {}", records.len()),
    }
    Ok(())
}

fn run_replay(config: &AppConfig) -> Result<()> {
    let metrics_dir = config
        .paths
        .checkpoints_dir
        .join(&config.checkpoint.metrics_dir_name);
    let records = MetricsStore::new(&metrics_dir).load_all();
    if records.is_empty() {
        bail!("no eval records found in {}", metrics_dir.display());
    }

    let mut policy = EvalPolicy::new(config.early_stopping.clone());
    for record in &records {
        let Some(value) = record.primary() else {
            println!("step {:>8}  (no token_accuracy)", record.step);
            continue;
        };
        let verdict = policy.observe(record.step, value);
        let line = match &verdict {
            Verdict::Improved {
                converged: Some(reason),
                ..
            } => format!("improved, save; stop: {reason}"),
            Verdict::Improved { .. } => "improved, save".to_string(),
            Verdict::Stalled {
                exhausted: Some(reason),
                ..
            } => format!("stop: {reason}"),
            Verdict::Stalled { count, .. } => format!("stalled ({count})"),
            Verdict::Regressed(reason) => format!("abort: {reason}"),
        };
        println!("step {:>8}  {value:.4}  {line}", record.step);
        let terminal = matches!(
            verdict,
            Verdict::Regressed(_)
                | Verdict::Improved { converged: Some(_), .. }
                | Verdict::Stalled { exhausted: Some(_), .. }
        );
        if terminal {
            break;
        }
    }
    Ok(())
}
