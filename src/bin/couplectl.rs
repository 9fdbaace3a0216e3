//! `couplectl`: drives one analysis pass against a git repository, inspects
//! a running or finished task, and runs/compares clustering snapshots
//! against a previously built artifact store.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use coupling_core::cluster::{self, EdgeInput};
use coupling_core::cluster::insights;
use coupling_core::config::CouplingConfig;
use coupling_core::error::{CouplingError, Result};
use coupling_core::store::columnar::ColumnarWriter;
use coupling_core::store::relational::{ClusteringSnapshot, RelationalStore};
use coupling_core::task::{self, AbortFlag, StoreSink};

#[derive(Parser, Debug)]
#[command(name = "couplectl", version, about = "Mines git history into a logical coupling graph")]
struct Cli {
    /// Log level for stderr output (error, warn, info, debug, trace).
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a full analysis pass: mirror check, history extraction, edge building.
    Analyze(AnalyzeArgs),
    /// Print a task's current row (state, stage, progress).
    Status(StatusArgs),
    /// Run a clustering algorithm over the persisted edges.
    Cluster(ClusterArgs),
    /// Compare two saved clustering snapshots for membership drift.
    Compare(CompareArgs),
}

#[derive(Args, Debug)]
struct AnalyzeArgs {
    /// Path to the git repository to mine.
    repo: PathBuf,
    /// TOML config file; defaults are used when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
    /// sqlite file backing this repo's relational store.
    #[arg(long, default_value = "coupling.sqlite3")]
    store: PathBuf,
}

#[derive(Args, Debug)]
struct StatusArgs {
    #[arg(long, default_value = "coupling.sqlite3")]
    store: PathBuf,
    task_id: String,
}

#[derive(Args, Debug)]
struct ClusterArgs {
    #[arg(long, default_value = "coupling.sqlite3")]
    store: PathBuf,
    /// connected_components | louvain | label_propagation | hierarchical | dbscan
    algorithm: String,
    /// Algorithm-specific parameters as a JSON object.
    #[arg(long)]
    params: Option<String>,
    /// Persist the result under this name for later `compare` runs.
    #[arg(long)]
    snapshot_name: Option<String>,
}

#[derive(Args, Debug)]
struct CompareArgs {
    #[arg(long, default_value = "coupling.sqlite3")]
    store: PathBuf,
    old_snapshot: String,
    new_snapshot: String,
}

fn main() {
    let cli = Cli::parse();

    let log_level = match cli.log_level.as_str() {
        "error" => tracing::Level::ERROR,
        "warn" => tracing::Level::WARN,
        "debug" => tracing::Level::DEBUG,
        "trace" => tracing::Level::TRACE,
        _ => tracing::Level::INFO,
    };
    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Command::Analyze(args) => cmd_analyze(args),
        Command::Status(args) => cmd_status(args),
        Command::Cluster(args) => cmd_cluster(args),
        Command::Compare(args) => cmd_compare(args),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<CouplingConfig> {
    let config = match path {
        Some(path) => {
            let parsed = CouplingConfig::from_toml_file(path)?;
            parsed.map_err(|e| CouplingError::ConfigError(e.to_string()))?
        }
        None => CouplingConfig::default(),
    };
    let issues = config.validate();
    if !issues.is_empty() {
        for issue in &issues {
            eprintln!("config error: {}: {}", issue.field, issue.message);
        }
        return Err(CouplingError::ConfigError(format!("{} invalid option(s)", issues.len())));
    }
    Ok(config)
}

fn cmd_analyze(args: AnalyzeArgs) -> Result<()> {
    let config = load_config(args.config.as_ref())?;

    let mut relational = RelationalStore::open(&args.store)?;
    // A second connection onto the same WAL-mode file: the task runner needs
    // `relational` itself for extraction/edge writes while the progress sink
    // updates the `analysis_tasks` row concurrently with that work.
    let mut progress_store = RelationalStore::open(&args.store)?;
    let mut columnar = ColumnarWriter::new();
    let mut sink = StoreSink::new(&mut progress_store);

    let task_id = task::new_task_id();
    let abort = AbortFlag::new();
    println!("starting task {task_id}");

    let row = task::run_task(
        &task_id,
        &args.repo,
        &config,
        || chrono::Utc::now().timestamp(),
        &abort,
        &mut relational,
        &mut columnar,
        &mut sink,
    )?;

    println!("task {} finished: state={} entities={} relationships={}",
        row.task_id, row.state, row.entity_count, row.relationship_count);
    if let Some(metrics) = &row.metrics_json {
        println!("{metrics}");
    }
    Ok(())
}

fn cmd_status(args: StatusArgs) -> Result<()> {
    let relational = RelationalStore::open(&args.store)?;
    match relational.get_task(&args.task_id)? {
        Some(row) => {
            println!(
                "task {} state={} stage={} progress={:.2} processed={}/{}",
                row.task_id,
                row.state,
                row.stage.as_deref().unwrap_or("-"),
                row.progress,
                row.processed_commits,
                row.total_commits.map(|n| n.to_string()).unwrap_or_else(|| "?".to_string()),
            );
            if let Some(err) = &row.error {
                println!("error: {err}");
            }
            Ok(())
        }
        None => Err(CouplingError::Custom(format!("no such task: {}", args.task_id))),
    }
}

fn cmd_cluster(args: ClusterArgs) -> Result<()> {
    let relational = RelationalStore::open(&args.store)?;
    let params: serde_json::Value = match &args.params {
        Some(raw) => serde_json::from_str(raw)
            .map_err(|e| CouplingError::ConfigError(format!("invalid --params JSON: {e}")))?,
        None => serde_json::Value::Null,
    };

    let edges: Vec<EdgeInput> = relational
        .all_edges()?
        .into_iter()
        .map(|e| EdgeInput { a: e.src_id, b: e.dst_id, weight: e.jaccard_weighted })
        .collect();
    let file_ids: Vec<u64> = relational
        .entities_snapshot()?
        .into_iter()
        .map(|(id, _, _)| id)
        .collect();

    let result = cluster::run(&args.algorithm, &edges, &file_ids, &params)?;
    println!("{}", serde_json::to_string_pretty(&result).map_err(|e| CouplingError::Custom(e.to_string()))?);

    if let Some(name) = args.snapshot_name {
        let snapshot = ClusteringSnapshot {
            id: task::new_task_id(),
            name: Some(name),
            algorithm: args.algorithm,
            result_json: serde_json::to_string(&result).map_err(|e| CouplingError::Custom(e.to_string()))?,
            tags: None,
            created_at: chrono::Utc::now().timestamp(),
        };
        relational.save_snapshot(&snapshot)?;
        println!("saved snapshot {}", snapshot.id);
    }
    Ok(())
}

fn cmd_compare(args: CompareArgs) -> Result<()> {
    let relational = RelationalStore::open(&args.store)?;
    let old = load_snapshot_clusters(&relational, &args.old_snapshot)?;
    let new = load_snapshot_clusters(&relational, &args.new_snapshot)?;
    let drift = insights::compare_clusters(&old, &new);
    println!("{}", serde_json::to_string_pretty(&drift).map_err(|e| CouplingError::Custom(e.to_string()))?);
    Ok(())
}

fn load_snapshot_clusters(store: &RelationalStore, id: &str) -> Result<Vec<Vec<u64>>> {
    let snapshot = store
        .load_snapshot(id)?
        .ok_or_else(|| CouplingError::Custom(format!("no such snapshot: {id}")))?;
    let result: cluster::ClusterResult = serde_json::from_str(&snapshot.result_json)
        .map_err(|e| CouplingError::Custom(format!("corrupt snapshot {id}: {e}")))?;
    Ok(result.clusters)
}
