use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

use cellgraph::config::ResyncConfig;
use cellgraph::core::{
    impact, CellAddress, ResyncCoordinator, SnapshotSink, SnapshotStore, WorkbookAnalyzer,
    WorkbookStamp,
};
use cellgraph::formatters::JsonCompactFormatter;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "cellgraph",
    version = "0.1.0",
    author = "cellgraph developers",
    about = "Spreadsheet formula dependency graph and impact analysis"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Parse a workbook and persist its dependency graph
    Load {
        #[arg(value_name = "WORKBOOK")]
        workbook: PathBuf,

        /// Snapshot store directory
        #[arg(long, value_name = "DIR")]
        store: Option<PathBuf>,

        /// Rebuild even if the stored graph is up to date
        #[arg(long)]
        force: bool,
    },
    /// List every cell affected by a change to CELL (e.g. `Sheet1!A1`)
    Impact {
        #[arg(value_name = "CELL")]
        cell: String,

        #[arg(short, long, value_name = "WORKBOOK")]
        workbook: PathBuf,

        #[arg(long, value_name = "DIR")]
        store: Option<PathBuf>,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },
    /// Keep the stored graph in sync with a workbook as it is edited
    Watch {
        #[arg(value_name = "WORKBOOK")]
        workbook: PathBuf,

        #[arg(long, value_name = "DIR")]
        store: Option<PathBuf>,

        /// Quiet period before a rebuild, in milliseconds
        #[arg(long, value_name = "MS")]
        debounce_ms: Option<u64>,
    },
    /// Write the dependency graph as compact JSON
    Export {
        #[arg(value_name = "WORKBOOK")]
        workbook: PathBuf,

        #[arg(short, long, value_name = "FILE", default_value = "cellgraph.json")]
        output: PathBuf,

        /// Canonical `Sheet!A1` node names instead of sheet ids
        #[arg(long)]
        full: bool,
    },
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
#[value(rename_all = "kebab-case")]
enum OutputFormat {
    Text,
    Json,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Load {
            workbook,
            store,
            force,
        } => load(&workbook, store, force),
        Command::Impact {
            cell,
            workbook,
            store,
            format,
        } => query_impact(&cell, &workbook, store, format),
        Command::Watch {
            workbook,
            store,
            debounce_ms,
        } => watch(workbook, store, debounce_ms),
        Command::Export {
            workbook,
            output,
            full,
        } => export(&workbook, &output, full),
    }
}

fn open_store(dir: Option<PathBuf>) -> Result<SnapshotStore> {
    SnapshotStore::new(dir).context("open snapshot store")
}

fn load(workbook: &Path, store: Option<PathBuf>, force: bool) -> Result<()> {
    let store = open_store(store)?;
    if !force && !store.needs_update(workbook)? {
        println!("Graph for {} is up to date", workbook.display());
        return Ok(());
    }

    let started = Instant::now();
    let stamp = WorkbookStamp::of(workbook)?;
    let graph = WorkbookAnalyzer::new()
        .analyze(workbook)
        .with_context(|| format!("build graph for {}", workbook.display()))?;
    store.save(workbook, &graph, stamp)?;

    println!(
        "Graph loaded: {} cells, {} dependencies in {:.2}s",
        graph.node_count(),
        graph.edge_count(),
        started.elapsed().as_secs_f64()
    );
    Ok(())
}

fn query_impact(
    cell: &str,
    workbook: &Path,
    store: Option<PathBuf>,
    format: OutputFormat,
) -> Result<()> {
    let source: CellAddress = cell.parse()?;
    let store = open_store(store)?;
    let Some(graph) = store.load(workbook) else {
        bail!(
            "no graph available for {}; run `cellgraph load` first",
            workbook.display()
        );
    };
    if store.needs_update(workbook).unwrap_or(false) {
        tracing::warn!("stored graph is older than {}", workbook.display());
    }

    let dependents: Vec<String> = impact(&graph, &source)
        .into_iter()
        .map(|a| a.to_string())
        .collect();

    match format {
        OutputFormat::Json => {
            let out = JsonCompactFormatter::new()
                .with_pretty(true)
                .format_impact(&source, &dependents)?;
            println!("{out}");
        }
        OutputFormat::Text if dependents.is_empty() => {
            println!("No cells depend on {source}");
        }
        OutputFormat::Text => {
            println!(
                "Cells {} would break if you change {source}",
                dependents.join(", ")
            );
        }
    }
    Ok(())
}

fn watch(workbook: PathBuf, store: Option<PathBuf>, debounce_ms: Option<u64>) -> Result<()> {
    let mut config = ResyncConfig::from_env();
    if let Some(ms) = debounce_ms {
        config = config.with_debounce(Duration::from_millis(ms));
    }
    let store = Arc::new(open_store(store)?);

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let coordinator = ResyncCoordinator::new(workbook.clone(), config);
        coordinator.add_sink(Arc::new(SnapshotSink::new(store, workbook.clone())));

        coordinator
            .rebuild()
            .await
            .with_context(|| format!("initial build of {}", workbook.display()))?;

        let _handle = coordinator.watch_file()?;
        let mut updates = coordinator.subscribe();
        println!("Watching {} for edits (Ctrl-C to exit)", workbook.display());

        loop {
            tokio::select! {
                update = updates.recv() => match update {
                    Some(update) => println!(
                        "Graph reloaded (generation {}): {} cells, {} dependencies",
                        update.generation, update.nodes, update.edges
                    ),
                    None => break,
                },
                _ = tokio::signal::ctrl_c() => break,
            }
        }
        Ok::<(), anyhow::Error>(())
    })
}

fn export(workbook: &Path, output: &Path, full: bool) -> Result<()> {
    let graph = WorkbookAnalyzer::new()
        .analyze(workbook)
        .with_context(|| format!("build graph for {}", workbook.display()))?;

    let formatter = if full {
        JsonCompactFormatter::full()
    } else {
        JsonCompactFormatter::new()
    };
    formatter.format_to_file(&graph, output)?;
    println!("JSON output: {}", output.display());
    Ok(())
}
