//! Nodeflow runner
//!
//! Loads a graph document, runs it to completion and prints the results of
//! every node keyed by instance name.
//!
//! ```text
//! nodeflow <graph.json> [--config <config.json>]
//! ```

mod config;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use nodeflow_engine::{validate_graph, Graph, NodeEngineError, RunOutcome, RunReport};
use nodeflow_nodes::builtin_registry;

use config::{CliConfig, ConfigError};

/// Default config location, relative to the working directory
const DEFAULT_CONFIG_PATH: &str = "nodeflow.json";

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Engine(#[from] NodeEngineError),
    #[error("Failed to render results: {0}")]
    Render(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "nodeflow")]
#[command(version, about = "Run a nodeflow graph document and print its results", long_about = None)]
struct Args {
    /// Graph document to run
    #[arg(value_name = "GRAPH")]
    graph: PathBuf,

    /// Runner configuration; defaults apply when the file is missing
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Logging comes after the config so its filter can be used
    let config = match CliConfig::load(&args.config).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {}", args.config.display(), e);
            return ExitCode::from(2);
        }
    };

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.log_filter.as_str()),
    )
    .format_timestamp_millis()
    .init();

    match run(&args, config).await {
        Ok(outcome) if outcome.is_finished() => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: &Args, config: CliConfig) -> Result<RunOutcome, CliError> {
    let pretty = config.pretty;
    let mut graph = Graph::with_config(builtin_registry(), config.engine);

    let load = graph.load_from_file(&args.graph).await?;
    log::info!(
        "Loaded {}: {} nodes, {} connections, {} issues",
        args.graph.display(),
        load.nodes_loaded,
        load.connections_loaded,
        load.issues.len()
    );
    for problem in validate_graph(&graph) {
        log::warn!("{}", problem);
    }

    let report = graph.run_to_completion().await?;
    match &report.outcome {
        RunOutcome::Finished => log::info!("Run {} finished", report.run_id),
        RunOutcome::Stopped => log::warn!("Run {} stopped", report.run_id),
        RunOutcome::Deadlock { stranded } => {
            let names: Vec<&str> = stranded
                .iter()
                .filter_map(|id| graph.node_name(*id))
                .collect();
            log::error!("Run {} deadlocked; stranded: {}", report.run_id, names.join(", "));
        }
        RunOutcome::Incomplete { pending } => {
            let names: Vec<&str> = pending
                .iter()
                .filter_map(|id| graph.node_name(*id))
                .collect();
            log::error!(
                "Run {} ended with pending outputs: {}",
                report.run_id,
                names.join(", ")
            );
        }
        RunOutcome::Failed { node, error } => {
            let name = node.and_then(|id| graph.node_name(id)).unwrap_or("<graph>");
            log::error!("Run {} failed at {}: {}", report.run_id, name, error);
        }
    }

    let rendered = render_results(&graph, &report)?;
    let text = if pretty {
        serde_json::to_string_pretty(&rendered)?
    } else {
        serde_json::to_string(&rendered)?
    };
    println!("{}", text);

    Ok(report.outcome)
}

/// Results keyed by node instance name
fn render_results(graph: &Graph, report: &RunReport) -> Result<serde_json::Value, CliError> {
    let mut nodes = serde_json::Map::new();
    for (id, outputs) in &report.results {
        let Some(name) = graph.node_name(*id) else {
            continue;
        };
        nodes.insert(name.to_string(), serde_json::to_value(outputs)?);
    }

    Ok(serde_json::json!({
        "outcome": report.outcome,
        "results": nodes,
    }))
}
