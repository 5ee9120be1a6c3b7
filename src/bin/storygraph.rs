use clap::{Parser, Subcommand};
use storygraph::config::{load_config_from_yaml, EngineConfig};
use storygraph::graph::layout::{LabelFilter, LayoutEngine};
use storygraph::script::loader::load_tree_from_json;
use storygraph::sync::memory::{HeadlessRenderer, InMemoryLockService, InMemoryScriptStore, StaticTreeParser};
use storygraph::sync::{Collaborators, ParseOutput, SyncController};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use anyhow::{Context as AnyhowContext, Result};
use serde_json::json;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Engine configuration (YAML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lay out a parsed script tree and print the graph as JSON
    Layout {
        /// Parser output (JSON)
        #[arg(long, short)]
        tree: PathBuf,

        /// Only lay out this label
        #[arg(long, short)]
        label: Option<String>,
    },

    /// Search the script and report which node owns each hit
    Search {
        #[arg(long, short)]
        tree: PathBuf,

        /// Script source the tree was parsed from
        #[arg(long, short)]
        script: PathBuf,

        query: String,
    },

    /// Print a node's editable excerpt: metadata, indent and normalized body
    Excerpt {
        #[arg(long, short)]
        tree: PathBuf,

        #[arg(long, short)]
        script: PathBuf,

        node_id: String,
    },
}

const SCRIPT_ID: &str = "cli";

fn path_str(path: &Path) -> Result<&str> {
    path.to_str()
        .with_context(|| format!("Path is not valid UTF-8: {}", path.display()))
}

async fn open_controller(config: EngineConfig, tree: &Path, script: &Path) -> Result<SyncController> {
    let tree = load_tree_from_json(path_str(tree)?)?;
    let source = fs::read_to_string(script)
        .with_context(|| format!("Failed to read script from {}", script.display()))?;

    let store = InMemoryScriptStore::new();
    store.insert_script(SCRIPT_ID, &source);
    let parser = StaticTreeParser::new(ParseOutput {
        tree,
        line_count: source.lines().count(),
    });

    let mut controller = SyncController::new(SCRIPT_ID, config, Collaborators {
        parser: Arc::new(parser),
        store: Arc::new(store),
        locks: Arc::new(InMemoryLockService::default()),
        renderer: Arc::new(HeadlessRenderer::new()),
    });
    controller.load().await?;
    Ok(controller)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config_from_yaml(path_str(path)?)?,
        None => EngineConfig::default(),
    };

    match cli.command {
        Commands::Layout { tree, label } => {
            let tree = load_tree_from_json(path_str(&tree)?)?;
            let filter = label.map(LabelFilter::Only).unwrap_or_default();

            let engine = LayoutEngine::new(config.layout);
            let graph = engine.layout(&tree, &filter)?;
            info!("Laid out {} nodes, {} edges", graph.nodes.len(), graph.edges.len());
            println!("{}", serde_json::to_string_pretty(&graph)?);
        }

        Commands::Search { tree, script, query } => {
            let controller = open_controller(config, &tree, &script).await?;
            let hits = controller.search(&query);
            info!("{} hits for {:?}", hits.len(), query);
            println!("{}", serde_json::to_string_pretty(&hits)?);
        }

        Commands::Excerpt { tree, script, node_id } => {
            let mut controller = open_controller(config, &tree, &script).await?;
            let session = controller.begin_edit(&node_id).await?;
            println!("{}", serde_json::to_string_pretty(&json!({
                "node_id": session.node_id,
                "start_line": session.start_line,
                "end_line": session.end_line,
                "metadata": session.metadata,
                "indent": session.indent,
                "body": session.body,
            }))?);
        }
    }

    Ok(())
}
