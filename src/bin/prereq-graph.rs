//! prereq-graph CLI: build and inspect prerequisite graphs.
//!
//! Usage:
//!   prereq-graph build <graph> <file> --extractor-cmd <cmd> [--incremental] [--guidance text]
//!   prereq-graph validate <graph>
//!   prereq-graph detect-cycle <graph> <from> <to>
//!   prereq-graph levels <graph>
//!   prereq-graph reembed <graph>
//!   prereq-graph graphs

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use prereq_graph::{
    BuildConfig, BusinessKey, CommandExtractor, CommandExtractorConfig, EmbeddingError, EmbeddingProvider,
    GraphBuildCoordinator, GraphId, GraphStore, OpenStore, SqliteStore,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "prereq-graph",
    version,
    about = "Incremental prerequisite knowledge-graph builder"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Path to SQLite database file
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Path to a YAML build configuration
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract a document into a graph
    Build {
        /// Graph to build into
        graph: String,
        /// Document to read
        file: PathBuf,
        /// Command that turns a chunk into concepts and relations
        #[arg(long)]
        extractor_cmd: String,
        /// Timeout per chunk in seconds
        #[arg(long, default_value_t = 120)]
        extractor_timeout: u64,
        /// Merge with the persisted graph and deduplicate against it
        #[arg(long)]
        incremental: bool,
        /// Free-text guidance passed to the extractor
        #[arg(long)]
        guidance: Option<String>,
    },
    /// Check a graph for cycles, dangling edges, orphans and stale levels
    Validate {
        graph: String,
    },
    /// Report whether adding FROM -> TO would close a cycle
    DetectCycle {
        graph: String,
        from: String,
        to: String,
    },
    /// List nodes by topological level
    Levels {
        graph: String,
    },
    /// Re-embed nodes produced by another embedding model
    Reembed {
        graph: String,
    },
    /// List all graphs
    Graphs,
}

/// Stand-in provider when the binary is built without embeddings
struct NoEmbeddings;

#[async_trait]
impl EmbeddingProvider for NoEmbeddings {
    fn model_version(&self) -> &str {
        "none"
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Err(EmbeddingError::Unavailable(
            "built without the `embeddings` feature".to_string(),
        ))
    }
}

#[cfg(feature = "embeddings")]
fn embedding_provider() -> Result<Arc<dyn EmbeddingProvider>, String> {
    let embedder = prereq_graph::FastEmbedEmbedder::default_model()
        .map_err(|e| format!("Failed to load embedding model: {}", e))?;
    Ok(Arc::new(embedder))
}

#[cfg(not(feature = "embeddings"))]
fn embedding_provider() -> Result<Arc<dyn EmbeddingProvider>, String> {
    Ok(Arc::new(NoEmbeddings))
}

/// Get the default database path (~/.local/share/prereq-graph/graphs.db)
fn default_db_path() -> PathBuf {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join(".local/share"));
    data_dir.join("prereq-graph").join("graphs.db")
}

fn load_config(path: Option<PathBuf>) -> Result<BuildConfig, String> {
    let mut config = match path {
        Some(path) => BuildConfig::from_yaml_file(&path)
            .map_err(|e| format!("Failed to load config '{}': {}", path.display(), e))?,
        None => BuildConfig::default(),
    };
    if cfg!(not(feature = "embeddings")) && config.entity_resolution_enabled {
        tracing::warn!("built without embeddings; entity resolution disabled");
        config.entity_resolution_enabled = false;
    }
    Ok(config)
}

fn open_store(db: Option<PathBuf>) -> Result<Arc<SqliteStore>, String> {
    let db_path = db.unwrap_or_else(default_db_path);
    let store = SqliteStore::open(&db_path).map_err(|e| format!("Failed to open database: {}", e))?;
    Ok(Arc::new(store))
}

fn new_coordinator(
    store: Arc<SqliteStore>,
    config: BuildConfig,
    extractor: CommandExtractor,
    embedder: Arc<dyn EmbeddingProvider>,
) -> GraphBuildCoordinator {
    GraphBuildCoordinator::new(store, Arc::new(extractor), embedder, config)
}

/// Coordinator for commands that never extract
fn query_coordinator(store: Arc<SqliteStore>, config: BuildConfig) -> GraphBuildCoordinator {
    new_coordinator(
        store,
        config,
        CommandExtractor::new(CommandExtractorConfig::default()),
        Arc::new(NoEmbeddings),
    )
}

#[allow(clippy::too_many_arguments)]
async fn cmd_build(
    store: Arc<SqliteStore>,
    config: BuildConfig,
    graph: &str,
    file: &PathBuf,
    extractor_cmd: &str,
    extractor_timeout: u64,
    incremental: bool,
    guidance: Option<&str>,
) -> i32 {
    let text = match std::fs::read_to_string(file) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("Error: cannot read '{}': {}", file.display(), e);
            return 1;
        }
    };
    let Some(mut extractor_config) = CommandExtractorConfig::from_command_line(extractor_cmd) else {
        eprintln!("Error: --extractor-cmd is empty");
        return 1;
    };
    extractor_config.timeout_seconds = extractor_timeout;

    let embedder = match embedding_provider() {
        Ok(embedder) => embedder,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    let coordinator = new_coordinator(store, config, CommandExtractor::new(extractor_config), embedder);
    match coordinator
        .build_from_document(&GraphId::from(graph), &text, incremental, guidance)
        .await
    {
        Ok(report) => {
            match serde_json::to_string_pretty(&report) {
                Ok(json) => println!("{}", json),
                Err(e) => eprintln!("Warning: could not render report: {}", e),
            }
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_validate(coordinator: &GraphBuildCoordinator, graph: &str) -> i32 {
    match coordinator.validate_graph(&GraphId::from(graph)) {
        Ok(validation) => {
            let stats = &validation.stats;
            println!(
                "{} nodes, {} edges, max level {}, {} orphan(s), {} embedded",
                stats.node_count,
                stats.edge_count,
                stats.max_level.map_or("-".to_string(), |l| l.to_string()),
                stats.orphan_count,
                stats.nodes_with_embeddings
            );
            for error in &validation.errors {
                println!("error: {}", error);
            }
            for warning in &validation.warnings {
                println!("warning: {}", warning);
            }
            if validation.is_valid {
                println!("Graph '{}' is valid", graph);
                0
            } else {
                println!("Graph '{}' is invalid", graph);
                2
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_detect_cycle(coordinator: &GraphBuildCoordinator, graph: &str, from: &str, to: &str) -> i32 {
    let (from_key, to_key) = (BusinessKey::from_name(from), BusinessKey::from_name(to));
    match coordinator.detect_cycle(&GraphId::from(graph), &from_key, &to_key) {
        Ok(true) => {
            println!("'{}' -> '{}' would create a cycle", from_key, to_key);
            0
        }
        Ok(false) => {
            println!("'{}' -> '{}' is safe", from_key, to_key);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_levels(coordinator: &GraphBuildCoordinator, graph: &str) -> i32 {
    let nodes = match coordinator.graph_levels(&GraphId::from(graph)) {
        Ok(nodes) => nodes,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    if nodes.is_empty() {
        println!("Graph '{}' has no nodes.", graph);
        return 0;
    }
    println!("{:>5}  {:>10}  {:<32}  {}", "LEVEL", "DEPENDENTS", "KEY", "NAME");
    println!("{}", "-".repeat(72));
    for node in nodes {
        println!(
            "{:>5}  {:>10}  {:<32}  {}",
            node.level.map_or("?".to_string(), |l| l.to_string()),
            node.dependents_count.map_or("?".to_string(), |d| d.to_string()),
            node.key,
            node.display_name
        );
    }
    0
}

async fn cmd_reembed(store: Arc<SqliteStore>, config: BuildConfig, graph: &str) -> i32 {
    let embedder = match embedding_provider() {
        Ok(embedder) => embedder,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let coordinator = new_coordinator(
        store,
        config,
        CommandExtractor::new(CommandExtractorConfig::default()),
        embedder,
    );
    match coordinator.reembed_graph(&GraphId::from(graph)).await {
        Ok(report) => {
            println!(
                "Re-embedded {} of {} node(s) ({} with nothing to embed)",
                report.reembedded, report.examined, report.skipped_empty
            );
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_graphs(store: &SqliteStore) -> i32 {
    match store.list_graphs() {
        Ok(ids) if ids.is_empty() => {
            println!("No graphs defined.");
            0
        }
        Ok(ids) => {
            for id in ids {
                println!("{}", id);
            }
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let (store, config) = match open_store(cli.db).and_then(|store| Ok((store, load_config(cli.config)?))) {
        Ok(opened) => opened,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let code = match cli.command {
        Commands::Build {
            graph,
            file,
            extractor_cmd,
            extractor_timeout,
            incremental,
            guidance,
        } => {
            cmd_build(
                store,
                config,
                &graph,
                &file,
                &extractor_cmd,
                extractor_timeout,
                incremental,
                guidance.as_deref(),
            )
            .await
        }
        Commands::Validate { graph } => cmd_validate(&query_coordinator(store, config), &graph),
        Commands::DetectCycle { graph, from, to } => {
            cmd_detect_cycle(&query_coordinator(store, config), &graph, &from, &to)
        }
        Commands::Levels { graph } => cmd_levels(&query_coordinator(store, config), &graph),
        Commands::Reembed { graph } => cmd_reembed(store, config, &graph).await,
        Commands::Graphs => cmd_graphs(&store),
    };
    std::process::exit(code);
}
