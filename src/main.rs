use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, Level};

mod cli;

#[derive(Parser)]
#[command(name = "codescout")]
#[command(version = "0.1.0")]
#[command(about = "Incremental hybrid code index: vectors, keywords and a call graph", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Index a project (incremental by default)
    Index {
        /// Project directory to index
        #[arg(default_value = ".")]
        project: String,

        /// Discard the existing index and rebuild from scratch
        #[arg(short, long)]
        rebuild: bool,
    },

    /// Search the index with hybrid vector + keyword ranking
    Search {
        /// Free-text query
        query: String,

        /// Project directory
        #[arg(short, long, default_value = ".")]
        project: String,

        /// Number of results
        #[arg(short = 'n', long, default_value_t = 5)]
        limit: usize,

        /// Vector weight (0.0 = keyword only, 1.0 = vector only)
        #[arg(short, long)]
        alpha: Option<f32>,

        /// Only return records under this path prefix
        #[arg(long)]
        path: Option<String>,

        /// Output format: json, text
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Query the call graph
    Query {
        /// Query type: callers, callees
        query_type: String,

        /// Target symbol name
        target: String,

        /// Project directory
        #[arg(short, long, default_value = ".")]
        project: String,

        /// Output format: json, text
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show index statistics
    Stats {
        /// Project directory
        #[arg(default_value = ".")]
        project: String,

        /// Output format: json, text
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

fn init_logging(debug: bool, verbose: bool) {
    let level = if debug {
        Level::DEBUG
    } else if verbose {
        Level::INFO
    } else {
        Level::WARN
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.debug, cli.verbose);

    match cli.command {
        Commands::Index { project, rebuild } => {
            info!("Indexing project: {}", project);
            cli::index::index_project(project, rebuild).await?;
        }

        Commands::Search {
            query,
            project,
            limit,
            alpha,
            path,
            format,
        } => {
            cli::search::search_index(query, project, limit, alpha, path, format).await?;
        }

        Commands::Query {
            query_type,
            target,
            project,
            format,
        } => {
            cli::query::query_graph(query_type, target, project, format).await?;
        }

        Commands::Stats { project, format } => {
            cli::stats::show_stats(project, format).await?;
        }
    }

    Ok(())
}
