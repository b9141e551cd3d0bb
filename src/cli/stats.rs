use anyhow::Result;

use codescout::config::Config;
use codescout::indexer::IndexEngine;

pub async fn show_stats(project: String, format: String) -> Result<()> {
    let config = Config::from_project_dir(&project);

    let engine = IndexEngine::open(&project, config)?;
    let stats = engine.stats()?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("CodeScout Statistics v0.1.0");
    println!("Project: {}", project);

    println!("\n📊 Index Statistics:");
    println!("  Indexed files: {}", stats.files);
    println!("  Records: {}", stats.records);
    println!("  Vector entries: {}", stats.vector_entries);
    println!("  Keyword documents: {}", stats.keyword_documents);
    println!(
        "  Call graph: {} nodes, {} edges, {} pending",
        stats.graph_nodes, stats.graph_edges, stats.graph_pending
    );
    if let Some(at) = &stats.indexed_at {
        println!("  Last indexed: {}", at);
    } else {
        println!("  Last indexed: never");
    }

    Ok(())
}
