use anyhow::Result;

use codescout::config::Config;
use codescout::indexer::IndexEngine;

pub async fn query_graph(
    query_type: String,
    target: String,
    project: String,
    format: String,
) -> Result<()> {
    let config = Config::from_project_dir(&project);
    let engine = IndexEngine::open(&project, config)?;
    let searcher = engine.searcher();

    let results = match query_type.as_str() {
        "callers" => searcher.callers(&target),
        "callees" => searcher.callees(&target),
        _ => {
            eprintln!("Unknown query type: {} (expected callers or callees)", query_type);
            std::process::exit(1);
        }
    };

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("No {} found for '{}'", query_type, target);
        return Ok(());
    }

    println!("{} of '{}':", query_type, target);
    for item in &results {
        println!("  {}", item);
    }

    Ok(())
}
