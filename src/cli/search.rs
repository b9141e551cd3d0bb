use anyhow::Result;

use codescout::config::Config;
use codescout::indexer::IndexEngine;

pub async fn search_index(
    query: String,
    project: String,
    limit: usize,
    alpha: Option<f32>,
    path: Option<String>,
    format: String,
) -> Result<()> {
    let config = Config::from_project_dir(&project);
    let engine = IndexEngine::open(&project, config)?;
    let searcher = engine.searcher();

    let results = searcher.search(&query, limit, alpha, path.as_deref())?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("No results for '{}'", query);
        return Ok(());
    }

    println!("Results for '{}':\n", query);
    for (rank, result) in results.iter().enumerate() {
        println!(
            "{}. {} ({}) [score {:.3}]",
            rank + 1,
            result.meta.name,
            result.meta.kind.as_str(),
            result.score
        );
        println!(
            "   {}:{}-{}",
            result.meta.path,
            result.meta.start_line + 1,
            result.meta.end_line + 1
        );
        for line in result.snippet.lines() {
            println!("   | {}", line);
        }
        println!();
    }

    Ok(())
}
