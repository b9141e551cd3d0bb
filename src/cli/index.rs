use anyhow::Result;
use tracing::info;

use codescout::config::Config;
use codescout::indexer::IndexEngine;

pub async fn index_project(project: String, rebuild: bool) -> Result<()> {
    info!("Indexing project: {}", project);

    let config = Config::from_project_dir(&project);

    println!("CodeScout Indexer v0.1.0");
    println!("Project: {}", project);
    println!(
        "Config: {}",
        if config.project.name != "unnamed-project" {
            "loaded"
        } else {
            "default"
        }
    );
    println!("Rebuild: {}", rebuild);

    let engine = IndexEngine::open(&project, config)?;
    let summary = engine.index(rebuild)?;

    println!("\nIndexing complete in {} ms", summary.duration_ms);
    println!(
        "  Files: {} added, {} modified, {} deleted, {} unchanged",
        summary.files_added, summary.files_modified, summary.files_deleted, summary.files_unchanged
    );
    println!(
        "  Records: {} indexed, {} removed",
        summary.records_indexed, summary.records_removed
    );
    if summary.files_unreadable > 0 {
        println!("  Unreadable files skipped: {}", summary.files_unreadable);
    }
    if summary.parse_failures > 0 {
        println!("  Parse failures: {}", summary.parse_failures);
    }
    if summary.vector_skipped > 0 {
        println!(
            "  Vector entries skipped (embedding failures): {}",
            summary.vector_skipped
        );
    }

    Ok(())
}
