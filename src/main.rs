use std::path::Path;
use std::sync::Arc;

use anyhow::anyhow;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use propflow::catalog::EntityType;
use propflow::config::PipelineConfig;
use propflow::embedding::{EmbeddingClient, HttpEmbeddingClient, MockEmbeddingClient};
use propflow::loaders::{JsonFileLoader, Loader, SqliteLoader};
use propflow::logging;
use propflow::orchestrator::PipelineOrchestrator;
use propflow::output::NdjsonOutputWriter;
use propflow::state::StateManager;
use propflow::store::InMemoryTableStore;

#[derive(Parser)]
#[command(name = "propflow")]
#[command(about = "Medallion-tier real estate data pipeline")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to the pipeline config file
    #[arg(long, default_value = "propflow.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline over a source file
    Run {
        /// Source data file (.json, .ndjson, or .db/.sqlite)
        #[arg(long)]
        source: String,
        /// Entity type: property, neighborhood, wikipedia_article, location
        #[arg(long, default_value = "property")]
        entity: String,
        /// Table name inside a SQLite source
        #[arg(long)]
        source_table: Option<String>,
        /// Cap on records processed per phase
        #[arg(long)]
        limit: Option<usize>,
        /// Use the deterministic offline embedding client
        #[arg(long)]
        mock_embeddings: bool,
    },
    /// Resume an interrupted pipeline run
    Resume {
        /// Pipeline id to resume
        #[arg(long)]
        pipeline_id: String,
        /// Source data file, re-loaded if the bronze table was lost
        #[arg(long)]
        source: String,
        /// Entity type of the original run
        #[arg(long, default_value = "property")]
        entity: String,
        #[arg(long)]
        source_table: Option<String>,
        #[arg(long)]
        mock_embeddings: bool,
    },
    /// List recoverable runs, or show one run's snapshot
    Status {
        /// Pipeline id to inspect
        #[arg(long)]
        pipeline_id: Option<String>,
    },
    /// Delete completed/cancelled state files older than a threshold
    Cleanup {
        /// Age threshold in days
        #[arg(long, default_value = "30")]
        days: i64,
    },
}

fn parse_entity(name: &str) -> anyhow::Result<EntityType> {
    EntityType::parse(name).ok_or_else(|| anyhow!("unknown entity type '{}'", name))
}

fn make_loader(source: &str, source_table: Option<&str>) -> Arc<dyn Loader> {
    let is_sqlite = source.ends_with(".db") || source.ends_with(".sqlite");
    if is_sqlite {
        Arc::new(SqliteLoader::new(
            source,
            source_table.unwrap_or("listings"),
        ))
    } else {
        Arc::new(JsonFileLoader::new(source))
    }
}

fn make_embedding_client(
    config: &PipelineConfig,
    mock: bool,
) -> Option<Arc<dyn EmbeddingClient>> {
    if mock {
        return Some(Arc::new(MockEmbeddingClient::new(64)));
    }
    let api_key = config.embedding.api_key()?;
    match HttpEmbeddingClient::new(
        &config.embedding.provider_url,
        &api_key,
        &config.embedding.model,
        config.embedding.timeout(),
    ) {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            error!("could not build embedding client: {}", e);
            None
        }
    }
}

fn print_summary(summary: &propflow::orchestrator::PipelineRunSummary) {
    println!("\n📊 Pipeline results for {}:", summary.pipeline_id);
    println!("   Records processed: {}", summary.records_processed);
    if let Some(table) = &summary.final_table {
        println!("   Final table: {}", table);
    }
    for (key, value) in &summary.metrics {
        println!("   {}: {:.3}", key, value);
    }
    if let Some(report) = &summary.embedding_report {
        println!(
            "   Embeddings: {}/{} nodes ({} model)",
            report.embeddings_generated, report.nodes_total, report.model
        );
        if report.degraded {
            println!(
                "⚠️  Embedding success rate {:.1}% is below 80%",
                report.success_rate * 100.0
            );
        }
    }
    for file in &summary.output_files {
        println!("   Output file: {}", file.path.display());
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    let config = PipelineConfig::load(&cli.config)?;
    // Guard flushes the file appender on exit.
    let _guard = logging::init_logging(&config.log_dir);
    info!(config = %cli.config, environment = %config.environment, "configuration loaded");

    match cli.command {
        Commands::Run {
            source,
            entity,
            source_table,
            limit,
            mock_embeddings,
        } => {
            println!("🚀 Running pipeline for {}...", entity);
            let entity = parse_entity(&entity)?;
            let store = Arc::new(InMemoryTableStore::new());
            let loader = make_loader(&source, source_table.as_deref());
            let writer = Arc::new(NdjsonOutputWriter::new(&config.output_dir));
            let client = make_embedding_client(&config, mock_embeddings);

            let mut orchestrator =
                PipelineOrchestrator::new(config, store, loader, writer, entity)?
                    .with_record_limit(limit);
            if let Some(client) = client {
                orchestrator = orchestrator.with_embedding_client(client);
            }

            match orchestrator.run().await {
                Ok(summary) => {
                    println!("✅ Pipeline completed successfully");
                    print_summary(&summary);
                }
                Err(e) => {
                    error!("pipeline failed: {}", e);
                    println!("❌ Pipeline failed: {}", e);
                    println!(
                        "   Resume with: propflow resume --pipeline-id {} --source {}",
                        orchestrator.pipeline_id(),
                        source
                    );
                    std::process::exit(1);
                }
            }
        }
        Commands::Resume {
            pipeline_id,
            source,
            entity,
            source_table,
            mock_embeddings,
        } => {
            println!("🔄 Resuming pipeline {}...", pipeline_id);
            let entity = parse_entity(&entity)?;
            let store = Arc::new(InMemoryTableStore::new());
            let loader = make_loader(&source, source_table.as_deref());
            let writer = Arc::new(NdjsonOutputWriter::new(&config.output_dir));
            let client = make_embedding_client(&config, mock_embeddings);

            let mut orchestrator = PipelineOrchestrator::resume(
                config,
                store,
                loader,
                writer,
                entity,
                &pipeline_id,
            )?;
            if let Some(client) = client {
                orchestrator = orchestrator.with_embedding_client(client);
            }

            match orchestrator.run().await {
                Ok(summary) => {
                    println!("✅ Pipeline resumed and completed");
                    print_summary(&summary);
                }
                Err(e) => {
                    error!("resumed pipeline failed: {}", e);
                    println!("❌ Resumed pipeline failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Status { pipeline_id } => {
            let state_dir = Path::new(&config.state_dir);
            match pipeline_id {
                Some(id) => {
                    let snapshot = StateManager::load_snapshot(state_dir, &id)?;
                    println!("📋 Pipeline {}:", snapshot.pipeline_id);
                    println!("   State: {}", snapshot.state.as_str());
                    println!("   Environment: {}", snapshot.environment);
                    println!("   Records processed: {}", snapshot.records_processed);
                    if let Some(phase) = &snapshot.current_phase {
                        println!("   Current phase: {}", phase);
                    }
                    for (tier, table) in [
                        ("bronze", &snapshot.bronze_table),
                        ("silver", &snapshot.silver_table),
                        ("gold", &snapshot.gold_table),
                        ("enriched", &snapshot.enriched_table),
                    ] {
                        if let Some(table) = table {
                            println!("   {} table: {}", tier, table);
                        }
                    }
                    if let Some(message) = &snapshot.error_message {
                        println!(
                            "⚠️  Failed in phase '{}': {}",
                            snapshot.error_phase.as_deref().unwrap_or("unknown"),
                            message
                        );
                    }
                }
                None => {
                    let recoverable = StateManager::find_recoverable_pipelines(state_dir)?;
                    if recoverable.is_empty() {
                        println!("✅ No recoverable pipeline runs");
                    } else {
                        println!("📋 Recoverable pipeline runs:");
                        for snapshot in recoverable {
                            println!(
                                "   {} [{}] updated {} ({} records)",
                                snapshot.pipeline_id,
                                snapshot.state.as_str(),
                                snapshot.updated_at.format("%Y-%m-%d %H:%M:%S"),
                                snapshot.records_processed
                            );
                        }
                    }
                }
            }
        }
        Commands::Cleanup { days } => {
            let removed = StateManager::cleanup_old_states(Path::new(&config.state_dir), days)?;
            println!("🧹 Removed {} old state file(s)", removed);
        }
    }
    Ok(())
}
