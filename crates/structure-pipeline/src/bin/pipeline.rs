//! Structure pipeline command line
//!
//! Run with: cargo run -p structure-pipeline --features cli -- library.sdf --structure CCO

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use structure_pipeline::{
    BasicNormalizer, InMemorySearchIndex, Payload, Persistence, PipelineConfig, PipelineDb,
    PipelineSupervisor, ReceiverStatus, Structure, StructureReceiver,
};
use structure_pipeline::providers::JobStore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "structure-pipeline", version, about = "Normalize and persist chemical structures")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// SQLite database path, overrides the configuration
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Worker slots, overrides the configuration
    #[arg(short, long)]
    workers: Option<usize>,

    /// SMILES or molfile text to process as a single structure
    #[arg(short, long = "structure")]
    structures: Vec<String>,

    /// Payload files (.smi, .sdf, ...) to import
    files: Vec<PathBuf>,
}

/// Prints the outcome of a single-structure submission
struct ConsoleReceiver {
    input: String,
}

impl StructureReceiver for ConsoleReceiver {
    fn source_identifier(&self) -> String {
        "cli".to_string()
    }

    fn on_complete(&self, status: ReceiverStatus, message: Option<&str>, structure: Option<&Structure>) {
        match (status, structure) {
            (ReceiverStatus::Ok, Some(structure)) => println!(
                "  {} -> {} (atoms {}, bonds {}, charge {})",
                self.input,
                structure.formula,
                structure.atom_count,
                structure.bond_count,
                structure.charge
            ),
            (ReceiverStatus::Ok, None) => println!("  {} -> ok", self.input),
            (ReceiverStatus::Failed, _) => println!(
                "  {} -> FAILED: {}",
                self.input,
                message.unwrap_or("unknown error")
            ),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "structure_pipeline=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(database) = cli.database {
        config.database.path = database;
    }
    if let Some(workers) = cli.workers {
        config.processing.max_workers = Some(workers);
    }

    tracing::info!("Configuration loaded");
    tracing::info!("  - Database: {}", config.database.path.display());
    tracing::info!("  - Worker slots: {}", config.processing.worker_count());

    let db = Arc::new(PipelineDb::new(&config.database.path)?);
    let index = Arc::new(InMemorySearchIndex::new());
    let persistence = Persistence::with_database(db.clone(), index.clone());
    let pipeline =
        PipelineSupervisor::start(&config, persistence, Arc::new(BasicNormalizer::new())).await?;

    if !cli.structures.is_empty() {
        println!("Structures:");
    }
    for text in &cli.structures {
        let receiver = Arc::new(ConsoleReceiver {
            input: text.lines().next().unwrap_or_default().to_string(),
        });
        pipeline.submit_text(text, receiver);
    }

    let keys: Vec<(String, String)> = cli
        .files
        .iter()
        .map(|path| {
            let payload = Payload::from_path(path, "");
            (path.display().to_string(), pipeline.submit_payload(payload))
        })
        .collect();

    pipeline.wait_idle().await;
    tracing::debug!("Pipeline stats: {}", serde_json::to_string(&pipeline.stats())?);

    if !keys.is_empty() {
        println!("\nJobs:");
    }
    for (file, key) in &keys {
        match db.find_by_key(key)? {
            Some(job) => {
                println!(
                    "  {} [{}] {}: {} processed, {} failed",
                    file, job.id, job.status, job.processed, job.failed
                );
                if let Some(message) = &job.message {
                    println!("      {}", message);
                }
            }
            None => println!("  {}: no job recorded", file),
        }
    }

    let stats = db.stats()?;
    println!(
        "\nDatabase: {} jobs, {} records, {} structures; {} entries indexed",
        stats.jobs,
        stats.records,
        stats.structures,
        index.len()
    );

    pipeline.shutdown().await?;
    Ok(())
}
