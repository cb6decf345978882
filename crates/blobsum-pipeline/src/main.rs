//! Blobsum - batch object checksum runner

use anyhow::{Context, Result};
use blobsum_common::logging::{init_logging, LogConfig, LogLevel};
use blobsum_pipeline::coordinator::{connect_fetcher, BatchCoordinator};
use blobsum_pipeline::descriptors::DescriptorGenerator;
use blobsum_pipeline::inbound::InboundBatch;
use blobsum_pipeline::record_store::{DynamoRecordStore, MemoryRecordStore, RecordStore};
use blobsum_pipeline::storage::{load_aws_config, S3ObjectStore};
use blobsum_pipeline::PipelineConfig;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Longest validity S3 accepts for a presigned URL
const MAX_EXPIRY_MINS: u64 = 7 * 24 * 60;

#[derive(Parser, Debug)]
#[command(name = "blobsum")]
#[command(author, version, about = "Stream objects, checksum them, record the results")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Parser, Debug)]
enum Command {
    /// Process one batch of task descriptors and print its summary as JSON
    Process {
        /// Descriptors; read from stdin when none are given
        descriptors: Vec<String>,

        /// File with one descriptor per line
        #[arg(short, long, conflicts_with = "sqs_event")]
        input: Option<PathBuf>,

        /// SQS event JSON document
        #[arg(long)]
        sqs_event: Option<PathBuf>,

        /// Keep records in memory instead of writing them to the table
        #[arg(long)]
        dry_run: bool,
    },

    /// Print one descriptor per object in the configured bucket
    Generate {
        /// Validity of signed URLs in minutes (at most 7 days)
        #[arg(long, default_value_t = 60, value_parser = clap::value_parser!(u64).range(1..=MAX_EXPIRY_MINS))]
        expiry_mins: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = LogConfig {
        level: if cli.verbose {
            LogLevel::Debug
        } else {
            LogLevel::Info
        },
        ..LogConfig::default()
    };

    // Environment variables take precedence
    let log_config = log_config.with_env().context("Invalid logging configuration")?;
    let _guard = init_logging(&log_config)?;

    let config = PipelineConfig::from_env().context("Failed to load configuration")?;

    match cli.command {
        Command::Process {
            descriptors,
            input,
            sqs_event,
            dry_run,
        } => process(&config, read_batch(descriptors, input, sqs_event)?, dry_run).await,
        Command::Generate { expiry_mins } => generate(&config, expiry_mins).await,
    }
}

fn read_batch(
    descriptors: Vec<String>,
    input: Option<PathBuf>,
    sqs_event: Option<PathBuf>,
) -> Result<InboundBatch> {
    if let Some(path) = sqs_event {
        let json = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read SQS event from {}", path.display()))?;
        return Ok(InboundBatch::from_sqs_event_json(&json)?);
    }

    if let Some(path) = input {
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read descriptors from {}", path.display()))?;
        return Ok(InboundBatch::from_lines(&text));
    }

    if !descriptors.is_empty() {
        return Ok(InboundBatch::from_args(descriptors));
    }

    let text = std::io::read_to_string(std::io::stdin()).context("Failed to read stdin")?;
    Ok(InboundBatch::from_lines(&text))
}

async fn process(config: &PipelineConfig, batch: InboundBatch, dry_run: bool) -> Result<()> {
    let descriptors = batch.descriptors();
    info!(messages = descriptors.len(), mode = %config.mode, dry_run, "Starting batch");

    let sdk_config = load_aws_config(&config.storage).await;
    let fetcher = connect_fetcher(config, &sdk_config)?;

    let (records, table): (Arc<dyn RecordStore>, String) = if dry_run {
        let table = config
            .record_table
            .clone()
            .unwrap_or_else(|| "dry-run".to_string());
        (Arc::new(MemoryRecordStore::new()), table)
    } else {
        let table = config.record_table_name()?.to_string();
        (Arc::new(DynamoRecordStore::new(&sdk_config)), table)
    };

    let coordinator = BatchCoordinator::from_config(config, fetcher, records, table);
    let summary = coordinator.process(&descriptors).await?;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn generate(config: &PipelineConfig, expiry_mins: u64) -> Result<()> {
    let bucket = config
        .storage
        .bucket
        .clone()
        .context("S3_BUCKET must be set to generate descriptors")?;

    let sdk_config = load_aws_config(&config.storage).await;
    let catalog = S3ObjectStore::new(&sdk_config, &config.storage);

    let generated = DescriptorGenerator::new(Arc::new(catalog), bucket)
        .with_expiry(Duration::from_secs(expiry_mins.saturating_mul(60)))
        .generate(config.mode)
        .await?;

    for descriptor in &generated.descriptors {
        println!("{}", descriptor);
    }

    Ok(())
}
