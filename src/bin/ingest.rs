use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use media_ingest::embedder::gemini::GeminiEmbedder;
use media_ingest::index::{CountingIndex, PineconeIndex};
use media_ingest::telemetry::{self, Verbosity};
use media_ingest::{Cli, IngestConfig, RunDriver, RunSummary};
use tracing::{error, info};

fn main() -> ExitCode {
    let cli = Cli::parse();
    telemetry::init_subscriber(Verbosity::from_flags(cli.verbose, cli.quiet));

    let config = match cli.build_config() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "configuration rejected");
            eprintln!("Error: {err}");
            return ExitCode::from(2);
        }
    };

    match run(config) {
        Ok(summary) => {
            println!(
                "Ingestion complete. Processed: {}, Failed: {}",
                summary.processed, summary.failed
            );
            if summary.checkpoint_missed {
                println!(
                    "Warning: checkpoint {} was never found; no new records were processed.",
                    summary
                        .resumed_from
                        .as_ref()
                        .map(ToString::to_string)
                        .unwrap_or_default()
                );
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(error = %format!("{err:#}"), "ingestion aborted");
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(config: IngestConfig) -> Result<RunSummary> {
    let services = config.services.clone();
    let embedder = GeminiEmbedder::new(
        services.google_api_key.clone(),
        services.gemini_base_url.clone(),
        services.embed_model.clone(),
        services.task_type.clone(),
        services.http_timeout,
    )?;
    info!(model = embedder.model(), "embedding client ready");

    match services.pinecone_api_key.clone() {
        Some(api_key) if !config.dry_run => {
            let index = PineconeIndex::new(
                api_key,
                &services.control_url,
                config.index.name.clone(),
                services.namespace.clone(),
                services.http_timeout,
            )
            .context("failed to configure index client")?;
            RunDriver::new(config, embedder, index).run()
        }
        _ => {
            info!(
                checkpoint = %config.checkpoint_path.display(),
                failure_log = %config.failure_log_path.display(),
                "dry run: counting vectors instead of sending them"
            );
            let index = CountingIndex::new();
            let summary = RunDriver::new(config, embedder, &index).run()?;
            println!(
                "Dry run produced {} vectors ({} distinct ids).",
                index.upserted(),
                index.len()
            );
            Ok(summary)
        }
    }
}
