use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use gauge_config::ensure_workspace_config;
use gauge_core::ChangeRequest;
use gauge_embed::load_embedding_provider;
use gauge_engine::{AssessOptions, RiskEngine};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(author, version, about = "Change-risk assessment engine")]
struct Cli {
    #[arg(long, default_value = ".", help = "Workspace root holding .gauge/config.toml")]
    workspace: PathBuf,

    #[arg(help = "Path to a change request JSON file; reads stdin when omitted")]
    input: Option<PathBuf>,

    #[arg(long, help = "Assess a JSON array of change requests as a batch")]
    batch: bool,

    #[arg(long, help = "Bypass the result cache for this run")]
    force_refresh: bool,

    #[arg(long, help = "Record the assessed change in the similarity index")]
    index: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    run(cli).await
}

async fn run(cli: Cli) -> Result<()> {
    let config = ensure_workspace_config(&cli.workspace).with_context(|| {
        format!(
            "failed to load or create workspace config under {}",
            cli.workspace.display()
        )
    })?;

    let loaded = load_embedding_provider(&config.embeddings);
    tracing::info!(
        provider = %loaded.provider_name,
        model = %loaded.model_name,
        "embedding provider ready"
    );

    let engine = Arc::new(RiskEngine::from_config(&config, loaded.provider));
    let options = AssessOptions {
        force_refresh: cli.force_refresh,
    };

    let raw = read_input(cli.input.as_deref())?;
    let stdout = std::io::stdout();

    if cli.batch {
        let requests: Vec<ChangeRequest> =
            serde_json::from_str(&raw).context("failed to parse change request array JSON")?;
        let results = engine.clone().assess_batch(requests.clone(), options).await;

        let mut had_failure = false;
        for (request, result) in requests.iter().zip(results) {
            match result {
                Ok(assessment) => {
                    if cli.index {
                        index_assessed(&engine, request, &assessment).await;
                    }
                    serde_json::to_writer(&stdout, &assessment)
                        .context("failed to write assessment JSON")?;
                    println!();
                }
                Err(err) => {
                    had_failure = true;
                    eprintln!("assessment failed for {}: {err}", request.id);
                }
            }
        }

        if had_failure {
            std::process::exit(1);
        }
        return Ok(());
    }

    let request: ChangeRequest =
        serde_json::from_str(&raw).context("failed to parse change request JSON")?;
    let assessment = engine
        .assess(&request, options)
        .await
        .context("assessment failed")?;
    if cli.index {
        index_assessed(&engine, &request, &assessment).await;
    }

    serde_json::to_writer_pretty(&stdout, &assessment)
        .context("failed to write assessment JSON")?;
    println!();
    Ok(())
}

async fn index_assessed(
    engine: &RiskEngine,
    request: &ChangeRequest,
    assessment: &gauge_engine::Assessment,
) {
    if let Err(err) = engine.index_change(request, &assessment.risk).await {
        tracing::warn!(change_id = %request.id, error = %err, "failed to index assessed change");
    }
}

fn read_input(path: Option<&std::path::Path>) -> Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read change request from {}", path.display())),
        None => {
            let mut raw = String::new();
            std::io::stdin()
                .read_to_string(&mut raw)
                .context("failed to read change request from stdin")?;
            Ok(raw)
        }
    }
}
