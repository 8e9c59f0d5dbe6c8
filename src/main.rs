use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde::Deserialize;

use contribnote::config::{Config, Settings};
use contribnote::credentials::{SessionStore, resolve_api_key};
use contribnote::dispatch::transport::ReqwestTransport;
use contribnote::progress::UiMessage;
use contribnote::reasoning::{AVAILABLE_MODELS, DEFAULT_MODEL, validate_models};
use contribnote::worker::{CommentaryPipeline, GenerationJob, PortfolioInput, spawn_worker};

const UI_TICK: Duration = Duration::from_millis(100);

/// Generate cited performance commentary for portfolio holdings.
#[derive(Debug, Parser)]
#[command(name = "contribnote", version)]
struct Args {
    /// Job file: {"portfolios": [...], "input_files": [...]}
    #[arg(long)]
    input: PathBuf,

    /// Output folder (defaults to the saved setting, then the current directory)
    #[arg(long)]
    output: Option<PathBuf>,

    /// Settings file
    #[arg(long, env = "CONTRIBNOTE_CONFIG")]
    config: Option<PathBuf>,

    /// Also generate a per-portfolio attribution overview
    #[arg(long)]
    attribution: bool,
}

#[derive(Debug, Deserialize)]
struct JobFile {
    portfolios: Vec<PortfolioInput>,
    #[serde(default)]
    input_files: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    dotenvy::dotenv().ok();
    let args = Args::parse();

    validate_models(AVAILABLE_MODELS, DEFAULT_MODEL)?;

    let settings_path = args.config.clone().unwrap_or_else(Settings::default_path);
    let mut settings = Settings::load(&settings_path);
    if args.attribution {
        settings.run_attribution_overview = true;
    }

    let raw = tokio::fs::read_to_string(&args.input)
        .await
        .with_context(|| format!("reading job file {}", args.input.display()))?;
    let job_file: JobFile = serde_json::from_str(&raw)
        .with_context(|| format!("parsing job file {}", args.input.display()))?;

    let output_folder = args
        .output
        .or_else(|| {
            let saved = settings.output_folder.trim();
            (!saved.is_empty()).then(|| PathBuf::from(saved))
        })
        .unwrap_or_else(|| PathBuf::from("."));

    let api_key = resolve_api_key(&SessionStore::default(), None)?;
    tracing::info!(source = api_key.source.as_str(), "api key resolved");

    let transport = Arc::new(ReqwestTransport::new()?);
    let pipeline = CommentaryPipeline::new(transport, Config::from_env(), api_key);
    let input_files = if job_file.input_files.is_empty() {
        vec![args.input.clone()]
    } else {
        job_file.input_files
    };
    let job = GenerationJob {
        portfolios: job_file.portfolios,
        settings,
        input_files,
        output_folder: Some(output_folder),
    };

    tracing::info!("contribnote starting");
    let mut worker = spawn_worker(pipeline, job);
    let mut ticker = tokio::time::interval(UI_TICK);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let outcome = 'ui: loop {
        tokio::select! {
            result = &mut ctrl_c, if !worker.is_cancel_requested() => {
                if let Err(e) = result {
                    tracing::warn!("failed to listen for ctrl-c: {e}");
                }
                eprintln!("Cancelling...");
                worker.cancel();
            }
            _ = ticker.tick() => {
                let drained = worker.receiver().drain();
                if let Some(event) = drained.latest_progress {
                    eprintln!("[{:5.1}%] {}", event.percent(), event.status_line());
                }
                for message in drained.updates {
                    match message {
                        UiMessage::Status(text) => eprintln!("{text}"),
                        terminal if terminal.is_terminal() => break 'ui Some(terminal),
                        _ => {}
                    }
                }
                if drained.disconnected {
                    break 'ui None;
                }
            }
        }
    };

    tokio::task::spawn_blocking(move || worker.join()).await?;

    match outcome {
        Some(UiMessage::Finished(summary)) => {
            println!(
                "Generated {} commentaries and {} attribution overviews in {:.1}s ({} errors)",
                summary.total_commentary_requests,
                summary.total_attribution_requests,
                summary.duration_secs,
                summary.errors
            );
            if let Some(path) = &summary.output_path {
                println!("Output: {}", path.display());
            }
            if let Some(path) = &summary.log_path {
                println!("Log: {}", path.display());
            }
        }
        Some(UiMessage::Cancelled) => {
            println!("Generation cancelled.");
        }
        Some(UiMessage::Failed(message)) => anyhow::bail!("generation failed: {message}"),
        _ => anyhow::bail!("generation worker exited without a result"),
    }

    tracing::info!("contribnote shutting down");
    Ok(())
}
