use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::batch::{BatchOptions, BatchOrchestrator, RequestDescriptor, RequestKey};
use crate::config::{Config, Settings};
use crate::credentials::ApiKey;
use crate::dispatch::executor::RequestExecutor;
use crate::dispatch::responses::ResponsesApi;
use crate::dispatch::transport::Transport;
use crate::error::{CommentaryError, ErrorKind};
use crate::progress::{UI_QUEUE_CAPACITY, UiMessage, UiReceiver, UiSender, offset_progress, ui_channel};
use crate::prompt::PromptBuilder;
use crate::report::{self, ReportRow};
use crate::response::ExecutionResult;

/// Error-map suffix for attribution overview failures.
pub const ATTRIBUTION_KEY: &str = "ATTRIBUTION_OVERVIEW";

const NO_ATTRIBUTION_WARNING: &str =
    "WARNING: Attribution overview skipped because no sector or country attribution data was found.";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Holding {
    pub ticker: String,
    pub security_name: String,
}

/// A portfolio after parsing and selection: the holdings that need commentary
/// plus optional attribution tables already rendered as markdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioInput {
    pub portcode: String,
    pub period: String,
    #[serde(default)]
    pub holdings: Vec<Holding>,
    #[serde(default)]
    pub sector_attribution: Option<String>,
    #[serde(default)]
    pub country_attribution: Option<String>,
}

impl PortfolioInput {
    fn has_attribution(&self) -> bool {
        let present = |t: &Option<String>| t.as_deref().is_some_and(|s| !s.trim().is_empty());
        present(&self.sector_attribution) || present(&self.country_attribution)
    }
}

#[derive(Debug, Clone)]
pub struct GenerationJob {
    pub portfolios: Vec<PortfolioInput>,
    pub settings: Settings,
    pub input_files: Vec<PathBuf>,
    /// Where results and the run log go; `None` skips writing.
    pub output_folder: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub output_path: Option<PathBuf>,
    pub log_path: Option<PathBuf>,
    pub total_commentary_requests: usize,
    pub total_attribution_requests: usize,
    pub total_requests: usize,
    pub errors: usize,
    pub duration_secs: f64,
    /// portcode -> ticker -> result
    pub commentary: BTreeMap<String, BTreeMap<String, ExecutionResult>>,
    /// portcode -> overview result
    pub attribution: BTreeMap<String, ExecutionResult>,
    /// "PORTCODE|TICKER" or "PORTCODE|ATTRIBUTION_OVERVIEW" -> messages
    pub error_log: BTreeMap<String, Vec<String>>,
}

pub fn build_security_requests(
    portfolios: &[PortfolioInput],
    prompts: &PromptBuilder,
) -> Vec<RequestDescriptor> {
    portfolios
        .iter()
        .flat_map(|p| {
            p.holdings.iter().map(move |h| RequestDescriptor {
                key: RequestKey::security(&p.portcode, &h.ticker),
                prompt: prompts.security_prompt(&h.ticker, &h.security_name, &p.period),
                security_name: Some(h.security_name.clone()),
            })
        })
        .collect()
}

/// One request per portfolio with attribution data. Portfolios without any
/// get a warning result up front and never reach the API.
pub fn build_attribution_requests(
    portfolios: &[PortfolioInput],
    prompts: &PromptBuilder,
) -> (Vec<RequestDescriptor>, BTreeMap<String, ExecutionResult>) {
    let mut requests = Vec::new();
    let mut skipped = BTreeMap::new();

    for p in portfolios {
        if !p.has_attribution() {
            skipped.insert(
                p.portcode.clone(),
                ExecutionResult::failure(ErrorKind::Internal, NO_ATTRIBUTION_WARNING),
            );
            continue;
        }
        let sector = p
            .sector_attribution
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or("No sector attribution data available.");
        let country = p
            .country_attribution
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or("No country attribution data available.");
        requests.push(RequestDescriptor {
            key: RequestKey::portfolio(&p.portcode),
            prompt: prompts.attribution_prompt(&p.portcode, &p.period, sector, country),
            security_name: None,
        });
    }

    (requests, skipped)
}

/// Route results back by position. Tickers may repeat across portfolios, so
/// the i-th result always belongs to the i-th request.
pub fn route_results(
    requests: &[RequestDescriptor],
    results: &[ExecutionResult],
) -> (
    BTreeMap<String, BTreeMap<String, ExecutionResult>>,
    BTreeMap<String, Vec<String>>,
) {
    let mut routed: BTreeMap<String, BTreeMap<String, ExecutionResult>> = BTreeMap::new();
    let mut errors: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for (request, result) in requests.iter().zip(results) {
        let ticker = request.key.ticker.clone().unwrap_or_default();
        if !result.is_success() {
            errors
                .entry(request.key.to_string())
                .or_default()
                .push(result.error_message().to_string());
        }
        routed
            .entry(request.key.portcode.clone())
            .or_default()
            .insert(ticker, result.clone());
    }

    (routed, errors)
}

/// Runs the security commentary phase and the optional attribution phase
/// through the same orchestrator, reporting one running total.
pub struct CommentaryPipeline<T> {
    transport: Arc<T>,
    config: Config,
    api_key: ApiKey,
}

impl<T: Transport> CommentaryPipeline<T> {
    pub fn new(transport: Arc<T>, config: Config, api_key: ApiKey) -> Self {
        Self {
            transport,
            config,
            api_key,
        }
    }

    fn orchestrator(&self, model: &str, developer_prompt: &str) -> BatchOrchestrator<Arc<T>> {
        let api = ResponsesApi::new(
            &self.config.base_url,
            self.api_key.expose(),
            model,
            developer_prompt,
        );
        let executor = RequestExecutor::new(self.transport.clone(), api, &self.config.rate_limit);
        BatchOrchestrator::new(Arc::new(executor))
    }

    pub async fn run(
        &self,
        job: &GenerationJob,
        ui: &UiSender,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, CommentaryError> {
        let started = chrono::Local::now();
        let clock = std::time::Instant::now();
        let settings = &job.settings;

        ui.status("Building requests...");
        let prompts = PromptBuilder {
            security_template: settings.prompt_template.clone(),
            attribution_template: settings.attribution_prompt_template.clone(),
            preferred_sources: settings.preferred_sources.clone(),
            prioritize_sources: settings.prioritize_sources,
        };

        let security_requests = build_security_requests(&job.portfolios, &prompts);
        let (attribution_requests, mut attribution) = if settings.run_attribution_overview {
            build_attribution_requests(&job.portfolios, &prompts)
        } else {
            (Vec::new(), BTreeMap::new())
        };

        let commentary_total = security_requests.len();
        let attribution_total = attribution_requests.len();
        let overall_total = commentary_total + attribution_total;
        let base_progress = ui.progress_fn();

        let base_options = BatchOptions {
            concurrency_limit: self.config.rate_limit.max_concurrent,
            web_search: true,
            preferred_domains: settings.preferred_sources.clone(),
            require_citations: settings.require_citations,
            ..BatchOptions::default()
        };

        ui.status(format!(
            "Generating commentary for {commentary_total} securities..."
        ));
        tracing::info!(
            securities = commentary_total,
            attribution = attribution_total,
            model = %settings.model,
            "starting generation"
        );

        let commentary_options = BatchOptions {
            reasoning_effort: settings.thinking_level,
            text_verbosity: settings.text_verbosity,
            ..base_options.clone()
        };
        let results = self
            .orchestrator(&settings.model, &settings.developer_prompt)
            .run(
                &security_requests,
                &commentary_options,
                Some(offset_progress(base_progress.clone(), 0, overall_total)),
                cancel,
            )
            .await?;

        let (commentary, mut error_log) = route_results(&security_requests, &results);

        for (portcode, skipped) in &attribution {
            error_log
                .entry(format!("{portcode}|{ATTRIBUTION_KEY}"))
                .or_default()
                .push(skipped.error_message().to_string());
        }

        if !attribution_requests.is_empty() {
            ui.status("Generating attribution overviews...");
            let attribution_options = BatchOptions {
                reasoning_effort: settings.attribution_thinking_level,
                text_verbosity: settings.attribution_text_verbosity,
                ..base_options
            };
            let overviews = self
                .orchestrator(
                    &settings.attribution_model,
                    &settings.attribution_developer_prompt,
                )
                .run(
                    &attribution_requests,
                    &attribution_options,
                    Some(offset_progress(base_progress, commentary_total, overall_total)),
                    cancel,
                )
                .await?;

            for (request, result) in attribution_requests.iter().zip(overviews) {
                if !result.is_success() {
                    error_log
                        .entry(format!("{}|{ATTRIBUTION_KEY}", request.key.portcode))
                        .or_default()
                        .push(result.error_message().to_string());
                }
                attribution.insert(request.key.portcode.clone(), result);
            }
        }

        let (output_path, log_path) = match &job.output_folder {
            Some(folder) => {
                ui.status("Writing output...");
                let rows = report_rows(&job.portfolios, &commentary);
                let output = report::write_results(folder, &rows, &attribution).await?;
                let log = report::write_run_log(
                    folder,
                    &job.input_files,
                    &output,
                    &error_log,
                    started,
                    chrono::Local::now(),
                )
                .await?;
                (Some(output), Some(log))
            }
            None => (None, None),
        };

        let summary = RunSummary {
            output_path,
            log_path,
            total_commentary_requests: commentary_total,
            total_attribution_requests: attribution_total,
            total_requests: overall_total,
            errors: error_log.len(),
            duration_secs: clock.elapsed().as_secs_f64(),
            commentary,
            attribution,
            error_log,
        };
        tracing::info!(
            total = summary.total_requests,
            errors = summary.errors,
            duration_secs = summary.duration_secs,
            "generation complete"
        );
        Ok(summary)
    }
}

/// One output row per input holding, in portfolio/holding order.
pub fn report_rows(
    portfolios: &[PortfolioInput],
    commentary: &BTreeMap<String, BTreeMap<String, ExecutionResult>>,
) -> Vec<ReportRow> {
    portfolios
        .iter()
        .flat_map(|p| {
            p.holdings.iter().map(move |h| {
                let result = commentary
                    .get(&p.portcode)
                    .and_then(|by_ticker| by_ticker.get(&h.ticker));
                ReportRow::new(&p.portcode, &h.ticker, &h.security_name, result)
            })
        })
        .collect()
}

/// Handle to a generation running on its own thread.
pub struct WorkerHandle {
    cancel: CancellationToken,
    receiver: UiReceiver,
    thread: JoinHandle<()>,
}

impl WorkerHandle {
    /// Cooperative: no new HTTP call starts after this; in-flight calls may
    /// still finish server-side.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn receiver(&mut self) -> &mut UiReceiver {
        &mut self.receiver
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    pub fn join(self) {
        if self.thread.join().is_err() {
            tracing::error!("generation worker thread panicked");
        }
    }
}

/// Start the pipeline on a dedicated thread with its own runtime, so the
/// caller's event loop stays free. Exactly one terminal message
/// (Finished / Cancelled / Failed) is sent when it ends.
pub fn spawn_worker<T: Transport>(pipeline: CommentaryPipeline<T>, job: GenerationJob) -> WorkerHandle {
    let (tx, receiver) = ui_channel(UI_QUEUE_CAPACITY);
    let cancel = CancellationToken::new();
    let token = cancel.clone();

    let thread = std::thread::spawn(move || {
        let outcome = match tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime.block_on(pipeline.run(&job, &tx, &token)),
            Err(e) => Err(CommentaryError::Io(e)),
        };

        let message = match outcome {
            Ok(summary) => UiMessage::Finished(Box::new(summary)),
            Err(e) if e.is_cancelled() => UiMessage::Cancelled,
            Err(e) => UiMessage::Failed(e.user_message()),
        };
        if tx.send_blocking(message).is_err() {
            tracing::warn!("ui receiver dropped before the run finished");
        }
    });

    WorkerHandle {
        cancel,
        receiver,
        thread,
    }
}
