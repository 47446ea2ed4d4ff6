//! `testdeck-worker` -- drives TestDeck's long-running backend operations
//! from the command line.
//!
//! ```text
//! testdeck-worker convert <document_id>
//! testdeck-worker execute <project_id> <task_uuid>
//! ```
//!
//! `convert` starts converting a raw document and polls it to a terminal
//! outcome. `execute` runs every case of an execution task one at a time
//! and prints the run summary.
//!
//! # Environment variables
//!
//! | Variable                     | Default                        | Description                        |
//! |------------------------------|--------------------------------|------------------------------------|
//! | `TESTDECK_API_URL`           | `http://localhost:8080/api/v1` | Backend base URL                   |
//! | `TESTDECK_API_TOKEN`         | --                             | Bearer token                       |
//! | `TESTDECK_HTTP_TIMEOUT_SECS` | `120`                          | Per-request timeout                |
//! | `POLL_INTERVAL_MS`           | `2000`                         | Delay between status polls         |
//! | `POLL_MAX_ATTEMPTS`          | `30`                           | Status calls per conversion        |
//! | `POLL_STALL_THRESHOLD`       | `5`                            | Polls at 0% before giving up       |
//! | `POLL_MAX_RETRIES`           | `3`                            | Consecutive transient errors       |
//! | `SAVE_DEBOUNCE_MS`           | `500`                          | Quiet period before saving edits   |
//! | `AUTO_REMARK_LANG`           | --                             | `cn`, `jp` or `en` to write remarks |
//! | `LOG_FORMAT`                 | --                             | `json` for JSON log lines          |

mod config;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context};
use testdeck_client::TestDeckApi;
use testdeck_core::types::{DbId, TaskRef};
use testdeck_orchestration::{
    EventBus, ExecutionOrchestrator, OrchestrationEvent, Severity, StatusPoller, TaskWorkspace,
    WriteCoalescer,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use crate::config::WorkerConfig;

const USAGE: &str = "usage: testdeck-worker convert <document_id> | execute <project_id> <task_uuid>";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Convert { document_id: DbId },
    Execute { task: TaskRef },
}

fn parse_command(args: &[String]) -> anyhow::Result<Command> {
    match args {
        [cmd, document_id] if cmd == "convert" => Ok(Command::Convert {
            document_id: document_id
                .parse()
                .with_context(|| format!("invalid document id '{document_id}'"))?,
        }),
        [cmd, project_id, task_uuid] if cmd == "execute" => {
            let project_id = project_id
                .parse()
                .with_context(|| format!("invalid project id '{project_id}'"))?;
            let task_uuid = Uuid::parse_str(task_uuid)
                .with_context(|| format!("invalid task uuid '{task_uuid}'"))?;
            Ok(Command::Execute {
                task: TaskRef::new(project_id, task_uuid),
            })
        }
        _ => bail!(USAGE),
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "testdeck_worker=info,testdeck_orchestration=info".into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match run(&args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "testdeck-worker failed");
            ExitCode::FAILURE
        }
    }
}

/// Returns whether the operation ended in a success outcome.
async fn run(args: &[String]) -> anyhow::Result<bool> {
    let command = parse_command(args)?;
    let config = WorkerConfig::from_env();

    let mut api = TestDeckApi::with_timeout(&config.api_url, config.http_timeout)
        .context("failed to build HTTP client")?;
    if let Some(token) = &config.api_token {
        api = api.with_token(token);
    }
    tracing::info!(api_url = api.api_url(), command = ?command, "Starting testdeck-worker");

    let api = Arc::new(api);
    let events = EventBus::default();
    spawn_event_logger(&events);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupt received, stopping after the current call");
                cancel.cancel();
            }
        });
    }

    match command {
        Command::Convert { document_id } => convert(api, &config, events, document_id, &cancel).await,
        Command::Execute { task } => execute(api, config, events, task, &cancel).await,
    }
}

async fn convert(
    api: Arc<TestDeckApi>,
    config: &WorkerConfig,
    events: EventBus,
    document_id: DbId,
    cancel: &CancellationToken,
) -> anyhow::Result<bool> {
    let poller = StatusPoller::new(api, config.poll.clone(), events);
    poller.start_conversion(document_id).await?;
    let report = poller.poll(document_id, cancel).await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    if let Some(error) = report.clone().into_error() {
        match report.outcome.severity() {
            Severity::Warning => tracing::warn!(error = %error, "Conversion not confirmed"),
            _ => tracing::error!(error = %error, "Conversion failed"),
        }
    }
    Ok(report.outcome.is_success())
}

async fn execute(
    api: Arc<TestDeckApi>,
    config: WorkerConfig,
    events: EventBus,
    task: TaskRef,
    cancel: &CancellationToken,
) -> anyhow::Result<bool> {
    let coalescer = Arc::new(WriteCoalescer::new(
        Arc::clone(&api),
        config.coalescer,
        events.clone(),
    ));
    let workspace = TaskWorkspace::new(Arc::clone(&api), Arc::clone(&coalescer));
    let orchestrator = ExecutionOrchestrator::new(
        Arc::clone(&api),
        Arc::clone(&api),
        Arc::clone(&coalescer),
        config.orchestrator,
        events,
    );

    let records = workspace
        .open_task(task)
        .await
        .with_context(|| format!("failed to load results of task {task}"))?;
    let mut items: Vec<_> = records
        .iter()
        .zip(1..)
        .map(|(record, index)| record.to_execution_item(index))
        .collect();

    let summary = orchestrator.run(task, &mut items, cancel).await;

    let mut saved = true;
    if let Err(e) = workspace.close().await {
        saved = false;
        match e.into_orchestration_error() {
            Some(error) => tracing::error!(error = %error, "Some results were not saved"),
            None => tracing::error!("Result buffer already closed"),
        }
    }

    println!("{}", serde_json::to_string_pretty(&summary)?);
    println!(
        "progress: {}%  pass rate: {}%",
        summary.progress_percent(),
        summary.pass_rate_percent()
    );
    Ok(saved && summary.nr == 0)
}

/// Logs orchestration events at debug level for operators.
fn spawn_event_logger(events: &EventBus) {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(OrchestrationEvent::PollProgress {
                    job_id,
                    attempt,
                    progress,
                }) => tracing::info!(job_id, attempt, progress, "Conversion in progress"),
                Ok(OrchestrationEvent::ItemFinished {
                    item_id,
                    result,
                    position,
                    total,
                    ..
                }) => tracing::info!(
                    item_id,
                    result = result.as_str(),
                    "Case {}/{} finished",
                    position + 1,
                    total,
                ),
                Ok(event) => tracing::debug!(?event, "Orchestration event"),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event logger lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}
