//! CLI command definitions and argument parsing

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use ota_sync::{
    CheckInterval, CheckTrigger, EventRouter, HttpTransport, Preferences, RefreshOutcome,
    SessionController, SessionState, SyncConfig, SyncError, TokioScheduler, UpdateWorker,
    WorkerHandle,
};

use crate::engine::{ConsoleObserver, LoggingEngine};
use crate::output::{OutputFormat, OutputFormatter, StatusReport};
use crate::ExitCode;

/// OTA sync CLI - check for and track system updates
#[derive(Parser, Debug)]
#[command(name = "ota-syncctl")]
#[command(version, about = "OTA sync CLI - check for and track system updates")]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    pub output: OutputFormat,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Config file path
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Manifest URL, overrides the config file
    #[arg(long, global = true, env = "OTA_SYNC_MANIFEST_URL")]
    pub url: Option<String>,
}

impl Cli {
    /// Execute the CLI command with a pre-loaded configuration
    pub async fn execute_with_config(self, config: SyncConfig) -> anyhow::Result<ExitCode> {
        let formatter = OutputFormatter::new(self.output, self.verbose);
        let command = self.command.name();

        let result = match self.command {
            Commands::Check => check(config, &formatter).await,
            Commands::List(args) => args.execute(config, &formatter).await,
            Commands::Status => status(config, &formatter).await,
            Commands::Interval(args) => args.execute(config, &formatter).await,
            Commands::Watch => watch(config, &formatter).await,
        };

        match result {
            Ok(code) => Ok(code),
            Err(e) => {
                let code = ExitCode::from(&e);
                if code != ExitCode::Cancelled {
                    let message = formatter.format_error_with_code(&e, code, command);
                    if !message.is_empty() {
                        eprintln!("{message}");
                    }
                }
                Ok(code)
            }
        }
    }
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check the update server now
    Check,
    /// List known updates
    List(ListArgs),
    /// Show last check time, interval and the watched update
    Status,
    /// Show or change the periodic check interval
    Interval(IntervalArgs),
    /// Keep running and check on the configured schedule
    Watch,
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Check => "check",
            Commands::List(_) => "list",
            Commands::Status => "status",
            Commands::Interval(_) => "interval",
            Commands::Watch => "watch",
        }
    }
}

/// Arguments for the list command
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Only show updates still offered by the server
    #[arg(long)]
    pub online_only: bool,
}

impl ListArgs {
    async fn execute(self, config: SyncConfig, formatter: &OutputFormatter) -> Result<ExitCode, SyncError> {
        let ctx = Context::start(config)?;
        let result = async {
            ctx.controller.connect(ctx.handle.clone()).await?;
            ctx.controller.get_updates().await
        }
        .await;
        ctx.stop().await;

        let mut updates = result?;
        if self.online_only {
            updates.retain(|u| u.available_online);
        }
        println!("{}", formatter.format_updates(&updates));
        Ok(ExitCode::Success)
    }
}

/// Arguments for the interval command
#[derive(Args, Debug)]
pub struct IntervalArgs {
    /// New interval: never, daily, weekly or monthly
    pub interval: Option<CheckInterval>,
}

impl IntervalArgs {
    async fn execute(self, config: SyncConfig, formatter: &OutputFormatter) -> Result<ExitCode, SyncError> {
        let ctx = Context::start(config)?;
        let result = async {
            if let Some(interval) = self.interval {
                ctx.controller.set_check_interval(interval).await?;
            }
            Ok::<_, SyncError>(ctx.controller.check_interval().await)
        }
        .await;
        ctx.stop().await;

        let interval = result?;
        if self.interval.is_some() {
            formatter.success(&format!("Check interval set to {interval}"));
        } else {
            println!("{}", formatter.format_interval(interval));
        }
        Ok(ExitCode::Success)
    }
}

async fn check(config: SyncConfig, formatter: &OutputFormatter) -> Result<ExitCode, SyncError> {
    let ctx = Context::start(config)?;
    formatter.progress(&format!("Checking {}", ctx.controller.store().path().display()));

    let result = async {
        if ctx.controller.store().exists() {
            ctx.controller.connect(ctx.handle.clone()).await?;
            ctx.controller.refresh(true).await
        } else {
            // Queued while disconnected and run by connect.
            ctx.controller.refresh(true).await?;
            ctx.controller.connect(ctx.handle.clone()).await
        }
    }
    .await;
    ctx.stop().await;

    let outcome = result?;
    let output = formatter.format_outcome(&outcome);
    if !output.is_empty() {
        println!("{output}");
    }
    Ok(ExitCode::Success)
}

async fn status(config: SyncConfig, formatter: &OutputFormatter) -> Result<ExitCode, SyncError> {
    let prefs = Preferences::load(config.preferences_path())?;
    let report = StatusReport {
        manifest_url: config.manifest_url.clone(),
        last_check: prefs.last_check().await,
        check_interval: prefs.check_interval().await.unwrap_or(config.check_interval),
        session: prefs.session_state().await,
    };
    println!("{}", formatter.format_status(&report));
    Ok(ExitCode::Success)
}

async fn watch(config: SyncConfig, formatter: &OutputFormatter) -> Result<ExitCode, SyncError> {
    let mut ctx = Context::start(config)?;
    let controller = &ctx.controller;

    let saved = match controller.begin_session().await {
        Ok(saved) => saved,
        Err(e) => {
            warn!(error = %e, "Could not clear saved session state");
            SessionState::default()
        }
    };
    if let Err(e) = controller.connect(ctx.handle.clone()).await {
        warn!(error = %e, "Initial update check failed");
    }
    if let Some(resumed) = controller.resume(&saved).await? {
        info!(id = %resumed.record.id, status = %resumed.status(), "Resumed watched update");
    }
    controller.schedule_periodic_checks().await;
    formatter.progress(&format!("Watching, interval {}", controller.check_interval().await));

    let interrupted = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Could not listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };
    watch_loop(controller, &mut ctx.triggers, interrupted, formatter).await;

    ctx.stop().await;
    Ok(ExitCode::Success)
}

/// Run a check for every trigger until `shutdown` resolves.
///
/// Checks run as their own tasks so a shutdown arriving mid-fetch can
/// cancel it.
async fn watch_loop<S>(
    controller: &Arc<SessionController>,
    triggers: &mut mpsc::UnboundedReceiver<CheckTrigger>,
    shutdown: S,
    formatter: &OutputFormatter,
) where
    S: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut checks = JoinSet::new();

    loop {
        tokio::select! {
            trigger = triggers.recv() => {
                let Some(trigger) = trigger else { break };
                if !checks.is_empty() {
                    debug!(?trigger, "Check still running, trigger skipped");
                    continue;
                }
                debug!(?trigger, "Scheduled check fired");
                let controller = Arc::clone(controller);
                checks.spawn(async move { controller.refresh(false).await });
            }
            Some(joined) = checks.join_next() => report_check(joined, formatter),
            _ = &mut shutdown => {
                info!("Interrupted, shutting down");
                if !controller.cancel_refresh() {
                    // Not fetching yet or already merging; dropping is safe.
                    checks.abort_all();
                }
                break;
            }
        }
    }

    while let Some(joined) = checks.join_next().await {
        report_check(joined, formatter);
    }
}

fn report_check(
    joined: Result<Result<RefreshOutcome, SyncError>, JoinError>,
    formatter: &OutputFormatter,
) {
    match joined {
        Ok(Ok(outcome)) => {
            if outcome.any_new {
                formatter.success(&format!("{} updates known", outcome.update_count));
            }
        }
        Ok(Err(e)) if e.is_user_visible() => warn!(error = %e, "Scheduled check failed"),
        Ok(Err(e)) => debug!(error = %e, "Scheduled check skipped"),
        Err(e) if e.is_cancelled() => debug!("Scheduled check aborted"),
        Err(e) => warn!(error = %e, "Scheduled check task failed"),
    }
}

/// Everything one command invocation needs, wired together.
struct Context {
    controller: Arc<SessionController>,
    handle: WorkerHandle,
    triggers: mpsc::UnboundedReceiver<CheckTrigger>,
    worker_task: JoinHandle<()>,
    router_task: JoinHandle<()>,
}

impl Context {
    fn start(config: SyncConfig) -> Result<Self, SyncError> {
        let prefs = Arc::new(Preferences::load(config.preferences_path())?);
        let router = Arc::new(EventRouter::new(Arc::clone(&prefs)));
        let (trigger_tx, triggers) = mpsc::unbounded_channel();
        let scheduler = Arc::new(TokioScheduler::new(trigger_tx, config.retry_delay()));
        let transport = Arc::new(HttpTransport::new()?);

        let (handle, events, worker_task) = UpdateWorker::spawn(Arc::new(LoggingEngine));

        let router_task = {
            let router = Arc::clone(&router);
            tokio::spawn(async move {
                router.subscribe(Arc::new(ConsoleObserver)).await;
                router.run(events).await;
            })
        };

        let controller = Arc::new(SessionController::new(
            config, transport, prefs, scheduler, router,
        ));
        Ok(Self {
            controller,
            handle,
            triggers,
            worker_task,
            router_task,
        })
    }

    /// Stop the worker and let the router drain its events.
    async fn stop(self) {
        self.controller.disconnect();
        self.handle.shutdown();
        drop(self.handle);
        if let Err(e) = self.worker_task.await {
            warn!(error = %e, "Update worker task failed");
        }
        if let Err(e) = self.router_task.await {
            warn!(error = %e, "Event router task failed");
        }
    }
}
