mod admission;
mod cancellation;
mod cli;
mod config;
mod error;
mod gate;
mod history;
mod language;
mod logging;
mod orchestrator;
mod persistence;
mod pipeline;
mod serve;
mod state_machine;
mod store;
mod ui;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::Parser;
use tokio::io::BufReader;
use tracing::info;

use admission::SubmitRequest;
use cli::{Cli, Command};
use config::Config;
use history::HistoryLedger;
use orchestrator::JobOrchestrator;
use persistence::QueueSnapshotFile;
use pipeline::CommandPipeline;
use state_machine::JobStatus;
use ui::JobBoard;

const BOARD_REFRESH: Duration = Duration::from_millis(250);

async fn start(config: Config) -> Result<Arc<JobOrchestrator>> {
    let pipeline = Arc::new(CommandPipeline::new(
        config.pipeline.clone(),
        config.keep_audio,
    ));
    let orchestrator = JobOrchestrator::open(config, pipeline).await?;
    let report = orchestrator.recover().await?;
    if !report.resumed.is_empty() {
        info!(jobs = ?report.resumed, "Resuming interrupted jobs");
    }
    Ok(orchestrator)
}

async fn run(config: Config, requests: Vec<SubmitRequest>) -> Result<()> {
    let orchestrator = start(config).await?;
    let mut board = JobBoard::new();

    for job in orchestrator.list() {
        if !job.status.is_terminal() {
            board.track(job.id, &job.input.path);
        }
    }
    for request in requests {
        let path = request.path.clone();
        match orchestrator.submit(request).await {
            Ok(id) => board.track(id, &path),
            Err(e) => board.note(format!(
                "  {} {path}: {e}",
                console::style("✗").red().bold()
            )),
        }
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut ticker = tokio::time::interval(BOARD_REFRESH);
    let mut cancelling = false;
    let mut failed = 0usize;

    while !board.is_done() {
        tokio::select! {
            _ = ticker.tick() => {}
            signal = &mut ctrl_c, if !cancelling => {
                signal?;
                cancelling = true;
                let signalled = orchestrator.cancel_all().await;
                board.note(format!(
                    "  {} Cancelling {signalled} job(s); running stages finish first",
                    console::style("⊘").yellow()
                ));
            }
        }

        for id in board.tracked() {
            match orchestrator.status(id) {
                Ok(view) => {
                    if view.job.status == JobStatus::Failed {
                        failed += 1;
                    }
                    board.update(&view);
                }
                Err(_) => board.forget(id),
            }
        }
    }

    orchestrator.wait_idle().await;
    if failed > 0 {
        bail!("{failed} job(s) failed");
    }
    Ok(())
}

async fn history(config: &Config, clear: bool, state: Option<JobStatus>) -> Result<()> {
    let ledger = HistoryLedger::open(config.history_path()).await?;
    if clear {
        let removed = match state {
            Some(status) => ledger.clear_by_state(status).await?,
            None => ledger.clear().await?,
        };
        println!("Removed {removed} history entr{}", if removed == 1 { "y" } else { "ies" });
        return Ok(());
    }

    let entries: Vec<_> = ledger
        .list()
        .await
        .into_iter()
        .filter(|e| state.is_none_or(|s| e.status == s))
        .collect();
    ui::print_history(&entries);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, matches!(cli.command, Command::Run { .. }))?;

    let mut config = Config::load(cli.config.as_deref())?;
    cli.apply_overrides(&mut config);

    match cli.command {
        Command::Run {
            paths,
            language,
            no_overwrite,
            original_only,
        } => {
            let requests = paths
                .into_iter()
                .map(|path| {
                    let request = SubmitRequest::new(path)
                        .overwrite(!no_overwrite)
                        .original_only(original_only);
                    match &language {
                        Some(lang) => request.language(lang.clone()),
                        None => request,
                    }
                })
                .collect();
            run(config, requests).await
        }
        Command::Serve => {
            let orchestrator = start(config).await?;
            serve::serve(
                orchestrator,
                BufReader::new(tokio::io::stdin()),
                tokio::io::stdout(),
            )
            .await
        }
        Command::History { clear, state } => history(&config, clear, state).await,
        Command::Queue => {
            let snapshot = QueueSnapshotFile::new(config.queue_path()).load().await?;
            ui::print_snapshot(snapshot.as_ref());
            Ok(())
        }
    }
}
