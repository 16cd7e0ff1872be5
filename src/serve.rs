//! Line-oriented request/response surface over stdin/stdout.
//!
//! One command per line, one JSON object per answer:
//!
//! ```text
//! submit movies/film.mkv --language de --no-overwrite
//! submit {"path": "shows/s01", "language": "nl-NL"}
//! status 3
//! list
//! cancel 3
//! bump 5
//! history
//! clear-history failed
//! quit
//! ```
//!
//! Answers are `{"ok": true, "data": ...}` or `{"ok": false, "error": "..."}`.
//! `quit` (or end of input) stops reading; live jobs stay in the queue
//! snapshot and resume on the next start.

use std::sync::Arc;

use anyhow::Result;
use serde_json::{Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

use crate::admission::SubmitRequest;
use crate::orchestrator::JobOrchestrator;
use crate::state_machine::{JobId, JobStatus};

/// A parsed command line.
#[derive(Debug, Clone)]
pub enum Request {
    Submit(SubmitRequest),
    Status(JobId),
    List,
    Cancel(JobId),
    Bump(JobId),
    History,
    ClearHistory(Option<JobStatus>),
    Quit,
}

fn job_id(arg: Option<&str>, command: &str) -> Result<JobId, String> {
    let arg = arg.ok_or_else(|| format!("usage: {command} <job id>"))?;
    arg.parse()
        .map_err(|_| format!("invalid job id {arg:?}"))
}

fn parse_submit(rest: &str) -> Result<SubmitRequest, String> {
    if rest.starts_with('{') {
        return serde_json::from_str(rest).map_err(|e| format!("invalid submit request: {e}"));
    }

    let mut path = None;
    let mut request = SubmitRequest::new("");
    let mut args = rest.split_whitespace();
    while let Some(arg) = args.next() {
        match arg {
            "--language" | "-l" => {
                let lang = args.next().ok_or("--language needs a value")?;
                request = request.language(lang);
            }
            "--no-overwrite" => request = request.overwrite(false),
            "--original-only" => request = request.original_only(true),
            flag if flag.starts_with("--") => return Err(format!("unknown option {flag}")),
            other if path.is_none() => path = Some(other.to_string()),
            other => return Err(format!("unexpected argument {other:?}")),
        }
    }

    request.path = path.ok_or("usage: submit <path> [--language L] [--no-overwrite] [--original-only]")?;
    Ok(request)
}

/// Parse one input line. Blank lines and `#` comments yield `Ok(None)`.
pub fn parse(line: &str) -> Result<Option<Request>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let (command, rest) = match line.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (line, ""),
    };
    let arg = rest.split_whitespace().next();

    let request = match command {
        "submit" => Request::Submit(parse_submit(rest)?),
        "status" => Request::Status(job_id(arg, command)?),
        "list" => Request::List,
        "cancel" => Request::Cancel(job_id(arg, command)?),
        "bump" => Request::Bump(job_id(arg, command)?),
        "history" => Request::History,
        "clear-history" => Request::ClearHistory(arg.map(str::parse).transpose()?),
        "quit" | "exit" => Request::Quit,
        other => return Err(format!("unknown command {other:?}")),
    };
    Ok(Some(request))
}

fn ok(data: impl serde::Serialize) -> Value {
    json!({ "ok": true, "data": data })
}

fn err(message: impl std::fmt::Display) -> Value {
    json!({ "ok": false, "error": message.to_string() })
}

/// Execute a request against the orchestrator and build its answer.
pub async fn handle(orchestrator: &Arc<JobOrchestrator>, request: Request) -> Value {
    match request {
        Request::Submit(submit) => match orchestrator.submit(submit).await {
            Ok(id) => ok(json!({ "job_id": id })),
            Err(e) => err(e),
        },
        Request::Status(id) => match orchestrator.status(id) {
            Ok(view) => ok(view),
            Err(e) => err(e),
        },
        Request::List => ok(orchestrator.list()),
        Request::Cancel(id) => match orchestrator.cancel(id).await {
            Ok(outcome) => ok(json!({ "job_id": id, "outcome": outcome })),
            Err(e) => err(e),
        },
        Request::Bump(id) => match orchestrator.bump(id).await {
            Ok(key) => ok(json!({ "job_id": id, "queue_key": key })),
            Err(e) => err(e),
        },
        Request::History => ok(orchestrator.history().await),
        Request::ClearHistory(status) => match orchestrator.clear_history(status).await {
            Ok(removed) => ok(json!({ "removed": removed })),
            Err(e) => err(e),
        },
        Request::Quit => ok("bye"),
    }
}

/// Read commands from `input` until `quit` or end of input, writing one JSON line per command.
pub async fn serve<R, W>(orchestrator: Arc<JobOrchestrator>, input: R, mut output: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    info!("Accepting commands on stdin");
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        let (answer, quit) = match parse(&line) {
            Ok(None) => continue,
            Ok(Some(Request::Quit)) => (handle(&orchestrator, Request::Quit).await, true),
            Ok(Some(request)) => {
                debug!(?request, "Handling command");
                (handle(&orchestrator, request).await, false)
            }
            Err(message) => (err(message), false),
        };

        let mut encoded = serde_json::to_vec(&answer)?;
        encoded.push(b'\n');
        output.write_all(&encoded).await?;
        output.flush().await?;

        if quit {
            break;
        }
    }
    info!(live_jobs = orchestrator.active_units(), "Command input closed");
    Ok(())
}
