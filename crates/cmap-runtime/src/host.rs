//! Where agent contexts execute.
//!
//! Agents never run on the agency's own worker threads. A thread-hosted
//! agent gets a dedicated OS thread with a single-threaded runtime, so a
//! behaviour that blocks cannot starve routing. A process-hosted agent runs
//! in a child process that is killed outright when the agent is deleted.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use cmap_core::{AclMessage, AgencyError, AgentId, LogSink, Result};

use crate::agent::{AgentBehavior, AgentContext};
use crate::process::{ChildFrame, InitFrame, write_frame};
use crate::services::ServiceEndpoints;

/// How an agent context ended, as seen by its host.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Returned,
    Failed(String),
    /// Stopped through its kill token.
    Killed,
}

/// Command line that starts one agent process, plus the service endpoints
/// the process should connect to.
#[derive(Debug, Clone)]
pub struct ProcessCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub services: ServiceEndpoints,
}

impl ProcessCommand {
    pub fn new(
        program: impl Into<PathBuf>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: Vec::new(),
            services: ServiceEndpoints::default(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_services(mut self, services: ServiceEndpoints) -> Self {
        self.services = services;
        self
    }

    /// Re-run this executable with the hidden `agent` subcommand.
    pub fn current_exe() -> Result<Self> {
        Ok(Self::new(std::env::current_exe()?, ["agent"]))
    }
}

#[derive(Debug, Clone, Default)]
pub enum AgentHost {
    #[default]
    Thread,
    Process(ProcessCommand),
}

// ── Thread host ────────────────────────────────────────────────

/// Run `behavior` on a fresh OS thread.
///
/// The returned receiver resolves with `Killed` as soon as `kill` fires,
/// even if the behaviour is stuck in blocking code; the thread then exits
/// at the behaviour's next await point.
pub fn launch_thread(
    behavior: Arc<dyn AgentBehavior>,
    ctx: AgentContext,
    kill: CancellationToken,
) -> Result<oneshot::Receiver<Outcome>> {
    let id = ctx.id();
    let (done_tx, done_rx) = oneshot::channel();
    let thread_kill = kill.clone();
    std::thread::Builder::new()
        .name(format!("agent-{id}"))
        .spawn(move || {
            let _ = done_tx.send(run_on_thread(behavior, ctx, thread_kill));
        })
        .map_err(|e| AgencyError::AgentFailed {
            id,
            reason: format!("failed to start agent thread: {e}"),
        })?;

    let (outcome_tx, outcome_rx) = oneshot::channel();
    tokio::spawn(async move {
        let outcome = tokio::select! {
            biased;
            _ = kill.cancelled() => Outcome::Killed,
            done = done_rx => done.unwrap_or(Outcome::Failed("agent thread vanished".into())),
        };
        let _ = outcome_tx.send(outcome);
    });
    Ok(outcome_rx)
}

fn run_on_thread(
    behavior: Arc<dyn AgentBehavior>,
    ctx: AgentContext,
    kill: CancellationToken,
) -> Outcome {
    let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => return Outcome::Failed(format!("failed to build agent runtime: {e}")),
    };
    let run = AssertUnwindSafe(|| {
        rt.block_on(async move {
            tokio::select! {
                biased;
                _ = kill.cancelled() => Outcome::Killed,
                result = behavior.run(ctx) => match result {
                    Ok(()) => Outcome::Returned,
                    Err(e) => Outcome::Failed(e.to_string()),
                },
            }
        })
    });
    std::panic::catch_unwind(run)
        .unwrap_or_else(|payload| Outcome::Failed(panic_reason(payload)))
}

fn panic_reason(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".into()
    }
}

// ── Process host ───────────────────────────────────────────────

/// Start the agent as a child process speaking the frame protocol on its
/// stdin and stdout. Stderr is inherited.
pub fn launch_process(
    command: &ProcessCommand,
    init: InitFrame,
    inbox: mpsc::Receiver<AclMessage>,
    outbound: mpsc::Sender<AclMessage>,
    sink: LogSink,
    kill: CancellationToken,
) -> Result<oneshot::Receiver<Outcome>> {
    let id = init.descriptor.id;
    let mut child = Command::new(&command.program)
        .args(&command.args)
        .envs(command.env.iter().map(|(k, v)| (k, v)))
        .env("CMAP_AGENT_ID", id.to_string())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| AgencyError::AgentFailed {
            id,
            reason: format!("failed to start agent process {}: {e}", command.program.display()),
        })?;
    debug!(agent_id = id, pid = ?child.id(), "agent process started");

    let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
        return Err(AgencyError::AgentFailed {
            id,
            reason: "agent process has no stdio pipes".into(),
        });
    };
    tokio::spawn(feed(stdin, init, inbox, kill.clone()));
    let drain = tokio::spawn(drain(id, stdout, outbound, sink));

    let (outcome_tx, outcome_rx) = oneshot::channel();
    tokio::spawn(async move {
        let outcome = wait_child(id, child, drain, kill).await;
        let _ = outcome_tx.send(outcome);
    });
    Ok(outcome_rx)
}

/// Write the init frame, then every inbox message, to the child's stdin.
async fn feed(
    mut stdin: ChildStdin,
    init: InitFrame,
    mut inbox: mpsc::Receiver<AclMessage>,
    kill: CancellationToken,
) {
    if let Err(e) = write_frame(&mut stdin, &init).await {
        warn!(agent_id = init.descriptor.id, error = %e, "failed to initialise agent process");
        return;
    }
    loop {
        let msg = tokio::select! {
            biased;
            _ = kill.cancelled() => break,
            msg = inbox.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };
        if write_frame(&mut stdin, &msg).await.is_err() {
            break;
        }
    }
}

/// Forward frames from the child. Returns the failure it reported, if any.
async fn drain(
    id: AgentId,
    stdout: ChildStdout,
    outbound: mpsc::Sender<AclMessage>,
    sink: LogSink,
) -> Option<String> {
    let mut lines = BufReader::new(stdout).lines();
    let mut failure = None;
    while let Ok(Some(line)) = lines.next_line().await {
        match serde_json::from_str::<ChildFrame>(&line) {
            // The child cannot speak for another agent.
            Ok(ChildFrame::Send(mut msg)) => {
                msg.sender = id;
                if outbound.send(msg).await.is_err() {
                    break;
                }
            }
            Ok(ChildFrame::Log(mut record)) => {
                record.agent_id = id;
                sink.push(record);
            }
            Ok(ChildFrame::Record(mut point)) => {
                point.agent_id = id;
                sink.push_point(point);
            }
            Ok(ChildFrame::Failed(reason)) => failure = Some(reason),
            Err(e) => warn!(agent_id = id, error = %e, "unreadable frame from agent process"),
        }
    }
    failure
}

async fn wait_child(
    id: AgentId,
    mut child: Child,
    drain: tokio::task::JoinHandle<Option<String>>,
    kill: CancellationToken,
) -> Outcome {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill.cancelled() => {
            if let Err(e) = child.kill().await {
                warn!(agent_id = id, error = %e, "failed to kill agent process");
            }
            drain.abort();
            return Outcome::Killed;
        }
    };
    let reported = drain.await.ok().flatten();
    match status {
        Ok(s) if s.success() => Outcome::Returned,
        Ok(s) => Outcome::Failed(reported.unwrap_or_else(|| format!("agent process exited with {s}"))),
        Err(e) => Outcome::Failed(format!("failed to wait for agent process: {e}")),
    }
}
