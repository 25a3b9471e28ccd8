//! Execution coordinator: runs N race sessions in parallel or
//! sequentially and collects one result per agent, in input order.
//!
//! A failing script never takes the run down. The failure is caught at the
//! session boundary, wrapped with the agent id, and turned into that
//! agent's error field; siblings learn of it only through the shared error
//! flag, which aborts their pending barrier waits within one poll
//! interval.

use crate::barrier::RaceBarriers;
use crate::session::SessionHandle;
use crate::state::RunState;
use anyhow::Result;
use async_trait::async_trait;
use derbyconf::SyncConfig;
use derbyproto::{AgentConfig, AgentId, RaceResult, RunMode};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// The seam between the coordinator and whatever hosts agent scripts.
///
/// jockey provides the Lua implementation; tests drive sessions directly.
/// The host gets exactly the session handle and nothing else from the
/// harness - the five `race_*` operations are the whole capability surface
/// a script can reach.
#[async_trait]
pub trait ScriptHost: Send + Sync {
    async fn run_script(&self, agent: &AgentConfig, session: SessionHandle) -> Result<()>;
}

/// Runs race sessions and collects results.
pub struct Coordinator {
    poll_interval: Duration,
}

impl Coordinator {
    pub fn new(sync: &SyncConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(sync.poll_interval_ms),
        }
    }

    /// Race all configured agents. Always returns one result per agent,
    /// aligned to input order; downstream reporting depends on that
    /// positional alignment.
    pub async fn run(
        &self,
        host: Arc<dyn ScriptHost>,
        agents: &[AgentConfig],
        mode: RunMode,
        cancel: CancellationToken,
    ) -> (Vec<RaceResult>, Arc<RunState>) {
        let state = Arc::new(RunState::new());
        if agents.is_empty() {
            return (Vec::new(), state);
        }

        tracing::info!(agents = agents.len(), mode = %mode, "race starting");

        let results = match mode {
            RunMode::Parallel => self.run_parallel(host, agents, state.clone(), cancel).await,
            RunMode::Sequential => self.run_sequential(host, agents, state.clone(), cancel).await,
        };

        tracing::info!(
            agents = results.len(),
            failed = results.iter().filter(|r| r.error.is_some()).count(),
            "race finished"
        );

        (results, state)
    }

    async fn run_parallel(
        &self,
        host: Arc<dyn ScriptHost>,
        agents: &[AgentConfig],
        state: Arc<RunState>,
        cancel: CancellationToken,
    ) -> Vec<RaceResult> {
        let barriers = Arc::new(RaceBarriers::new(
            agents.len(),
            state.clone(),
            self.poll_interval,
        ));

        // Cancellation (SIGINT/SIGTERM upstream) flags the run and
        // releases every checkpoint so suspended sessions unwind.
        let watcher = tokio::spawn({
            let barriers = barriers.clone();
            let state = state.clone();
            let cancel = cancel.clone();
            async move {
                cancel.cancelled().await;
                state.flag_error("run cancelled");
                barriers.release_all();
            }
        });

        let mut tasks = Vec::with_capacity(agents.len());
        for agent in agents {
            let session =
                SessionHandle::new(agent.id.clone(), Some(barriers.clone()), state.clone());
            let host = host.clone();
            let agent = agent.clone();
            let agent_id = agent.id.clone();
            let state = state.clone();
            let task_session = session.clone();

            let task = tokio::spawn(async move {
                run_one(host, &agent, task_session, state).await
            });
            tasks.push((agent_id, session, task));
        }

        let mut results = Vec::with_capacity(tasks.len());
        for (id, session, task) in tasks {
            let error = match task.await {
                Ok(error) => error,
                Err(join_err) => {
                    // Task panicked; treat like a script failure.
                    let message = format!("agent {id}: session task panicked: {join_err}");
                    state.flag_error(message.clone());
                    Some(message)
                }
            };
            results.push(result_row(id, &session, error));
        }

        watcher.abort();
        barriers.release_all();
        results
    }

    async fn run_sequential(
        &self,
        host: Arc<dyn ScriptHost>,
        agents: &[AgentConfig],
        state: Arc<RunState>,
        cancel: CancellationToken,
    ) -> Vec<RaceResult> {
        let mut results = Vec::with_capacity(agents.len());
        for agent in agents {
            if cancel.is_cancelled() {
                state.flag_error("run cancelled");
                results.push(RaceResult::failed(agent.id.clone(), "run cancelled"));
                continue;
            }

            // No barriers: sessions never wait on each other, but the
            // shared state keeps finish-order and error bookkeeping
            // consistent across modes.
            let session = SessionHandle::new(agent.id.clone(), None, state.clone());
            let error = run_one(host.clone(), agent, session.clone(), state.clone()).await;
            results.push(result_row(agent.id.clone(), &session, error));
        }
        results
    }
}

/// Drive one session through ready, script, and finalization. Returns the
/// agent's error message, if any.
async fn run_one(
    host: Arc<dyn ScriptHost>,
    agent: &AgentConfig,
    session: SessionHandle,
    state: Arc<RunState>,
) -> Option<String> {
    if session.ready().await.is_aborted() {
        tracing::debug!(agent.id = %agent.id, "aborted before script start");
        return Some("synchronization aborted before script start".to_string());
    }

    tracing::debug!(agent.id = %agent.id, "script starting");

    // The script runs in its own task so a panic is observed here, right
    // away, and flags the run before the siblings' next barrier poll.
    let script_task = tokio::spawn({
        let host = host.clone();
        let agent = agent.clone();
        let session = session.clone();
        async move { host.run_script(&agent, session).await }
    });

    let error = match script_task.await {
        Ok(Ok(())) => None,
        Ok(Err(err)) => {
            let message = format!("agent {}: {:#}", agent.id, err);
            tracing::error!(agent.id = %agent.id, error = %message, "script failed");
            state.flag_error(message.clone());
            Some(message)
        }
        Err(join_err) => {
            let message = format!("agent {}: script panicked: {join_err}", agent.id);
            tracing::error!(agent.id = %agent.id, error = %message, "script panicked");
            state.flag_error(message.clone());
            Some(message)
        }
    };

    // Finalize in both outcomes so partial segments are closed and the
    // stop checkpoint stays consistent for the survivors.
    session.finalize().await;
    error
}

fn result_row(id: AgentId, session: &SessionHandle, error: Option<String>) -> RaceResult {
    let (segments, measurements, messages) = session.snapshot();
    RaceResult {
        id,
        segments,
        measurements,
        messages,
        error,
    }
}
