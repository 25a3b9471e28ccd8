//! ScriptHost implementation backed by the Lua runtime.

use crate::error::format_script_error;
use crate::runtime::{RaceRuntime, SandboxConfig};
use anyhow::Result;
use async_trait::async_trait;
use derbyproto::AgentConfig;
use paddock::{ScriptHost, SessionHandle};

/// Runs agent scripts through the sandboxed Lua runtime.
pub struct LuaScriptHost {
    runtime: RaceRuntime,
}

impl LuaScriptHost {
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            runtime: RaceRuntime::new(config),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(SandboxConfig::default())
    }
}

#[async_trait]
impl ScriptHost for LuaScriptHost {
    async fn run_script(&self, agent: &AgentConfig, session: SessionHandle) -> Result<()> {
        // Scripts see their own identity alongside the user params.
        let mut params = agent.params.clone();
        if let Some(obj) = params.as_object_mut() {
            obj.entry("agent")
                .or_insert_with(|| serde_json::json!(agent.id.as_str()));
        }

        let outcome = self
            .runtime
            .execute(&agent.source, params, session)
            .await
            .map_err(|err| anyhow::anyhow!("{}", format_script_error(&err)))?;

        tracing::debug!(
            agent.id = %agent.id,
            script.duration_secs = outcome.duration.as_secs_f64(),
            "script completed"
        );
        Ok(())
    }
}
