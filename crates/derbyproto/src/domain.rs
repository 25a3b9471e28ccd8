//! Agent identity, run mode, and per-agent result types.

use serde::{Deserialize, Serialize};

use crate::timing::{Measurement, Segment};

/// Identifier for one racer agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for AgentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// How the coordinator schedules agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// All agents run concurrently, synchronized at the ready,
    /// recording-start, and stop checkpoints.
    Parallel,

    /// Agents run one after another with no cross-agent waits.
    Sequential,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parallel => "parallel",
            Self::Sequential => "sequential",
        }
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunMode {
    type Err = UnknownRunMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "parallel" => Ok(Self::Parallel),
            "sequential" => Ok(Self::Sequential),
            other => Err(UnknownRunMode(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown run mode '{0}', expected 'parallel' or 'sequential'")]
pub struct UnknownRunMode(pub String);

/// Configuration for one agent: its identity, script source, and the
/// params table handed to the script's main() function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: AgentId,

    /// Lua script source text.
    pub source: String,

    /// Params passed to main(params). Defaults to an empty object.
    #[serde(default = "default_params")]
    pub params: serde_json::Value,
}

fn default_params() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl AgentConfig {
    pub fn new(id: impl Into<AgentId>, source: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            params: default_params(),
        }
    }
}

/// Outcome of one agent's run.
///
/// The coordinator returns exactly one of these per configured agent, in
/// input order. A failed agent still produces a result; its `error` field
/// carries the failure and the timing fields hold whatever was collected
/// before the failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaceResult {
    pub id: AgentId,

    /// Recording segments closed during the run, chronological.
    pub segments: Vec<Segment>,

    /// Named measurements in completion order.
    pub measurements: Vec<Measurement>,

    /// Free-form annotations the script emitted via race.message.
    #[serde(default)]
    pub messages: Vec<String>,

    /// Script or synchronization failure, if any.
    pub error: Option<String>,
}

impl RaceResult {
    /// An empty result carrying only an error, for agents whose script
    /// never produced usable data.
    pub fn failed(id: AgentId, error: impl Into<String>) -> Self {
        Self {
            id,
            segments: Vec::new(),
            measurements: Vec::new(),
            messages: Vec::new(),
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn run_mode_round_trip() {
        for mode in [RunMode::Parallel, RunMode::Sequential] {
            let parsed: RunMode = mode.as_str().parse().unwrap();
            assert_eq!(parsed, mode);
        }
        assert!("both".parse::<RunMode>().is_err());
    }

    #[test]
    fn agent_config_default_params() {
        let cfg = AgentConfig::new("fast", "function main(params) end");
        assert_eq!(cfg.params, serde_json::json!({}));
    }
}
