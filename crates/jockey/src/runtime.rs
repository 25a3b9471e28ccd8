//! Sandboxed Lua execution for agent scripts.
//!
//! Unlike a pure-compute script server, race scripts must be able to
//! suspend mid-call (two of the `race.*` capabilities rendezvous on a
//! barrier), so execution stays on the async runtime via `exec_async` /
//! `call_async` instead of a blocking thread.

use anyhow::{Context, Result};
use mlua::{Lua, Value as LuaValue};
use paddock::SessionHandle;
use serde_json::Value as JsonValue;
use std::time::{Duration, Instant};
use tokio::time::timeout;

use crate::bridge::register_race_globals;

/// Configuration for the Lua sandbox.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Maximum execution time before timeout.
    pub timeout: Duration,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

/// Result of executing an agent script.
#[derive(Debug)]
pub struct ExecutionResult {
    /// The value returned by the script's main() function.
    pub result: JsonValue,

    /// How long the script took to execute.
    pub duration: Duration,
}

/// Lua runtime for executing race scripts in a sandboxed environment.
pub struct RaceRuntime {
    config: SandboxConfig,
}

impl RaceRuntime {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(SandboxConfig::default())
    }

    /// Execute Lua source against a live race session.
    ///
    /// The script must define a `main(params)` function; `params` arrives
    /// as a Lua table converted from JSON. The whole run is bounded by the
    /// sandbox timeout.
    pub async fn execute(
        &self,
        source: &str,
        params: JsonValue,
        session: SessionHandle,
    ) -> Result<ExecutionResult> {
        let started = Instant::now();
        let lua = create_sandboxed_lua(session)?;
        let source = source.to_string();

        // The script runs as its own task so the timeout below can fire
        // even when the script never yields.
        let mut script_task = tokio::spawn(async move {
            lua.load(&source)
                .exec_async()
                .await
                .context("Failed to load Lua script")?;

            let main_fn: mlua::Function = lua
                .globals()
                .get("main")
                .context("Script must define a main(params) function")?;

            let lua_params = json_to_lua(&lua, &params)?;

            let result: LuaValue = main_fn
                .call_async(lua_params)
                .await
                .context("Error calling main(params)")?;

            lua_to_json(&result)
        });

        let result = match timeout(self.config.timeout, &mut script_task).await {
            Ok(joined) => joined.context("Script task panicked")??,
            Err(_) => {
                script_task.abort();
                anyhow::bail!("Script execution timed out");
            }
        };

        Ok(ExecutionResult {
            result,
            duration: started.elapsed(),
        })
    }

    /// Compile the source without running it. Catches syntax errors only;
    /// nothing in the script executes.
    pub fn check(&self, source: &str) -> Result<()> {
        let lua = Lua::new();
        lua.load(source)
            .into_function()
            .context("Lua syntax error")?;
        Ok(())
    }
}

/// Create a sandboxed Lua VM wired to the given session.
fn create_sandboxed_lua(session: SessionHandle) -> Result<Lua> {
    let lua = Lua::new();
    register_log_globals(&lua)?;
    remove_dangerous_globals(&lua)?;
    register_race_globals(&lua, session)?;
    Ok(lua)
}

/// Register the `log` table, bridged to tracing under the
/// `jockey.script` target so script output filters separately.
fn register_log_globals(lua: &Lua) -> Result<()> {
    macro_rules! bridge {
        ($table:expr, $name:literal, $level:ident) => {
            $table.set(
                $name,
                lua.create_function(|_, msg: String| {
                    tracing::$level!(target: "jockey.script", "{msg}");
                    Ok(())
                })?,
            )?;
        };
    }

    let log_table = lua.create_table()?;
    bridge!(log_table, "debug", debug);
    bridge!(log_table, "info", info);
    bridge!(log_table, "warn", warn);
    bridge!(log_table, "error", error);
    lua.globals().set("log", log_table)?;
    Ok(())
}

/// Remove globals that could be used to escape the sandbox.
///
/// Not a security boundary - a correctness/API boundary. Scripts get the
/// race API, logging, and pure Lua; filesystem and process access go.
fn remove_dangerous_globals(lua: &Lua) -> Result<()> {
    const BLOCKED: &[&str] = &["dofile", "loadfile", "debug", "io"];
    // os keeps clock/date/difftime/getenv/time; process and filesystem go.
    const BLOCKED_OS: &[&str] = &[
        "execute",
        "exit",
        "remove",
        "rename",
        "setenv",
        "setlocale",
        "tmpname",
    ];

    let globals = lua.globals();
    for name in BLOCKED {
        globals.set(*name, LuaValue::Nil)?;
    }
    let os_table: mlua::Table = globals.get("os")?;
    for name in BLOCKED_OS {
        os_table.set(*name, LuaValue::Nil)?;
    }
    Ok(())
}

/// JSON params into Lua. Arrays become 1-indexed sequences, objects become
/// string-keyed tables.
pub(crate) fn json_to_lua(lua: &Lua, json: &JsonValue) -> Result<LuaValue> {
    let value = match json {
        JsonValue::Null => LuaValue::Nil,
        JsonValue::Bool(b) => LuaValue::Boolean(*b),
        JsonValue::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => LuaValue::Integer(i),
            (None, Some(f)) => LuaValue::Number(f),
            (None, None) => LuaValue::Nil,
        },
        JsonValue::String(s) => LuaValue::String(lua.create_string(s)?),
        JsonValue::Array(items) => {
            let seq = items
                .iter()
                .map(|item| json_to_lua(lua, item))
                .collect::<Result<Vec<_>>>()?;
            LuaValue::Table(lua.create_sequence_from(seq)?)
        }
        JsonValue::Object(fields) => {
            let pairs = fields
                .iter()
                .map(|(k, v)| Ok((k.clone(), json_to_lua(lua, v)?)))
                .collect::<Result<Vec<_>>>()?;
            LuaValue::Table(lua.create_table_from(pairs)?)
        }
    };
    Ok(value)
}

/// Script return value into JSON. A table with a raw length is treated as
/// a sequence; otherwise its stringable keys become an object. Values JSON
/// cannot carry (functions, userdata) collapse to a type-name string.
pub(crate) fn lua_to_json(value: &LuaValue) -> Result<JsonValue> {
    let json = match value {
        LuaValue::Nil => JsonValue::Null,
        LuaValue::Boolean(b) => JsonValue::Bool(*b),
        LuaValue::Integer(i) => JsonValue::from(*i),
        LuaValue::Number(n) => serde_json::Number::from_f64(*n)
            .map(JsonValue::Number)
            .ok_or_else(|| anyhow::anyhow!("Cannot convert NaN/Inf to JSON"))?,
        LuaValue::String(s) => JsonValue::String(s.to_str()?.to_string()),
        LuaValue::Table(table) if table.raw_len() > 0 => {
            let mut items = Vec::with_capacity(table.raw_len());
            for i in 1..=table.raw_len() {
                items.push(lua_to_json(&table.raw_get(i)?)?);
            }
            JsonValue::Array(items)
        }
        LuaValue::Table(table) => {
            let mut fields = serde_json::Map::new();
            for pair in table.pairs::<LuaValue, LuaValue>() {
                let (k, v) = pair?;
                let key = match k {
                    LuaValue::String(s) => s.to_str()?.to_string(),
                    LuaValue::Integer(i) => i.to_string(),
                    LuaValue::Number(n) => n.to_string(),
                    _ => continue,
                };
                fields.insert(key, lua_to_json(&v)?);
            }
            JsonValue::Object(fields)
        }
        other => JsonValue::String(format!("[{}]", other.type_name())),
    };
    Ok(json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use derbyproto::AgentId;
    use paddock::RunState;
    use std::sync::Arc;

    fn test_session() -> SessionHandle {
        SessionHandle::new(AgentId::from("test"), None, Arc::new(RunState::new()))
    }

    #[tokio::test]
    async fn simple_return() {
        let runtime = RaceRuntime::with_defaults();
        let result = runtime
            .execute(
                r#"
                function main(params)
                    return "rider " .. (params.name or "unknown") .. " up"
                end
                "#,
                serde_json::json!({"name": "jockey"}),
                test_session(),
            )
            .await
            .unwrap();

        assert_eq!(result.result, "rider jockey up");
    }

    #[tokio::test]
    async fn table_return() {
        let runtime = RaceRuntime::with_defaults();
        let result = runtime
            .execute(
                r#"
                function main(params)
                    return { count = params.n * 2, items = {1, 2, 3} }
                end
                "#,
                serde_json::json!({"n": 5}),
                test_session(),
            )
            .await
            .unwrap();

        assert_eq!(result.result["count"], 10);
        assert_eq!(result.result["items"], serde_json::json!([1, 2, 3]));
    }

    #[tokio::test]
    async fn missing_main_is_an_error() {
        let runtime = RaceRuntime::with_defaults();
        let result = runtime
            .execute(
                "function helper() return 42 end",
                serde_json::json!({}),
                test_session(),
            )
            .await;

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("main"));
    }

    #[tokio::test]
    async fn sandbox_blocks_io() {
        let runtime = RaceRuntime::with_defaults();
        let result = runtime
            .execute(
                r#"
                function main(params)
                    local f = io.open("/etc/passwd", "r")
                    return "unreachable"
                end
                "#,
                serde_json::json!({}),
                test_session(),
            )
            .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn sandbox_blocks_os_execute() {
        let runtime = RaceRuntime::with_defaults();
        let result = runtime
            .execute(
                r#"
                function main(params)
                    os.execute("echo nope")
                    return "unreachable"
                end
                "#,
                serde_json::json!({}),
                test_session(),
            )
            .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn script_stuck_on_a_barrier_times_out() {
        use paddock::RaceBarriers;

        // Two-party barriers with only one session: race.start suspends
        // on the recording-start rendezvous forever.
        let state = Arc::new(RunState::new());
        let barriers = Arc::new(RaceBarriers::new(
            2,
            state.clone(),
            Duration::from_millis(10),
        ));
        let session = SessionHandle::new(AgentId::from("stuck"), Some(barriers), state);

        let runtime = RaceRuntime::new(SandboxConfig {
            timeout: Duration::from_millis(100),
        });
        let result = runtime
            .execute(
                r#"
                function main(params)
                    race.start("lap")
                    return "unreachable"
                end
                "#,
                serde_json::json!({}),
                session,
            )
            .await;

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("timed out"));
    }

    #[test]
    fn check_accepts_valid_and_rejects_broken_syntax() {
        let runtime = RaceRuntime::with_defaults();
        assert!(runtime.check("function main(params) return 1 end").is_ok());
        assert!(runtime.check("function main( broken").is_err());
    }
}
