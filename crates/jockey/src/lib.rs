//! Jockey - Lua script harness for Derby racer agents.
//!
//! Each agent's scenario is a Lua script defining `main(params)`. The
//! script runs in a sandboxed VM whose only way back into the harness is
//! the `race.*` capability table:
//!
//! ```lua
//! function main(params)
//!     race.recording_start()
//!     race.start("page-load")
//!     -- ... the work being raced ...
//!     local seconds = race.stop("page-load")
//!     race.message("page-load took " .. seconds .. "s")
//!     race.recording_end()
//! end
//! ```
//!
//! `race.start` and `race.recording_start` may suspend on a rendezvous
//! barrier in parallel runs; the other three calls are local bookkeeping.
//! Scripts also get `log.*` (bridged to tracing) and a restricted Lua
//! stdlib - no io, no debug, no process control.

pub mod bridge;
pub mod error;
pub mod host;
pub mod runtime;

pub use error::{format_script_error, ScriptError, ScriptErrorKind};
pub use host::LuaScriptHost;
pub use runtime::{ExecutionResult, RaceRuntime, SandboxConfig};
