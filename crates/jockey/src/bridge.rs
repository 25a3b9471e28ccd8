//! The `race.*` capability table.
//!
//! This is the complete surface a script can reach back into the harness
//! with - five operations bound to the agent's live session handle:
//!
//! - `race.start(name?)` - begin a named measurement (async: the first
//!   one may rendezvous with the other agents before recording starts)
//! - `race.stop(name?) -> seconds` - end a named measurement
//! - `race.recording_start()` - explicitly open a recording segment
//!   (async: rendezvous in parallel runs)
//! - `race.recording_end()` - close the open segment
//! - `race.message(value)` - free-form annotation, any value coerced to
//!   its string form
//!
//! The measurement pair is `start`/`stop` because `end` is a Lua keyword.
//! Omitted measurement names default to `"default"`.

use anyhow::Result;
use mlua::{Lua, Value as LuaValue};
use paddock::SessionHandle;

const DEFAULT_MEASUREMENT: &str = "default";

/// Register the `race` global table backed by the given session.
pub fn register_race_globals(lua: &Lua, session: SessionHandle) -> Result<()> {
    let race = lua.create_table()?;

    let handle = session.clone();
    race.set(
        "start",
        lua.create_async_function(move |_, name: Option<String>| {
            let handle = handle.clone();
            async move {
                let name = name.as_deref().unwrap_or(DEFAULT_MEASUREMENT).to_string();
                handle.race_start(&name).await;
                Ok(())
            }
        })?,
    )?;

    let handle = session.clone();
    race.set(
        "stop",
        lua.create_function(move |_, name: Option<String>| {
            let name = name.as_deref().unwrap_or(DEFAULT_MEASUREMENT);
            Ok(handle.race_end(name))
        })?,
    )?;

    let handle = session.clone();
    race.set(
        "recording_start",
        lua.create_async_function(move |_, ()| {
            let handle = handle.clone();
            async move {
                handle.race_recording_start().await;
                Ok(())
            }
        })?,
    )?;

    let handle = session.clone();
    race.set(
        "recording_end",
        lua.create_function(move |_, ()| {
            handle.race_recording_end();
            Ok(())
        })?,
    )?;

    let handle = session;
    race.set(
        "message",
        lua.create_function(move |_, value: LuaValue| {
            handle.race_message(coerce_message(&value));
            Ok(())
        })?,
    )?;

    lua.globals().set("race", race)?;
    Ok(())
}

/// String form of any Lua value, for race.message.
fn coerce_message(value: &LuaValue) -> String {
    match value {
        LuaValue::Nil => "nil".to_string(),
        LuaValue::Boolean(b) => b.to_string(),
        LuaValue::Integer(i) => i.to_string(),
        LuaValue::Number(n) => n.to_string(),
        LuaValue::String(s) => s
            .to_str()
            .map(|s| s.to_string())
            .unwrap_or_else(|_| "<non-utf8 string>".to_string()),
        other => format!("[{}]", other.type_name()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coerces_scalars_to_strings() {
        let lua = Lua::new();
        assert_eq!(coerce_message(&LuaValue::Nil), "nil");
        assert_eq!(coerce_message(&LuaValue::Boolean(true)), "true");
        assert_eq!(coerce_message(&LuaValue::Integer(42)), "42");
        assert_eq!(
            coerce_message(&LuaValue::String(lua.create_string("hi").unwrap())),
            "hi"
        );
        let table = lua.create_table().unwrap();
        assert_eq!(coerce_message(&LuaValue::Table(table)), "[table]");
    }
}
