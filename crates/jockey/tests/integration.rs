//! Integration tests for the Lua race harness.
//!
//! These drive real Lua scripts against live sessions, including full
//! coordinator runs through the LuaScriptHost.

mod common {
    use derbyproto::AgentId;
    use jockey::{RaceRuntime, SandboxConfig};
    use paddock::{RunState, SessionHandle};
    use std::sync::Arc;
    use std::time::Duration;

    pub fn test_runtime() -> RaceRuntime {
        RaceRuntime::new(SandboxConfig {
            timeout: Duration::from_secs(5),
        })
    }

    pub fn solo_session(id: &str) -> SessionHandle {
        SessionHandle::new(AgentId::from(id), None, Arc::new(RunState::new()))
    }
}

use derbyconf::SyncConfig;
use derbyproto::{AgentConfig, RunMode};
use jockey::{LuaScriptHost, SandboxConfig};
use paddock::Coordinator;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn script_measures_a_named_interval() {
    let runtime = common::test_runtime();
    let session = common::solo_session("solo");

    let code = r#"
        function main(params)
            race.start("lap")
            local t = os.clock()
            while os.clock() - t < 0.02 do end
            local seconds = race.stop("lap")
            return seconds
        end
    "#;

    let result = runtime
        .execute(code, serde_json::json!({}), session.clone())
        .await
        .expect("script should succeed");

    let seconds = result.result.as_f64().unwrap();
    assert!(seconds >= 0.02, "measured {seconds}s");

    let (_, measurements, _) = session.snapshot();
    assert_eq!(measurements.len(), 1);
    assert_eq!(measurements[0].name, "lap");
}

#[tokio::test]
async fn stop_without_start_returns_zero() {
    let runtime = common::test_runtime();
    let session = common::solo_session("solo");

    let result = runtime
        .execute(
            r#"
            function main(params)
                return race.stop("never-started")
            end
            "#,
            serde_json::json!({}),
            session.clone(),
        )
        .await
        .unwrap();

    assert_eq!(result.result.as_f64().unwrap(), 0.0);
    let (_, measurements, _) = session.snapshot();
    assert!(measurements.is_empty());
}

#[tokio::test]
async fn explicit_recording_window_produces_segment() {
    let runtime = common::test_runtime();
    let session = common::solo_session("solo");

    runtime
        .execute(
            r#"
            function main(params)
                race.recording_start()
                race.start()
                race.stop()
                race.recording_end()
            end
            "#,
            serde_json::json!({}),
            session.clone(),
        )
        .await
        .unwrap();

    let (segments, measurements, _) = session.snapshot();
    assert_eq!(segments.len(), 1);
    assert_eq!(measurements.len(), 1);
    assert_eq!(measurements[0].name, "default");
}

#[tokio::test]
async fn message_coerces_values() {
    let runtime = common::test_runtime();
    let session = common::solo_session("solo");

    runtime
        .execute(
            r#"
            function main(params)
                race.message("plain")
                race.message(42)
                race.message(nil)
            end
            "#,
            serde_json::json!({}),
            session.clone(),
        )
        .await
        .unwrap();

    let (_, _, messages) = session.snapshot();
    assert_eq!(messages, vec!["plain", "42", "nil"]);
}

#[tokio::test]
async fn params_reach_the_script() {
    let runtime = common::test_runtime();
    let session = common::solo_session("solo");

    let result = runtime
        .execute(
            r#"
            function main(params)
                return params.url
            end
            "#,
            serde_json::json!({"url": "https://example.test"}),
            session,
        )
        .await
        .unwrap();

    assert_eq!(result.result, "https://example.test");
}

#[tokio::test]
async fn sandbox_has_no_io_table() {
    let runtime = common::test_runtime();
    let session = common::solo_session("solo");

    let result = runtime
        .execute(
            r#"
            function main(params)
                return io == nil
            end
            "#,
            serde_json::json!({}),
            session,
        )
        .await
        .unwrap();

    assert_eq!(result.result, true);
}

// ============================================================================
// Full coordinator runs through the Lua host
// ============================================================================

fn lua_agent(id: &str, sleep_centis: u32) -> AgentConfig {
    // Busy-wait on os.clock: the sandbox has no sleep, and these scripts
    // only need tens of milliseconds.
    let source = format!(
        r#"
        function main(params)
            race.start("lap")
            local t = os.clock()
            while os.clock() - t < 0.0{sleep_centis} do end
            race.stop("lap")
            race.message(params.agent .. " done")
        end
        "#
    );
    AgentConfig::new(id, source)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_lua_race_end_to_end() {
    let host = Arc::new(LuaScriptHost::new(SandboxConfig {
        timeout: Duration::from_secs(5),
    }));
    let agents = vec![lua_agent("fast", 2), lua_agent("slow", 6)];

    let coordinator = Coordinator::new(&SyncConfig {
        poll_interval_ms: 10,
    });
    let (results, state) = coordinator
        .run(host, &agents, RunMode::Parallel, CancellationToken::new())
        .await;

    assert_eq!(results.len(), 2);
    for result in &results {
        assert!(result.error.is_none(), "unexpected error: {:?}", result.error);
        assert_eq!(result.measurements.len(), 1);
        assert_eq!(result.segments.len(), 1);
        assert_eq!(result.messages.len(), 1);
    }
    assert!(results[0].measurements[0].duration < results[1].measurements[0].duration);
    assert_eq!(state.finish_order().len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failing_lua_script_becomes_partial_result() {
    let host = Arc::new(LuaScriptHost::with_defaults());
    let agents = vec![
        lua_agent("ok", 2),
        AgentConfig::new(
            "broken",
            r#"
            function main(params)
                race.start("lap")
                error("deliberate failure")
            end
            "#,
        ),
    ];

    let coordinator = Coordinator::new(&SyncConfig {
        poll_interval_ms: 10,
    });
    let (results, _) = coordinator
        .run(host, &agents, RunMode::Parallel, CancellationToken::new())
        .await;

    assert_eq!(results.len(), 2);
    assert!(results[0].error.is_none());
    let error = results[1].error.as_deref().unwrap();
    assert!(error.contains("deliberate failure"), "got: {error}");
}

#[tokio::test]
async fn sequential_lua_run() {
    let host = Arc::new(LuaScriptHost::with_defaults());
    let agents = vec![lua_agent("first", 1), lua_agent("second", 1)];

    let coordinator = Coordinator::new(&SyncConfig {
        poll_interval_ms: 10,
    });
    let (results, _) = coordinator
        .run(host, &agents, RunMode::Sequential, CancellationToken::new())
        .await;

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.error.is_none()));
    assert_eq!(results[0].messages[0], "first done");
    assert_eq!(results[1].messages[0], "second done");
}
