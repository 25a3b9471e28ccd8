//! Structured formatting for script errors.
//!
//! Agent scripts are written (and broken) by users; the raw mlua error
//! string buries the useful part under chunk names and tracebacks. This
//! module categorizes the failure, extracts the core message, and attaches
//! hints about the race API where they apply.

use serde::{Deserialize, Serialize};

/// Categories of script errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptErrorKind {
    /// Syntax error in Lua code
    Syntax,
    /// Missing main() function
    MissingMain,
    /// Calling a nil value (often a typo in a race.* name)
    NilCall,
    /// Type mismatch
    Type,
    /// Index/key error
    Index,
    /// Timeout during execution
    Timeout,
    /// Everything else
    Runtime,
}

/// A categorized script failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptError {
    pub kind: ScriptErrorKind,
    pub message: String,
    pub hints: Vec<String>,
}

impl ScriptError {
    pub fn format(&self) -> String {
        let kind = match self.kind {
            ScriptErrorKind::Syntax => "syntax error",
            ScriptErrorKind::MissingMain => "missing main() function",
            ScriptErrorKind::NilCall => "nil value call",
            ScriptErrorKind::Type => "type error",
            ScriptErrorKind::Index => "index error",
            ScriptErrorKind::Timeout => "timeout",
            ScriptErrorKind::Runtime => "runtime error",
        };

        let mut output = format!("script {kind}: {}", self.message);
        for hint in &self.hints {
            output.push_str("\n  hint: ");
            output.push_str(hint);
        }
        output
    }
}

/// Parse and format an execution error in one step.
pub fn format_script_error(error: &anyhow::Error) -> String {
    parse_error(error).format()
}

/// Categorize an execution error.
pub fn parse_error(error: &anyhow::Error) -> ScriptError {
    let error_string = format!("{error:#}");
    let kind = detect_kind(&error_string);
    ScriptError {
        kind,
        message: clean_message(&error_string),
        hints: hints_for(kind),
    }
}

fn detect_kind(error_string: &str) -> ScriptErrorKind {
    let lower = error_string.to_lowercase();

    if lower.contains("syntax error") || lower.contains("unexpected symbol") {
        ScriptErrorKind::Syntax
    } else if lower.contains("must define a main") || lower.contains("global 'main'") {
        ScriptErrorKind::MissingMain
    } else if lower.contains("attempt to call a nil value") {
        ScriptErrorKind::NilCall
    } else if lower.contains("attempt to index") || lower.contains("bad argument") {
        ScriptErrorKind::Index
    } else if lower.contains("timed out") || lower.contains("timeout") {
        ScriptErrorKind::Timeout
    } else if lower.contains("expected") && lower.contains("got") {
        ScriptErrorKind::Type
    } else {
        ScriptErrorKind::Runtime
    }
}

/// First meaningful line, with the `[string "..."]:N:` chunk prefix cut.
fn clean_message(error_string: &str) -> String {
    let mut message = error_string
        .lines()
        .find(|line| {
            let trimmed = line.trim();
            !trimmed.is_empty() && !trimmed.starts_with("stack traceback")
        })
        .unwrap_or(error_string)
        .trim()
        .to_string();

    if message.starts_with('[') {
        if let Some(idx) = message.find("]:") {
            let after = &message[idx + 2..];
            if let Some(colon) = after.find(": ") {
                message = after[colon + 2..].to_string();
            }
        }
    }

    message
}

fn hints_for(kind: ScriptErrorKind) -> Vec<String> {
    match kind {
        ScriptErrorKind::Syntax => vec![
            "check for missing 'end' statements and unclosed strings".to_string(),
        ],
        ScriptErrorKind::MissingMain => vec![
            "scripts must define a main(params) function".to_string(),
            "example: function main(params) race.start() race.stop() end".to_string(),
        ],
        ScriptErrorKind::NilCall => vec![
            "the race API is race.start, race.stop, race.recording_start, \
             race.recording_end, race.message"
                .to_string(),
        ],
        ScriptErrorKind::Timeout => vec![
            "the script exceeded its execution time limit".to_string(),
            "in parallel mode, an agent that never reaches a checkpoint holds \
             the round until it times out"
                .to_string(),
        ],
        ScriptErrorKind::Type | ScriptErrorKind::Index | ScriptErrorKind::Runtime => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn detects_nil_call() {
        let err = anyhow::anyhow!("attempt to call a nil value (field 'recordingstart')");
        let parsed = parse_error(&err);
        assert_eq!(parsed.kind, ScriptErrorKind::NilCall);
        assert!(parsed.format().contains("race.recording_start"));
    }

    #[test]
    fn detects_missing_main() {
        let err = anyhow::anyhow!("Script must define a main(params) function");
        assert_eq!(parse_error(&err).kind, ScriptErrorKind::MissingMain);
    }

    #[test]
    fn strips_chunk_prefix_from_message() {
        let cleaned = clean_message("[string \"chunk\"]:3: attempt to compare nil with number");
        assert_eq!(cleaned, "attempt to compare nil with number");
    }

    #[test]
    fn timeout_is_categorized() {
        let err = anyhow::anyhow!("Script execution timed out");
        assert_eq!(parse_error(&err).kind, ScriptErrorKind::Timeout);
    }
}
