//! Planner prompt assembly and reply parsing

use crate::brain::LastResult;
use cogwheel_core::Signal;
use cogwheel_llm::LlmMessage;
use cogwheel_repl::extract_script_candidate;
use serde_json::Value;
use std::fmt::Write;

/// `[system, user]` for one planner turn.
pub fn build_messages<'a>(
    system_prompt: &str,
    signals: impl IntoIterator<Item = &'a Signal>,
    last: Option<&LastResult>,
    globals: &[String],
) -> Vec<LlmMessage> {
    let mut user = String::from("Recent signals:\n");
    let mut any = false;
    for signal in signals {
        any = true;
        let _ = writeln!(user, "{}", signal.summary_line());
    }
    if !any {
        user.push_str("(none)\n");
    }

    if let Some(last) = last {
        let _ = write!(user, "\nLast script:\n{}\n", last.script.trim());
        if !last.actions.is_empty() {
            let _ = writeln!(user, "Actions: {}", last.actions.join(", "));
        }
        if last.failed {
            let _ = writeln!(user, "It failed: {}", last.output);
        } else {
            let _ = writeln!(user, "Result: {}", last.output);
        }
    }

    if !globals.is_empty() {
        let _ = write!(user, "\nPersistent variables: {}\n", globals.join(", "));
    }

    vec![LlmMessage::system(system_prompt), LlmMessage::user(user.trim_end())]
}

/// Pull the script out of a model reply.
///
/// JSON replies carry it under `script` (or `code`); anything else is taken
/// as the script itself, minus a surrounding code fence.
pub fn script_from_reply(reply: &str, json_response: bool) -> Option<String> {
    let script = if json_response {
        let parsed: Value = serde_json::from_str(json_candidate(reply)).ok()?;
        ["script", "code"]
            .iter()
            .find_map(|key| parsed.get(*key).and_then(Value::as_str))
            .map(extract_script_candidate)?
    } else {
        extract_script_candidate(reply)
    };

    let script = script.trim();
    (!script.is_empty()).then(|| script.to_string())
}

fn json_candidate(reply: &str) -> &str {
    let trimmed = reply.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim);
    if let Some(inner) = unfenced {
        return inner;
    }
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if end > start => &trimmed[start..=end],
        _ => trimmed,
    }
}
