//! Extraction of the result text and file-change log from the child's
//! JSON output.
//!
//! The child is opaque; the only fields consumed are `result` and the
//! `tool_use` entries inside `messages[].content[]`. Parse failures are
//! recovered locally: the child has already exited, and its fate is decided
//! by its exit code, never by whether its output parsed.

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

/// Placeholder changelog content when nothing was modified.
pub const NO_CHANGES: &str = "(no file changes)";

/// Bash commands are truncated to this many characters before emission.
const BASH_TRUNCATE_CHARS: usize = 80;

#[derive(Debug, Default, Deserialize)]
pub struct RawOutput {
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub messages: Vec<RawMessage>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawMessage {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub input: Value,
}

/// What the parser hands back to the driver.
#[derive(Debug, PartialEq, Eq)]
pub struct Extracted {
    /// The primary answer; empty when the document had none.
    pub result: String,
    /// One line per recognized file modification, or [`NO_CHANGES`].
    pub changelog: String,
}

/// Extract result text and changelog from raw child stdout. Never fails:
/// a missing, empty, or unparseable document yields an empty result and the
/// no-changes placeholder, with a warning on the supervisor's stderr.
pub fn extract(raw: &str) -> Extracted {
    let doc: RawOutput = match serde_json::from_str(raw) {
        Ok(doc) => doc,
        Err(e) => {
            if !raw.trim().is_empty() {
                warn!(error = %e, "child output is not parseable JSON, result text unavailable");
            } else {
                warn!("child produced no output");
            }
            return Extracted {
                result: String::new(),
                changelog: NO_CHANGES.to_string(),
            };
        }
    };

    let mut lines = Vec::new();
    for message in &doc.messages {
        for block in &message.content {
            if block.kind != "tool_use" {
                continue;
            }
            if let Some(line) = changelog_line(&block.name, &block.input) {
                lines.push(line);
            }
        }
    }

    Extracted {
        result: doc.result.unwrap_or_default(),
        changelog: if lines.is_empty() {
            NO_CHANGES.to_string()
        } else {
            lines.join("\n")
        },
    }
}

fn str_field<'a>(input: &'a Value, key: &str) -> &'a str {
    input.get(key).and_then(Value::as_str).unwrap_or("")
}

/// One changelog line per recognized file-modifying tool use. Unknown tool
/// names produce nothing.
fn changelog_line(name: &str, input: &Value) -> Option<String> {
    match name {
        "Edit" => {
            let file = str_field(input, "file_path");
            let chars = str_field(input, "new_string").chars().count();
            Some(format!("EDIT {file}: {chars} chars"))
        }
        "Write" => Some(format!("WRITE {}", str_field(input, "file_path"))),
        "NotebookEdit" => Some(format!("NOTEBOOK {}", str_field(input, "notebook_path"))),
        "Bash" => bash_line(str_field(input, "command")),
        _ => None,
    }
}

/// Bash classification, applied to the command after truncation:
/// compound commands (`&&`, `||`, `;`, `|`) are orchestration noise and are
/// omitted; a bare `rm` is a delete; anything else is a filesystem touch.
fn bash_line(command: &str) -> Option<String> {
    let truncated: String = command.chars().take(BASH_TRUNCATE_CHARS).collect();
    if is_compound(&truncated) {
        return None;
    }
    let trimmed = truncated.trim();
    if trimmed == "rm" || trimmed.starts_with("rm ") {
        Some(format!("DELETE via bash: {truncated}"))
    } else {
        Some(format!("FS: {truncated}"))
    }
}

fn is_compound(command: &str) -> bool {
    command.contains("&&") || command.contains("||") || command.contains(';') || command.contains('|')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool_use(name: &str, input: Value) -> String {
        serde_json::json!({
            "result": "done",
            "messages": [{"content": [{"type": "tool_use", "name": name, "input": input}]}]
        })
        .to_string()
    }

    #[test]
    fn plain_result_no_tools() {
        let out = extract(r#"{"result":"OK","messages":[]}"#);
        assert_eq!(out.result, "OK");
        assert_eq!(out.changelog, NO_CHANGES);
    }

    #[test]
    fn missing_result_is_empty() {
        let out = extract(r#"{"messages":[]}"#);
        assert_eq!(out.result, "");
        assert_eq!(out.changelog, NO_CHANGES);
    }

    #[test]
    fn unparseable_document_recovers() {
        let out = extract("not json at all {");
        assert_eq!(out.result, "");
        assert_eq!(out.changelog, NO_CHANGES);
    }

    #[test]
    fn empty_document_recovers() {
        let out = extract("");
        assert_eq!(out.result, "");
        assert_eq!(out.changelog, NO_CHANGES);
    }

    #[test]
    fn edit_line_counts_new_string_chars() {
        let raw = tool_use(
            "Edit",
            serde_json::json!({"file_path": "src/a.go", "new_string": "x".repeat(341)}),
        );
        assert_eq!(extract(&raw).changelog, "EDIT src/a.go: 341 chars");
    }

    #[test]
    fn write_line() {
        let raw = tool_use("Write", serde_json::json!({"file_path": "src/b.go"}));
        assert_eq!(extract(&raw).changelog, "WRITE src/b.go");
    }

    #[test]
    fn notebook_line() {
        let raw = tool_use("NotebookEdit", serde_json::json!({"notebook_path": "nb.ipynb"}));
        assert_eq!(extract(&raw).changelog, "NOTEBOOK nb.ipynb");
    }

    #[test]
    fn bash_simple_delete() {
        let raw = tool_use("Bash", serde_json::json!({"command": "rm -rf /tmp/old-data"}));
        assert_eq!(extract(&raw).changelog, "DELETE via bash: rm -rf /tmp/old-data");
    }

    #[test]
    fn bash_bare_rm_is_a_delete() {
        let raw = tool_use("Bash", serde_json::json!({"command": "rm"}));
        assert_eq!(extract(&raw).changelog, "DELETE via bash: rm");
    }

    #[test]
    fn bash_non_delete_is_fs() {
        let raw = tool_use("Bash", serde_json::json!({"command": "touch marker"}));
        assert_eq!(extract(&raw).changelog, "FS: touch marker");
    }

    #[test]
    fn bash_compound_commands_are_omitted() {
        for cmd in [
            "make build && make test",
            "true || false",
            "cd /tmp; ls",
            "cat f | wc -l",
        ] {
            let raw = tool_use("Bash", serde_json::json!({"command": cmd}));
            assert_eq!(extract(&raw).changelog, NO_CHANGES, "command: {cmd}");
        }
    }

    #[test]
    fn bash_80_chars_kept_verbatim() {
        let cmd = format!("touch {}", "a".repeat(74));
        assert_eq!(cmd.chars().count(), 80);
        let raw = tool_use("Bash", serde_json::json!({"command": cmd}));
        assert_eq!(extract(&raw).changelog, format!("FS: {cmd}"));
    }

    #[test]
    fn bash_81_chars_truncated_to_80() {
        let cmd = format!("touch {}", "a".repeat(75));
        assert_eq!(cmd.chars().count(), 81);
        let raw = tool_use("Bash", serde_json::json!({"command": cmd}));
        let expected: String = cmd.chars().take(80).collect();
        assert_eq!(extract(&raw).changelog, format!("FS: {expected}"));
    }

    #[test]
    fn unknown_tools_are_ignored() {
        let raw = tool_use("Grep", serde_json::json!({"pattern": "x"}));
        assert_eq!(extract(&raw).changelog, NO_CHANGES);
    }

    #[test]
    fn lines_preserve_source_order() {
        let raw = serde_json::json!({
            "result": "three changes",
            "messages": [
                {"content": [
                    {"type": "tool_use", "name": "Edit",
                     "input": {"file_path": "src/a.go", "new_string": "y".repeat(341)}},
                    {"type": "text", "text": "thinking"},
                    {"type": "tool_use", "name": "Write", "input": {"file_path": "src/b.go"}}
                ]},
                {"content": [
                    {"type": "tool_use", "name": "Bash",
                     "input": {"command": "rm -rf /tmp/old-data"}}
                ]}
            ]
        })
        .to_string();
        let out = extract(&raw);
        assert_eq!(out.result, "three changes");
        assert_eq!(
            out.changelog,
            "EDIT src/a.go: 341 chars\nWRITE src/b.go\nDELETE via bash: rm -rf /tmp/old-data"
        );
    }

    #[test]
    fn line_count_matches_recognized_tool_uses() {
        let raw = serde_json::json!({
            "result": "",
            "messages": [
                {"content": [
                    {"type": "tool_use", "name": "Write", "input": {"file_path": "a"}},
                    {"type": "tool_use", "name": "Write", "input": {"file_path": "b"}},
                    {"type": "tool_use", "name": "Read", "input": {"file_path": "c"}},
                    {"type": "tool_use", "name": "Bash", "input": {"command": "ls && pwd"}},
                    {"type": "tool_use", "name": "Bash", "input": {"command": "mkdir d"}}
                ]}
            ]
        })
        .to_string();
        let out = extract(&raw);
        // Two writes and one simple bash survive; Read is unknown, the
        // compound bash is omitted.
        assert_eq!(out.changelog.lines().count(), 3);
    }

    #[test]
    fn extra_fields_are_ignored() {
        let raw = r#"{"result":"OK","messages":[],"session_id":"abc","usage":{"tokens":12}}"#;
        assert_eq!(extract(raw).result, "OK");
    }
}
