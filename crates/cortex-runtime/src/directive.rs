//! Action directives embedded in LLM replies.
//!
//! A directive is any JSON object in the reply carrying a string `"action"`
//! field; its parameters come from `"params"` (default `{}`):
//!
//! ```text
//! Sure! {"action": "G1Speech", "params": {"text": "Hello"}}
//! [{"action": "G1Emotion", "params": {"emotion": "happy"}}, {"action": "G1Arms", "params": {"gesture": "wave"}}]
//! ```
//!
//! Objects are found with a brace scanner that skips over JSON strings, so
//! `{"text": "a } inside"}` is one object.  A braced region that is not valid
//! JSON is reported as malformed.  A valid object without `"action"` is not a
//! directive itself but is searched for nested ones, so wrappers such as
//! `{"actions": [{"action": ...}]}` work.
//!
//! # Example
//!
//! ```rust
//! use cortex_runtime::directive::parse_directives;
//!
//! let scan = parse_directives(r#"ok {"action": "speech", "params": {"text": "hi"}} {oops}"#);
//! assert_eq!(scan.commands.len(), 1);
//! assert_eq!(scan.commands[0].action_name, "speech");
//! assert_eq!(scan.malformed.len(), 1);
//! ```

use std::fmt::Write as _;

use cortex_types::ActionCommand;
use schemars::schema_for;
use serde_json::{Map, Value, json};

/// Result of scanning one reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DirectiveScan {
    /// Directives in textual order.
    pub commands: Vec<ActionCommand>,
    /// Braced regions that could not be used, with the reason.
    pub malformed: Vec<String>,
    /// Valid JSON objects that carried no `"action"` themselves.
    pub other_objects: usize,
}

impl DirectiveScan {
    /// `true` when the text held no JSON object at all, well-formed or not.
    pub fn is_plain_text(&self) -> bool {
        self.commands.is_empty() && self.malformed.is_empty() && self.other_objects == 0
    }
}

/// Byte index of the `}` closing the object opened at `start`, skipping
/// braces inside JSON strings.
fn matching_brace(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}

fn snippet(text: &str) -> String {
    const MAX: usize = 60;
    match text.char_indices().nth(MAX) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}

fn command_from(object: Map<String, Value>) -> Result<Option<ActionCommand>, String> {
    match object.get("action") {
        None => Ok(None),
        Some(Value::String(name)) if !name.trim().is_empty() => Ok(Some(ActionCommand::new(
            name.trim(),
            object.get("params").cloned().unwrap_or_else(|| json!({})),
        ))),
        Some(other) => Err(format!("\"action\" must be a non-empty string, got {other}")),
    }
}

/// Extract every directive from `text`, in order.
pub fn parse_directives(text: &str) -> DirectiveScan {
    let bytes = text.as_bytes();
    let mut scan = DirectiveScan::default();
    let mut cursor = 0;

    while let Some(found) = bytes[cursor..].iter().position(|&b| b == b'{') {
        let start = cursor + found;
        let Some(end) = matching_brace(bytes, start) else {
            scan.malformed.push(format!("unterminated object: {}", snippet(&text[start..])));
            // Objects nested inside the unterminated one may still be whole.
            cursor = start + 1;
            continue;
        };
        let region = &text[start..=end];
        match serde_json::from_str::<Value>(region) {
            Ok(Value::Object(object)) => match command_from(object) {
                Ok(Some(command)) => {
                    scan.commands.push(command);
                    cursor = end + 1;
                }
                Ok(None) => {
                    // Not a directive, but it may wrap some.
                    scan.other_objects += 1;
                    cursor = start + 1;
                }
                Err(reason) => {
                    scan.malformed.push(format!("{reason}: {}", snippet(region)));
                    cursor = end + 1;
                }
            },
            Ok(_) | Err(_) => {
                scan.malformed.push(format!("invalid JSON: {}", snippet(region)));
                cursor = start + 1;
            }
        }
    }
    scan
}

/// Prompt section telling the model how to act.
///
/// `actions` pairs each registered action name with its usage line.
pub fn directive_guide<'a>(actions: impl IntoIterator<Item = (&'a str, String)>) -> String {
    let mut guide = String::from(
        "## Actions\n\
         To act, embed one JSON object per action anywhere in your reply:\n\
         {\"action\": \"<name>\", \"params\": { ... }}\n\
         Actions run in the order they appear. Available actions:\n",
    );
    for (name, usage) in actions {
        let _ = writeln!(guide, "- {name}: {usage}");
    }
    let schema = serde_json::to_string(&schema_for!(ActionCommand)).unwrap_or_default();
    let _ = write!(guide, "Directive JSON schema: {schema}");
    guide
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(scan: &DirectiveScan) -> Vec<&str> {
        scan.commands.iter().map(|c| c.action_name.as_str()).collect()
    }

    #[test]
    fn finds_directives_in_prose_in_order() {
        let scan = parse_directives(
            r#"Hello! {"action": "emotion", "params": {"emotion": "happy"}}
            Then {"action": "speech", "params": {"text": "hi"}} and done."#,
        );
        assert_eq!(names(&scan), ["emotion", "speech"]);
        assert_eq!(scan.commands[1].params, json!({"text": "hi"}));
        assert!(scan.malformed.is_empty());
    }

    #[test]
    fn params_default_to_empty_object() {
        let scan = parse_directives(r#"{"action": "arms"}"#);
        assert_eq!(scan.commands[0].params, json!({}));
    }

    #[test]
    fn arrays_and_code_fences_work() {
        let scan = parse_directives(
            "```json\n[{\"action\": \"a\"}, {\"action\": \"b\", \"params\": {\"x\": 1}}]\n```",
        );
        assert_eq!(names(&scan), ["a", "b"]);
    }

    #[test]
    fn braces_inside_strings_are_ignored() {
        let scan = parse_directives(r#"{"action": "speech", "params": {"text": "smile :} or {"}}"#);
        assert_eq!(names(&scan), ["speech"]);
        assert_eq!(scan.commands[0].params["text"], "smile :} or {");
    }

    #[test]
    fn escaped_quotes_do_not_end_strings() {
        let scan = parse_directives(r#"{"action": "speech", "params": {"text": "say \"}\" now"}}"#);
        assert_eq!(names(&scan), ["speech"]);
    }

    #[test]
    fn malformed_region_does_not_hide_later_directives() {
        let scan = parse_directives(r#"{action: nope} {"action": "speech"} {"action": 7} {"action": "arms"}"#);
        assert_eq!(names(&scan), ["speech", "arms"]);
        assert_eq!(scan.malformed.len(), 2);
    }

    #[test]
    fn objects_without_action_are_not_plain_text() {
        let scan = parse_directives(r#"My reading: {"temp": 20}"#);
        assert!(scan.commands.is_empty());
        assert!(scan.malformed.is_empty());
        assert_eq!(scan.other_objects, 1);
        assert!(!scan.is_plain_text());
    }

    #[test]
    fn directives_inside_a_wrapper_object_are_found() {
        let scan = parse_directives(
            r#"{"actions": [{"action": "arms", "params": {"gesture": "wave"}}, {"action": "speech", "params": {"text": "hi"}}]}"#,
        );
        assert_eq!(names(&scan), ["arms", "speech"]);
        assert_eq!(scan.commands[0].params, json!({"gesture": "wave"}));
        assert!(scan.malformed.is_empty());
    }

    #[test]
    fn params_objects_are_not_scanned_for_directives() {
        let scan = parse_directives(r#"{"action": "speech", "params": {"text": "x", "meta": {"action": "arms"}}}"#);
        assert_eq!(names(&scan), ["speech"]);
    }

    #[test]
    fn unterminated_object_is_malformed_but_inner_objects_survive() {
        let scan = parse_directives(r#"{"plan": [ {"action": "speech"} "#);
        assert_eq!(names(&scan), ["speech"]);
        assert_eq!(scan.malformed.len(), 1);
        assert!(scan.malformed[0].starts_with("unterminated"));
    }

    #[test]
    fn plain_text_has_no_directives() {
        let scan = parse_directives("I see a person waving at me.");
        assert!(scan.is_plain_text());
    }

    #[test]
    fn multibyte_text_is_handled() {
        let scan = parse_directives(r#"Olá, você! {"action": "speech", "params": {"text": "olá 👋"}}"#);
        assert_eq!(scan.commands[0].params["text"], "olá 👋");
    }

    #[test]
    fn guide_lists_actions_and_schema() {
        let guide = directive_guide([("G1Speech", "{\"text\": string}".to_string())]);
        assert!(guide.contains("- G1Speech: {\"text\": string}"));
        assert!(guide.contains("\"action\""));
        assert!(guide.contains("ActionCommand"));
    }
}
