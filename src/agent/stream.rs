//! Decoding of the agent CLI's `stream-json` output.
//!
//! Stdout arrives in arbitrary byte chunks. [`LineAssembler`] buffers partial
//! data and only releases complete newline-terminated lines; [`decode_line`]
//! then turns each line into zero or more [`StreamItem`]s. Lines that are not
//! JSON become plain `text` output and never abort the stream.

use std::path::Path;

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;

use super::types::{OutputKind, OutputLine, ToolUse};
use super::usage::TokenCounts;

/// Reassembles newline-delimited lines from byte chunks.
#[derive(Debug, Default)]
pub struct LineAssembler {
    pending: Vec<u8>,
}

impl LineAssembler {
    /// Append a chunk and return every line it completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let Some(last_newline) = self.pending.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };
        let complete: Vec<u8> = self.pending.drain(..=last_newline).collect();

        complete[..complete.len() - 1]
            .split(|b| *b == b'\n')
            .map(to_line)
            .collect()
    }

    /// Release whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(to_line(&rest))
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

fn to_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

/// One effect of a decoded line, applied by the runtime in order.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    /// The CLI's init event named the model serving this run.
    ModelResolved(String),
    /// A tool invocation (always followed by its `tool_use` output line).
    ToolUse(ToolUse),
    Output(OutputLine),
    /// The terminal `result` event.
    Completed {
        usage: Option<TokenCounts>,
        error: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum StreamRecord {
    #[serde(rename = "system")]
    System {
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default)]
        model: Option<String>,
    },
    #[serde(rename = "assistant")]
    Assistant { message: AssistantMessage },
    #[serde(rename = "content_block_delta")]
    ContentBlockDelta { delta: Delta },
    /// `--include-partial-messages` wraps API stream events in an envelope.
    #[serde(rename = "stream_event")]
    StreamEvent { event: InnerEvent },
    #[serde(rename = "result")]
    Result(ResultRecord),
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum InnerEvent {
    #[serde(rename = "content_block_delta")]
    ContentBlockDelta { delta: Delta },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "thinking")]
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    #[serde(rename = "text")]
    Text {
        #[serde(default)]
        text: String,
    },
    #[serde(rename = "tool_use")]
    ToolUse {
        #[serde(default = "unknown_tool")]
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

fn unknown_tool() -> String {
    "unknown".to_string()
}

#[derive(Debug, Deserialize)]
struct Delta {
    #[serde(rename = "type")]
    delta_type: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    thinking: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResultRecord {
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    is_error: bool,
    #[serde(default)]
    usage: Option<TokenCounts>,
}

/// Decode one complete line of CLI output.
///
/// Blank lines produce nothing. Non-JSON lines produce a single `text` line.
/// JSON that is not a recognised event shape is ignored.
pub fn decode_line(line: &str) -> Vec<StreamItem> {
    if line.trim().is_empty() {
        return Vec::new();
    }

    let value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(_) => return vec![StreamItem::Output(OutputLine::new(OutputKind::Text, line))],
    };

    let record = match serde_json::from_value::<StreamRecord>(value) {
        Ok(record) => record,
        Err(e) => {
            tracing::debug!(error = %e, "Ignoring unrecognised stream event");
            return Vec::new();
        }
    };

    match record {
        StreamRecord::System { subtype, model } => match (subtype.as_deref(), model) {
            (Some("init"), Some(model)) if !model.is_empty() => vec![StreamItem::ModelResolved(model)],
            _ => Vec::new(),
        },
        StreamRecord::Assistant { message } => decode_blocks(message.content),
        StreamRecord::ContentBlockDelta { delta }
        | StreamRecord::StreamEvent {
            event: InnerEvent::ContentBlockDelta { delta },
        } => decode_delta(delta).into_iter().collect(),
        StreamRecord::Result(result) => {
            let mut items = Vec::with_capacity(2);
            let text = result.result.unwrap_or_default();
            if !text.is_empty() {
                items.push(StreamItem::Output(OutputLine::new(OutputKind::Result, text.clone())));
            }
            let error = result.is_error.then(|| {
                if text.is_empty() {
                    "Agent reported an error".to_string()
                } else {
                    text
                }
            });
            items.push(StreamItem::Completed {
                usage: result.usage,
                error,
            });
            items
        }
        StreamRecord::StreamEvent {
            event: InnerEvent::Other,
        }
        | StreamRecord::Other => Vec::new(),
    }
}

fn decode_blocks(blocks: Vec<Value>) -> Vec<StreamItem> {
    let mut items = Vec::new();
    for block in blocks {
        let Ok(block) = serde_json::from_value::<ContentBlock>(block) else {
            continue;
        };
        match block {
            ContentBlock::Thinking { thinking } if !thinking.is_empty() => {
                items.push(StreamItem::Output(OutputLine::new(OutputKind::Thinking, thinking)));
            }
            ContentBlock::Text { text } if !text.is_empty() => {
                items.push(StreamItem::Output(OutputLine::new(OutputKind::Text, text)));
            }
            ContentBlock::ToolUse { name, input } => {
                let line = OutputLine::new(OutputKind::ToolUse, format!("Using tool: {name}"))
                    .with_metadata("tool", Value::String(name.clone()))
                    .with_metadata("input", input.clone());
                items.push(StreamItem::ToolUse(ToolUse {
                    name,
                    input,
                    timestamp: Utc::now(),
                }));
                items.push(StreamItem::Output(line));
            }
            _ => {}
        }
    }
    items
}

fn decode_delta(delta: Delta) -> Option<StreamItem> {
    let (kind, content) = match delta.delta_type.as_str() {
        "thinking_delta" => (OutputKind::ThinkingDelta, delta.thinking?),
        "text_delta" => (OutputKind::TextDelta, delta.text?),
        _ => return None,
    };
    if content.is_empty() {
        return None;
    }
    Some(StreamItem::Output(OutputLine::new(kind, content)))
}

/// Base name of the file an Edit/Write tool call targets, if any.
pub fn modified_file(tool: &ToolUse) -> Option<String> {
    if tool.name != "Edit" && tool.name != "Write" {
        return None;
    }
    let path = tool.input.get("file_path")?.as_str()?;
    if path.is_empty() {
        return None;
    }
    Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outputs(items: &[StreamItem]) -> Vec<(OutputKind, String)> {
        items
            .iter()
            .filter_map(|item| match item {
                StreamItem::Output(line) => Some((line.kind, line.content.clone())),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn assembler_holds_partial_lines_until_newline() {
        let mut asm = LineAssembler::default();
        assert!(asm.push(b"{\"type\":").is_empty());
        assert_eq!(asm.pending_len(), 8);

        let lines = asm.push(b"\"result\"}\nnext");
        assert_eq!(lines, vec!["{\"type\":\"result\"}"]);
        assert_eq!(asm.finish(), Some("next".to_string()));
        assert_eq!(asm.finish(), None);
    }

    #[test]
    fn assembler_splits_multiple_lines_in_one_chunk() {
        let mut asm = LineAssembler::default();
        let lines = asm.push(b"a\r\nb\n\nc\n");
        assert_eq!(lines, vec!["a", "b", "", "c"]);
        assert_eq!(asm.pending_len(), 0);
    }

    #[test]
    fn assembler_does_not_split_multibyte_characters() {
        let text = "héllo wörld\n".as_bytes();
        let mut asm = LineAssembler::default();
        let mut lines = Vec::new();
        for byte in text {
            lines.extend(asm.push(std::slice::from_ref(byte)));
        }
        assert_eq!(lines, vec!["héllo wörld"]);
    }

    fn reassemble(chunks: &[&[u8]]) -> Vec<String> {
        let mut asm = LineAssembler::default();
        let mut lines: Vec<String> = chunks.iter().flat_map(|chunk| asm.push(chunk)).collect();
        lines.extend(asm.finish());
        lines
    }

    #[test]
    fn every_chunking_yields_the_same_lines() {
        let expected = [
            r#"{"type":"assistant","message":{"content":[{"type":"text","text":"café ✓"}]}}"#,
            "warning: naïve {not json",
            r#"{"type":"content_block_delta","delta":{"type":"text_delta","text":"ünï"}}"#,
            "}{ 🚀",
            r#"{"type":"assistant","message":{"content":[{"type":"thinking","thinking":"ok"}]}}"#,
        ];
        let bytes = expected.join("\n").into_bytes();

        for i in 0..=bytes.len() {
            assert_eq!(reassemble(&[&bytes[..i], &bytes[i..]]), expected, "cut at {i}");
            for j in i..=bytes.len() {
                assert_eq!(
                    reassemble(&[&bytes[..i], &bytes[i..j], &bytes[j..]]),
                    expected,
                    "cuts at {i} and {j}"
                );
            }
        }

        // One output line per logical line, text fallback only for the malformed ones.
        let kinds: Vec<OutputKind> = expected
            .iter()
            .flat_map(|line| outputs(&decode_line(line)))
            .map(|(kind, _)| kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                OutputKind::Text,
                OutputKind::Text,
                OutputKind::TextDelta,
                OutputKind::Text,
                OutputKind::Thinking,
            ]
        );
        assert_eq!(outputs(&decode_line(expected[1]))[0].1, expected[1]);
        assert_eq!(outputs(&decode_line(expected[3]))[0].1, expected[3]);
    }

    #[test]
    fn non_json_line_becomes_text() {
        let items = decode_line("npm WARN deprecated something");
        assert_eq!(
            outputs(&items),
            vec![(OutputKind::Text, "npm WARN deprecated something".to_string())]
        );
    }

    #[test]
    fn blank_line_is_skipped() {
        assert!(decode_line("   ").is_empty());
    }

    #[test]
    fn init_event_resolves_model() {
        let items = decode_line(
            r#"{"type":"system","subtype":"init","session_id":"s","model":"claude-sonnet-4-20250514","tools":[]}"#,
        );
        assert_eq!(items, vec![StreamItem::ModelResolved("claude-sonnet-4-20250514".to_string())]);
    }

    #[test]
    fn assistant_blocks_are_emitted_in_order() {
        let items = decode_line(
            r#"{"type":"assistant","message":{"content":[
                {"type":"thinking","thinking":"plan it"},
                {"type":"text","text":"Editing now"},
                {"type":"tool_use","id":"t1","name":"Edit","input":{"file_path":"/repo/src/app.py"}}
            ]}}"#
                .replace('\n', "")
                .as_str(),
        );

        assert_eq!(
            outputs(&items),
            vec![
                (OutputKind::Thinking, "plan it".to_string()),
                (OutputKind::Text, "Editing now".to_string()),
                (OutputKind::ToolUse, "Using tool: Edit".to_string()),
            ]
        );
        let tool = items
            .iter()
            .find_map(|i| match i {
                StreamItem::ToolUse(t) => Some(t.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(tool.name, "Edit");
        assert_eq!(modified_file(&tool), Some("app.py".to_string()));
    }

    #[test]
    fn deltas_are_decoded_bare_and_wrapped() {
        let bare = decode_line(r#"{"type":"content_block_delta","delta":{"type":"thinking_delta","thinking":"hmm"}}"#);
        assert_eq!(outputs(&bare), vec![(OutputKind::ThinkingDelta, "hmm".to_string())]);

        let wrapped = decode_line(
            r#"{"type":"stream_event","session_id":"s","event":{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}}"#,
        );
        assert_eq!(outputs(&wrapped), vec![(OutputKind::TextDelta, "Hi".to_string())]);

        let other = decode_line(r#"{"type":"stream_event","session_id":"s","event":{"type":"message_stop"}}"#);
        assert!(other.is_empty());
    }

    #[test]
    fn result_event_carries_usage() {
        let items = decode_line(
            r#"{"type":"result","subtype":"success","result":"All done","is_error":false,"usage":{"input_tokens":10,"output_tokens":20,"cache_read_input_tokens":5}}"#,
        );
        assert_eq!(outputs(&items), vec![(OutputKind::Result, "All done".to_string())]);
        match items.last().unwrap() {
            StreamItem::Completed { usage: Some(usage), error: None } => {
                assert_eq!(usage.input_tokens, 10);
                assert_eq!(usage.output_tokens, 20);
                assert_eq!(usage.cache_read_input_tokens, 5);
                assert_eq!(usage.cache_creation_input_tokens, 0);
            }
            other => panic!("expected Completed with usage, got {other:?}"),
        }
    }

    #[test]
    fn error_result_reports_error() {
        let items = decode_line(r#"{"type":"result","subtype":"error_during_execution","is_error":true}"#);
        assert_eq!(
            items,
            vec![StreamItem::Completed {
                usage: None,
                error: Some("Agent reported an error".to_string())
            }]
        );
    }

    #[test]
    fn unknown_json_is_ignored() {
        assert!(decode_line(r#"{"type":"user","message":{"content":[]}}"#).is_empty());
        assert!(decode_line(r#"{"no_type":true}"#).is_empty());
        assert!(decode_line("42").is_empty());
    }

    #[test]
    fn only_edit_and_write_modify_files() {
        let tool = |name: &str| ToolUse {
            name: name.to_string(),
            input: serde_json::json!({"file_path": "/a/b/c.rs"}),
            timestamp: Utc::now(),
        };
        assert_eq!(modified_file(&tool("Write")), Some("c.rs".to_string()));
        assert_eq!(modified_file(&tool("Read")), None);
    }
}
