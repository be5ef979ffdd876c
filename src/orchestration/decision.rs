//! Parsing the coordinator's free-text decision.
//!
//! The coordinator is asked to answer with a line `TYPE: description`
//! optionally followed by a `<task>` block:
//!
//! ```text
//! EVOLVE: add caching
//!
//! <task><files>a.py
//! b.py</files><skills>perf, caching</skills></task>
//! ```
//!
//! Task types are tried in declaration order ([`TaskType::ALL`]), not in the
//! order they appear in the text: an output mentioning both `BUGFIX:` and
//! `EVOLVE:` parses as EVOLVE.

use super::types::{CoordinatorDecision, TaskType};

pub fn parse_decision(output: &str) -> Option<CoordinatorDecision> {
    TaskType::ALL.iter().find_map(|&task_type| {
        let description = find_description(output, task_type.as_str())?;

        let task_block = extract_block(output, "task")
            .map(|inner| format!("<task>{inner}</task>"))
            .unwrap_or_else(|| description.clone());
        let files = extract_block(&task_block, "files")
            .map(|inner| split_trimmed(inner, '\n'))
            .unwrap_or_default();
        let skills = extract_block(&task_block, "skills")
            .map(|inner| split_trimmed(inner, ','))
            .unwrap_or_default();

        Some(CoordinatorDecision {
            task_type,
            description,
            task_block,
            files,
            skills,
        })
    })
}

/// Text after the first `KEYWORD:` with a non-empty description, up to the
/// next blank line or the end of the output.
fn find_description(output: &str, keyword: &str) -> Option<String> {
    let marker = format!("{keyword}:");
    let mut search_from = 0;
    while let Some(pos) = output[search_from..].find(&marker) {
        let start = search_from + pos + marker.len();
        let rest = output[start..].trim_start();
        let end = rest.find("\n\n").unwrap_or(rest.len());
        let description = rest[..end].trim();
        if !description.is_empty() {
            return Some(description.to_string());
        }
        search_from = start;
    }
    None
}

/// Contents of the first `<tag>...</tag>` pair.
fn extract_block<'a>(text: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = text.find(&open)? + open.len();
    let len = text[start..].find(&close)?;
    Some(&text[start..start + len])
}

fn split_trimmed(text: &str, separator: char) -> Vec<String> {
    text.split(separator)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
