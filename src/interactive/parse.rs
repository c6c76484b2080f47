//! Extracts the next unit of interpreter code from a root-model response.
//!
//! The model's free-form text can carry the next step to execute in several
//! shapes. They are tried in a fixed priority order and the first *tier*
//! with any match wins — a response is never re-scanned for a lower-priority
//! form once a higher one matched. Within the winning tier, every block is
//! kept: they are concatenated in order of appearance, separated by a blank
//! line, so a response with several fenced blocks of the same kind runs them
//! all rather than silently dropping everything after the first.
//!
//!   1. fenced ```repl``` blocks
//!   2. fenced ```python``` / ```py``` blocks
//!   3. `<repl>...</repl>`
//!   4. `<rlm_query>...</rlm_query>`
//!   5. `<llm_query>...</llm_query>`
//!   6. structured `<tool_call><invoke name="...">...` forms
//!
//! Everything is normalized down to a single string of interpreter code:
//! fenced/tag code blocks pass through verbatim, while query forms are
//! rewritten into a call to the matching interpreter helper (`llm_query`,
//! `rlm_query`, or their `_batched` variants) so the interpreter host sees a
//! uniform `execute(code)` surface.

use regex::Regex;

pub fn extract_code(text: &str) -> Option<String> {
    if let Some(blocks) = fenced_blocks(text, "repl") {
        return Some(join_blocks(blocks));
    }
    if let Some(mut blocks) = fenced_blocks(text, "python") {
        if let Some(more) = fenced_blocks(text, "py") {
            blocks.extend(more);
        }
        return Some(join_blocks(blocks));
    }
    if let Some(blocks) = fenced_blocks(text, "py") {
        return Some(join_blocks(blocks));
    }
    if let Some(blocks) = tag_blocks(text, "repl") {
        return Some(join_blocks(blocks));
    }
    if let Some(prompts) = tag_blocks(text, "rlm_query") {
        let calls = prompts
            .into_iter()
            .map(|p| format!("print(rlm_query({}))", python_literal(&p)))
            .collect();
        return Some(join_blocks(calls));
    }
    if let Some(prompts) = tag_blocks(text, "llm_query") {
        let calls = prompts
            .into_iter()
            .map(|p| format!("print(llm_query({}))", python_literal(&p)))
            .collect();
        return Some(join_blocks(calls));
    }
    if let Some(calls) = tool_call_blocks(text) {
        return Some(join_blocks(calls));
    }
    None
}

fn join_blocks(blocks: Vec<String>) -> String {
    blocks.join("\n\n")
}

fn fenced_blocks(text: &str, lang: &str) -> Option<Vec<String>> {
    let pattern = format!(r"(?s)```{lang}\s*\n(.*?)```");
    let re = Regex::new(&pattern).ok()?;
    let blocks: Vec<String> = re
        .captures_iter(text)
        .map(|c| c[1].trim_end().to_string())
        .collect();
    if blocks.is_empty() {
        None
    } else {
        Some(blocks)
    }
}

fn tag_blocks(text: &str, tag: &str) -> Option<Vec<String>> {
    let pattern = format!(r"(?s)<{tag}>\s*(.*?)\s*</{tag}>");
    let re = Regex::new(&pattern).ok()?;
    let blocks: Vec<String> = re
        .captures_iter(text)
        .map(|c| c[1].trim().to_string())
        .collect();
    if blocks.is_empty() {
        None
    } else {
        Some(blocks)
    }
}

/// Rewrites every `<tool_call><invoke name="...">...<parameter name="...">v</parameter>...`
/// form into its matching helper call, in order of appearance. Unknown
/// invoke names are skipped rather than aborting the whole extraction.
fn tool_call_blocks(text: &str) -> Option<Vec<String>> {
    let invoke_re = Regex::new(r#"(?s)<invoke name="([^"]+)">(.*?)</invoke>"#).ok()?;
    let param_re = Regex::new(r#"(?s)<parameter name="([^"]+)">(.*?)</parameter>"#).ok()?;

    let mut calls = Vec::new();
    for invoke in invoke_re.captures_iter(text) {
        let name = invoke[1].trim();
        let body = &invoke[2];

        let mut params: Vec<(String, String)> = Vec::new();
        for cap in param_re.captures_iter(body) {
            params.push((cap[1].trim().to_string(), cap[2].trim().to_string()));
        }
        let get = |key: &str| params.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone());

        let call = match name {
            "llm_query" => {
                let Some(prompt) = get("prompt") else { continue };
                match get("model") {
                    Some(model) => format!(
                        "print(llm_query({}, model={}))",
                        python_literal(&prompt),
                        python_literal(&model)
                    ),
                    None => format!("print(llm_query({}))", python_literal(&prompt)),
                }
            }
            "rlm_query" => {
                let Some(prompt) = get("prompt") else { continue };
                match get("model") {
                    Some(model) => format!(
                        "print(rlm_query({}, model={}))",
                        python_literal(&prompt),
                        python_literal(&model)
                    ),
                    None => format!("print(rlm_query({}))", python_literal(&prompt)),
                }
            }
            "llm_query_batched" | "rlm_query_batched" => {
                let Some(prompts) = get("prompts") else { continue };
                let list_literal = python_list_literal(&prompts);
                format!("print({name}({list_literal}))")
            }
            _ => continue,
        };
        calls.push(call);
    }

    if calls.is_empty() {
        None
    } else {
        Some(calls)
    }
}

/// Renders `s` as a triple-quoted Python string literal, safe for embedded
/// newlines and quotes.
fn python_literal(s: &str) -> String {
    let escaped = s.replace('\\', "\\\\").replace("\"\"\"", "\\\"\\\"\\\"");
    format!("\"\"\"{escaped}\"\"\"")
}

/// `prompts` arrives as a newline- or JSON-array-shaped blob; either way we
/// normalize it to a Python list-of-strings literal.
fn python_list_literal(raw: &str) -> String {
    if let Ok(serde_json::Value::Array(items)) = serde_json::from_str(raw) {
        let rendered: Vec<String> = items
            .iter()
            .map(|v| python_literal(v.as_str().unwrap_or_default()))
            .collect();
        return format!("[{}]", rendered.join(", "));
    }

    let rendered: Vec<String> = raw
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(python_literal)
        .collect();
    format!("[{}]", rendered.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_fenced_repl_over_python() {
        let text = "```repl\nprint(1)\n```\n```python\nprint(2)\n```";
        assert_eq!(extract_code(text), Some("print(1)".to_string()));
    }

    #[test]
    fn falls_back_to_fenced_python_then_py() {
        assert_eq!(
            extract_code("```python\nx = 1\n```"),
            Some("x = 1".to_string())
        );
        assert_eq!(extract_code("```py\ny = 2\n```"), Some("y = 2".to_string()));
    }

    #[test]
    fn repl_tag_wins_over_query_tags() {
        let text = "<repl>print('a')</repl>\n<llm_query>ignored</llm_query>";
        assert_eq!(extract_code(text), Some("print('a')".to_string()));
    }

    #[test]
    fn rlm_query_tag_becomes_a_helper_call() {
        let text = "<rlm_query>summarize the auth module</rlm_query>";
        let code = extract_code(text).unwrap();
        assert!(code.starts_with("print(rlm_query("));
        assert!(code.contains("summarize the auth module"));
    }

    #[test]
    fn tool_call_invoke_rewrites_to_llm_query_with_model() {
        let text = r#"<tool_call><invoke name="llm_query"><parameter name="prompt">hello</parameter><parameter name="model">haiku</parameter></invoke></tool_call>"#;
        let code = extract_code(text).unwrap();
        assert!(code.contains("llm_query("));
        assert!(code.contains("hello"));
        assert!(code.contains("model="));
    }

    #[test]
    fn no_recognizable_block_yields_none() {
        assert_eq!(extract_code("just some prose, no code here"), None);
    }

    #[test]
    fn multiple_repl_blocks_are_concatenated_in_order() {
        let text = "```repl\na = 1\n```\nsome commentary\n```repl\nprint(a)\n```";
        assert_eq!(extract_code(text), Some("a = 1\n\nprint(a)".to_string()));
    }

    #[test]
    fn multiple_invokes_become_separate_statements() {
        let text = r#"<tool_call>
<invoke name="llm_query"><parameter name="prompt">first</parameter></invoke>
<invoke name="llm_query"><parameter name="prompt">second</parameter></invoke>
</tool_call>"#;
        let code = extract_code(text).unwrap();
        let lines: Vec<&str> = code.split("\n\n").collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("first"));
        assert!(lines[1].contains("second"));
    }
}
