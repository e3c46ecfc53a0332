use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use tracing::warn;

use crate::results::Results;
use crate::sanitize::escape_html;
use crate::value::{display_value, get_nested_value, is_present, UNSAFE_IDENTIFIERS};

/// Rendering mode for a single call. `Loading` swaps every substitution for
/// shimmer-pill placeholder markup; it is a pure per-call flag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RenderMode {
    #[default]
    Normal,
    Loading,
}

impl RenderMode {
    pub fn is_loading(self) -> bool {
        matches!(self, RenderMode::Loading)
    }
}

fn safe_expression_regex() -> &'static Regex {
    static SAFE_EXPRESSION_REGEX: OnceLock<Regex> = OnceLock::new();
    SAFE_EXPRESSION_REGEX.get_or_init(|| {
        // data.length | data[i].<path> | bare <path>
        Regex::new(r"^(?:data\.length|data\[\d+\](?:\.\w+(?:\[\d+\])*)+|\w+(?:\[\d+\])*(?:\.\w+(?:\[\d+\])*)*)$")
            .unwrap()
    })
}

fn data_index_regex() -> &'static Regex {
    static DATA_INDEX_REGEX: OnceLock<Regex> = OnceLock::new();
    DATA_INDEX_REGEX.get_or_init(|| Regex::new(r"^data\[(\d+)\]\.(.+)$").unwrap())
}

/// Reject-by-default check on the raw expression text, before any
/// resolution is attempted. Only the three recognized access forms pass,
/// and no path segment may be an unsafe identifier.
pub(crate) fn is_safe_expression(expr: &str) -> bool {
    if !safe_expression_regex().is_match(expr) {
        return false;
    }
    expr.split(['.', '[', ']'])
        .filter(|s| !s.is_empty())
        .all(|segment| !UNSAFE_IDENTIFIERS.contains(&segment))
}

/// Evaluate a restricted template expression against the root result set.
///
/// Recognized forms, in order: `data.length`, `data[<i>].<path>`, and a bare
/// `<path>` resolved against the first row. Anything else is blocked with a
/// warning and yields `None`. In `Loading` mode every expression yields
/// `None` so the fallback layer can emit placeholder markup instead.
pub fn evaluate_expression(expr: &str, results: Option<&Results>, mode: RenderMode) -> Option<Value> {
    if mode.is_loading() {
        return None;
    }
    let results = results?;
    if !is_safe_expression(expr) {
        warn!("blocked potentially unsafe expression: {expr}");
        return None;
    }
    if expr == "data.length" {
        return Some(Value::from(results.rows.len()));
    }
    if let Some(caps) = data_index_regex().captures(expr) {
        let index: usize = caps[1].parse().ok()?;
        let path = caps.get(2).map(|m| m.as_str())?;
        return results
            .rows
            .get(index)
            .and_then(|row| get_nested_value(row, path))
            .cloned();
    }
    results
        .rows
        .first()
        .and_then(|row| get_nested_value(row, expr))
        .cloned()
}

/// Split an expression on its first `||` into (main, fallback).
pub(crate) fn split_fallback(expr: &str) -> Option<(&str, &str)> {
    expr.find("||")
        .map(|pos| (&expr[..pos], &expr[pos + 2..]))
}

/// If `text` is a quoted literal (single or double quotes), return the
/// quoted content.
pub(crate) fn literal_text(text: &str) -> Option<&str> {
    if text.len() >= 2
        && ((text.starts_with('\'') && text.ends_with('\''))
            || (text.starts_with('"') && text.ends_with('"')))
    {
        Some(&text[1..text.len() - 1])
    } else {
        None
    }
}

/// Shimmer placeholder sized by a step function of the text it stands in
/// for, so loading skeletons approximate final content width.
pub(crate) fn loading_pill(text_hint: &str) -> String {
    let width = match text_hint.chars().count() {
        0..=5 => "60px",
        6..=10 => "80px",
        11..=15 => "120px",
        _ => "160px",
    };
    format!(
        "<span class=\"loading-pill\" style=\"display: inline-block; width: {width}; height: 1em; \
         background: linear-gradient(90deg, #f0f0f0 25%, #e0e0e0 50%, #f0f0f0 75%); \
         background-size: 200% 100%; animation: shimmer 1.5s infinite; border-radius: 4px; \
         filter: blur(0.5px);\"></span>"
    )
}

/// Evaluate an expression with optional `expr || fallback` semantics,
/// producing the final substitution text.
///
/// A resolved value is used when it is neither missing, `null`, nor an empty
/// string; resolved values are HTML-escaped. Quoted fallbacks are used
/// verbatim; unquoted fallbacks are evaluated as expressions and degrade to
/// their own raw text. Without a fallback, a missing value echoes the token
/// (`{expr}`) so broken references stay visible. In `Loading` mode the
/// output is a shimmer pill sized by the would-be text.
pub fn evaluate_fallback(expr: &str, results: Option<&Results>, mode: RenderMode) -> String {
    match split_fallback(expr) {
        Some((main, fallback)) => {
            let fallback = fallback.trim();
            if mode.is_loading() {
                return loading_pill(literal_text(fallback).unwrap_or(fallback));
            }
            if let Some(value) =
                evaluate_expression(main.trim(), results, mode).filter(is_present)
            {
                return escape_html(&display_value(&value));
            }
            if let Some(text) = literal_text(fallback) {
                return text.to_string();
            }
            match evaluate_expression(fallback, results, mode) {
                Some(value) => escape_html(&display_value(&value)),
                None => fallback.to_string(),
            }
        }
        None => {
            if mode.is_loading() {
                return loading_pill(expr.trim());
            }
            match evaluate_expression(expr, results, mode) {
                Some(value) => escape_html(&display_value(&value)),
                None => format!("{{{expr}}}"),
            }
        }
    }
}
