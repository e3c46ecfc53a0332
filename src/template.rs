use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_json::Value;
use tracing::warn;

use crate::expr::{
    evaluate_expression, evaluate_fallback, is_safe_expression, literal_text, loading_pill,
    split_fallback, RenderMode,
};
use crate::results::Results;
use crate::sanitize::escape_html;
use crate::value::{display_value, get_nested_value, is_present};

const LOOP_OPEN: &str = "{{#each ";
const LOOP_CLOSE: &str = "{{/each}}";

/// Upper bound for an explicit `limit=` value; anything larger is refused.
const MAX_LOOP_LIMIT: usize = 1000;
/// Skeleton renders unroll loops at most this many times.
const LOADING_LOOP_ITEMS: usize = 3;
/// Nesting ceiling for loop expansion.
const MAX_LOOP_DEPTH: usize = 16;

/// Private-use marker bracketing protected fenced spans.
const CODE_MARK: char = '\u{E000}';

struct RenderCtx<'a> {
    results: Option<&'a Results>,
    mode: RenderMode,
}

/// The innermost loop scope. Field resolution inside a loop body checks this
/// scope only; there is no implicit parent lookup beyond explicit `data`
/// references.
struct LoopScope<'a> {
    item: &'a Value,
    index: usize,
}

#[derive(Clone, Copy)]
enum TokenStyle {
    Single,
    Double,
}

impl TokenStyle {
    fn echo(self, expr: &str) -> String {
        match self {
            TokenStyle::Single => format!("{{{expr}}}"),
            TokenStyle::Double => format!("{{{{{expr}}}}}"),
        }
    }
}

/// Expand loops and substitution tokens in `text` against `results`.
///
/// Fenced code spans are protected first and restored verbatim, so template
/// syntax inside them is never processed. Malformed loop syntax degrades to
/// literal text; this function never fails.
pub fn process_template_substitutions(
    text: &str,
    results: Option<&Results>,
    mode: RenderMode,
) -> String {
    let ctx = RenderCtx { results, mode };
    let (protected, spans) = protect_code_spans(text);
    let rendered = render_fragment(&protected, &ctx, None, 0);
    restore_code_spans(rendered, &spans)
}

// ─── Fenced-span protection ─────────────────────────────────────────────────

fn template_fence_regex() -> &'static Regex {
    static TEMPLATE_FENCE_REGEX: OnceLock<Regex> = OnceLock::new();
    TEMPLATE_FENCE_REGEX.get_or_init(|| Regex::new(r"(?s)```.*?```").unwrap())
}

fn protect_code_spans(text: &str) -> (String, Vec<String>) {
    let mut spans = Vec::new();
    let replaced = template_fence_regex().replace_all(text, |caps: &Captures| {
        let index = spans.len();
        spans.push(caps[0].to_string());
        format!("{CODE_MARK}{index}{CODE_MARK}")
    });
    (replaced.into_owned(), spans)
}

fn restore_code_spans(text: String, spans: &[String]) -> String {
    let mut out = text;
    for (index, span) in spans.iter().enumerate() {
        // loop expansion may have duplicated a placeholder
        out = out.replace(&format!("{CODE_MARK}{index}{CODE_MARK}"), span);
    }
    out
}

// ─── Loop expansion ─────────────────────────────────────────────────────────

enum LoopParse<'a> {
    /// No matching `{{/each}}`; the rest of the fragment stays literal.
    Unmatched,
    /// Recognizably a loop, but unsafe: the whole block stays literal.
    Literal { len: usize },
    Block {
        expr: &'a str,
        limit: Option<usize>,
        body: &'a str,
        len: usize,
    },
}

fn render_fragment(text: &str, ctx: &RenderCtx, scope: Option<&LoopScope>, depth: usize) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open_pos) = rest.find(LOOP_OPEN) {
        out.push_str(&substitute_tokens(&rest[..open_pos], ctx, scope));
        let block = &rest[open_pos..];
        match parse_loop_block(block) {
            LoopParse::Unmatched => {
                warn!("unmatched {{{{#each}}}} block left unprocessed");
                out.push_str(block);
                return out;
            }
            LoopParse::Literal { len } => {
                out.push_str(&block[..len]);
                rest = &block[len..];
            }
            LoopParse::Block {
                expr,
                limit,
                body,
                len,
            } => {
                out.push_str(&expand_loop(&block[..len], expr, limit, body, ctx, scope, depth));
                rest = &block[len..];
            }
        }
    }
    out.push_str(&substitute_tokens(rest, ctx, scope));
    out
}

/// Parse one loop block at the start of `block` (which begins with
/// `{{#each `).
fn parse_loop_block(block: &str) -> LoopParse<'_> {
    let Some(header_end) = block.find("}}") else {
        return LoopParse::Unmatched;
    };
    let header = &block[LOOP_OPEN.len()..header_end];
    let body_start = header_end + 2;
    let Some(close_offset) = find_matching_close(&block[body_start..]) else {
        return LoopParse::Unmatched;
    };
    let body = &block[body_start..body_start + close_offset];
    let len = body_start + close_offset + LOOP_CLOSE.len();

    if header.contains(['{', '}', '\n']) {
        warn!("malformed loop header left unprocessed: {header}");
        return LoopParse::Literal { len };
    }
    let mut parts = header.split_whitespace();
    let Some(expr) = parts.next() else {
        warn!("loop block without an array expression left unprocessed");
        return LoopParse::Literal { len };
    };
    let mut limit = None;
    if let Some(token) = parts.next() {
        let parsed = token
            .strip_prefix("limit=")
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|n| *n <= MAX_LOOP_LIMIT);
        match parsed {
            Some(n) if parts.next().is_none() => limit = Some(n),
            _ => {
                warn!("invalid or unsafe loop limit left unprocessed: {token}");
                return LoopParse::Literal { len };
            }
        }
    }
    if expr != "data" && !is_safe_expression(expr) {
        warn!("blocked potentially unsafe loop expression: {expr}");
        return LoopParse::Literal { len };
    }
    LoopParse::Block {
        expr,
        limit,
        body,
        len,
    }
}

/// Offset of the `{{/each}}` matching the already-open loop, depth-aware.
fn find_matching_close(s: &str) -> Option<usize> {
    let mut depth = 1usize;
    let mut pos = 0;
    while pos < s.len() {
        let close = s[pos..].find(LOOP_CLOSE)?;
        match s[pos..].find(LOOP_OPEN) {
            Some(open) if open < close => {
                depth += 1;
                pos += open + LOOP_OPEN.len();
            }
            _ => {
                depth -= 1;
                if depth == 0 {
                    return Some(pos + close);
                }
                pos += close + LOOP_CLOSE.len();
            }
        }
    }
    None
}

fn expand_loop(
    raw_block: &str,
    expr: &str,
    limit: Option<usize>,
    body: &str,
    ctx: &RenderCtx,
    scope: Option<&LoopScope>,
    depth: usize,
) -> String {
    if depth >= MAX_LOOP_DEPTH {
        warn!("loop nesting exceeds depth limit, block left unprocessed");
        return raw_block.to_string();
    }
    if ctx.mode.is_loading() {
        // skeleton render: data is not consulted at all
        let count = limit.map_or(LOADING_LOOP_ITEMS, |n| n.min(LOADING_LOOP_ITEMS));
        let null_item = Value::Null;
        let parts: Vec<String> = (0..count)
            .map(|index| {
                let item_scope = LoopScope {
                    item: &null_item,
                    index,
                };
                render_fragment(body, ctx, Some(&item_scope), depth + 1)
            })
            .collect();
        return join_iterations(parts);
    }
    let Some(Value::Array(items)) = resolve_loop_target(expr, ctx, scope) else {
        // missing or non-array targets render nothing
        return String::new();
    };
    let take = limit.unwrap_or(usize::MAX);
    let parts: Vec<String> = items
        .iter()
        .take(take)
        .enumerate()
        .map(|(index, item)| {
            let item_scope = LoopScope { item, index };
            render_fragment(body, ctx, Some(&item_scope), depth + 1)
        })
        .collect();
    join_iterations(parts)
}

/// `data` is the root row sequence; `data[...]`/`data.length` evaluate
/// against the root; any other name is a field of the current loop item
/// (or of the first row at the root scope).
fn resolve_loop_target(expr: &str, ctx: &RenderCtx, scope: Option<&LoopScope>) -> Option<Value> {
    if expr == "data" {
        return ctx.results.map(|r| Value::Array(r.rows.clone()));
    }
    if expr == "data.length" || expr.starts_with("data[") {
        return evaluate_expression(expr, ctx.results, RenderMode::Normal);
    }
    match scope {
        Some(s) => get_nested_value(s.item, expr).cloned(),
        None => ctx
            .results
            .and_then(|r| r.rows.first())
            .and_then(|row| get_nested_value(row, expr))
            .cloned(),
    }
}

/// Concatenate iteration outputs. Iterations whose output starts with a
/// list marker get their own line, so loop-generated list items stack into
/// one markdown list.
fn join_iterations(parts: Vec<String>) -> String {
    let mut out = String::new();
    let last = parts.len().saturating_sub(1);
    for (i, part) in parts.iter().enumerate() {
        out.push_str(part);
        let list_like = part.starts_with("- ") || part.starts_with("* ");
        if i < last && list_like && !part.ends_with('\n') {
            out.push('\n');
        }
    }
    out
}

// ─── Token substitution ─────────────────────────────────────────────────────

fn substitute_tokens(text: &str, ctx: &RenderCtx, scope: Option<&LoopScope>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find('{') {
        out.push_str(&rest[..pos]);
        let candidate = &rest[pos..];
        match find_balanced(candidate) {
            Some(end) => {
                out.push_str(&replace_token(&candidate[..end], ctx, scope));
                rest = &candidate[end..];
            }
            None => {
                out.push('{');
                rest = &candidate[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Length of the balanced-brace token starting at `s` (which begins with
/// `{`), or `None` when the braces never balance.
fn find_balanced(s: &str) -> Option<usize> {
    let mut depth = 0i32;
    for (idx, c) in s.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(idx + 1);
                }
            }
            _ => {}
        }
    }
    None
}

fn replace_token(token: &str, ctx: &RenderCtx, scope: Option<&LoopScope>) -> String {
    if token.len() >= 5 && token.starts_with("{{") && token.ends_with("}}") {
        let inner = &token[2..token.len() - 2];
        if !inner.contains(['{', '}']) {
            return match scope {
                Some(s) => scoped_token(inner, TokenStyle::Double, ctx, s),
                // outside a loop, double braces are not part of the grammar
                None => token.to_string(),
            };
        }
        return token.to_string();
    }
    let inner = &token[1..token.len() - 1];
    if inner.trim().is_empty() {
        return token.to_string();
    }
    match scope {
        Some(s) => scoped_token(inner, TokenStyle::Single, ctx, s),
        None => evaluate_fallback(inner, ctx.results, ctx.mode),
    }
}

fn scoped_token(inner: &str, style: TokenStyle, ctx: &RenderCtx, scope: &LoopScope) -> String {
    let trimmed = inner.trim();
    if trimmed.is_empty() {
        return style.echo(inner);
    }
    if ctx.mode.is_loading() {
        if trimmed == "@index" {
            return loading_pill("0");
        }
        return match split_fallback(trimmed) {
            Some((_, fallback)) => {
                let fallback = fallback.trim();
                loading_pill(literal_text(fallback).unwrap_or(fallback))
            }
            None => loading_pill(trimmed),
        };
    }
    if trimmed == "@index" {
        return scope.index.to_string();
    }
    match split_fallback(trimmed) {
        Some((main, fallback)) => {
            let main = main.trim();
            let fallback = fallback.trim();
            match scoped_value(main, ctx, scope) {
                Err(()) => {
                    warn!("blocked potentially unsafe field expression: {trimmed}");
                    style.echo(trimmed)
                }
                Ok(Some(value)) if is_present(&value) => escape_html(&display_value(&value)),
                Ok(_) => {
                    if let Some(text) = literal_text(fallback) {
                        return text.to_string();
                    }
                    match scoped_value(fallback, ctx, scope) {
                        Ok(Some(value)) => escape_html(&display_value(&value)),
                        _ => fallback.to_string(),
                    }
                }
            }
        }
        None => match scoped_value(trimmed, ctx, scope) {
            Err(()) => {
                warn!("blocked potentially unsafe field expression: {trimmed}");
                style.echo(trimmed)
            }
            Ok(Some(value)) => escape_html(&display_value(&value)),
            Ok(None) => style.echo(trimmed),
        },
    }
}

/// Resolve one side of a loop-scoped token. `Err` means the expression is
/// outside the safe grammar; `Ok(None)` means it resolved to nothing.
fn scoped_value(expr: &str, ctx: &RenderCtx, scope: &LoopScope) -> Result<Option<Value>, ()> {
    if expr == "." {
        return Ok(Some(scope.item.clone()));
    }
    if expr == "@index" {
        return Ok(Some(Value::from(scope.index)));
    }
    if expr == "data.length" || expr.starts_with("data[") {
        if !is_safe_expression(expr) {
            return Err(());
        }
        return Ok(evaluate_expression(expr, ctx.results, ctx.mode));
    }
    if !is_safe_expression(expr) {
        return Err(());
    }
    Ok(get_nested_value(scope.item, expr).cloned())
}
