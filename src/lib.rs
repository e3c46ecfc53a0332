//! # Dashmark
//!
//! Safe rendering of query results into formatted HTML, driven by a
//! miniature template/markdown language embedded in dashboard widgets and
//! chat responses.
//!
//! Templates may come from untrusted sources (remote widget definitions,
//! model output), so there is no general-purpose evaluator anywhere in the
//! pipeline: expressions are matched against a strict allowlist grammar,
//! loops are bounded, and every render passes through an allowlist HTML
//! sanitizer before the string is returned.
//!
//! ## Features
//! - `{expr}` substitution with `||` fallbacks (`data[0].name`,
//!   `data.length`, bare first-row fields)
//! - `{{#each ...}}` loops with optional `limit=N`, nestable, with
//!   `{{field}}`, `{{@index}}` and `{{.}}` inside the body
//! - markdown conversion: headers, emphasis, links, lists, tables, inline
//!   and fenced code (fences are opaque to substitution)
//! - a loading mode that renders shimmer-pill skeletons instead of values
//!
//! ## Example
//! ```ignore
//! use dashmark::{render_markdown, Results};
//! use serde_json::json;
//!
//! let results = Results::from_rows(vec![json!({"name": "John", "age": 30})]);
//! let html = render_markdown("# Hello {name}", Some(&results));
//! assert_eq!(html, "<h1 class=\"rendered-markdown-h1\">Hello John</h1>");
//! ```
//!
//! ## Example — loops
//! ```ignore
//! use dashmark::{render_markdown, Results};
//! use serde_json::json;
//!
//! let results = Results::from_rows(vec![
//!     json!({"name": "John"}),
//!     json!({"name": "Jane"}),
//! ]);
//! let html = render_markdown("{{#each data}}- {name}{{/each}}", Some(&results));
//! assert_eq!(html, "<ul><li>John</li><li>Jane</li></ul>");
//! ```

pub mod error;
pub mod expr;
pub mod markdown;
pub mod results;
pub mod sanitize;
pub mod template;
pub mod value;

// --- Core types ---
pub use error::{RenderError, RenderResult};
pub use expr::RenderMode;
pub use results::{Column, ColumnType, Results};

// --- Pipeline stages, independently callable ---
pub use expr::{evaluate_expression, evaluate_fallback};
pub use markdown::convert_markdown_to_html;
pub use sanitize::{escape_html, sanitize_html};
pub use template::process_template_substitutions;
pub use value::get_nested_value;

/// Shimmer animation used by loading-pill placeholders. Appended outside
/// the sanitizer on purpose: `<style>` is not an allowed tag, and this
/// block is engine-owned markup, not template content.
const LOADING_STYLE: &str = "<style>\n@keyframes shimmer {\n  0% { background-position: -200% 0; }\n  100% { background-position: 200% 0; }\n}\n.loading-pill {\n  animation: shimmer 1.5s infinite linear;\n}\n</style>\n";

/// Render a template against query results and return sanitized HTML.
///
/// Never fails: malformed template syntax degrades to literal text and the
/// result is always a string (empty input renders empty).
pub fn render_markdown(text: &str, results: Option<&Results>) -> String {
    render_markdown_with_mode(text, results, RenderMode::Normal)
}

/// Render a template with an explicit mode. `RenderMode::Loading` replaces
/// every substitution and loop iteration with shimmer-pill skeleton markup
/// and prepends the shimmer keyframes.
pub fn render_markdown_with_mode(
    text: &str,
    results: Option<&Results>,
    mode: RenderMode,
) -> String {
    if text.is_empty() {
        return String::new();
    }
    let substituted = process_template_substitutions(text, results, mode);
    let html = convert_markdown_to_html(&substituted);
    let sanitized = sanitize_html(&html);
    if mode.is_loading() {
        format!("{LOADING_STYLE}{sanitized}")
    } else {
        sanitized
    }
}
