use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::sanitize::{escape_attr, escape_html, is_allowed_url};

/// Private-use marker bracketing code-block placeholders while the other
/// passes run.
const PLACEHOLDER_MARK: char = '\u{E001}';

fn fence_regex() -> &'static Regex {
    static FENCE_REGEX: OnceLock<Regex> = OnceLock::new();
    FENCE_REGEX.get_or_init(|| Regex::new(r"(?s)```(\w*)[ \t]*\n?(.*?)```").unwrap())
}

fn blank_line_regex() -> &'static Regex {
    static BLANK_LINE_REGEX: OnceLock<Regex> = OnceLock::new();
    BLANK_LINE_REGEX.get_or_init(|| Regex::new(r"\n{2,}").unwrap())
}

fn link_regex() -> &'static Regex {
    static LINK_REGEX: OnceLock<Regex> = OnceLock::new();
    LINK_REGEX.get_or_init(|| Regex::new(r"\[([^\]\n]*)\]\(([^)\n]*)\)").unwrap())
}

fn inline_code_regex() -> &'static Regex {
    static INLINE_CODE_REGEX: OnceLock<Regex> = OnceLock::new();
    INLINE_CODE_REGEX.get_or_init(|| Regex::new(r"`([^`\n]+)`").unwrap())
}

/// Convert the supported markdown dialect to HTML.
///
/// Passes run in a fixed order so constructs cannot interfere: fenced code
/// is lifted out first and restored verbatim last, so nothing inside a fence
/// is ever reinterpreted.
pub fn convert_markdown_to_html(text: &str) -> String {
    let (mut html, blocks) = extract_code_blocks(text);
    html = convert_tables(&html);
    html = convert_headers(&html);
    html = convert_lists(&html);
    html = convert_links(&html);
    html = convert_inline_code(&html);
    html = convert_emphasis(&html);
    html = convert_paragraphs(&html);
    restore_code_blocks(html, &blocks)
}

// ─── Fenced code blocks ─────────────────────────────────────────────────────

fn extract_code_blocks(text: &str) -> (String, Vec<String>) {
    let mut blocks = Vec::new();
    let replaced = fence_regex().replace_all(text, |caps: &Captures| {
        let index = blocks.len();
        blocks.push(code_block_html(&caps[1], &caps[2], index));
        format!("{PLACEHOLDER_MARK}{index}{PLACEHOLDER_MARK}")
    });
    (replaced.into_owned(), blocks)
}

fn restore_code_blocks(text: String, blocks: &[String]) -> String {
    let mut out = text;
    for (index, block) in blocks.iter().enumerate() {
        out = out.replacen(&format!("{PLACEHOLDER_MARK}{index}{PLACEHOLDER_MARK}"), block, 1);
    }
    out
}

fn code_block_html(language: &str, code: &str, index: usize) -> String {
    let lang = if language.is_empty() { "text" } else { language };
    let trimmed = code.trim();
    let escaped = escape_html(trimmed);
    let block_id = format!("code-block-{index}");
    format!(
        "<div class=\"md-code-container\" data-language=\"{lang}\" data-content=\"{content}\" id=\"{block_id}\">\
         <pre class=\"code-block\"><code class=\"language-{lang}\">{escaped}</code></pre>\
         <button class=\"markdown-copy-button\" title=\"Copy code\" onclick=\"copyCodeBlock('{block_id}')\">\
         <svg class=\"copy-icon\" xmlns=\"http://www.w3.org/2000/svg\" width=\"16\" height=\"16\" viewBox=\"0 0 24 24\" fill=\"none\" stroke=\"currentColor\" stroke-width=\"2\" stroke-linecap=\"round\" stroke-linejoin=\"round\">\
         <rect x=\"9\" y=\"9\" width=\"13\" height=\"13\" rx=\"2\" ry=\"2\"></rect>\
         <path d=\"M5 15H4a2 2 0 0 1-2-2V4a2 2 0 0 1 2-2h9a2 2 0 0 1 2 2v1\"></path>\
         </svg>\
         <svg class=\"check-icon\" style=\"display: none;\" xmlns=\"http://www.w3.org/2000/svg\" width=\"16\" height=\"16\" viewBox=\"0 0 24 24\" fill=\"none\" stroke=\"#22c55e\" stroke-width=\"2\" stroke-linecap=\"round\" stroke-linejoin=\"round\">\
         <polyline points=\"20 6 9 17 4 12\"></polyline>\
         </svg>\
         </button>\
         </div>",
        content = escape_attr(trimmed),
    )
}

// ─── Tables ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Align {
    Left,
    Right,
    Center,
}

impl Align {
    fn style(self) -> &'static str {
        match self {
            Align::Left => "text-align: left",
            Align::Right => "text-align: right",
            Align::Center => "text-align: center",
        }
    }
}

fn convert_tables(text: &str) -> String {
    let lines: Vec<&str> = text.split('\n').collect();
    let mut out: Vec<String> = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        if let Some((table, consumed)) = try_table(&lines[i..]) {
            out.push(table);
            i += consumed;
        } else {
            out.push(lines[i].to_string());
            i += 1;
        }
    }
    out.join("\n")
}

/// Parse a pipe table at the start of `lines`: a header row, a separator
/// row, then body rows. Header-only blocks are not converted.
fn try_table(lines: &[&str]) -> Option<(String, usize)> {
    if lines.len() < 2 || !lines[0].contains('|') || !lines[1].contains('|') {
        return None;
    }
    let headers = split_table_row(lines[0]);
    let aligns: Vec<Option<Align>> = split_table_row(lines[1])
        .iter()
        .map(|cell| parse_align(cell))
        .collect::<Option<Vec<_>>>()?;
    if aligns.len() != headers.len() || headers.is_empty() {
        return None;
    }

    let mut consumed = 2;
    let mut body: Vec<Vec<String>> = Vec::new();
    while consumed < lines.len() && lines[consumed].contains('|') {
        let mut cells = split_table_row(lines[consumed]);
        cells.resize(headers.len(), String::new());
        body.push(cells);
        consumed += 1;
    }

    let mut html = String::from("<table><thead><tr>");
    for (header, align) in headers.iter().zip(&aligns) {
        html.push_str(&table_cell("th", header, *align));
    }
    html.push_str("</tr></thead><tbody>");
    for row in &body {
        html.push_str("<tr>");
        for (cell, align) in row.iter().zip(&aligns) {
            html.push_str(&table_cell("td", cell, *align));
        }
        html.push_str("</tr>");
    }
    html.push_str("</tbody></table>");
    Some((html, consumed))
}

fn table_cell(tag: &str, content: &str, align: Option<Align>) -> String {
    match align {
        Some(a) => format!("<{tag} style=\"{}\">{content}</{tag}>", a.style()),
        None => format!("<{tag}>{content}</{tag}>"),
    }
}

fn split_table_row(line: &str) -> Vec<String> {
    let trimmed = line.trim();
    let trimmed = trimmed.strip_prefix('|').unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix('|').unwrap_or(trimmed);
    trimmed.split('|').map(|cell| cell.trim().to_string()).collect()
}

/// `---` → unstyled, `:--` → left, `--:` → right, `:-:` → center.
/// Anything else disqualifies the row as a separator.
fn parse_align(cell: &str) -> Option<Option<Align>> {
    let left = cell.starts_with(':');
    let right = cell.ends_with(':') && cell.len() > 1;
    let dashes = cell.trim_start_matches(':').trim_end_matches(':');
    if dashes.is_empty() || !dashes.chars().all(|c| c == '-') {
        return None;
    }
    Some(match (left, right) {
        (true, true) => Some(Align::Center),
        (true, false) => Some(Align::Left),
        (false, true) => Some(Align::Right),
        (false, false) => None,
    })
}

// ─── Headers ────────────────────────────────────────────────────────────────

fn convert_headers(text: &str) -> String {
    text.split('\n')
        .map(|line| {
            if let Some(rest) = line.strip_prefix("### ") {
                format!("<h3 class=\"rendered-markdown-h3\">{}</h3>", rest.trim_end())
            } else if let Some(rest) = line.strip_prefix("## ") {
                format!("<h2 class=\"rendered-markdown-h2\">{}</h2>", rest.trim_end())
            } else if let Some(rest) = line.strip_prefix("# ") {
                format!("<h1 class=\"rendered-markdown-h1\">{}</h1>", rest.trim_end())
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ─── Lists ──────────────────────────────────────────────────────────────────

fn is_list_line(line: &str) -> bool {
    line.starts_with("* ") || line.starts_with("- ")
}

/// Runs of `*`/`-` lines become a single `<ul>`; markers may be mixed and
/// blank lines inside a run are absorbed.
fn convert_lists(text: &str) -> String {
    let lines: Vec<&str> = text.split('\n').collect();
    let mut out: Vec<String> = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        if !is_list_line(lines[i]) {
            out.push(lines[i].to_string());
            i += 1;
            continue;
        }
        let mut items: Vec<&str> = vec![&lines[i][2..]];
        let mut j = i + 1;
        loop {
            if j < lines.len() && is_list_line(lines[j]) {
                items.push(&lines[j][2..]);
                j += 1;
                continue;
            }
            // look across blank lines for a continuation of the same list
            let mut k = j;
            while k < lines.len() && lines[k].trim().is_empty() {
                k += 1;
            }
            if k > j && k < lines.len() && is_list_line(lines[k]) {
                j = k;
                continue;
            }
            break;
        }
        let mut list = String::from("<ul>");
        for item in items {
            list.push_str("<li>");
            list.push_str(item);
            list.push_str("</li>");
        }
        list.push_str("</ul>");
        out.push(list);
        i = j;
    }
    out.join("\n")
}

// ─── Links ──────────────────────────────────────────────────────────────────

/// `[text](url)` with the URL taken up to the first `)`. Rejected schemes
/// degrade to the escaped link text; whatever followed the consumed `)`
/// stays in place.
fn convert_links(text: &str) -> String {
    link_regex()
        .replace_all(text, |caps: &Captures| {
            let label = escape_html(&caps[1]);
            let url = &caps[2];
            if is_allowed_url(url.trim()) {
                format!("<a href=\"{url}\">{label}</a>")
            } else {
                label
            }
        })
        .into_owned()
}

// ─── Inline code ────────────────────────────────────────────────────────────

fn convert_inline_code(text: &str) -> String {
    inline_code_regex()
        .replace_all(text, |caps: &Captures| {
            format!("<code>{}</code>", escape_html(&caps[1]))
        })
        .into_owned()
}

// ─── Emphasis ───────────────────────────────────────────────────────────────

fn convert_emphasis(text: &str) -> String {
    static TRIPLE: OnceLock<Regex> = OnceLock::new();
    static DOUBLE: OnceLock<Regex> = OnceLock::new();
    static SINGLE: OnceLock<Regex> = OnceLock::new();
    let triple = TRIPLE.get_or_init(|| Regex::new(r"\*\*\*([^\n]+?)\*\*\*").unwrap());
    let double = DOUBLE.get_or_init(|| Regex::new(r"\*\*([^\n]+?)\*\*").unwrap());
    let single = SINGLE.get_or_init(|| Regex::new(r"\*([^\n]+?)\*").unwrap());

    let out = triple.replace_all(text, "<em><strong>${1}</strong></em>");
    let out = double.replace_all(&out, "<strong>${1}</strong>");
    single.replace_all(&out, "<em>${1}</em>").into_owned()
}

// ─── Paragraphs ─────────────────────────────────────────────────────────────

const BLOCK_PREFIXES: &[&str] = &["<h1", "<h2", "<h3", "<ul", "<table", "<div", "<pre", "<p"];

fn starts_with_block_element(block: &str) -> bool {
    block.starts_with(PLACEHOLDER_MARK)
        || BLOCK_PREFIXES.iter().any(|prefix| block.starts_with(prefix))
}

/// Blank-line-separated blocks become `<p>…</p>` (block-level elements stay
/// bare). Text without any blank line is returned untouched, single
/// newlines and all.
fn convert_paragraphs(text: &str) -> String {
    if !blank_line_regex().is_match(text) {
        return text.to_string();
    }
    let mut out = String::new();
    for block in blank_line_regex().split(text) {
        let trimmed = block.trim();
        if trimmed.is_empty() {
            continue;
        }
        if starts_with_block_element(trimmed) {
            out.push_str(trimmed);
        } else {
            out.push_str("<p>");
            out.push_str(trimmed);
            out.push_str("</p>");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_headers() {
        assert_eq!(
            convert_markdown_to_html("# Header 1"),
            "<h1 class=\"rendered-markdown-h1\">Header 1</h1>"
        );
        assert_eq!(
            convert_markdown_to_html("## Header 2"),
            "<h2 class=\"rendered-markdown-h2\">Header 2</h2>"
        );
        assert_eq!(
            convert_markdown_to_html("### Header 3"),
            "<h3 class=\"rendered-markdown-h3\">Header 3</h3>"
        );
        assert_eq!(
            convert_markdown_to_html("# Header with spaces   "),
            "<h1 class=\"rendered-markdown-h1\">Header with spaces</h1>"
        );
    }

    #[test]
    fn test_multiple_headers() {
        let result = convert_markdown_to_html("# Main Title\n## Subtitle\n### Section");
        assert!(result.contains("<h1 class=\"rendered-markdown-h1\">Main Title</h1>"));
        assert!(result.contains("<h2 class=\"rendered-markdown-h2\">Subtitle</h2>"));
        assert!(result.contains("<h3 class=\"rendered-markdown-h3\">Section</h3>"));
    }

    #[test]
    fn test_emphasis() {
        assert_eq!(
            convert_markdown_to_html("**bold text**"),
            "<strong>bold text</strong>"
        );
        assert_eq!(
            convert_markdown_to_html("*italic text*"),
            "<em>italic text</em>"
        );
        assert_eq!(
            convert_markdown_to_html("This is **bold** and *italic* text"),
            "This is <strong>bold</strong> and <em>italic</em> text"
        );
        assert_eq!(
            convert_markdown_to_html("***bold italic***"),
            "<em><strong>bold italic</strong></em>"
        );
    }

    #[test]
    fn test_lists() {
        assert_eq!(
            convert_markdown_to_html("* Item 1\n* Item 2\n* Item 3"),
            "<ul><li>Item 1</li><li>Item 2</li><li>Item 3</li></ul>"
        );
        assert_eq!(
            convert_markdown_to_html("- Item 1\n- Item 2\n- Item 3"),
            "<ul><li>Item 1</li><li>Item 2</li><li>Item 3</li></ul>"
        );
        assert_eq!(
            convert_markdown_to_html("* Item 1\n- Item 2\n* Item 3"),
            "<ul><li>Item 1</li><li>Item 2</li><li>Item 3</li></ul>"
        );
    }

    #[test]
    fn test_list_items_process_emphasis() {
        let result = convert_markdown_to_html("* **Bold item**\n* *Italic item*");
        assert!(result.contains("<li><strong>Bold item</strong></li>"));
        assert!(result.contains("<li><em>Italic item</em></li>"));
    }

    #[test]
    fn test_indented_markers_are_not_list_items() {
        let result = convert_markdown_to_html("  - indented\ntext");
        assert!(!result.contains("<ul>"));
    }

    #[test]
    fn test_links() {
        assert_eq!(
            convert_markdown_to_html("[Google](https://google.com)"),
            "<a href=\"https://google.com\">Google</a>"
        );
        let result =
            convert_markdown_to_html("Visit [Google](https://google.com) or [GitHub](https://github.com)");
        assert!(result.contains("<a href=\"https://google.com\">Google</a>"));
        assert!(result.contains("<a href=\"https://github.com\">GitHub</a>"));
    }

    #[test]
    fn test_dangerous_link_degrades_to_text() {
        // the lazy url match stops at the first `)`, so the trailing `)`
        // survives as literal text
        assert_eq!(
            convert_markdown_to_html("[Click me](javascript:alert(\"xss\"))"),
            "Click me)"
        );
        assert_eq!(
            convert_markdown_to_html("[Click](javascript:alert(1))"),
            "Click)"
        );
    }

    #[test]
    fn test_link_text_is_escaped_href_is_not() {
        assert_eq!(
            convert_markdown_to_html(
                "[Special & \"chars\"](https://example.com/path?q=test&other=value)"
            ),
            "<a href=\"https://example.com/path?q=test&other=value\">Special &amp; \"chars\"</a>"
        );
    }

    #[test]
    fn test_inline_code() {
        assert_eq!(
            convert_markdown_to_html("run `cargo test` now"),
            "run <code>cargo test</code> now"
        );
        assert_eq!(
            convert_markdown_to_html("`a < b`"),
            "<code>a &lt; b</code>"
        );
    }

    #[test]
    fn test_fenced_code_block() {
        let result = convert_markdown_to_html("```javascript\nconst x = 1;\nconsole.log(x);\n```");
        assert!(result.contains("<div class=\"md-code-container\""));
        assert!(result.contains("data-language=\"javascript\""));
        assert!(result.contains("<pre class=\"code-block\">"));
        assert!(result.contains("<code class=\"language-javascript\">"));
        assert!(result.contains("const x = 1;"));
        assert!(result.contains("console.log(x);"));
        assert!(result.contains("class=\"markdown-copy-button\""));
        assert!(result.contains("onclick=\"copyCodeBlock("));
        assert!(result.contains("class=\"copy-icon\""));
        assert!(result.contains("class=\"check-icon\""));
    }

    #[test]
    fn test_unlabeled_fence_defaults_to_text() {
        let result = convert_markdown_to_html("```\nplain text\n```");
        assert!(result.contains("data-language=\"text\""));
        assert!(result.contains("<code class=\"language-text\">plain text</code>"));
    }

    #[test]
    fn test_code_block_content_is_escaped() {
        let result = convert_markdown_to_html("```html\n<script>alert(\"xss\")</script>\n```");
        assert!(result.contains("&lt;script&gt;"));
        assert!(result.contains("&lt;/script&gt;"));
        assert!(!result.contains("<script>"));
    }

    #[test]
    fn test_multiple_code_blocks() {
        let markdown = "First block:\n```js\nconst a = 1;\n```\n\nSecond block:\n```python\nb = 2\n```";
        let result = convert_markdown_to_html(markdown);
        assert!(result.contains("language-js"));
        assert!(result.contains("language-python"));
        assert!(result.contains("const a = 1;"));
        assert!(result.contains("b = 2"));
        assert!(result.contains("id=\"code-block-0\""));
        assert!(result.contains("id=\"code-block-1\""));
    }

    #[test]
    fn test_code_blocks_are_opaque() {
        let markdown =
            "# Header\n\n```markdown\n# This should not become a header\n**This should not become bold**\n```\n\n**This should become bold**";
        let result = convert_markdown_to_html(markdown);
        assert!(result.contains("<h1 class=\"rendered-markdown-h1\">Header</h1>"));
        assert!(result.contains("<strong>This should become bold</strong>"));
        assert!(result.contains("# This should not become a header"));
        assert!(result.contains("**This should not become bold**"));
        assert!(!result.contains("<h1 class=\"rendered-markdown-h1\">This should not become a header</h1>"));
    }

    #[test]
    fn test_paragraphs() {
        let result =
            convert_markdown_to_html("First paragraph.\n\nSecond paragraph.\n\nThird paragraph.");
        assert_eq!(
            result,
            "<p>First paragraph.</p><p>Second paragraph.</p><p>Third paragraph.</p>"
        );
    }

    #[test]
    fn test_single_newlines_are_preserved() {
        let result = convert_markdown_to_html("Line one\nLine two\nLine three");
        assert_eq!(result, "Line one\nLine two\nLine three");
    }

    #[test]
    fn test_headers_are_not_wrapped_in_paragraphs() {
        let result = convert_markdown_to_html("# Title\n\nBody text.");
        assert_eq!(
            result,
            "<h1 class=\"rendered-markdown-h1\">Title</h1><p>Body text.</p>"
        );
    }

    #[test]
    fn test_table_with_alignment() {
        let markdown = "| Name | Age |\n| :-- | --: |\n| John | 30 |\n| Jane | 25 |";
        let expected = concat!(
            "<table><thead><tr>",
            "<th style=\"text-align: left\">Name</th>",
            "<th style=\"text-align: right\">Age</th>",
            "</tr></thead><tbody>",
            "<tr><td style=\"text-align: left\">John</td><td style=\"text-align: right\">30</td></tr>",
            "<tr><td style=\"text-align: left\">Jane</td><td style=\"text-align: right\">25</td></tr>",
            "</tbody></table>",
        );
        assert_eq!(convert_markdown_to_html(markdown), expected);
    }

    #[test]
    fn test_table_without_alignment() {
        let markdown = "A | B\n--- | ---\n1 | 2";
        assert_eq!(
            convert_markdown_to_html(markdown),
            "<table><thead><tr><th>A</th><th>B</th></tr></thead><tbody><tr><td>1</td><td>2</td></tr></tbody></table>"
        );
    }

    #[test]
    fn test_table_center_alignment() {
        let markdown = "| X |\n| :-: |\n| y |";
        let result = convert_markdown_to_html(markdown);
        assert!(result.contains("<th style=\"text-align: center\">X</th>"));
        assert!(result.contains("<td style=\"text-align: center\">y</td>"));
    }

    #[test]
    fn test_header_only_block_is_not_a_table() {
        let markdown = "| A | B |\nplain text";
        let result = convert_markdown_to_html(markdown);
        assert!(!result.contains("<table>"));
        assert!(result.contains("| A | B |"));
    }

    #[test]
    fn test_ragged_table_rows_are_normalized() {
        let markdown = "| A | B |\n| --- | --- |\n| 1 |\n| 1 | 2 | 3 |";
        let result = convert_markdown_to_html(markdown);
        assert!(result.contains("<tr><td>1</td><td></td></tr>"));
        assert!(result.contains("<tr><td>1</td><td>2</td></tr>"));
    }

    #[test]
    fn test_mixed_document() {
        let markdown = "# Main Title\n\nThis is a paragraph with **bold** and *italic* text.\n\n## Links\n\nVisit these sites:\n* [Google](https://google.com)\n* [GitHub](https://github.com)\n\n### Notes\n\nAnother paragraph here.";
        let result = convert_markdown_to_html(markdown);
        assert!(result.contains("<h1 class=\"rendered-markdown-h1\">Main Title</h1>"));
        assert!(result.contains("<h2 class=\"rendered-markdown-h2\">Links</h2>"));
        assert!(result.contains("<h3 class=\"rendered-markdown-h3\">Notes</h3>"));
        assert!(result.contains("<strong>bold</strong>"));
        assert!(result.contains("<em>italic</em>"));
        assert!(result.contains("<a href=\"https://google.com\">Google</a>"));
        assert!(result.contains("<ul><li>"));
    }
}
