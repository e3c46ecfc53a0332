use std::sync::OnceLock;

use regex::Regex;

/// Tags the sanitizer lets through. Everything else is stripped together
/// with its content.
const ALLOWED_TAGS: &[&str] = &[
    "h1", "h2", "h3", "p", "ul", "li", "strong", "em", "a", "br", "span", "pre", "code", "div",
    "button", "table", "thead", "tbody", "tr", "th", "td", "svg", "rect", "path", "polyline",
];

/// Void elements never carry content, so a disallowed one drops only itself.
const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// Attribute allowlist (matched case-insensitively, emitted as written).
/// `data-*` attributes are additionally allowed; `on*` handlers never are.
const ALLOWED_ATTRIBUTES: &[&str] = &[
    "href",
    "title",
    "class",
    "style",
    "xmlns",
    "width",
    "height",
    "viewBox",
    "fill",
    "stroke",
    "stroke-width",
    "stroke-linecap",
    "stroke-linejoin",
    "x",
    "y",
    "rx",
    "ry",
    "d",
    "points",
];

/// Attributes whose values are URLs and must pass the scheme allowlist.
const URL_ATTRIBUTES: &[&str] = &["href", "src"];

/// URL schemes allowed in links and url-valued attributes. Scheme-less
/// (relative) URLs pass; everything else is rejected.
const ALLOWED_SCHEMES: &[&str] = &["http", "https", "mailto"];

/// Escape `&`, `<` and `>` for text content. Quotes pass through, matching
/// the host renderer this engine replaces.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            other => out.push(other),
        }
    }
    out
}

/// Escape for attribute positions the converter builds itself: text escaping
/// plus double quotes.
pub(crate) fn escape_attr(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            other => out.push(other),
        }
    }
    out
}

/// Check a URL against the scheme allowlist.
///
/// Control and whitespace characters are stripped first (they are a classic
/// scheme-obfuscation vector), and colon-encoding entities are decoded before
/// the scheme is read.
pub(crate) fn is_allowed_url(url: &str) -> bool {
    let cleaned: String = url
        .chars()
        .filter(|c| !c.is_ascii_control() && !c.is_whitespace())
        .collect();
    let lowered = cleaned.to_ascii_lowercase();
    let decoded = lowered
        .replace("&colon;", ":")
        .replace("&#58;", ":")
        .replace("&#x3a;", ":");
    match decoded.find(':') {
        None => true,
        Some(pos) => {
            let scheme = &decoded[..pos];
            // a colon after a path/query/fragment delimiter is not a scheme
            if scheme.contains('/') || scheme.contains('?') || scheme.contains('#') {
                return true;
            }
            ALLOWED_SCHEMES.contains(&scheme)
        }
    }
}

fn is_allowed_tag(name: &str) -> bool {
    ALLOWED_TAGS.iter().any(|t| t.eq_ignore_ascii_case(name))
}

fn is_void_tag(name: &str) -> bool {
    VOID_TAGS.iter().any(|t| t.eq_ignore_ascii_case(name))
}

fn is_data_attribute(lower_name: &str) -> bool {
    static DATA_ATTR_REGEX: OnceLock<Regex> = OnceLock::new();
    let re = DATA_ATTR_REGEX.get_or_init(|| Regex::new(r"^data-[a-z][a-z0-9-]*$").unwrap());
    re.is_match(lower_name)
}

/// Allowlist-based HTML sanitizer: the final gate before output.
///
/// Disallowed elements are removed together with their content; `on*`
/// handlers and url-valued attributes with disallowed schemes are dropped.
/// Output is normalized (lowercase tag names, double-quoted attributes) so
/// sanitizing already-sanitized output is a no-op.
pub fn sanitize_html(html: &str) -> String {
    let lower = html.to_ascii_lowercase();
    let mut out = String::with_capacity(html.len());
    let mut i = 0;

    while i < html.len() {
        let Some(rel) = html[i..].find('<') else {
            out.push_str(&html[i..]);
            break;
        };
        out.push_str(&html[i..i + rel]);
        i += rel;

        let after = &html[i + 1..];
        if after.starts_with("!--") {
            i = match html[i + 4..].find("-->") {
                Some(end) => i + 4 + end + 3,
                None => html.len(),
            };
            continue;
        }
        if after.starts_with('!') || after.starts_with('?') {
            i = match after.find('>') {
                Some(end) => i + 1 + end + 1,
                None => html.len(),
            };
            continue;
        }
        if let Some(close_rest) = after.strip_prefix('/') {
            match read_tag_name(close_rest) {
                Some(name) => {
                    let consumed = match close_rest.find('>') {
                        Some(g) => g + 1,
                        None => close_rest.len(),
                    };
                    if is_allowed_tag(name) {
                        out.push_str("</");
                        out.push_str(&name.to_ascii_lowercase());
                        out.push('>');
                    }
                    i += 2 + consumed;
                }
                None => {
                    out.push_str("&lt;");
                    i += 1;
                }
            }
            continue;
        }

        let Some(name) = read_tag_name(after) else {
            out.push_str("&lt;");
            i += 1;
            continue;
        };
        let Some(tag_end) = find_tag_end(after, name.len()) else {
            // tag never closes; nothing after it can be trusted
            break;
        };
        let attr_src = &after[name.len()..tag_end];
        let self_closing = attr_src.trim_end().ends_with('/');
        let past_tag = i + 1 + tag_end + 1;

        if is_allowed_tag(name) {
            emit_tag(&mut out, name, attr_src, self_closing);
            i = past_tag;
        } else if self_closing || is_void_tag(name) {
            i = past_tag;
        } else {
            i = skip_disallowed(&lower, &name.to_ascii_lowercase(), past_tag);
        }
    }
    out
}

/// Leading tag name of `s`, or `None` if `s` does not start one.
fn read_tag_name(s: &str) -> Option<&str> {
    let mut end = 0;
    for (idx, c) in s.char_indices() {
        if idx == 0 {
            if !c.is_ascii_alphabetic() {
                return None;
            }
            end = 1;
        } else if c.is_ascii_alphanumeric() || c == '-' {
            end = idx + c.len_utf8();
        } else {
            break;
        }
    }
    if end == 0 {
        None
    } else {
        Some(&s[..end])
    }
}

/// Offset of the tag-closing `>` in `s`, starting after the tag name and
/// skipping quoted attribute values.
fn find_tag_end(s: &str, from: usize) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (off, c) in s[from..].char_indices() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
            }
            None => match c {
                '"' | '\'' => quote = Some(c),
                '>' => return Some(from + off),
                _ => {}
            },
        }
    }
    None
}

/// Skip the content of a disallowed element, nesting-aware. `pos` is the
/// offset just past the opening tag's `>`; returns the offset just past the
/// matching close tag (or the end of input if it never closes).
fn skip_disallowed(lower: &str, name: &str, mut pos: usize) -> usize {
    let open_pat = format!("<{name}");
    let close_pat = format!("</{name}");
    let mut depth = 1usize;
    while pos < lower.len() {
        let Some(rel) = lower[pos..].find('<') else {
            return lower.len();
        };
        let at = pos + rel;
        let rest = &lower[at..];
        if rest.starts_with(&close_pat) && name_boundary(rest, close_pat.len()) {
            match rest.find('>') {
                Some(g) => pos = at + g + 1,
                None => return lower.len(),
            }
            depth -= 1;
            if depth == 0 {
                return pos;
            }
        } else if rest.starts_with(&open_pat) && name_boundary(rest, open_pat.len()) {
            match rest.find('>') {
                Some(g) => {
                    if !rest[..g + 1].ends_with("/>") {
                        depth += 1;
                    }
                    pos = at + g + 1;
                }
                None => return lower.len(),
            }
        } else {
            pos = at + 1;
        }
    }
    lower.len()
}

fn name_boundary(s: &str, idx: usize) -> bool {
    s[idx..]
        .chars()
        .next()
        .map_or(true, |c| c.is_whitespace() || c == '>' || c == '/')
}

fn emit_tag(out: &mut String, name: &str, attr_src: &str, self_closing: bool) {
    out.push('<');
    out.push_str(&name.to_ascii_lowercase());
    let src = attr_src.trim_end().trim_end_matches('/');
    for (attr_name, attr_value) in parse_attrs(src) {
        if !keep_attr(&attr_name, attr_value.as_deref()) {
            continue;
        }
        out.push(' ');
        out.push_str(&attr_name);
        if let Some(value) = attr_value {
            out.push_str("=\"");
            out.push_str(&value.replace('"', "&quot;"));
            out.push('"');
        }
    }
    if self_closing {
        out.push_str("/>");
    } else {
        out.push('>');
    }
}

fn parse_attrs(src: &str) -> Vec<(String, Option<String>)> {
    let chars: Vec<char> = src.chars().collect();
    let mut attrs = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        while i < chars.len() && (chars[i].is_whitespace() || chars[i] == '/') {
            i += 1;
        }
        if i >= chars.len() {
            break;
        }
        let name_start = i;
        while i < chars.len() && !chars[i].is_whitespace() && chars[i] != '=' && chars[i] != '/' {
            i += 1;
        }
        let name: String = chars[name_start..i].iter().collect();
        if name.is_empty() {
            i += 1;
            continue;
        }
        while i < chars.len() && chars[i].is_whitespace() {
            i += 1;
        }
        let mut value = None;
        if i < chars.len() && chars[i] == '=' {
            i += 1;
            while i < chars.len() && chars[i].is_whitespace() {
                i += 1;
            }
            if i < chars.len() && (chars[i] == '"' || chars[i] == '\'') {
                let q = chars[i];
                i += 1;
                let value_start = i;
                while i < chars.len() && chars[i] != q {
                    i += 1;
                }
                value = Some(chars[value_start..i].iter().collect());
                if i < chars.len() {
                    i += 1;
                }
            } else {
                let value_start = i;
                while i < chars.len() && !chars[i].is_whitespace() {
                    i += 1;
                }
                value = Some(chars[value_start..i].iter().collect());
            }
        }
        attrs.push((name, value));
    }
    attrs
}

fn keep_attr(name: &str, value: Option<&str>) -> bool {
    let lower = name.to_ascii_lowercase();
    if lower.starts_with("on") {
        return false;
    }
    let allowed = ALLOWED_ATTRIBUTES
        .iter()
        .any(|a| a.eq_ignore_ascii_case(name))
        || is_data_attribute(&lower);
    if !allowed {
        return false;
    }
    if URL_ATTRIBUTES.contains(&lower.as_str()) {
        return value.is_some_and(is_allowed_url);
    }
    if lower == "style" {
        if let Some(v) = value {
            let lv = v.to_ascii_lowercase();
            if lv.contains("javascript:") || lv.contains("expression(") {
                return false;
            }
        }
    }
    true
}
